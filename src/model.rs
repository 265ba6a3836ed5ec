use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds on the professional's local calendar — the only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const MINUTE_MS: Ms = 60_000;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Professional,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Professional => "PROFESSIONAL",
        }
    }
}

/// The identity performing a transition. Ownership checks and the
/// Pending/WaitingForClient confirm routing both key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Client(Ulid),
    Professional(Ulid),
}

impl Actor {
    pub fn user_id(&self) -> Ulid {
        match self {
            Actor::Client(id) | Actor::Professional(id) => *id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Actor::Client(_) => Role::Client,
            Actor::Professional(_) => Role::Professional,
        }
    }
}

/// Reservation lifecycle. Only `Confirmed` blocks calendar slots;
/// `Pending`/`WaitingForClient` coexist freely until one of them wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    WaitingForClient,
    Confirmed,
    Declined,
    CancelledByClient,
    CancelledByClientLate,
    CancelledByPro,
    CancelledAutoOverlap,
    Completed,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::WaitingForClient => "WAITING_FOR_CLIENT",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Declined => "DECLINED",
            ReservationStatus::CancelledByClient => "CANCELLED_BY_CLIENT",
            ReservationStatus::CancelledByClientLate => "CANCELLED_BY_CLIENT_LATE",
            ReservationStatus::CancelledByPro => "CANCELLED_BY_PRO",
            ReservationStatus::CancelledAutoOverlap => "CANCELLED_AUTO_OVERLAP",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }

    /// Still awaiting a resolution (confirm, decline, expiry, overlap loss).
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::WaitingForClient
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open() && *self != ReservationStatus::Confirmed
    }

    /// Only confirmed reservations occupy slots in the calendar.
    pub fn blocks_slots(&self) -> bool {
        *self == ReservationStatus::Confirmed
    }

    /// The transition table. Everything not listed here is rejected
    /// at the mutation boundary before any event is written.
    pub fn allows(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match self {
            Pending => matches!(
                next,
                Confirmed | Declined | WaitingForClient | Expired | CancelledAutoOverlap
            ),
            WaitingForClient => {
                matches!(next, Confirmed | Declined | Expired | CancelledAutoOverlap)
            }
            Confirmed => matches!(
                next,
                Completed
                    | CancelledByClient
                    | CancelledByClientLate
                    | CancelledByPro
                    | CancelledAutoOverlap
            ),
            _ => false,
        }
    }
}

/// Recurring weekly open window. `weekday` is 0–6 with 0 = Sunday.
/// Minutes are offsets into the local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    pub weekday: u8,
    pub start_minute: u32,
    pub end_minute: u32,
    pub active: bool,
}

/// A service category the professional offers. Slots are only
/// computed for categories with an active offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub active: bool,
    pub price_cents: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub category_id: Ulid,
    pub city_id: Ulid,
    /// Absolute slot start, constructed from local calendar components.
    pub time_slot: Ms,
    pub duration_hours: u8,
    /// Response deadline while in an open state.
    pub expires_at: Ms,
    pub status: ReservationStatus,
    /// One-shot: the professional may change the duration exactly once.
    pub is_modified_by_pro: bool,
    pub confirmed_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(
            self.time_slot,
            self.time_slot + self.duration_hours as Ms * HOUR_MS,
        )
    }
}

// ── Audit log ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    Created,
    Declined,
    DurationModified,
    Confirmed,
    Cancelled,
    Completed,
    Expired,
}

/// Append-only record of a reservation transition. One per committed
/// transition, written in the same lock scope as the transition itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub reservation_id: Ulid,
    pub kind: AuditKind,
    pub actor_user_id: Option<Ulid>,
    pub actor_role: Option<Role>,
    pub metadata: serde_json::Value,
    pub created_at: Ms,
}

// ── Per-professional state partition ─────────────────────────────

#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub id: Ulid,
    pub city_id: Ulid,
    /// Replaced wholesale; at most one active rule per weekday.
    pub rules: Vec<WeeklyRule>,
    pub offerings: HashMap<Ulid, Offering>,
    /// All reservations ever made with this professional, sorted by
    /// `time_slot`. Terminal rows are retained for history.
    pub reservations: Vec<Reservation>,
    pub audit: Vec<AuditRecord>,
}

impl ProfessionalState {
    pub fn new(id: Ulid, city_id: Ulid) -> Self {
        Self {
            id,
            city_id,
            rules: Vec::new(),
            offerings: HashMap::new(),
            reservations: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn active_rule(&self, weekday: u8) -> Option<&WeeklyRule> {
        self.rules.iter().find(|r| r.weekday == weekday && r.active)
    }

    /// Insert maintaining sort order by time_slot.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.time_slot, |r| r.time_slot)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose `time_slot` falls inside `day`. The vec is
    /// sorted by time_slot, so both bounds are binary searches.
    pub fn starting_within(&self, day: &Span) -> &[Reservation] {
        let lo = self
            .reservations
            .partition_point(|r| r.time_slot < day.start);
        let hi = self.reservations.partition_point(|r| r.time_slot < day.end);
        &self.reservations[lo..hi]
    }
}

// ── WAL / notification events ────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format;
/// replaying these rebuilds every partition and its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalRegistered {
        id: Ulid,
        city_id: Ulid,
    },
    WeeklyRulesReplaced {
        professional_id: Ulid,
        rules: Vec<WeeklyRule>,
    },
    OfferingUpserted {
        professional_id: Ulid,
        category_id: Ulid,
        active: bool,
        price_cents: u32,
    },
    ReservationCreated {
        reservation: Reservation,
        at: Ms,
    },
    ReservationDeclined {
        id: Ulid,
        professional_id: Ulid,
        actor: Actor,
        at: Ms,
    },
    DurationModified {
        id: Ulid,
        professional_id: Ulid,
        duration_hours: u8,
        at: Ms,
    },
    ReservationConfirmed {
        id: Ulid,
        professional_id: Ulid,
        actor: Actor,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        professional_id: Ulid,
        status: ReservationStatus,
        actor: Option<Actor>,
        reason: Option<String>,
        /// Set when the cancellation lost a winner-takes-all resolution.
        winner: Option<Ulid>,
        at: Ms,
    },
    ReservationCompleted {
        id: Ulid,
        professional_id: Ulid,
        auto: bool,
        at: Ms,
    },
    ReservationExpired {
        id: Ulid,
        professional_id: Ulid,
        at: Ms,
    },
}

/// Extract the owning professional for partition routing.
/// `ProfessionalRegistered` is handled at the map level, not here.
pub fn event_professional_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ProfessionalRegistered { .. } => None,
        Event::WeeklyRulesReplaced { professional_id, .. }
        | Event::OfferingUpserted { professional_id, .. }
        | Event::ReservationDeclined { professional_id, .. }
        | Event::DurationModified { professional_id, .. }
        | Event::ReservationConfirmed { professional_id, .. }
        | Event::ReservationCancelled { professional_id, .. }
        | Event::ReservationCompleted { professional_id, .. }
        | Event::ReservationExpired { professional_id, .. } => Some(*professional_id),
        Event::ReservationCreated { reservation, .. } => Some(reservation.professional_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, duration_hours: u8, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            professional_id: Ulid::new(),
            client_id: Ulid::new(),
            category_id: Ulid::new(),
            city_id: Ulid::new(),
            time_slot: start,
            duration_hours,
            expires_at: start + 24 * HOUR_MS,
            status,
            is_modified_by_pro: false,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn reservation_span_is_duration_aware() {
        let r = reservation(10 * HOUR_MS, 2, ReservationStatus::Pending);
        assert_eq!(r.span(), Span::new(10 * HOUR_MS, 12 * HOUR_MS));
    }

    #[test]
    fn status_helpers() {
        use ReservationStatus::*;
        assert!(Pending.is_open());
        assert!(WaitingForClient.is_open());
        assert!(!Confirmed.is_open());
        assert!(Confirmed.blocks_slots());
        assert!(!Pending.blocks_slots());
        assert!(Declined.is_terminal());
        assert!(Expired.is_terminal());
        assert!(!Confirmed.is_terminal());
    }

    #[test]
    fn transition_table() {
        use ReservationStatus::*;
        assert!(Pending.allows(Confirmed));
        assert!(Pending.allows(WaitingForClient));
        assert!(Pending.allows(Declined));
        assert!(WaitingForClient.allows(Confirmed));
        assert!(!WaitingForClient.allows(WaitingForClient));
        assert!(Confirmed.allows(Completed));
        assert!(Confirmed.allows(CancelledByClientLate));
        assert!(!Confirmed.allows(Confirmed));
        assert!(!Declined.allows(Confirmed));
        assert!(!Completed.allows(CancelledByPro));
        assert!(!Expired.allows(Confirmed));
    }

    #[test]
    fn insert_reservation_keeps_order() {
        let mut state = ProfessionalState::new(Ulid::new(), Ulid::new());
        state.insert_reservation(reservation(3 * HOUR_MS, 1, ReservationStatus::Pending));
        state.insert_reservation(reservation(HOUR_MS, 1, ReservationStatus::Pending));
        state.insert_reservation(reservation(2 * HOUR_MS, 1, ReservationStatus::Pending));
        let starts: Vec<Ms> = state.reservations.iter().map(|r| r.time_slot).collect();
        assert_eq!(starts, vec![HOUR_MS, 2 * HOUR_MS, 3 * HOUR_MS]);
    }

    #[test]
    fn starting_within_windows_by_slot_start() {
        let mut state = ProfessionalState::new(Ulid::new(), Ulid::new());
        for h in [1i64, 5, 30, 49] {
            state.insert_reservation(reservation(h * HOUR_MS, 1, ReservationStatus::Pending));
        }
        let day = Span::new(24 * HOUR_MS, 48 * HOUR_MS);
        let inside = state.starting_within(&day);
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].time_slot, 30 * HOUR_MS);
    }

    #[test]
    fn starting_within_excludes_spillover_from_previous_day() {
        // A long reservation starting at 23:00 the previous day spills into
        // the window but its slot start is outside it.
        let mut state = ProfessionalState::new(Ulid::new(), Ulid::new());
        state.insert_reservation(reservation(23 * HOUR_MS, 8, ReservationStatus::Confirmed));
        let day = Span::new(24 * HOUR_MS, 48 * HOUR_MS);
        assert!(state.starting_within(&day).is_empty());
    }

    #[test]
    fn event_routing() {
        let r = reservation(HOUR_MS, 1, ReservationStatus::Pending);
        let pid = r.professional_id;
        assert_eq!(
            event_professional_id(&Event::ReservationCreated {
                reservation: r,
                at: 0,
            }),
            Some(pid)
        );
        assert_eq!(
            event_professional_id(&Event::ProfessionalRegistered {
                id: Ulid::new(),
                city_id: Ulid::new(),
            }),
            None
        );
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCancelled {
            id: Ulid::new(),
            professional_id: Ulid::new(),
            status: ReservationStatus::CancelledAutoOverlap,
            actor: None,
            reason: None,
            winner: Some(Ulid::new()),
            at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
