mod error;
mod mutations;
mod queries;
mod slots;
mod validate;

pub use error::EngineError;
pub use slots::{calendar_day, compute_slots, day_span, local_instant, slot_label, weekday_index};
pub use validate::{BookingRequest, Catalog, ClientProfile, Directory};

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, NoticeKind, Notifier};
use crate::wal::Wal;

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

// ── Group-commit WAL channel ─────────────────────────────────────

/// One durable write request: all events commit together or the whole
/// request fails. Multi-event transitions (a confirm plus its losers,
/// a bulk expiration) ride in a single request.
struct WalRequest {
    events: Vec<Event>,
    ack: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches requests for group
/// commit: block on the first request, drain whatever else is already
/// queued, buffer everything, one fsync, then ack every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalRequest>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(req) = rx.try_recv() {
            batch.push(req);
        }

        let event_count: usize = batch.iter().map(|r| r.events.len()).sum();
        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(event_count as f64);

        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for req in batch {
            let ack = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = req.ack.send(ack);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[WalRequest]) -> io::Result<()> {
    let mut buffer_err: Option<io::Error> = None;
    'outer: for req in batch {
        for event in &req.events {
            if let Err(e) = wal.buffer(event) {
                buffer_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always sync — even after a buffer error — so partially buffered
    // bytes don't leak into the next batch (these callers were already
    // told their batch failed).
    let sync_err = wal.sync().err();
    if let Some(e) = buffer_err {
        return Err(e);
    }
    if let Some(e) = sync_err {
        return Err(e);
    }
    Ok(())
}

// ── Engine ───────────────────────────────────────────────────────

/// The slot-allocation and conflict-resolution engine. State is
/// partitioned by professional; each partition's write lock is the
/// transaction boundary for every status-changing protocol, so the
/// overlap-check read and the winner/loser writes always act on one
/// consistent snapshot. Partitions never contend with each other.
pub struct Engine {
    pub state: DashMap<Ulid, SharedProfessionalState>,
    wal_tx: mpsc::Sender<WalRequest>,
    pub notify: Arc<Notifier>,
    /// Reverse lookup: reservation id → professional id.
    reservation_index: DashMap<Ulid, Ulid>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    pub fn open(wal_path: &Path, notify: Arc<Notifier>) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_index: DashMap::new(),
        };

        // We are the sole owner of these Arcs during replay, so try_write
        // always succeeds instantly. Never block here: open() may run
        // inside an async context.
        for event in &events {
            match event {
                Event::ProfessionalRegistered { id, city_id } => {
                    engine.state.insert(
                        *id,
                        Arc::new(RwLock::new(ProfessionalState::new(*id, *city_id))),
                    );
                }
                other => {
                    if let Some(pid) = event_professional_id(other)
                        && let Some(entry) = engine.state.get(&pid)
                    {
                        let shared = entry.value().clone();
                        let mut guard =
                            shared.try_write().expect("replay: uncontended write");
                        apply(&mut guard, other, &engine.reservation_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn professional_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// Lookup reservation → professional, get the partition, acquire
    /// its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProfessionalState>), EngineError> {
        let professional_id = self
            .professional_of(reservation_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let shared = self
            .professional(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let guard = shared.write_owned().await;
        Ok((professional_id, guard))
    }

    /// Durably append the events as one WAL request, then apply them to
    /// the locked partition and emit notices. A WAL failure leaves the
    /// in-memory state untouched — the transition simply did not happen.
    pub(super) async fn persist_and_apply(
        &self,
        guard: &mut ProfessionalState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.wal_append(&events).await?;
        for event in &events {
            apply(guard, event, &self.reservation_index);
            if let Some(notice) = notice_for(guard, event) {
                self.notify.send(notice);
            }
        }
        Ok(())
    }

    async fn wal_append(&self, events: &[Event]) -> Result<(), EngineError> {
        let (ack, rx) = oneshot::channel();
        self.wal_tx
            .send(WalRequest {
                events: events.to_vec(),
                ack,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }
}

/// Apply an event to a partition (no locking — caller holds the lock).
/// Also derives the audit row for reservation transitions, in the same
/// scope as the state change itself.
fn apply(state: &mut ProfessionalState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ProfessionalRegistered { .. } => {} // map-level, not here
        Event::WeeklyRulesReplaced { rules, .. } => {
            state.rules = rules.clone();
        }
        Event::OfferingUpserted {
            category_id,
            active,
            price_cents,
            ..
        } => {
            state.offerings.insert(
                *category_id,
                Offering {
                    active: *active,
                    price_cents: *price_cents,
                },
            );
        }
        Event::ReservationCreated { reservation, at } => {
            index.insert(reservation.id, reservation.professional_id);
            state.insert_reservation(reservation.clone());
            push_audit(
                state,
                reservation.id,
                AuditKind::Created,
                Some(Actor::Client(reservation.client_id)),
                json!({ "time_slot": reservation.time_slot }),
                *at,
            );
        }
        Event::ReservationDeclined { id, actor, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(ReservationStatus::Declined));
                r.status = ReservationStatus::Declined;
            }
            push_audit(state, *id, AuditKind::Declined, Some(*actor), json!({}), *at);
        }
        Event::DurationModified {
            id,
            professional_id,
            duration_hours,
            at,
        } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(ReservationStatus::WaitingForClient));
                r.duration_hours = *duration_hours;
                r.is_modified_by_pro = true;
                r.status = ReservationStatus::WaitingForClient;
            }
            push_audit(
                state,
                *id,
                AuditKind::DurationModified,
                Some(Actor::Professional(*professional_id)),
                json!({ "duration_hours": duration_hours }),
                *at,
            );
        }
        Event::ReservationConfirmed { id, actor, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(ReservationStatus::Confirmed));
                r.status = ReservationStatus::Confirmed;
                r.confirmed_at = Some(*at);
            }
            push_audit(state, *id, AuditKind::Confirmed, Some(*actor), json!({}), *at);
        }
        Event::ReservationCancelled {
            id,
            status,
            actor,
            reason,
            winner,
            at,
            ..
        } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(*status));
                r.status = *status;
                r.cancelled_at = Some(*at);
            }
            push_audit(
                state,
                *id,
                AuditKind::Cancelled,
                *actor,
                json!({ "status": status.as_str(), "reason": reason, "winner": winner }),
                *at,
            );
        }
        Event::ReservationCompleted { id, auto, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(ReservationStatus::Completed));
                r.status = ReservationStatus::Completed;
                r.completed_at = Some(*at);
            }
            push_audit(
                state,
                *id,
                AuditKind::Completed,
                None,
                json!({ "auto": auto }),
                *at,
            );
        }
        Event::ReservationExpired { id, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                debug_assert!(r.status.allows(ReservationStatus::Expired));
                r.status = ReservationStatus::Expired;
            }
            push_audit(
                state,
                *id,
                AuditKind::Expired,
                None,
                json!({ "reason": "AUTO_EXPIRE" }),
                *at,
            );
        }
    }
}

fn push_audit(
    state: &mut ProfessionalState,
    reservation_id: Ulid,
    kind: AuditKind,
    actor: Option<Actor>,
    metadata: serde_json::Value,
    created_at: Ms,
) {
    state.audit.push(AuditRecord {
        reservation_id,
        kind,
        actor_user_id: actor.map(|a| a.user_id()),
        actor_role: actor.map(|a| a.role()),
        metadata,
        created_at,
    });
}

/// Map a committed event to the notice the notification collaborator
/// receives. Declines, completions, and expirations are internal —
/// the boundary contract is Created/Confirmed/Cancelled/Modified.
fn notice_for(state: &ProfessionalState, event: &Event) -> Option<Notice> {
    let (kind, id, reason) = match event {
        Event::ReservationCreated { reservation, .. } => {
            (NoticeKind::Created, reservation.id, None)
        }
        Event::ReservationConfirmed { id, .. } => (NoticeKind::Confirmed, *id, None),
        Event::DurationModified { id, .. } => (NoticeKind::Modified, *id, None),
        Event::ReservationCancelled { id, reason, .. } => {
            (NoticeKind::Cancelled, *id, reason.clone())
        }
        _ => return None,
    };
    let r = state.reservation(&id)?;
    Some(Notice {
        kind,
        reservation_id: id,
        professional_id: r.professional_id,
        client_id: r.client_id,
        reason,
    })
}
