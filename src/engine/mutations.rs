use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::slots::calendar_day;
use super::{Engine, EngineError};

impl Engine {
    // ── Setup ────────────────────────────────────────────────────

    pub async fn register_professional(
        &self,
        id: Ulid,
        city_id: Ulid,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_PROFESSIONALS {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyRegistered(id));
        }

        let event = Event::ProfessionalRegistered { id, city_id };
        self.wal_append(std::slice::from_ref(&event)).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(ProfessionalState::new(id, city_id))));
        Ok(())
    }

    /// Replace the weekly availability template wholesale. At most one
    /// active rule per weekday; minute windows must be well-formed.
    pub async fn replace_weekly_rules(
        &self,
        professional_id: Ulid,
        rules: Vec<WeeklyRule>,
    ) -> Result<(), EngineError> {
        let mut seen_active = [false; 7];
        for rule in &rules {
            if rule.weekday > 6 {
                return Err(EngineError::RuleInvalid("weekday out of range"));
            }
            if rule.start_minute >= rule.end_minute || rule.end_minute > MINUTES_PER_DAY {
                return Err(EngineError::RuleInvalid("minute window out of range"));
            }
            if rule.active {
                if seen_active[rule.weekday as usize] {
                    return Err(EngineError::RuleInvalid("duplicate active rule for weekday"));
                }
                seen_active[rule.weekday as usize] = true;
            }
        }

        let shared = self
            .professional(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let mut guard = shared.write_owned().await;
        let event = Event::WeeklyRulesReplaced {
            professional_id,
            rules,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    pub async fn upsert_offering(
        &self,
        professional_id: Ulid,
        category_id: Ulid,
        active: bool,
        price_cents: u32,
    ) -> Result<(), EngineError> {
        let shared = self
            .professional(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let mut guard = shared.write_owned().await;
        let event = Event::OfferingUpserted {
            professional_id,
            category_id,
            active,
            price_cents,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    // ── Reservation transitions ──────────────────────────────────

    /// Professional rejects a pending request.
    pub async fn decline(
        &self,
        reservation_id: Ulid,
        professional_id: Ulid,
        now: Ms,
    ) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.professional_id != professional_id {
            return Err(EngineError::NotOwner(professional_id));
        }
        expect_status(r, ReservationStatus::Pending, "PENDING")?;

        let event = Event::ReservationDeclined {
            id: reservation_id,
            professional_id,
            actor: Actor::Professional(professional_id),
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// One-shot duration change by the professional. Only from Pending;
    /// the extension hours must not collide with any other open or
    /// confirmed reservation — collision is a hard reject, not a queue.
    pub async fn modify_duration(
        &self,
        reservation_id: Ulid,
        professional_id: Ulid,
        duration_hours: u8,
        now: Ms,
    ) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.professional_id != professional_id {
            return Err(EngineError::NotOwner(professional_id));
        }
        // Checked before status so a second attempt is rejected with the
        // same code regardless of what state the first one led to.
        if r.is_modified_by_pro {
            return Err(EngineError::ModificationUsed(reservation_id));
        }
        expect_status(r, ReservationStatus::Pending, "PENDING")?;
        if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&duration_hours) {
            return Err(EngineError::DurationOutOfRange(duration_hours));
        }

        if duration_hours > 1 {
            // The first hour is the reservation's own claim; only the
            // extension needs to be free of competing claims.
            let extension = Span::new(
                r.time_slot + HOUR_MS,
                r.time_slot + duration_hours as Ms * HOUR_MS,
            );
            let blocker = guard.reservations.iter().find(|other| {
                other.id != reservation_id
                    && (other.status.is_open() || other.status.blocks_slots())
                    && other.span().overlaps(&extension)
            });
            if let Some(blocker) = blocker {
                return Err(EngineError::SlotTaken(blocker.id));
            }
        }

        let event = Event::DurationModified {
            id: reservation_id,
            professional_id,
            duration_hours,
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// Client answers a duration modification: accept routes into the
    /// confirm protocol, refusal declines outright.
    pub async fn respond_to_modification(
        &self,
        reservation_id: Ulid,
        client_id: Ulid,
        accept: bool,
        now: Ms,
    ) -> Result<(), EngineError> {
        if accept {
            return self.confirm(reservation_id, Actor::Client(client_id), now).await;
        }

        let (_, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.client_id != client_id {
            return Err(EngineError::NotOwner(client_id));
        }
        expect_status(r, ReservationStatus::WaitingForClient, "WAITING_FOR_CLIENT")?;

        let event = Event::ReservationDeclined {
            id: reservation_id,
            professional_id: r.professional_id,
            actor: Actor::Client(client_id),
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// The winner-takes-all critical path. A professional confirms a
    /// Pending reservation; a client confirms a WaitingForClient one.
    ///
    /// The whole protocol runs under the professional's write lock:
    /// re-read, overlap check against confirmed peers, commit, and the
    /// sweep of losing competitors are one atomic unit. Two concurrent
    /// confirms for overlapping intervals serialize here — the loser is
    /// either swept by the winner's commit (its late confirm then fails
    /// the status re-check) or aborted by the overlap check with
    /// `SLOT_TAKEN`. Retries keep reporting the same loss.
    pub async fn confirm(
        &self,
        reservation_id: Ulid,
        actor: Actor,
        now: Ms,
    ) -> Result<(), EngineError> {
        let (professional_id, mut guard) =
            self.resolve_reservation_write(&reservation_id).await?;

        // Re-read inside the lock; never trust a pre-lock snapshot.
        let target = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        match actor {
            Actor::Professional(pid) => {
                if target.professional_id != pid {
                    return Err(EngineError::NotOwner(pid));
                }
                expect_status(target, ReservationStatus::Pending, "PENDING")?;
            }
            Actor::Client(cid) => {
                if target.client_id != cid {
                    return Err(EngineError::NotOwner(cid));
                }
                expect_status(target, ReservationStatus::WaitingForClient, "WAITING_FOR_CLIENT")?;
            }
        }

        let interval = target.span();
        let day = calendar_day(target.time_slot);

        // An already-committed winner anywhere in the interval aborts us.
        if let Some(winner) = guard
            .starting_within(&day)
            .iter()
            .find(|r| {
                r.id != reservation_id && r.status.blocks_slots() && r.span().overlaps(&interval)
            })
        {
            metrics::counter!(observability::CONFIRM_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken(winner.id));
        }

        // Commit the winner and cancel every open competitor in one unit.
        let mut events = vec![Event::ReservationConfirmed {
            id: reservation_id,
            professional_id,
            actor,
            at: now,
        }];
        let losers: Vec<Ulid> = guard
            .starting_within(&day)
            .iter()
            .filter(|r| {
                r.id != reservation_id && r.status.is_open() && r.span().overlaps(&interval)
            })
            .map(|r| r.id)
            .collect();
        for loser in &losers {
            events.push(Event::ReservationCancelled {
                id: *loser,
                professional_id,
                status: ReservationStatus::CancelledAutoOverlap,
                actor: None,
                reason: None,
                winner: Some(reservation_id),
                at: now,
            });
        }
        self.persist_and_apply(&mut guard, events).await?;
        drop(guard);

        metrics::counter!(observability::CONFIRMATIONS_TOTAL).increment(1);
        metrics::counter!(observability::AUTO_CANCELLATIONS_TOTAL)
            .increment(losers.len() as u64);
        tracing::info!(
            reservation = %reservation_id,
            professional = %professional_id,
            losers = losers.len(),
            "reservation confirmed"
        );

        // Best-effort back-to-back completion; never fails the confirm.
        if let Err(e) = self
            .run_domino_pass(professional_id, interval.start, now)
            .await
        {
            tracing::warn!(
                professional = %professional_id,
                "domino pass failed after confirm: {e}"
            );
        }

        Ok(())
    }

    /// Client cancellation of a confirmed reservation. More than 24h
    /// before the slot it is a plain cancellation, inside that window
    /// it is recorded as late. No reason required.
    pub async fn cancel_by_client(
        &self,
        reservation_id: Ulid,
        client_id: Ulid,
        now: Ms,
    ) -> Result<(), EngineError> {
        let (professional_id, mut guard) =
            self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.client_id != client_id {
            return Err(EngineError::NotOwner(client_id));
        }
        expect_status(r, ReservationStatus::Confirmed, "CONFIRMED")?;

        let status = if r.time_slot - now > LATE_CANCEL_WINDOW_MS {
            ReservationStatus::CancelledByClient
        } else {
            ReservationStatus::CancelledByClientLate
        };
        let event = Event::ReservationCancelled {
            id: reservation_id,
            professional_id,
            status,
            actor: Some(Actor::Client(client_id)),
            reason: None,
            winner: None,
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// Professional cancellation of a confirmed reservation; a non-empty
    /// reason is required.
    pub async fn cancel_by_professional(
        &self,
        reservation_id: Ulid,
        professional_id: Ulid,
        reason: &str,
        now: Ms,
    ) -> Result<(), EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::ReasonRequired);
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }

        let (_, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.professional_id != professional_id {
            return Err(EngineError::NotOwner(professional_id));
        }
        expect_status(r, ReservationStatus::Confirmed, "CONFIRMED")?;

        let event = Event::ReservationCancelled {
            id: reservation_id,
            professional_id,
            status: ReservationStatus::CancelledByPro,
            actor: Some(Actor::Professional(professional_id)),
            reason: Some(reason.to_string()),
            winner: None,
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    /// Professional marks a confirmed reservation done, once its slot
    /// time has passed.
    pub async fn complete(
        &self,
        reservation_id: Ulid,
        professional_id: Ulid,
        now: Ms,
    ) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let r = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if r.professional_id != professional_id {
            return Err(EngineError::NotOwner(professional_id));
        }
        expect_status(r, ReservationStatus::Confirmed, "CONFIRMED")?;
        if r.time_slot >= now {
            return Err(EngineError::NotStarted);
        }

        let event = Event::ReservationCompleted {
            id: reservation_id,
            professional_id,
            auto: false,
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await
    }

    // ── Scheduled entry points ───────────────────────────────────

    /// Back-to-back auto-completion: after a confirmation at
    /// `confirmed_start`, the same-day confirmed reservation ending
    /// exactly then (millisecond-exact) is marked completed. At most
    /// one link of the chain advances per invocation.
    pub async fn run_domino_pass(
        &self,
        professional_id: Ulid,
        confirmed_start: Ms,
        now: Ms,
    ) -> Result<Option<Ulid>, EngineError> {
        let shared = self
            .professional(&professional_id)
            .ok_or(EngineError::ProfessionalNotFound(professional_id))?;
        let mut guard = shared.write_owned().await;

        let day = calendar_day(confirmed_start);
        let previous = guard
            .starting_within(&day)
            .iter()
            .find(|r| r.status.blocks_slots() && r.span().end == confirmed_start)
            .map(|r| r.id);
        let Some(previous_id) = previous else {
            return Ok(None);
        };

        let event = Event::ReservationCompleted {
            id: previous_id,
            professional_id,
            auto: true,
            at: now,
        };
        self.persist_and_apply(&mut guard, vec![event]).await?;

        metrics::counter!(observability::DOMINO_COMPLETIONS_TOTAL).increment(1);
        tracing::debug!(
            reservation = %previous_id,
            professional = %professional_id,
            "back-to-back predecessor auto-completed"
        );
        Ok(Some(previous_id))
    }

    /// Force-expire every open reservation whose response deadline has
    /// passed. One lock scope and one WAL request per professional with
    /// matches; partitions with nothing overdue are not written at all.
    /// Confirmed reservations are never touched.
    pub async fn sweep_expired(&self, now: Ms) -> Result<usize, EngineError> {
        let professionals: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut total = 0;

        for pid in professionals {
            let Some(shared) = self.professional(&pid) else {
                continue;
            };
            // Cheap read-only probe before taking the write lock.
            {
                let guard = shared.read().await;
                if !guard
                    .reservations
                    .iter()
                    .any(|r| r.status.is_open() && r.expires_at <= now)
                {
                    continue;
                }
            }

            let mut guard = shared.write_owned().await;
            let events: Vec<Event> = guard
                .reservations
                .iter()
                .filter(|r| r.status.is_open() && r.expires_at <= now)
                .map(|r| Event::ReservationExpired {
                    id: r.id,
                    professional_id: pid,
                    at: now,
                })
                .collect();
            if events.is_empty() {
                continue; // lost a race with a concurrent transition
            }
            let count = events.len();
            self.persist_and_apply(&mut guard, events).await?;
            total += count;
        }

        if total > 0 {
            metrics::counter!(observability::EXPIRATIONS_TOTAL).increment(total as u64);
        }
        Ok(total)
    }
}

fn expect_status(
    r: &Reservation,
    expected: ReservationStatus,
    label: &'static str,
) -> Result<(), EngineError> {
    if r.status != expected {
        return Err(EngineError::StatusConflict {
            expected: label,
            actual: r.status,
        });
    }
    Ok(())
}
