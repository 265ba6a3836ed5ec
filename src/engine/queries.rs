use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::slots::compute_slots;
use super::Engine;

impl Engine {
    /// Bookable "HH:MM" labels for one professional, category, and date.
    /// Unknown professionals resolve to no slots, not an error — the
    /// browse path never distinguishes "nobody there" from "fully booked".
    pub async fn available_slots(
        &self,
        professional_id: Ulid,
        category_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Vec<String> {
        metrics::counter!(observability::SLOT_QUERIES_TOTAL).increment(1);
        let Some(shared) = self.professional(&professional_id) else {
            return Vec::new();
        };
        let guard = shared.read().await;
        compute_slots(&guard, category_id, date, now)
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Option<Reservation> {
        let professional_id = self.professional_of(&reservation_id)?;
        let shared = self.professional(&professional_id)?;
        let guard = shared.read().await;
        guard.reservation(&reservation_id).cloned()
    }

    pub async fn reservations_for_professional(
        &self,
        professional_id: Ulid,
    ) -> Vec<Reservation> {
        let Some(shared) = self.professional(&professional_id) else {
            return Vec::new();
        };
        let guard = shared.read().await;
        guard.reservations.clone()
    }

    /// Scan of every partition — dashboards only, not a hot path.
    pub async fn reservations_for_client(&self, client_id: Ulid) -> Vec<Reservation> {
        let partitions: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for shared in partitions {
            let guard = shared.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.client_id == client_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.time_slot);
        out
    }

    /// The append-only transition history of one reservation.
    pub async fn audit_trail(&self, reservation_id: Ulid) -> Vec<AuditRecord> {
        let Some(professional_id) = self.professional_of(&reservation_id) else {
            return Vec::new();
        };
        let Some(shared) = self.professional(&professional_id) else {
            return Vec::new();
        };
        let guard = shared.read().await;
        guard
            .audit
            .iter()
            .filter(|a| a.reservation_id == reservation_id)
            .cloned()
            .collect()
    }
}
