use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::slots::{compute_slots, local_instant, slot_label};
use super::{Engine, EngineError};

/// What the identity/KYC collaborator knows about a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub city_id: Option<Ulid>,
    pub address_line: String,
}

/// Identity and KYC lookups, answered by the surrounding application.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn is_client(&self, user_id: Ulid) -> bool;
    async fn is_approved_professional(&self, professional_id: Ulid) -> bool;
    async fn client_profile(&self, user_id: Ulid) -> Option<ClientProfile>;
}

/// Catalog lookups (categories live outside this core).
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn category_exists(&self, category_id: Ulid) -> bool;
}

/// A client's request for a slot, in local calendar components.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub client_id: Ulid,
    pub professional_id: Ulid,
    pub category_id: Ulid,
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
}

impl Engine {
    /// Validate a booking request and insert the Pending reservation.
    ///
    /// Preconditions run in order, each with its own reason code. The
    /// slot re-check narrows the browse→submit race window; the true
    /// correctness boundary is the confirm protocol, so two concurrent
    /// creations of the same slot are allowed to coexist as Pending.
    pub async fn create_reservation(
        &self,
        req: &BookingRequest,
        directory: &dyn Directory,
        catalog: &dyn Catalog,
        now: Ms,
    ) -> Result<Ulid, EngineError> {
        if !directory.is_client(req.client_id).await {
            return Err(EngineError::NotAClient(req.client_id));
        }
        let profile = directory
            .client_profile(req.client_id)
            .await
            .ok_or(EngineError::ClientNotFound(req.client_id))?;
        let Some(client_city) = profile.city_id else {
            return Err(EngineError::MissingCity);
        };
        if profile.address_line.trim().is_empty() {
            return Err(EngineError::MissingAddress);
        }
        if !catalog.category_exists(req.category_id).await {
            return Err(EngineError::CategoryNotFound(req.category_id));
        }
        let shared = self
            .professional(&req.professional_id)
            .ok_or(EngineError::ProfessionalNotFound(req.professional_id))?;
        if !directory.is_approved_professional(req.professional_id).await {
            return Err(EngineError::KycNotApproved(req.professional_id));
        }

        let label = slot_label(req.hour * 60 + req.minute);
        let time_slot = local_instant(req.date, req.hour, req.minute)
            .ok_or_else(|| EngineError::SlotUnavailable(label.clone()))?;

        // Everything from the city check on runs under the write lock so
        // the slot re-validation sees the same snapshot the insert joins.
        let mut guard = shared.write_owned().await;
        if guard.city_id != client_city {
            return Err(EngineError::CityMismatch);
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if !compute_slots(&guard, req.category_id, req.date, now).contains(&label) {
            return Err(EngineError::SlotUnavailable(label));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            professional_id: req.professional_id,
            client_id: req.client_id,
            category_id: req.category_id,
            city_id: client_city,
            time_slot,
            duration_hours: 1,
            expires_at: time_slot + PENDING_TTL_MS,
            status: ReservationStatus::Pending,
            is_modified_by_pro: false,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        let id = reservation.id;
        let event = Event::ReservationCreated { reservation, at: now };
        self.persist_and_apply(&mut guard, vec![event]).await?;

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            reservation = %id,
            professional = %req.professional_id,
            slot = %label,
            "reservation created"
        );
        Ok(id)
    }
}
