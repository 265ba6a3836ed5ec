use ulid::Ulid;

use crate::model::ReservationStatus;

/// Every rejected transition carries a stable machine-readable code
/// (`code()`) for the caller to branch on, plus a human message.
#[derive(Debug)]
pub enum EngineError {
    ProfessionalNotFound(Ulid),
    ReservationNotFound(Ulid),
    ClientNotFound(Ulid),
    CategoryNotFound(Ulid),
    AlreadyRegistered(Ulid),
    NotAClient(Ulid),
    MissingCity,
    MissingAddress,
    KycNotApproved(Ulid),
    CityMismatch,
    SlotUnavailable(String),
    NotOwner(Ulid),
    StatusConflict {
        expected: &'static str,
        actual: ReservationStatus,
    },
    /// Lost the winner-takes-all race to an already-confirmed reservation.
    SlotTaken(Ulid),
    ModificationUsed(Ulid),
    DurationOutOfRange(u8),
    ReasonRequired,
    NotStarted,
    RuleInvalid(&'static str),
    LimitExceeded(&'static str),
    Wal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ProfessionalNotFound(_) => "PROFESSIONAL_NOT_FOUND",
            EngineError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            EngineError::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            EngineError::CategoryNotFound(_) => "CATEGORY_NOT_FOUND",
            EngineError::AlreadyRegistered(_) => "ALREADY_REGISTERED",
            EngineError::NotAClient(_) => "NOT_A_CLIENT",
            EngineError::MissingCity => "MISSING_CITY",
            EngineError::MissingAddress => "MISSING_ADDRESS",
            EngineError::KycNotApproved(_) => "KYC_NOT_APPROVED",
            EngineError::CityMismatch => "CITY_MISMATCH",
            EngineError::SlotUnavailable(_) => "SLOT_UNAVAILABLE",
            EngineError::NotOwner(_) => "NOT_OWNER",
            EngineError::StatusConflict { .. } => "STATUS_CONFLICT",
            EngineError::SlotTaken(_) => "SLOT_TAKEN",
            EngineError::ModificationUsed(_) => "MODIFICATION_USED",
            EngineError::DurationOutOfRange(_) => "DURATION_OUT_OF_RANGE",
            EngineError::ReasonRequired => "REASON_REQUIRED",
            EngineError::NotStarted => "NOT_STARTED",
            EngineError::RuleInvalid(_) => "RULE_INVALID",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Wal(_) => "STORAGE_FAILURE",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ProfessionalNotFound(id) => write!(f, "professional not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ClientNotFound(id) => write!(f, "client record not found: {id}"),
            EngineError::CategoryNotFound(id) => write!(f, "category not found: {id}"),
            EngineError::AlreadyRegistered(id) => {
                write!(f, "professional already registered: {id}")
            }
            EngineError::NotAClient(id) => write!(f, "user {id} does not hold the client role"),
            EngineError::MissingCity => write!(f, "client has no city assigned"),
            EngineError::MissingAddress => write!(f, "client has no address line"),
            EngineError::KycNotApproved(id) => {
                write!(f, "professional {id} is not KYC-approved")
            }
            EngineError::CityMismatch => {
                write!(f, "client and professional are in different cities")
            }
            EngineError::SlotUnavailable(label) => {
                write!(f, "slot {label} is not currently bookable")
            }
            EngineError::NotOwner(id) => {
                write!(f, "user {id} is not a party to this reservation")
            }
            EngineError::StatusConflict { expected, actual } => {
                write!(
                    f,
                    "reservation is {}, expected {expected}",
                    actual.as_str()
                )
            }
            EngineError::SlotTaken(winner) => {
                write!(f, "interval already held by confirmed reservation {winner}")
            }
            EngineError::ModificationUsed(id) => {
                write!(f, "duration of reservation {id} was already modified once")
            }
            EngineError::DurationOutOfRange(h) => {
                write!(f, "duration of {h}h is outside 1..=8")
            }
            EngineError::ReasonRequired => {
                write!(f, "professional cancellations require a reason")
            }
            EngineError::NotStarted => {
                write!(f, "reservation cannot be completed before its slot time")
            }
            EngineError::RuleInvalid(msg) => write!(f, "invalid weekly rule: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_identifiers() {
        // UI layers branch on these; they are part of the contract.
        assert_eq!(EngineError::CityMismatch.code(), "CITY_MISMATCH");
        assert_eq!(EngineError::SlotTaken(Ulid::new()).code(), "SLOT_TAKEN");
        assert_eq!(
            EngineError::StatusConflict {
                expected: "PENDING",
                actual: ReservationStatus::Declined,
            }
            .code(),
            "STATUS_CONFLICT"
        );
        assert_eq!(EngineError::Wal("disk full".into()).code(), "STORAGE_FAILURE");
    }

    #[test]
    fn display_names_the_actual_status() {
        let e = EngineError::StatusConflict {
            expected: "PENDING",
            actual: ReservationStatus::Declined,
        };
        assert!(e.to_string().contains("DECLINED"));
    }
}
