use crate::confirmation::ConfirmationStatus;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ItineraryError {
    #[error("An itinerary needs a pickup and a drop-off, got {0} point(s)")]
    TooFewPoints(usize),
    #[error("Route point {index} has an empty location")]
    EmptyLocation { index: usize },
    #[error("Route point {index} is scheduled before the point preceding it")]
    OutOfOrder { index: usize },
    #[error("Expected {expected} leg estimate(s) for the itinerary, got {got}")]
    LegCountMismatch { expected: usize, got: usize },
    #[error("The leg {0} total does not fit the itinerary")]
    TotalsOverflow(&'static str),
}

/// Flat discriminant of [`WorkflowError`] for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidItinerary,
    InvalidTransition,
    ResourceUnavailable,
    ConfirmationConflict,
    Conflict,
    NotFound,
    Invalid,
    IncidentCheck,
    Storage,
    Encoding,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid itinerary: {0}")]
    InvalidItinerary(#[from] ItineraryError),
    #[error("{entity} {id} cannot move from {from} to {to}: {reason}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
        reason: String,
    },
    #[error("{resource} {id} is unavailable: {reason}")]
    ResourceUnavailable {
        resource: &'static str,
        id: String,
        reason: String,
    },
    #[error("Booking {booking_id} already has live confirmation {confirmation_id} ({status})")]
    ConfirmationConflict {
        booking_id: String,
        confirmation_id: String,
        status: ConfirmationStatus,
    },
    #[error("{entity} {id} changed since it was read, operation abandoned")]
    Conflict { entity: &'static str, id: String },
    #[error("No {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Incident check failed: {0}")]
    IncidentCheck(String),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error("Failed to encode or decode a record: {0}")]
    Encoding(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidItinerary(_) => ErrorKind::InvalidItinerary,
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WorkflowError::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            WorkflowError::ConfirmationConflict { .. } => ErrorKind::ConfirmationConflict,
            WorkflowError::Conflict { .. } => ErrorKind::Conflict,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::Invalid { .. } => ErrorKind::Invalid,
            WorkflowError::IncidentCheck(_) => ErrorKind::IncidentCheck,
            WorkflowError::Storage(_) => ErrorKind::Storage,
            WorkflowError::Encoding(_) => ErrorKind::Encoding,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        WorkflowError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(
        resource: &'static str,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        WorkflowError::ResourceUnavailable {
            resource,
            id: id.into(),
            reason: reason.into(),
        }
    }
}
