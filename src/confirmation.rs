//! Contracted-vehicle confirmation records and their sub-state machine
use crate::store::{Record, impl_record};
use crate::types::TimeStamp;
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum ConfirmationStatus {
    #[n(0)]
    Pending,
    // operator has relayed the terms to the vehicle owner
    #[n(1)]
    Confirmed,
    #[n(2)]
    Accepted,
    #[n(3)]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum ConfirmationAction {
    #[n(0)]
    RelayTerms,
    #[n(1)]
    OwnerAccepts,
    #[n(2)]
    OwnerRejects,
    /// Operator drops the request before the owner answered.
    #[n(3)]
    Reject,
    /// An accepted contracted vehicle is released from the booking.
    #[n(4)]
    Withdraw,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Accepted => "accepted",
            ConfirmationStatus::Rejected => "rejected",
        }
    }

    /// Anything but `rejected` occupies the booking's single confirmation slot.
    pub fn is_live(&self) -> bool {
        !matches!(self, ConfirmationStatus::Rejected)
    }

    /// Still waiting on the operator or the owner.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConfirmationStatus::Pending | ConfirmationStatus::Confirmed
        )
    }

    pub fn apply(self, action: ConfirmationAction) -> Option<ConfirmationStatus> {
        use ConfirmationAction as A;
        use ConfirmationStatus as S;

        match (self, action) {
            (S::Pending, A::RelayTerms) => Some(S::Confirmed),
            (S::Confirmed, A::OwnerAccepts) => Some(S::Accepted),
            (S::Confirmed, A::OwnerRejects) => Some(S::Rejected),
            (S::Pending | S::Confirmed, A::Reject) => Some(S::Rejected),
            (S::Accepted, A::Withdraw) => Some(S::Rejected),
            (
                S::Pending | S::Confirmed | S::Accepted | S::Rejected,
                A::RelayTerms | A::OwnerAccepts | A::OwnerRejects | A::Reject | A::Withdraw,
            ) => None,
        }
    }
}

impl ConfirmationAction {
    pub fn target(&self) -> ConfirmationStatus {
        match self {
            ConfirmationAction::RelayTerms => ConfirmationStatus::Confirmed,
            ConfirmationAction::OwnerAccepts => ConfirmationStatus::Accepted,
            ConfirmationAction::OwnerRejects
            | ConfirmationAction::Reject
            | ConfirmationAction::Withdraw => ConfirmationStatus::Rejected,
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ConfirmationChange {
    #[n(0)]
    pub from: ConfirmationStatus,
    #[n(1)]
    pub to: ConfirmationStatus,
    #[n(2)]
    pub actor: String,
    #[n(3)]
    pub at: TimeStamp<Utc>,
    #[n(4)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BookingConfirmation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub contracted_vehicle_id: String,
    #[n(3)]
    status: ConfirmationStatus,
    #[n(4)]
    pub price_offer: u64,
    #[n(5)]
    pub note: Option<String>,
    #[n(6)]
    history: Vec<ConfirmationChange>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
    #[n(9)]
    version: u64,
}

impl BookingConfirmation {
    pub(crate) fn new(
        id: String,
        booking_id: &str,
        contracted_vehicle_id: &str,
        price_offer: u64,
        note: Option<String>,
        at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            booking_id: booking_id.to_string(),
            contracted_vehicle_id: contracted_vehicle_id.to_string(),
            status: ConfirmationStatus::Pending,
            price_offer,
            note,
            history: vec![],
            created_at: at,
            updated_at: at,
            version: 0,
        }
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status
    }

    pub fn history(&self) -> &[ConfirmationChange] {
        &self.history
    }

    pub(crate) fn transition(
        &mut self,
        action: ConfirmationAction,
        actor: &str,
        at: TimeStamp<Utc>,
        note: Option<String>,
    ) -> Result<ConfirmationChange, crate::error::WorkflowError> {
        let from = self.status;
        let Some(to) = from.apply(action) else {
            return Err(crate::error::WorkflowError::InvalidTransition {
                entity: Self::PREFIX,
                id: self.id.clone(),
                from: from.to_string(),
                to: action.target().to_string(),
                reason: "not allowed from the current confirmation state".into(),
            });
        };

        self.status = to;
        self.updated_at = at;
        let change = ConfirmationChange {
            from,
            to,
            actor: actor.to_string(),
            at,
            note,
        };
        self.history.push(change.clone());
        Ok(change)
    }
}

impl_record!(BookingConfirmation, "confirmation");
