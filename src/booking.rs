//! Booking record and its status state machine
use crate::error::WorkflowError;
use crate::route::{Leg, RoutePlan, RoutePoint};
use crate::store::{Record, impl_record};
use crate::types::TimeStamp;
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum BookingStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Assigned,
    #[n(3)]
    InProgress,
    #[n(4)]
    Completed,
    #[n(5)]
    Cancelled,
}

/// What a caller asks the booking to do. Each action has exactly one target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum BookingAction {
    #[n(0)]
    Confirm,
    #[n(1)]
    Assign,
    #[n(2)]
    Start,
    #[n(3)]
    Complete,
    /// Give back the held vehicle/driver or contracted vehicle for re-allocation.
    #[n(4)]
    Release,
    #[n(5)]
    Cancel,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Assigned,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Assigned => "assigned",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// The transition table. `None` means the action is illegal from this state.
    pub fn apply(self, action: BookingAction) -> Option<BookingStatus> {
        use BookingAction as A;
        use BookingStatus as S;

        match (self, action) {
            (S::Pending, A::Confirm) => Some(S::Confirmed),
            (S::Confirmed, A::Assign) => Some(S::Assigned),
            (S::Assigned, A::Start) => Some(S::InProgress),
            (S::InProgress, A::Complete) => Some(S::Completed),
            (S::Assigned, A::Release) => Some(S::Confirmed),
            (S::Pending | S::Confirmed | S::Assigned | S::InProgress, A::Cancel) => {
                Some(S::Cancelled)
            }
            (
                S::Pending | S::Confirmed | S::Assigned | S::InProgress | S::Completed
                | S::Cancelled,
                A::Confirm | A::Assign | A::Start | A::Complete | A::Release | A::Cancel,
            ) => None,
        }
    }
}

impl BookingAction {
    pub const ALL: [BookingAction; 6] = [
        BookingAction::Confirm,
        BookingAction::Assign,
        BookingAction::Start,
        BookingAction::Complete,
        BookingAction::Release,
        BookingAction::Cancel,
    ];

    pub fn target(&self) -> BookingStatus {
        match self {
            BookingAction::Confirm => BookingStatus::Confirmed,
            BookingAction::Assign => BookingStatus::Assigned,
            BookingAction::Start => BookingStatus::InProgress,
            BookingAction::Complete => BookingStatus::Completed,
            BookingAction::Release => BookingStatus::Confirmed,
            BookingAction::Cancel => BookingStatus::Cancelled,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkflowError::invalid("booking status", format!("unknown value {s:?}")))
    }
}

/// One entry of a booking's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StatusChange {
    #[n(0)]
    pub from: BookingStatus,
    #[n(1)]
    pub to: BookingStatus,
    #[n(2)]
    pub action: BookingAction,
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub at: TimeStamp<Utc>,
    #[n(5)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Booking {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub booking_number: String,
    #[n(2)]
    pub customer_id: Option<String>,
    #[n(3)]
    pub itinerary: Vec<RoutePoint>,
    #[n(4)]
    pub legs: Option<Vec<Leg>>,
    // set by the sequencer when the booking is confirmed
    #[n(5)]
    pub plan: Option<RoutePlan>,
    #[n(6)]
    pub passenger_count: u32,
    #[n(7)]
    pub contract_id: Option<String>,
    #[n(8)]
    status: BookingStatus,
    #[n(9)]
    pub base_price: Option<u64>,
    #[n(10)]
    pub total_price: Option<u64>,
    // manual entry used when the route has no leg estimates
    #[n(11)]
    pub estimated_duration_minutes: Option<u32>,
    #[n(12)]
    pub assignment_id: Option<String>,
    #[n(13)]
    pub live_confirmation_id: Option<String>,
    #[n(14)]
    pub invoice_id: Option<String>,
    #[n(15)]
    history: Vec<StatusChange>,
    #[n(16)]
    pub created_at: TimeStamp<Utc>,
    #[n(17)]
    pub updated_at: TimeStamp<Utc>,
    #[n(18)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    version: u64,
}

impl Booking {
    pub(crate) fn new(id: String, request: &CreateBooking, at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            booking_number: request.booking_number.trim().to_string(),
            customer_id: request.customer_id.clone(),
            itinerary: request.itinerary.clone(),
            legs: request.legs.clone(),
            plan: None,
            passenger_count: request.passenger_count,
            contract_id: request.contract_id.clone(),
            status: BookingStatus::Pending,
            base_price: request.base_price,
            total_price: request.total_price,
            estimated_duration_minutes: request.estimated_duration_minutes,
            assignment_id: None,
            live_confirmation_id: None,
            invoice_id: None,
            history: vec![],
            created_at: at,
            updated_at: at,
            completed_at: None,
            version: 0,
        }
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// The statuses this booking has been in, oldest first.
    pub fn status_path(&self) -> Vec<BookingStatus> {
        let mut path = vec![BookingStatus::Pending];
        path.extend(self.history.iter().map(|change| change.to));
        path
    }

    /// Apply `action` through the transition table and record it in the history.
    /// Guards specific to each action are checked by the caller beforehand.
    pub fn transition(
        &mut self,
        action: BookingAction,
        actor: &str,
        at: TimeStamp<Utc>,
        note: Option<String>,
    ) -> Result<StatusChange, WorkflowError> {
        let from = self.status;
        let Some(to) = from.apply(action) else {
            return Err(self.illegal(action, "not allowed from the current state"));
        };

        self.status = to;
        self.updated_at = at;
        if to == BookingStatus::Completed {
            self.completed_at = Some(at);
        }
        let change = StatusChange {
            from,
            to,
            action,
            actor: actor.to_string(),
            at,
            note,
        };
        self.history.push(change.clone());

        Ok(change)
    }

    /// `InvalidTransition` for `action` from the current state.
    pub fn illegal(&self, action: BookingAction, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::InvalidTransition {
            entity: Booking::PREFIX,
            id: self.id.clone(),
            from: self.status.to_string(),
            to: action.target().to_string(),
            reason: reason.into(),
        }
    }

    /// Fails with `InvalidTransition` unless `action` is legal right now.
    pub fn ensure_can(&self, action: BookingAction) -> Result<(), WorkflowError> {
        match self.status.apply(action) {
            Some(_) => Ok(()),
            None => Err(self.illegal(action, "not allowed from the current state")),
        }
    }

    pub fn has_resolved_customer(&self) -> bool {
        self.customer_id
            .as_deref()
            .is_some_and(|customer| !customer.trim().is_empty())
    }

    pub fn first_departure(&self) -> Option<TimeStamp<Utc>> {
        self.itinerary.first().map(|point| point.scheduled_at)
    }

    pub fn last_arrival(&self) -> Option<TimeStamp<Utc>> {
        self.itinerary.last().map(|point| point.scheduled_at)
    }

    /// Amount the customer is billed: total price, else base price.
    pub fn billable_amount(&self) -> Option<u64> {
        self.total_price.or(self.base_price)
    }
}

impl_record!(Booking, "booking");

/// Intake request for a new booking.
#[derive(Debug, Clone, Default)]
pub struct CreateBooking {
    pub booking_number: String,
    pub customer_id: Option<String>,
    pub itinerary: Vec<RoutePoint>,
    pub legs: Option<Vec<Leg>>,
    pub passenger_count: u32,
    pub contract_id: Option<String>,
    pub base_price: Option<u64>,
    pub total_price: Option<u64>,
    pub estimated_duration_minutes: Option<u32>,
    pub actor: String,
}

impl CreateBooking {
    pub fn new(booking_number: &str) -> Self {
        Self {
            booking_number: booking_number.to_string(),
            passenger_count: 1,
            ..Self::default()
        }
    }
    pub fn set_customer(mut self, customer_id: &str) -> Self {
        self.customer_id = Some(customer_id.to_string());
        self
    }
    pub fn add_stop(mut self, location: &str, at: TimeStamp<Utc>) -> Self {
        self.itinerary.push(RoutePoint::new(location, at));
        self
    }
    pub fn set_legs(mut self, legs: Vec<Leg>) -> Self {
        self.legs = Some(legs);
        self
    }
    pub fn set_passengers(mut self, count: u32) -> Self {
        self.passenger_count = count;
        self
    }
    pub fn set_contract(mut self, contract_id: &str) -> Self {
        self.contract_id = Some(contract_id.to_string());
        self
    }
    pub fn set_prices(mut self, base_price: u64, total_price: u64) -> Self {
        self.base_price = Some(base_price);
        self.total_price = Some(total_price);
        self
    }
    pub fn set_estimated_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = Some(minutes);
        self
    }
    pub fn set_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Required-field checks that do not involve the store.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.booking_number.trim().is_empty() {
            return Err(WorkflowError::invalid("booking number", "must not be empty"));
        }
        if self.passenger_count == 0 {
            return Err(WorkflowError::invalid(
                "passenger count",
                "at least one passenger is required",
            ));
        }
        check_prices(self.base_price, self.total_price)?;
        crate::route::sequence(&self.itinerary, self.legs.as_deref())?;
        Ok(())
    }
}

/// `total_price >= base_price` whenever both are set.
pub fn check_prices(base_price: Option<u64>, total_price: Option<u64>) -> Result<(), WorkflowError> {
    match (base_price, total_price) {
        (Some(base), Some(total)) if total < base => Err(WorkflowError::invalid(
            "total price",
            format!("{total} is below the base price {base}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> Booking {
        let t0 = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap();
        let request = CreateBooking::new("BK-0001")
            .set_customer("cust_1")
            .add_stop("Hanoi", t0)
            .add_stop("Haiphong", t0.plus_minutes(120));
        Booking::new("booking_test".into(), &request, t0)
    }

    #[test]
    fn happy_path_walks_the_graph() {
        let mut booking = booking();
        let at = TimeStamp::new();
        for action in [
            BookingAction::Confirm,
            BookingAction::Assign,
            BookingAction::Start,
            BookingAction::Complete,
        ] {
            booking.transition(action, "ops", at, None).unwrap();
        }

        assert_eq!(booking.status(), BookingStatus::Completed);
        assert_eq!(
            booking.status_path(),
            vec![
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                BookingStatus::Assigned,
                BookingStatus::InProgress,
                BookingStatus::Completed,
            ]
        );
        assert!(booking.completed_at.is_some());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut booking = booking();
        let err = booking
            .transition(BookingAction::Assign, "ops", TimeStamp::new(), None)
            .unwrap_err();

        match err {
            WorkflowError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "pending");
                assert_eq!(to, "assigned");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(booking.status(), BookingStatus::Pending);
        assert!(booking.history().is_empty());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for action in BookingAction::ALL {
            assert_eq!(BookingStatus::Completed.apply(action), None);
            assert_eq!(BookingStatus::Cancelled.apply(action), None);
        }
    }

    #[test]
    fn status_names_round_trip() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("in-progress".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn total_below_base_is_invalid() {
        assert!(check_prices(Some(100), Some(90)).is_err());
        assert!(check_prices(Some(100), Some(100)).is_ok());
        assert!(check_prices(None, Some(90)).is_ok());
    }
}
