//! Booking intake, confirmation, trip start and close, cancellation
use super::{BOOKING_NUMBER_INDEX, BookingService, log_rejected};
use crate::booking::{Booking, BookingAction, BookingStatus, CreateBooking, StatusChange};
use crate::error::WorkflowError;
use crate::invoice::{Contract, ContractStatus};
use crate::route::{self, Leg, RoutePoint};
use crate::store::{OrAbort, abort};
use crate::types::TimeStamp;
use crate::utils::new_record_id;
use chrono::Utc;

/// A command addressed to one booking, attributed to `actor`.
#[derive(Debug, Clone)]
pub struct BookingCommand {
    pub booking_id: String,
    pub actor: String,
    pub note: Option<String>,
}

impl BookingCommand {
    pub fn new(booking_id: &str, actor: &str) -> Self {
        Self {
            booking_id: booking_id.to_string(),
            actor: actor.to_string(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct StartTrip {
    pub booking_id: String,
    pub actor: String,
    /// Dispatcher override: start before the scheduled departure.
    pub manual: bool,
}

#[derive(Debug, Clone)]
pub struct CompleteTrip {
    pub booking_id: String,
    pub actor: String,
    pub end_time: Option<TimeStamp<Utc>>,
    pub end_mileage: Option<u64>,
}

impl BookingService {
    pub fn create_booking(&self, request: CreateBooking) -> Result<Booking, WorkflowError> {
        let mut request = request;
        request
            .validate()
            .inspect_err(|e| log_rejected("create_booking", e))?;

        let contract = match &request.contract_id {
            Some(contract_id) => Some(
                self.bookable_contract(contract_id, request.customer_id.as_deref())
                    .inspect_err(|e| log_rejected("create_booking", e))?,
            ),
            None => None,
        };
        // a contract booking bills the contract's customer
        if request.customer_id.is_none() {
            request.customer_id = contract.as_ref().map(|c| c.customer_id.clone());
        }

        let booking = Booking::new(new_record_id("booking")?, &request, self.now());

        let booking = self
            .store
            .commit(|txn| {
                if let Some(contract) = &contract {
                    txn.recheck(contract)?;
                }
                if let Some(holder) =
                    txn.claim(BOOKING_NUMBER_INDEX, &booking.booking_number, &booking.id)?
                {
                    return abort(WorkflowError::invalid(
                        "booking number",
                        format!("{} is already used by {holder}", booking.booking_number),
                    ));
                }
                txn.create(&booking)
            })
            .inspect_err(|e| log_rejected("create_booking", e))?;

        tracing::info!(
            booking_id = %booking.id,
            booking_number = %booking.booking_number,
            actor = %request.actor,
            "booking created"
        );
        Ok(booking)
    }

    fn bookable_contract(
        &self,
        contract_id: &str,
        customer_id: Option<&str>,
    ) -> Result<Contract, WorkflowError> {
        let contract: Contract = self.store.get(contract_id)?;
        if contract.status != ContractStatus::Active {
            return Err(WorkflowError::invalid(
                "contract",
                format!(
                    "{} is {}, bookings need an active contract",
                    contract.contract_number, contract.status
                ),
            ));
        }
        if customer_id.is_some_and(|customer_id| customer_id != contract.customer_id) {
            return Err(WorkflowError::invalid(
                "customer",
                format!(
                    "{} is not the customer of contract {}",
                    customer_id.unwrap_or_default(),
                    contract.contract_number
                ),
            ));
        }
        Ok(contract)
    }

    /// Attach the customer reference a pending booking was taken without.
    pub fn resolve_customer(
        &self,
        command: BookingCommand,
        customer_id: &str,
    ) -> Result<Booking, WorkflowError> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(WorkflowError::invalid("customer", "must not be empty"));
        }
        let snapshot = self.booking(&command.booking_id)?;
        Self::ensure_pending(&snapshot, "customer")
            .inspect_err(|e| log_rejected("resolve_customer", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                booking.customer_id = Some(customer_id.to_string());
                booking.updated_at = self.now();
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("resolve_customer", e))?;

        tracing::info!(booking_id = %booking.id, customer_id, actor = %command.actor, "customer resolved");
        Ok(booking)
    }

    /// Replace the itinerary of a pending booking. The new route must sequence.
    pub fn update_itinerary(
        &self,
        command: BookingCommand,
        itinerary: Vec<RoutePoint>,
        legs: Option<Vec<Leg>>,
    ) -> Result<Booking, WorkflowError> {
        route::sequence(&itinerary, legs.as_deref())
            .map_err(WorkflowError::from)
            .inspect_err(|e| log_rejected("update_itinerary", e))?;
        let snapshot = self.booking(&command.booking_id)?;
        Self::ensure_pending(&snapshot, "itinerary")
            .inspect_err(|e| log_rejected("update_itinerary", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                booking.itinerary = itinerary.clone();
                booking.legs = legs.clone();
                booking.updated_at = self.now();
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("update_itinerary", e))?;

        tracing::info!(booking_id = %booking.id, points = booking.itinerary.len(), "itinerary updated");
        Ok(booking)
    }

    fn ensure_pending(booking: &Booking, field: &'static str) -> Result<(), WorkflowError> {
        if booking.status() != BookingStatus::Pending {
            return Err(WorkflowError::invalid(
                field,
                format!(
                    "booking {} is {}, only pending bookings can change it",
                    booking.id,
                    booking.status()
                ),
            ));
        }
        Ok(())
    }

    /// `pending -> confirmed`. Sequences the itinerary and stores the resulting plan.
    pub fn confirm_booking(&self, command: BookingCommand) -> Result<Booking, WorkflowError> {
        let snapshot = self.booking(&command.booking_id)?;
        let plan = self
            .confirmable_plan(&snapshot)
            .inspect_err(|e| log_rejected("confirm_booking", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                booking.plan = Some(plan.clone());
                booking
                    .transition(
                        BookingAction::Confirm,
                        &command.actor,
                        self.now(),
                        command.note.clone(),
                    )
                    .or_abort()?;
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("confirm_booking", e))?;

        tracing::info!(booking_id = %booking.id, actor = %command.actor, "booking confirmed");
        Ok(booking)
    }

    fn confirmable_plan(&self, booking: &Booking) -> Result<route::RoutePlan, WorkflowError> {
        booking.ensure_can(BookingAction::Confirm)?;
        let plan = route::sequence(&booking.itinerary, booking.legs.as_deref())?;
        if !booking.has_resolved_customer() {
            return Err(booking.illegal(BookingAction::Confirm, "customer is not resolved"));
        }
        Ok(plan)
    }

    /// `assigned -> in_progress`, once the departure time has come or on manual start.
    pub fn start_trip(&self, command: StartTrip) -> Result<Booking, WorkflowError> {
        let snapshot = self.booking(&command.booking_id)?;
        let now = self.now();
        self.check_departure(&snapshot, &command, now)
            .inspect_err(|e| log_rejected("start_trip", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                let note = command.manual.then(|| "manual start".to_string());
                booking
                    .transition(BookingAction::Start, &command.actor, now, note)
                    .or_abort()?;
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("start_trip", e))?;

        tracing::info!(booking_id = %booking.id, manual = command.manual, "trip started");
        Ok(booking)
    }

    fn check_departure(
        &self,
        booking: &Booking,
        command: &StartTrip,
        now: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        booking.ensure_can(BookingAction::Start)?;
        if command.manual {
            return Ok(());
        }
        match booking.first_departure() {
            Some(departure) if now < departure => Err(booking.illegal(
                BookingAction::Start,
                format!("trip departs at {departure}, it is {now}"),
            )),
            Some(_) => Ok(()),
            None => Err(booking.illegal(BookingAction::Start, "itinerary is empty")),
        }
    }

    /// `in_progress -> completed`. Closes the owned assignment (or frees the
    /// contracted vehicle) in the same write as the status change.
    pub fn complete_trip(&self, command: CompleteTrip) -> Result<Booking, WorkflowError> {
        let snapshot = self.booking(&command.booking_id)?;
        let end_time = self
            .closable_end_time(&snapshot, &command)
            .inspect_err(|e| log_rejected("complete_trip", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                if let Some(assignment_id) = &booking.assignment_id {
                    Self::close_assignment(txn, assignment_id, end_time, command.end_mileage)?;
                }
                if let Some(confirmation_id) = &booking.live_confirmation_id {
                    Self::release_contracted_vehicle(txn, confirmation_id)?;
                }
                booking
                    .transition(BookingAction::Complete, &command.actor, self.now(), None)
                    .or_abort()?;
                booking.completed_at = Some(end_time);
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("complete_trip", e))?;

        tracing::info!(booking_id = %booking.id, end_time = %end_time, "trip completed");
        Ok(booking)
    }

    fn closable_end_time(
        &self,
        booking: &Booking,
        command: &CompleteTrip,
    ) -> Result<TimeStamp<Utc>, WorkflowError> {
        booking.ensure_can(BookingAction::Complete)?;

        let backfilled = match &booking.assignment_id {
            Some(assignment_id) => self.assignment(assignment_id)?.end_time,
            None => None,
        };
        let Some(end_time) = command.end_time.or(backfilled) else {
            return Err(booking.illegal(BookingAction::Complete, "trip has no end time"));
        };

        let blocked = self
            .incidents
            .has_blocking_incident(&booking.id)
            .map_err(|e| WorkflowError::IncidentCheck(format!("{e:#}")))?;
        if blocked {
            return Err(booking.illegal(
                BookingAction::Complete,
                "an unresolved blocking incident is open",
            ));
        }
        Ok(end_time)
    }

    /// Cancel from any non-terminal state, giving back whatever the booking holds.
    pub fn cancel_booking(&self, command: BookingCommand) -> Result<Booking, WorkflowError> {
        let snapshot = self.booking(&command.booking_id)?;
        snapshot
            .ensure_can(BookingAction::Cancel)
            .inspect_err(|e| log_rejected("cancel_booking", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let now = self.now();
                let mut booking = txn.recheck(&snapshot)?;
                if let Some(assignment_id) = &booking.assignment_id {
                    Self::void_assignment(txn, assignment_id, now)?;
                }
                if let Some(confirmation_id) = booking.live_confirmation_id.clone() {
                    let still_live =
                        Self::drop_confirmation(txn, &confirmation_id, &command.actor, now)?;
                    if !still_live {
                        booking.live_confirmation_id = None;
                    }
                }
                booking
                    .transition(
                        BookingAction::Cancel,
                        &command.actor,
                        now,
                        command.note.clone(),
                    )
                    .or_abort()?;
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("cancel_booking", e))?;

        tracing::info!(booking_id = %booking.id, actor = %command.actor, "booking cancelled");
        Ok(booking)
    }

    pub fn booking_history(&self, booking_id: &str) -> Result<Vec<StatusChange>, WorkflowError> {
        Ok(self.booking(booking_id)?.history().to_vec())
    }
}
