//! Resource allocation: owned vehicle plus driver, or a contracted vehicle
use super::{BookingService, log_rejected};
use crate::booking::{Booking, BookingAction};
use crate::confirmation::{BookingConfirmation, ConfirmationAction, ConfirmationStatus};
use crate::error::{ItineraryError, WorkflowError};
use crate::fleet::{
    ContractedVehicle, CtvStatus, Driver, DriverStatus, ResourceKind, Schedule, Vehicle,
    VehicleAssignment, VehicleStatus,
};
use crate::store::{OrAbort, Txn, TxnResult};
use crate::types::{TimeStamp, TimeWindow};
use crate::utils::new_record_id;
use chrono::Utc;

/// The resource the caller chose for a booking. The allocator never ranks candidates.
#[derive(Debug, Clone)]
pub enum Candidate {
    Owned {
        vehicle_id: String,
        driver_id: String,
    },
    Contracted {
        contracted_vehicle_id: String,
        price_offer: u64,
        note: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AllocateRequest {
    pub booking_id: String,
    pub candidate: Candidate,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub enum Allocation {
    /// Owned resources reserved, booking is `assigned`.
    Assigned {
        booking: Booking,
        assignment: VehicleAssignment,
    },
    /// Confirmation opened with the vehicle owner, booking stays `confirmed`.
    AwaitingConfirmation {
        booking: Booking,
        confirmation: BookingConfirmation,
    },
}

impl Allocation {
    pub fn booking(&self) -> &Booking {
        match self {
            Allocation::Assigned { booking, .. } | Allocation::AwaitingConfirmation { booking, .. } => {
                booking
            }
        }
    }
}

impl BookingService {
    /// Window the trip holds its resources for: from the first departure for the
    /// route's total duration (else the booking's estimate, else the configured
    /// fallback), and never ending before the last scheduled point.
    pub fn trip_window(&self, booking: &Booking) -> Result<TimeWindow, WorkflowError> {
        let (Some(start), Some(last)) = (booking.first_departure(), booking.last_arrival()) else {
            return Err(ItineraryError::TooFewPoints(booking.itinerary.len()).into());
        };
        let minutes = booking
            .plan
            .as_ref()
            .and_then(|plan| plan.total_duration_minutes)
            .or(booking.estimated_duration_minutes)
            .unwrap_or(self.config.fallback_trip_minutes);

        let end = start.plus_minutes(i64::from(minutes)).max(last);
        Ok(TimeWindow::new(start, end))
    }

    pub fn allocate(&self, request: AllocateRequest) -> Result<Allocation, WorkflowError> {
        let result = match &request.candidate {
            Candidate::Owned {
                vehicle_id,
                driver_id,
            } => self.allocate_owned(&request, vehicle_id, driver_id),
            Candidate::Contracted {
                contracted_vehicle_id,
                price_offer,
                note,
            } => self.allocate_contracted(&request, contracted_vehicle_id, *price_offer, note),
        };
        result.inspect_err(|e| log_rejected("allocate", e))
    }

    fn allocate_owned(
        &self,
        request: &AllocateRequest,
        vehicle_id: &str,
        driver_id: &str,
    ) -> Result<Allocation, WorkflowError> {
        let booking = self.booking(&request.booking_id)?;
        self.ensure_slot_free(&booking)?;
        let vehicle = self.vehicle(vehicle_id)?;
        let driver = self.driver(driver_id)?;
        let window = self.trip_window(&booking)?;
        for (kind, resource_id) in [
            (ResourceKind::Vehicle, &vehicle.id),
            (ResourceKind::Driver, &driver.id),
        ] {
            if let Some(schedule) =
                self.store.find::<Schedule>(&Schedule::schedule_id(kind, resource_id))?
            {
                schedule.ensure_free(&window)?;
            }
        }
        check_owned_candidate(&booking, &vehicle, &driver, &window)?;

        let assignment_id = new_record_id("assignment")?;

        let (booking, assignment) = self.store.commit(|txn| {
            let now = self.now();
            let mut booking = txn.recheck(&booking)?;
            let mut vehicle = txn.recheck(&vehicle)?;
            let mut driver = txn.recheck(&driver)?;

            for (kind, resource_id) in [
                (ResourceKind::Vehicle, &vehicle.id),
                (ResourceKind::Driver, &driver.id),
            ] {
                let mut schedule = load_schedule(txn, kind, resource_id)?;
                schedule
                    .reserve(&assignment_id, &booking.id, window)
                    .or_abort()?;
                txn.save(&schedule)?;
            }

            let assignment =
                VehicleAssignment::new(assignment_id.clone(), &booking.id, &vehicle, &driver, window, now);
            let assignment = txn.create(&assignment)?;

            vehicle.status = VehicleStatus::InUse;
            vehicle.active_assignment = Some(assignment.id.clone());
            txn.save(&vehicle)?;
            driver.status = DriverStatus::OnTrip;
            driver.active_assignment = Some(assignment.id.clone());
            txn.save(&driver)?;

            booking.assignment_id = Some(assignment.id.clone());
            booking
                .transition(BookingAction::Assign, &request.actor, now, None)
                .or_abort()?;
            let booking = txn.save(&booking)?;

            Ok((booking, assignment))
        })?;

        tracing::info!(
            booking_id = %booking.id,
            assignment_id = %assignment.id,
            vehicle_id,
            driver_id,
            window = %assignment.window,
            "owned vehicle assigned"
        );
        Ok(Allocation::Assigned {
            booking,
            assignment,
        })
    }

    fn allocate_contracted(
        &self,
        request: &AllocateRequest,
        ctv_id: &str,
        price_offer: u64,
        note: &Option<String>,
    ) -> Result<Allocation, WorkflowError> {
        let booking = self.booking(&request.booking_id)?;
        self.ensure_slot_free(&booking)?;
        let ctv = self.contracted_vehicle(ctv_id)?;
        check_contracted_candidate(&booking, &ctv)?;
        if price_offer == 0 {
            return Err(WorkflowError::invalid("price offer", "must be positive"));
        }

        let confirmation_id = new_record_id("confirmation")?;

        let (booking, confirmation) = self.store.commit(|txn| {
            let now = self.now();
            let mut booking = txn.recheck(&booking)?;
            // not written, but must still be the vehicle that passed the checks
            txn.recheck(&ctv)?;

            let confirmation = BookingConfirmation::new(
                confirmation_id.clone(),
                &booking.id,
                &ctv.id,
                price_offer,
                note.clone(),
                now,
            );
            let confirmation = txn.create(&confirmation)?;

            booking.live_confirmation_id = Some(confirmation.id.clone());
            booking.updated_at = now;
            let booking = txn.save(&booking)?;

            Ok((booking, confirmation))
        })?;

        tracing::info!(
            booking_id = %booking.id,
            confirmation_id = %confirmation.id,
            ctv_id,
            price_offer,
            "contracted vehicle requested"
        );
        Ok(Allocation::AwaitingConfirmation {
            booking,
            confirmation,
        })
    }

    /// The booking must be `confirmed` and hold no live confirmation.
    fn ensure_slot_free(&self, booking: &Booking) -> Result<(), WorkflowError> {
        booking.ensure_can(BookingAction::Assign)?;
        let Some(confirmation_id) = &booking.live_confirmation_id else {
            return Ok(());
        };
        let confirmation = self.confirmation(confirmation_id)?;
        if confirmation.status().is_live() {
            return Err(WorkflowError::ConfirmationConflict {
                booking_id: booking.id.clone(),
                confirmation_id: confirmation.id.clone(),
                status: confirmation.status(),
            });
        }
        Ok(())
    }

    /// `assigned -> confirmed`: give the held resources back so the booking can be
    /// allocated again.
    pub fn release_assignment(
        &self,
        command: super::BookingCommand,
    ) -> Result<Booking, WorkflowError> {
        let snapshot = self.booking(&command.booking_id)?;
        snapshot
            .ensure_can(BookingAction::Release)
            .inspect_err(|e| log_rejected("release_assignment", e))?;

        let booking = self
            .store
            .commit(|txn| {
                let now = self.now();
                let mut booking = txn.recheck(&snapshot)?;
                if let Some(assignment_id) = booking.assignment_id.take() {
                    Self::void_assignment(txn, &assignment_id, now)?;
                }
                if let Some(confirmation_id) = booking.live_confirmation_id.take() {
                    Self::withdraw_confirmation(txn, &confirmation_id, &command.actor, now)?;
                }
                booking
                    .transition(
                        BookingAction::Release,
                        &command.actor,
                        now,
                        command.note.clone(),
                    )
                    .or_abort()?;
                txn.save(&booking)
            })
            .inspect_err(|e| log_rejected("release_assignment", e))?;

        tracing::info!(booking_id = %booking.id, actor = %command.actor, "assignment released");
        Ok(booking)
    }

    /// Void an active assignment and free its vehicle, driver and schedule windows.
    pub(super) fn void_assignment(
        txn: &Txn<'_>,
        assignment_id: &str,
        at: TimeStamp<Utc>,
    ) -> TxnResult<()> {
        let mut assignment: VehicleAssignment = txn.load(assignment_id)?;
        if !assignment.is_active() {
            return Ok(());
        }
        assignment.void(at);
        txn.save(&assignment)?;
        free_resources(txn, &assignment, None)
    }

    /// Back-fill the trip close on an active assignment and free its resources.
    pub(super) fn close_assignment(
        txn: &Txn<'_>,
        assignment_id: &str,
        end_time: TimeStamp<Utc>,
        end_mileage: Option<u64>,
    ) -> TxnResult<()> {
        let mut assignment: VehicleAssignment = txn.load(assignment_id)?;
        assignment.close(end_time, end_mileage).or_abort()?;
        txn.save(&assignment)?;
        free_resources(txn, &assignment, end_mileage)
    }

    /// Accepted confirmation back to `rejected` and its vehicle back to `available`.
    fn withdraw_confirmation(
        txn: &Txn<'_>,
        confirmation_id: &str,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> TxnResult<()> {
        let mut confirmation: BookingConfirmation = txn.load(confirmation_id)?;
        let action = match confirmation.status() {
            ConfirmationStatus::Accepted => ConfirmationAction::Withdraw,
            ConfirmationStatus::Pending | ConfirmationStatus::Confirmed => {
                ConfirmationAction::Reject
            }
            ConfirmationStatus::Rejected => return Ok(()),
        };
        confirmation
            .transition(action, actor, at, Some("released from booking".into()))
            .or_abort()?;
        txn.save(&confirmation)?;
        if action == ConfirmationAction::Withdraw {
            free_contracted_vehicle(txn, &confirmation.contracted_vehicle_id)?;
        }
        Ok(())
    }
}

fn check_owned_candidate(
    booking: &Booking,
    vehicle: &Vehicle,
    driver: &Driver,
    window: &TimeWindow,
) -> Result<(), WorkflowError> {
    if vehicle.status != VehicleStatus::Available {
        return Err(WorkflowError::unavailable(
            "vehicle",
            &vehicle.id,
            format!("status is {}", vehicle.status),
        ));
    }
    if driver.status != DriverStatus::Available {
        return Err(WorkflowError::unavailable(
            "driver",
            &driver.id,
            format!("status is {}", driver.status),
        ));
    }
    if vehicle.seat_capacity < booking.passenger_count {
        return Err(WorkflowError::unavailable(
            "vehicle",
            &vehicle.id,
            format!(
                "{} seats for {} passengers",
                vehicle.seat_capacity, booking.passenger_count
            ),
        ));
    }
    let required = vehicle.required_license();
    if !driver.license_class.covers(required) {
        return Err(WorkflowError::unavailable(
            "driver",
            &driver.id,
            format!(
                "license class {:?} does not cover a {}-seat vehicle (needs {required:?})",
                driver.license_class, vehicle.seat_capacity
            ),
        ));
    }
    if driver.license_expiry < window.end {
        return Err(WorkflowError::unavailable(
            "driver",
            &driver.id,
            format!(
                "license expires {} before the trip ends {}",
                driver.license_expiry, window.end
            ),
        ));
    }
    Ok(())
}

fn check_contracted_candidate(
    booking: &Booking,
    ctv: &ContractedVehicle,
) -> Result<(), WorkflowError> {
    if ctv.status != CtvStatus::Available {
        return Err(WorkflowError::unavailable(
            "ctv",
            &ctv.id,
            format!("status is {}", ctv.status),
        ));
    }
    if ctv.capacity < booking.passenger_count {
        return Err(WorkflowError::unavailable(
            "ctv",
            &ctv.id,
            format!(
                "{} seats for {} passengers",
                ctv.capacity, booking.passenger_count
            ),
        ));
    }
    Ok(())
}

fn load_schedule(txn: &Txn<'_>, kind: ResourceKind, resource_id: &str) -> TxnResult<Schedule> {
    Ok(txn
        .find(&Schedule::schedule_id(kind, resource_id))?
        .unwrap_or_else(|| Schedule::empty(kind, resource_id)))
}

/// Drop the assignment's windows and hand the vehicle and driver back, if they are
/// still held by this assignment.
fn free_resources(
    txn: &Txn<'_>,
    assignment: &VehicleAssignment,
    end_mileage: Option<u64>,
) -> TxnResult<()> {
    for (kind, resource_id) in [
        (ResourceKind::Vehicle, &assignment.vehicle_id),
        (ResourceKind::Driver, &assignment.driver_id),
    ] {
        let mut schedule = load_schedule(txn, kind, resource_id)?;
        schedule.release(&assignment.id);
        txn.save(&schedule)?;
    }

    let mut vehicle: Vehicle = txn.load(&assignment.vehicle_id)?;
    if vehicle.active_assignment.as_deref() == Some(assignment.id.as_str()) {
        vehicle.active_assignment = None;
        vehicle.status = VehicleStatus::Available;
        if let Some(mileage) = end_mileage {
            vehicle.current_mileage = vehicle.current_mileage.max(mileage);
        }
        txn.save(&vehicle)?;
    }

    let mut driver: Driver = txn.load(&assignment.driver_id)?;
    if driver.active_assignment.as_deref() == Some(assignment.id.as_str()) {
        driver.active_assignment = None;
        driver.status = DriverStatus::Available;
        txn.save(&driver)?;
    }
    Ok(())
}

pub(super) fn free_contracted_vehicle(txn: &Txn<'_>, ctv_id: &str) -> TxnResult<()> {
    let mut ctv: ContractedVehicle = txn.load(ctv_id)?;
    if ctv.status == CtvStatus::Busy {
        ctv.status = CtvStatus::Available;
        txn.save(&ctv)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::CreateBooking;
    use crate::config::WorkflowConfig;
    use crate::route::Leg;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn service(fallback: u32) -> (tempfile::TempDir, BookingService) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("alloc.db")).unwrap();
        let config = WorkflowConfig {
            fallback_trip_minutes: fallback,
            ..WorkflowConfig::default()
        };
        (dir, BookingService::new(Arc::new(db)).with_config(config))
    }

    fn booking(request: CreateBooking) -> Booking {
        Booking::new("booking_w".into(), &request, TimeStamp::new())
    }

    #[test]
    fn window_falls_back_to_config() {
        let (_dir, service) = service(240);
        let t0 = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap();
        let booking = booking(
            CreateBooking::new("BK-W1")
                .add_stop("Hanoi", t0)
                .add_stop("Ninh Binh", t0.plus_minutes(90)),
        );

        let window = service.trip_window(&booking).unwrap();
        assert_eq!(window.start, t0);
        assert_eq!(window.end, t0.plus_minutes(240));
    }

    #[test]
    fn window_prefers_route_total_then_manual_estimate() {
        let (_dir, service) = service(240);
        let t0 = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap();
        let request = CreateBooking::new("BK-W2")
            .add_stop("Hanoi", t0)
            .add_stop("Haiphong", t0.plus_minutes(60))
            .set_estimated_duration(200);

        let mut with_plan = booking(request.clone().set_legs(vec![Leg::with_duration(120, 150)]));
        with_plan.plan = crate::route::sequence(&with_plan.itinerary, with_plan.legs.as_deref()).ok();
        assert_eq!(
            service.trip_window(&with_plan).unwrap().end,
            t0.plus_minutes(150)
        );

        let manual = booking(request);
        assert_eq!(service.trip_window(&manual).unwrap().end, t0.plus_minutes(200));
    }

    #[test]
    fn window_never_ends_before_last_point() {
        let (_dir, service) = service(30);
        let t0 = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap();
        let booking = booking(
            CreateBooking::new("BK-W3")
                .add_stop("Hanoi", t0)
                .add_stop("Lao Cai", t0.plus_minutes(330)),
        );

        assert_eq!(
            service.trip_window(&booking).unwrap().end,
            t0.plus_minutes(330)
        );
    }
}
