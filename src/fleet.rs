//! Owned fleet, contracted vehicles, assignments and per-resource schedules
use crate::error::WorkflowError;
use crate::store::impl_record;
use crate::types::{TimeStamp, TimeWindow};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum VehicleStatus {
    #[n(0)]
    Available,
    #[n(1)]
    InUse,
    #[n(2)]
    Maintenance,
    #[n(3)]
    Inactive,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::InUse => "in_use",
            VehicleStatus::Maintenance => "maintenance",
            VehicleStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum DriverStatus {
    #[n(0)]
    Available,
    #[n(1)]
    OnTrip,
    #[n(2)]
    OffDuty,
    #[n(3)]
    Leave,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::OnTrip => "on_trip",
            DriverStatus::OffDuty => "off_duty",
            DriverStatus::Leave => "leave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum CtvStatus {
    #[n(0)]
    Available,
    #[n(1)]
    Busy,
    #[n(2)]
    Inactive,
}

impl CtvStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CtvStatus::Available => "available",
            CtvStatus::Busy => "busy",
            CtvStatus::Inactive => "inactive",
        }
    }
}

/// Passenger driving license classes, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
pub enum LicenseClass {
    // up to 9 seats
    #[n(0)]
    B,
    #[n(1)]
    C,
    // 10 to 30 seats
    #[n(2)]
    D,
    // over 30 seats
    #[n(3)]
    E,
}

impl LicenseClass {
    /// Lowest class allowed to drive a passenger vehicle with `seats` seats.
    pub fn required_for_seats(seats: u32) -> LicenseClass {
        match seats {
            0..=9 => LicenseClass::B,
            10..=30 => LicenseClass::D,
            _ => LicenseClass::E,
        }
    }

    pub fn covers(&self, required: LicenseClass) -> bool {
        *self >= required
    }
}

macro_rules! impl_status_display {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })+
    };
}

impl_status_display!(VehicleStatus, DriverStatus, CtvStatus);

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Vehicle {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub license_plate: String,
    #[n(2)]
    pub seat_capacity: u32,
    #[n(3)]
    pub status: VehicleStatus,
    #[n(4)]
    pub current_mileage: u64,
    #[n(5)]
    pub active_assignment: Option<String>,
    #[n(6)]
    version: u64,
}

impl Vehicle {
    pub fn required_license(&self) -> LicenseClass {
        LicenseClass::required_for_seats(self.seat_capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Driver {
    #[n(0)]
    pub id: String,
    // identity held by the HR records
    #[n(1)]
    pub person_id: String,
    #[n(2)]
    pub full_name: String,
    #[n(3)]
    pub license_class: LicenseClass,
    #[n(4)]
    pub license_expiry: TimeStamp<Utc>,
    #[n(5)]
    pub status: DriverStatus,
    #[n(6)]
    pub active_assignment: Option<String>,
    #[n(7)]
    version: u64,
}

/// Externally owned vehicle engaged per trip. Never part of a [`VehicleAssignment`].
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ContractedVehicle {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub license_plate: String,
    #[n(2)]
    pub owner_name: String,
    #[n(3)]
    pub owner_phone: String,
    #[n(4)]
    pub capacity: u32,
    // 1..=5
    #[n(5)]
    pub rating: u8,
    #[n(6)]
    pub status: CtvStatus,
    #[n(7)]
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum AssignmentState {
    #[n(0)]
    Active,
    // trip finished, end time and mileage back-filled
    #[n(1)]
    Closed,
    // released or cancelled before the trip finished
    #[n(2)]
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct VehicleAssignment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub vehicle_id: String,
    #[n(3)]
    pub driver_id: String,
    #[n(4)]
    pub window: TimeWindow,
    #[n(5)]
    pub start_time: TimeStamp<Utc>,
    #[n(6)]
    pub end_time: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub start_mileage: u64,
    #[n(8)]
    pub end_mileage: Option<u64>,
    #[n(9)]
    pub state: AssignmentState,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    version: u64,
}

impl VehicleAssignment {
    pub(crate) fn new(
        id: String,
        booking_id: &str,
        vehicle: &Vehicle,
        driver: &Driver,
        window: TimeWindow,
        at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            booking_id: booking_id.to_string(),
            vehicle_id: vehicle.id.clone(),
            driver_id: driver.id.clone(),
            window,
            start_time: window.start,
            end_time: None,
            start_mileage: vehicle.current_mileage,
            end_mileage: None,
            state: AssignmentState::Active,
            created_at: at,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AssignmentState::Active
    }

    /// Void the assignment, keeping it as history.
    pub(crate) fn void(&mut self, at: TimeStamp<Utc>) {
        self.state = AssignmentState::Void;
        self.end_time = Some(at);
    }

    /// Back-fill the trip close. `end_mileage` may not run backwards.
    pub(crate) fn close(
        &mut self,
        end_time: TimeStamp<Utc>,
        end_mileage: Option<u64>,
    ) -> Result<(), WorkflowError> {
        if end_time < self.start_time {
            return Err(WorkflowError::invalid(
                "end time",
                format!("{end_time} is before the trip start {}", self.start_time),
            ));
        }
        match end_mileage {
            Some(mileage) if mileage < self.start_mileage => {
                return Err(WorkflowError::invalid(
                    "end mileage",
                    format!("{mileage} is below the start mileage {}", self.start_mileage),
                ));
            }
            _ => {}
        }
        self.end_time = Some(end_time);
        self.end_mileage = end_mileage;
        self.state = AssignmentState::Closed;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ResourceKind {
    #[n(0)]
    Vehicle,
    #[n(1)]
    Driver,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "vehicle",
            ResourceKind::Driver => "driver",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ScheduledWindow {
    #[n(0)]
    pub assignment_id: String,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub window: TimeWindow,
}

/// Active assignment windows of one vehicle or driver.
///
/// Allocation reads and rewrites this record inside the same transaction that
/// creates the assignment, which is what keeps two concurrent allocations from
/// both passing the overlap check.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Schedule {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub kind: ResourceKind,
    #[n(2)]
    pub entries: Vec<ScheduledWindow>,
    #[n(3)]
    version: u64,
}

impl Schedule {
    pub fn schedule_id(kind: ResourceKind, resource_id: &str) -> String {
        format!("{}/{}", kind.as_str(), resource_id)
    }

    pub fn empty(kind: ResourceKind, resource_id: &str) -> Self {
        Self {
            id: Self::schedule_id(kind, resource_id),
            kind,
            entries: vec![],
            version: 0,
        }
    }

    pub fn conflict_with(&self, window: &TimeWindow) -> Option<&ScheduledWindow> {
        self.entries.iter().find(|entry| entry.window.overlaps(window))
    }

    /// `ResourceUnavailable` naming the held window when `window` overlaps it.
    pub fn ensure_free(&self, window: &TimeWindow) -> Result<(), WorkflowError> {
        if let Some(existing) = self.conflict_with(window) {
            let resource_id = self
                .id
                .split_once('/')
                .map(|(_, id)| id)
                .unwrap_or(&self.id)
                .to_string();
            return Err(WorkflowError::unavailable(
                self.kind.as_str(),
                resource_id,
                format!(
                    "window {window} overlaps {} held for booking {}",
                    existing.window, existing.booking_id
                ),
            ));
        }
        Ok(())
    }

    /// Add a window, refusing any overlap with one already held.
    pub fn reserve(
        &mut self,
        assignment_id: &str,
        booking_id: &str,
        window: TimeWindow,
    ) -> Result<(), WorkflowError> {
        self.ensure_free(&window)?;
        self.entries.push(ScheduledWindow {
            assignment_id: assignment_id.to_string(),
            booking_id: booking_id.to_string(),
            window,
        });
        Ok(())
    }

    pub fn release(&mut self, assignment_id: &str) {
        self.entries
            .retain(|entry| entry.assignment_id != assignment_id);
    }
}

impl_record!(Vehicle, "vehicle");
impl_record!(Driver, "driver");
impl_record!(ContractedVehicle, "ctv");
impl_record!(VehicleAssignment, "assignment");
impl_record!(Schedule, "schedule");

#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub license_plate: String,
    pub seat_capacity: u32,
    pub current_mileage: u64,
}

impl NewVehicle {
    pub(crate) fn into_vehicle(self, id: String) -> Result<Vehicle, WorkflowError> {
        let license_plate = normalize_plate(&self.license_plate)?;
        if self.seat_capacity == 0 {
            return Err(WorkflowError::invalid("seat capacity", "must be at least one"));
        }
        Ok(Vehicle {
            id,
            license_plate,
            seat_capacity: self.seat_capacity,
            status: VehicleStatus::Available,
            current_mileage: self.current_mileage,
            active_assignment: None,
            version: 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDriver {
    pub person_id: String,
    pub full_name: String,
    pub license_class: LicenseClass,
    pub license_expiry: TimeStamp<Utc>,
}

impl NewDriver {
    pub(crate) fn into_driver(self, id: String) -> Result<Driver, WorkflowError> {
        if self.person_id.trim().is_empty() {
            return Err(WorkflowError::invalid("person id", "must not be empty"));
        }
        Ok(Driver {
            id,
            person_id: self.person_id.trim().to_string(),
            full_name: self.full_name.trim().to_string(),
            license_class: self.license_class,
            license_expiry: self.license_expiry,
            status: DriverStatus::Available,
            active_assignment: None,
            version: 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewContractedVehicle {
    pub license_plate: String,
    pub owner_name: String,
    pub owner_phone: String,
    pub capacity: u32,
    pub rating: u8,
}

impl NewContractedVehicle {
    pub(crate) fn into_contracted(self, id: String) -> Result<ContractedVehicle, WorkflowError> {
        let license_plate = normalize_plate(&self.license_plate)?;
        if self.capacity == 0 {
            return Err(WorkflowError::invalid("capacity", "must be at least one"));
        }
        if !(1..=5).contains(&self.rating) {
            return Err(WorkflowError::invalid(
                "rating",
                format!("{} is outside 1..=5", self.rating),
            ));
        }
        if self.owner_phone.trim().is_empty() {
            return Err(WorkflowError::invalid("owner phone", "must not be empty"));
        }
        Ok(ContractedVehicle {
            id,
            license_plate,
            owner_name: self.owner_name.trim().to_string(),
            owner_phone: self.owner_phone.trim().to_string(),
            capacity: self.capacity,
            rating: self.rating,
            status: CtvStatus::Available,
            version: 0,
        })
    }
}

/// Upper-case, whitespace-free plate used as the uniqueness key.
pub fn normalize_plate(plate: &str) -> Result<String, WorkflowError> {
    let plate: String = plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if plate.is_empty() {
        return Err(WorkflowError::invalid("license plate", "must not be empty"));
    }
    Ok(plate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(from_min: i64, to_min: i64) -> TimeWindow {
        let t0 = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap();
        TimeWindow::new(t0.plus_minutes(from_min), t0.plus_minutes(to_min))
    }

    #[test]
    fn schedule_refuses_overlap() {
        let mut schedule = Schedule::empty(ResourceKind::Vehicle, "vehicle_1");
        schedule.reserve("a1", "b1", window(0, 120)).unwrap();

        let err = schedule.reserve("a2", "b2", window(60, 180)).unwrap_err();
        match err {
            WorkflowError::ResourceUnavailable { resource, id, .. } => {
                assert_eq!(resource, "vehicle");
                assert_eq!(id, "vehicle_1");
            }
            other => panic!("unexpected error {other:?}"),
        }

        schedule.reserve("a3", "b3", window(120, 180)).unwrap();
        assert_eq!(schedule.entries.len(), 2);
    }

    #[test]
    fn free_check_leaves_the_schedule_alone() {
        let mut schedule = Schedule::empty(ResourceKind::Driver, "driver_1");
        schedule.reserve("a1", "b1", window(0, 120)).unwrap();

        assert!(schedule.ensure_free(&window(90, 150)).is_err());
        assert!(schedule.ensure_free(&window(120, 150)).is_ok());
        assert_eq!(schedule.entries.len(), 1);
    }

    #[test]
    fn released_window_frees_the_slot() {
        let mut schedule = Schedule::empty(ResourceKind::Driver, "driver_1");
        schedule.reserve("a1", "b1", window(0, 120)).unwrap();
        schedule.release("a1");
        schedule.reserve("a2", "b2", window(60, 180)).unwrap();
    }

    #[test]
    fn license_class_by_seats() {
        assert_eq!(LicenseClass::required_for_seats(7), LicenseClass::B);
        assert_eq!(LicenseClass::required_for_seats(16), LicenseClass::D);
        assert_eq!(LicenseClass::required_for_seats(45), LicenseClass::E);
        assert!(LicenseClass::E.covers(LicenseClass::D));
        assert!(!LicenseClass::C.covers(LicenseClass::D));
    }

    #[test]
    fn plates_are_normalized() {
        assert_eq!(normalize_plate(" 29a-123.45 ").unwrap(), "29A-123.45");
        assert!(normalize_plate("   ").is_err());
    }
}
