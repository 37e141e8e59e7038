//! Service layer API for booking workflow operations
//!
//! Operations are grouped by concern: booking lifecycle, resource allocation,
//! contracted-vehicle confirmation and billing. Each one validates against a
//! snapshot of the records it touches and then commits through
//! [`EntityStore::commit`], re-checking those records before anything is written.
mod allocation;
mod billing;
mod ctv;
mod lifecycle;

pub use allocation::{AllocateRequest, Allocation, Candidate};
pub use billing::{AdjustmentRequest, InvoiceTerms, PaymentRequest};
pub use ctv::{ConfirmationCommand, OwnerReply};
pub use lifecycle::{BookingCommand, CompleteTrip, StartTrip};

use crate::booking::Booking;
use crate::clock::{Clock, SystemClock};
use crate::config::WorkflowConfig;
use crate::confirmation::BookingConfirmation;
use crate::error::WorkflowError;
use crate::fleet::{
    ContractedVehicle, CtvStatus, Driver, DriverStatus, NewContractedVehicle, NewDriver,
    NewVehicle, Vehicle, VehicleAssignment, VehicleStatus,
};
use crate::incident::{IncidentGate, NoIncidents};
use crate::invoice::{Contract, Invoice};
use crate::store::{EntityStore, abort};
use crate::types::TimeStamp;
use crate::utils::new_record_id;
use chrono::Utc;
use std::sync::Arc;

pub(crate) const BOOKING_NUMBER_INDEX: &str = "booking_no";
pub(crate) const PLATE_INDEX: &str = "plate";
pub(crate) const CTV_PLATE_INDEX: &str = "ctv_plate";
pub(crate) const INVOICE_NUMBER_INDEX: &str = "invoice_no";
pub(crate) const CONTRACT_NUMBER_INDEX: &str = "contract_no";

pub struct BookingService {
    store: EntityStore,
    config: WorkflowConfig,
    clock: Arc<dyn Clock>,
    incidents: Arc<dyn IncidentGate>,
}

impl BookingService {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self {
            store: EntityStore::new(instance),
            config: WorkflowConfig::default(),
            clock: Arc::new(SystemClock),
            incidents: Arc::new(NoIncidents),
        }
    }

    /// Open (or create) the database at `config.db_path`.
    pub fn open(config: WorkflowConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let db = sled::open(&config.db_path)?;
        Ok(Self::new(Arc::new(db)).with_config(config))
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_incident_gate(mut self, incidents: Arc<dyn IncidentGate>) -> Self {
        self.incidents = incidents;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub(crate) fn now(&self) -> TimeStamp<Utc> {
        self.clock.now()
    }

    pub fn booking(&self, booking_id: &str) -> Result<Booking, WorkflowError> {
        self.store.get(booking_id)
    }

    pub fn booking_by_number(&self, booking_number: &str) -> Result<Booking, WorkflowError> {
        match self
            .store
            .lookup(BOOKING_NUMBER_INDEX, booking_number.trim())?
        {
            Some(id) => self.store.get(&id),
            None => Err(WorkflowError::NotFound {
                entity: "booking number",
                id: booking_number.to_string(),
            }),
        }
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Result<Vehicle, WorkflowError> {
        self.store.get(vehicle_id)
    }

    pub fn driver(&self, driver_id: &str) -> Result<Driver, WorkflowError> {
        self.store.get(driver_id)
    }

    pub fn contracted_vehicle(&self, ctv_id: &str) -> Result<ContractedVehicle, WorkflowError> {
        self.store.get(ctv_id)
    }

    pub fn assignment(&self, assignment_id: &str) -> Result<VehicleAssignment, WorkflowError> {
        self.store.get(assignment_id)
    }

    pub fn assignments_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<VehicleAssignment>, WorkflowError> {
        Ok(self
            .store
            .scan::<VehicleAssignment>()?
            .into_iter()
            .filter(|assignment| assignment.booking_id == booking_id)
            .collect())
    }

    pub fn confirmation(
        &self,
        confirmation_id: &str,
    ) -> Result<BookingConfirmation, WorkflowError> {
        self.store.get(confirmation_id)
    }

    pub fn confirmations_for_booking(
        &self,
        booking_id: &str,
    ) -> Result<Vec<BookingConfirmation>, WorkflowError> {
        Ok(self
            .store
            .scan::<BookingConfirmation>()?
            .into_iter()
            .filter(|confirmation| confirmation.booking_id == booking_id)
            .collect())
    }

    pub fn contract(&self, contract_id: &str) -> Result<Contract, WorkflowError> {
        self.store.get(contract_id)
    }

    pub fn invoice(&self, invoice_id: &str) -> Result<Invoice, WorkflowError> {
        self.store.get(invoice_id)
    }

    pub fn register_vehicle(&self, request: NewVehicle) -> Result<Vehicle, WorkflowError> {
        let vehicle = request.into_vehicle(new_record_id("vehicle")?)?;

        let vehicle = self
            .store
            .commit(|txn| {
                if let Some(holder) = txn.claim(PLATE_INDEX, &vehicle.license_plate, &vehicle.id)? {
                    return abort(WorkflowError::invalid(
                        "license plate",
                        format!("{} is already registered to {holder}", vehicle.license_plate),
                    ));
                }
                txn.create(&vehicle)
            })
            .inspect_err(|e| log_rejected("register_vehicle", e))?;

        tracing::info!(vehicle_id = %vehicle.id, plate = %vehicle.license_plate, "vehicle registered");
        Ok(vehicle)
    }

    pub fn register_driver(&self, request: NewDriver) -> Result<Driver, WorkflowError> {
        let driver = request.into_driver(new_record_id("driver")?)?;
        let driver = self.store.commit(|txn| txn.create(&driver))?;

        tracing::info!(driver_id = %driver.id, "driver registered");
        Ok(driver)
    }

    pub fn register_contracted_vehicle(
        &self,
        request: NewContractedVehicle,
    ) -> Result<ContractedVehicle, WorkflowError> {
        let ctv = request.into_contracted(new_record_id("ctv")?)?;

        let ctv = self
            .store
            .commit(|txn| {
                if let Some(holder) = txn.claim(CTV_PLATE_INDEX, &ctv.license_plate, &ctv.id)? {
                    return abort(WorkflowError::invalid(
                        "license plate",
                        format!("{} is already registered to {holder}", ctv.license_plate),
                    ));
                }
                txn.create(&ctv)
            })
            .inspect_err(|e| log_rejected("register_contracted_vehicle", e))?;

        tracing::info!(ctv_id = %ctv.id, plate = %ctv.license_plate, "contracted vehicle registered");
        Ok(ctv)
    }

    /// Administrative status change. `in_use` belongs to the allocator and cannot be
    /// set here, and a vehicle held by an assignment cannot be taken out of service.
    pub fn set_vehicle_status(
        &self,
        vehicle_id: &str,
        status: VehicleStatus,
    ) -> Result<Vehicle, WorkflowError> {
        if status == VehicleStatus::InUse {
            return Err(WorkflowError::invalid(
                "vehicle status",
                "in_use is only set by allocation",
            ));
        }
        let snapshot = self.vehicle(vehicle_id)?;

        self.store
            .commit(|txn| {
                let mut vehicle = txn.recheck(&snapshot)?;
                if let Some(assignment) = &vehicle.active_assignment {
                    return abort(WorkflowError::unavailable(
                        "vehicle",
                        &vehicle.id,
                        format!("held by assignment {assignment}"),
                    ));
                }
                vehicle.status = status;
                txn.save(&vehicle)
            })
            .inspect_err(|e| log_rejected("set_vehicle_status", e))
    }

    pub fn set_driver_status(
        &self,
        driver_id: &str,
        status: DriverStatus,
    ) -> Result<Driver, WorkflowError> {
        if status == DriverStatus::OnTrip {
            return Err(WorkflowError::invalid(
                "driver status",
                "on_trip is only set by allocation",
            ));
        }
        let snapshot = self.driver(driver_id)?;

        self.store
            .commit(|txn| {
                let mut driver = txn.recheck(&snapshot)?;
                if let Some(assignment) = &driver.active_assignment {
                    return abort(WorkflowError::unavailable(
                        "driver",
                        &driver.id,
                        format!("held by assignment {assignment}"),
                    ));
                }
                driver.status = status;
                txn.save(&driver)
            })
            .inspect_err(|e| log_rejected("set_driver_status", e))
    }

    pub fn set_contracted_vehicle_status(
        &self,
        ctv_id: &str,
        status: CtvStatus,
    ) -> Result<ContractedVehicle, WorkflowError> {
        if status == CtvStatus::Busy {
            return Err(WorkflowError::invalid(
                "contracted vehicle status",
                "busy is only set by an accepted confirmation",
            ));
        }
        let snapshot = self.contracted_vehicle(ctv_id)?;

        self.store
            .commit(|txn| {
                let mut ctv = txn.recheck(&snapshot)?;
                if ctv.status == CtvStatus::Busy {
                    return abort(WorkflowError::unavailable(
                        "ctv",
                        &ctv.id,
                        "engaged on an accepted booking",
                    ));
                }
                ctv.status = status;
                txn.save(&ctv)
            })
            .inspect_err(|e| log_rejected("set_contracted_vehicle_status", e))
    }

    /// Record the odometer reading of an idle vehicle. Mileage never decreases.
    pub fn record_mileage(&self, vehicle_id: &str, mileage: u64) -> Result<Vehicle, WorkflowError> {
        let snapshot = self.vehicle(vehicle_id)?;
        if mileage < snapshot.current_mileage {
            return Err(WorkflowError::invalid(
                "mileage",
                format!("{mileage} is below the recorded {}", snapshot.current_mileage),
            ));
        }

        self.store
            .commit(|txn| {
                let mut vehicle = txn.recheck(&snapshot)?;
                if let Some(assignment) = &vehicle.active_assignment {
                    return abort(WorkflowError::unavailable(
                        "vehicle",
                        &vehicle.id,
                        format!("mileage is closed by assignment {assignment}"),
                    ));
                }
                vehicle.current_mileage = mileage;
                txn.save(&vehicle)
            })
            .inspect_err(|e| log_rejected("record_mileage", e))
    }
}

pub(crate) fn log_rejected(operation: &'static str, err: &WorkflowError) {
    tracing::warn!(operation, kind = ?err.kind(), error = %err, "operation rejected");
}
