//! Contracted-vehicle confirmation: relaying terms to the owner and recording the reply
use super::allocation::free_contracted_vehicle;
use super::{BookingService, log_rejected};
use crate::booking::{Booking, BookingAction};
use crate::confirmation::{BookingConfirmation, ConfirmationAction, ConfirmationStatus};
use crate::error::WorkflowError;
use crate::fleet::{ContractedVehicle, CtvStatus};
use crate::store::{OrAbort, Txn, TxnResult, abort};
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerReply {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ConfirmationCommand {
    pub confirmation_id: String,
    pub actor: String,
    pub note: Option<String>,
}

impl ConfirmationCommand {
    pub fn new(confirmation_id: &str, actor: &str) -> Self {
        Self {
            confirmation_id: confirmation_id.to_string(),
            actor: actor.to_string(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

impl BookingService {
    /// `pending -> confirmed`: the operator has passed the offer to the owner.
    pub fn relay_terms(
        &self,
        command: ConfirmationCommand,
    ) -> Result<BookingConfirmation, WorkflowError> {
        let snapshot = self.confirmation(&command.confirmation_id)?;

        let confirmation = self
            .store
            .commit(|txn| {
                let mut confirmation = txn.recheck(&snapshot)?;
                confirmation
                    .transition(
                        ConfirmationAction::RelayTerms,
                        &command.actor,
                        self.now(),
                        command.note.clone(),
                    )
                    .or_abort()?;
                txn.save(&confirmation)
            })
            .inspect_err(|e| log_rejected("relay_terms", e))?;

        tracing::info!(confirmation_id = %confirmation.id, "terms relayed to owner");
        Ok(confirmation)
    }

    /// Record the owner's answer. Acceptance assigns the booking and engages the
    /// vehicle in the same write; a refusal frees the booking's confirmation slot.
    pub fn record_owner_reply(
        &self,
        command: ConfirmationCommand,
        reply: OwnerReply,
    ) -> Result<(BookingConfirmation, Booking), WorkflowError> {
        let result = match reply {
            OwnerReply::Accepted => self.accept_offer(&command),
            OwnerReply::Rejected => {
                self.close_offer(&command, ConfirmationAction::OwnerRejects)
            }
        };
        result.inspect_err(|e| log_rejected("record_owner_reply", e))
    }

    /// Operator drops a pending or relayed offer.
    pub fn reject_confirmation(
        &self,
        command: ConfirmationCommand,
    ) -> Result<(BookingConfirmation, Booking), WorkflowError> {
        self.close_offer(&command, ConfirmationAction::Reject)
            .inspect_err(|e| log_rejected("reject_confirmation", e))
    }

    fn accept_offer(
        &self,
        command: &ConfirmationCommand,
    ) -> Result<(BookingConfirmation, Booking), WorkflowError> {
        let confirmation = self.confirmation(&command.confirmation_id)?;
        let booking = self.booking(&confirmation.booking_id)?;
        booking.ensure_can(BookingAction::Assign)?;
        let ctv: ContractedVehicle = self.contracted_vehicle(&confirmation.contracted_vehicle_id)?;
        if ctv.status != CtvStatus::Available {
            return Err(WorkflowError::unavailable(
                "ctv",
                &ctv.id,
                format!("status is {}", ctv.status),
            ));
        }

        let (confirmation, booking) = self.store.commit(|txn| {
            let now = self.now();
            let mut confirmation = txn.recheck(&confirmation)?;
            let mut booking = txn.recheck(&booking)?;
            let mut ctv = txn.recheck(&ctv)?;

            confirmation
                .transition(
                    ConfirmationAction::OwnerAccepts,
                    &command.actor,
                    now,
                    command.note.clone(),
                )
                .or_abort()?;
            let confirmation = txn.save(&confirmation)?;

            ctv.status = CtvStatus::Busy;
            txn.save(&ctv)?;

            booking
                .transition(
                    BookingAction::Assign,
                    &command.actor,
                    now,
                    Some(format!("contracted vehicle {} accepted", ctv.license_plate)),
                )
                .or_abort()?;
            let booking = txn.save(&booking)?;

            Ok((confirmation, booking))
        })?;

        tracing::info!(
            booking_id = %booking.id,
            confirmation_id = %confirmation.id,
            ctv_id = %confirmation.contracted_vehicle_id,
            "booking assigned to contracted vehicle"
        );
        Ok((confirmation, booking))
    }

    fn close_offer(
        &self,
        command: &ConfirmationCommand,
        action: ConfirmationAction,
    ) -> Result<(BookingConfirmation, Booking), WorkflowError> {
        let confirmation = self.confirmation(&command.confirmation_id)?;
        let booking = self.booking(&confirmation.booking_id)?;

        let (confirmation, booking) = self.store.commit(|txn| {
            let now = self.now();
            let mut confirmation = txn.recheck(&confirmation)?;
            let mut booking = txn.recheck(&booking)?;

            confirmation
                .transition(action, &command.actor, now, command.note.clone())
                .or_abort()?;
            let confirmation = txn.save(&confirmation)?;

            if booking.live_confirmation_id.as_deref() == Some(confirmation.id.as_str()) {
                booking.live_confirmation_id = None;
                booking.updated_at = now;
            }
            let booking = txn.save(&booking)?;

            Ok((confirmation, booking))
        })?;

        let by_owner = action == ConfirmationAction::OwnerRejects;
        tracing::info!(
            booking_id = %booking.id,
            confirmation_id = %confirmation.id,
            by_owner,
            "contracted vehicle offer rejected"
        );
        Ok((confirmation, booking))
    }

    /// Cancellation side of a booking's confirmation. An open offer is rejected; an
    /// accepted one keeps its history and only the vehicle is freed. Returns whether
    /// the confirmation is still live afterwards.
    pub(super) fn drop_confirmation(
        txn: &Txn<'_>,
        confirmation_id: &str,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> TxnResult<bool> {
        let mut confirmation: BookingConfirmation = txn.load(confirmation_id)?;
        match confirmation.status() {
            ConfirmationStatus::Pending | ConfirmationStatus::Confirmed => {
                confirmation
                    .transition(
                        ConfirmationAction::Reject,
                        actor,
                        at,
                        Some("booking cancelled".into()),
                    )
                    .or_abort()?;
                txn.save(&confirmation)?;
                Ok(false)
            }
            ConfirmationStatus::Accepted => {
                free_contracted_vehicle(txn, &confirmation.contracted_vehicle_id)?;
                Ok(true)
            }
            ConfirmationStatus::Rejected => Ok(false),
        }
    }

    /// Trip closed on a contracted vehicle: the vehicle goes back to `available`.
    pub(super) fn release_contracted_vehicle(
        txn: &Txn<'_>,
        confirmation_id: &str,
    ) -> TxnResult<()> {
        let confirmation: BookingConfirmation = txn.load(confirmation_id)?;
        if confirmation.status() != ConfirmationStatus::Accepted {
            return abort(WorkflowError::invalid(
                "confirmation",
                format!(
                    "{} is {}, only an accepted vehicle can close a trip",
                    confirmation.id,
                    confirmation.status()
                ),
            ));
        }
        free_contracted_vehicle(txn, &confirmation.contracted_vehicle_id)
    }
}
