//! Contracts and the invoice linker
use super::{BookingService, CONTRACT_NUMBER_INDEX, INVOICE_NUMBER_INDEX, log_rejected};
use crate::booking::{Booking, BookingStatus};
use crate::error::WorkflowError;
use crate::invoice::{
    Contract, ContractAction, ContractStatus, Invoice, InvoiceLine, IssueInvoice, NewContract,
};
use crate::store::{OrAbort, abort};
use crate::types::TimeStamp;
use crate::utils::new_record_id;
use chrono::Utc;

/// Overrides for a new invoice. Unset fields fall back to the configured tax rate
/// and payment terms.
#[derive(Debug, Clone, Default)]
pub struct InvoiceTerms {
    pub tax_amount: Option<u64>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub actor: String,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub invoice_id: String,
    pub amount: u64,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub invoice_id: String,
    /// Negative for a credit.
    pub amount: i64,
    pub reason: String,
    pub actor: String,
}

impl BookingService {
    pub fn create_contract(&self, request: NewContract) -> Result<Contract, WorkflowError> {
        let contract = request.into_contract(new_record_id("contract")?)?;

        let contract = self
            .store
            .commit(|txn| {
                if let Some(holder) =
                    txn.claim(CONTRACT_NUMBER_INDEX, &contract.contract_number, &contract.id)?
                {
                    return abort(WorkflowError::invalid(
                        "contract number",
                        format!("{} is already used by {holder}", contract.contract_number),
                    ));
                }
                txn.create(&contract)
            })
            .inspect_err(|e| log_rejected("create_contract", e))?;

        tracing::info!(contract_id = %contract.id, number = %contract.contract_number, "contract drafted");
        Ok(contract)
    }

    pub fn activate_contract(&self, contract_id: &str) -> Result<Contract, WorkflowError> {
        self.move_contract(contract_id, ContractAction::Activate)
    }

    pub fn expire_contract(&self, contract_id: &str) -> Result<Contract, WorkflowError> {
        self.move_contract(contract_id, ContractAction::Expire)
    }

    pub fn terminate_contract(&self, contract_id: &str) -> Result<Contract, WorkflowError> {
        self.move_contract(contract_id, ContractAction::Terminate)
    }

    fn move_contract(
        &self,
        contract_id: &str,
        action: ContractAction,
    ) -> Result<Contract, WorkflowError> {
        let snapshot = self.contract(contract_id)?;

        let contract = self
            .store
            .commit(|txn| {
                let mut contract = txn.recheck(&snapshot)?;
                let Some(next) = contract.status.apply(action) else {
                    return abort(WorkflowError::InvalidTransition {
                        entity: "contract",
                        id: contract.id.clone(),
                        from: contract.status.to_string(),
                        to: action.target().to_string(),
                        reason: "not allowed from the current contract state".into(),
                    });
                };
                contract.status = next;
                txn.save(&contract)
            })
            .inspect_err(|e| log_rejected("move_contract", e))?;

        tracing::info!(contract_id = %contract.id, status = %contract.status, "contract status changed");
        Ok(contract)
    }

    /// One-line invoice for a completed booking that has not been invoiced yet.
    pub fn invoice_booking(
        &self,
        booking_id: &str,
        terms: InvoiceTerms,
    ) -> Result<Invoice, WorkflowError> {
        let snapshot = self.booking(booking_id)?;
        let line = invoice_line(&snapshot).inspect_err(|e| log_rejected("invoice_booking", e))?;

        let now = self.now();
        let draft = IssueInvoice {
            booking_id: Some(snapshot.id.clone()),
            contract_id: snapshot.contract_id.clone(),
            customer_id: snapshot.customer_id.clone(),
            due_date: Some(self.due_date(&terms, now)),
            ..IssueInvoice::new(format!("INV-{}", snapshot.booking_number), vec![line])
        };
        let invoice = self
            .draft_invoice(draft, &terms, now)
            .inspect_err(|e| log_rejected("invoice_booking", e))?;

        let invoice = self
            .store
            .commit(|txn| {
                let mut booking = txn.recheck(&snapshot)?;
                let invoice = issue(txn, &invoice)?;
                booking.invoice_id = Some(invoice.id.clone());
                booking.updated_at = now;
                txn.save(&booking)?;
                Ok(invoice)
            })
            .inspect_err(|e| log_rejected("invoice_booking", e))?;

        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            booking_id,
            total = invoice.total_amount(),
            actor = %terms.actor,
            "booking invoiced"
        );
        Ok(invoice)
    }

    /// One invoice covering every completed, not yet invoiced booking of a contract.
    pub fn invoice_contract(
        &self,
        contract_id: &str,
        terms: InvoiceTerms,
    ) -> Result<Invoice, WorkflowError> {
        let contract = self.contract(contract_id)?;
        if contract.status == ContractStatus::Draft {
            let err = WorkflowError::invalid(
                "contract",
                format!("{} is still a draft", contract.contract_number),
            );
            log_rejected("invoice_contract", &err);
            return Err(err);
        }

        let bookings: Vec<Booking> = self
            .store
            .scan::<Booking>()?
            .into_iter()
            .filter(|booking| {
                booking.contract_id.as_deref() == Some(contract.id.as_str())
                    && booking.status() == BookingStatus::Completed
                    && booking.invoice_id.is_none()
            })
            .collect();
        let lines = bookings
            .iter()
            .map(invoice_line)
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|e| log_rejected("invoice_contract", e))?;

        let sequence = self
            .store
            .scan::<Invoice>()?
            .iter()
            .filter(|invoice| invoice.contract_id.as_deref() == Some(contract.id.as_str()))
            .count()
            + 1;
        let now = self.now();
        let draft = IssueInvoice {
            contract_id: Some(contract.id.clone()),
            customer_id: Some(contract.customer_id.clone()),
            due_date: Some(self.due_date(&terms, now)),
            ..IssueInvoice::new(format!("INV-{}-{sequence:03}", contract.contract_number), lines)
        };
        let invoice = self
            .draft_invoice(draft, &terms, now)
            .inspect_err(|e| log_rejected("invoice_contract", e))?;

        let invoice = self
            .store
            .commit(|txn| {
                txn.recheck(&contract)?;
                let invoice = issue(txn, &invoice)?;
                for snapshot in &bookings {
                    let mut booking = txn.recheck(snapshot)?;
                    booking.invoice_id = Some(invoice.id.clone());
                    booking.updated_at = now;
                    txn.save(&booking)?;
                }
                Ok(invoice)
            })
            .inspect_err(|e| log_rejected("invoice_contract", e))?;

        tracing::info!(
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            contract_id,
            lines = invoice.lines().len(),
            total = invoice.total_amount(),
            actor = %terms.actor,
            "contract invoiced"
        );
        Ok(invoice)
    }

    /// Tax falls back to the configured rate on the draft's subtotal.
    fn draft_invoice(
        &self,
        mut draft: IssueInvoice,
        terms: &InvoiceTerms,
        now: TimeStamp<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        draft.tax_amount = match terms.tax_amount {
            Some(tax) => tax,
            None => self.config.tax_for(draft.subtotal()?),
        };
        Invoice::issue(new_record_id("invoice")?, draft, now)
    }

    fn due_date(&self, terms: &InvoiceTerms, now: TimeStamp<Utc>) -> TimeStamp<Utc> {
        terms
            .due_date
            .unwrap_or_else(|| now.plus_days(i64::from(self.config.payment_terms_days)))
    }

    pub fn record_payment(&self, request: PaymentRequest) -> Result<Invoice, WorkflowError> {
        let snapshot = self.invoice(&request.invoice_id)?;

        let invoice = self
            .store
            .commit(|txn| {
                let mut invoice = txn.recheck(&snapshot)?;
                invoice
                    .record_payment(request.amount, &request.reference, self.now())
                    .or_abort()?;
                txn.save(&invoice)
            })
            .inspect_err(|e| log_rejected("record_payment", e))?;

        tracing::info!(
            invoice_id = %invoice.id,
            amount = request.amount,
            paid = invoice.paid_amount(),
            status = %invoice.payment_status(),
            "payment recorded"
        );
        Ok(invoice)
    }

    pub fn adjust_invoice(&self, request: AdjustmentRequest) -> Result<Invoice, WorkflowError> {
        let snapshot = self.invoice(&request.invoice_id)?;

        let invoice = self
            .store
            .commit(|txn| {
                let mut invoice = txn.recheck(&snapshot)?;
                invoice
                    .adjust(request.amount, &request.reason, &request.actor, self.now())
                    .or_abort()?;
                txn.save(&invoice)
            })
            .inspect_err(|e| log_rejected("adjust_invoice", e))?;

        tracing::info!(
            invoice_id = %invoice.id,
            amount = request.amount,
            total = invoice.total_amount(),
            actor = %request.actor,
            "invoice adjusted"
        );
        Ok(invoice)
    }

    /// Re-derive the payment status against the clock. Writes only when it changed.
    pub fn refresh_payment_status(&self, invoice_id: &str) -> Result<Invoice, WorkflowError> {
        let snapshot = self.invoice(invoice_id)?;
        let mut probe = snapshot.clone();
        if probe.recompute(self.now()) == snapshot.payment_status() {
            return Ok(snapshot);
        }

        let invoice = self.store.commit(|txn| {
            let mut invoice = txn.recheck(&snapshot)?;
            invoice.recompute(self.now());
            txn.save(&invoice)
        })?;

        tracing::info!(invoice_id = %invoice.id, status = %invoice.payment_status(), "payment status refreshed");
        Ok(invoice)
    }
}

fn invoice_line(booking: &Booking) -> Result<InvoiceLine, WorkflowError> {
    if booking.status() != BookingStatus::Completed {
        return Err(WorkflowError::invalid(
            "booking",
            format!("{} is {}, only completed trips are invoiced", booking.id, booking.status()),
        ));
    }
    if let Some(invoice_id) = &booking.invoice_id {
        return Err(WorkflowError::invalid(
            "booking",
            format!("{} is already invoiced by {invoice_id}", booking.id),
        ));
    }
    let Some(amount) = booking.billable_amount() else {
        return Err(WorkflowError::invalid(
            "booking",
            format!("{} has no price to invoice", booking.id),
        ));
    };
    Ok(InvoiceLine {
        booking_id: booking.id.clone(),
        booking_number: booking.booking_number.clone(),
        amount,
    })
}

fn issue(txn: &crate::store::Txn<'_>, invoice: &Invoice) -> crate::store::TxnResult<Invoice> {
    if let Some(holder) = txn.claim(INVOICE_NUMBER_INDEX, &invoice.invoice_number, &invoice.id)? {
        return abort(WorkflowError::Conflict {
            entity: "invoice number",
            id: format!("{} (held by {holder})", invoice.invoice_number),
        });
    }
    txn.create(invoice)
}
