//! Contracts, invoices and payment status
use crate::error::WorkflowError;
use crate::store::impl_record;
use crate::types::TimeStamp;
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum ContractStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Active,
    #[n(2)]
    Expired,
    #[n(3)]
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractAction {
    Activate,
    Expire,
    Terminate,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Expired => "expired",
            ContractStatus::Terminated => "terminated",
        }
    }

    pub fn apply(self, action: ContractAction) -> Option<ContractStatus> {
        match (self, action) {
            (ContractStatus::Draft, ContractAction::Activate) => Some(ContractStatus::Active),
            (ContractStatus::Active, ContractAction::Expire) => Some(ContractStatus::Expired),
            (ContractStatus::Draft | ContractStatus::Active, ContractAction::Terminate) => {
                Some(ContractStatus::Terminated)
            }
            _ => None,
        }
    }
}

impl ContractAction {
    pub fn target(&self) -> ContractStatus {
        match self {
            ContractAction::Activate => ContractStatus::Active,
            ContractAction::Expire => ContractStatus::Expired,
            ContractAction::Terminate => ContractStatus::Terminated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Partial,
    #[n(2)]
    Paid,
    #[n(3)]
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status as a pure function of what was paid, what is owed and the due date.
///
/// Settled invoices are `paid` even after the due date; an unsettled invoice past its
/// due date is `overdue` whatever was paid; otherwise nothing paid is `pending` and
/// something paid is `partial`. An invoice with nothing owed is settled.
pub fn payment_status(
    paid_amount: u64,
    total_amount: u64,
    due_date: Option<TimeStamp<Utc>>,
    now: TimeStamp<Utc>,
) -> PaymentStatus {
    if paid_amount >= total_amount {
        return PaymentStatus::Paid;
    }
    if due_date.is_some_and(|due| now > due) {
        return PaymentStatus::Overdue;
    }
    if paid_amount == 0 {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Partial
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Contract {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub contract_number: String,
    #[n(2)]
    pub customer_id: String,
    #[n(3)]
    pub status: ContractStatus,
    #[n(4)]
    pub total_amount: u64,
    #[n(5)]
    pub starts_on: TimeStamp<Utc>,
    #[n(6)]
    pub ends_on: TimeStamp<Utc>,
    #[n(7)]
    version: u64,
}

#[derive(Debug, Clone)]
pub struct NewContract {
    pub contract_number: String,
    pub customer_id: String,
    pub total_amount: u64,
    pub starts_on: TimeStamp<Utc>,
    pub ends_on: TimeStamp<Utc>,
}

impl NewContract {
    pub(crate) fn into_contract(self, id: String) -> Result<Contract, WorkflowError> {
        if self.contract_number.trim().is_empty() {
            return Err(WorkflowError::invalid("contract number", "must not be empty"));
        }
        if self.customer_id.trim().is_empty() {
            return Err(WorkflowError::invalid("customer", "must not be empty"));
        }
        if self.ends_on < self.starts_on {
            return Err(WorkflowError::invalid(
                "contract period",
                format!("ends {} before it starts {}", self.ends_on, self.starts_on),
            ));
        }
        Ok(Contract {
            id,
            contract_number: self.contract_number.trim().to_string(),
            customer_id: self.customer_id.trim().to_string(),
            status: ContractStatus::Draft,
            total_amount: self.total_amount,
            starts_on: self.starts_on,
            ends_on: self.ends_on,
            version: 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct InvoiceLine {
    #[n(0)]
    pub booking_id: String,
    #[n(1)]
    pub booking_number: String,
    #[n(2)]
    pub amount: u64,
}

/// Additive correction. Negative amounts are credits.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Adjustment {
    #[n(0)]
    pub amount: i64,
    #[n(1)]
    pub reason: String,
    #[n(2)]
    pub actor: String,
    #[n(3)]
    pub at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Payment {
    #[n(0)]
    pub amount: u64,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Invoice {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub invoice_number: String,
    #[n(2)]
    pub booking_id: Option<String>,
    #[n(3)]
    pub contract_id: Option<String>,
    #[n(4)]
    pub customer_id: Option<String>,
    #[n(5)]
    lines: Vec<InvoiceLine>,
    #[n(6)]
    subtotal: u64,
    #[n(7)]
    tax_amount: u64,
    #[n(8)]
    adjustments: Vec<Adjustment>,
    #[n(9)]
    total_amount: u64,
    #[n(10)]
    paid_amount: u64,
    #[n(11)]
    payments: Vec<Payment>,
    #[n(12)]
    pub due_date: Option<TimeStamp<Utc>>,
    #[n(13)]
    payment_status: PaymentStatus,
    #[n(14)]
    pub issued_at: TimeStamp<Utc>,
    // sha256 over the issued lines, subtotal and tax
    #[n(15)]
    issued_digest: String,
    #[n(16)]
    version: u64,
}

/// The part of an invoice that is frozen at issue time.
#[derive(minicbor::Encode)]
struct IssuedTerms<'a> {
    #[n(0)]
    lines: &'a [InvoiceLine],
    #[n(1)]
    subtotal: u64,
    #[n(2)]
    tax_amount: u64,
}

/// Draft of an invoice; nothing is frozen until [`Invoice::issue`].
#[derive(Debug, Clone, Default)]
pub struct IssueInvoice {
    pub invoice_number: String,
    pub booking_id: Option<String>,
    pub contract_id: Option<String>,
    pub customer_id: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub tax_amount: u64,
    pub due_date: Option<TimeStamp<Utc>>,
}

impl IssueInvoice {
    pub fn new(invoice_number: String, lines: Vec<InvoiceLine>) -> Self {
        Self {
            invoice_number,
            lines,
            ..Self::default()
        }
    }

    pub fn subtotal(&self) -> Result<u64, WorkflowError> {
        self.lines
            .iter()
            .try_fold(0u64, |total, line| total.checked_add(line.amount))
            .ok_or_else(|| WorkflowError::invalid("invoice lines", "subtotal overflows"))
    }
}

impl Invoice {
    pub(crate) fn issue(
        id: String,
        draft: IssueInvoice,
        at: TimeStamp<Utc>,
    ) -> Result<Self, WorkflowError> {
        if draft.lines.is_empty() {
            return Err(WorkflowError::invalid("invoice lines", "nothing to invoice"));
        }
        let subtotal = draft.subtotal()?;
        let total_amount = subtotal.checked_add(draft.tax_amount).ok_or_else(|| {
            WorkflowError::invalid(
                "tax amount",
                format!("{} on a subtotal of {subtotal} overflows the total", draft.tax_amount),
            )
        })?;
        let issued_digest = digest(&draft.lines, subtotal, draft.tax_amount)?;

        let mut invoice = Self {
            id,
            invoice_number: draft.invoice_number,
            booking_id: draft.booking_id,
            contract_id: draft.contract_id,
            customer_id: draft.customer_id,
            lines: draft.lines,
            subtotal,
            tax_amount: draft.tax_amount,
            adjustments: vec![],
            total_amount,
            paid_amount: 0,
            payments: vec![],
            due_date: draft.due_date,
            payment_status: PaymentStatus::Pending,
            issued_at: at,
            issued_digest,
            version: 0,
        };
        invoice.recompute(at);
        Ok(invoice)
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }
    pub fn subtotal(&self) -> u64 {
        self.subtotal
    }
    pub fn tax_amount(&self) -> u64 {
        self.tax_amount
    }
    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }
    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }
    pub fn paid_amount(&self) -> u64 {
        self.paid_amount
    }
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }
    pub fn outstanding(&self) -> u64 {
        self.total_amount.saturating_sub(self.paid_amount)
    }

    /// Re-derive `payment_status` against `now`. Idempotent.
    pub fn recompute(&mut self, now: TimeStamp<Utc>) -> PaymentStatus {
        self.payment_status =
            payment_status(self.paid_amount, self.total_amount, self.due_date, now);
        self.payment_status
    }

    pub(crate) fn record_payment(
        &mut self,
        amount: u64,
        reference: &str,
        at: TimeStamp<Utc>,
    ) -> Result<PaymentStatus, WorkflowError> {
        if amount == 0 {
            return Err(WorkflowError::invalid("payment amount", "must be positive"));
        }
        self.paid_amount = self
            .paid_amount
            .checked_add(amount)
            .ok_or_else(|| WorkflowError::invalid("payment amount", "overflows the paid total"))?;
        self.payments.push(Payment {
            amount,
            reference: reference.to_string(),
            at,
        });
        Ok(self.recompute(at))
    }

    /// Append a correction; the issued lines, subtotal and tax stay untouched.
    pub(crate) fn adjust(
        &mut self,
        amount: i64,
        reason: &str,
        actor: &str,
        at: TimeStamp<Utc>,
    ) -> Result<PaymentStatus, WorkflowError> {
        if amount == 0 {
            return Err(WorkflowError::invalid("adjustment", "must not be zero"));
        }
        if reason.trim().is_empty() {
            return Err(WorkflowError::invalid("adjustment reason", "must not be empty"));
        }
        let total = self.total_amount as i128 + amount as i128;
        if total < 0 || total > u64::MAX as i128 {
            return Err(WorkflowError::invalid(
                "adjustment",
                format!("{amount} would take the total to {total}"),
            ));
        }
        self.total_amount = total as u64;
        self.adjustments.push(Adjustment {
            amount,
            reason: reason.trim().to_string(),
            actor: actor.to_string(),
            at,
        });
        Ok(self.recompute(at))
    }

    /// True while the issued terms still hash to the digest taken at issue time
    /// and the total equals those terms plus the recorded adjustments.
    pub fn verify_digest(&self) -> bool {
        let Ok(current) = digest(&self.lines, self.subtotal, self.tax_amount) else {
            return false;
        };
        let adjusted = self.subtotal as i128
            + self.tax_amount as i128
            + self
                .adjustments
                .iter()
                .map(|adjustment| adjustment.amount as i128)
                .sum::<i128>();

        current == self.issued_digest && adjusted == self.total_amount as i128
    }
}

fn digest(lines: &[InvoiceLine], subtotal: u64, tax_amount: u64) -> Result<String, WorkflowError> {
    let cbor = minicbor::to_vec(IssuedTerms {
        lines,
        subtotal,
        tax_amount,
    })
    .map_err(|e| WorkflowError::Encoding(e.to_string()))?;
    Ok(sha256::digest(&cbor))
}

impl_record!(Contract, "contract");
impl_record!(Invoice, "invoice");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn day(d: u32) -> TimeStamp<Utc> {
        TimeStamp::new_with(2024, 6, d, 12, 0, 0).unwrap()
    }

    fn line(number: &str, amount: u64) -> InvoiceLine {
        InvoiceLine {
            booking_id: format!("booking_{number}"),
            booking_number: number.into(),
            amount,
        }
    }

    fn invoice(total: u64, due: Option<TimeStamp<Utc>>) -> Invoice {
        let draft = IssueInvoice {
            booking_id: Some("booking_BK-1".into()),
            customer_id: Some("cust".into()),
            due_date: due,
            ..IssueInvoice::new("INV-BK-1".into(), vec![line("BK-1", total)])
        };
        Invoice::issue("invoice_1".into(), draft, day(1)).unwrap()
    }

    #[test]
    fn oversized_totals_are_refused() {
        let lines = vec![line("BK-1", u64::MAX - 10), line("BK-2", 11)];
        let draft = IssueInvoice::new("INV-BIG".into(), lines);
        assert_eq!(draft.subtotal().unwrap_err().kind(), ErrorKind::Invalid);
        let err = Invoice::issue("invoice_big".into(), draft, day(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let draft = IssueInvoice {
            tax_amount: 20,
            ..IssueInvoice::new("INV-TAX".into(), vec![line("BK-3", u64::MAX - 10)])
        };
        let err = Invoice::issue("invoice_tax".into(), draft, day(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn status_table() {
        let due = Some(day(10));
        assert_eq!(payment_status(0, 100, due, day(5)), PaymentStatus::Pending);
        assert_eq!(payment_status(40, 100, due, day(5)), PaymentStatus::Partial);
        assert_eq!(payment_status(100, 100, due, day(5)), PaymentStatus::Paid);
        assert_eq!(payment_status(150, 100, due, day(5)), PaymentStatus::Paid);
        assert_eq!(payment_status(40, 100, due, day(11)), PaymentStatus::Overdue);
        assert_eq!(payment_status(0, 100, due, day(11)), PaymentStatus::Overdue);
        assert_eq!(payment_status(100, 100, due, day(11)), PaymentStatus::Paid);
        assert_eq!(payment_status(0, 100, None, day(28)), PaymentStatus::Pending);
    }

    #[test]
    fn paid_in_full_stays_paid_on_recompute() {
        let mut invoice = invoice(1_000_000, Some(day(10)));
        invoice.record_payment(1_000_000, "bank-1", day(2)).unwrap();

        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.recompute(day(2)), PaymentStatus::Paid);
        assert_eq!(invoice.recompute(day(20)), PaymentStatus::Paid);
    }

    #[test]
    fn adjustments_are_additive() {
        let mut invoice = invoice(1_000_000, None);
        invoice.adjust(-200_000, "late pickup discount", "acct", day(2)).unwrap();

        assert_eq!(invoice.subtotal(), 1_000_000);
        assert_eq!(invoice.total_amount(), 800_000);
        assert_eq!(invoice.adjustments().len(), 1);
        assert!(invoice.verify_digest());

        assert!(invoice.adjust(-900_000, "too much", "acct", day(2)).is_err());
        assert_eq!(invoice.total_amount(), 800_000);
    }

    #[test]
    fn tampered_lines_fail_the_digest() {
        let mut invoice = invoice(1_000_000, None);
        invoice.lines[0].amount = 1;
        assert!(!invoice.verify_digest());
    }

    #[test]
    fn contract_lifecycle() {
        assert_eq!(
            ContractStatus::Draft.apply(ContractAction::Activate),
            Some(ContractStatus::Active)
        );
        assert_eq!(ContractStatus::Draft.apply(ContractAction::Expire), None);
        assert_eq!(ContractStatus::Expired.apply(ContractAction::Terminate), None);
    }
}
