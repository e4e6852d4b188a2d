//! Invoice arithmetic and lifecycle rules.
//!
//! Everything in here is pure: services call into it before touching the
//! database so the rules can be tested without one.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

pub use tally_shared::{InvoiceStatus, PaymentMethod};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    #[error("Invoice must have at least one item")]
    NoItems,
    #[error("Item quantity must be greater than zero")]
    InvalidQuantity,
    #[error("Item unit price cannot be negative")]
    NegativeUnitPrice,
    #[error("Tax and discount cannot be negative")]
    NegativeAdjustment,
    #[error("Discount cannot exceed subtotal plus tax")]
    NegativeTotal,
    #[error("Payment amount must be greater than zero")]
    NonPositivePayment,
    #[error("Payment amount exceeds invoice total")]
    Overpayment,
    #[error("Cannot change invoice status from {from} to {to}")]
    InvalidTransition { from: InvoiceStatus, to: InvoiceStatus },
    #[error("Invoice total cannot be lower than the amount already paid")]
    TotalBelowPaid,
    #[error("{0} can have at most two decimal places")]
    TooManyDecimals(&'static str),
}

/// Money and quantity columns are NUMERIC(12, 2).
pub const MONEY_SCALE: u32 = 2;

pub fn has_cent_precision(value: Decimal) -> bool {
    value.normalize().scale() <= MONEY_SCALE
}

fn ensure_cents(value: Decimal, field: &'static str) -> Result<(), BillingError> {
    if has_cent_precision(value) {
        Ok(())
    } else {
        Err(BillingError::TooManyDecimals(field))
    }
}

/// A line item as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItemInput {
    pub fn amount(&self) -> Decimal {
        (self.quantity * self.unit_price)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// `subtotal = Σ quantity × unit_price`, `total = subtotal + tax − discount`.
pub fn compute_totals(
    items: &[LineItemInput],
    tax: Decimal,
    discount: Decimal,
) -> Result<Totals, BillingError> {
    if items.is_empty() {
        return Err(BillingError::NoItems);
    }
    if tax < Decimal::ZERO || discount < Decimal::ZERO {
        return Err(BillingError::NegativeAdjustment);
    }
    ensure_cents(tax, "Tax")?;
    ensure_cents(discount, "Discount")?;

    let mut subtotal = Decimal::ZERO;
    for item in items {
        if item.quantity <= Decimal::ZERO {
            return Err(BillingError::InvalidQuantity);
        }
        if item.unit_price < Decimal::ZERO {
            return Err(BillingError::NegativeUnitPrice);
        }
        ensure_cents(item.quantity, "Item quantity")?;
        ensure_cents(item.unit_price, "Item unit price")?;
        subtotal += item.amount();
    }

    let total = subtotal + tax - discount;
    if total < Decimal::ZERO {
        return Err(BillingError::NegativeTotal);
    }

    Ok(Totals {
        subtotal,
        tax,
        discount,
        total,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Balance remains after this payment.
    Partial { balance_due: Decimal },
    /// The payment covers the invoice exactly.
    Settled,
}

/// Validate a new payment against what has already been paid.
pub fn check_payment(
    total: Decimal,
    already_paid: Decimal,
    amount: Decimal,
) -> Result<PaymentOutcome, BillingError> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::NonPositivePayment);
    }
    ensure_cents(amount, "Payment amount")?;
    let paid = already_paid + amount;
    if paid > total {
        return Err(BillingError::Overpayment);
    }
    if paid == total {
        Ok(PaymentOutcome::Settled)
    } else {
        Ok(PaymentOutcome::Partial {
            balance_due: total - paid,
        })
    }
}

pub fn ensure_transition(from: InvoiceStatus, to: InvoiceStatus) -> Result<(), BillingError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(BillingError::InvalidTransition { from, to })
    }
}

/// Reject edits that would leave the invoice already overpaid.
pub fn ensure_total_covers_paid(total: Decimal, already_paid: Decimal) -> Result<(), BillingError> {
    if total < already_paid {
        Err(BillingError::TotalBelowPaid)
    } else {
        Ok(())
    }
}

pub fn invoice_number(year: i32, sequence: i32) -> String {
    format!("INV-{}-{:05}", year, sequence)
}

pub fn days_overdue(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days().max(0)
}

/// Canned reporting windows for list filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateFilter {
    ThisMonth,
    LastMonth,
    ThisQuarter,
    ThisYear,
}

impl DateFilter {
    /// Inclusive `(start, end)`; current periods end today.
    pub fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let year = today.year();
        let first_of_month = today.with_day(1).unwrap_or(today);
        match self {
            Self::ThisMonth => (first_of_month, today),
            Self::LastMonth => {
                let end = first_of_month.pred_opt().unwrap_or(first_of_month);
                (end.with_day(1).unwrap_or(end), end)
            }
            Self::ThisQuarter => {
                let quarter_month = (today.month0() / 3) * 3 + 1;
                let start = NaiveDate::from_ymd_opt(year, quarter_month, 1).unwrap_or(first_of_month);
                (start, today)
            }
            Self::ThisYear => {
                let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(first_of_month);
                (start, today)
            }
        }
    }
}

/// Resolve the issue-date window of a list query; a canned filter wins over
/// explicit bounds.
pub fn resolve_date_range(
    filter: Option<DateFilter>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    match filter {
        Some(f) => {
            let (s, e) = f.range(today);
            (Some(s), Some(e))
        }
        None => (start, end),
    }
}

/// Accepts `2024-05-01` as well as a full RFC 3339 timestamp.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc).date_naive()))
}

pub fn de_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flexible_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw)))
}

pub fn de_opt_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_flexible_date(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw))),
    }
}

pub fn de_opt_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw.trim()) {
                return Ok(Some(dt.with_timezone(&Utc)));
            }
            parse_flexible_date(&raw)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Some(naive.and_utc()))
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw)))
        }
    }
}
