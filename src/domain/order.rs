use crate::domain::payment::PaymentMethod;
use crate::error::NotifyError;
use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a positive monetary amount for a payment request.
///
/// Amounts are fixed once the order exists; every gateway call reuses the
/// stored value rather than anything echoed back by the provider.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, NotifyError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(NotifyError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Whole-currency rendering used by providers that only accept integers (TWD).
    pub fn to_whole_units(&self) -> i64 {
        self.0.round().to_i64().unwrap_or(i64::MAX)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = NotifyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(NotifyError::Validation(format!(
                "Unknown order status '{other}'"
            ))),
        }
    }
}

/// A payment request tracked until it is paid or swept.
///
/// `status` only ever moves away from `Pending`; every mutator below refuses to
/// touch an order that is not pending and unexpired.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub user_name: String,
    pub amount: Amount,
    pub status: OrderStatus,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub expiry_time: DateTime<Utc>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_payment_request_at: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_reminder_sent: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        amount: Amount,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            amount,
            status: OrderStatus::Pending,
            created_at: now,
            expiry_time: now + ttl,
            payment_method: None,
            transaction_id: None,
            payment_url: None,
            last_payment_request_at: None,
            last_reminder_sent: None,
            paid_at: None,
            retry_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_time
    }

    /// Pending and still inside its payment window.
    pub fn is_payable(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && !self.is_expired(now)
    }

    /// Status as operators see it: a pending order past its deadline reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> OrderStatus {
        match self.status {
            OrderStatus::Pending if self.is_expired(now) => OrderStatus::Expired,
            status => status,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry_time - now).max(Duration::zero())
    }

    fn ensure_payable(&self, now: DateTime<Utc>) -> Result<(), NotifyError> {
        if self.is_payable(now) {
            Ok(())
        } else {
            Err(NotifyError::AlreadyTerminal(self.order_id.clone()))
        }
    }

    /// Flips a pending order to paid
    pub fn mark_paid(
        &mut self,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.ensure_payable(now)?;
        self.status = OrderStatus::Paid;
        self.payment_method = Some(method);
        self.paid_at = Some(now);
        self.last_reminder_sent = Some(now);
        Ok(())
    }

    /// Stores the latest checkout attempt, replacing any earlier one
    pub fn record_payment_attempt(
        &mut self,
        transaction_id: impl Into<String>,
        payment_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.ensure_payable(now)?;
        self.transaction_id = Some(transaction_id.into());
        self.payment_url = Some(payment_url.into());
        self.last_payment_request_at = Some(now);
        self.retry_count += 1;
        Ok(())
    }

    /// Extends the deadline and clears reminder bookkeeping.
    ///
    /// Renewal is allowed for a pending order even after its deadline passed, as
    /// long as the janitor has not removed it yet.
    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) -> Result<(), NotifyError> {
        if self.status != OrderStatus::Pending {
            return Err(NotifyError::AlreadyTerminal(self.order_id.clone()));
        }
        self.expiry_time = now + ttl;
        self.retry_count = 0;
        self.last_reminder_sent = None;
        Ok(())
    }

    pub fn mark_reminder_sent(&mut self, now: DateTime<Utc>) -> Result<(), NotifyError> {
        self.ensure_payable(now)?;
        self.last_reminder_sent = Some(now);
        Ok(())
    }

    pub fn needs_reminder(
        &self,
        now: DateTime<Utc>,
        initial_delay: Duration,
        repeat_interval: Duration,
    ) -> bool {
        if !self.is_payable(now) || now - self.created_at < initial_delay {
            return false;
        }
        match self.last_reminder_sent {
            None => true,
            Some(sent) => now - sent >= repeat_interval,
        }
    }

    /// Pending orders whose deadline is strictly in the past are swept.
    pub fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.expiry_time < now
    }
}
