use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The payment providers an order can be settled through.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Gateway A: confirmation needs an outbound confirm call.
    LinePay,
    /// Gateway B: the inbound callback carries the final outcome.
    EcPay,
}

impl PaymentMethod {
    pub fn slug(&self) -> &'static str {
        match self {
            PaymentMethod::LinePay => "linepay",
            PaymentMethod::EcPay => "ecpay",
        }
    }

    fn order_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::LinePay => "LP",
            PaymentMethod::EcPay => "EC",
        }
    }

    /// The gateway an order id was minted for.
    pub fn from_order_id(order_id: &str) -> Option<Self> {
        [PaymentMethod::LinePay, PaymentMethod::EcPay]
            .into_iter()
            .find(|method| order_id.starts_with(method.order_prefix()))
    }

    /// `LP`/`EC` + epoch millis + five uppercase alphanumerics (20 chars total).
    pub fn generate_order_id(&self, now: DateTime<Utc>) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..5)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{}{}{}", self.order_prefix(), now.timestamp_millis(), suffix)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = crate::error::NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linepay" => Ok(PaymentMethod::LinePay),
            "ecpay" => Ok(PaymentMethod::EcPay),
            other => Err(crate::error::NotifyError::Validation(format!(
                "Unknown gateway '{other}'"
            ))),
        }
    }
}

/// Persistent pay page for an order; it stays valid across payment attempts.
pub fn pay_link(public_base_url: &str, order_id: &str) -> String {
    let gateway = PaymentMethod::from_order_id(order_id).unwrap_or(PaymentMethod::EcPay);
    format!(
        "{}/payment/{}/pay/{}",
        public_base_url.trim_end_matches('/'),
        gateway.slug(),
        order_id
    )
}

/// Raw inbound gateway signal: query string or form fields, untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewaySignal {
    pub fields: BTreeMap<String, String>,
}

impl GatewaySignal {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for GatewaySignal {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// What a gateway says happened to an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOutcome {
    pub order_id: String,
    pub outcome: Outcome,
    /// Provider-side reference (trade number, transaction id) plus any message.
    pub evidence: String,
}
