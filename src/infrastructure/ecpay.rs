use crate::domain::order::Order;
use crate::domain::payment::{GatewayOutcome, GatewaySignal, Outcome, PaymentMethod};
use crate::domain::ports::PaymentGateway;
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

pub const DEFAULT_ECPAY_CHECKOUT_URL: &str = "https://payment.ecpay.com.tw/Cashier/AioCheckOut/V5";
pub const CHECK_MAC_FIELD: &str = "CheckMacValue";
const SUCCESS_CODE: &str = "1";
const TRADE_DESC: &str = "C.H 精緻洗衣付款";
const ITEM_NAME: &str = "洗衣服務";
/// Merchant-side timestamps are Taipei time.
const MERCHANT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Acknowledgement bodies the provider expects from the callback endpoint.
pub mod ack {
    pub const OK: &str = "1|OK";
    pub const ERROR: &str = "0|Error";
    pub const CHECK_MAC_ERROR: &str = "0|CheckMacValue Error";
}

#[derive(Debug, Clone)]
pub struct EcPayConfig {
    pub merchant_id: String,
    pub hash_key: String,
    pub hash_iv: String,
    pub checkout_url: String,
    pub public_base_url: String,
}

/// Computes the provider's `CheckMacValue` over every field except itself.
pub fn check_mac_value(params: &BTreeMap<String, String>, hash_key: &str, hash_iv: &str) -> String {
    let mut fields: Vec<(&String, &String)> = params
        .iter()
        .filter(|(key, _)| key.as_str() != CHECK_MAC_FIELD)
        .collect();
    fields.sort_by_key(|(key, _)| key.to_lowercase());

    let mut raw = format!("HashKey={}", hash_key);
    for (key, value) in fields {
        raw.push('&');
        raw.push_str(key);
        raw.push('=');
        raw.push_str(value);
    }
    raw.push_str("&HashIV=");
    raw.push_str(hash_iv);

    let encoded = urlencoding::encode(&raw)
        .replace("%20", "+")
        .replace("%21", "!")
        .replace("%2A", "*")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%27", "'")
        .to_lowercase();

    hex::encode_upper(Sha256::digest(encoded.as_bytes()))
}

/// Human-readable label for a `PaymentType` code.
pub fn payment_type_label(code: &str) -> &str {
    match code {
        "Credit_CreditCard" => "信用卡",
        "WebATM_TAISHIN" => "台新WebATM",
        "WebATM_ESUN" => "玉山WebATM",
        "WebATM_BOT" => "台銀WebATM",
        "ATM_TAISHIN" => "台新ATM",
        "ATM_ESUN" => "玉山ATM",
        "ATM_BOT" => "台銀ATM",
        "CVS_CVS" => "超商代碼",
        "BARCODE_BARCODE" => "超商條碼",
        other => other,
    }
}

/// Gateway B: the inbound callback carries the final outcome.
#[derive(Clone)]
pub struct EcPayGateway {
    config: EcPayConfig,
}

impl EcPayGateway {
    pub fn new(config: EcPayConfig) -> Self {
        Self { config }
    }

    pub fn checkout_url(&self) -> &str {
        &self.config.checkout_url
    }

    /// Signed form fields for the auto-submitting checkout page.
    pub fn checkout_fields(&self, order: &Order, now: DateTime<Utc>) -> Result<BTreeMap<String, String>> {
        let offset = FixedOffset::east_opt(MERCHANT_UTC_OFFSET_SECS)
            .ok_or_else(|| NotifyError::Config("Invalid merchant UTC offset".to_string()))?;
        let trade_date = now.with_timezone(&offset).format("%Y/%m/%d %H:%M:%S").to_string();
        let base = self.config.public_base_url.trim_end_matches('/');

        let mut fields: BTreeMap<String, String> = [
            ("MerchantID", self.config.merchant_id.clone()),
            ("MerchantTradeNo", order.order_id.clone()),
            ("MerchantTradeDate", trade_date),
            ("PaymentType", "aio".to_string()),
            ("TotalAmount", order.amount.to_whole_units().to_string()),
            ("TradeDesc", TRADE_DESC.to_string()),
            ("ItemName", ITEM_NAME.to_string()),
            ("ReturnURL", format!("{}/payment/ecpay/callback", base)),
            ("ChoosePayment", "ALL".to_string()),
            ("EncryptType", "1".to_string()),
            ("CustomField1", order.user_id.clone()),
            ("CustomField2", order.user_name.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let mac = check_mac_value(&fields, &self.config.hash_key, &self.config.hash_iv);
        fields.insert(CHECK_MAC_FIELD.to_string(), mac);
        Ok(fields)
    }
}

#[async_trait]
impl PaymentGateway for EcPayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::EcPay
    }

    fn order_id(&self, signal: &GatewaySignal) -> Result<String> {
        signal
            .get("MerchantTradeNo")
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Validation("MerchantTradeNo is required".to_string()))
    }

    fn verify_inbound_signal(&self, signal: &GatewaySignal, order: &Order) -> Result<()> {
        let presented = signal
            .get(CHECK_MAC_FIELD)
            .ok_or_else(|| NotifyError::Signature("CheckMacValue is missing".to_string()))?;
        let expected = check_mac_value(&signal.fields, &self.config.hash_key, &self.config.hash_iv);
        let matches: bool = presented
            .to_ascii_uppercase()
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into();
        if !matches {
            return Err(NotifyError::Signature(format!(
                "CheckMacValue mismatch for order {}",
                order.order_id
            )));
        }
        Ok(())
    }

    async fn extract_outcome(
        &self,
        signal: &GatewaySignal,
        order: &Order,
    ) -> Result<GatewayOutcome> {
        let outcome = match signal.get("RtnCode") {
            Some(SUCCESS_CODE) => Outcome::Success,
            _ => Outcome::Failure,
        };
        let mut evidence = format!("TradeNo={}", signal.get("TradeNo").unwrap_or("-"));
        if let Some(payment_type) = signal.get("PaymentType") {
            evidence.push_str(&format!(" PaymentType={}", payment_type_label(payment_type)));
        }
        if let Some(message) = signal.get("RtnMsg") {
            evidence.push_str(&format!(" RtnMsg={}", message));
        }
        Ok(GatewayOutcome {
            order_id: order.order_id.clone(),
            outcome,
            evidence,
        })
    }
}
