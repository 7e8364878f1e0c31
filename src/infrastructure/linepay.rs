use crate::domain::order::Order;
use crate::domain::payment::{GatewayOutcome, GatewaySignal, Outcome, PaymentMethod};
use crate::domain::ports::PaymentGateway;
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

pub const DEFAULT_LINEPAY_API_URL: &str = "https://api-pay.line.me";
const REQUEST_URI: &str = "/v3/payments/request";
const SUCCESS_CODE: &str = "0000";
const CURRENCY: &str = "TWD";
const PACKAGE_NAME: &str = "C.H精緻洗衣服務";
const PRODUCT_NAME: &str = "洗衣清潔費用";

/// Computes the `X-LINE-Authorization` header value.
///
/// base64(HMAC-SHA256(secret, secret + uri + body + nonce))
pub fn sign(channel_secret: &str, uri: &str, body: &str, nonce: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes())
        .map_err(|e| NotifyError::Config(format!("LINE Pay secret rejected: {}", e)))?;
    mac.update(channel_secret.as_bytes());
    mac.update(uri.as_bytes());
    mac.update(body.as_bytes());
    mac.update(nonce.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn fresh_nonce() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    STANDARD.encode(bytes)
}

#[derive(Debug, Clone)]
pub struct LinePayConfig {
    pub api_url: String,
    pub channel_id: String,
    pub channel_secret: String,
    /// Public origin the provider redirects the payer back to.
    pub public_base_url: String,
}

/// A freshly opened checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSession {
    pub transaction_id: String,
    pub payment_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Product<'a> {
    name: &'a str,
    quantity: u32,
    price: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Package<'a> {
    id: &'a str,
    amount: i64,
    name: &'a str,
    products: [Product<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RedirectUrls {
    confirm_url: String,
    cancel_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    amount: i64,
    currency: &'static str,
    order_id: &'a str,
    packages: [Package<'a>; 1],
    redirect_urls: RedirectUrls,
}

#[derive(Serialize)]
struct ConfirmBody {
    amount: i64,
    currency: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    return_code: String,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    info: Value,
}

/// Gateway A: payment is only final after an outbound confirm call.
#[derive(Clone)]
pub struct LinePayGateway {
    client: reqwest::Client,
    config: LinePayConfig,
}

impl LinePayGateway {
    pub fn new(client: reqwest::Client, config: LinePayConfig) -> Self {
        Self { client, config }
    }

    async fn call<B: Serialize>(&self, uri: &str, body: &B) -> Result<ApiResponse> {
        let body = serde_json::to_string(body)?;
        let nonce = fresh_nonce();
        let signature = sign(&self.config.channel_secret, uri, &body, &nonce)?;

        let response = self
            .client
            .post(format!("{}{}", self.config.api_url.trim_end_matches('/'), uri))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-LINE-ChannelId", &self.config.channel_id)
            .header("X-LINE-Authorization-Nonce", nonce)
            .header("X-LINE-Authorization", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Gateway(format!(
                "LINE Pay {} returned HTTP {}",
                uri, status
            )));
        }
        Ok(response.json().await?)
    }

    /// Opens a checkout session for the order's stored amount.
    pub async fn request_payment(&self, order: &Order) -> Result<PaymentSession> {
        let amount = order.amount.to_whole_units();
        let base = self.config.public_base_url.trim_end_matches('/');
        let body = RequestBody {
            amount,
            currency: CURRENCY,
            order_id: &order.order_id,
            packages: [Package {
                id: &order.order_id,
                amount,
                name: PACKAGE_NAME,
                products: [Product {
                    name: PRODUCT_NAME,
                    quantity: 1,
                    price: amount,
                }],
            }],
            redirect_urls: RedirectUrls {
                confirm_url: format!(
                    "{}/payment/linepay/confirm?orderId={}",
                    base,
                    urlencoding::encode(&order.order_id)
                ),
                cancel_url: format!("{}/payment/linepay/cancel", base),
            },
        };

        let response = self.call(REQUEST_URI, &body).await?;
        if response.return_code != SUCCESS_CODE {
            return Err(NotifyError::Gateway(format!(
                "LINE Pay request rejected: {} {}",
                response.return_code, response.return_message
            )));
        }

        let transaction_id = match &response.info["transactionId"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => {
                return Err(NotifyError::Gateway(
                    "LINE Pay response has no transactionId".to_string(),
                ));
            }
        };
        let urls = &response.info["paymentUrl"];
        let payment_url = urls["app"]
            .as_str()
            .or_else(|| urls["web"].as_str())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NotifyError::Gateway("LINE Pay response has no paymentUrl".to_string()))?
            .to_string();

        tracing::info!(order_id = %order.order_id, %transaction_id, "LINE Pay transaction opened");
        Ok(PaymentSession {
            transaction_id,
            payment_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for LinePayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::LinePay
    }

    fn order_id(&self, signal: &GatewaySignal) -> Result<String> {
        signal
            .get("orderId")
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Validation("orderId is required".to_string()))
    }

    fn verify_inbound_signal(&self, signal: &GatewaySignal, order: &Order) -> Result<()> {
        let presented = signal
            .get("transactionId")
            .ok_or_else(|| NotifyError::Validation("transactionId is required".to_string()))?;
        match order.transaction_id.as_deref() {
            Some(expected) if expected == presented => Ok(()),
            _ => Err(NotifyError::Signature(format!(
                "transactionId does not match order {}",
                order.order_id
            ))),
        }
    }

    async fn extract_outcome(
        &self,
        signal: &GatewaySignal,
        order: &Order,
    ) -> Result<GatewayOutcome> {
        let transaction_id = signal
            .get("transactionId")
            .ok_or_else(|| NotifyError::Validation("transactionId is required".to_string()))?;
        let uri = format!("/v3/payments/{}/confirm", transaction_id);
        let body = ConfirmBody {
            amount: order.amount.to_whole_units(),
            currency: CURRENCY,
        };
        let response = self.call(&uri, &body).await?;

        let outcome = if response.return_code == SUCCESS_CODE {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        Ok(GatewayOutcome {
            order_id: order.order_id.clone(),
            outcome,
            evidence: format!(
                "transactionId={} returnCode={} {}",
                transaction_id, response.return_code, response.return_message
            )
            .trim_end()
            .to_string(),
        })
    }
}
