#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::post;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use line_notify::application::ledger::{OrderLedger, ReminderPolicy};
use line_notify::application::pickup::{PickupSettings, PickupTracker};
use line_notify::application::reconciler::GatewayReconciler;
use line_notify::domain::pickup::PickupObservation;
use line_notify::domain::ports::{InventorySource, Notifier};
use line_notify::error::Result;
use line_notify::infrastructure::clock::ManualClock;
use line_notify::infrastructure::ecpay::{EcPayConfig, EcPayGateway, check_mac_value};
use line_notify::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPickupStore};
use line_notify::infrastructure::linepay::{LinePayConfig, LinePayGateway};
use line_notify::interfaces::http::{AppState, router};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const ADMIN: &str = "Uadmin";
pub const BASE_URL: &str = "https://bot.example.com";
pub const ECPAY_KEY: &str = "pwFHCqoQZGmho4w6";
pub const ECPAY_IV: &str = "EkRm7iFT261dpevs";
pub const LINEPAY_TRANSACTION_ID: &str = "2024123456789012345";
pub const LINEPAY_APP_URL: &str = "line://pay/payment/app";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
}

/// Remembers every push instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, user_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == user_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn push(&self, user_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Inventory feed whose contents the test swaps between ticks.
#[derive(Default)]
pub struct StaticInventory {
    items: Mutex<Vec<PickupObservation>>,
}

impl StaticInventory {
    pub fn set(&self, items: Vec<PickupObservation>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn poll(&self) -> Result<Vec<PickupObservation>> {
        Ok(self.items.lock().unwrap().clone())
    }
}

/// Stand-in for the LINE Pay API, counting calls per endpoint.
#[derive(Clone, Default)]
pub struct FakeLinePay {
    pub requests: Arc<AtomicUsize>,
    pub confirms: Arc<AtomicUsize>,
}

impl FakeLinePay {
    /// Serves on an ephemeral port and returns the base URL.
    pub async fn spawn(&self) -> String {
        let requests = self.requests.clone();
        let confirms = self.confirms.clone();
        let app = Router::new()
            .route(
                "/v3/payments/request",
                post(move || {
                    let requests = requests.clone();
                    async move {
                        requests.fetch_add(1, Ordering::SeqCst);
                        axum::Json(json!({
                            "returnCode": "0000",
                            "returnMessage": "Success.",
                            "info": {
                                "transactionId": 2024123456789012345u64,
                                "paymentUrl": {
                                    "web": "https://sandbox-web-pay.line.me/web/payment/wait",
                                    "app": LINEPAY_APP_URL,
                                },
                            },
                        }))
                    }
                }),
            )
            .route(
                "/v3/payments/{transaction_id}/confirm",
                post(move || {
                    let confirms = confirms.clone();
                    async move {
                        confirms.fetch_add(1, Ordering::SeqCst);
                        axum::Json(json!({
                            "returnCode": "0000",
                            "returnMessage": "Success.",
                        }))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

pub fn ecpay_config() -> EcPayConfig {
    EcPayConfig {
        merchant_id: "3002607".to_string(),
        hash_key: ECPAY_KEY.to_string(),
        hash_iv: ECPAY_IV.to_string(),
        checkout_url: "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5".to_string(),
        public_base_url: BASE_URL.to_string(),
    }
}

pub fn linepay_config(api_url: &str) -> LinePayConfig {
    LinePayConfig {
        api_url: api_url.to_string(),
        channel_id: "1234567890".to_string(),
        channel_secret: "channel-secret".to_string(),
        public_base_url: BASE_URL.to_string(),
    }
}

/// A fully wired router over in-memory storage and a manual clock.
pub struct TestApp {
    pub router: Router,
    pub ledger: Arc<OrderLedger>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn build_app(linepay: Option<LinePayConfig>, ecpay: Option<EcPayConfig>) -> TestApp {
    let clock = ManualClock::new(t0());
    let notifier = Arc::new(RecordingNotifier::default());
    let ledger = Arc::new(OrderLedger::new(
        Box::new(InMemoryOrderStore::new()),
        Arc::new(clock.clone()),
        chrono::Duration::days(7),
    ));
    let reconciler = Arc::new(GatewayReconciler::new(
        ledger.clone(),
        notifier.clone(),
        ADMIN,
    ));
    let pickup = Arc::new(PickupTracker::new(
        Arc::new(StaticInventory::default()),
        Box::new(InMemoryPickupStore::new()),
        notifier.clone(),
        Arc::new(clock.clone()),
        PickupSettings {
            admin_user_id: ADMIN.to_string(),
            notify_threshold: chrono::Duration::minutes(10),
            repeat_interval: chrono::Duration::minutes(120),
        },
    ));
    let client = reqwest::Client::new();
    let state = AppState {
        ledger: ledger.clone(),
        reconciler,
        pickup,
        linepay: linepay.map(|c| Arc::new(LinePayGateway::new(client, c))),
        ecpay: ecpay.map(|c| Arc::new(EcPayGateway::new(c))),
        reminder_policy: ReminderPolicy::default(),
        public_base_url: BASE_URL.to_string(),
        linepay_in_flight: Default::default(),
    };
    TestApp {
        router: router(state),
        ledger,
        clock,
        notifier,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, fields: &BTreeMap<String, String>) -> Response<Body> {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(
            Request::post(uri)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Creates orders through the API and returns their ids.
    pub async fn request_payment(&self, gateway: &str, amount: u32) -> Vec<String> {
        let response = self
            .post_json(
                "/payment/request",
                json!({ "userId": "U123", "userName": "Amy", "amount": amount, "type": gateway }),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body = json_body(response).await;
        body["orders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["orderId"].as_str().unwrap().to_string())
            .collect()
    }
}

pub async fn text_body(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    serde_json::from_str(&text_body(response).await).unwrap()
}

/// A successful ECPay server-to-server notification, signed with the stage key.
pub fn ecpay_callback(order_id: &str, rtn_code: &str) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = [
        ("MerchantID", "3002607"),
        ("MerchantTradeNo", order_id),
        ("PaymentDate", "2026/03/01 10:05:00"),
        ("PaymentType", "Credit_CreditCard"),
        ("PaymentTypeChargeFee", "10"),
        ("RtnCode", rtn_code),
        ("RtnMsg", "交易成功"),
        ("SimulatePaid", "0"),
        ("TradeAmt", "500"),
        ("TradeDate", "2026/03/01 10:00:00"),
        ("TradeNo", "2603011000001234"),
        ("CustomField1", "U123"),
        ("CustomField2", "Amy"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let mac = check_mac_value(&fields, ECPAY_KEY, ECPAY_IV);
    fields.insert("CheckMacValue".to_string(), mac);
    fields
}
