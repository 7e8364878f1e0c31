use crate::application::ledger::ReminderPolicy;
use crate::application::pickup::PickupSettings;
use crate::error::{NotifyError, Result};
use crate::infrastructure::ecpay::{DEFAULT_ECPAY_CHECKOUT_URL, EcPayConfig};
use crate::infrastructure::line::DEFAULT_LINE_API_URL;
use crate::infrastructure::linepay::{DEFAULT_LINEPAY_API_URL, LinePayConfig};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

fn seconds(value: u32) -> chrono::Duration {
    chrono::Duration::seconds(i64::from(value))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Where orders and the pickup snapshot live.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Directory for the JSON-file backend.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Path to a RocksDB database. Takes precedence over `--data-dir` when the
    /// binary is built with the `storage-rocksdb` feature.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// How long a new order stays payable.
    #[arg(long, env = "ORDER_TTL_SECS", default_value_t = 604_800)]
    pub order_ttl_secs: u32,
}

impl StorageArgs {
    pub fn order_ttl(&self) -> chrono::Duration {
        seconds(self.order_ttl_secs)
    }
}

/// Settings for `serve`. Every flag falls back to its environment variable.
#[derive(Args, Debug, Clone)]
pub struct Config {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Public origin used in pay links and gateway redirects.
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://127.0.0.1:3000")]
    pub public_base_url: String,

    #[arg(long, env = "REMINDER_INITIAL_DELAY_SECS", default_value_t = 172_800)]
    pub reminder_initial_delay_secs: u32,

    #[arg(long, env = "REMINDER_REPEAT_INTERVAL_SECS", default_value_t = 172_800)]
    pub reminder_repeat_interval_secs: u32,

    #[arg(long, env = "REMINDER_PERIOD_SECS", default_value_t = 3_600)]
    pub reminder_period_secs: u32,

    #[arg(long, env = "JANITOR_PERIOD_SECS", default_value_t = 86_400)]
    pub janitor_period_secs: u32,

    #[arg(long, env = "PICKUP_POLL_PERIOD_SECS", default_value_t = 60)]
    pub pickup_poll_period_secs: u32,

    #[arg(long, env = "PICKUP_NOTIFY_THRESHOLD_SECS", default_value_t = 600)]
    pub pickup_notify_threshold_secs: u32,

    #[arg(long, env = "PICKUP_REPEAT_INTERVAL_SECS", default_value_t = 7_200)]
    pub pickup_repeat_interval_secs: u32,

    /// Inventory feed polled by the pickup tracker. Required.
    #[arg(long, env = "INVENTORY_ENDPOINT")]
    pub inventory_endpoint: Option<String>,

    #[arg(long, env = "INVENTORY_TOKEN", hide_env_values = true)]
    pub inventory_token: Option<String>,

    /// LINE user id that receives operator notifications. Required.
    #[arg(long, env = "ADMIN_USER_ID")]
    pub admin_user_id: Option<String>,

    #[arg(long, env = "LINE_CHANNEL_ACCESS_TOKEN", hide_env_values = true, default_value = "")]
    pub line_channel_access_token: String,

    #[arg(long, env = "LINE_API_URL", default_value = DEFAULT_LINE_API_URL)]
    pub line_api_url: String,

    #[arg(long, env = "LINEPAY_API_URL", default_value = DEFAULT_LINEPAY_API_URL)]
    pub linepay_api_url: String,

    #[arg(long, env = "LINEPAY_CHANNEL_ID")]
    pub linepay_channel_id: Option<String>,

    #[arg(long, env = "LINEPAY_CHANNEL_SECRET", hide_env_values = true)]
    pub linepay_channel_secret: Option<String>,

    #[arg(long, env = "ECPAY_MERCHANT_ID")]
    pub ecpay_merchant_id: Option<String>,

    #[arg(long, env = "ECPAY_HASH_KEY", hide_env_values = true)]
    pub ecpay_hash_key: Option<String>,

    #[arg(long, env = "ECPAY_HASH_IV", hide_env_values = true)]
    pub ecpay_hash_iv: Option<String>,

    #[arg(long, env = "ECPAY_CHECKOUT_URL", default_value = DEFAULT_ECPAY_CHECKOUT_URL)]
    pub ecpay_checkout_url: String,

    /// Hard limit on every outbound call (gateways, inventory, push).
    #[arg(long, env = "OUTBOUND_TIMEOUT_SECS", default_value_t = 15)]
    pub outbound_timeout_secs: u32,
}

impl Config {
    pub fn reminder_policy(&self) -> ReminderPolicy {
        ReminderPolicy {
            initial_delay: seconds(self.reminder_initial_delay_secs),
            repeat_interval: seconds(self.reminder_repeat_interval_secs),
        }
    }

    /// The pickup path cannot run without an admin target and a feed.
    pub fn pickup_settings(&self) -> Result<PickupSettings> {
        let admin_user_id = non_empty(&self.admin_user_id)
            .ok_or_else(|| NotifyError::Config("ADMIN_USER_ID must be set".to_string()))?;
        non_empty(&self.inventory_endpoint)
            .ok_or_else(|| NotifyError::Config("INVENTORY_ENDPOINT must be set".to_string()))?;
        Ok(PickupSettings {
            admin_user_id: admin_user_id.to_string(),
            notify_threshold: seconds(self.pickup_notify_threshold_secs),
            repeat_interval: seconds(self.pickup_repeat_interval_secs),
        })
    }

    pub fn inventory_endpoint(&self) -> Result<&str> {
        non_empty(&self.inventory_endpoint)
            .ok_or_else(|| NotifyError::Config("INVENTORY_ENDPOINT must be set".to_string()))
    }

    pub fn reminder_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.reminder_period_secs.max(1)))
    }

    pub fn janitor_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.janitor_period_secs.max(1)))
    }

    pub fn pickup_poll_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.pickup_poll_period_secs.max(1)))
    }

    pub fn outbound_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.outbound_timeout_secs.max(1)))
    }

    /// `None` leaves the LINE Pay routes unmounted.
    pub fn linepay(&self) -> Option<LinePayConfig> {
        Some(LinePayConfig {
            api_url: self.linepay_api_url.clone(),
            channel_id: non_empty(&self.linepay_channel_id)?.to_string(),
            channel_secret: non_empty(&self.linepay_channel_secret)?.to_string(),
            public_base_url: self.public_base_url.clone(),
        })
    }

    /// `None` leaves the ECPay routes unmounted; callbacks are never accepted unverified.
    pub fn ecpay(&self) -> Option<EcPayConfig> {
        Some(EcPayConfig {
            merchant_id: non_empty(&self.ecpay_merchant_id)?.to_string(),
            hash_key: non_empty(&self.ecpay_hash_key)?.to_string(),
            hash_iv: non_empty(&self.ecpay_hash_iv)?.to_string(),
            checkout_url: self.ecpay_checkout_url.clone(),
            public_base_url: self.public_base_url.clone(),
        })
    }
}
