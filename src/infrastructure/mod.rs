//! Adapters behind the domain ports: storage backends, clocks and outbound HTTP clients.

pub mod clock;
pub mod ecpay;
pub mod in_memory;
pub mod inventory;
pub mod json_file;
pub mod line;
pub mod linepay;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;

use crate::error::Result;
use std::time::Duration;

/// Builds the shared outbound client; `timeout` aborts the whole request, body included.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Into::into)
}
