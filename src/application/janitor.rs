use crate::application::ledger::OrderLedger;
use crate::application::scheduler::PeriodicTask;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Deletes unpaid orders once their deadline has passed.
pub struct ExpiryJanitor {
    ledger: Arc<OrderLedger>,
}

impl ExpiryJanitor {
    pub fn new(ledger: Arc<OrderLedger>) -> Self {
        Self { ledger }
    }

    pub async fn sweep(&self) -> Result<usize> {
        let removed = self.ledger.sweep_expired(self.ledger.now()).await?;
        tracing::info!(removed, "Expired orders swept");
        Ok(removed)
    }
}

#[async_trait]
impl PeriodicTask for ExpiryJanitor {
    fn name(&self) -> &'static str {
        "expiry-janitor"
    }

    async fn run_once(&self) -> Result<()> {
        self.sweep().await.map(|_| ())
    }
}
