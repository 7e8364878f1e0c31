use crate::application::scheduler::{PeriodicTask, SingleFlight, TickOutcome};
use crate::domain::pickup::PickupTrackItem;
use crate::domain::ports::{InventorySource, PickupStoreBox, SharedClock, SharedNotifier};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PickupSettings {
    pub admin_user_id: String,
    pub notify_threshold: Duration,
    pub repeat_interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PickupReport {
    pub observed: usize,
    pub tracked: usize,
    pub notified: usize,
    pub failed: usize,
    /// Reported picked up, or gone from the feed.
    pub removed: usize,
}

/// Polls the inventory feed and tells the operator about items left waiting.
pub struct PickupTracker {
    inventory: Arc<dyn InventorySource>,
    store: PickupStoreBox,
    notifier: SharedNotifier,
    clock: SharedClock,
    settings: PickupSettings,
    guard: SingleFlight,
}

impl PickupTracker {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        store: PickupStoreBox,
        notifier: SharedNotifier,
        clock: SharedClock,
        settings: PickupSettings,
    ) -> Self {
        Self {
            inventory,
            store,
            notifier,
            clock,
            settings,
            guard: SingleFlight::new(),
        }
    }

    /// Current tracking set as last persisted.
    pub async fn items(&self) -> Result<Vec<PickupTrackItem>> {
        self.store.load().await
    }

    /// One poll-compare-notify pass. A tick already in flight makes this a no-op.
    pub async fn tick(&self) -> Result<TickOutcome<PickupReport>> {
        let Some(_running) = self.guard.try_enter() else {
            tracing::debug!("Pickup tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        let observations = self.inventory.poll().await?;
        let now = self.clock.now();
        let mut previous: HashMap<String, PickupTrackItem> = self
            .store
            .load()
            .await?
            .into_iter()
            .map(|item| (item.item_id.clone(), item))
            .collect();

        let mut report = PickupReport {
            observed: observations.len(),
            ..PickupReport::default()
        };
        let mut seen = HashSet::new();
        let mut tracked = Vec::new();
        for observation in &observations {
            if !seen.insert(observation.item_id.clone()) {
                continue;
            }
            if observation.picked {
                if previous.remove(&observation.item_id).is_some() {
                    tracing::info!(item_id = %observation.item_id, "Item picked up, tracking stopped");
                    report.removed += 1;
                }
                continue;
            }
            let item = match previous.remove(&observation.item_id) {
                Some(mut item) => {
                    item.observe(observation);
                    item
                }
                None => PickupTrackItem::seed(observation, now),
            };
            tracked.push(item);
        }
        // Whatever the feed no longer lists is no longer waiting.
        for item_id in previous.keys() {
            tracing::debug!(%item_id, "Item left the feed, tracking stopped");
        }
        report.removed += previous.len();

        for item in tracked.iter_mut() {
            if !item.is_due(now, self.settings.notify_threshold, self.settings.repeat_interval) {
                continue;
            }
            let text = pickup_message(item, now);
            match self.notifier.push(&self.settings.admin_user_id, &text).await {
                Ok(()) => {
                    item.record_notification(now);
                    report.notified += 1;
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.item_id, error = %e, "Pickup notification failed");
                    report.failed += 1;
                }
            }
        }

        report.tracked = tracked.len();
        self.store.save(&tracked).await?;
        tracing::info!(
            observed = report.observed,
            tracked = report.tracked,
            notified = report.notified,
            removed = report.removed,
            "Pickup tick finished"
        );
        Ok(TickOutcome::Ran(report))
    }
}

#[async_trait]
impl PeriodicTask for PickupTracker {
    fn name(&self) -> &'static str {
        "pickup-tracker"
    }

    async fn run_once(&self) -> Result<()> {
        self.tick().await.map(|_| ())
    }
}

fn pickup_message(item: &PickupTrackItem, now: DateTime<Utc>) -> String {
    format!(
        "📦 取件提醒\n\n單號 {} 已完成 {} 分鐘仍未取件\n🔔 第 {} 次通知",
        item.item_id,
        item.waiting_for(now).num_minutes(),
        item.notified_count + 1
    )
}
