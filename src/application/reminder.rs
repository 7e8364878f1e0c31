use crate::application::ledger::{OrderLedger, ReminderPolicy};
use crate::application::scheduler::{PeriodicTask, SingleFlight, TickOutcome};
use crate::domain::order::Order;
use crate::domain::payment::pay_link;
use crate::domain::ports::SharedNotifier;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub sent: usize,
    pub failed: usize,
}

/// Nudges users about orders they have not paid yet.
///
/// Delivery is at-least-once: an order is only marked reminded after its push
/// succeeded, so a crash in between repeats that reminder on a later tick.
pub struct ReminderScheduler {
    ledger: Arc<OrderLedger>,
    notifier: SharedNotifier,
    policy: ReminderPolicy,
    public_base_url: String,
    guard: SingleFlight,
}

impl ReminderScheduler {
    pub fn new(
        ledger: Arc<OrderLedger>,
        notifier: SharedNotifier,
        policy: ReminderPolicy,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            notifier,
            policy,
            public_base_url: public_base_url.into(),
            guard: SingleFlight::new(),
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome<ReminderReport>> {
        let Some(_running) = self.guard.try_enter() else {
            tracing::debug!("Reminder tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        let now = self.ledger.now();
        let due = self
            .ledger
            .list_needing_reminder(now, self.policy.initial_delay, self.policy.repeat_interval)
            .await?;

        let mut report = ReminderReport::default();
        for order in due {
            let text = reminder_message(&order, &self.public_base_url, now);
            if let Err(e) = self.notifier.push(&order.user_id, &text).await {
                tracing::warn!(order_id = %order.order_id, error = %e, "Reminder push failed");
                report.failed += 1;
                continue;
            }
            match self.ledger.mark_reminder_sent(&order.order_id, now).await {
                Ok(_) => report.sent += 1,
                // Paid or removed while the push was in flight.
                Err(e) => {
                    tracing::warn!(order_id = %order.order_id, error = %e, "Could not mark reminder sent");
                    report.failed += 1;
                }
            }
        }

        if report.sent + report.failed > 0 {
            tracing::info!(sent = report.sent, failed = report.failed, "Reminders dispatched");
        }
        Ok(TickOutcome::Ran(report))
    }
}

#[async_trait]
impl PeriodicTask for ReminderScheduler {
    fn name(&self) -> &'static str {
        "payment-reminder"
    }

    async fn run_once(&self) -> Result<()> {
        self.tick().await.map(|_| ())
    }
}

fn reminder_message(order: &Order, public_base_url: &str, now: DateTime<Utc>) -> String {
    let remaining_days = order.remaining(now).num_days();
    format!(
        "😊 付款提醒\n\n親愛的 {} 您好，您的訂單尚未付款\n📋 訂單編號: {}\n💰 金額: NT$ {}\n⏳ 付款期限還剩 {} 天\n\n👉 付款連結: {}",
        order.user_name,
        order.order_id,
        order.amount,
        remaining_days,
        pay_link(public_base_url, &order.order_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Amount;
    use crate::domain::ports::Notifier;
    use crate::error::NotifyError;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryOrderStore;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Fails every push addressed to `fail_for`.
    struct Flaky {
        fail_for: String,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn push(&self, user_id: &str, text: &str) -> Result<()> {
            if user_id == self.fail_for {
                return Err(NotifyError::Gateway("push rejected".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_push_does_not_block_others() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let ledger = Arc::new(OrderLedger::new(
            Box::new(InMemoryOrderStore::new()),
            Arc::new(clock.clone()),
            Duration::days(7),
        ));
        let amount = Amount::new(dec!(500)).unwrap();
        ledger.create("EC1", "U-bad", "Amy", amount).await.unwrap();
        ledger.create("LP2", "U-good", "Bob", amount).await.unwrap();

        let notifier = Arc::new(Flaky {
            fail_for: "U-bad".to_string(),
            sent: Mutex::new(Vec::new()),
        });
        let scheduler = ReminderScheduler::new(
            ledger.clone(),
            notifier.clone(),
            ReminderPolicy::default(),
            "https://bot.example.com",
        );

        clock.advance(Duration::days(3));
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report, TickOutcome::Ran(ReminderReport { sent: 1, failed: 1 }));

        let sent = notifier.sent.lock().unwrap().clone();
        assert!(sent[0].contains("https://bot.example.com/payment/linepay/pay/LP2"));
        assert!(sent[0].contains("還剩 4 天"));

        assert!(ledger.get("EC1").await.unwrap().last_reminder_sent.is_none());
        assert!(ledger.get("LP2").await.unwrap().last_reminder_sent.is_some());

        // Only the failed order is retried.
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report, TickOutcome::Ran(ReminderReport { sent: 0, failed: 1 }));
    }
}
