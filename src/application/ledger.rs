use crate::domain::order::{Amount, Order, OrderStatus};
use crate::domain::payment::PaymentMethod;
use crate::domain::ports::{OrderStoreBox, SharedClock};
use crate::error::{NotifyError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Conditional writes give up after this many lost races.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Result of a paid transition. `applied` is true for exactly one caller per order.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub applied: bool,
    pub order: Order,
}

/// When an unpaid order becomes eligible for a (repeat) reminder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReminderPolicy {
    pub initial_delay: Duration,
    pub repeat_interval: Duration,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::days(2),
            repeat_interval: Duration::days(2),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatistics {
    pub total: usize,
    pub pending: usize,
    pub paid: usize,
    pub expired: usize,
    pub need_reminder: usize,
}

/// Owns every order mutation.
///
/// All state changes go through `compare_and_swap` on the injected store: the
/// ledger reads a record, applies the domain transition to a copy and retries
/// from a fresh read if another writer changed the record in between.
pub struct OrderLedger {
    store: OrderStoreBox,
    clock: SharedClock,
    ttl: Duration,
}

impl OrderLedger {
    pub fn new(store: OrderStoreBox, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(
        &self,
        order_id: &str,
        user_id: &str,
        user_name: &str,
        amount: Amount,
    ) -> Result<Order> {
        if order_id.trim().is_empty() {
            return Err(NotifyError::Validation("orderId is required".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(NotifyError::Validation("userId is required".to_string()));
        }
        let order = Order::new(order_id, user_id, user_name, amount, self.now(), self.ttl);
        self.store.insert(order.clone()).await?;
        tracing::info!(order_id, user_id, %amount, "Order created");
        Ok(order)
    }

    pub async fn get(&self, order_id: &str) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| NotifyError::NotFound(format!("Order {}", order_id)))
    }

    /// Re-reads and re-applies `mutate` until the swap lands.
    async fn update<F>(&self, order_id: &str, mutate: F) -> Result<Order>
    where
        F: Fn(&mut Order, DateTime<Utc>) -> Result<()>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(order_id).await?;
            let mut next = current.clone();
            mutate(&mut next, self.now())?;
            if self.store.compare_and_swap(&current, next.clone()).await? {
                return Ok(next);
            }
            tracing::debug!(order_id, "Concurrent update detected, retrying");
        }
        Err(NotifyError::Persistence(format!(
            "Gave up updating order {} after {} attempts",
            order_id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Flips a pending, unexpired order to paid.
    ///
    /// A second call for an already paid order is a no-op that returns the
    /// stored record with `applied = false`.
    pub async fn transition_to_paid(
        &self,
        order_id: &str,
        method: PaymentMethod,
    ) -> Result<Transition> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get(order_id).await?;
            if current.status == OrderStatus::Paid {
                return Ok(Transition {
                    applied: false,
                    order: current,
                });
            }
            let mut next = current.clone();
            next.mark_paid(method, self.now())?;
            if self.store.compare_and_swap(&current, next.clone()).await? {
                tracing::info!(order_id, %method, "Order marked paid");
                return Ok(Transition {
                    applied: true,
                    order: next,
                });
            }
            tracing::debug!(order_id, "Lost paid-transition race, re-reading");
        }
        Err(NotifyError::Persistence(format!(
            "Gave up marking order {} paid after {} attempts",
            order_id, MAX_CAS_ATTEMPTS
        )))
    }

    pub async fn record_payment_attempt(
        &self,
        order_id: &str,
        transaction_id: &str,
        payment_url: &str,
    ) -> Result<Order> {
        self.update(order_id, |order, now| {
            order.record_payment_attempt(transaction_id, payment_url, now)
        })
        .await
    }

    pub async fn renew(&self, order_id: &str) -> Result<Order> {
        let ttl = self.ttl;
        let order = self
            .update(order_id, |order, now| order.renew(now, ttl))
            .await?;
        tracing::info!(order_id, expiry = %order.expiry_time, "Order renewed");
        Ok(order)
    }

    pub async fn remove(&self, order_id: &str) -> Result<bool> {
        let removed = self.store.delete(order_id).await?;
        if removed {
            tracing::info!(order_id, "Order removed");
        }
        Ok(removed)
    }

    pub async fn mark_reminder_sent(&self, order_id: &str, at: DateTime<Utc>) -> Result<Order> {
        self.update(order_id, |order, _| order.mark_reminder_sent(at))
            .await
    }

    pub async fn list_needing_reminder(
        &self,
        now: DateTime<Utc>,
        initial_delay: Duration,
        repeat_interval: Duration,
    ) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|o| o.needs_reminder(now, initial_delay, repeat_interval))
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    /// Deletes unpaid orders whose deadline has passed. Paid orders are never touched.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for order in self.store.all().await? {
            if !order.is_sweepable(now) {
                continue;
            }
            // A concurrent renew or payment makes the record differ and keeps it.
            if self.store.delete_if(&order).await? {
                tracing::info!(order_id = %order.order_id, "Expired order swept");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// All orders, newest first.
    pub async fn list(&self) -> Result<Vec<Order>> {
        let mut orders = self.store.all().await?;
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(orders)
    }

    /// Filters on the status an operator would see, so `expired` includes
    /// pending orders past their deadline that have not been swept yet.
    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let now = self.now();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|o| o.effective_status(now) == status)
            .collect())
    }

    pub async fn list_pending(&self) -> Result<Vec<Order>> {
        self.list_by_status(OrderStatus::Pending).await
    }

    pub async fn statistics(&self, policy: &ReminderPolicy) -> Result<OrderStatistics> {
        let now = self.now();
        let orders = self.store.all().await?;
        let mut stats = OrderStatistics {
            total: orders.len(),
            ..OrderStatistics::default()
        };
        for order in &orders {
            match order.effective_status(now) {
                OrderStatus::Pending => stats.pending += 1,
                OrderStatus::Paid => stats.paid += 1,
                OrderStatus::Expired => stats.expired += 1,
            }
            if order.needs_reminder(now, policy.initial_delay, policy.repeat_interval) {
                stats.need_reminder += 1;
            }
        }
        Ok(stats)
    }

    pub async fn find_pending_by_user_and_amount(
        &self,
        user_id: &str,
        amount: Amount,
    ) -> Result<Vec<Order>> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|o| o.user_id == user_id && o.amount == amount)
            .collect())
    }
}
