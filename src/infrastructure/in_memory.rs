use crate::domain::order::Order;
use crate::domain::pickup::PickupTrackItem;
use crate::domain::ports::{OrderStore, PickupStore};
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for orders.
///
/// Uses `Arc<RwLock<HashMap<String, Order>>>` to allow shared concurrent access.
/// Conditional writes are checked and applied under the same write guard.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_id) {
            return Err(NotifyError::DuplicateId(order.order_id));
        }
        orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(order_id).cloned())
    }

    async fn compare_and_swap(&self, expected: &Order, new: Order) -> Result<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&expected.order_id) {
            Some(current) if current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, order_id: &str) -> Result<bool> {
        let mut orders = self.orders.write().await;
        Ok(orders.remove(order_id).is_some())
    }

    async fn delete_if(&self, expected: &Order) -> Result<bool> {
        let mut orders = self.orders.write().await;
        if orders.get(&expected.order_id) == Some(expected) {
            orders.remove(&expected.order_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn all(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.values().cloned().collect())
    }
}

/// Holds the pickup tracking snapshot in memory.
#[derive(Default, Clone)]
pub struct InMemoryPickupStore {
    items: Arc<RwLock<Vec<PickupTrackItem>>>,
}

impl InMemoryPickupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PickupStore for InMemoryPickupStore {
    async fn load(&self) -> Result<Vec<PickupTrackItem>> {
        Ok(self.items.read().await.clone())
    }

    async fn save(&self, items: &[PickupTrackItem]) -> Result<()> {
        let mut stored = self.items.write().await;
        *stored = items.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Amount;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn order(id: &str) -> Order {
        Order::new(
            id,
            "U1",
            "Amy",
            Amount::new(dec!(100)).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Duration::days(7),
        )
    }

    #[tokio::test]
    async fn test_in_memory_order_store() {
        let store = InMemoryOrderStore::new();
        store.insert(order("EC1")).await.unwrap();

        let retrieved = store.get("EC1").await.unwrap().unwrap();
        assert_eq!(retrieved, order("EC1"));
        assert!(store.get("EC2").await.unwrap().is_none());

        let duplicate = store.insert(order("EC1")).await;
        assert!(matches!(duplicate, Err(NotifyError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_expected() {
        let store = InMemoryOrderStore::new();
        let original = order("EC1");
        store.insert(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.retry_count = 1;
        assert!(store.compare_and_swap(&original, first.clone()).await.unwrap());

        let mut stale = original.clone();
        stale.retry_count = 9;
        assert!(!store.compare_and_swap(&original, stale).await.unwrap());
        assert_eq!(store.get("EC1").await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_delete_if_checks_current_record() {
        let store = InMemoryOrderStore::new();
        let original = order("EC1");
        store.insert(original.clone()).await.unwrap();

        let mut changed = original.clone();
        changed.retry_count = 2;
        store.compare_and_swap(&original, changed.clone()).await.unwrap();

        assert!(!store.delete_if(&original).await.unwrap());
        assert!(store.delete_if(&changed).await.unwrap());
        assert!(!store.delete("EC1").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_pickup_store_snapshot() {
        let store = InMemoryPickupStore::new();
        assert!(store.load().await.unwrap().is_empty());
        let item = PickupTrackItem {
            item_id: "R-1".to_string(),
            hang_timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            picked: false,
            first_seen_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap(),
            last_notified_at: None,
            notified_count: 0,
        };
        store.save(std::slice::from_ref(&item)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), vec![item]);
        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
