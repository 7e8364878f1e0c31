use super::order::Order;
use super::payment::{GatewayOutcome, GatewaySignal, PaymentMethod};
use super::pickup::{PickupObservation, PickupTrackItem};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Durable keyed storage for orders.
///
/// Conditional writes compare the whole stored record against `expected`; a
/// mismatch means another writer got there first and the caller must re-read.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `DuplicateId` if the id is taken.
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, order_id: &str) -> Result<Option<Order>>;
    async fn compare_and_swap(&self, expected: &Order, new: Order) -> Result<bool>;
    async fn delete(&self, order_id: &str) -> Result<bool>;
    async fn delete_if(&self, expected: &Order) -> Result<bool>;
    async fn all(&self) -> Result<Vec<Order>>;
}

/// Snapshot storage for the pickup tracking set.
#[async_trait]
pub trait PickupStore: Send + Sync {
    async fn load(&self) -> Result<Vec<PickupTrackItem>>;
    /// Replaces the whole tracking set.
    async fn save(&self, items: &[PickupTrackItem]) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, user_id: &str, text: &str) -> Result<()>;
}

/// External source of truth for items ready for pickup.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn poll(&self) -> Result<Vec<PickupObservation>>;
}

/// Reconciliation capabilities of a payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Locates the order a signal refers to.
    fn order_id(&self, signal: &GatewaySignal) -> Result<String>;

    /// Integrity check on the raw signal; fails with `Signature`.
    fn verify_inbound_signal(&self, signal: &GatewaySignal, order: &Order) -> Result<()>;

    /// Final outcome of the payment, possibly asking the provider first.
    async fn extract_outcome(&self, signal: &GatewaySignal, order: &Order)
    -> Result<GatewayOutcome>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type OrderStoreBox = Box<dyn OrderStore>;
pub type PickupStoreBox = Box<dyn PickupStore>;
pub type SharedNotifier = Arc<dyn Notifier>;
pub type SharedClock = Arc<dyn Clock>;
