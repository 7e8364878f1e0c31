use crate::domain::order::Order;
use crate::domain::pickup::PickupTrackItem;
use crate::domain::ports::{OrderStore, PickupStore};
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing orders, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for the pickup tracking snapshot, keyed by item id.
pub const CF_PICKUP: &str = "pickup";

/// A persistent store implementation using RocksDB.
///
/// Handles storage for both `Order` and `PickupTrackItem` records using
/// separate Column Families. Conditional writes run under a store-wide mutex so
/// the read-compare-put sequence cannot interleave with another writer.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(NotifyError::from)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| NotifyError::Persistence(format!("Deserialization error: {}", e)))
}

impl From<rocksdb::Error> for NotifyError {
    fn from(err: rocksdb::Error) -> Self {
        NotifyError::Persistence(err.to_string())
    }
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("orders" and "pickup") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_orders = ColumnFamilyDescriptor::new(CF_ORDERS, Options::default());
        let cf_pickup = ColumnFamilyDescriptor::new(CF_PICKUP, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_orders, cf_pickup])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| NotifyError::Persistence(format!("{} column family not found", name)))
    }

    fn read_order(&self, order_id: &str) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_cf(cf, order_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_order(&order.order_id)?.is_some() {
            return Err(NotifyError::DuplicateId(order.order_id));
        }
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, order.order_id.as_bytes(), encode(&order)?)?;
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        self.read_order(order_id)
    }

    async fn compare_and_swap(&self, expected: &Order, new: Order) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read_order(&expected.order_id)?.as_ref() != Some(expected) {
            return Ok(false);
        }
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, expected.order_id.as_bytes(), encode(&new)?)?;
        Ok(true)
    }

    async fn delete(&self, order_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read_order(order_id)?.is_none() {
            return Ok(false);
        }
        let cf = self.cf(CF_ORDERS)?;
        self.db.delete_cf(cf, order_id.as_bytes())?;
        Ok(true)
    }

    async fn delete_if(&self, expected: &Order) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.read_order(&expected.order_id)?.as_ref() != Some(expected) {
            return Ok(false);
        }
        let cf = self.cf(CF_ORDERS)?;
        self.db.delete_cf(cf, expected.order_id.as_bytes())?;
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS)
    }
}

#[async_trait]
impl PickupStore for RocksDBStore {
    async fn load(&self) -> Result<Vec<PickupTrackItem>> {
        self.scan(CF_PICKUP)
    }

    /// Replaces the snapshot in one atomic write batch.
    async fn save(&self, items: &[PickupTrackItem]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PICKUP)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = item?;
            batch.delete_cf(cf, key);
        }
        for item in items {
            batch.put_cf(cf, item.item_id.as_bytes(), encode(item)?);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
