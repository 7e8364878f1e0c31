use crate::domain::order::Order;
use crate::domain::pickup::PickupTrackItem;
use crate::domain::ports::{OrderStore, PickupStore};
use crate::error::{NotifyError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const ORDERS_FILE: &str = "orders.json";
pub const PICKUP_FILE: &str = "pickup-tracker.json";

fn read_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            NotifyError::Persistence(format!("Corrupt data file {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes and fsyncs a sibling file, then renames it over the target, so a
/// crash leaves either the old or the new contents on disk.
async fn write_atomically<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    let write_err = |e: std::io::Error| NotifyError::Persistence(format!("Write {}: {}", tmp.display(), e));

    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    file.write_all(&bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| NotifyError::Persistence(format!("Rename {}: {}", path.display(), e)))?;
    sync_parent_dir(path).await
}

/// Makes the rename itself durable.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    tokio::fs::File::open(dir)
        .await?
        .sync_all()
        .await
        .map_err(|e| NotifyError::Persistence(format!("Sync {}: {}", dir.display(), e)))
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Order store backed by a single JSON array rewritten on every change.
///
/// The mutex serializes writers; the in-memory copy is only replaced after
/// the new file has been synced and renamed into place, so a failed write leaves both unchanged.
#[derive(Clone)]
pub struct JsonFileOrderStore {
    path: PathBuf,
    orders: Arc<Mutex<BTreeMap<String, Order>>>,
}

impl JsonFileOrderStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(ORDERS_FILE);
        let orders = read_collection::<Order>(&path)?
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect();
        Ok(Self {
            path,
            orders: Arc::new(Mutex::new(orders)),
        })
    }

    async fn persist(
        &self,
        next: BTreeMap<String, Order>,
        current: &mut BTreeMap<String, Order>,
    ) -> Result<()> {
        let records: Vec<&Order> = next.values().collect();
        write_atomically(&self.path, &records).await?;
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for JsonFileOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.lock().await;
        if orders.contains_key(&order.order_id) {
            return Err(NotifyError::DuplicateId(order.order_id));
        }
        let mut next = orders.clone();
        next.insert(order.order_id.clone(), order);
        self.persist(next, &mut orders).await
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn compare_and_swap(&self, expected: &Order, new: Order) -> Result<bool> {
        let mut orders = self.orders.lock().await;
        if orders.get(&expected.order_id) != Some(expected) {
            return Ok(false);
        }
        let mut next = orders.clone();
        next.insert(expected.order_id.clone(), new);
        self.persist(next, &mut orders).await?;
        Ok(true)
    }

    async fn delete(&self, order_id: &str) -> Result<bool> {
        let mut orders = self.orders.lock().await;
        if !orders.contains_key(order_id) {
            return Ok(false);
        }
        let mut next = orders.clone();
        next.remove(order_id);
        self.persist(next, &mut orders).await?;
        Ok(true)
    }

    async fn delete_if(&self, expected: &Order) -> Result<bool> {
        let mut orders = self.orders.lock().await;
        if orders.get(&expected.order_id) != Some(expected) {
            return Ok(false);
        }
        let mut next = orders.clone();
        next.remove(&expected.order_id);
        self.persist(next, &mut orders).await?;
        Ok(true)
    }

    async fn all(&self) -> Result<Vec<Order>> {
        Ok(self.orders.lock().await.values().cloned().collect())
    }
}

/// Pickup tracking snapshot kept in one JSON file.
#[derive(Clone)]
pub struct JsonFilePickupStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFilePickupStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(PICKUP_FILE);
        // Surface corruption at startup instead of on the first tick.
        read_collection::<PickupTrackItem>(&path)?;
        Ok(Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

#[async_trait]
impl PickupStore for JsonFilePickupStore {
    async fn load(&self) -> Result<Vec<PickupTrackItem>> {
        let _guard = self.write_lock.lock().await;
        read_collection(&self.path)
    }

    async fn save(&self, items: &[PickupTrackItem]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomically(&self.path, items).await
    }
}
