//! Persistence port and in-memory implementation
//!
//! The store owns every resource record. The request layer writes provisional
//! (transitional) states synchronously before dispatch; the orchestrator
//! writes exactly one terminal state per background operation. Correctness
//! relies on the store's per-record update semantics, not on in-memory locks
//! shared with callers.

use crate::domain::model::{Attachment, Pool, Snapshot, Volume};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// key -> accepted values query map for filtered listings
pub type Filter = BTreeMap<String, Vec<String>>;

// =============================================================================
// Resource Store Port
// =============================================================================

/// CRUD plus filtered listing per resource kind.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create_volume(&self, volume: &Volume) -> Result<Volume>;
    async fn get_volume(&self, id: &str) -> Result<Volume>;
    async fn list_volumes(&self) -> Result<Vec<Volume>>;
    async fn list_volumes_with_filter(&self, filter: &Filter) -> Result<Vec<Volume>>;
    async fn update_volume(&self, volume: &Volume) -> Result<Volume>;
    async fn delete_volume(&self, id: &str) -> Result<()>;

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot>;
    async fn get_snapshot(&self, id: &str) -> Result<Snapshot>;
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>>;
    async fn list_snapshots_with_filter(&self, filter: &Filter) -> Result<Vec<Snapshot>>;
    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot>;
    async fn delete_snapshot(&self, id: &str) -> Result<()>;

    async fn create_attachment(&self, attachment: &Attachment) -> Result<Attachment>;
    async fn get_attachment(&self, id: &str) -> Result<Attachment>;
    async fn list_attachments(&self) -> Result<Vec<Attachment>>;
    async fn list_attachments_with_filter(&self, filter: &Filter) -> Result<Vec<Attachment>>;
    async fn update_attachment(&self, attachment: &Attachment) -> Result<Attachment>;
    async fn delete_attachment(&self, id: &str) -> Result<()>;

    async fn upsert_pool(&self, pool: &Pool) -> Result<Pool>;
    async fn get_pool(&self, id: &str) -> Result<Pool>;
    async fn get_pool_by_name(&self, name: &str) -> Result<Pool>;
    async fn list_pools(&self) -> Result<Vec<Pool>>;
    async fn delete_pool(&self, id: &str) -> Result<()>;
}

pub type ResourceStoreRef = Arc<dyn ResourceStore>;

// =============================================================================
// Filter Matching
// =============================================================================

/// Whether a serializable record matches every key of the query map. A record
/// field matches when its JSON rendering equals any of the accepted values.
fn matches_filter<T: serde::Serialize>(record: &T, filter: &Filter) -> bool {
    let value = match serde_json::to_value(record) {
        Ok(v) => v,
        Err(_) => return false,
    };
    filter.iter().all(|(key, accepted)| {
        let field = match value.get(key) {
            Some(f) => f,
            None => return false,
        };
        let rendered = match field {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        accepted.iter().any(|want| want == &rendered)
    })
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory resource store backing tests and the standalone binary.
#[derive(Default)]
pub struct MemoryStore {
    volumes: RwLock<BTreeMap<String, Volume>>,
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
    attachments: RwLock<BTreeMap<String, Attachment>>,
    pools: RwLock<BTreeMap<String, Pool>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create_volume(&self, volume: &Volume) -> Result<Volume> {
        let mut volumes = self.volumes.write().await;
        if volumes.contains_key(&volume.id) {
            return Err(Error::AlreadyExists {
                kind: "volume".into(),
                name: volume.id.clone(),
            });
        }
        volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume.clone())
    }

    async fn get_volume(&self, id: &str) -> Result<Volume> {
        self.volumes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", id))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.volumes.read().await.values().cloned().collect())
    }

    async fn list_volumes_with_filter(&self, filter: &Filter) -> Result<Vec<Volume>> {
        Ok(self
            .volumes
            .read()
            .await
            .values()
            .filter(|v| matches_filter(v, filter))
            .cloned()
            .collect())
    }

    async fn update_volume(&self, volume: &Volume) -> Result<Volume> {
        let mut volumes = self.volumes.write().await;
        if !volumes.contains_key(&volume.id) {
            return Err(Error::not_found("volume", &volume.id));
        }
        volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume.clone())
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.volumes
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("volume", id))
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(&snapshot.id) {
            return Err(Error::AlreadyExists {
                kind: "snapshot".into(),
                name: snapshot.id.clone(),
            });
        }
        snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot.clone())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.snapshots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("snapshot", id))
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }

    async fn list_snapshots_with_filter(&self, filter: &Filter) -> Result<Vec<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .values()
            .filter(|s| matches_filter(s, filter))
            .cloned()
            .collect())
    }

    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        let mut snapshots = self.snapshots.write().await;
        if !snapshots.contains_key(&snapshot.id) {
            return Err(Error::not_found("snapshot", &snapshot.id));
        }
        snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot.clone())
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.snapshots
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("snapshot", id))
    }

    async fn create_attachment(&self, attachment: &Attachment) -> Result<Attachment> {
        let mut attachments = self.attachments.write().await;
        if attachments.contains_key(&attachment.id) {
            return Err(Error::AlreadyExists {
                kind: "attachment".into(),
                name: attachment.id.clone(),
            });
        }
        attachments.insert(attachment.id.clone(), attachment.clone());
        Ok(attachment.clone())
    }

    async fn get_attachment(&self, id: &str) -> Result<Attachment> {
        self.attachments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("attachment", id))
    }

    async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        Ok(self.attachments.read().await.values().cloned().collect())
    }

    async fn list_attachments_with_filter(&self, filter: &Filter) -> Result<Vec<Attachment>> {
        Ok(self
            .attachments
            .read()
            .await
            .values()
            .filter(|a| matches_filter(a, filter))
            .cloned()
            .collect())
    }

    async fn update_attachment(&self, attachment: &Attachment) -> Result<Attachment> {
        let mut attachments = self.attachments.write().await;
        if !attachments.contains_key(&attachment.id) {
            return Err(Error::not_found("attachment", &attachment.id));
        }
        attachments.insert(attachment.id.clone(), attachment.clone());
        Ok(attachment.clone())
    }

    async fn delete_attachment(&self, id: &str) -> Result<()> {
        self.attachments
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("attachment", id))
    }

    async fn upsert_pool(&self, pool: &Pool) -> Result<Pool> {
        self.pools
            .write()
            .await
            .insert(pool.id.clone(), pool.clone());
        Ok(pool.clone())
    }

    async fn get_pool(&self, id: &str) -> Result<Pool> {
        self.pools
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("pool", id))
    }

    async fn get_pool_by_name(&self, name: &str) -> Result<Pool> {
        self.pools
            .read()
            .await
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found("pool", name))
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        Ok(self.pools.read().await.values().cloned().collect())
    }

    async fn delete_pool(&self, id: &str) -> Result<()> {
        self.pools
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("pool", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Metadata, VolumeStatus};
    use chrono::Utc;

    fn volume(id: &str, pool: &str, status: VolumeStatus) -> Volume {
        Volume {
            id: id.into(),
            name: format!("vol-{}", id),
            description: String::new(),
            status,
            size_gib: 1,
            pool_name: pool.into(),
            snapshot_id: None,
            snapshot_from_cloud: false,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_volume_crud() {
        let store = MemoryStore::new();
        let vol = volume("a", "vg0", VolumeStatus::Creating);

        store.create_volume(&vol).await.unwrap();
        assert!(store.create_volume(&vol).await.is_err());

        let mut fetched = store.get_volume("a").await.unwrap();
        assert_eq!(fetched.status, VolumeStatus::Creating);

        fetched.status = VolumeStatus::Available;
        store.update_volume(&fetched).await.unwrap();
        assert_eq!(
            store.get_volume("a").await.unwrap().status,
            VolumeStatus::Available
        );

        store.delete_volume("a").await.unwrap();
        assert!(store.get_volume("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_filtered_listing() {
        let store = MemoryStore::new();
        store
            .create_volume(&volume("a", "vg0", VolumeStatus::Available))
            .await
            .unwrap();
        store
            .create_volume(&volume("b", "vg1", VolumeStatus::Available))
            .await
            .unwrap();
        store
            .create_volume(&volume("c", "vg0", VolumeStatus::Error))
            .await
            .unwrap();

        let mut filter = Filter::new();
        filter.insert("pool_name".into(), vec!["vg0".into()]);
        let found = store.list_volumes_with_filter(&filter).await.unwrap();
        assert_eq!(found.len(), 2);

        filter.insert("status".into(), vec!["available".into()]);
        let found = store.list_volumes_with_filter(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");

        // Multi-value keys accept any listed value.
        let mut filter = Filter::new();
        filter.insert("id".into(), vec!["a".into(), "b".into()]);
        let found = store.list_volumes_with_filter(&filter).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_pool_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let pool = Pool {
            id: "p1".into(),
            name: "vg0".into(),
            total_capacity_gib: 100,
            free_capacity_gib: 80,
            storage_type: "block".into(),
            availability_zone: "default".into(),
            extras: BTreeMap::new(),
        };
        store.upsert_pool(&pool).await.unwrap();
        store.upsert_pool(&pool).await.unwrap();
        assert_eq!(store.list_pools().await.unwrap().len(), 1);
        assert_eq!(store.get_pool_by_name("vg0").await.unwrap().id, "p1");
    }
}
