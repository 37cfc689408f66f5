//! Provisional database entries
//!
//! The caller side of every lifecycle operation: validate the request before
//! any backend call, enforce the one-transitional-operation-per-resource
//! discipline, write the provisional record synchronously, and return it.
//! These functions are the only writers of transitional states; the
//! orchestrator is the only writer of terminal states.

use crate::domain::model::{
    Attachment, AttachmentStatus, HostInfo, Metadata, Snapshot, SnapshotStatus, Volume,
    VolumeStatus,
};
use crate::error::{Error, Result};
use crate::store::{Filter, ResourceStore};
use chrono::Utc;
use uuid::Uuid;

// =============================================================================
// Requests
// =============================================================================

/// Northbound request to create a volume
#[derive(Debug, Clone, Default)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub description: String,
    pub size_gib: u64,
    pub pool_name: String,
    pub snapshot_id: Option<String>,
    pub snapshot_from_cloud: bool,
    pub metadata: Metadata,
}

/// Northbound request to create a snapshot
#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotRequest {
    pub name: String,
    pub description: String,
    pub volume_id: String,
    pub metadata: Metadata,
}

/// Northbound request to attach a volume to a host
#[derive(Debug, Clone, Default)]
pub struct CreateAttachmentRequest {
    pub volume_id: String,
    pub host_info: HostInfo,
    pub metadata: Metadata,
}

// =============================================================================
// Volume Entries
// =============================================================================

/// Validate a create request and persist the volume as `creating`.
pub async fn create_volume_db_entry(
    store: &dyn ResourceStore,
    req: CreateVolumeRequest,
) -> Result<Volume> {
    if req.name.is_empty() {
        return Err(Error::Validation("volume name must not be empty".into()));
    }
    if req.size_gib == 0 {
        return Err(Error::Validation(
            "volume size must be at least 1 GiB".into(),
        ));
    }
    if req.pool_name.is_empty() {
        return Err(Error::Validation("volume pool must not be empty".into()));
    }

    let mut metadata = req.metadata;
    if let Some(snapshot_id) = &req.snapshot_id {
        let snapshot = store.get_snapshot(snapshot_id).await?;
        if snapshot.status != SnapshotStatus::Available {
            return Err(Error::Conflict(format!(
                "snapshot {} is {} and cannot seed a volume",
                snapshot_id, snapshot.status
            )));
        }
        if req.size_gib < snapshot.size_gib {
            return Err(Error::Validation(format!(
                "volume size {} GiB is smaller than snapshot size {} GiB",
                req.size_gib, snapshot.size_gib
            )));
        }
        // Carry the snapshot's backend identifiers so the driver can locate
        // the seed; explicit request keys win.
        for (key, value) in &snapshot.metadata {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let now = Utc::now();
    let volume = Volume {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        status: VolumeStatus::Creating,
        size_gib: req.size_gib,
        pool_name: req.pool_name,
        snapshot_id: req.snapshot_id,
        snapshot_from_cloud: req.snapshot_from_cloud,
        metadata,
        created_at: now,
        updated_at: now,
    };
    store.create_volume(&volume).await
}

/// Validate a delete request and mark the volume `deleting`.
pub async fn delete_volume_db_entry(store: &dyn ResourceStore, id: &str) -> Result<Volume> {
    let mut volume = store.get_volume(id).await?;

    if volume.status.is_transitional() {
        return Err(Error::Conflict(format!(
            "volume {} is {} and cannot be deleted yet",
            id, volume.status
        )));
    }

    let mut filter = Filter::new();
    filter.insert("volume_id".into(), vec![id.to_string()]);
    let dependents = store.list_snapshots_with_filter(&filter).await?;
    if !dependents.is_empty() {
        return Err(Error::Conflict(format!(
            "volume {} still has {} snapshots",
            id,
            dependents.len()
        )));
    }

    volume.status = VolumeStatus::Deleting;
    volume.updated_at = Utc::now();
    store.update_volume(&volume).await
}

/// Validate an extend request and mark the volume `extending`. The recorded
/// size stays at its old value until the background operation completes.
pub async fn extend_volume_db_entry(
    store: &dyn ResourceStore,
    id: &str,
    new_size_gib: u64,
) -> Result<Volume> {
    let mut volume = store.get_volume(id).await?;

    if volume.status != VolumeStatus::Available {
        return Err(Error::Conflict(format!(
            "volume {} is {} and cannot be extended",
            id, volume.status
        )));
    }
    if new_size_gib <= volume.size_gib {
        return Err(Error::Validation(format!(
            "new size {} GiB must exceed current size {} GiB",
            new_size_gib, volume.size_gib
        )));
    }

    volume.status = VolumeStatus::Extending;
    volume.updated_at = Utc::now();
    store.update_volume(&volume).await
}

// =============================================================================
// Snapshot Entries
// =============================================================================

/// Validate a snapshot request and persist the snapshot as `creating`.
pub async fn create_snapshot_db_entry(
    store: &dyn ResourceStore,
    req: CreateSnapshotRequest,
) -> Result<Snapshot> {
    if req.name.is_empty() {
        return Err(Error::Validation("snapshot name must not be empty".into()));
    }

    let volume = store.get_volume(&req.volume_id).await?;
    if volume.status != VolumeStatus::Available {
        return Err(Error::Conflict(format!(
            "volume {} is {} and cannot be snapshotted",
            req.volume_id, volume.status
        )));
    }

    // The source volume's backend identifiers must reach the driver; request
    // keys (e.g. an upload bucket) win on collision.
    let mut metadata = req.metadata;
    for (key, value) in &volume.metadata {
        metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let now = Utc::now();
    let snapshot = Snapshot {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        status: SnapshotStatus::Creating,
        size_gib: volume.size_gib,
        volume_id: req.volume_id,
        metadata,
        created_at: now,
        updated_at: now,
    };
    store.create_snapshot(&snapshot).await
}

/// Validate a snapshot delete request and mark it `deleting`.
pub async fn delete_snapshot_db_entry(store: &dyn ResourceStore, id: &str) -> Result<Snapshot> {
    let mut snapshot = store.get_snapshot(id).await?;

    if snapshot.status.is_transitional() {
        return Err(Error::Conflict(format!(
            "snapshot {} is {} and cannot be deleted yet",
            id, snapshot.status
        )));
    }

    snapshot.status = SnapshotStatus::Deleting;
    snapshot.updated_at = Utc::now();
    store.update_snapshot(&snapshot).await
}

// =============================================================================
// Attachment Entries
// =============================================================================

/// Validate an attach request and persist the attachment as `creating`.
pub async fn create_attachment_db_entry(
    store: &dyn ResourceStore,
    req: CreateAttachmentRequest,
) -> Result<Attachment> {
    let volume = store.get_volume(&req.volume_id).await?;
    if volume.status != VolumeStatus::Available {
        return Err(Error::Conflict(format!(
            "volume {} is {} and cannot be attached",
            req.volume_id, volume.status
        )));
    }

    let mut metadata = req.metadata;
    for (key, value) in &volume.metadata {
        metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let now = Utc::now();
    let attachment = Attachment {
        id: Uuid::new_v4().to_string(),
        volume_id: req.volume_id,
        status: AttachmentStatus::Creating,
        host_info: req.host_info,
        connection_info: None,
        metadata,
        created_at: now,
        updated_at: now,
    };
    store.create_attachment(&attachment).await
}

/// Validate an attachment delete request and mark it `deleting`.
pub async fn delete_attachment_db_entry(
    store: &dyn ResourceStore,
    id: &str,
) -> Result<Attachment> {
    let mut attachment = store.get_attachment(id).await?;

    if attachment.status.is_transitional() {
        return Err(Error::Conflict(format!(
            "attachment {} is {} and cannot be deleted yet",
            id, attachment.status
        )));
    }

    attachment.status = AttachmentStatus::Deleting;
    attachment.updated_at = Utc::now();
    store.update_attachment(&attachment).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn create_req(size: u64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: "vol".into(),
            size_gib: size,
            pool_name: "vg0".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_entry_validates_before_persisting() {
        let store = MemoryStore::new();

        let err = create_volume_db_entry(store.as_ref(), create_req(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut req = create_req(10);
        req.name.clear();
        let err = create_volume_db_entry(store.as_ref(), req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(store.list_volumes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_entry_is_provisional() {
        let store = MemoryStore::new();
        let volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();
        assert_eq!(volume.status, VolumeStatus::Creating);
        assert_eq!(
            store.get_volume(&volume.id).await.unwrap().status,
            VolumeStatus::Creating
        );
    }

    #[tokio::test]
    async fn test_seeded_create_inherits_snapshot_metadata() {
        let store = MemoryStore::new();
        let volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();

        let mut available = volume.clone();
        available.status = VolumeStatus::Available;
        available
            .metadata
            .insert("lvPath".into(), "/dev/vg0/volume-x".into());
        store.update_volume(&available).await.unwrap();

        let snapshot = create_snapshot_db_entry(
            store.as_ref(),
            CreateSnapshotRequest {
                name: "snap".into(),
                volume_id: volume.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut snapshot = snapshot;
        snapshot.status = SnapshotStatus::Available;
        store.update_snapshot(&snapshot).await.unwrap();

        let mut req = create_req(10);
        req.snapshot_id = Some(snapshot.id.clone());
        let seeded = create_volume_db_entry(store.as_ref(), req).await.unwrap();
        assert_eq!(seeded.metadata["lvPath"], "/dev/vg0/volume-x");

        // Undersized seeds are rejected.
        let mut req = create_req(5);
        req.snapshot_id = Some(snapshot.id.clone());
        let err = create_volume_db_entry(store.as_ref(), req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_transitional_volume_rejects_second_operation() {
        let store = MemoryStore::new();
        let volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();

        // Still creating: neither extend nor delete may start.
        let err = extend_volume_db_entry(store.as_ref(), &volume.id, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = delete_volume_db_entry(store.as_ref(), &volume.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_extend_entry_requires_larger_size() {
        let store = MemoryStore::new();
        let mut volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();
        volume.status = VolumeStatus::Available;
        store.update_volume(&volume).await.unwrap();

        let err = extend_volume_db_entry(store.as_ref(), &volume.id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let extending = extend_volume_db_entry(store.as_ref(), &volume.id, 20)
            .await
            .unwrap();
        assert_eq!(extending.status, VolumeStatus::Extending);
        // Recorded size is authoritative until completion.
        assert_eq!(extending.size_gib, 10);
    }

    #[tokio::test]
    async fn test_delete_entry_rejects_dependent_snapshots() {
        let store = MemoryStore::new();
        let mut volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();
        volume.status = VolumeStatus::Available;
        store.update_volume(&volume).await.unwrap();

        create_snapshot_db_entry(
            store.as_ref(),
            CreateSnapshotRequest {
                name: "snap".into(),
                volume_id: volume.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = delete_volume_db_entry(store.as_ref(), &volume.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // Status unchanged by the rejected request.
        assert_eq!(
            store.get_volume(&volume.id).await.unwrap().status,
            VolumeStatus::Available
        );
    }

    #[tokio::test]
    async fn test_attachment_entry_inherits_volume_metadata() {
        let store = MemoryStore::new();
        let mut volume = create_volume_db_entry(store.as_ref(), create_req(10))
            .await
            .unwrap();
        volume.status = VolumeStatus::Available;
        volume
            .metadata
            .insert("lvPath".into(), "/dev/vg0/volume-x".into());
        store.update_volume(&volume).await.unwrap();

        let attachment = create_attachment_db_entry(
            store.as_ref(),
            CreateAttachmentRequest {
                volume_id: volume.id.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(attachment.status, AttachmentStatus::Creating);
        assert_eq!(attachment.metadata["lvPath"], "/dev/vg0/volume-x");
    }
}
