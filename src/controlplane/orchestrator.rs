//! Orchestrator - The "Brain"
//!
//! Owns the boundary between "request accepted" and "operation complete".
//! Every entry point accepts a resource already persisted with a transitional
//! status plus a one-shot result sender, resolves the concrete driver for the
//! resource's pool, runs the matching contract method on a background task,
//! and persists the terminal status before posting the outcome exactly once.
//! By the time the outcome is available the synchronous request has already
//! returned, so the channel serves observability only; the authoritative
//! state is always the persisted resource status.

use crate::domain::model::{
    Attachment, AttachmentStatus, Pool, Snapshot, SnapshotStatus, Volume, VolumeStatus,
};
use crate::domain::ports::{
    CreateAttachmentOpts, CreateSnapshotOpts, CreateVolumeOpts, DeleteAttachmentOpts,
    DeleteSnapshotOpts, DeleteVolumeOpts, DriverProviderRef, ExtendVolumeOpts, StorageDriver,
};
use crate::error::{Error, Result};
use crate::store::ResourceStoreRef;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Sender half of a completion channel; written exactly once per dispatch.
pub type CompletionSender = oneshot::Sender<Result<()>>;

/// Receiver half of a completion channel.
pub type CompletionReceiver = oneshot::Receiver<Result<()>>;

/// A fresh completion channel for one lifecycle request.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    oneshot::channel()
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates background driver executions and terminal-state persistence.
#[derive(Clone)]
pub struct Orchestrator {
    store: ResourceStoreRef,
    drivers: DriverProviderRef,
}

impl Orchestrator {
    pub fn new(store: ResourceStoreRef, drivers: DriverProviderRef) -> Arc<Self> {
        Arc::new(Self { store, drivers })
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    pub fn create_volume(&self, volume: Volume, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_create_volume(volume).await });
    }

    pub fn delete_volume(&self, volume: Volume, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_delete_volume(volume).await });
    }

    pub fn extend_volume(
        &self,
        volume: Volume,
        new_size_gib: u64,
        tx: CompletionSender,
    ) {
        let this = self.clone();
        spawn_completing(tx, async move {
            this.run_extend_volume(volume, new_size_gib).await
        });
    }

    pub fn create_snapshot(&self, snapshot: Snapshot, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_create_snapshot(snapshot).await });
    }

    pub fn delete_snapshot(&self, snapshot: Snapshot, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_delete_snapshot(snapshot).await });
    }

    pub fn create_attachment(&self, attachment: Attachment, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_create_attachment(attachment).await });
    }

    pub fn delete_attachment(&self, attachment: Attachment, tx: CompletionSender) {
        let this = self.clone();
        spawn_completing(tx, async move { this.run_delete_attachment(attachment).await });
    }

    /// Query a driver's pools and upsert them into the store, making the
    /// deterministic pool identities visible to the request layer.
    pub async fn sync_pools(&self, driver: &dyn StorageDriver) -> Result<Vec<Pool>> {
        let pools = driver.list_pools().await?;
        for pool in &pools {
            self.store.upsert_pool(pool).await?;
        }
        info!("Synced {} pools from {} driver", pools.len(), driver.driver_name());
        Ok(pools)
    }

    // =========================================================================
    // Volume Operations
    // =========================================================================

    async fn run_create_volume(&self, volume: Volume) -> Result<()> {
        let result = self.dispatch_create_volume(&volume).await;
        match result {
            Ok(created) => {
                let mut terminal = volume;
                terminal.status = created.status;
                terminal.size_gib = created.size_gib;
                terminal.metadata = created.metadata;
                terminal.updated_at = Utc::now();
                self.store.update_volume(&terminal).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_volume_status(volume, VolumeStatus::Error).await;
                Err(err)
            }
        }
    }

    async fn dispatch_create_volume(&self, volume: &Volume) -> Result<Volume> {
        let driver = self.drivers.resolve(&volume.pool_name).await?;

        let mut opts = CreateVolumeOpts {
            id: volume.id.clone(),
            name: volume.name.clone(),
            description: volume.description.clone(),
            size_gib: volume.size_gib,
            pool_name: volume.pool_name.clone(),
            snapshot_id: volume.snapshot_id.clone(),
            snapshot_from_cloud: volume.snapshot_from_cloud,
            snapshot_size_gib: 0,
            metadata: volume.metadata.clone(),
        };
        if let Some(snapshot_id) = &volume.snapshot_id {
            let snapshot = self.store.get_snapshot(snapshot_id).await?;
            opts.snapshot_size_gib = snapshot.size_gib;
        }

        driver.create_volume(&opts).await
    }

    async fn run_delete_volume(&self, volume: Volume) -> Result<()> {
        let driver = self.drivers.resolve(&volume.pool_name).await?;
        let opts = DeleteVolumeOpts {
            id: volume.id.clone(),
            pool_name: volume.pool_name.clone(),
            metadata: volume.metadata.clone(),
        };

        match driver.delete_volume(&opts).await {
            Ok(()) => {
                self.store.delete_volume(&volume.id).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_volume_status(volume, VolumeStatus::ErrorDeleting)
                    .await;
                Err(err)
            }
        }
    }

    async fn run_extend_volume(&self, volume: Volume, new_size_gib: u64) -> Result<()> {
        let driver = self.drivers.resolve(&volume.pool_name).await?;
        let opts = ExtendVolumeOpts {
            id: volume.id.clone(),
            name: volume.name.clone(),
            description: volume.description.clone(),
            size_gib: new_size_gib,
            pool_name: volume.pool_name.clone(),
            metadata: volume.metadata.clone(),
        };

        match driver.extend_volume(&opts).await {
            Ok(extended) => {
                let mut terminal = volume;
                terminal.status = VolumeStatus::Available;
                terminal.size_gib = extended.size_gib;
                terminal.metadata = extended.metadata;
                terminal.updated_at = Utc::now();
                self.store.update_volume(&terminal).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_volume_status(volume, VolumeStatus::Error).await;
                Err(err)
            }
        }
    }

    async fn persist_volume_status(&self, mut volume: Volume, status: VolumeStatus) {
        volume.status = status;
        volume.updated_at = Utc::now();
        if let Err(e) = self.store.update_volume(&volume).await {
            error!("Failed to persist volume {} status {}: {}", volume.id, status, e);
        }
    }

    // =========================================================================
    // Snapshot Operations
    // =========================================================================

    async fn run_create_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let result = self.dispatch_create_snapshot(&snapshot).await;
        match result {
            Ok(created) => {
                let mut terminal = snapshot;
                terminal.status = created.status;
                terminal.metadata = created.metadata;
                terminal.updated_at = Utc::now();
                self.store.update_snapshot(&terminal).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_snapshot_status(snapshot, SnapshotStatus::Error)
                    .await;
                Err(err)
            }
        }
    }

    async fn dispatch_create_snapshot(&self, snapshot: &Snapshot) -> Result<Snapshot> {
        let volume = self.store.get_volume(&snapshot.volume_id).await?;
        let driver = self.drivers.resolve(&volume.pool_name).await?;

        let opts = CreateSnapshotOpts {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            size_gib: snapshot.size_gib,
            volume_id: snapshot.volume_id.clone(),
            pool_name: volume.pool_name.clone(),
            metadata: snapshot.metadata.clone(),
        };
        driver.create_snapshot(&opts).await
    }

    async fn run_delete_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let result = self.dispatch_delete_snapshot(&snapshot).await;
        match result {
            Ok(()) => {
                self.store.delete_snapshot(&snapshot.id).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_snapshot_status(snapshot, SnapshotStatus::ErrorDeleting)
                    .await;
                Err(err)
            }
        }
    }

    async fn dispatch_delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let volume = self.store.get_volume(&snapshot.volume_id).await?;
        let driver = self.drivers.resolve(&volume.pool_name).await?;

        let opts = DeleteSnapshotOpts {
            id: snapshot.id.clone(),
            volume_id: snapshot.volume_id.clone(),
            pool_name: volume.pool_name.clone(),
            metadata: snapshot.metadata.clone(),
        };
        driver.delete_snapshot(&opts).await
    }

    async fn persist_snapshot_status(&self, mut snapshot: Snapshot, status: SnapshotStatus) {
        snapshot.status = status;
        snapshot.updated_at = Utc::now();
        if let Err(e) = self.store.update_snapshot(&snapshot).await {
            error!(
                "Failed to persist snapshot {} status {}: {}",
                snapshot.id, status, e
            );
        }
    }

    // =========================================================================
    // Attachment Operations
    // =========================================================================

    async fn run_create_attachment(&self, attachment: Attachment) -> Result<()> {
        let result = self.dispatch_create_attachment(&attachment).await;
        match result {
            Ok(info) => {
                let mut terminal = attachment;
                terminal.status = AttachmentStatus::Available;
                terminal.connection_info = Some(info);
                terminal.updated_at = Utc::now();
                self.store.update_attachment(&terminal).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_attachment_status(attachment, AttachmentStatus::Error)
                    .await;
                Err(err)
            }
        }
    }

    async fn dispatch_create_attachment(
        &self,
        attachment: &Attachment,
    ) -> Result<crate::domain::model::ConnectionInfo> {
        let volume = self.store.get_volume(&attachment.volume_id).await?;
        let driver = self.drivers.resolve(&volume.pool_name).await?;

        let mut metadata = attachment.metadata.clone();
        for (key, value) in &volume.metadata {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let opts = CreateAttachmentOpts {
            id: attachment.id.clone(),
            volume_id: attachment.volume_id.clone(),
            pool_name: volume.pool_name.clone(),
            host_info: attachment.host_info.clone(),
            metadata,
        };
        driver.initialize_connection(&opts).await
    }

    async fn run_delete_attachment(&self, attachment: Attachment) -> Result<()> {
        let result = self.dispatch_delete_attachment(&attachment).await;
        match result {
            Ok(()) => {
                self.store.delete_attachment(&attachment.id).await?;
                Ok(())
            }
            Err(err) => {
                self.persist_attachment_status(attachment, AttachmentStatus::ErrorDeleting)
                    .await;
                Err(err)
            }
        }
    }

    async fn dispatch_delete_attachment(&self, attachment: &Attachment) -> Result<()> {
        let volume = self.store.get_volume(&attachment.volume_id).await?;
        let driver = self.drivers.resolve(&volume.pool_name).await?;

        let opts = DeleteAttachmentOpts {
            id: attachment.id.clone(),
            volume_id: attachment.volume_id.clone(),
            pool_name: volume.pool_name.clone(),
            host_info: attachment.host_info.clone(),
            metadata: attachment.metadata.clone(),
        };
        driver.terminate_connection(&opts).await
    }

    async fn persist_attachment_status(
        &self,
        mut attachment: Attachment,
        status: AttachmentStatus,
    ) {
        attachment.status = status;
        attachment.updated_at = Utc::now();
        if let Err(e) = self.store.update_attachment(&attachment).await {
            error!(
                "Failed to persist attachment {} status: {}",
                attachment.id, e
            );
        }
    }
}

// =============================================================================
// Guarded Dispatch
// =============================================================================

/// Run one background operation and write its outcome to the channel exactly
/// once, converting a panic into an error so the channel is never left
/// unwritten.
fn spawn_completing<F>(tx: CompletionSender, fut: F)
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Internal(format!(
                "background dispatch panicked: {}",
                panic_text(panic.as_ref())
            ))),
        };
        if let Err(e) = &result {
            error!("Background operation failed: {}", e);
        }
        // A dropped receiver only loses the observability signal.
        let _ = tx.send(result);
    });
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
