//! Logical-volume backend driver
//!
//! The reference backend: provisions volumes and snapshots as LVM logical
//! volumes via the external LVM tools, exports them over iSCSI, and uploads
//! snapshot content to the backup store on request. Create-style operations
//! roll partially provisioned objects back before returning an error, and
//! every backend-private path is round-tripped through resource metadata.

pub mod report;
pub mod targets;

use crate::backup::{BackupDriverRef, BackupSpec};
use crate::domain::model::{
    ConnectionInfo, Metadata, Pool, Protocol, Snapshot, Volume, VolumeStatus,
};
use crate::domain::model::SnapshotStatus;
use crate::domain::ports::{
    CreateAttachmentOpts, CreateSnapshotOpts, CreateVolumeOpts, DeleteAttachmentOpts,
    DeleteSnapshotOpts, DeleteVolumeOpts, ExtendVolumeOpts, SnapshotAttachmentOpts, StorageDriver,
};
use crate::drivers::exec::CommandRunnerRef;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, warn};
use uuid::Uuid;

use report::{attr_has_origin, parse_lv_rows, parse_vg_rows, LvReport, LvSection};
use targets::IscsiTarget;

// =============================================================================
// Constants
// =============================================================================

const VOLUME_PREFIX: &str = "volume-";
const SNAPSHOT_PREFIX: &str = "_snapshot-";

/// Block size used for snapshot-to-volume seeding
const BLOCK_SIZE: u64 = 4096;
/// GiB -> bytes shift
const SIZE_SHIFT_BIT: u64 = 30;

/// Metadata key carrying a volume's logical-volume path
pub const LV_PATH_KEY: &str = "lvPath";
/// Metadata key carrying a snapshot's logical-volume path
pub const LVS_PATH_KEY: &str = "lvsPath";
/// Metadata key carrying the id of an uploaded snapshot copy
pub const BACKUP_ID_KEY: &str = "backupId";
/// Metadata key naming the object-store bucket for snapshot upload
pub const BUCKET_KEY: &str = "bucket";

const DEFAULT_TGT_BIND_IP: &str = "127.0.0.1";
const DEFAULT_TGT_CONF_DIR: &str = "/etc/tgt/conf.d";

// =============================================================================
// Configuration
// =============================================================================

/// Static configuration for the logical-volume backend, loaded from YAML at
/// driver instantiation and owned by the driver afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LvmConfig {
    pub tgt_bind_ip: String,
    pub tgt_conf_dir: String,
    pub enable_chap_auth: bool,
    /// Volume groups this backend manages; discovered VGs outside this map
    /// are never reported as pools.
    pub pool: BTreeMap<String, PoolProperties>,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            tgt_bind_ip: DEFAULT_TGT_BIND_IP.to_string(),
            tgt_conf_dir: DEFAULT_TGT_CONF_DIR.to_string(),
            enable_chap_auth: false,
            pool: BTreeMap::new(),
        }
    }
}

/// Per-pool properties declared in backend configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolProperties {
    pub storage_type: String,
    pub availability_zone: String,
    pub extras: BTreeMap<String, String>,
}

// =============================================================================
// Driver
// =============================================================================

/// Logical-volume storage driver
pub struct LvmDriver {
    conf: LvmConfig,
    runner: CommandRunnerRef,
    backup: BackupDriverRef,
}

impl LvmDriver {
    pub fn new(conf: LvmConfig, runner: CommandRunnerRef, backup: BackupDriverRef) -> Self {
        Self {
            conf,
            runner,
            backup,
        }
    }

    fn volume_name(id: &str) -> String {
        format!("{}{}", VOLUME_PREFIX, id)
    }

    fn snapshot_name(id: &str) -> String {
        format!("{}{}", SNAPSHOT_PREFIX, id)
    }

    fn target(&self) -> IscsiTarget {
        IscsiTarget::new(
            &self.conf.tgt_bind_ip,
            &self.conf.tgt_conf_dir,
            self.runner.clone(),
        )
    }

    fn metadata_path<'a>(metadata: &'a Metadata, key: &str) -> Result<&'a str> {
        metadata.get(key).map(String::as_str).ok_or_else(|| {
            Error::Validation(format!("resource metadata is missing the {} key", key))
        })
    }

    async fn lv_display(&self, path: &str) -> Result<LvSection> {
        let output = self.runner.run("lvdisplay", &[path]).await?;
        Ok(LvReport::parse(&output).single())
    }

    async fn lv_infos(&self) -> Result<Vec<report::LvRow>> {
        let output = self
            .runner
            .run(
                "lvs",
                &["--noheadings", "--unit=g", "-o", "vg_name,name,size", "--nosuffix"],
            )
            .await?;
        Ok(parse_lv_rows(&output))
    }

    async fn lv_exists(&self, name: &str) -> bool {
        match self.lv_infos().await {
            Ok(rows) => rows.iter().any(|row| row.name == name),
            Err(e) => {
                error!("Failed to list logical volumes: {}", e);
                false
            }
        }
    }

    /// Whether the logical volume at `lv_path` is the origin of snapshots.
    async fn lv_has_snapshot(&self, lv_path: &str) -> bool {
        match self
            .runner
            .run("lvdisplay", &["--noheading", "-C", "-o", "Attr", lv_path])
            .await
        {
            Ok(output) => attr_has_origin(&output),
            Err(e) => {
                error!("Failed to display logical volume: {}", e);
                false
            }
        }
    }

    async fn active_snapshot_paths_of(&self, lv_path: &str) -> Result<Vec<String>> {
        let lv_name = lv_path.rsplit('/').next().unwrap_or(lv_path);
        let output = self.runner.run("lvdisplay", &[]).await?;
        Ok(LvReport::parse(&output).active_snapshot_paths_of(lv_name))
    }

    async fn deactivate_snapshots(&self, snapshot_paths: &[String]) -> Result<()> {
        for path in snapshot_paths {
            self.runner.run("lvchange", &["-an", "-y", path]).await?;
        }
        Ok(())
    }

    async fn remove_lv(&self, lv_path: &str) -> Result<()> {
        self.runner.run("lvremove", &["-f", lv_path]).await?;
        Ok(())
    }

    /// Best-effort removal of a partially provisioned object.
    async fn rollback_lv(&self, lv_path: &str) {
        if let Err(e) = self.remove_lv(lv_path).await {
            error!("Failed to roll back logical volume {}: {}", lv_path, e);
        }
    }

    /// Seed a new volume from a local snapshot by raw block copy.
    async fn copy_snapshot_to_volume(
        &self,
        opts: &CreateVolumeOpts,
        snapshot_id: &str,
        lv_path: &str,
    ) -> Result<()> {
        let count = (opts.snapshot_size_gib << SIZE_SHIFT_BIT) / BLOCK_SIZE;
        let snap_path = format!("/dev/{}/{}", opts.pool_name, Self::snapshot_name(snapshot_id));
        self.runner
            .run(
                "dd",
                &[
                    &format!("if={}", snap_path),
                    &format!("of={}", lv_path),
                    &format!("count={}", count),
                    &format!("bs={}", BLOCK_SIZE),
                ],
            )
            .await?;
        Ok(())
    }

    /// Seed a new volume from a cloud-archived snapshot copy.
    async fn download_snapshot(&self, metadata: &Metadata, dest: &str) -> Result<()> {
        let backup_id = Self::metadata_path(metadata, BACKUP_ID_KEY)?.to_string();
        let bucket = Self::metadata_path(metadata, BUCKET_KEY)?.to_string();

        self.backup.set_up().await?;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(dest)
                .await?;
            let spec = BackupSpec {
                id: backup_id.clone(),
                metadata: BTreeMap::from([(BUCKET_KEY.to_string(), bucket)]),
            };
            self.backup.restore(&spec, &backup_id, &mut file).await
        }
        .await;
        let _ = self.backup.clean_up().await;
        result
    }

    /// Upload a snapshot's content, returning the archive id.
    async fn upload_snapshot(&self, lvs_path: &str, bucket: &str) -> Result<String> {
        self.backup.set_up().await?;
        let spec = BackupSpec {
            id: Uuid::new_v4().to_string(),
            metadata: BTreeMap::from([(BUCKET_KEY.to_string(), bucket.to_string())]),
        };
        let result = async {
            let mut file = tokio::fs::File::open(lvs_path).await?;
            self.backup.backup(&spec, &mut file).await
        }
        .await;
        let _ = self.backup.clean_up().await;
        result.map(|_| spec.id)
    }

    async fn delete_uploaded_snapshot(&self, backup_id: &str, bucket: &str) -> Result<()> {
        self.backup.set_up().await?;
        let spec = BackupSpec {
            id: backup_id.to_string(),
            metadata: BTreeMap::from([(BUCKET_KEY.to_string(), bucket.to_string())]),
        };
        let result = self.backup.delete(&spec).await;
        let _ = self.backup.clean_up().await;
        result
    }

    /// Fallible tail of volume creation; the caller rolls the new logical
    /// volume back if this returns an error.
    async fn finish_create_volume(
        &self,
        opts: &CreateVolumeOpts,
        nominal_path: &str,
    ) -> Result<Volume> {
        let lv = self.lv_display(nominal_path).await?;
        let lv_path = lv.lv_path().unwrap_or(nominal_path).to_string();

        if let Some(snapshot_id) = &opts.snapshot_id {
            if opts.snapshot_from_cloud {
                self.download_snapshot(&opts.metadata, &lv_path).await?;
            } else {
                self.copy_snapshot_to_volume(opts, snapshot_id, &lv_path)
                    .await?;
            }
        }

        let status = match lv.lv_status() {
            Some("available") => VolumeStatus::Available,
            _ => VolumeStatus::Error,
        };
        let now = Utc::now();
        Ok(Volume {
            id: opts.id.clone(),
            name: opts.name.clone(),
            description: opts.description.clone(),
            status,
            size_gib: opts.size_gib,
            pool_name: opts.pool_name.clone(),
            snapshot_id: opts.snapshot_id.clone(),
            snapshot_from_cloud: opts.snapshot_from_cloud,
            metadata: BTreeMap::from([(LV_PATH_KEY.to_string(), lv_path)]),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fallible tail of snapshot creation; the caller rolls the new snapshot
    /// volume back if this returns an error.
    async fn finish_create_snapshot(
        &self,
        opts: &CreateSnapshotOpts,
        lvs_path: &str,
    ) -> Result<Snapshot> {
        let lvs = self.lv_display(lvs_path).await?;
        let status = match lvs.lv_status() {
            Some("available") => SnapshotStatus::Available,
            _ => SnapshotStatus::Error,
        };

        let mut metadata = BTreeMap::from([(LVS_PATH_KEY.to_string(), lvs_path.to_string())]);
        if let Some(bucket) = opts.metadata.get(BUCKET_KEY) {
            let backup_id = self.upload_snapshot(lvs_path, bucket).await?;
            metadata.insert(BACKUP_ID_KEY.to_string(), backup_id);
            metadata.insert(BUCKET_KEY.to_string(), bucket.clone());
        }

        let now = Utc::now();
        Ok(Snapshot {
            id: opts.id.clone(),
            name: opts.name.clone(),
            description: opts.description.clone(),
            status,
            size_gib: opts.size_gib,
            volume_id: opts.volume_id.clone(),
            metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

#[async_trait]
impl StorageDriver for LvmDriver {
    async fn setup(&self) -> Result<()> {
        if self.conf.pool.is_empty() {
            return Err(Error::Configuration(
                "lvm backend declares no managed pools".into(),
            ));
        }
        // Confirm the LVM tools answer and warn about declared-but-absent VGs.
        let output = self
            .runner
            .run(
                "vgs",
                &["--noheadings", "--nosuffix", "--unit=g", "-o", "name,size,free,uuid"],
            )
            .await?;
        let found = parse_vg_rows(&output);
        for name in self.conf.pool.keys() {
            if !found.iter().any(|vg| &vg.name == name) {
                warn!("Declared pool {} not present on this host", name);
            }
        }
        Ok(())
    }

    async fn unset(&self) -> Result<()> {
        Ok(())
    }

    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<Volume> {
        let size = format!("{}G", opts.size_gib);
        let name = Self::volume_name(&opts.id);

        self.runner
            .run("lvcreate", &["-Z", "n", "-n", &name, "-L", &size, &opts.pool_name])
            .await?;

        let nominal_path = format!("/dev/{}/{}", opts.pool_name, name);
        match self.finish_create_volume(opts, &nominal_path).await {
            Ok(volume) => Ok(volume),
            Err(err) => {
                error!("Volume creation failed, rolling back {}: {}", nominal_path, err);
                self.rollback_lv(&nominal_path).await;
                Err(err)
            }
        }
    }

    async fn delete_volume(&self, opts: &DeleteVolumeOpts) -> Result<()> {
        if !self.lv_exists(&Self::volume_name(&opts.id)).await {
            warn!("Volume {} does not exist, nothing to remove", opts.id);
            return Ok(());
        }

        let lv_path = Self::metadata_path(&opts.metadata, LV_PATH_KEY)?;
        if self.lv_has_snapshot(lv_path).await {
            return Err(Error::Conflict(format!(
                "unable to delete volume {} due to existing snapshots",
                opts.id
            )));
        }

        self.remove_lv(lv_path).await
    }

    async fn extend_volume(&self, opts: &ExtendVolumeOpts) -> Result<Volume> {
        let lv_path = Self::metadata_path(&opts.metadata, LV_PATH_KEY)?;

        // A volume under active snapshot cannot be resized while the snapshot
        // devices hold its extents; deactivation failures propagate.
        if self.lv_has_snapshot(lv_path).await {
            let snapshot_paths = self.active_snapshot_paths_of(lv_path).await?;
            if !snapshot_paths.is_empty() {
                self.deactivate_snapshots(&snapshot_paths).await?;
            }
        }

        let size = format!("{}G", opts.size_gib);
        self.runner.run("lvresize", &["-L", &size, lv_path]).await?;

        let now = Utc::now();
        Ok(Volume {
            id: opts.id.clone(),
            name: opts.name.clone(),
            description: opts.description.clone(),
            status: VolumeStatus::Available,
            size_gib: opts.size_gib,
            pool_name: opts.pool_name.clone(),
            snapshot_id: None,
            snapshot_from_cloud: false,
            metadata: opts.metadata.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<Snapshot> {
        let lv_path = Self::metadata_path(&opts.metadata, LV_PATH_KEY)?;
        let size = format!("{}G", opts.size_gib);
        let snap_name = Self::snapshot_name(&opts.id);

        self.runner
            .run("lvcreate", &["-n", &snap_name, "-L", &size, "-p", "r", "-s", lv_path])
            .await?;

        let lvs_dir = Path::new(lv_path).parent().unwrap_or_else(|| Path::new("/dev"));
        let lvs_path = lvs_dir.join(&snap_name).to_string_lossy().to_string();

        match self.finish_create_snapshot(opts, &lvs_path).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                error!("Snapshot creation failed, rolling back {}: {}", lvs_path, err);
                self.rollback_lv(&lvs_path).await;
                Err(err)
            }
        }
    }

    async fn delete_snapshot(&self, opts: &DeleteSnapshotOpts) -> Result<()> {
        let lvs_path = match opts.metadata.get(LVS_PATH_KEY) {
            Some(path) => path.clone(),
            None => {
                warn!(
                    "Snapshot {} metadata has no {} key, nothing to remove",
                    opts.id, LVS_PATH_KEY
                );
                return Ok(());
            }
        };

        // Remove the uploaded copy before the local object.
        if let Some(bucket) = opts.metadata.get(BUCKET_KEY) {
            let backup_id = Self::metadata_path(&opts.metadata, BACKUP_ID_KEY)?;
            self.delete_uploaded_snapshot(backup_id, bucket).await?;
        }

        if !self.lv_exists(&Self::snapshot_name(&opts.id)).await {
            warn!("Snapshot {} does not exist, nothing to remove", opts.id);
            return Ok(());
        }

        self.remove_lv(&lvs_path).await
    }

    async fn initialize_connection(&self, opts: &CreateAttachmentOpts) -> Result<ConnectionInfo> {
        let initiator = opts.host_info.initiator.as_deref().unwrap_or("ALL");
        let host_ip = opts.host_info.ip.as_deref().unwrap_or("ALL");
        let lv_path = Self::metadata_path(&opts.metadata, LV_PATH_KEY)?;

        let chap = self
            .conf
            .enable_chap_auth
            .then(|| (rand_alnum(20), rand_alnum(16)));

        let data = self
            .target()
            .create_export(&opts.volume_id, lv_path, host_ip, initiator, chap)
            .await?;

        Ok(ConnectionInfo {
            protocol: Protocol::Iscsi,
            data,
        })
    }

    async fn terminate_connection(&self, opts: &DeleteAttachmentOpts) -> Result<()> {
        self.target().remove_export(&opts.volume_id).await
    }

    async fn initialize_snapshot_connection(
        &self,
        opts: &SnapshotAttachmentOpts,
    ) -> Result<ConnectionInfo> {
        let initiator = opts.host_info.initiator.as_deref().unwrap_or("ALL");
        let host_ip = opts.host_info.ip.as_deref().unwrap_or("ALL");
        let lvs_path = Self::metadata_path(&opts.metadata, LVS_PATH_KEY)?;

        let chap = self
            .conf
            .enable_chap_auth
            .then(|| (rand_alnum(20), rand_alnum(16)));

        let data = self
            .target()
            .create_export(&opts.snapshot_id, lvs_path, host_ip, initiator, chap)
            .await?;

        Ok(ConnectionInfo {
            protocol: Protocol::Iscsi,
            data,
        })
    }

    async fn terminate_snapshot_connection(&self, opts: &SnapshotAttachmentOpts) -> Result<()> {
        self.target().remove_export(&opts.snapshot_id).await
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        let output = self
            .runner
            .run(
                "vgs",
                &["--noheadings", "--nosuffix", "--unit=g", "-o", "name,size,free,uuid"],
            )
            .await?;

        let pools = parse_vg_rows(&output)
            .into_iter()
            .filter_map(|vg| {
                let props = self.conf.pool.get(&vg.name)?;
                let availability_zone = if props.availability_zone.is_empty() {
                    "default".to_string()
                } else {
                    props.availability_zone.clone()
                };
                Some(Pool {
                    id: derive_pool_id(&vg.uuid),
                    name: vg.name,
                    total_capacity_gib: vg.total_capacity_gib,
                    free_capacity_gib: vg.free_capacity_gib,
                    storage_type: props.storage_type.clone(),
                    availability_zone,
                    extras: props.extras.clone(),
                })
            })
            .collect();
        Ok(pools)
    }

    fn driver_name(&self) -> &str {
        "lvm"
    }
}

/// Pool identity is a stable function of the backend volume-group UUID, so
/// repeated discovery yields the same pool id.
pub fn derive_pool_id(vg_uuid: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, vg_uuid.as_bytes()).to_string()
}

fn rand_alnum(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::RecordingBackup;
    use crate::drivers::exec::testing::ScriptedRunner;

    const VOL_ID: &str = "3769855c";

    fn lvdisplay_for(path: &str) -> String {
        format!(
            "  --- Logical volume ---\n  LV Path                {}\n  LV Status              available\n",
            path
        )
    }

    fn driver_with(runner: std::sync::Arc<ScriptedRunner>) -> LvmDriver {
        driver_with_backup(runner, RecordingBackup::new())
    }

    fn driver_with_backup(
        runner: std::sync::Arc<ScriptedRunner>,
        backup: std::sync::Arc<RecordingBackup>,
    ) -> LvmDriver {
        let mut conf = LvmConfig::default();
        conf.pool.insert(
            "vg0".to_string(),
            PoolProperties {
                storage_type: "block".into(),
                ..Default::default()
            },
        );
        LvmDriver::new(conf, runner, backup)
    }

    fn create_opts() -> CreateVolumeOpts {
        CreateVolumeOpts {
            id: VOL_ID.into(),
            name: "test-volume".into(),
            size_gib: 10,
            pool_name: "vg0".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_volume_returns_path_metadata() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let display = lvdisplay_for(&path);
        let runner = ScriptedRunner::new().on_script("lvdisplay", &display);
        let driver = driver_with(runner.clone());

        let volume = driver.create_volume(&create_opts()).await.unwrap();

        assert_eq!(volume.status, VolumeStatus::Available);
        assert_eq!(volume.metadata[LV_PATH_KEY], path);
        assert_eq!(volume.size_gib, 10);

        let lvcreate = &runner.calls_of("lvcreate")[0];
        assert!(lvcreate.args.contains(&"10G".to_string()));
        assert!(lvcreate.args.contains(&"vg0".to_string()));
        assert!(runner.calls_of("lvremove").is_empty());
    }

    #[tokio::test]
    async fn test_create_volume_rolls_back_on_display_failure() {
        let runner = ScriptedRunner::new().fail_script("lvdisplay", "no such volume");
        let driver = driver_with(runner.clone());

        let err = driver.create_volume(&create_opts()).await.unwrap_err();
        assert!(matches!(err, Error::BackendExecution { .. }));

        // The partially created object was removed.
        let removed = runner.calls_of("lvremove");
        assert_eq!(removed.len(), 1);
        assert!(removed[0].args.contains(&format!("/dev/vg0/volume-{}", VOL_ID)));
    }

    #[tokio::test]
    async fn test_create_volume_seeds_from_local_snapshot() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let display = lvdisplay_for(&path);
        let runner = ScriptedRunner::new().on_script("lvdisplay", &display);
        let driver = driver_with(runner.clone());

        let mut opts = create_opts();
        opts.snapshot_id = Some("snap1".into());
        opts.snapshot_size_gib = 2;

        driver.create_volume(&opts).await.unwrap();

        let dd = &runner.calls_of("dd")[0];
        assert!(dd.args.contains(&"if=/dev/vg0/_snapshot-snap1".to_string()));
        assert!(dd.args.contains(&format!("of={}", path)));
        // (2 GiB << 30) / 4096 blocks
        assert!(dd.args.contains(&"count=524288".to_string()));
        assert!(dd.args.contains(&"bs=4096".to_string()));
    }

    #[tokio::test]
    async fn test_create_volume_rolls_back_on_seed_failure() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let display = lvdisplay_for(&path);
        let runner = ScriptedRunner::new()
            .on_script("lvdisplay", &display)
            .fail_script("dd", "input/output error");
        let driver = driver_with(runner.clone());

        let mut opts = create_opts();
        opts.snapshot_id = Some("snap1".into());
        opts.snapshot_size_gib = 2;

        driver.create_volume(&opts).await.unwrap_err();
        assert_eq!(runner.calls_of("lvremove").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_volume_is_idempotent() {
        // lvs reports no such volume.
        let runner = ScriptedRunner::new().on_script("lvs", "  vg0 volume-other 10.00\n");
        let driver = driver_with(runner.clone());

        let opts = DeleteVolumeOpts {
            id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata: Metadata::new(),
        };
        driver.delete_volume(&opts).await.unwrap();
        assert!(runner.calls_of("lvremove").is_empty());
    }

    #[tokio::test]
    async fn test_delete_volume_with_snapshot_is_a_conflict() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let lvs_output = format!("  vg0 volume-{} 10.00\n", VOL_ID);
        let runner = ScriptedRunner::new()
            .on_script("lvs", &lvs_output)
            .on(|script, args| {
                (script == "lvdisplay" && args.contains(&"-C"))
                    .then(|| Ok("  owi-aos---\n".to_string()))
            });
        let driver = driver_with(runner.clone());

        let opts = DeleteVolumeOpts {
            id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata: Metadata::from([(LV_PATH_KEY.to_string(), path)]),
        };
        let err = driver.delete_volume(&opts).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(runner.calls_of("lvremove").is_empty());
    }

    #[tokio::test]
    async fn test_delete_volume_removes_lv() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let lvs_output = format!("  vg0 volume-{} 10.00\n", VOL_ID);
        let runner = ScriptedRunner::new()
            .on_script("lvs", &lvs_output)
            .on(|script, args| {
                (script == "lvdisplay" && args.contains(&"-C"))
                    .then(|| Ok("  -wi-a-----\n".to_string()))
            });
        let driver = driver_with(runner.clone());

        let opts = DeleteVolumeOpts {
            id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata: Metadata::from([(LV_PATH_KEY.to_string(), path.clone())]),
        };
        driver.delete_volume(&opts).await.unwrap();

        let removed = runner.calls_of("lvremove");
        assert_eq!(removed.len(), 1);
        assert!(removed[0].args.contains(&path));
    }

    fn extend_opts(path: &str) -> ExtendVolumeOpts {
        ExtendVolumeOpts {
            id: VOL_ID.into(),
            name: "test-volume".into(),
            size_gib: 20,
            pool_name: "vg0".into(),
            metadata: Metadata::from([(LV_PATH_KEY.to_string(), path.to_string())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_extend_deactivates_snapshots_first() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let full_display = format!(
            "  --- Logical volume ---\n  LV Path  {}\n  LV Status  available\n\
             \n  --- Logical volume ---\n  LV Path  /dev/vg0/_snapshot-s1\n\
             \x20 LV snapshot status     active destination for volume-{}\n",
            path, VOL_ID
        );
        let runner = ScriptedRunner::new()
            .on(|script, args| {
                (script == "lvdisplay" && args.contains(&"-C"))
                    .then(|| Ok("  owi-aos---\n".to_string()))
            })
            .on(move |script, args| {
                (script == "lvdisplay" && args.is_empty()).then(|| Ok(full_display.clone()))
            });
        let driver = driver_with(runner.clone());

        let volume = driver.extend_volume(&extend_opts(&path)).await.unwrap();

        let deactivated = runner.calls_of("lvchange");
        assert_eq!(deactivated.len(), 1);
        assert!(deactivated[0].args.contains(&"/dev/vg0/_snapshot-s1".to_string()));

        let resized = runner.calls_of("lvresize");
        assert_eq!(resized.len(), 1);
        assert!(resized[0].args.contains(&"20G".to_string()));

        assert_eq!(volume.status, VolumeStatus::Available);
        assert_eq!(volume.size_gib, 20);
        // Backend metadata round-trips unchanged.
        assert_eq!(volume.metadata[LV_PATH_KEY], path);
    }

    #[tokio::test]
    async fn test_extend_propagates_deactivation_failure() {
        let path = format!("/dev/vg0/volume-{}", VOL_ID);
        let full_display = format!(
            "  --- Logical volume ---\n  LV Path  /dev/vg0/_snapshot-s1\n\
             \x20 LV snapshot status     active destination for volume-{}\n",
            VOL_ID
        );
        let runner = ScriptedRunner::new()
            .on(|script, args| {
                (script == "lvdisplay" && args.contains(&"-C"))
                    .then(|| Ok("  owi-aos---\n".to_string()))
            })
            .on(move |script, args| {
                (script == "lvdisplay" && args.is_empty()).then(|| Ok(full_display.clone()))
            })
            .fail_script("lvchange", "device busy");
        let driver = driver_with(runner.clone());

        driver.extend_volume(&extend_opts(&path)).await.unwrap_err();
        assert!(runner.calls_of("lvresize").is_empty());
    }

    fn snapshot_opts(bucket: Option<&str>) -> CreateSnapshotOpts {
        let mut metadata = Metadata::from([(
            LV_PATH_KEY.to_string(),
            format!("/dev/vg0/volume-{}", VOL_ID),
        )]);
        if let Some(bucket) = bucket {
            metadata.insert(BUCKET_KEY.to_string(), bucket.to_string());
        }
        CreateSnapshotOpts {
            id: "snap1".into(),
            name: "test-snap".into(),
            size_gib: 10,
            volume_id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_snapshot_returns_lvs_path() {
        let display = lvdisplay_for("/dev/vg0/_snapshot-snap1");
        let runner = ScriptedRunner::new().on_script("lvdisplay", &display);
        let driver = driver_with(runner.clone());

        let snapshot = driver.create_snapshot(&snapshot_opts(None)).await.unwrap();

        assert_eq!(snapshot.status, SnapshotStatus::Available);
        assert_eq!(snapshot.metadata[LVS_PATH_KEY], "/dev/vg0/_snapshot-snap1");
        assert!(!snapshot.metadata.contains_key(BACKUP_ID_KEY));

        let lvcreate = &runner.calls_of("lvcreate")[0];
        assert!(lvcreate.args.contains(&"-s".to_string()));
        assert!(lvcreate.args.contains(&format!("/dev/vg0/volume-{}", VOL_ID)));
    }

    #[tokio::test]
    async fn test_create_snapshot_upload_failure_rolls_back() {
        let display = lvdisplay_for("/dev/vg0/_snapshot-snap1");
        let runner = ScriptedRunner::new().on_script("lvdisplay", &display);
        let driver = driver_with_backup(runner.clone(), RecordingBackup::failing());

        let err = driver
            .create_snapshot(&snapshot_opts(Some("archive")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendExecution { .. }));

        // Local snapshot object removed after the failed upload.
        let removed = runner.calls_of("lvremove");
        assert_eq!(removed.len(), 1);
        assert!(removed[0].args.contains(&"/dev/vg0/_snapshot-snap1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_snapshot_removes_uploaded_copy_first() {
        let backup = RecordingBackup::new();
        let lvs_output = "  vg0 _snapshot-snap1 10.00\n";
        let runner = ScriptedRunner::new().on_script("lvs", lvs_output);
        let driver = driver_with_backup(runner.clone(), backup.clone());

        let opts = DeleteSnapshotOpts {
            id: "snap1".into(),
            volume_id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata: Metadata::from([
                (LVS_PATH_KEY.to_string(), "/dev/vg0/_snapshot-snap1".to_string()),
                (BUCKET_KEY.to_string(), "archive".to_string()),
                (BACKUP_ID_KEY.to_string(), "b42".to_string()),
            ]),
        };
        driver.delete_snapshot(&opts).await.unwrap();

        assert_eq!(backup.deleted.lock().unwrap().as_slice(), ["b42"]);
        assert_eq!(runner.calls_of("lvremove").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_snapshot_without_path_metadata_is_ignored() {
        let runner = ScriptedRunner::new();
        let driver = driver_with(runner.clone());

        let opts = DeleteSnapshotOpts {
            id: "snap1".into(),
            ..Default::default()
        };
        driver.delete_snapshot(&opts).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_pools_filters_undeclared_groups() {
        let vgs_output = "  vg0 100.00 80.00 Yr5mEU-vH6E\n  vg1 50.00 50.00 Qx2abc-9f\n";
        let runner = ScriptedRunner::new().on_script("vgs", vgs_output);
        let driver = driver_with(runner.clone());

        let pools = driver.list_pools().await.unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "vg0");
        assert_eq!(pools[0].total_capacity_gib, 100);
        assert_eq!(pools[0].free_capacity_gib, 80);
        assert_eq!(pools[0].availability_zone, "default");

        // Identity is reproducible across repeated discovery.
        let again = driver.list_pools().await.unwrap();
        assert_eq!(pools[0].id, again[0].id);
        assert_eq!(pools[0].id, derive_pool_id("Yr5mEU-vH6E"));
    }

    #[tokio::test]
    async fn test_initialize_connection_defaults_and_chap() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut conf = LvmConfig {
            tgt_conf_dir: dir.path().to_string_lossy().to_string(),
            enable_chap_auth: true,
            ..Default::default()
        };
        conf.pool.insert("vg0".to_string(), PoolProperties::default());
        let driver = LvmDriver::new(conf, runner.clone(), RecordingBackup::new());

        let opts = CreateAttachmentOpts {
            id: "att1".into(),
            volume_id: VOL_ID.into(),
            pool_name: "vg0".into(),
            metadata: Metadata::from([(
                LV_PATH_KEY.to_string(),
                format!("/dev/vg0/volume-{}", VOL_ID),
            )]),
            ..Default::default()
        };
        let info = driver.initialize_connection(&opts).await.unwrap();

        assert_eq!(info.protocol, Protocol::Iscsi);
        assert_eq!(info.data["authMethod"], serde_json::json!("CHAP"));
        let user = info.data["authUsername"].as_str().unwrap();
        let secret = info.data["authPassword"].as_str().unwrap();
        assert_eq!(user.len(), 20);
        assert_eq!(secret.len(), 16);

        // Host fields were omitted, so the export is scoped to everyone.
        let conf_file = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let conf = std::fs::read_to_string(conf_file.path()).unwrap();
        assert!(conf.contains("initiator-address ALL"));
    }

    #[tokio::test]
    async fn test_snapshot_connection_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let conf = LvmConfig {
            tgt_conf_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let driver = LvmDriver::new(conf, runner.clone(), RecordingBackup::new());

        let opts = SnapshotAttachmentOpts {
            snapshot_id: "snap1".into(),
            pool_name: "vg0".into(),
            metadata: Metadata::from([(
                LVS_PATH_KEY.to_string(),
                "/dev/vg0/_snapshot-snap1".to_string(),
            )]),
            ..Default::default()
        };

        let info = driver.initialize_snapshot_connection(&opts).await.unwrap();
        assert_eq!(info.protocol, Protocol::Iscsi);
        assert!(info.data["targetIQN"]
            .as_str()
            .unwrap()
            .ends_with("snap1"));

        driver.terminate_snapshot_connection(&opts).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_setup_requires_declared_pools() {
        let runner = ScriptedRunner::new();
        let driver = LvmDriver::new(LvmConfig::default(), runner, RecordingBackup::new());
        let err = driver.setup().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
