//! Fibre-Channel connector
//!
//! Maps an FC export descriptor (target WWNs, LUN) to a host device path via
//! the by-path naming the host bus adapter enforces, with a bounded
//! retry/rescan discovery loop: newly exported LUNs may appear on the host
//! bus with latency after the backend confirms the export.

use crate::connector::{Connector, DeviceInfo};
use crate::domain::model::{ConnectionInfo, InitiatorInfo, Protocol};
use crate::drivers::exec::{CommandRunnerRef, ShellRunner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded-retry discovery parameters
const DISCOVERY_TRIES: u32 = 3;
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// Connection Data
// =============================================================================

/// FC export descriptor decoded from [`ConnectionInfo::data`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FcConnectionData {
    #[serde(default, rename = "targetDiscovered")]
    pub target_discovered: bool,
    #[serde(default, rename = "target_wwn")]
    pub target_wwn: Vec<String>,
    #[serde(default, rename = "target_lun")]
    pub target_lun: u32,
    #[serde(default, rename = "volume_id")]
    pub volume_id: String,
    #[serde(default, rename = "initiator_target_map")]
    pub initiator_target_map: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "host_name")]
    pub host_name: String,
}

impl FcConnectionData {
    fn parse(conn: &ConnectionInfo) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> =
            conn.data.clone().into_iter().collect();
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }
}

// =============================================================================
// Host Primitives
// =============================================================================

/// One FC host bus adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HbaInfo {
    /// WWPN without the `0x` prefix
    pub port_name: String,
    /// WWNN without the `0x` prefix
    pub node_name: String,
    /// SCSI host device, e.g. `host5`
    pub host_device: String,
    /// Resolved sysfs device path of the adapter
    pub device_path: String,
}

/// Host-side primitives the discovery logic runs against. Kept behind a trait
/// so the retry/rescan loop is testable without FC hardware.
#[async_trait]
pub trait FcHost: Send + Sync {
    async fn hbas(&self) -> Result<Vec<HbaInfo>>;
    async fn path_exists(&self, path: &str) -> bool;
    /// Device name behind a by-path symlink, e.g. `sdb`
    async fn resolve_device(&self, path: &str) -> Result<String>;
    async fn rescan_hosts(&self, target_wwns: &[String], hbas: &[HbaInfo]) -> Result<()>;
    async fn scsi_wwn(&self, device_path: &str) -> Result<String>;
    async fn flush_device_io(&self, device: &str) -> Result<()>;
    async fn remove_scsi_device(&self, sysfs_delete_path: &str) -> Result<()>;
    async fn host_name(&self) -> Result<String>;
}

pub type FcHostRef = Arc<dyn FcHost>;

// =============================================================================
// LUN Encoding
// =============================================================================

/// Render a LUN number the way the host bus adapter names device paths:
/// decimal below 256, a 16-hex-digit low/high 16-bit split at or above.
pub fn encode_lun(lun: u32) -> String {
    if lun < 256 {
        lun.to_string()
    } else {
        format!("0x{:04x}{:04x}00000000", lun & 0xffff, (lun >> 16) & 0xffff)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Fibre-Channel connector over pluggable host primitives
pub struct FibreChannelConnector {
    host: FcHostRef,
}

impl FibreChannelConnector {
    pub fn new(host: FcHostRef) -> Self {
        Self { host }
    }

    /// Connector over the real sysfs of this host.
    pub fn with_default_host() -> Self {
        Self::new(Arc::new(SysfsFcHost::new("/sys", ShellRunner::new())))
    }

    /// PCI number of an adapter, taken from the path component preceding the
    /// first `net`/`host` component of its sysfs device path.
    fn pci_num(hba: &HbaInfo) -> Option<String> {
        let parts: Vec<&str> = hba.device_path.split('/').collect();
        parts
            .iter()
            .position(|p| p.contains("net") || p.contains("host"))
            .and_then(|idx| idx.checked_sub(1))
            .map(|idx| parts[idx].to_string())
    }

    /// Candidate by-path device paths for every (adapter, target WWN) pair.
    /// The OS enforces path uniqueness per pci/target/LUN tuple, so the first
    /// existing candidate wins with no tie-break.
    fn candidate_paths(conn: &FcConnectionData, hbas: &[HbaInfo]) -> Vec<String> {
        let lun = encode_lun(conn.target_lun);
        let mut paths = Vec::new();
        for hba in hbas {
            if let Some(pci) = Self::pci_num(hba) {
                for wwn in &conn.target_wwn {
                    paths.push(format!(
                        "/dev/disk/by-path/pci-{}-fc-0x{}-lun-{}",
                        pci, wwn, lun
                    ));
                }
            }
        }
        paths
    }

    /// Bounded-retry discovery: for each attempt, iterate every candidate
    /// path and return the first that exists, resolved to its device name; a
    /// missing candidate triggers a host-bus rescan, and an exhausted pass
    /// sleeps before the next attempt. `None` means no device appeared.
    async fn vol_path_discovery(
        &self,
        candidates: &[String],
        target_wwns: &[String],
        hbas: &[HbaInfo],
    ) -> Result<Option<(String, String)>> {
        for attempt in 0..DISCOVERY_TRIES {
            for path in candidates {
                if self.host.path_exists(path).await {
                    let device_name = self.host.resolve_device(path).await?;
                    debug!(
                        "Found device {} at {} on attempt {}",
                        device_name,
                        path,
                        attempt + 1
                    );
                    return Ok(Some((path.clone(), device_name)));
                }
                self.host.rescan_hosts(target_wwns, hbas).await?;
            }
            tokio::time::sleep(DISCOVERY_INTERVAL).await;
        }
        Ok(None)
    }

    /// Candidate paths that currently exist on the host, for teardown.
    async fn existing_paths(&self, conn: &FcConnectionData) -> Result<Vec<String>> {
        let hbas = self.host.hbas().await?;
        let mut existing = Vec::new();
        for path in Self::candidate_paths(conn, &hbas) {
            if self.host.path_exists(&path).await {
                existing.push(path);
            }
        }
        Ok(existing)
    }
}

#[async_trait]
impl Connector for FibreChannelConnector {
    async fn attach(&self, conn: &ConnectionInfo) -> Result<DeviceInfo> {
        let data = FcConnectionData::parse(conn)?;
        let hbas = self.host.hbas().await?;

        let candidates = Self::candidate_paths(&data, &hbas);
        if candidates.is_empty() {
            return Err(Error::BackendUnavailable {
                backend: "fibre_channel".into(),
            });
        }

        let (device_path, device_name) = self
            .vol_path_discovery(&candidates, &data.target_wwn, &hbas)
            .await?
            .ok_or(Error::DiscoveryTimeout {
                resource: data.volume_id.clone(),
                attempts: DISCOVERY_TRIES,
            })?;
        info!(
            "Found fibre channel volume {}: path {}, device {}",
            data.volume_id, device_path, device_name
        );

        let scsi_wwn = self.host.scsi_wwn(&device_path).await?;
        Ok(DeviceInfo {
            path: device_path,
            scsi_wwn,
        })
    }

    async fn detach(&self, conn: &ConnectionInfo) -> Result<()> {
        let data = FcConnectionData::parse(conn)?;

        for path in self.existing_paths(&data).await? {
            let device_name = self.host.resolve_device(&path).await?;
            let delete_path = format!("/sys/block/{}/device/delete", device_name);
            if self.host.path_exists(&delete_path).await {
                self.host
                    .flush_device_io(&format!("/dev/{}", device_name))
                    .await?;
                self.host.remove_scsi_device(&delete_path).await?;
            } else {
                debug!("Device {} already gone, skipping removal", device_name);
            }
        }
        Ok(())
    }

    async fn initiator_info(&self) -> Result<InitiatorInfo> {
        let hbas = self.host.hbas().await?;

        let wwpns: Vec<String> = hbas.iter().map(|h| h.port_name.clone()).collect();
        let wwnns: Vec<String> = hbas.iter().map(|h| h.node_name.clone()).collect();

        let mut initiator_data = BTreeMap::new();
        initiator_data.insert("wwpn".to_string(), serde_json::json!(wwpns));
        initiator_data.insert("wwnn".to_string(), serde_json::json!(wwnns));

        Ok(InitiatorInfo {
            host_name: self.host.host_name().await?,
            initiator_data,
        })
    }

    fn protocol(&self) -> Protocol {
        Protocol::FibreChannel
    }
}

// =============================================================================
// Sysfs Host
// =============================================================================

/// Real host primitives over sysfs and the udev/blockdev tools
pub struct SysfsFcHost {
    root: PathBuf,
    runner: CommandRunnerRef,
}

impl SysfsFcHost {
    pub fn new(root: &str, runner: CommandRunnerRef) -> Self {
        Self {
            root: PathBuf::from(root),
            runner,
        }
    }

    async fn read_attr(&self, path: &std::path::Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?.trim().to_string())
    }
}

#[async_trait]
impl FcHost for SysfsFcHost {
    async fn hbas(&self) -> Result<Vec<HbaInfo>> {
        let fc_host_dir = self.root.join("class/fc_host");
        let mut entries = match tokio::fs::read_dir(&fc_host_dir).await {
            Ok(entries) => entries,
            Err(_) => {
                debug!("No fc_host class at {:?}", fc_host_dir);
                return Ok(Vec::new());
            }
        };

        let mut hbas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let host_device = entry.file_name().to_string_lossy().to_string();
            if !host_device.starts_with("host") {
                continue;
            }

            let port_name = self.read_attr(&entry.path().join("port_name")).await?;
            let node_name = self.read_attr(&entry.path().join("node_name")).await?;
            let device_path = tokio::fs::canonicalize(entry.path())
                .await
                .unwrap_or_else(|_| entry.path())
                .to_string_lossy()
                .to_string();

            hbas.push(HbaInfo {
                port_name: port_name.trim_start_matches("0x").to_string(),
                node_name: node_name.trim_start_matches("0x").to_string(),
                host_device,
                device_path,
            });
        }
        Ok(hbas)
    }

    async fn path_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn resolve_device(&self, path: &str) -> Result<String> {
        let real = tokio::fs::canonicalize(path).await?;
        real.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| Error::not_found("device", path))
    }

    async fn rescan_hosts(&self, _target_wwns: &[String], hbas: &[HbaInfo]) -> Result<()> {
        for hba in hbas {
            let scan = self
                .root
                .join("class/scsi_host")
                .join(&hba.host_device)
                .join("scan");
            if let Err(e) = tokio::fs::write(&scan, "- - -").await {
                warn!("Rescan of {} failed: {}", hba.host_device, e);
            }
        }
        Ok(())
    }

    async fn scsi_wwn(&self, device_path: &str) -> Result<String> {
        let out = self
            .runner
            .run(
                "/lib/udev/scsi_id",
                &["--page", "0x83", "--whitelisted", device_path],
            )
            .await?;
        Ok(out.trim().to_string())
    }

    async fn flush_device_io(&self, device: &str) -> Result<()> {
        self.runner.run("blockdev", &["--flushbufs", device]).await?;
        Ok(())
    }

    async fn remove_scsi_device(&self, sysfs_delete_path: &str) -> Result<()> {
        tokio::fs::write(sysfs_delete_path, "1").await?;
        Ok(())
    }

    async fn host_name(&self) -> Result<String> {
        if let Ok(name) = tokio::fs::read_to_string("/etc/hostname").await {
            return Ok(name.trim().to_string());
        }
        let out = self.runner.run("hostname", &[]).await?;
        Ok(out.trim().to_string())
    }
}
