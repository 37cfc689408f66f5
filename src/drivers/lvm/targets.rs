//! iSCSI target management for the logical-volume driver
//!
//! Renders a tgtd target definition into the configured conf dir and applies
//! it with `tgt-admin`. The returned connection data map is the opaque
//! protocol payload callers hand to a host-side connector.

use crate::drivers::exec::CommandRunnerRef;
use crate::error::Result;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

const IQN_PREFIX: &str = "iqn.2019-03.org.blockplane:";
const ISCSI_PORT: u16 = 3260;

/// Manages tgtd exports for one backend.
pub struct IscsiTarget {
    bind_ip: String,
    conf_dir: PathBuf,
    runner: CommandRunnerRef,
}

impl IscsiTarget {
    pub fn new(bind_ip: &str, conf_dir: &str, runner: CommandRunnerRef) -> Self {
        Self {
            bind_ip: bind_ip.to_string(),
            conf_dir: PathBuf::from(conf_dir),
            runner,
        }
    }

    fn iqn_for(resource_id: &str) -> String {
        format!("{}{}", IQN_PREFIX, resource_id)
    }

    fn conf_path_for(&self, iqn: &str) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", iqn))
    }

    /// Export `device_path` as an iSCSI target scoped to the given host and
    /// initiator (`"ALL"` exports to every host). Returns the connection data
    /// map consumed by host-side connectors.
    pub async fn create_export(
        &self,
        resource_id: &str,
        device_path: &str,
        host_ip: &str,
        initiator: &str,
        chap: Option<(String, String)>,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let iqn = Self::iqn_for(resource_id);

        let mut conf = format!("<target {}>\n    backing-store {}\n", iqn, device_path);
        conf.push_str(&format!("    initiator-address {}\n", host_ip));
        if initiator != "ALL" {
            conf.push_str(&format!("    initiator-name {}\n", initiator));
        }
        if let Some((user, secret)) = &chap {
            conf.push_str(&format!("    incominguser {} {}\n", user, secret));
        }
        conf.push_str("</target>\n");

        tokio::fs::create_dir_all(&self.conf_dir).await?;
        tokio::fs::write(self.conf_path_for(&iqn), conf).await?;

        self.runner.run("tgt-admin", &["--update", &iqn]).await?;
        info!("Created iscsi export {} for {}", iqn, device_path);

        let mut data = BTreeMap::new();
        data.insert("targetDiscovered".to_string(), json!(true));
        data.insert("targetIQN".to_string(), json!(iqn));
        data.insert(
            "targetPortal".to_string(),
            json!(format!("{}:{}", self.bind_ip, ISCSI_PORT)),
        );
        data.insert("targetLun".to_string(), json!(1));
        if let Some((user, secret)) = chap {
            data.insert("authMethod".to_string(), json!("CHAP"));
            data.insert("authUsername".to_string(), json!(user));
            data.insert("authPassword".to_string(), json!(secret));
        }
        Ok(data)
    }

    /// Tear down the export for `resource_id`. A target whose conf file is
    /// already gone is skipped, not failed.
    pub async fn remove_export(&self, resource_id: &str) -> Result<()> {
        let iqn = Self::iqn_for(resource_id);
        let conf_path = self.conf_path_for(&iqn);

        if tokio::fs::metadata(&conf_path).await.is_err() {
            warn!("Export {} has no conf file, nothing to remove", iqn);
            return Ok(());
        }

        self.runner
            .run("tgt-admin", &["--delete", &iqn, "--force"])
            .await?;
        tokio::fs::remove_file(&conf_path).await?;
        info!("Removed iscsi export {}", iqn);
        Ok(())
    }
}
