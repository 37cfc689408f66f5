//! Backup/object-store collaborator
//!
//! Drivers upload snapshot content through this port when a request carries a
//! `bucket` key. Acquisition is scoped: `set_up` is called before and
//! `clean_up` after each upload/download. The object-store transport itself
//! is opaque to the control plane; a local-directory implementation backs
//! tests and standalone deployments.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

/// Identifies one archived object; `metadata["bucket"]` names the container.
#[derive(Debug, Clone, Default)]
pub struct BackupSpec {
    pub id: String,
    pub metadata: BTreeMap<String, String>,
}

impl BackupSpec {
    fn bucket(&self) -> Result<&str> {
        self.metadata
            .get("bucket")
            .map(String::as_str)
            .ok_or_else(|| Error::Validation("backup spec is missing the bucket key".into()))
    }
}

/// Scoped object-store client used for snapshot upload/download.
#[async_trait]
pub trait BackupDriver: Send + Sync {
    async fn set_up(&self) -> Result<()>;
    async fn backup(
        &self,
        spec: &BackupSpec,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()>;
    async fn restore(
        &self,
        spec: &BackupSpec,
        backup_id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
    async fn delete(&self, spec: &BackupSpec) -> Result<()>;
    async fn clean_up(&self) -> Result<()>;
}

pub type BackupDriverRef = Arc<dyn BackupDriver>;

/// Resolve a backup backend kind. Unknown kinds are a terminal
/// `NotImplemented`, not a retryable failure.
pub fn new_backup(kind: &str, root: &str) -> Result<BackupDriverRef> {
    match kind {
        "file" => Ok(Arc::new(FileBackup::new(root))),
        other => Err(Error::not_implemented(&format!("backup driver {}", other))),
    }
}

// =============================================================================
// Local-Directory Backup
// =============================================================================

/// Stores archived objects as `<root>/<bucket>/<id>` files.
pub struct FileBackup {
    root: PathBuf,
}

impl FileBackup {
    pub fn new(root: &str) -> Self {
        Self {
            root: PathBuf::from(root),
        }
    }

    fn object_path(&self, bucket: &str, id: &str) -> PathBuf {
        self.root.join(bucket).join(id)
    }
}

#[async_trait]
impl BackupDriver for FileBackup {
    async fn set_up(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn backup(
        &self,
        spec: &BackupSpec,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        let bucket = spec.bucket()?;
        tokio::fs::create_dir_all(self.root.join(bucket)).await?;

        let path = self.object_path(bucket, &spec.id);
        let mut file = tokio::fs::File::create(&path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        info!("Archived {} bytes to {}", written, path.display());
        Ok(())
    }

    async fn restore(
        &self,
        spec: &BackupSpec,
        backup_id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let bucket = spec.bucket()?;
        let path = self.object_path(bucket, backup_id);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| Error::not_found("backup", backup_id))?;
        tokio::io::copy(&mut file, writer).await?;
        Ok(())
    }

    async fn delete(&self, spec: &BackupSpec) -> Result<()> {
        let bucket = spec.bucket()?;
        let path = self.object_path(bucket, &spec.id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Backup {} already absent, nothing to remove", spec.id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording backup driver for driver tests.

    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    pub struct RecordingBackup {
        /// backup id -> uploaded bytes
        pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
        pub deleted: Mutex<Vec<String>>,
        pub fail_backup: bool,
    }

    impl RecordingBackup {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail_backup: true,
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl BackupDriver for RecordingBackup {
        async fn set_up(&self) -> Result<()> {
            Ok(())
        }

        async fn backup(
            &self,
            spec: &BackupSpec,
            reader: &mut (dyn AsyncRead + Unpin + Send),
        ) -> Result<()> {
            if self.fail_backup {
                return Err(Error::BackendExecution {
                    command: "backup".into(),
                    reason: "upload refused".into(),
                });
            }
            spec.bucket()?;
            let mut content = Vec::new();
            reader.read_to_end(&mut content).await?;
            self.objects
                .lock()
                .unwrap()
                .insert(spec.id.clone(), content);
            Ok(())
        }

        async fn restore(
            &self,
            _spec: &BackupSpec,
            backup_id: &str,
            writer: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<()> {
            use tokio::io::AsyncWriteExt;
            let content = self
                .objects
                .lock()
                .unwrap()
                .get(backup_id)
                .cloned()
                .ok_or_else(|| Error::not_found("backup", backup_id))?;
            writer.write_all(&content).await?;
            Ok(())
        }

        async fn delete(&self, spec: &BackupSpec) -> Result<()> {
            self.objects.lock().unwrap().remove(&spec.id);
            self.deleted.lock().unwrap().push(spec.id.clone());
            Ok(())
        }

        async fn clean_up(&self) -> Result<()> {
            Ok(())
        }
    }
}
