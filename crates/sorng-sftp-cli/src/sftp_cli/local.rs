//! Local staging files for `get`/`put` transfers.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait LocalFiles: Send + Sync {
    async fn read(&self, path: &Path) -> SftpCliResult<Vec<u8>>;

    async fn write(&self, path: &Path, data: &[u8]) -> SftpCliResult<()>;

    async fn unlink(&self, path: &Path) -> SftpCliResult<()>;

    /// Fresh, unused path for one staged payload.
    fn staging_path(&self) -> PathBuf;
}

/// `tokio::fs`-backed staging under a directory (the system temp dir by default).
#[derive(Debug, Clone)]
pub struct TokioLocalFiles {
    staging_dir: PathBuf,
}

impl Default for TokioLocalFiles {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
        }
    }
}

impl TokioLocalFiles {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }
}

#[async_trait]
impl LocalFiles for TokioLocalFiles {
    async fn read(&self, path: &Path) -> SftpCliResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| SftpCliError::local_io(format!("read {}: {}", path.display(), e)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> SftpCliResult<()> {
        tokio::fs::write(path, data)
            .await
            .map_err(|e| SftpCliError::local_io(format!("write {}: {}", path.display(), e)))
    }

    async fn unlink(&self, path: &Path) -> SftpCliResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| SftpCliError::local_io(format!("unlink {}: {}", path.display(), e)))
    }

    fn staging_path(&self) -> PathBuf {
        self.staging_dir
            .join(format!("sorng_sftp_cli_{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_cli::error::SftpCliErrorKind;

    #[tokio::test]
    async fn write_read_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let files = TokioLocalFiles::new(dir.path());
        let path = files.staging_path();
        assert!(path.starts_with(dir.path()));
        assert_ne!(path, files.staging_path());

        files.write(&path, b"payload").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap(), b"payload");
        files.unlink(&path).await.unwrap();

        let err = files.read(&path).await.unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::LocalIo);
    }
}
