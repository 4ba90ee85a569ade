//! Temporary private-key material.

use crate::sftp_cli::error::SftpCliResult;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Stages key text on disk for `-i` and removes it again.
pub trait KeyMaterial: Send + Sync {
    fn stage(&self, private_key: &str) -> SftpCliResult<PathBuf>;
    fn remove(&self, path: &Path);
}

/// Writes keys to owner-only temp files.
#[derive(Debug, Clone, Default)]
pub struct TempKeyFiles {
    dir: Option<PathBuf>,
}

impl TempKeyFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

impl KeyMaterial for TempKeyFiles {
    fn stage(&self, private_key: &str) -> SftpCliResult<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sorng_sftp_cli_key_");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(private_key.as_bytes())?;
        if !private_key.ends_with('\n') {
            // ssh rejects keys without a trailing newline
            file.write_all(b"\n")?;
        }
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        log::debug!("staged private key at {}", path.display());
        Ok(path)
    }

    fn remove(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("failed to remove staged key {}: {}", path.display(), e);
        }
    }
}
