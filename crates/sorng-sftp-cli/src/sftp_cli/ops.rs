//! High-level file operations on [`SftpSession`].
//!
//! Each operation is a thin composition of raw commands plus the decoders:
//! reads go through the listing cache, mutations error-check their reply
//! and drop the cache entry of every parent they touch, and creations
//! poll (`RetryPolicy`) until the new path shows up in a fresh listing.

use crate::sftp_cli::client::SftpSession;
use crate::sftp_cli::decode;
use crate::sftp_cli::error::{SftpCliError, SftpCliErrorKind, SftpCliResult};
use crate::sftp_cli::retry::RetryPolicy;
use crate::sftp_cli::types::{
    basename, join_remote, split_parent, DirEntry, StatRecord, TransferProgress,
};
use std::path::Path;
use tokio::sync::mpsc;

pub type TransferProgressSender = mpsc::UnboundedSender<TransferProgress>;

impl SftpSession {
    // ── Reads ────────────────────────────────────────────────────────

    /// Entries of `path`, served from the cache when fresh enough.
    pub async fn list_dir(&self, path: &str) -> SftpCliResult<Vec<DirEntry>> {
        self.listing(path, false).await
    }

    pub async fn stat(&self, path: &str) -> SftpCliResult<StatRecord> {
        self.stat_entry(path, false).await
    }

    pub async fn exists(&self, path: &str) -> SftpCliResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == SftpCliErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remote working directory.
    pub async fn pwd(&self) -> SftpCliResult<String> {
        let lines = self.command("pwd", "pwd".to_string(), Vec::new(), None).await?;
        self.check("pwd", &lines)?;
        decode::parse_pwd(&lines).ok_or_else(|| {
            SftpCliError::command_failed("unrecognised pwd reply")
                .with_command("pwd")
                .with_session(self.id())
        })
    }

    async fn stat_entry(&self, path: &str, fresh: bool) -> SftpCliResult<StatRecord> {
        let (parent, leaf) = self.resolve_parent(path).await?;
        let entries = self.listing(&parent, fresh).await?;
        entries
            .into_iter()
            .find(|e| basename(&e.path) == leaf)
            .map(StatRecord::from)
            .ok_or_else(|| {
                SftpCliError::not_found(format!("No such file or directory: {}", path))
                    .with_session(self.id())
            })
    }

    /// Absolute parent directory and leaf name of `path`.
    async fn resolve_parent(&self, path: &str) -> SftpCliResult<(String, String)> {
        let (parent, leaf) = split_parent(path).map_err(|e| e.with_session(self.id()))?;
        if parent.starts_with('/') {
            return Ok((parent, leaf));
        }
        let cwd = self.pwd().await?;
        Ok((join_remote(&cwd, &parent), leaf))
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub async fn cd(&self, path: &str) -> SftpCliResult<()> {
        self.mutate("cd", format!("cd {}", decode::quote_path(path)), Vec::new())
            .await
    }

    /// Create a directory and wait until a fresh listing shows it.
    pub async fn mkdir(&self, path: &str) -> SftpCliResult<StatRecord> {
        let (parent, _) = self.resolve_parent(path).await?;
        self.mutate("mkdir", format!("mkdir {}", decode::quote_path(path)), vec![parent])
            .await?;
        self.await_materialized("mkdir", path, self.config().mkdir_retry, None)
            .await
    }

    pub async fn rmdir(&self, path: &str) -> SftpCliResult<()> {
        let (parent, _) = self.resolve_parent(path).await?;
        // the removed directory's own listing is gone too
        let own = join_remote(&parent, basename(path));
        self.mutate("rmdir", format!("rmdir {}", decode::quote_path(path)), vec![parent, own])
            .await
    }

    pub async fn remove(&self, path: &str) -> SftpCliResult<()> {
        let (parent, _) = self.resolve_parent(path).await?;
        self.mutate("rm", format!("rm {}", decode::quote_path(path)), vec![parent])
            .await
    }

    pub async fn rename(&self, from: &str, to: &str) -> SftpCliResult<()> {
        let (from_parent, _) = self.resolve_parent(from).await?;
        let (to_parent, _) = self.resolve_parent(to).await?;
        self.mutate(
            "rename",
            format!("rename {} {}", decode::quote_path(from), decode::quote_path(to)),
            vec![from_parent, to_parent],
        )
        .await
    }

    /// `mode` is written in octal, e.g. `0o644` → `chmod 644`.
    pub async fn chmod(&self, path: &str, mode: u32) -> SftpCliResult<()> {
        let (parent, _) = self.resolve_parent(path).await?;
        self.mutate(
            "chmod",
            format!("chmod {:o} {}", mode, decode::quote_path(path)),
            vec![parent],
        )
        .await
    }

    // ── Transfers ────────────────────────────────────────────────────

    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: Option<TransferProgressSender>,
    ) -> SftpCliResult<()> {
        let line = format!(
            "get {} {}",
            decode::quote_path(remote),
            decode::quote_path(&local.display().to_string())
        );
        self.transfer("get", line, Vec::new(), progress).await?;
        Ok(())
    }

    /// Upload and wait until the remote listing shows the file.
    pub async fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<TransferProgressSender>,
    ) -> SftpCliResult<StatRecord> {
        self.put_file(local, remote, progress, None).await
    }

    pub async fn read_file(&self, remote: &str) -> SftpCliResult<Vec<u8>> {
        let staging = self.local.staging_path();
        let result = match self.download(remote, &staging, None).await {
            Ok(()) => self.local.read(&staging).await,
            Err(e) => Err(e),
        };
        self.discard_staging(&staging).await;
        result
    }

    pub async fn read_to_string(&self, remote: &str) -> SftpCliResult<String> {
        let data = self.read_file(remote).await?;
        String::from_utf8(data).map_err(|e| {
            SftpCliError::local_io(format!("{} is not valid UTF-8: {}", remote, e))
                .with_session(self.id())
        })
    }

    /// Write `data` to `remote`; resolves once the listing reports the
    /// full size.
    pub async fn write_file(&self, remote: &str, data: &[u8]) -> SftpCliResult<StatRecord> {
        let staging = self.local.staging_path();
        let result = match self.local.write(&staging, data).await {
            Ok(()) => {
                self.put_file(&staging, remote, None, Some(data.len() as u64))
                    .await
            }
            Err(e) => Err(e),
        };
        self.discard_staging(&staging).await;
        result
    }

    async fn put_file(
        &self,
        local: &Path,
        remote: &str,
        progress: Option<TransferProgressSender>,
        expected_size: Option<u64>,
    ) -> SftpCliResult<StatRecord> {
        let (parent, _) = self.resolve_parent(remote).await?;
        let line = format!(
            "put {} {}",
            decode::quote_path(&local.display().to_string()),
            decode::quote_path(remote)
        );
        self.transfer("put", line, vec![parent], progress).await?;
        self.await_materialized("put", remote, self.config().write_retry, expected_size)
            .await
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn mutate(&self, tag: &str, line: String, invalidates: Vec<String>) -> SftpCliResult<()> {
        let lines = self.command(tag, line.clone(), invalidates, None).await?;
        self.check(&line, &lines)
    }

    async fn transfer(
        &self,
        tag: &str,
        line: String,
        invalidates: Vec<String>,
        progress: Option<TransferProgressSender>,
    ) -> SftpCliResult<Vec<String>> {
        let lines = match progress {
            Some(out) => {
                let (raw_tx, raw_rx) = mpsc::unbounded_channel();
                let (lines, _) = tokio::join!(
                    self.command(tag, line.clone(), invalidates, Some(raw_tx)),
                    forward_progress(raw_rx, out)
                );
                lines?
            }
            None => self.command(tag, line.clone(), invalidates, None).await?,
        };
        self.check(&line, &lines)?;
        Ok(lines)
    }

    /// Poll fresh listings until `path` appears (with `expected_size`, when
    /// given).
    async fn await_materialized(
        &self,
        label: &str,
        path: &str,
        policy: RetryPolicy,
        expected_size: Option<u64>,
    ) -> SftpCliResult<StatRecord> {
        let label = format!("[sftp-cli:{}] {} {}", self.id(), label, path);
        policy
            .run(&label, move |_| async move {
                match self.stat_entry(path, true).await {
                    Ok(record) if expected_size.map_or(true, |n| record.size() == n) => {
                        Ok(Some(record))
                    }
                    Ok(_) => Ok(None),
                    Err(e) if e.kind == SftpCliErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| e.with_session(self.id()))
    }

    fn check(&self, command_line: &str, lines: &[String]) -> SftpCliResult<()> {
        match decode::is_error(lines, &self.config().markers.failure_phrases) {
            Some(err) => Err(err.with_command(command_line).with_session(self.id())),
            None => Ok(()),
        }
    }

    async fn discard_staging(&self, staging: &Path) {
        if let Err(e) = self.local.unlink(staging).await {
            log::debug!("[sftp-cli:{}] staging cleanup: {}", self.id(), e);
        }
    }
}

async fn forward_progress(
    mut raw: mpsc::UnboundedReceiver<String>,
    out: TransferProgressSender,
) {
    // ends when the request (and with it the raw sender) is dropped
    while let Some(chunk) = raw.recv().await {
        if let Some(progress) = decode::parse_progress(&chunk) {
            let _ = out.send(progress);
        }
    }
}
