//! sftp-cli types: configuration, reply markers, session state, events,
//! and the value objects handed back to callers.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use crate::sftp_cli::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ── Configuration ───────────────────────────────────────────────────────

/// Configuration for one sftp-cli connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Written to the terminal when the password prompt appears.
    #[serde(default)]
    pub password: Option<String>,
    /// Identity file already on disk.
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// Key text; staged to a temp file for the lifetime of the connection.
    #[serde(default)]
    pub private_key_data: Option<String>,
    /// Inactivity timeout handed to the transport (and to `ConnectTimeout`).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pass `-v` to the child.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub remote_home: Option<String>,
    #[serde(default)]
    pub initial_directory: Option<String>,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
    #[serde(default)]
    pub markers: ReplyMarkers,
    #[serde(default)]
    pub listing: ListingFlags,
    #[serde(default = "default_mkdir_retry")]
    pub mkdir_retry: RetryPolicy,
    #[serde(default = "default_write_retry")]
    pub write_retry: RetryPolicy,
    /// Connection label / friendly name.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_port() -> u16 { 22 }
fn default_timeout_secs() -> u64 { 30 }
fn default_program() -> String { "sftp".to_string() }
fn default_line_ending() -> String { "\n".to_string() }
fn default_mkdir_retry() -> RetryPolicy { RetryPolicy::new(10, 250) }
fn default_write_retry() -> RetryPolicy { RetryPolicy::new(20, 500) }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: None,
            private_key_path: None,
            private_key_data: None,
            timeout_secs: default_timeout_secs(),
            debug: false,
            remote_home: None,
            initial_directory: None,
            program: default_program(),
            line_ending: default_line_ending(),
            markers: ReplyMarkers::default(),
            listing: ListingFlags::default(),
            mkdir_retry: default_mkdir_retry(),
            write_retry: default_write_retry(),
            label: None,
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> SftpCliResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| SftpCliError::invalid_config(format!("bad session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SftpCliResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> SftpCliResult<()> {
        if self.host.trim().is_empty() {
            return Err(SftpCliError::invalid_config("host is required"));
        }
        if self.username.trim().is_empty() {
            return Err(SftpCliError::invalid_config("username is required"));
        }
        if self.port == 0 {
            return Err(SftpCliError::invalid_config("port must be non-zero"));
        }
        if self.private_key_path.is_some() && self.private_key_data.is_some() {
            return Err(SftpCliError::invalid_config(
                "privateKeyPath and privateKeyData are mutually exclusive",
            ));
        }
        if self.markers.prompt.is_empty() {
            return Err(SftpCliError::invalid_config("prompt marker must not be empty"));
        }
        Ok(())
    }

    /// Initial remote directory: `remote_home` joined with `initial_directory`.
    pub fn initial_remote_dir(&self) -> Option<String> {
        match (self.remote_home.as_deref(), self.initial_directory.as_deref()) {
            (None, None) => None,
            (Some(home), None) => Some(home.to_string()),
            (None, Some(dir)) => Some(dir.to_string()),
            (Some(_), Some(dir)) if dir.starts_with('/') => Some(dir.to_string()),
            (Some(home), Some(dir)) => Some(format!(
                "{}/{}",
                home.trim_end_matches('/'),
                dir.trim_start_matches("./")
            )),
        }
    }
}

/// Text sentinels recognised in the child's terminal output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplyMarkers {
    /// Printed when the child is ready for the next command.
    pub prompt: String,
    /// Matched case-insensitively.
    pub password_prompt: String,
    /// Completes the terminating command.
    pub disconnect_ack: String,
    pub remote_closed: String,
    /// Checked only while the handshake is open.
    pub fatal: Vec<String>,
    /// Any reply line containing one of these is an error.
    pub failure_phrases: Vec<String>,
}

impl Default for ReplyMarkers {
    fn default() -> Self {
        Self {
            prompt: "sftp>".to_string(),
            password_prompt: "password:".to_string(),
            disconnect_ack: "bye".to_string(),
            remote_closed: "closed by remote host".to_string(),
            fatal: [
                "Operation timed out",
                "Connection timed out",
                "Connection closed",
                "Connection reset",
                "Permission denied",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            failure_phrases: [
                "No such file or directory",
                "Permission denied",
                "not found",
                "Couldn't",
                "Failure",
                "Invalid command",
                "Can't ls",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Optional `ls` flags, each passed only when the server advertises it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingFlags {
    /// `-a`
    pub all: bool,
    /// `-n`
    pub numeric_ids: bool,
    /// `-t`
    pub sort_by_time: bool,
}

impl Default for ListingFlags {
    fn default() -> Self {
        Self {
            all: true,
            numeric_ids: false,
            sort_by_time: false,
        }
    }
}

// ── Session state & events ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Broadcast to every subscriber of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Ready,
    Connect,
    Disconnect { code: Option<i32> },
    Data { chunk: String },
}

/// Point-in-time view of a session, for host UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub label: Option<String>,
    pub host: String,
    pub state: SessionState,
    pub active_command: Option<String>,
    pub queued: usize,
    pub cached_paths: usize,
    pub supported_commands: usize,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Transfer percentage scraped from progress output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub percent: u8,
    pub raw: String,
}

// ── Remote entries ──────────────────────────────────────────────────────

/// One decoded `ls -l` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub permissions: String,
    pub hard_links: u64,
    pub owner: String,
    pub group: String,
    pub size: u64,
    /// As printed; not machine-parsed.
    pub last_modified: String,
    pub path: String,
    /// Target of a symlink line (`name -> target`), when shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl DirEntry {
    /// Final path component.
    pub fn name(&self) -> &str {
        basename(&self.path)
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::from_permissions(&self.permissions)
    }
}

/// File type, from the first character of the mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl EntryKind {
    pub fn from_permissions(perms: &str) -> Self {
        match perms.chars().next() {
            Some('-') => Self::File,
            Some('d') => Self::Directory,
            Some('l') => Self::Symlink,
            Some('b') => Self::BlockDevice,
            Some('c') => Self::CharDevice,
            Some('p') => Self::Fifo,
            Some('s') => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

/// A [`DirEntry`] resolved for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    pub entry: DirEntry,
    pub kind: EntryKind,
}

impl From<DirEntry> for StatRecord {
    fn from(entry: DirEntry) -> Self {
        let kind = entry.kind();
        Self { entry, kind }
    }
}

impl StatRecord {
    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn is_block_device(&self) -> bool {
        self.kind == EntryKind::BlockDevice
    }

    pub fn is_char_device(&self) -> bool {
        self.kind == EntryKind::CharDevice
    }

    pub fn is_fifo(&self) -> bool {
        self.kind == EntryKind::Fifo
    }

    pub fn is_socket(&self) -> bool {
        self.kind == EntryKind::Socket
    }
}

// ── Path helpers ────────────────────────────────────────────────────────

pub(crate) fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Split a remote path into `(parent, leaf)`. Relative paths without a
/// slash have parent `"."`.
pub(crate) fn split_parent(path: &str) -> SftpCliResult<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(SftpCliError::invalid_path(format!(
            "'{}' has no parent directory",
            path
        )));
    }
    match trimmed.rfind('/') {
        Some(0) => Ok(("/".to_string(), trimmed[1..].to_string())),
        Some(idx) => Ok((trimmed[..idx].to_string(), trimmed[idx + 1..].to_string())),
        None => Ok((".".to_string(), trimmed.to_string())),
    }
}

pub(crate) fn join_remote(dir: &str, rest: &str) -> String {
    if rest.starts_with('/') {
        return rest.to_string();
    }
    let rest = rest.trim_start_matches("./");
    if rest.is_empty() || rest == "." {
        return dir.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, rest)
    } else {
        format!("{}/{}", dir, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_minimal_json() {
        let cfg =
            SessionConfig::from_json(r#"{"host":"files.example","username":"alice"}"#).unwrap();
        assert_eq!(cfg.port, 22);
        assert_eq!(cfg.program, "sftp");
        assert_eq!(cfg.markers.prompt, "sftp>");
        assert!(cfg.listing.all);
        assert_eq!(cfg.mkdir_retry.max_attempts, 10);
    }

    #[test]
    fn config_camel_case_fields() {
        let raw = r#"{
            "host": "h", "username": "u", "port": 2222,
            "privateKeyPath": "/k", "remoteHome": "/home/u",
            "initialDirectory": "data", "timeoutSecs": 5,
            "markers": {"prompt": "psftp>"}
        }"#;
        let cfg = SessionConfig::from_json(raw).unwrap();
        assert_eq!(cfg.port, 2222);
        assert_eq!(cfg.private_key_path.as_deref(), Some("/k"));
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.markers.prompt, "psftp>");
        // untouched markers keep their defaults
        assert_eq!(cfg.markers.disconnect_ack, "bye");
        assert_eq!(cfg.initial_remote_dir().as_deref(), Some("/home/u/data"));
    }

    #[test]
    fn config_validation() {
        assert!(SessionConfig::from_json(r#"{"host":"","username":"u"}"#).is_err());
        let mut cfg = SessionConfig::new("h", "u");
        assert!(cfg.validate().is_ok());
        cfg.private_key_path = Some("/a".into());
        cfg.private_key_data = Some("KEY".into());
        assert!(cfg.validate().is_err());
        cfg.private_key_data = None;
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_dir_absolute_overrides_home() {
        let mut cfg = SessionConfig::new("h", "u");
        assert_eq!(cfg.initial_remote_dir(), None);
        cfg.remote_home = Some("/home/u/".into());
        assert_eq!(cfg.initial_remote_dir().as_deref(), Some("/home/u/"));
        cfg.initial_directory = Some("/srv".into());
        assert_eq!(cfg.initial_remote_dir().as_deref(), Some("/srv"));
    }

    #[test]
    fn entry_kind_from_first_char() {
        assert_eq!(EntryKind::from_permissions("-rw-r--r--"), EntryKind::File);
        assert_eq!(EntryKind::from_permissions("drwxr-xr-x"), EntryKind::Directory);
        assert_eq!(EntryKind::from_permissions("lrwxrwxrwx"), EntryKind::Symlink);
        assert_eq!(EntryKind::from_permissions("brw-rw----"), EntryKind::BlockDevice);
        assert_eq!(EntryKind::from_permissions("crw-rw-rw-"), EntryKind::CharDevice);
        assert_eq!(EntryKind::from_permissions("prw-------"), EntryKind::Fifo);
        assert_eq!(EntryKind::from_permissions("srwxrwxrwx"), EntryKind::Socket);
        assert_eq!(EntryKind::from_permissions("?---------"), EntryKind::Unknown);
        assert_eq!(EntryKind::from_permissions(""), EntryKind::Unknown);
    }

    #[test]
    fn stat_record_predicates() {
        let entry = DirEntry {
            permissions: "drwxr-xr-x".into(),
            hard_links: 3,
            owner: "root".into(),
            group: "root".into(),
            size: 4096,
            last_modified: "Mar  1 09:30".into(),
            path: "/srv/data".into(),
            link_target: None,
        };
        let stat = StatRecord::from(entry);
        assert!(stat.is_directory());
        assert!(!stat.is_file());
        assert!(!stat.is_symlink());
        assert_eq!(stat.entry.name(), "data");
    }

    #[test]
    fn split_parent_cases() {
        assert_eq!(split_parent("/a/b/c.txt").unwrap(), ("/a/b".into(), "c.txt".into()));
        assert_eq!(split_parent("/top").unwrap(), ("/".into(), "top".into()));
        assert_eq!(split_parent("rel/x/").unwrap(), ("rel".into(), "x".into()));
        assert_eq!(split_parent("leaf").unwrap(), (".".into(), "leaf".into()));
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn join_remote_cases() {
        assert_eq!(join_remote("/home/alice", "docs"), "/home/alice/docs");
        assert_eq!(join_remote("/", "etc"), "/etc");
        assert_eq!(join_remote("/home/alice", "./x"), "/home/alice/x");
        assert_eq!(join_remote("/home/alice", "."), "/home/alice");
        assert_eq!(join_remote("/home/alice", "/abs"), "/abs");
    }

    #[test]
    fn event_serializes_tagged() {
        let json = serde_json::to_value(SessionEvent::Disconnect { code: Some(0) }).unwrap();
        assert_eq!(json["type"], "disconnect");
        assert_eq!(json["code"], 0);
    }
}
