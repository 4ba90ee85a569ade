//! Error type shared by every layer of the sftp-cli session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised sftp-cli error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpCliError {
    pub kind: SftpCliErrorKind,
    pub message: String,
    /// Command line that produced the error, if any.
    pub command: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SftpCliErrorKind {
    /// Handshake output contained a connection-fatal phrase.
    ConnectFailed,
    /// The password was rejected or re-requested.
    AuthFailed,
    /// The transport reported an inactivity timeout.
    Timeout,
    /// Connect requested while a connect is already running.
    Busy,
    /// Reply lines contained a known failure phrase.
    CommandFailed,
    /// No listing entry matched the requested leaf name.
    NotFound,
    /// Local staging file could not be read, written or removed.
    LocalIo,
    /// A materialization wait ran out of attempts.
    RetryExhausted,
    /// The session went away while the request was pending.
    Disconnected,
    /// The child process could not be started.
    SpawnFailed,
    /// Path cannot be resolved into parent + leaf.
    InvalidPath,
    /// Config / parameter validation error.
    InvalidConfig,
    /// Session id unknown to the service.
    SessionNotFound,
}

pub type SftpCliResult<T> = Result<T, SftpCliError>;

// ── Construction helpers ─────────────────────────────────────────────

impl SftpCliError {
    pub fn new(kind: SftpCliErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            command: None,
            session_id: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::ConnectFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::AuthFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::Timeout, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::Busy, msg)
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::CommandFailed, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::NotFound, msg)
    }

    pub fn local_io(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::LocalIo, msg)
    }

    pub fn retry_exhausted(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::RetryExhausted, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::Disconnected, msg)
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::SpawnFailed, msg)
    }

    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::InvalidPath, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(SftpCliErrorKind::InvalidConfig, msg)
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            SftpCliErrorKind::SessionNotFound,
            format!("sftp-cli session '{}' not found", id),
        )
        .with_session(id)
    }

    /// Classify a fatal handshake line into the most appropriate kind.
    pub fn from_fatal_line(line: &str) -> Self {
        let lower = line.to_lowercase();
        let kind = if lower.contains("timed out") {
            SftpCliErrorKind::Timeout
        } else if lower.contains("permission denied") {
            SftpCliErrorKind::AuthFailed
        } else {
            SftpCliErrorKind::ConnectFailed
        };
        Self::new(kind, line.trim())
    }
}

impl fmt::Display for SftpCliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            Some(cmd) => write!(f, "[SFTP-CLI {:?} `{}`] {}", self.kind, cmd, self.message),
            None => write!(f, "[SFTP-CLI {:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SftpCliError {}

impl From<std::io::Error> for SftpCliError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::local_io(e.to_string())
        }
    }
}

impl From<SftpCliError> for String {
    fn from(e: SftpCliError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_lines_classify() {
        assert_eq!(
            SftpCliError::from_fatal_line("ssh: connect to host x port 22: Operation timed out")
                .kind,
            SftpCliErrorKind::Timeout
        );
        assert_eq!(
            SftpCliError::from_fatal_line("alice@x: Permission denied (publickey).").kind,
            SftpCliErrorKind::AuthFailed
        );
        assert_eq!(
            SftpCliError::from_fatal_line("Connection reset by peer").kind,
            SftpCliErrorKind::ConnectFailed
        );
    }

    #[test]
    fn display_includes_command() {
        let e = SftpCliError::command_failed("No such file or directory").with_command("ls -l /x");
        assert_eq!(
            e.to_string(),
            "[SFTP-CLI CommandFailed `ls -l /x`] No such file or directory"
        );
        let plain = SftpCliError::busy("already connecting...");
        assert_eq!(plain.to_string(), "[SFTP-CLI Busy] already connecting...");
    }

    #[test]
    fn io_error_maps_to_local_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: SftpCliError = io.into();
        assert_eq!(e.kind, SftpCliErrorKind::LocalIo);

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let e: SftpCliError = io.into();
        assert_eq!(e.kind, SftpCliErrorKind::Timeout);
    }

    #[test]
    fn session_not_found_carries_id() {
        let e = SftpCliError::session_not_found("abc");
        assert_eq!(e.session_id.as_deref(), Some("abc"));
        let s: String = e.into();
        assert!(s.contains("abc"));
    }
}
