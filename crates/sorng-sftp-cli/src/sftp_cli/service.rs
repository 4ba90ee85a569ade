//! SFTP CLI service. Owns every live session, keyed by session id.
//!
//! Hosts keep one `SftpCliServiceState` around and look sessions up by the
//! id returned from [`SftpCliService::connect`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::sftp_cli::client::SftpSession;
use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use crate::sftp_cli::keys::KeyMaterial;
use crate::sftp_cli::local::LocalFiles;
use crate::sftp_cli::transport::TransportSpawner;
use crate::sftp_cli::types::{SessionConfig, SessionSnapshot};

/// Shared service state.
pub type SftpCliServiceState = Arc<SftpCliService>;

type SessionFactory = dyn Fn(SessionConfig) -> SftpSession + Send + Sync;

pub struct SftpCliService {
    sessions: RwLock<HashMap<String, Arc<SftpSession>>>,
    factory: Box<SessionFactory>,
}

impl SftpCliService {
    /// Service whose sessions run the real `sftp` binary on a PTY.
    pub fn new() -> SftpCliServiceState {
        Arc::new(Self::default())
    }

    /// Service whose sessions use the given collaborators (simulated
    /// transports, custom key storage, ...).
    pub fn with_collaborators(
        spawner: Arc<dyn TransportSpawner>,
        keys: Arc<dyn KeyMaterial>,
        local: Arc<dyn LocalFiles>,
    ) -> SftpCliServiceState {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            factory: Box::new(move |config| {
                SftpSession::spawn(config, spawner.clone(), keys.clone(), local.clone())
            }),
        })
    }

    // ── Connect ─────────────────────────────────────────────────────

    /// Open and connect a new session. Returns its id.
    pub async fn connect(&self, config: SessionConfig) -> SftpCliResult<String> {
        config.validate()?;
        let session = (self.factory)(config);
        let id = session.id().to_string();
        session.connect().await?;

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(session));
        log::info!("[sftp-cli-service] session {} created", id);
        Ok(id)
    }

    // ── Lookup ──────────────────────────────────────────────────────

    pub async fn session(&self, session_id: &str) -> SftpCliResult<Arc<SftpSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SftpCliError::session_not_found(session_id))
    }

    /// Snapshots of every registered session.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<SftpSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            match session.snapshot().await {
                Ok(snapshot) => out.push(snapshot),
                Err(e) => {
                    log::warn!("[sftp-cli-service] snapshot of {} failed: {}", session.id(), e)
                }
            }
        }
        out
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ── Disconnect ──────────────────────────────────────────────────

    /// Disconnect a session and forget it.
    pub async fn disconnect(&self, session_id: &str) -> SftpCliResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SftpCliError::session_not_found(session_id))?;
        session.disconnect().await?;
        log::info!("[sftp-cli-service] session {} disconnected", session_id);
        Ok(())
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                log::warn!("[sftp-cli-service] error disconnecting {}: {}", id, e);
            }
        }
    }
}

impl Default for SftpCliService {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory: Box::new(SftpSession::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_cli::error::SftpCliErrorKind;
    use crate::sftp_cli::keys::TempKeyFiles;
    use crate::sftp_cli::local::TokioLocalFiles;
    use crate::sftp_cli::transport::{SimulatedReply, SimulatedSpawner};
    use crate::sftp_cli::types::SessionState;

    fn service(spawner: &SimulatedSpawner) -> SftpCliServiceState {
        SftpCliService::with_collaborators(
            Arc::new(spawner.clone()),
            Arc::new(TempKeyFiles::new()),
            Arc::new(TokioLocalFiles::default()),
        )
    }

    fn healthy() -> SimulatedSpawner {
        SimulatedSpawner::scripted("sftp> ", |line| match line {
            "bye" => SimulatedReply::Exit(0),
            _ => SimulatedReply::Output("sftp> ".into()),
        })
    }

    #[tokio::test]
    async fn service_new_is_empty() {
        let svc = SftpCliService::new();
        assert_eq!(svc.session_count().await, 0);
        assert!(svc.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_nonexistent_session_errors() {
        let svc = SftpCliService::new();
        let err = svc.disconnect("nonexistent").await.unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::SessionNotFound);
        assert!(svc.session("nonexistent").await.is_err());
    }

    #[tokio::test]
    async fn connect_registers_session() {
        let spawner = healthy();
        let svc = service(&spawner);
        let mut config = SessionConfig::new("files.example", "alice");
        config.label = Some("staging".into());
        let id = svc.connect(config).await.unwrap();

        assert_eq!(svc.session_count().await, 1);
        assert_eq!(svc.session(&id).await.unwrap().id(), id);
        let listed = svc.list_sessions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, SessionState::Connected);
        assert_eq!(listed[0].label.as_deref(), Some("staging"));

        svc.disconnect(&id).await.unwrap();
        assert_eq!(svc.session_count().await, 0);
        assert!(spawner.written().contains(&"bye".to_string()));
    }

    #[tokio::test]
    async fn failed_connect_is_not_registered() {
        let spawner = SimulatedSpawner::scripted(
            "ssh: connect to host files.example port 22: Connection refused\r\nConnection closed\r\n",
            |_| SimulatedReply::Silent,
        );
        let svc = service(&spawner);
        let err = svc
            .connect(SessionConfig::new("files.example", "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::ConnectFailed);
        assert_eq!(svc.session_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_spawning() {
        let spawner = healthy();
        let svc = service(&spawner);
        let err = svc.connect(SessionConfig::new("", "alice")).await.unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::InvalidConfig);
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_all_empties_the_service() {
        let spawner = healthy();
        let svc = service(&spawner);
        svc.connect(SessionConfig::new("a.example", "alice")).await.unwrap();
        svc.connect(SessionConfig::new("b.example", "bob")).await.unwrap();
        assert_eq!(svc.session_count().await, 2);
        svc.disconnect_all().await;
        assert_eq!(svc.session_count().await, 0);
    }
}
