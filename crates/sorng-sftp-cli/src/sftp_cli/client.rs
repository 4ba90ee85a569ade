//! Async session handle.
//!
//! `SftpSession` is a cheap front for one spawned task that owns a
//! [`SessionCore`]. Callers send requests over an unbounded channel; the
//! task interleaves them with transport events in arrival order, so the
//! core never sees two things at once and needs no locking.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use crate::sftp_cli::keys::{KeyMaterial, TempKeyFiles};
use crate::sftp_cli::local::{LocalFiles, TokioLocalFiles};
use crate::sftp_cli::pty::PtySpawner;
use crate::sftp_cli::queue::{CommandRequest, ListingSender, ProgressSender, ReplySink};
use crate::sftp_cli::session::{ConnectWaiter, DisconnectWaiter, SessionCore};
use crate::sftp_cli::transport::{
    ExitInfo, TransportEvent, TransportEvents, TransportSpawner,
};
use crate::sftp_cli::types::{DirEntry, SessionConfig, SessionEvent, SessionSnapshot, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_CAPACITY: usize = 256;

enum Request {
    Connect(ConnectWaiter),
    Disconnect(DisconnectWaiter),
    Exec(CommandRequest),
    List {
        path: String,
        fresh: bool,
        reply: ListingSender,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

enum Step {
    Request(Request),
    Transport(Option<TransportEvent>),
    HandleDropped,
}

/// Handle to one sftp child session. Dropping it kills the child.
pub struct SftpSession {
    id: String,
    config: SessionConfig,
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<SessionEvent>,
    pub(crate) local: Arc<dyn LocalFiles>,
}

impl SftpSession {
    /// Production session: PTY transport, temp-file keys, `tokio::fs`
    /// staging. Must be called inside a tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        let spawner = match config.timeout_secs {
            0 => PtySpawner::default(),
            secs => PtySpawner::with_timeout(Duration::from_secs(secs)),
        };
        Self::spawn(
            config,
            Arc::new(spawner),
            Arc::new(TempKeyFiles::new()),
            Arc::new(TokioLocalFiles::default()),
        )
    }

    pub fn spawn(
        config: SessionConfig,
        spawner: Arc<dyn TransportSpawner>,
        keys: Arc<dyn KeyMaterial>,
        local: Arc<dyn LocalFiles>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (requests, rx) = mpsc::unbounded_channel();
        let core = SessionCore::new(id.clone(), config.clone(), spawner, keys, events.clone());
        tokio::spawn(run(core, rx, events.clone()));
        log::debug!("[sftp-cli:{}] session task started", id);
        Self {
            id,
            config,
            requests,
            events,
            local,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn connect(&self) -> SftpCliResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::Connect(tx))?;
        rx.await
            .map_err(|_| self.closed("connection closed before the handshake finished"))?
    }

    pub async fn disconnect(&self) -> SftpCliResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::Disconnect(tx))?;
        rx.await.map_err(|_| self.closed("session task stopped"))?
    }

    pub async fn snapshot(&self) -> SftpCliResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::Snapshot(tx))?;
        rx.await.map_err(|_| self.closed("session task stopped"))
    }

    pub async fn state(&self) -> SftpCliResult<SessionState> {
        Ok(self.snapshot().await?.state)
    }

    /// Run one raw command line; resolves with its reply lines (echo and
    /// prompt removed). Connects first when needed.
    pub async fn exec(&self, tag: &str, command_line: &str) -> SftpCliResult<Vec<String>> {
        self.command(tag, command_line.to_string(), Vec::new(), None)
            .await
    }

    /// As [`exec`](Self::exec), forwarding every intermediate chunk.
    pub async fn exec_with_progress(
        &self,
        tag: &str,
        command_line: &str,
        progress: ProgressSender,
    ) -> SftpCliResult<Vec<String>> {
        self.command(tag, command_line.to_string(), Vec::new(), Some(progress))
            .await
    }

    pub(crate) async fn command(
        &self,
        tag: &str,
        command_line: String,
        invalidates: Vec<String>,
        progress: Option<ProgressSender>,
    ) -> SftpCliResult<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        let mut request = CommandRequest::new(tag, command_line.clone(), ReplySink::Lines(tx))
            .invalidating(invalidates);
        if let Some(progress) = progress {
            request = request.with_progress(progress);
        }
        self.submit(Request::Exec(request))?;
        let reply = rx.await.map_err(|_| {
            self.closed("connection closed before the command completed")
                .with_command(command_line)
        })?;
        Ok(reply.lines)
    }

    /// Raw decoded listing of `path`. `fresh` bypasses the cache.
    pub(crate) async fn listing(&self, path: &str, fresh: bool) -> SftpCliResult<Vec<DirEntry>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Request::List {
            path: path.to_string(),
            fresh,
            reply: tx,
        })?;
        rx.await
            .map_err(|_| self.closed("connection closed before the listing completed"))?
    }

    fn submit(&self, request: Request) -> SftpCliResult<()> {
        self.requests
            .send(request)
            .map_err(|_| self.closed("session task stopped"))
    }

    fn closed(&self, message: &str) -> SftpCliError {
        SftpCliError::disconnected(message).with_session(self.id.clone())
    }
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("id", &self.id)
            .field("host", &self.config.host)
            .finish()
    }
}

async fn next_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut core: SessionCore,
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: broadcast::Sender<SessionEvent>,
) {
    let _ = events.send(SessionEvent::Ready);
    let mut transport: Option<TransportEvents> = None;

    loop {
        if let Some(fresh) = core.take_transport_events() {
            transport = Some(fresh);
        }

        let step = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => Step::Request(request),
                None => Step::HandleDropped,
            },
            event = next_event(&mut transport) => Step::Transport(event),
        };

        match step {
            Step::Request(request) => match request {
                Request::Connect(waiter) => core.connect(Some(waiter)),
                Request::Disconnect(waiter) => core.disconnect(waiter),
                Request::Exec(request) => core.exec(request),
                Request::List { path, fresh, reply } => core.list(&path, fresh, reply),
                Request::Snapshot(reply) => {
                    let _ = reply.send(core.snapshot());
                }
            },
            Step::Transport(Some(event)) => core.handle_event(event),
            Step::Transport(None) => {
                // stream closed without an exit report
                transport = None;
                core.handle_event(TransportEvent::End(ExitInfo { code: None }));
            }
            Step::HandleDropped => {
                core.shutdown();
                break;
            }
        }

        if core.state() == SessionState::Disconnected {
            transport = None;
        }
    }
    log::debug!("[sftp-cli:{}] session task finished", core.id());
}
