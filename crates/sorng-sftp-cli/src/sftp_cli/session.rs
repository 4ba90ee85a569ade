//! Session state machine and command dispatcher.
//!
//! [`SessionCore`] is the single owner of everything that makes up one
//! connection: the transport, the connection state, the in-flight command
//! and its buffer, the FIFO of waiting commands, the listing cache, and the
//! option registry discovered at connect time. It is synchronous and knows
//! nothing about tasks; `client.rs` drives it from one tokio task, feeding
//! it caller requests and transport events strictly one at a time.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──prompt──▶ Connected ──bye──▶ Disconnected
//!        ▲                       │  password ─────────▲                   │
//!        └───── fatal / close / end of stream ───────────────────────────┘
//! ```
//!
//! Replies go back through oneshot senders. When the transport goes away
//! every pending sender is dropped, which callers observe as
//! `Disconnected`; nothing is replayed on the next connection.

use crate::sftp_cli::args::build_argv;
use crate::sftp_cli::cache::ListingCache;
use crate::sftp_cli::decode::{self, CommandOptions};
use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use crate::sftp_cli::keys::KeyMaterial;
use crate::sftp_cli::parser::{ChunkAction, ParseContext, ReplyBuffer, ReplyParser, Utf8Assembler};
use crate::sftp_cli::queue::{CommandQueue, CommandReply, CommandRequest, ListingSender, ReplySink};
use crate::sftp_cli::transport::{
    ExitInfo, ProcessTransport, TransportEvent, TransportEvents, TransportSpawner,
};
use crate::sftp_cli::types::{SessionConfig, SessionEvent, SessionSnapshot, SessionState};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

pub type ConnectWaiter = oneshot::Sender<SftpCliResult<()>>;
pub type DisconnectWaiter = oneshot::Sender<SftpCliResult<()>>;

pub const HELP_TAG: &str = "help";
pub const TERMINATE_TAG: &str = "bye";

/// Pending connect: open from spawn until the `help` reply arrives.
#[derive(Debug)]
struct Handshake {
    waiter: Option<ConnectWaiter>,
    password_sent: bool,
}

pub struct SessionCore {
    id: String,
    config: SessionConfig,
    parser: ReplyParser,
    spawner: Arc<dyn TransportSpawner>,
    keys: Arc<dyn KeyMaterial>,
    events: broadcast::Sender<SessionEvent>,

    state: SessionState,
    transport: Option<Box<dyn ProcessTransport>>,
    pending_events: Option<TransportEvents>,
    staged_key: Option<PathBuf>,
    utf8: Utf8Assembler,
    handshake: Option<Handshake>,
    active: Option<CommandRequest>,
    buffer: ReplyBuffer,
    queue: CommandQueue,
    cache: ListingCache,
    options: CommandOptions,
    closing: Vec<DisconnectWaiter>,
    connected_at: Option<DateTime<Utc>>,
}

impl SessionCore {
    pub fn new(
        id: impl Into<String>,
        config: SessionConfig,
        spawner: Arc<dyn TransportSpawner>,
        keys: Arc<dyn KeyMaterial>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let parser = ReplyParser::new(config.markers.clone());
        Self {
            id: id.into(),
            config,
            parser,
            spawner,
            keys,
            events,
            state: SessionState::Disconnected,
            transport: None,
            pending_events: None,
            staged_key: None,
            utf8: Utf8Assembler::default(),
            handshake: None,
            active: None,
            buffer: ReplyBuffer::default(),
            queue: CommandQueue::default(),
            cache: ListingCache::new(),
            options: CommandOptions::default(),
            closing: Vec::new(),
            connected_at: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A command is in flight or the handshake is still open.
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.handshake.is_some()
    }

    pub fn active_tag(&self) -> Option<&str> {
        self.active.as_ref().map(|r| r.tag.as_str())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    pub fn cached_paths(&self) -> usize {
        self.cache.len()
    }

    /// Event stream of a transport spawned since the last call.
    pub fn take_transport_events(&mut self) -> Option<TransportEvents> {
        self.pending_events.take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            label: self.config.label.clone(),
            host: self.config.host.clone(),
            state: self.state,
            active_command: self.active_tag().map(str::to_string),
            queued: self.queue.len(),
            cached_paths: self.cache.len(),
            supported_commands: self.options.len(),
            connected_at: self.connected_at,
        }
    }

    // ── Connect ──────────────────────────────────────────────────────

    pub fn connect(&mut self, waiter: Option<ConnectWaiter>) {
        match self.state {
            SessionState::Connecting => {
                reply(waiter, Err(self.error(SftpCliError::busy("already connecting..."))));
            }
            SessionState::Connected if self.handshake.is_some() => {
                reply(waiter, Err(self.error(SftpCliError::busy("already connecting..."))));
            }
            SessionState::Connected => reply(waiter, Ok(())),
            SessionState::Disconnected => self.start(waiter),
        }
    }

    fn start(&mut self, waiter: Option<ConnectWaiter>) {
        log::info!(
            "[sftp-cli:{}] connecting to {}@{}:{}",
            self.id,
            self.config.username,
            self.config.host,
            self.config.port
        );

        let identity = match (&self.config.private_key_path, &self.config.private_key_data) {
            (Some(path), _) => Some(PathBuf::from(path)),
            (None, Some(data)) => match self.keys.stage(data) {
                Ok(path) => {
                    self.staged_key = Some(path.clone());
                    Some(path)
                }
                Err(e) => {
                    reply(waiter, Err(self.error(e)));
                    self.queue.abandon();
                    return;
                }
            },
            (None, None) => None,
        };

        let argv = build_argv(&self.config, identity.as_deref());
        log::debug!("[sftp-cli:{}] spawning {:?}", self.id, argv);
        let spawned = match self.spawner.spawn(&argv) {
            Ok(spawned) => spawned,
            Err(e) => {
                log::warn!("[sftp-cli:{}] spawn failed: {}", self.id, e);
                self.remove_staged_key();
                self.queue.abandon();
                reply(waiter, Err(self.error(e)));
                return;
            }
        };

        self.state = SessionState::Connecting;
        self.transport = Some(spawned.transport);
        self.pending_events = Some(spawned.events);
        self.handshake = Some(Handshake {
            waiter,
            password_sent: false,
        });
        self.buffer.clear();
        self.utf8.reset();
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Send now if connected and idle, otherwise queue (connecting first
    /// when disconnected).
    pub fn exec(&mut self, request: CommandRequest) {
        match self.state {
            SessionState::Disconnected => {
                log::debug!(
                    "[sftp-cli:{}] '{}' queued until connected",
                    self.id,
                    request.tag
                );
                self.queue.push(request);
                self.connect(None);
            }
            _ if self.is_busy() => self.queue.push(request),
            _ => self.send(request),
        }
    }

    /// Directory listing through the cache. `fresh` skips (and drops) any
    /// cached copy.
    pub fn list(&mut self, path: &str, fresh: bool, reply: ListingSender) {
        if fresh {
            self.cache.invalidate(path);
        } else if let Some(entries) = self.cache.get(path) {
            log::trace!("[sftp-cli:{}] listing cache hit for {}", self.id, path);
            let _ = reply.send(Ok(entries));
            return;
        }
        let command_line = self.listing_command(path);
        self.exec(CommandRequest::new(
            "ls",
            command_line,
            ReplySink::Listing {
                path: path.to_string(),
                reply,
            },
        ));
    }

    fn listing_command(&self, path: &str) -> String {
        format!(
            "ls {} {}",
            self.options.listing_flags(&self.config.listing),
            decode::quote_path(path)
        )
    }

    fn send(&mut self, mut request: CommandRequest) {
        // flags depend on the registry, which may have been empty at queue time
        if let ReplySink::Listing { path, .. } = &request.sink {
            request.command_line = self.listing_command(path);
        }
        let Some(transport) = self.transport.as_mut() else {
            log::warn!("[sftp-cli:{}] no transport for '{}'", self.id, request.tag);
            let err = self.error(
                SftpCliError::disconnected("no transport").with_command(request.command_line),
            );
            fail_sink(request.sink, err);
            return;
        };

        let mut wire = request.command_line.clone();
        wire.push_str(&self.config.line_ending);
        let written = transport.write(wire.as_bytes());
        if let Err(e) = written {
            log::warn!("[sftp-cli:{}] write failed: {}", self.id, e);
            self.teardown(None);
            return;
        }
        transport.resume();

        log::debug!("[sftp-cli:{}] >>> {}", self.id, request.command_line);
        if let Some(key) = request.progress_key() {
            log::trace!("[sftp-cli:{}] progress registered as {}", self.id, key);
        }
        self.buffer.clear();
        self.active = Some(request);
    }

    fn dispatch_next(&mut self) {
        // one send per completion; the next one waits for its own prompt
        if let Some(next) = self.queue.pop() {
            self.send(next);
        }
    }

    // ── Transport events ─────────────────────────────────────────────

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(bytes) => {
                let text = self.utf8.push(&bytes);
                if !text.is_empty() {
                    self.on_data(&text);
                }
            }
            TransportEvent::End(exit) => self.on_end(exit),
        }
    }

    fn on_data(&mut self, chunk: &str) {
        log::trace!("[sftp-cli:{}] <<< {:?}", self.id, chunk);
        let _ = self.events.send(SessionEvent::Data {
            chunk: chunk.to_string(),
        });

        let ctx = ParseContext {
            handshake_open: self.handshake.is_some(),
            command_active: self.active.is_some(),
            terminating: self.active.as_ref().map_or(false, CommandRequest::is_terminating),
            has_progress: self.active.as_ref().map_or(false, |r| r.progress.is_some()),
        };
        let tracking = ctx.command_active || ctx.handshake_open;
        let since = self.buffer.len();
        if tracking {
            self.buffer.push(chunk);
        }
        let action = {
            let window = if tracking {
                self.buffer.recent(since, self.parser.overlap())
            } else {
                chunk
            };
            self.parser.classify(ctx, chunk, window)
        };

        match action {
            ChunkAction::FatalConnect(line) => {
                self.fail_handshake(SftpCliError::from_fatal_line(&line));
            }
            ChunkAction::RemoteClosed => {
                log::info!("[sftp-cli:{}] connection closed by remote host", self.id);
                self.teardown(None);
            }
            ChunkAction::Discard => {
                log::trace!("[sftp-cli:{}] idle output discarded", self.id);
            }
            ChunkAction::Complete if self.active.is_some() => self.complete_active(),
            ChunkAction::Complete => self.prompt_reached(),
            ChunkAction::Progress => {
                if let Some(progress) = self.active.as_ref().and_then(|r| r.progress.as_ref()) {
                    let _ = progress.send(chunk.to_string());
                }
            }
            ChunkAction::PasswordPrompt => self.answer_password(),
            ChunkAction::Absorb => {}
        }
    }

    fn on_end(&mut self, exit: ExitInfo) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if self.active.as_ref().map_or(false, CommandRequest::is_terminating) {
            self.active = None;
            log::info!("[sftp-cli:{}] disconnected", self.id);
            self.teardown(exit.code);
            return;
        }
        log::warn!(
            "[sftp-cli:{}] sftp exited unexpectedly (code {:?})",
            self.id,
            exit.code
        );
        self.teardown(exit.code);
    }

    // ── Handshake ────────────────────────────────────────────────────

    fn answer_password(&mut self) {
        let already_sent = self.handshake.as_ref().map_or(false, |h| h.password_sent);
        if already_sent {
            self.fail_handshake(SftpCliError::auth_failed("password rejected"));
            return;
        }
        let Some(password) = self.config.password.clone() else {
            self.fail_handshake(SftpCliError::auth_failed(
                "password requested but none configured",
            ));
            return;
        };

        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let mut wire = password;
        wire.push_str(&self.config.line_ending);
        if let Err(e) = transport.write(wire.as_bytes()) {
            log::warn!("[sftp-cli:{}] failed to send password: {}", self.id, e);
            self.teardown(None);
            return;
        }
        transport.resume();

        if let Some(handshake) = self.handshake.as_mut() {
            handshake.password_sent = true;
        }
        self.buffer.clear();
        // Optimistic: nothing confirms the password yet. The handshake stays
        // open, so a re-prompt or fatal line before the next prompt still
        // fails the connect.
        self.state = SessionState::Connected;
        log::info!("[sftp-cli:{}] password sent", self.id);
    }

    fn prompt_reached(&mut self) {
        self.settle();
        self.buffer.clear();
        self.state = SessionState::Connected;
        self.connected_at = Some(Utc::now());
        log::debug!("[sftp-cli:{}] prompt reached, probing help", self.id);
        self.send(CommandRequest::new(HELP_TAG, "help", ReplySink::Help));
    }

    fn finish_handshake(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            reply(handshake.waiter, Ok(()));
        }
        log::info!(
            "[sftp-cli:{}] connected ({} commands advertised)",
            self.id,
            self.options.len()
        );
        let _ = self.events.send(SessionEvent::Connect);
    }

    fn fail_handshake(&mut self, err: SftpCliError) {
        log::warn!("[sftp-cli:{}] connect failed: {}", self.id, err);
        let err = self.error(err);
        if let Some(waiter) = self.handshake.as_mut().and_then(|h| h.waiter.take()) {
            let _ = waiter.send(Err(err));
        }
        self.teardown(None);
    }

    // ── Completion ───────────────────────────────────────────────────

    fn complete_active(&mut self) {
        let Some(request) = self.active.take() else {
            return;
        };
        self.settle();
        let text = self.buffer.take();
        let lines = self.parser.reply_lines(&text, &request.command_line);
        log::debug!(
            "[sftp-cli:{}] '{}' completed ({} lines)",
            self.id,
            request.tag,
            lines.len()
        );
        for path in &request.invalidates {
            self.cache.invalidate(path);
        }

        match request.sink {
            ReplySink::Lines(tx) => {
                let _ = tx.send(CommandReply {
                    tag: request.tag,
                    command_line: request.command_line,
                    lines,
                });
            }
            ReplySink::Listing { path, reply } => {
                let phrases = &self.parser.markers().failure_phrases;
                let result = match decode::is_error(&lines, phrases) {
                    Some(err) => Err(self.error(err.with_command(request.command_line))),
                    None => {
                        let entries = decode::parse_listing(&lines);
                        self.cache.put(&path, entries.clone());
                        Ok(entries)
                    }
                };
                let _ = reply.send(result);
            }
            ReplySink::Help => {
                self.options = decode::parse_help(&lines);
                self.finish_handshake();
            }
            ReplySink::Terminate => {
                log::info!("[sftp-cli:{}] disconnected", self.id);
                self.teardown(None);
                return;
            }
        }

        if self.state == SessionState::Connected && self.handshake.is_none() {
            self.dispatch_next();
        }
    }

    // ── Disconnect ───────────────────────────────────────────────────

    pub fn disconnect(&mut self, waiter: DisconnectWaiter) {
        match self.state {
            SessionState::Disconnected => {
                let _ = waiter.send(Ok(()));
            }
            // terminating command already on its way
            _ if !self.closing.is_empty() => self.closing.push(waiter),
            SessionState::Connecting => {
                self.closing.push(waiter);
                self.teardown(None);
            }
            SessionState::Connected => {
                self.closing.push(waiter);
                self.exec(CommandRequest::new(TERMINATE_TAG, "bye", ReplySink::Terminate));
            }
        }
    }

    /// Kill everything without the terminating command (handle dropped).
    pub fn shutdown(&mut self) {
        if self.state != SessionState::Disconnected {
            log::info!("[sftp-cli:{}] shutting down", self.id);
            self.teardown(None);
        }
    }

    fn teardown(&mut self, code: Option<i32>) {
        let was = self.state;
        self.state = SessionState::Disconnected;
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
            if let Err(e) = transport.kill() {
                log::debug!("[sftp-cli:{}] kill after exit: {}", self.id, e);
            }
        }
        self.pending_events = None;
        self.remove_staged_key();

        self.active = None;
        self.handshake = None;
        let abandoned = self.queue.abandon();
        if abandoned > 0 {
            log::debug!("[sftp-cli:{}] abandoned {} queued commands", self.id, abandoned);
        }
        self.buffer.clear();
        self.utf8.reset();
        self.cache.clear();
        self.options = CommandOptions::default();
        self.connected_at = None;

        for waiter in self.closing.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if was != SessionState::Disconnected {
            let _ = self.events.send(SessionEvent::Disconnect { code });
        }
    }

    /// Reply complete: silence from here on is not a stall.
    fn settle(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.settled();
        }
    }

    fn remove_staged_key(&mut self) {
        if let Some(path) = self.staged_key.take() {
            self.keys.remove(&path);
        }
    }

    fn error(&self, err: SftpCliError) -> SftpCliError {
        err.with_session(self.id.clone())
    }
}

fn reply(waiter: Option<ConnectWaiter>, result: SftpCliResult<()>) {
    if let Some(waiter) = waiter {
        let _ = waiter.send(result);
    }
}

fn fail_sink(sink: ReplySink, err: SftpCliError) {
    match sink {
        ReplySink::Listing { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        // raw-line callers observe the dropped sender as `Disconnected`
        ReplySink::Lines(_) | ReplySink::Help | ReplySink::Terminate => {}
    }
}
