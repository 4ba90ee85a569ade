//! Process transport abstraction.
//!
//! The session never touches a child process directly: it asks a
//! [`TransportSpawner`] for a duplex handle plus an event stream and only
//! ever writes command lines into it. The production backend lives in
//! `pty.rs`; the in-memory backend below drives the unit and integration
//! tests and is handy for host-side demos.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emitted by a running transport, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Data(Vec<u8>),
    /// End of stream. Always the last event.
    End(ExitInfo),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code) }
    }
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Write side of a spawned child.
pub trait ProcessTransport: Send {
    /// Write raw bytes to the child's terminal.
    fn write(&mut self, data: &[u8]) -> SftpCliResult<()>;

    /// Make sure output keeps flowing. Most backends never pause.
    fn resume(&mut self) {}

    /// The reply to the last write is complete; the child may now go quiet
    /// without counting as stalled.
    fn settled(&mut self) {}

    /// Close the write side and stop delivering events.
    fn destroy(&mut self);

    /// Kill the underlying process.
    fn kill(&mut self) -> SftpCliResult<()>;
}

pub struct SpawnedTransport {
    pub transport: Box<dyn ProcessTransport>,
    pub events: TransportEvents,
}

/// Starts a child for the given argv (`argv[0]` is the program).
pub trait TransportSpawner: Send + Sync {
    fn spawn(&self, argv: &[String]) -> SftpCliResult<SpawnedTransport>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport (for testing & offline use)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the scripted child does with one received command line.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedReply {
    Output(String),
    Exit(i32),
    Silent,
}

type Responder = dyn Fn(&str) -> SimulatedReply + Send + Sync;

#[derive(Default)]
struct SimulatedState {
    spawns: Vec<Vec<String>>,
    written: Vec<String>,
    partial: String,
    destroyed: usize,
    killed: usize,
    settled: usize,
    fail_next: Option<String>,
    tx: Option<mpsc::UnboundedSender<TransportEvent>>,
}

/// Spawner whose children live entirely in memory.
///
/// Clones share state, so a test keeps one clone to inject output and
/// inspect what the session wrote while the session owns the other.
#[derive(Clone, Default)]
pub struct SimulatedSpawner {
    state: Arc<Mutex<SimulatedState>>,
    greeting: Option<String>,
    responder: Option<Arc<Responder>>,
}

impl SimulatedSpawner {
    /// A silent child: output only arrives through [`inject`](Self::inject).
    pub fn new() -> Self {
        Self::default()
    }

    /// A child that prints `greeting` on start and answers every written
    /// line through `responder`.
    pub fn scripted<F>(greeting: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str) -> SimulatedReply + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            greeting: Some(greeting.into()),
            responder: Some(Arc::new(responder)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        lock_state(&self.state)
    }

    /// Feed output to the most recently spawned child.
    pub fn inject(&self, text: &str) {
        if let Some(tx) = &self.lock().tx {
            let _ = tx.send(TransportEvent::Data(text.as_bytes().to_vec()));
        }
    }

    /// End the most recently spawned child's stream.
    pub fn end(&self, code: Option<i32>) {
        if let Some(tx) = self.lock().tx.take() {
            let _ = tx.send(TransportEvent::End(ExitInfo { code }));
        }
    }

    pub fn fail_next_spawn(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().spawns.len()
    }

    pub fn last_argv(&self) -> Option<Vec<String>> {
        self.lock().spawns.last().cloned()
    }

    /// Every complete line written so far, terminators stripped.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn destroyed(&self) -> usize {
        self.lock().destroyed
    }

    pub fn killed(&self) -> usize {
        self.lock().killed
    }

    #[cfg(test)]
    pub(crate) fn settled(&self) -> usize {
        self.lock().settled
    }
}

fn lock_state(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TransportSpawner for SimulatedSpawner {
    fn spawn(&self, argv: &[String]) -> SftpCliResult<SpawnedTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut st = self.lock();
            if let Some(msg) = st.fail_next.take() {
                return Err(SftpCliError::spawn_failed(msg));
            }
            st.spawns.push(argv.to_vec());
            st.partial.clear();
            st.tx = Some(tx.clone());
        }
        if let Some(greeting) = &self.greeting {
            let _ = tx.send(TransportEvent::Data(greeting.as_bytes().to_vec()));
        }
        Ok(SpawnedTransport {
            transport: Box::new(SimulatedTransport {
                state: self.state.clone(),
                responder: self.responder.clone(),
                tx: Some(tx),
            }),
            events: rx,
        })
    }
}

/// Write side handed to the session by [`SimulatedSpawner`].
pub struct SimulatedTransport {
    state: Arc<Mutex<SimulatedState>>,
    responder: Option<Arc<Responder>>,
    tx: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl ProcessTransport for SimulatedTransport {
    fn write(&mut self, data: &[u8]) -> SftpCliResult<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| SftpCliError::disconnected("simulated transport destroyed"))?;
        let lines = {
            let mut st = lock_state(&self.state);
            st.partial.push_str(&String::from_utf8_lossy(data));
            let mut lines = Vec::new();
            while let Some(idx) = st.partial.find('\n') {
                let line: String = st.partial.drain(..=idx).collect();
                lines.push(line.trim_end_matches(&['\r', '\n'][..]).to_string());
            }
            st.written.extend(lines.iter().cloned());
            lines
        };
        let Some(responder) = &self.responder else {
            return Ok(());
        };
        for line in lines {
            match responder(&line) {
                SimulatedReply::Output(text) => {
                    let _ = tx.send(TransportEvent::Data(text.into_bytes()));
                }
                SimulatedReply::Exit(code) => {
                    let _ = tx.send(TransportEvent::End(ExitInfo::code(code)));
                    self.tx = None;
                    lock_state(&self.state).tx = None;
                    break;
                }
                SimulatedReply::Silent => {}
            }
        }
        Ok(())
    }

    fn settled(&mut self) {
        lock_state(&self.state).settled += 1;
    }

    fn destroy(&mut self) {
        self.tx = None;
        let mut st = lock_state(&self.state);
        st.destroyed += 1;
        st.tx = None;
    }

    fn kill(&mut self) -> SftpCliResult<()> {
        lock_state(&self.state).killed += 1;
        Ok(())
    }
}
