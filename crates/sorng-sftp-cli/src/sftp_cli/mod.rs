//! # sftp_cli: interactive sftp(1) session driver
//!
//! One [`SftpSession`] per connection. Every caller request and every
//! chunk of terminal output funnels through a single task that owns the
//! session state, so exactly one command is ever on the wire.
//!
//! Architecture:
//! - `types`: config, markers, entries, stat records, events, snapshots
//! - `error`: categorised error type
//! - `transport`: process transport traits + in-memory simulated transport
//! - `pty`: `portable-pty` backed transport with inactivity watchdog
//! - `args`: sftp argv assembly
//! - `keys`: temporary private-key staging
//! - `local`: local staging files for `get`/`put`
//! - `parser`: chunk classification, reply buffering, echo/prompt stripping
//! - `decode`: error detection, `ls -l`/`pwd`/`help` decoding, path quoting
//! - `cache`: 10 s per-path listing cache
//! - `queue`: command requests and their FIFO
//! - `session`: connection state machine and dispatcher (sync core)
//! - `client`: async session handle driving the core
//! - `ops`: stat, mkdir, transfers and friends
//! - `retry`: bounded polling for remote materialization
//! - `service`: multi-session registry

pub mod types;
pub mod error;
pub mod transport;
pub mod pty;
pub mod args;
pub mod keys;
pub mod local;
pub mod parser;
pub mod decode;
pub mod cache;
pub mod queue;
pub mod session;
pub mod client;
pub mod ops;
pub mod retry;
pub mod service;

pub use types::*;
pub use error::{SftpCliError, SftpCliErrorKind, SftpCliResult};
pub use transport::{
    ExitInfo, ProcessTransport, SimulatedReply, SimulatedSpawner, SimulatedTransport,
    SpawnedTransport, TransportEvent, TransportSpawner,
};
pub use pty::PtySpawner;
pub use keys::{KeyMaterial, TempKeyFiles};
pub use local::{LocalFiles, TokioLocalFiles};
pub use decode::CommandOptions;
pub use retry::RetryPolicy;
pub use client::SftpSession;
pub use ops::TransferProgressSender;
pub use service::{SftpCliService, SftpCliServiceState};
