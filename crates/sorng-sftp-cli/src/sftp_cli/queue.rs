//! Command requests and the FIFO they wait in.

use crate::sftp_cli::error::SftpCliResult;
use crate::sftp_cli::types::DirEntry;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// Lines of one completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub tag: String,
    pub command_line: String,
    pub lines: Vec<String>,
}

pub type ReplySender = oneshot::Sender<CommandReply>;
pub type ListingSender = oneshot::Sender<SftpCliResult<Vec<DirEntry>>>;
pub type ProgressSender = mpsc::UnboundedSender<String>;

/// Where a completed reply goes.
#[derive(Debug)]
pub enum ReplySink {
    /// Raw lines back to the caller.
    Lines(ReplySender),
    /// Decoded, error-checked and cached under `path`.
    Listing { path: String, reply: ListingSender },
    /// Connect-time `help`; feeds the option registry.
    Help,
    /// The terminating command.
    Terminate,
}

#[derive(Debug)]
pub struct CommandRequest {
    pub tag: String,
    pub command_line: String,
    pub sink: ReplySink,
    pub progress: Option<ProgressSender>,
    /// Listing cache keys dropped once the command completes.
    pub invalidates: Vec<String>,
}

impl CommandRequest {
    pub fn new(tag: impl Into<String>, command_line: impl Into<String>, sink: ReplySink) -> Self {
        Self {
            tag: tag.into(),
            command_line: command_line.into(),
            sink,
            progress: None,
            invalidates: Vec::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn invalidating(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.invalidates.extend(paths);
        self
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self.sink, ReplySink::Terminate)
    }

    /// Progress sink is registered under `<tag>_progress`.
    pub fn progress_key(&self) -> Option<String> {
        self.progress.as_ref().map(|_| format!("{}_progress", self.tag))
    }
}

/// Strict FIFO of requests waiting for the wire.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<CommandRequest>,
}

impl CommandQueue {
    pub fn push(&mut self, request: CommandRequest) {
        self.pending.push_back(request);
    }

    pub fn pop(&mut self) -> Option<CommandRequest> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything still waiting; returns how many were abandoned.
    pub fn abandon(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
