//! Pseudo-terminal backed transport (`portable-pty`).
//!
//! Output is pumped by a dedicated reader thread because PTY reads are
//! blocking; the thread reaps the child once the stream hits EOF so the
//! `End` event always follows the last `Data` event. A watchdog thread
//! enforces the inactivity timeout: from a write until the session reports
//! the reply settled, any silence longer than the timeout yields an
//! `Operation timed out` line and a kill. Output only restarts the clock;
//! the terminal echoes every command, so it cannot mean the reply is done.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use crate::sftp_cli::transport::{
    ExitInfo, ProcessTransport, SpawnedTransport, TransportEvent, TransportSpawner,
};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 4096;
const WATCHDOG_TICK: Duration = Duration::from_millis(250);

/// Spawns children on a fresh PTY.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    pub rows: u16,
    pub cols: u16,
    /// `None` disables the watchdog.
    pub inactivity_timeout: Option<Duration>,
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self {
            rows: 24,
            // wide enough that long listing lines never wrap
            cols: 512,
            inactivity_timeout: None,
        }
    }
}

impl PtySpawner {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inactivity_timeout: Some(timeout),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Activity {
    waiting_since: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl Activity {
    fn wrote(&self) {
        let mut since = self.waiting_since.lock().unwrap_or_else(|p| p.into_inner());
        since.get_or_insert_with(Instant::now);
    }

    fn heard(&self) {
        let mut since = self.waiting_since.lock().unwrap_or_else(|p| p.into_inner());
        if since.is_some() {
            *since = Some(Instant::now());
        }
    }

    fn settled(&self) {
        *self.waiting_since.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn stalled_for(&self) -> Option<Duration> {
        let since = *self.waiting_since.lock().unwrap_or_else(|p| p.into_inner());
        since.map(|t| t.elapsed())
    }
}

impl TransportSpawner for PtySpawner {
    fn spawn(&self, argv: &[String]) -> SftpCliResult<SpawnedTransport> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SftpCliError::spawn_failed("empty argv"))?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SftpCliError::spawn_failed(format!("openpty: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.env("TERM", "dumb");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SftpCliError::spawn_failed(format!("{}: {}", program, e)))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SftpCliError::spawn_failed(format!("pty reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SftpCliError::spawn_failed(format!("pty writer: {}", e)))?;
        let killer = child.clone_killer();

        let (tx, rx) = mpsc::unbounded_channel();
        let activity = Arc::new(Activity::default());
        // the greeting (or password prompt) is the first thing we wait for
        activity.wrote();

        let pump_tx = tx.clone();
        let pump_activity = activity.clone();
        std::thread::Builder::new()
            .name("sftp-cli-pty-reader".into())
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            pump_activity.heard();
                            if pump_tx.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        // EIO once the child side closes
                        Err(_) => break,
                    }
                }
                pump_activity.closed.store(true, Ordering::SeqCst);
                let code = match child.wait() {
                    Ok(status) => Some(status.exit_code() as i32),
                    Err(e) => {
                        log::warn!("failed to reap sftp child: {}", e);
                        None
                    }
                };
                let _ = pump_tx.send(TransportEvent::End(ExitInfo { code }));
            })
            .map_err(|e| SftpCliError::spawn_failed(format!("reader thread: {}", e)))?;

        if let Some(timeout) = self.inactivity_timeout {
            let dog_tx = tx;
            let dog_activity = activity.clone();
            let mut dog_killer = killer.clone_killer();
            std::thread::Builder::new()
                .name("sftp-cli-pty-watchdog".into())
                .spawn(move || {
                    while !dog_activity.closed.load(Ordering::SeqCst) {
                        std::thread::sleep(WATCHDOG_TICK);
                        if dog_activity.stalled_for().map_or(false, |d| d >= timeout) {
                            log::warn!("sftp child silent for {:?}, killing", timeout);
                            let _ = dog_tx.send(TransportEvent::Data(
                                b"Operation timed out\r\n".to_vec(),
                            ));
                            let _ = dog_killer.kill();
                            break;
                        }
                    }
                })
                .map_err(|e| SftpCliError::spawn_failed(format!("watchdog thread: {}", e)))?;
        }

        Ok(SpawnedTransport {
            transport: Box::new(PtyTransport {
                master: Some(pair.master),
                writer: Some(writer),
                killer,
                activity,
            }),
            events: rx,
        })
    }
}

/// Write side of a PTY child.
pub struct PtyTransport {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    activity: Arc<Activity>,
}

impl ProcessTransport for PtyTransport {
    fn write(&mut self, data: &[u8]) -> SftpCliResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SftpCliError::disconnected("pty already destroyed"))?;
        writer.write_all(data)?;
        writer.flush()?;
        self.activity.wrote();
        Ok(())
    }

    fn settled(&mut self) {
        self.activity.settled();
    }

    fn destroy(&mut self) {
        self.activity.closed.store(true, Ordering::SeqCst);
        self.writer = None;
        self.master = None;
    }

    fn kill(&mut self) -> SftpCliResult<()> {
        self.activity.closed.store(true, Ordering::SeqCst);
        self.killer
            .kill()
            .map_err(|e| SftpCliError::local_io(format!("kill sftp child: {}", e)))
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.activity.closed.store(true, Ordering::SeqCst);
    }
}
