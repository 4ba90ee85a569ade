//! Bounded polling for "wait until the remote side shows it" checks.

use crate::sftp_cli::error::{SftpCliError, SftpCliResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Fixed attempt budget with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self { max_attempts, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Run `attempt` until it yields `Some`, sleeping between tries.
    ///
    /// `Ok(None)` means "not there yet"; an `Err` aborts immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> SftpCliResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SftpCliResult<Option<T>>>,
    {
        let budget = self.max_attempts.max(1);
        for n in 1..=budget {
            if let Some(value) = attempt(n).await? {
                if n > 1 {
                    log::debug!("{} settled after {} attempts", label, n);
                }
                return Ok(value);
            }
            if n < budget {
                tokio::time::sleep(self.delay()).await;
            }
        }
        Err(SftpCliError::retry_exhausted(format!(
            "{}: gave up after {} attempts",
            label, budget
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_cli::error::SftpCliErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let policy = RetryPolicy::new(5, 100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();
        let out = policy
            .run("wait", move |n| {
                c.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n == 3 { Some(n) } else { None }) }
            })
            .await
            .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget() {
        let policy = RetryPolicy::new(4, 10);
        let err = policy
            .run("mkdir /x", |_| async { Ok::<Option<()>, SftpCliError>(None) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::RetryExhausted);
        assert!(err.message.contains("4 attempts"));
    }

    #[tokio::test]
    async fn error_short_circuits() {
        let policy = RetryPolicy::new(10, 0);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = policy
            .run("x", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<Option<()>, _>(SftpCliError::disconnected("gone")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, SftpCliErrorKind::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, 0);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let out = rt.block_on(policy.run("once", |_| async { Ok(Some(1)) }));
        assert_eq!(out.unwrap(), 1);
    }
}
