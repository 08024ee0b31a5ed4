//! One-shot signals owned by sessions.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed,
}

/// Signals that a session's client finished authorization.
///
/// Settles at most once. Waiters arriving after it settled return immediately.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<Readiness>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Readiness::Pending);
        Self { tx }
    }

    /// Mark the gate ready. Returns `true` only for the call that released it.
    pub fn release(&self) -> bool {
        self.settle(Readiness::Ready)
    }

    /// Mark the gate as never becoming ready. Returns `true` if this call settled it.
    pub fn fail(&self) -> bool {
        self.settle(Readiness::Failed)
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == Readiness::Ready
    }

    /// Wait until the gate settles.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let settled = *rx
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map_err(|_| Error::Cancelled)?;
        match settled {
            Readiness::Ready => Ok(()),
            _ => Err(Error::SessionFailed(
                "client will not become ready".to_string(),
            )),
        }
    }

    fn settle(&self, outcome: Readiness) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == Readiness::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Unarmed,
    Armed,
    Done(bool),
}

/// Tracks a finalize routine that must be allowed to finish.
///
/// The gate is armed when finalization starts and completed with its outcome.
#[derive(Debug)]
pub struct CompletionGate {
    tx: watch::Sender<Completion>,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Completion::Unarmed);
        Self { tx }
    }

    /// Arm the gate. Returns `true` only for the first call.
    pub fn arm(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == Completion::Unarmed {
                *state = Completion::Armed;
                true
            } else {
                false
            }
        })
    }

    /// Record the outcome of the armed routine.
    pub fn complete(&self, success: bool) {
        self.tx.send_if_modified(|state| {
            if matches!(state, Completion::Done(_)) {
                false
            } else {
                *state = Completion::Done(success);
                true
            }
        });
    }

    pub fn is_armed(&self) -> bool {
        *self.tx.borrow() != Completion::Unarmed
    }

    /// Wait for the outcome, bounded by `timeout`.
    ///
    /// Returns `None` if the gate was never armed or did not complete in time.
    pub async fn wait(&self, timeout: Duration) -> Option<bool> {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() == Completion::Unarmed {
            return None;
        }
        let done = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| matches!(state, Completion::Done(_))),
        )
        .await
        .ok()?
        .ok()
        .map(|state| *state)?;

        match done {
            Completion::Done(success) => Some(success),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_readiness_gate_releases_once() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        assert!(gate.release());
        assert!(!gate.release());
        assert!(!gate.fail());
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_release() {
        let gate = Arc::new(ReadinessGate::new());
        let waiter_gate = Arc::clone(&gate);
        let mut waiter = task::spawn(async move { waiter_gate.wait().await });

        assert_pending!(waiter.poll());
        gate.release();
        assert!(waiter.is_woken());
        assert!(assert_ready!(waiter.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_wait_after_release_returns_immediately() {
        let gate = ReadinessGate::new();
        gate.release();
        gate.wait().await.unwrap();
        gate.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_gate_rejects_waiters() {
        let gate = ReadinessGate::new();
        assert!(gate.fail());
        assert!(!gate.release());
        assert!(matches!(gate.wait().await, Err(Error::SessionFailed(_))));
    }

    #[tokio::test]
    async fn test_unarmed_completion_does_not_wait() {
        let gate = CompletionGate::new();
        assert!(!gate.is_armed());
        assert_eq!(gate.wait(Duration::from_secs(60)).await, None);
    }

    #[tokio::test]
    async fn test_completion_reports_outcome() {
        let gate = Arc::new(CompletionGate::new());
        assert!(gate.arm());
        assert!(!gate.arm());

        let finisher = Arc::clone(&gate);
        tokio::spawn(async move { finisher.complete(true) });

        assert_eq!(gate.wait(Duration::from_secs(5)).await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_completion_times_out() {
        let gate = CompletionGate::new();
        gate.arm();
        assert_eq!(gate.wait(Duration::from_secs(60)).await, None);
    }

    #[test]
    fn test_completion_keeps_first_outcome() {
        let gate = CompletionGate::new();
        gate.arm();
        gate.complete(false);
        gate.complete(true);
        assert!(gate.is_armed());
    }
}
