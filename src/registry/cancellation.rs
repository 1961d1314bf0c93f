//! Cooperative cancellation.
//!
//! A job is represented twice: the registry keeps a [`JobHandle`] (cancel it,
//! ask whether it finished, wait for it) and the job itself owns the matching
//! [`JobGuard`]. Dropping the guard marks the job finished, so completion is
//! recorded even when the job panics or is aborted.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    cancel: CancelToken,
    done: watch::Receiver<bool>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow() || self.done.has_changed().is_err()
    }

    pub async fn wait(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// Owned by the running job; finishing is signalled on drop
#[derive(Debug)]
pub struct JobGuard {
    cancel: CancelToken,
    done: watch::Sender<bool>,
}

impl JobGuard {
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.done.send_replace(true);
    }
}

/// Create the registry-side handle and the job-side guard for one job
pub fn job_pair(name: impl Into<String>) -> (JobHandle, JobGuard) {
    let cancel = CancelToken::new();
    let (done_tx, done_rx) = watch::channel(false);
    (
        JobHandle {
            name: name.into(),
            cancel: cancel.clone(),
            done: done_rx,
        },
        JobGuard {
            cancel,
            done: done_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_drop_finishes_job() {
        let (handle, guard) = job_pair("job");
        assert!(!handle.is_finished());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        drop(guard);
        waiter.await.unwrap();
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn cancel_reaches_the_job() {
        let (handle, guard) = job_pair("job");
        let token = guard.token();
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn panicking_job_is_finished() {
        let (handle, guard) = job_pair("job");
        let result = tokio::spawn(async move {
            let _guard = guard;
            panic!("boom");
        })
        .await;
        assert!(result.is_err());
        assert!(handle.is_finished());
    }
}
