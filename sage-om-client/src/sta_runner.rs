//! Execution affinity runner.
//!
//! Every unit of work gets a fresh, detached OS thread that enters a
//! single-threaded apartment before running it. The caller awaits a oneshot
//! reply. Threads are never pooled: a COM session created on a runner
//! thread lives and dies on that thread.

use crate::apartment::ApartmentGuard;
use crate::errors::{SageError, SageResult};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tokio::sync::oneshot;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

type Outcome<T> = thread::Result<SageResult<T>>;

/// Runs closures on dedicated STA threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaRunner;

impl StaRunner {
    /// Run `work` on a new STA thread and await its result.
    ///
    /// Errors returned by `work` are handed back unchanged; a panic inside
    /// `work` is resumed on the awaiting task with its original payload.
    pub async fn run<F, T>(work: F) -> SageResult<T>
    where
        F: FnOnce() -> SageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = Self::spawn(work)?;
        Self::settle(rx.await)
    }

    /// Blocking variant of [`StaRunner::run`] for synchronous callers.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context, or
    /// when `work` itself panics.
    pub fn run_blocking<F, T>(work: F) -> SageResult<T>
    where
        F: FnOnce() -> SageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = Self::spawn(work)?;
        Self::settle(rx.blocking_recv())
    }

    fn spawn<F, T>(work: F) -> SageResult<oneshot::Receiver<Outcome<T>>>
    where
        F: FnOnce() -> SageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);

        thread::Builder::new()
            .name(format!("sage-sta-{id}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let _guard = ApartmentGuard::enter()?;
                    work()
                }));
                if tx.send(outcome).is_err() {
                    tracing::debug!(thread_id = id, "STA caller dropped before completion");
                }
            })
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to spawn STA thread");
                SageError::Internal(format!("failed to spawn STA thread: {e}"))
            })?;

        tracing::trace!(thread_id = id, "STA thread dispatched");
        Ok(rx)
    }

    fn settle<T>(received: Result<Outcome<T>, oneshot::error::RecvError>) -> SageResult<T> {
        match received {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => resume_unwind(panic),
            Err(_) => Err(SageError::Internal(
                "STA thread exited without reporting a result".into(),
            )),
        }
    }
}
