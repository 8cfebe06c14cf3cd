use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::{runtime::Handle, task::JoinSet};
use tracing::{debug, warn};

/// Detached side-effect tasks (analytics, name lookups, remote writes, deferred
/// invalidation). A task's error or panic is logged and never reaches the operation that
/// submitted it.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit `fut` under `label`. Outside a Tokio runtime the task is dropped with a warning.
    pub fn submit<F>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!(task = label, "no async runtime; background task skipped");
            return;
        };
        let mut set = self.set();
        // Reap finished tasks so the set does not grow with a long session.
        while let Some(res) = set.try_join_next() {
            log_join(res);
        }
        set.spawn_on(
            async move {
                if let Err(e) = fut.await {
                    debug!(task = label, error = %format!("{e:#}"), "background task failed");
                }
            },
            &handle,
        );
    }

    pub fn pending(&self) -> usize {
        self.set().len()
    }

    /// Wait for everything submitted so far, including tasks submitted while draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.set());
            if batch.is_empty() {
                return;
            }
            while let Some(res) = batch.join_next().await {
                log_join(res);
            }
        }
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            warn!(error = %e, "background task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn failures_are_isolated_and_drain_waits() -> eyre::Result<()> {
        let tasks = Arc::new(BackgroundTasks::new());
        let done = Arc::new(AtomicUsize::new(0));

        tasks.submit("fails", async { eyre::bail!("boom") });
        for _ in 0..3_usize {
            let done = Arc::clone(&done);
            tasks.submit("counts", async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn drain_picks_up_tasks_spawned_by_tasks() -> eyre::Result<()> {
        let tasks = Arc::new(BackgroundTasks::new());
        let done = Arc::new(AtomicUsize::new(0));
        let inner_tasks = Arc::clone(&tasks);
        let inner_done = Arc::clone(&done);
        tasks.submit("outer", async move {
            inner_tasks.submit("inner", async move {
                inner_done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn submit_without_runtime_is_a_no_op() {
        let tasks = BackgroundTasks::new();
        tasks.submit("orphan", async { Ok(()) });
        assert_eq!(tasks.pending(), 0);
    }
}
