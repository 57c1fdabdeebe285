//! Task spawning and cancellable background tasks.
//!
//! This module provides a [`TaskSpawner`] trait that lets services spawn work
//! without being tied to a specific runtime handle, plus [`BackgroundTask`], a
//! handle that owns a spawned task together with its cancellation token.
//!
//! Sessions keep one `BackgroundTask` per concern (player loop, playlist
//! loader, progress refresher) and cancel it whenever a competing operation
//! supersedes it.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Allows core services to spawn asynchronous work without knowing the
/// underlying runtime.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     spawner: TokioSpawner,
/// }
///
/// impl MyService {
///     fn start_background_work(&self) -> BackgroundTask {
///         self.spawner.spawn_cancellable("work", |token| async move {
///             token.cancelled().await;
///         })
///     }
/// }
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a task that receives a cancellation token and returns its handle.
    fn spawn_cancellable<F, Fut>(&self, name: &'static str, make: F) -> BackgroundTask
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner for the engine and tests.
///
/// Uses a Tokio runtime handle to spawn tasks.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    fn spawn_cancellable<F, Fut>(&self, name: &'static str, make: F) -> BackgroundTask
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let future = make(token.clone());
        let handle = self.handle.spawn(future);
        BackgroundTask {
            name,
            token,
            handle: Some(handle),
        }
    }
}

/// A spawned task plus the token used to cancel it.
///
/// Cancelling signals the token first (so cooperative loops can exit at their
/// next check) and then aborts the task so it stops at its next suspension
/// point. Dropping a `BackgroundTask` without cancelling detaches the task.
pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Returns the task's name (for logging).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns a clone of the task's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns whether the task has run to completion or was aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels the task.
    pub fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                log::debug!("[Runtime] Cancelling background task '{}'", self.name);
            }
            handle.abort();
        }
    }

    /// Detaches the task without cancelling it.
    ///
    /// Used when a task tears down its own session and must run to completion.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        // Give the task time to execute
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_stops_a_sleeping_task() {
        let spawner = TokioSpawner::current();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();

        let task = spawner.spawn_cancellable("sleeper", |_token| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            finished_clone.store(true, Ordering::SeqCst);
        });
        let token = task.token();
        task.cancel();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(token.is_cancelled());
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn detached_task_keeps_running() {
        let spawner = TokioSpawner::current();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();

        let task = spawner.spawn_cancellable("detached", |_token| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            finished_clone.store(true, Ordering::SeqCst);
        });
        task.detach();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
