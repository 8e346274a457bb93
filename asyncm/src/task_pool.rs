//! Task pool tracking the detached work launched by a Progress tree.
//!
//! Races, `spawn`, `fork` and `fetch` all start work that outlives the
//! computation that launched it. That work is spawned here so a top-level
//! caller can tear everything down at once.
//!
//! # Shutdown
//!
//! A task whose computation parks at a failed checkpoint is dropped on the
//! spot: nothing after that checkpoint can ever run. Tasks that are merely
//! waiting, such as a forked computation that never resolves, stay until
//! shutdown. Shutdown has three phases:
//! 1. **Signal**: Cancel the pool token, which drops every tracked task at its
//!    next suspension point
//! 2. **Close**: Prevent new tasks from spawning
//! 3. **Wait**: Block until all tasks are gone

use core::future::Future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

tokio::task_local! {
    /// Fired by the task itself once it can make no further progress.
    static PARKED: CancellationToken;
}

/// Parks the current computation forever.
///
/// Inside a pool task this also tells the pool to drop the task, so a parked
/// computation holds on to nothing.
pub(crate) async fn park<T>() -> T {
    if PARKED.try_with(CancellationToken::cancel).is_ok() {
        tracing::trace!("Dropping parked task");
    }
    futures::future::pending().await
}

/// Manages the detached tasks of one Progress tree.
///
/// `TaskPool` combines a [`CancellationToken`] and a [`TaskTracker`]. Unlike
/// Progress cancellation, which is cooperative and only observed at
/// checkpoints, cancelling the pool drops its tasks outright.
#[derive(Debug, Default)]
pub struct TaskPool {
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl TaskPool {
    /// Creates a new task pool.
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Spawns a detached task tracked by this pool.
    ///
    /// The task runs until it completes, parks, or the pool is shut down,
    /// whichever comes first. Its output is discarded; detached work reports
    /// back through an `Emitter` or `Channel`.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel_token.clone();
        let parked = CancellationToken::new();
        self.task_tracker
            .spawn(PARKED.scope(parked.clone(), async move {
                tokio::select! {
                    _ = task => {}
                    _ = parked.cancelled() => {}
                    _ = cancel.cancelled() => {}
                }
            }));
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn len(&self) -> usize {
        self.task_tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_tracker.is_empty()
    }

    /// Drops every tracked task and waits for them to be gone.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// Checks if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
