//! Cold asynchronous computations with cooperative, tree-structured
//! cancellation, and the push streams and pull cursors built on top of them.
//!
//! Nothing in this crate runs until a computation is given a [`Progress`]
//! node to run under. Racing combinators decide a single winner by cancelling
//! a shared node, and cancellation only ever takes effect at checkpoints.
//!
//! # Features
//!
//! - **AsyncM**: Cold computations with `bind`, `race`, `any`, `all`, `spawn`
//!   and `fork`
//! - **Stream**: Push sequences with `switch`, `combine_latest`, `zip`,
//!   `multicast`, `fetch` and rate control
//! - **Signal / Behavior**: Pull cursors for sampling and windowing
//! - **Emitter / Channel**: The hand-off points the combinators are built on
//!
//! # Example
//!
//! ```no_run
//! use asyncm::{Runtime, Stream};
//! use time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let rt = Runtime::new();
//! let ticks = Stream::interval(Duration::milliseconds(100), 5);
//!
//! let xs = rt.run(&ticks.collect()).await.unwrap();
//! assert_eq!(xs, vec![1, 2, 3, 4, 5]);
//!
//! rt.shutdown().await;
//! # });
//! ```

extern crate alloc;

mod spawn;

pub mod async_m;
pub mod behavior;
pub mod channel;
pub mod config;
pub mod either;
pub mod emitter;
pub mod error;
pub mod progress;
pub mod signal;
pub mod stream;
pub mod task_pool;
pub mod timer;

use alloc::sync::Arc;

// Re-export commonly used types at crate root
pub use async_m::{AsyncM, Resolver};
pub use async_trait::async_trait;
pub use behavior::Behavior;
pub use channel::Channel;
pub use config::Config;
pub use either::Either;
pub use emitter::Emitter;
pub use error::{Error, Result};
pub use progress::Progress;
pub use signal::Signal;
pub use stream::Stream;
pub use task_pool::TaskPool;
pub use timer::{Timer, TokioTimer};

/// Anything that can flow through a computation.
///
/// Cold computations may run many times and spawned results are shared by
/// every observer, so values must be cheap to hand out again.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// Runs `m` under a fresh root with the default timer and configuration.
pub async fn run<T: Value>(m: &AsyncM<T>) -> Result<T> {
    m.run(Progress::root()).await
}

/// Owns one root [`Progress`] and the detached work started beneath it.
///
/// Use a `Runtime` rather than [`run`] when computations should share a
/// configuration or timer, or when their background tasks must be torn down
/// deterministically.
#[derive(Debug)]
pub struct Runtime {
    root: Progress,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            root: Progress::root(),
        }
    }

    pub fn with_config(self, config: Config) -> Self {
        let timer = self.root.context().timer.clone();
        Self::with_context(progress::Context::new(config, timer))
    }

    /// Replaces the timer service, e.g. with a simulated clock.
    pub fn with_timer(self, timer: Arc<dyn Timer>) -> Self {
        let config = self.root.config().clone();
        Self::with_context(progress::Context::new(config, timer))
    }

    fn with_context(context: progress::Context) -> Self {
        Self {
            root: Progress::with_context(Arc::new(context)),
        }
    }

    /// The root node every computation of this runtime runs under.
    pub fn progress(&self) -> &Progress {
        &self.root
    }

    pub fn tasks(&self) -> &TaskPool {
        self.root.tasks()
    }

    pub async fn run<T: Value>(&self, m: &AsyncM<T>) -> Result<T> {
        m.run(self.root.clone()).await
    }

    /// Cancels the root and drops every detached task still waiting on
    /// something that will never arrive.
    pub async fn shutdown(&self) {
        tracing::debug!(
            outstanding = self.root.tasks().len(),
            "Shutting down runtime"
        );
        self.root.cancel();
        self.root.tasks().shutdown().await;
    }
}
