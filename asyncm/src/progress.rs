//! The cancellation tree.
//!
//! Every computation runs under a [`Progress`] node. A node is alive while
//! neither it nor any of its ancestors has been cancelled, so cancelling a
//! node silences its whole subtree and nothing above or beside it.
//!
//! Cancellation is cooperative: marking a node never interrupts work that is
//! already in flight. It only makes the next [`checkpoint`](Progress::checkpoint)
//! under that node park forever.
//!
//! ```
//! use asyncm::Progress;
//!
//! let root = Progress::root();
//! let child = root.cons();
//! let grandchild = child.cons();
//!
//! assert!(child.cancel());
//! assert!(!child.cancel()); // only the first cancel wins
//!
//! assert!(root.is_alive());
//! assert!(!grandchild.is_alive());
//! ```

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::task_pool::{TaskPool, park};
use crate::timer::{Timer, TokioTimer};

/// State shared by every node of one tree.
pub(crate) struct Context {
    pub(crate) tasks: TaskPool,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) config: Config,
}

impl Context {
    pub(crate) fn new(config: Config, timer: Arc<dyn Timer>) -> Self {
        Self {
            tasks: TaskPool::new(),
            timer,
            config,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default(), Arc::new(TokioTimer))
    }
}

struct Node {
    cancelled: AtomicBool,
    /// Fires once this node or an ancestor is cancelled.
    token: CancellationToken,
    parent: Option<Progress>,
    context: Arc<Context>,
}

/// A handle on one node of the cancellation tree.
///
/// Cloning the handle is cheap and refers to the same node.
#[derive(Clone)]
pub struct Progress(Arc<Node>);

impl Progress {
    /// A fresh, alive root with the default timer and configuration.
    pub fn root() -> Self {
        Self::with_context(Arc::new(Context::default()))
    }

    pub(crate) fn with_context(context: Arc<Context>) -> Self {
        Self(Arc::new(Node {
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
            parent: None,
            context,
        }))
    }

    /// Pushes a new child scope under this node.
    pub fn cons(&self) -> Self {
        Self(Arc::new(Node {
            cancelled: AtomicBool::new(false),
            token: self.0.token.child_token(),
            parent: Some(self.clone()),
            context: self.0.context.clone(),
        }))
    }

    /// The enclosing scope, or `None` for a root.
    pub fn parent(&self) -> Option<&Progress> {
        self.0.parent.as_ref()
    }

    /// True iff neither this node nor any ancestor has been cancelled.
    pub fn is_alive(&self) -> bool {
        let mut node = Some(self);
        while let Some(p) = node {
            if p.0.cancelled.load(Ordering::Acquire) {
                return false;
            }
            node = p.parent();
        }
        true
    }

    /// Marks this node cancelled.
    ///
    /// Returns `true` only for the call that flips the flag; every later or
    /// concurrent caller gets `false`. This is what makes a race have exactly
    /// one winner.
    pub fn cancel(&self) -> bool {
        let won = self
            .0
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            tracing::trace!(depth = self.depth(), "progress cancelled");
            self.0.token.cancel();
        }
        won
    }

    /// Resolves at once if the node is alive, otherwise never resolves.
    ///
    /// A detached task that parks here is dropped from its pool.
    pub async fn checkpoint(&self) {
        if !self.is_alive() {
            park::<()>().await;
        }
    }

    /// Resolves once this node or one of its ancestors is cancelled.
    pub(crate) async fn cancelled(&self) {
        self.0.token.cancelled().await
    }

    /// Sleeps on the timer service of this tree.
    pub async fn sleep(&self, duration: Duration) {
        self.0.context.timer.sleep(duration).await
    }

    pub fn config(&self) -> &Config {
        &self.0.context.config
    }

    pub(crate) fn tasks(&self) -> &TaskPool {
        &self.0.context.tasks
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.0.context
    }

    /// Number of ancestors between this node and its root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.parent();
        while let Some(p) = node {
            depth += 1;
            node = p.parent();
        }
        depth
    }

    /// True if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Progress) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("depth", &self.depth())
            .field("alive", &self.is_alive())
            .finish()
    }
}
