//! Cold asynchronous computations.
//!
//! An [`AsyncM`] is a recipe: a function from the [`Progress`] node it runs
//! under to a future of its result. Building one does nothing; every
//! [`run`](AsyncM::run) executes it afresh, side effects included. Use
//! [`spawn`](AsyncM::spawn) when several consumers must share one execution.
//!
//! # Example
//!
//! ```no_run
//! use asyncm::{AsyncM, Either};
//! use time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let fast = AsyncM::timeout(Duration::milliseconds(100)).map(|_| "fast");
//! let slow = AsyncM::timeout(Duration::milliseconds(200)).map(|_| "slow");
//!
//! let winner = asyncm::run(&AsyncM::any(&fast, &slow)).await.unwrap();
//! assert_eq!(winner, Either::Left("fast"));
//! # });
//! ```

use alloc::sync::Arc;
use core::future::Future;
use core::sync::atomic::{AtomicBool, Ordering};
use futures::future::{self, BoxFuture, FutureExt};
use time::Duration;
use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::spawn::spawn;
use crate::stream::Stream;
use crate::task_pool::park;
use crate::{Either, Progress, Value};

type Run<T> = dyn Fn(Progress) -> BoxFuture<'static, Result<T>> + Send + Sync;

/// A cold computation yielding `T` under a given [`Progress`].
pub struct AsyncM<T> {
    run: Arc<Run<T>>,
}

impl<T> Clone for AsyncM<T> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<T> core::fmt::Debug for AsyncM<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncM").finish_non_exhaustive()
    }
}

/// The continuation handed to a callback-style external operation.
///
/// Consuming `self` on every path guarantees a lifted operation resolves at
/// most once; dropping it unresolved fails the computation with
/// [`Error::Abandoned`].
#[derive(Debug)]
pub struct Resolver<T> {
    k: oneshot::Sender<Result<T>>,
}

impl<T> Resolver<T> {
    pub fn resolve(self, x: T) {
        self.complete(Ok(x))
    }

    pub fn reject(self, e: Error) {
        self.complete(Err(e))
    }

    pub fn complete(self, r: Result<T>) {
        // nobody is waiting any more if the computation was dropped
        _ = self.k.send(r);
    }
}

impl<T: Value> AsyncM<T> {
    /// Builds a computation from its run function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |p| f(p).boxed()),
        }
    }

    /// Executes the computation under `p`.
    pub fn run(&self, p: Progress) -> BoxFuture<'static, Result<T>> {
        (self.run)(p)
    }

    /// Resolves immediately with `x`, whatever the Progress.
    pub fn pure(x: T) -> Self {
        Self::new(move |_| future::ready(Ok(x.clone())))
    }

    /// Fails immediately with `e`.
    pub fn fail(e: Error) -> Self {
        Self::new(move |_| future::ready(Err(e.clone())))
    }

    /// Never resolves.
    pub fn never() -> Self {
        Self::new(|_| future::pending())
    }

    /// Adapts a continuation-passing external operation.
    ///
    /// `io` is invoked once per run, with a fresh [`Resolver`].
    pub fn lift_callback<F>(io: F) -> Self
    where
        F: Fn(Resolver<T>) + Send + Sync + 'static,
    {
        Self::new(move |_| {
            let (tx, rx) = oneshot::channel();
            io(Resolver { k: tx });
            async move { rx.await.unwrap_or(Err(Error::Abandoned)) }
        })
    }

    /// Adapts a future that is already under way.
    ///
    /// The future is driven at most once; every run observes its single
    /// outcome. The first run hands it to the task pool of its tree, so it
    /// keeps making progress even if that run is dropped.
    pub fn lift_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = fut.boxed().shared();
        let driven = Arc::new(AtomicBool::new(false));
        Self::new(move |p| {
            if !driven.swap(true, Ordering::AcqRel) {
                let driver = shared.clone();
                spawn!(p.tasks(), "lift_future", async move {
                    _ = driver.await;
                });
            }
            shared.clone()
        })
    }

    pub fn map<U, F>(&self, f: F) -> AsyncM<U>
    where
        U: Value,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        AsyncM::new(move |p| {
            let fut = this.run(p);
            let f = f.clone();
            async move { fut.await.map(|x| f(x)) }
        })
    }

    /// Runs `f` on the result, under the same Progress.
    pub fn bind<U, F>(&self, f: F) -> AsyncM<U>
    where
        U: Value,
        F: Fn(T) -> AsyncM<U> + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        AsyncM::new(move |p| {
            let fut = this.run(p.clone());
            let f = f.clone();
            async move {
                let x = fut.await?;
                f(x).run(p).await
            }
        })
    }

    /// The eager half of [`spawn`](AsyncM::spawn): starts one execution under
    /// `p` right now and returns a computation that waits for its result.
    ///
    /// The returned computation is already hot; running it again never
    /// restarts the work. Waiting on it is a checkpoint: under a cancelled
    /// scope it parks instead of waiting for the result.
    pub fn start(&self, p: &Progress) -> AsyncM<T> {
        let result = Emitter::with_config(p.config());
        let sink = result.clone();
        let fut = self.run(p.clone());
        spawn!(p.tasks(), "spawn", async move { sink.emit(fut.await) });

        AsyncM::new(move |p: Progress| {
            let result = result.clone();
            async move {
                tokio::select! {
                    biased;
                    r = result.cached_or_next() => r,
                    _ = p.cancelled() => park().await,
                }
            }
        })
    }

    /// Starts the computation under the caller's Progress without waiting,
    /// and yields a handle that every consumer can run to share its result.
    pub fn spawn(&self) -> AsyncM<AsyncM<T>> {
        let this = self.clone();
        AsyncM::new(move |p| future::ready(Ok(this.start(&p))))
    }

    /// Starts the computation under a fresh child scope without waiting, and
    /// yields that scope so the caller can cancel it later.
    pub fn fork(&self) -> AsyncM<Progress> {
        let this = self.clone();
        AsyncM::new(move |p| {
            let child = p.cons();
            let fut = this.run(child.clone());
            spawn!(p.tasks(), "fork", (depth = child.depth()), async move {
                if let Err(e) = fut.await {
                    tracing::debug!("Forked computation failed: {e}");
                }
            });
            future::ready(Ok(child))
        })
    }

    /// Runs under a freshly pushed child of the current node.
    pub fn scope(&self) -> Self {
        let this = self.clone();
        Self::new(move |p| this.run(p.cons()))
    }

    /// Runs under the parent of the current node, or the node itself at a root.
    pub fn unscope(&self) -> Self {
        let this = self.clone();
        Self::new(move |p| {
            let outer = p.parent().cloned().unwrap_or(p);
            this.run(outer)
        })
    }

    /// Runs both under one new shared scope and yields whichever result
    /// arrives first.
    ///
    /// Nothing is aborted: the slower arm keeps running until it completes or
    /// parks at a checkpoint, at which point its task is dropped.
    pub fn race(m1: &AsyncM<T>, m2: &AsyncM<T>) -> Self {
        let (m1, m2) = (m1.clone(), m2.clone());
        Self::new(move |p| {
            let winner = Channel::new();
            for m in [&m1, &m2] {
                let fut = m.run(p.clone());
                let sink = winner.clone();
                spawn!(p.tasks(), "race_arm", async move { sink.write(fut.await) });
            }
            async move { winner.recv().await }
        })
        .scope()
    }

    /// Races the two computations; each must [`commit`](AsyncM::commit)
    /// before surfacing its result, so exactly one side is reported.
    pub fn any<U: Value>(m1: &AsyncM<T>, m2: &AsyncM<U>) -> AsyncM<Either<T, U>> {
        let left: AsyncM<Either<T, U>> =
            m1.bind(|x| AsyncM::commit().map(move |_| Either::Left(x.clone())));
        let right: AsyncM<Either<T, U>> =
            m2.bind(|y| AsyncM::commit().map(move |_| Either::Right(y.clone())));
        AsyncM::race(&left, &right)
    }

    /// Runs both under the current Progress and pairs their results.
    ///
    /// If either never resolves, neither does the pair.
    pub fn all<U: Value>(m1: &AsyncM<T>, m2: &AsyncM<U>) -> AsyncM<(T, U)> {
        let (m1, m2) = (m1.clone(), m2.clone());
        AsyncM::new(move |p| future::try_join(m1.run(p.clone()), m2.run(p)))
    }

    /// Runs the computation, checks the scope is still alive, and yields a
    /// stream cell whose tail repeats the whole thing.
    pub fn repeat(&self) -> AsyncM<Stream<T>> {
        let this = self.clone();
        AsyncM::new(move |p| {
            let this = this.clone();
            async move {
                let a = this.run(p.clone()).await?;
                p.checkpoint().await;
                Ok(Stream::Next(Some(a), this.repeat()))
            }
        })
    }

    /// [`repeat`](AsyncM::repeat) as a stream led by a `None` tick.
    pub fn repeat_s(&self) -> Stream<T> {
        Stream::Next(None, self.repeat())
    }

    /// A stream with a single event: this computation's result.
    pub fn lift_s(&self) -> Stream<T> {
        Stream::Next(None, self.map(Stream::pure))
    }
}

impl<T: Value> AsyncM<AsyncM<T>> {
    pub fn join(&self) -> AsyncM<T> {
        self.bind(|m| m)
    }
}

impl<F: Value> AsyncM<F> {
    /// Applies the function this computation yields to the result of `mx`.
    pub fn apply<X, U>(&self, mx: &AsyncM<X>) -> AsyncM<U>
    where
        X: Value,
        U: Value,
        F: Fn(X) -> U,
    {
        let mx = mx.clone();
        self.bind(move |f| mx.map(move |x| f(x)))
    }
}

impl AsyncM<()> {
    /// The cancellation checkpoint: resolves iff the current node is alive,
    /// otherwise never.
    pub fn if_alive() -> Self {
        Self::new(|p| async move {
            p.checkpoint().await;
            Ok(())
        })
    }

    /// Resolves iff this call is the one that cancels the current node.
    pub fn cancel() -> Self {
        Self::new(|p| async move {
            if !p.cancel() {
                park::<()>().await;
            }
            Ok(())
        })
    }

    /// Claims victory: still alive, and first to cancel.
    pub fn commit() -> Self {
        Self::if_alive().bind(|_| Self::cancel())
    }

    /// Resolves after `dt` on the timer of the current tree.
    pub fn timeout(dt: Duration) -> Self {
        Self::new(move |p| async move {
            p.sleep(dt).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    async fn parked<T>(m: &AsyncM<T>, p: Progress) -> bool
    where
        T: Value,
    {
        tokio::time::timeout(std::time::Duration::from_secs(10), m.run(p))
            .await
            .is_err()
    }

    fn depth() -> AsyncM<usize> {
        AsyncM::new(|p| future::ready(Ok(p.depth())))
    }

    #[tokio::test]
    async fn functor_laws() {
        let p = Progress::root();
        let m = AsyncM::pure(3);

        assert_eq!(m.map(|x| x).run(p.clone()).await.unwrap(), 3);

        let f = |x: i32| x + 1;
        let g = |x: i32| x * 10;
        let composed = m.map(move |x| g(f(x))).run(p.clone()).await.unwrap();
        let chained = m.map(f).map(g).run(p).await.unwrap();
        assert_eq!(composed, chained);
    }

    #[tokio::test]
    async fn monad_laws() {
        let p = Progress::root();
        let f = |x: i32| AsyncM::pure(x * 2);
        let g = |x: i32| AsyncM::pure(x - 5);
        let m = AsyncM::pure(21);

        // left identity
        assert_eq!(
            AsyncM::pure(21).bind(f).run(p.clone()).await.unwrap(),
            f(21).run(p.clone()).await.unwrap()
        );
        // right identity
        assert_eq!(
            m.bind(AsyncM::pure).run(p.clone()).await.unwrap(),
            m.run(p.clone()).await.unwrap()
        );
        // associativity
        let lhs = m.bind(f).bind(g).run(p.clone()).await.unwrap();
        let rhs = m.bind(move |x| f(x).bind(g)).run(p).await.unwrap();
        assert_eq!(lhs, rhs);
    }

    #[tokio::test]
    async fn join_and_apply() {
        let p = Progress::root();
        let nested = AsyncM::pure(AsyncM::pure("inner"));
        assert_eq!(nested.join().run(p.clone()).await.unwrap(), "inner");

        let mf = AsyncM::pure(|x: i32| x + 100);
        assert_eq!(mf.apply(&AsyncM::pure(1)).run(p).await.unwrap(), 101);
    }

    #[tokio::test]
    async fn failures_propagate() {
        let p = Progress::root();
        let bad = AsyncM::<i32>::fail(Error::msg("no route"));

        assert!(bad.map(|x| x + 1).run(p.clone()).await.is_err());
        assert!(
            AsyncM::pure(1)
                .bind(move |_| bad.clone())
                .run(p.clone())
                .await
                .is_err()
        );

        let mf = AsyncM::pure(|x: i32| x);
        let r = mf.apply(&AsyncM::fail(Error::msg("late"))).run(p.clone()).await;
        assert_eq!(r.unwrap_err().to_string(), "External operation failed: late");

        let r = AsyncM::all(&AsyncM::pure(1), &AsyncM::<i32>::fail(Error::msg("x")))
            .run(p)
            .await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn cold_until_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let m = AsyncM::lift_callback(move |k| {
            counter.fetch_add(1, Ordering::SeqCst);
            k.resolve(())
        });
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        m.run(Progress::root()).await.unwrap();
        m.run(Progress::root()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn callback_resolves_once_or_is_abandoned() {
        let p = Progress::root();
        let ok = AsyncM::lift_callback(|k| k.resolve(5));
        assert_eq!(ok.run(p.clone()).await.unwrap(), 5);

        let failed = AsyncM::<i32>::lift_callback(|k| k.reject(Error::msg("refused")));
        assert!(matches!(
            failed.run(p.clone()).await,
            Err(Error::Message(_))
        ));

        let dropped = AsyncM::<i32>::lift_callback(drop);
        assert!(matches!(dropped.run(p).await, Err(Error::Abandoned)));
    }

    #[tokio::test]
    async fn lifted_future_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let m = AsyncM::lift_future(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(9)
        });

        assert_eq!(m.run(Progress::root()).await.unwrap(), 9);
        assert_eq!(m.run(Progress::root()).await.unwrap(), 9);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lifted_future_is_driven_by_the_pool() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let m = AsyncM::lift_future(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        // give up on the first run well before the future is done
        let p = Progress::root();
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(10), m.run(p.clone())).await;
        assert!(abandoned.is_err());
        assert_eq!(p.tasks().len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(done.load(Ordering::SeqCst));
        assert!(p.tasks().is_empty());
        m.run(p).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_shares_one_execution() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let work = AsyncM::timeout(ms(50)).map(move |_| counter.fetch_add(1, Ordering::SeqCst));

        let p = Progress::root();
        let hot = work.spawn().run(p.clone()).await.unwrap();
        let (a, b) = AsyncM::all(&hot, &hot).run(p.clone()).await.unwrap();
        let c = hot.run(p).await.unwrap();

        assert_eq!((a, b, c), (0, 0, 0));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_starts_eagerly() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let work = AsyncM::lift_callback(move |k| {
            flag.store(true, Ordering::SeqCst);
            k.resolve(())
        });

        let _hot = work.spawn().run(Progress::root()).await.unwrap();
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn fork_returns_a_cancellable_child() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let work = AsyncM::timeout(ms(50))
            .bind(|_| AsyncM::if_alive())
            .map(move |_| flag.store(true, Ordering::SeqCst));

        let root = Progress::root();
        let child = work.fork().run(root.clone()).await.unwrap();
        assert!(child.parent().unwrap().ptr_eq(&root));
        assert!(child.cancel());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!done.load(Ordering::SeqCst));

        work.fork().run(root).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scope_and_unscope() {
        let root = Progress::root();
        assert_eq!(depth().scope().run(root.clone()).await.unwrap(), 1);
        assert_eq!(depth().scope().scope().run(root.clone()).await.unwrap(), 2);
        assert_eq!(depth().unscope().run(root.clone()).await.unwrap(), 0);
        assert_eq!(depth().unscope().scope().run(root.cons()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkpoints() {
        let p = Progress::root().cons();
        AsyncM::if_alive().run(p.clone()).await.unwrap();
        AsyncM::commit().run(p.clone()).await.unwrap();

        assert!(!p.is_alive());
        assert!(parked(&AsyncM::if_alive(), p.clone()).await);
        assert!(parked(&AsyncM::cancel(), p.clone()).await);
        assert!(parked(&AsyncM::commit(), p).await);
    }

    #[tokio::test(start_paused = true)]
    async fn any_reports_the_first_to_commit() {
        let late = Arc::new(AtomicBool::new(false));
        let flag = late.clone();
        let fast = AsyncM::timeout(ms(100));
        let slow = AsyncM::timeout(ms(200))
            .bind(|_| AsyncM::if_alive())
            .map(move |_| flag.store(true, Ordering::SeqCst));

        let start = Instant::now();
        let r = AsyncM::any(&fast, &slow).run(Progress::root()).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(r, Either::Left(()));
        assert!(elapsed >= std::time::Duration::from_millis(100));
        assert!(elapsed < std::time::Duration::from_millis(150));

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!late.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn race_lets_the_loser_finish() {
        let finished = Arc::new(AtomicUsize::new(0));
        let (a, b) = (finished.clone(), finished.clone());
        let fast = AsyncM::timeout(ms(10)).map(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            "fast"
        });
        let slow = AsyncM::timeout(ms(20)).map(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            "slow"
        });

        let r = AsyncM::race(&slow, &fast).run(Progress::root()).await.unwrap();
        assert_eq!(r, "fast");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_pairs_results() {
        let r = AsyncM::all(&AsyncM::pure(1), &AsyncM::pure(2))
            .run(Progress::root())
            .await
            .unwrap();
        assert_eq!(r, (1, 2));
    }

    #[tokio::test]
    async fn all_hangs_on_a_cancelled_arm() {
        let p = Progress::root();
        let q = p.cons();
        q.cancel();
        let m = AsyncM::all(&AsyncM::pure(1), &AsyncM::if_alive());
        assert!(parked(&m, q).await);
    }

    #[tokio::test]
    async fn repeat_builds_a_stream() {
        let s = AsyncM::pure(4).repeat_s().take(3);
        let xs = s.collect().run(Progress::root()).await.unwrap();
        assert_eq!(xs, vec![4, 4, 4]);

        let single = AsyncM::pure("once").lift_s().collect();
        assert_eq!(single.run(Progress::root()).await.unwrap(), vec!["once"]);
    }
}
