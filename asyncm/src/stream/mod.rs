//! Push streams.
//!
//! A [`Stream`] is either finished, or has a head ready now and a cold
//! computation producing the rest. Heads are optional: a `None` head is a
//! tick that drives scheduling without delivering data.
//!
//! Streams are plain values. Running the same stream twice re-runs every
//! side effect behind it; use [`multicast`](Stream::multicast) to share one
//! live producer.

use alloc::sync::Arc;
use alloc::vec::Vec;
use futures::future;
use time::Duration;

use crate::error::Result;
use crate::{AsyncM, Either, Progress, Value};

mod combine;
mod rate;
mod share;

type Func<A, B> = Arc<dyn Fn(A) -> B + Send + Sync>;

/// A lazy, possibly infinite asynchronous sequence of optional values.
#[derive(Clone, Debug)]
pub enum Stream<T> {
    /// Terminal cell with an optional final value.
    End(Option<T>),
    /// A head available now and the computation of the remaining stream.
    Next(Option<T>, AsyncM<Stream<T>>),
}

/// Waits for whichever of two already started computations resolves first.
///
/// Both sides must be hot: the loser is merely no longer awaited, its result
/// stays available to a later run.
pub(crate) async fn first_of<A: Value, B: Value>(
    a: &AsyncM<A>,
    b: &AsyncM<B>,
    p: &Progress,
) -> Result<Either<A, B>> {
    match future::select(a.run(p.clone()), b.run(p.clone())).await {
        future::Either::Left((r, _)) => r.map(Either::Left),
        future::Either::Right((r, _)) => r.map(Either::Right),
    }
}

impl<T: Value> FromIterator<T> for Stream<T> {
    /// A finite stream whose cells are all immediately available.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let xs: Vec<T> = iter.into_iter().collect();
        xs.into_iter()
            .rev()
            .fold(Stream::End(None), |s, x| Stream::Next(Some(x), AsyncM::pure(s)))
    }
}

impl<T: Value> Stream<T> {
    pub fn pure(x: T) -> Self {
        Stream::End(Some(x))
    }

    pub fn empty() -> Self {
        Stream::End(None)
    }

    pub fn head(&self) -> Option<&T> {
        match self {
            Stream::End(a) | Stream::Next(a, _) => a.as_ref(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Stream::End(_))
    }

    /// Consumes the stream, calling `k` on every value.
    ///
    /// Liveness is checked before each cell, so cancelling the Progress the
    /// result runs under stops consumption at the next cell.
    pub fn run<F>(&self, k: F) -> AsyncM<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let this = self.clone();
        let k = Arc::new(k);
        AsyncM::new(move |p| {
            let mut s = this.clone();
            let k = k.clone();
            async move {
                loop {
                    p.checkpoint().await;
                    match s {
                        Stream::End(a) => {
                            if let Some(x) = a {
                                k(x);
                            }
                            return Ok(());
                        }
                        Stream::Next(a, m) => {
                            if let Some(x) = a {
                                k(x);
                            }
                            s = m.run(p.clone()).await?;
                        }
                    }
                }
            }
        })
    }

    /// Consumes a finite stream into its values, in order.
    pub fn collect(&self) -> AsyncM<Vec<T>> {
        let this = self.clone();
        AsyncM::new(move |p| {
            let mut s = this.clone();
            async move {
                let mut xs = Vec::new();
                loop {
                    p.checkpoint().await;
                    match s {
                        Stream::End(a) => {
                            xs.extend(a);
                            return Ok(xs);
                        }
                        Stream::Next(a, m) => {
                            xs.extend(a);
                            s = m.run(p.clone()).await?;
                        }
                    }
                }
            }
        })
    }

    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Value,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.map_with(Arc::new(f))
    }

    fn map_with<U: Value>(&self, f: Func<T, U>) -> Stream<U> {
        match self {
            Stream::End(a) => Stream::End(a.clone().map(|x| f(x))),
            Stream::Next(a, m) => {
                let head = a.clone().map(|x| f(x));
                Stream::Next(head, m.map(move |s| s.map_with(f.clone())))
            }
        }
    }

    /// Substitutes a stream for every value and flattens by switching: each
    /// new value abandons the stream produced for the previous one.
    pub fn bind<U, F>(&self, f: F) -> Stream<U>
    where
        U: Value,
        F: Fn(T) -> Stream<U> + Send + Sync + 'static,
    {
        match self {
            Stream::End(None) => Stream::End(None),
            Stream::End(Some(x)) => f(x.clone()),
            Stream::Next(..) => self.map(f).join(),
        }
    }

    /// Follows this stream until `mss` produces a stream of streams, then
    /// switches to that.
    ///
    /// The pending tail of the current stream runs outside the race scope so
    /// that whatever it starts survives the race; it is abandoned simply by
    /// never being continued.
    pub fn switch(&self, mss: &AsyncM<Stream<Stream<T>>>) -> Stream<T> {
        match self {
            Stream::End(a) => Stream::Next(a.clone(), mss.map(|ss| ss.join())),
            Stream::Next(a, m) => {
                let m = m.clone();
                Stream::Next(
                    a.clone(),
                    mss.spawn().bind(move |hot| switch_step(m.clone(), hot)),
                )
            }
        }
    }

    /// Pairs each value of `self` with the first value of `sx`.
    pub fn left_apply<X, U>(&self, sx: &Stream<X>) -> Stream<U>
    where
        X: Value,
        U: Value,
        T: Fn(X) -> U,
    {
        self.apply(&sx.first_event())
    }

    /// Runs until the first value, then ends with it.
    fn first_event(&self) -> Stream<T> {
        match self {
            Stream::End(_) => self.clone(),
            Stream::Next(Some(x), _) => Stream::End(Some(x.clone())),
            Stream::Next(None, m) => Stream::Next(None, m.map(|s| s.first_event())),
        }
    }

    /// Tags each cell with a running index starting at `i`; ticks advance the
    /// index too.
    pub fn zip_with_index(&self, i: usize) -> Stream<(usize, T)> {
        match self {
            Stream::End(a) => Stream::End(a.clone().map(|x| (i, x))),
            Stream::Next(a, m) => Stream::Next(
                a.clone().map(|x| (i, x)),
                m.map(move |s| s.zip_with_index(i + 1)),
            ),
        }
    }
}

fn switch_step<T: Value>(
    ms: AsyncM<Stream<T>>,
    mss: AsyncM<Stream<Stream<T>>>,
) -> AsyncM<Stream<T>> {
    AsyncM::any(&mss, &ms.unscope()).map(move |r| match r {
        Either::Left(ss) => ss.join(),
        Either::Right(Stream::End(a)) => Stream::Next(a, mss.map(|ss| ss.join())),
        Either::Right(Stream::Next(a, m)) => Stream::Next(a, switch_step(m, mss.clone())),
    })
}

impl<T: Value> Stream<Stream<T>> {
    /// Flattens by always following the most recent inner stream.
    pub fn join(&self) -> Stream<T> {
        match self {
            Stream::End(None) => Stream::End(None),
            Stream::End(Some(s)) => s.clone(),
            Stream::Next(None, m) => Stream::Next(None, m.map(|ss| ss.join())),
            Stream::Next(Some(s), m) => s.switch(m),
        }
    }
}

impl<F: Value> Stream<F> {
    /// Applies every function of this stream to every value of `sx`
    /// produced while it is the latest function.
    pub fn apply<X, U>(&self, sx: &Stream<X>) -> Stream<U>
    where
        X: Value,
        U: Value,
        F: Fn(X) -> U,
    {
        let sx = sx.clone();
        self.bind(move |f| sx.map(move |x| f(x)))
    }
}

impl Stream<usize> {
    /// Emits `1..=n`: the first value straight away, then one every `dt`.
    ///
    /// The final value arrives in the terminal cell.
    pub fn interval(dt: Duration, n: usize) -> Self {
        if n == 0 {
            return Stream::End(None);
        }
        Stream::Next(
            None,
            AsyncM::timeout(Duration::ZERO).bind(move |_| interval_from(dt, 1, n)),
        )
    }
}

fn interval_from(dt: Duration, x: usize, n: usize) -> AsyncM<Stream<usize>> {
    AsyncM::new(move |p| async move {
        if x >= n {
            return Ok(Stream::End(Some(x)));
        }
        p.checkpoint().await;
        Ok(Stream::Next(
            Some(x),
            AsyncM::timeout(dt).bind(move |_| interval_from(dt, x + 1, n)),
        ))
    })
}

impl Stream<()> {
    /// A unit value every `dt`, forever.
    pub fn forever(dt: Duration) -> Self {
        AsyncM::timeout(dt).repeat_s()
    }
}
