//! Counting, timing and folding.
//!
//! `take` and `drop` count values only; ticks pass through uncounted.

use alloc::sync::Arc;
use core::cmp::Ordering;
use time::Duration;

use super::{Stream, first_of};
use crate::{AsyncM, Either, Progress, Value};

impl<T: Value> Stream<T> {
    /// The first `n` values, then the end.
    pub fn take(&self, n: usize) -> Stream<T> {
        if n == 0 {
            return Stream::End(None);
        }
        match self {
            Stream::End(_) => self.clone(),
            Stream::Next(a, _) if n == 1 && a.is_some() => Stream::End(a.clone()),
            Stream::Next(a, m) => {
                let n = if a.is_some() { n - 1 } else { n };
                Stream::Next(a.clone(), m.map(move |s| s.take(n)))
            }
        }
    }

    /// [`take`](Stream::take), cancelling the stream's own scope once the
    /// last value is out.
    pub fn take_scoped(&self, n: usize) -> Stream<T> {
        self.take(n).end()
    }

    /// Everything after the first `n` values.
    pub fn drop(&self, n: usize) -> Stream<T> {
        self.drop_values(n).just()
    }

    fn drop_values(&self, n: usize) -> Stream<T> {
        if n == 0 {
            return self.clone();
        }
        match self {
            Stream::End(_) => Stream::End(None),
            Stream::Next(a, m) => {
                let n = if a.is_some() { n - 1 } else { n };
                Stream::Next(None, m.map(move |s| s.drop_values(n)))
            }
        }
    }

    /// Removes every tick except a leading one.
    pub fn just(&self) -> Stream<T> {
        match self {
            Stream::End(_) => self.clone(),
            Stream::Next(a, m) => Stream::Next(a.clone(), just_tail(m.clone())),
        }
    }

    /// Runs the tails under a scope of their own and cancels that scope when
    /// the stream ends.
    pub fn end(&self) -> Stream<T> {
        match self {
            Stream::End(_) => self.clone(),
            Stream::Next(a, m) => {
                let m = m.clone();
                Stream::Next(
                    a.clone(),
                    AsyncM::new(move |p: Progress| end_tail(m.clone(), p.cons()).run(p)),
                )
            }
        }
    }

    /// Starts the stream after `dt`.
    pub fn wait(&self, dt: Duration) -> Stream<T> {
        let this = self.clone();
        Stream::Next(None, AsyncM::timeout(dt).map(move |_| this.clone()))
    }

    /// Discards the values produced during the first `dt`.
    pub fn skip(&self, dt: Duration) -> Stream<T> {
        let this = self.clone();
        Stream::Next(
            None,
            AsyncM::new(move |p: Progress| {
                let mut s = this.clone();
                async move {
                    let timer = AsyncM::timeout(dt).start(&p);
                    loop {
                        let tail = match s {
                            Stream::End(_) => return Ok(Stream::End(None)),
                            Stream::Next(_, m) => m.start(&p),
                        };
                        match first_of(&tail, &timer, &p).await? {
                            Either::Left(next) => s = next,
                            Either::Right(()) => return tail.run(p.clone()).await,
                        }
                    }
                }
            }),
        )
    }

    /// Shifts every cell `dt` later.
    pub fn delay(&self, dt: Duration) -> Stream<T> {
        Stream::Next(None, delay_cell(self.clone(), dt))
    }

    /// Ends the stream `dt` after it starts.
    pub fn stop(&self, dt: Duration) -> Stream<T> {
        match self {
            Stream::End(_) => self.clone(),
            Stream::Next(..) => self.switch(&AsyncM::timeout(dt).map(|_| Stream::End(None))),
        }
    }

    /// Follows this stream until `ms` produces a replacement.
    pub fn until(&self, ms: &AsyncM<Stream<T>>) -> Stream<T> {
        Stream::Next(Some(self.clone()), ms.map(Stream::pure)).join()
    }

    /// The latest value seen by the time `m` resolves, or by the end of the
    /// stream if that comes first.
    pub fn last<X: Value>(&self, m: &AsyncM<X>) -> AsyncM<Option<T>> {
        let this = self.clone();
        let m = m.clone();
        AsyncM::new(move |p: Progress| {
            let mut s = this.clone();
            let deadline = m.start(&p);
            async move {
                let mut latest = None;
                loop {
                    let tail = match s {
                        Stream::End(a) => return Ok(a.or(latest)),
                        Stream::Next(a, tail) => {
                            if a.is_some() {
                                latest = a;
                            }
                            tail
                        }
                    };
                    match AsyncM::any(&tail, &deadline).run(p.clone()).await? {
                        Either::Left(next) => s = next,
                        Either::Right(_) => return Ok(latest),
                    }
                }
            }
        })
    }

    /// Number of values within `dt`.
    pub fn count(&self, dt: Duration) -> AsyncM<usize> {
        self.map(|_| |c: usize| c + 1).fold(dt, 0)
    }
}

fn just_tail<T: Value>(m: AsyncM<Stream<T>>) -> AsyncM<Stream<T>> {
    AsyncM::new(move |p: Progress| {
        let m = m.clone();
        async move {
            let mut s = m.run(p.clone()).await?;
            loop {
                match s {
                    Stream::Next(None, m) => {
                        p.checkpoint().await;
                        s = m.run(p.clone()).await?;
                    }
                    Stream::Next(Some(x), m) => return Ok(Stream::Next(Some(x), just_tail(m))),
                    end @ Stream::End(_) => return Ok(end),
                }
            }
        }
    })
}

fn end_tail<T: Value>(m: AsyncM<Stream<T>>, scope: Progress) -> AsyncM<Stream<T>> {
    AsyncM::new(move |_| {
        let m = m.clone();
        let scope = scope.clone();
        async move {
            match m.run(scope.clone()).await? {
                Stream::End(a) => {
                    scope.cancel();
                    Ok(Stream::End(a))
                }
                Stream::Next(a, m) => Ok(Stream::Next(a, end_tail(m, scope))),
            }
        }
    })
}

fn delay_cell<T: Value>(s: Stream<T>, dt: Duration) -> AsyncM<Stream<T>> {
    AsyncM::timeout(dt).map(move |_| match &s {
        Stream::End(a) => Stream::End(a.clone()),
        Stream::Next(a, m) => Stream::Next(a.clone(), m.bind(move |s| delay_cell(s, dt))),
    })
}

impl<F: Value> Stream<F> {
    /// Running left fold of a stream of functions, emitting every
    /// intermediate result. Ticks re-emit the current total.
    pub fn accumulate<A>(&self, a0: A) -> Stream<A>
    where
        A: Value,
        F: Fn(A) -> A,
    {
        let step = |a: &Option<F>| match a {
            Some(f) => f(a0.clone()),
            None => a0.clone(),
        };
        match self {
            Stream::End(a) => Stream::End(Some(step(a))),
            Stream::Next(a, m) => {
                let a1 = step(a);
                Stream::Next(Some(a1.clone()), m.map(move |s| s.accumulate(a1.clone())))
            }
        }
    }

    /// Folds the functions produced within `dt` over `seed`.
    pub fn fold<A>(&self, dt: Duration, seed: A) -> AsyncM<A>
    where
        A: Value,
        F: Fn(A) -> A,
    {
        self.accumulate(seed.clone())
            .last(&AsyncM::timeout(dt))
            .map(move |r| r.unwrap_or_else(|| seed.clone()))
    }
}

impl<X: Value> Stream<(Duration, X)> {
    /// Sample time covered per unit of wall time over the next `window`.
    pub fn speed(&self, window: Duration) -> AsyncM<f64> {
        self.map(|(dt, _)| move |t: Duration| t + dt)
            .fold(window, Duration::ZERO)
            .map(move |t| t / window)
    }

    /// Repeatedly measures [`speed`](Stream::speed) over `duration`-long
    /// windows until `f` asks for an adjustment: `Greater` means too fast and
    /// yields `true`, `Less` means too slow and yields `false`.
    pub fn speed_control<F>(&self, duration: Duration, f: F) -> AsyncM<bool>
    where
        F: Fn(f64) -> Ordering + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        AsyncM::new(move |p: Progress| {
            let this = this.clone();
            let f = f.clone();
            async move {
                loop {
                    p.sleep(duration).await;
                    let x = this.speed(duration).run(p.clone()).await?;
                    match f(x) {
                        Ordering::Equal => tracing::trace!(speed = x, "speed on target"),
                        verdict => return Ok(verdict == Ordering::Greater),
                    }
                }
            }
        })
    }
}
