//! Pull cursors.
//!
//! A [`Signal`] is consumed by pulling: every [`pull`](Signal::pull) produces
//! the next value. Cursors carry state, so one signal should be pulled by one
//! consumer at a time; concurrent pulls are serialized but interleave their
//! values.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;
use futures::future::{self, BoxFuture, FutureExt};
use time::Duration;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::{AsyncM, Behavior, Progress, Stream, Value};

type Pull<T> = dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync;

/// A reusable cursor yielding the next value on every pull.
pub struct Signal<T> {
    pull: Arc<Pull<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            pull: self.pull.clone(),
        }
    }
}

impl<T> core::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signal").finish_non_exhaustive()
    }
}

impl<T: Value> Signal<T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            pull: Arc::new(move || f().boxed()),
        }
    }

    /// Produces the next value.
    pub fn pull(&self) -> BoxFuture<'static, Result<T>> {
        (self.pull)()
    }

    /// Yields `x` on every pull.
    pub fn pure(x: T) -> Self {
        Self::new(move || future::ready(Ok(x.clone())))
    }

    pub fn map<U, F>(&self, f: F) -> Signal<U>
    where
        U: Value,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Signal::new(move || {
            let fut = this.pull();
            let f = f.clone();
            async move { fut.await.map(|x| f(x)) }
        })
    }

    /// Pulls every `delay`, as a push stream.
    ///
    /// Liveness is checked before each pull.
    pub fn reactimate(&self, delay: Duration) -> Stream<T> {
        Stream::Next(None, self.reactimate_tail(delay))
    }

    fn reactimate_tail(&self, delay: Duration) -> AsyncM<Stream<T>> {
        let this = self.clone();
        AsyncM::new(move |p: Progress| {
            let this = this.clone();
            async move {
                p.sleep(delay).await;
                p.checkpoint().await;
                let a = this.pull().await?;
                Ok(Stream::Next(Some(a), this.reactimate_tail(delay)))
            }
        })
    }
}

impl<F: Value> Signal<F> {
    /// Pulls both cursors concurrently and applies one to the other.
    pub fn apply<X, U>(&self, gx: &Signal<X>) -> Signal<U>
    where
        X: Value,
        U: Value,
        F: Fn(X) -> U,
    {
        let (this, gx) = (self.clone(), gx.clone());
        Signal::new(move || {
            let both = future::try_join(this.pull(), gx.pull());
            async move { both.await.map(|(f, x)| f(x)) }
        })
    }
}

impl<T: Value> Signal<(Duration, T)> {
    /// Turns timed samples into a [`Behavior`] addressable by duration.
    ///
    /// A pull for `dt` consumes samples until their durations cover `dt`,
    /// splitting the last one and keeping its remainder for the next pull.
    /// A pull covered by a single sample yields that sample's value; longer
    /// runs are reduced with `summarize`.
    pub fn stepper<F>(&self, summarize: F) -> Behavior<T>
    where
        F: Fn(&[(Duration, T)]) -> T + Send + Sync + 'static,
    {
        let this = self.clone();
        let buffered = Arc::new(Mutex::new(VecDeque::<(Duration, T)>::new()));
        let summarize = Arc::new(summarize);
        Behavior::new(move |dt: Duration| {
            let this = this.clone();
            let buffered = buffered.clone();
            let summarize = summarize.clone();
            async move {
                let mut buffered = buffered.lock().await;
                let mut samples = Vec::new();
                let mut covered = Duration::ZERO;
                while covered < dt || samples.is_empty() {
                    let sample = match buffered.pop_front() {
                        Some(sample) => sample,
                        None => match this.pull().await {
                            Ok(sample) => sample,
                            Err(e) => {
                                // hand the consumed samples to the next pull
                                for sample in samples.into_iter().rev() {
                                    buffered.push_front(sample);
                                }
                                return Err(e);
                            }
                        },
                    };
                    covered += sample.0;
                    samples.push(sample);
                }

                if covered > dt {
                    if let Some((dt1, a)) = samples.last_mut() {
                        let over = covered - dt;
                        *dt1 -= over;
                        buffered.push_front((over, a.clone()));
                    }
                }

                Ok(match samples.as_slice() {
                    [(_, only)] => only.clone(),
                    _ => summarize(&samples),
                })
            }
        })
    }
}

impl<T: Value> Signal<(Duration, Vec<T>)> {
    /// Hands out a batch one element per pull, fetching the next batch once
    /// the current one is used up.
    pub fn unbatch(&self) -> Signal<(Duration, T)> {
        let this = self.clone();
        let pending = Arc::new(Mutex::new(None::<(Duration, VecDeque<T>)>));
        Signal::new(move || {
            let this = this.clone();
            let pending = pending.clone();
            async move {
                let mut pending = pending.lock().await;
                loop {
                    if let Some((dt, batch)) = pending.as_mut() {
                        if let Some(a) = batch.pop_front() {
                            let sample = (*dt, a);
                            if batch.is_empty() {
                                *pending = None;
                            }
                            return Ok(sample);
                        }
                    }
                    let (dt, batch) = this.pull().await?;
                    *pending = Some((dt, batch.into()));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    /// Pulls values from a fixed list, then fails.
    fn from_list<T: Value>(xs: Vec<T>) -> Signal<T> {
        let xs = Arc::new(std::sync::Mutex::new(VecDeque::from(xs)));
        Signal::new(move || {
            let x = xs.lock().unwrap().pop_front();
            future::ready(x.ok_or_else(|| Error::msg("exhausted")))
        })
    }

    fn average(samples: &[(Duration, f64)]) -> f64 {
        let (t, sum) = samples
            .iter()
            .fold((0.0, 0.0), |(t, sum), (dt, a)| {
                let dt = dt.whole_milliseconds() as f64;
                (t + dt, sum + a * dt)
            });
        sum / t
    }

    #[tokio::test]
    async fn pure_map_apply() {
        let g = Signal::pure(2).map(|x| x * 21);
        assert_eq!(g.pull().await.unwrap(), 42);

        let sum = Signal::pure(|(x, y): (i32, i32)| x + y).apply(&from_list(vec![(1, 2), (3, 4)]));
        assert_eq!(sum.pull().await.unwrap(), 3);
        assert_eq!(sum.pull().await.unwrap(), 7);
        assert!(sum.pull().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reactimate_pulls_with_a_delay() {
        let g = from_list(vec![1, 2, 3]);
        let start = tokio::time::Instant::now();
        let xs = g
            .reactimate(ms(20))
            .take(3)
            .collect()
            .run(Progress::root())
            .await
            .unwrap();
        assert_eq!(xs, vec![1, 2, 3]);
        assert_eq!(start.elapsed(), std::time::Duration::from_millis(60));
    }

    #[tokio::test]
    async fn stepper_splits_and_carries_samples() {
        let events = from_list(vec![(ms(50), 1.0), (ms(50), 3.0), (ms(50), 5.0)]);
        let b = events.stepper(average);

        // one sample covers the whole pull
        assert_eq!(b.pull(ms(40)).await.unwrap(), 1.0);
        // 10ms left over from the first sample, then 30ms of the second
        assert_eq!(b.pull(ms(40)).await.unwrap(), 2.5);
        // exactly the 20ms remaining
        assert_eq!(b.pull(ms(20)).await.unwrap(), 3.0);
        assert_eq!(b.pull(ms(50)).await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn stepper_keeps_samples_across_a_failed_pull() {
        let events = Signal::new({
            let script = Arc::new(std::sync::Mutex::new(VecDeque::from(vec![
                Ok((ms(50), 1.0)),
                Err(Error::msg("link down")),
                Ok((ms(50), 3.0)),
            ])));
            move || {
                let next = script.lock().unwrap().pop_front();
                future::ready(next.unwrap_or_else(|| Err(Error::msg("exhausted"))))
            }
        });
        let b = events.stepper(average);

        assert_eq!(b.pull(ms(40)).await.unwrap(), 1.0);
        assert!(b.pull(ms(40)).await.is_err());
        // the 10ms left of the first sample is still there
        assert_eq!(b.pull(ms(40)).await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn unbatch_drains_one_per_pull() {
        let batches = from_list(vec![(ms(10), vec![1, 2]), (ms(20), vec![]), (ms(30), vec![3])]);
        let g = batches.unbatch();
        assert_eq!(g.pull().await.unwrap(), (ms(10), 1));
        assert_eq!(g.pull().await.unwrap(), (ms(10), 2));
        assert_eq!(g.pull().await.unwrap(), (ms(30), 3));
        assert!(g.pull().await.is_err());
    }
}
