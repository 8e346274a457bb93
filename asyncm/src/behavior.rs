//! Duration-addressed pull cursors.
//!
//! A [`Behavior`] models a continuous-time process sampled at a rate of the
//! caller's choosing: every pull asks for the value over the next `dt`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::future::Future;
use futures::future::{self, BoxFuture, FutureExt};
use time::Duration;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::{AsyncM, Progress, Signal, Stream, Value};

type Sample<T> = dyn Fn(Duration) -> BoxFuture<'static, Result<T>> + Send + Sync;

pub struct Behavior<T> {
    sample: Arc<Sample<T>>,
}

impl<T> Clone for Behavior<T> {
    fn clone(&self) -> Self {
        Self {
            sample: self.sample.clone(),
        }
    }
}

impl<T> core::fmt::Debug for Behavior<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Behavior").finish_non_exhaustive()
    }
}

impl<T: Value> Behavior<T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            sample: Arc::new(move |dt| f(dt).boxed()),
        }
    }

    /// Samples the next `dt` of the process.
    pub fn pull(&self, dt: Duration) -> BoxFuture<'static, Result<T>> {
        (self.sample)(dt)
    }

    pub fn pure(x: T) -> Self {
        Self::new(move |_| future::ready(Ok(x.clone())))
    }

    pub fn map<U, F>(&self, f: F) -> Behavior<U>
    where
        U: Value,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let this = self.clone();
        let f = Arc::new(f);
        Behavior::new(move |dt| {
            let fut = this.pull(dt);
            let f = f.clone();
            async move { fut.await.map(|x| f(x)) }
        })
    }

    /// Pulls `dt` every `delay`, as a push stream of `(dt, value)` samples.
    pub fn reactimate(&self, delay: Duration, dt: Duration) -> Stream<(Duration, T)> {
        Stream::Next(None, self.reactimate_tail(delay, dt))
    }

    fn reactimate_tail(&self, delay: Duration, dt: Duration) -> AsyncM<Stream<(Duration, T)>> {
        let this = self.clone();
        AsyncM::new(move |p: Progress| {
            let this = this.clone();
            async move {
                p.sleep(delay).await;
                p.checkpoint().await;
                let a = this.pull(dt).await?;
                Ok(Stream::Next(Some((dt, a)), this.reactimate_tail(delay, dt)))
            }
        })
    }

    /// `size` consecutive samples of `dt` per pull.
    pub fn batch(&self, dt: Duration, size: usize) -> Signal<(Duration, Vec<T>)> {
        let this = self.clone();
        Signal::new(move || {
            let this = this.clone();
            async move {
                let mut batch = Vec::with_capacity(size);
                for _ in 0..size {
                    batch.push(this.pull(dt).await?);
                }
                Ok((dt, batch))
            }
        })
    }

    /// Samples `factor` times more coarsely and repeats each value `factor`
    /// times.
    pub fn upsample(&self, factor: u32) -> Behavior<Vec<T>> {
        let this = self.clone();
        Behavior::new(move |dt| {
            let fut = this.pull(dt * factor);
            async move {
                let a = fut.await?;
                Ok(vec![a; factor as usize])
            }
        })
    }

    /// Takes `factor` samples of `dt / factor` per pull and reduces them with
    /// `summarize`. A zero factor is treated as one.
    pub fn downsample<F>(&self, factor: u32, summarize: F) -> Behavior<T>
    where
        F: Fn(&[(Duration, T)]) -> T + Send + Sync + 'static,
    {
        let this = self.clone();
        let factor = factor.max(1);
        let summarize = Arc::new(summarize);
        Behavior::new(move |dt| {
            let this = this.clone();
            let summarize = summarize.clone();
            async move {
                let dt1 = dt / factor;
                let mut samples = Vec::with_capacity(factor as usize);
                for _ in 0..factor {
                    samples.push((dt1, this.pull(dt1).await?));
                }
                Ok(summarize(&samples))
            }
        })
    }

    /// Sliding windows of `size` samples of `dt`, advancing by `stride`
    /// samples per pull.
    ///
    /// The first pull fills a whole window; each later pull drops the oldest
    /// `stride` samples and appends as many new ones. Each window is tagged
    /// with the time it advanced by, `dt * stride`.
    pub fn windowing(&self, size: usize, stride: u32, dt: Duration) -> Signal<(Duration, Vec<T>)> {
        let this = self.clone();
        let window = Arc::new(Mutex::new(VecDeque::<T>::with_capacity(size)));
        Signal::new(move || {
            let this = this.clone();
            let window = window.clone();
            async move {
                let mut window = window.lock().await;
                // a failed pull leaves the previous window in place
                let mut next = window.clone();
                if next.is_empty() {
                    for _ in 0..size {
                        next.push_back(this.pull(dt).await?);
                    }
                } else {
                    for _ in 0..stride {
                        next.push_back(this.pull(dt).await?);
                        next.pop_front();
                    }
                }
                let out = next.iter().cloned().collect();
                *window = next;
                Ok((dt * stride, out))
            }
        })
    }
}

impl<F: Value> Behavior<F> {
    /// Samples both behaviors over the same `dt` concurrently.
    pub fn apply<X, U>(&self, bx: &Behavior<X>) -> Behavior<U>
    where
        X: Value,
        U: Value,
        F: Fn(X) -> U,
    {
        let (this, bx) = (self.clone(), bx.clone());
        Behavior::new(move |dt| {
            let both = future::try_join(this.pull(dt), bx.pull(dt));
            async move { both.await.map(|(f, x)| f(x)) }
        })
    }
}
