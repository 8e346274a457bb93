//! Sharing one live stream, and turning requests into responses.

use alloc::boxed::Box;
use alloc::sync::Arc;
use time::Duration;

use super::Stream;
use crate::channel::Channel;
use crate::emitter::Emitter;
use crate::spawn::spawn;
use crate::{AsyncM, Progress, Signal, Value};

impl<T: Value> Stream<T> {
    /// Starts the stream in a forked scope, feeding every value into a
    /// fresh [`Emitter`].
    ///
    /// Yields the emitter and the forked scope; cancel the scope to stop the
    /// producer.
    pub fn broadcast(&self) -> AsyncM<(Emitter<T>, Progress)> {
        let this = self.clone();
        AsyncM::new(move |p: Progress| {
            let this = this.clone();
            async move {
                let e = Emitter::with_config(p.config());
                let sink = e.clone();
                let producer = this.run(move |x| sink.emit(x)).fork().run(p).await?;
                Ok((e, producer))
            }
        })
    }

    /// A single event carrying a subscribable view of the live stream and
    /// the scope of its producer.
    ///
    /// Every run of the view subscribes afresh and sees only what is emitted
    /// from then on.
    pub fn multicast_with_progress(&self) -> Stream<(Stream<T>, Progress)> {
        Stream::Next(
            None,
            self.broadcast()
                .map(|(e, producer)| Stream::pure((e.receive(), producer))),
        )
    }

    pub fn multicast(&self) -> Stream<Stream<T>> {
        self.multicast_with_progress().map(|(s, _)| s)
    }

    /// Runs the stream in a forked scope into a [`Channel`], and yields a
    /// [`Signal`] reading it one value per pull.
    ///
    /// Nothing is lost: values pile up in the channel while nobody pulls.
    pub fn push2pull(&self) -> AsyncM<Signal<T>> {
        let this = self.clone();
        AsyncM::new(move |p: Progress| {
            let this = this.clone();
            async move {
                let c = Channel::with_config(p.config());
                let sink = c.clone();
                this.run(move |x| sink.write(x)).fork().run(p).await?;
                Ok(Signal::new(move || {
                    let c = c.clone();
                    async move { Ok(c.recv().await) }
                }))
            }
        })
    }
}

impl<T: Value> Stream<AsyncM<T>> {
    /// Runs every request concurrently as it arrives and emits the responses
    /// in the order they complete.
    ///
    /// A failed request fails the response stream at the point its failure
    /// is read.
    pub fn fetch(&self) -> Stream<T> {
        let this = self.clone();
        Stream::Next(
            None,
            AsyncM::new(move |p: Progress| {
                let this = this.clone();
                async move {
                    let responses = Channel::with_config(p.config());
                    let sink = responses.clone();
                    let requests = p.clone();
                    this.run(move |request| {
                        let fut = request.run(requests.clone());
                        let sink = sink.clone();
                        spawn!(requests.tasks(), "fetch_request", async move {
                            sink.write(fut.await)
                        });
                    })
                    .fork()
                    .run(p.clone())
                    .await?;

                    let read = AsyncM::new(move |_| {
                        let c = responses.clone();
                        async move { c.recv().await }
                    });
                    read.repeat().run(p).await
                }
            }),
        )
    }

    /// [`fetch`](Stream::fetch), read through a [`Signal`].
    pub fn fetch_signal(&self) -> AsyncM<Signal<T>> {
        self.fetch().push2pull()
    }
}

/// Everything [`Stream::control`] needs to restart a request stream.
struct RateController<T> {
    requests: Box<dyn Fn(Duration) -> Stream<AsyncM<T>> + Send + Sync>,
    adjust: Box<dyn Fn(bool, Duration) -> Duration + Send + Sync>,
    window: Duration,
}

impl<T: Value> Stream<(Duration, T)> {
    /// Issues `f(dt)` every `delay` and emits the responses tagged with `dt`.
    pub fn request<F>(f: F, dt: Duration, delay: Duration) -> Self
    where
        F: Fn(Duration) -> AsyncM<T> + Send + Sync + 'static,
    {
        Stream::forever(delay)
            .map(move |_| f(dt))
            .fetch()
            .map(move |x| (dt, x))
    }

    /// Requests with sampling period `dt` and adapts the period whenever the
    /// responses stop keeping up with the requests.
    ///
    /// Every `window`, the responses and requests seen over the following
    /// window are counted. While they match, nothing changes. Otherwise both
    /// running streams are cancelled and requesting restarts with
    /// `adjust(responses < requests, dt)`.
    pub fn control<R, A>(requests: R, window: Duration, dt: Duration, adjust: A) -> Self
    where
        R: Fn(Duration) -> Stream<AsyncM<T>> + Send + Sync + 'static,
        A: Fn(bool, Duration) -> Duration + Send + Sync + 'static,
    {
        let ctl = Arc::new(RateController {
            requests: Box::new(requests),
            adjust: Box::new(adjust),
            window,
        });
        control_round(ctl, dt).join()
    }

    /// Runs `requests(dt)` through [`fetch`](Stream::fetch), read through a
    /// [`Signal`] of `(dt, response)` samples.
    pub fn fetch_event<R>(requests: R, dt: Duration) -> AsyncM<Signal<(Duration, T)>>
    where
        R: Fn(Duration) -> Stream<AsyncM<T>>,
    {
        requests(dt).fetch().map(move |x| (dt, x)).push2pull()
    }
}

/// One sampling period: a response stream, followed by the next round once
/// the monitor decides to adjust.
fn control_round<T: Value>(
    ctl: Arc<RateController<T>>,
    dt: Duration,
) -> Stream<Stream<(Duration, T)>> {
    (ctl.requests)(dt)
        .multicast_with_progress()
        .bind(move |(requests, p1)| {
            let ctl = ctl.clone();
            requests
                .fetch()
                .multicast_with_progress()
                .bind(move |(responses, p2)| {
                    let monitor = monitor(
                        ctl.clone(),
                        dt,
                        requests.clone(),
                        responses.clone(),
                        p1.clone(),
                        p2,
                    );
                    Stream::Next(Some(responses.map(move |x| (dt, x))), monitor)
                })
        })
}

fn monitor<T: Value>(
    ctl: Arc<RateController<T>>,
    dt: Duration,
    requests: Stream<AsyncM<T>>,
    responses: Stream<T>,
    p1: Progress,
    p2: Progress,
) -> AsyncM<Stream<Stream<(Duration, T)>>> {
    AsyncM::new(move |p: Progress| {
        let ctl = ctl.clone();
        let counts = AsyncM::all(&responses.count(ctl.window), &requests.count(ctl.window));
        let (p1, p2) = (p1.clone(), p2.clone());
        async move {
            loop {
                p.sleep(ctl.window).await;
                let (x, y) = counts.run(p.clone()).await?;
                if x != y {
                    let next = (ctl.adjust)(x < y, dt);
                    tracing::debug!(
                        responses = x,
                        requests = y,
                        "Adjusting sampling period from {dt} to {next}"
                    );
                    p1.cancel();
                    p2.cancel();
                    return Ok(control_round(ctl, next));
                }
            }
        }
    })
}
