//! A broadcast point that remembers its latest value.
//!
//! `emit` wakes every listener registered before it, in registration order.
//! Listeners registered afterwards wait for the next emission.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use tokio::sync::oneshot;

use crate::stream::Stream;
use crate::{AsyncM, Config, Value};

struct State<T> {
    now: Option<T>,
    listeners: Vec<oneshot::Sender<T>>,
    waiter: Option<oneshot::Sender<T>>,
}

/// Shared hand-off point: one value cached, many one-shot listeners.
///
/// Cloning an `Emitter` yields another handle on the same state.
pub struct Emitter<T> {
    state: Arc<spin::Mutex<State<T>>>,
    high_water: Option<NonZeroUsize>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            high_water: self.high_water,
        }
    }
}

impl<T> core::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Emitter")
            .field("has_value", &state.now.is_some())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T: Value> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parks forever if the sending half went away.
pub(crate) async fn recv<T>(rx: oneshot::Receiver<T>) -> T {
    match rx.await {
        Ok(x) => x,
        Err(_) => futures::future::pending().await,
    }
}

impl<T: Value> Emitter<T> {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(State {
                now: None,
                listeners: Vec::new(),
                waiter: None,
            })),
            high_water: config.emitter_high_water,
        }
    }

    /// Stores `x` as the latest value and wakes every pending listener.
    pub fn emit(&self, x: T) {
        let (listeners, waiter) = {
            let mut state = self.state.lock();
            state.now = Some(x.clone());
            (core::mem::take(&mut state.listeners), state.waiter.take())
        };

        tracing::trace!(listeners = listeners.len(), "emit");

        for k in listeners.into_iter().chain(waiter) {
            // a listener whose future was dropped simply misses the value
            _ = k.send(x.clone());
        }
    }

    /// The most recently emitted value, if any.
    pub fn now(&self) -> Option<T> {
        self.state.lock().now.clone()
    }

    fn push_listener(&self, k: oneshot::Sender<T>) {
        let mut state = self.state.lock();
        self.enqueue(&mut state, k);
    }

    /// Queues `k` behind the listeners whose receivers are still around.
    fn enqueue(&self, state: &mut State<T>, k: oneshot::Sender<T>) {
        state.listeners.retain(|l| !l.is_closed());
        state.listeners.push(k);
        if let Some(limit) = self.high_water {
            if state.listeners.len() == limit.get() {
                tracing::warn!(
                    limit = limit.get(),
                    "Emitter listener queue reached its high-water mark"
                );
            }
        }
    }

    pub(crate) async fn next_value(&self) -> T {
        let (tx, rx) = oneshot::channel();
        self.push_listener(tx);
        recv(rx).await
    }

    pub(crate) async fn cached_or_wait(&self) -> T {
        let rx = {
            let mut state = self.state.lock();
            if let Some(x) = &state.now {
                return x.clone();
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };
        recv(rx).await
    }

    pub(crate) async fn cached_or_next(&self) -> T {
        let rx = {
            let mut state = self.state.lock();
            if let Some(x) = &state.now {
                return x.clone();
            }
            let (tx, rx) = oneshot::channel();
            self.enqueue(&mut state, tx);
            rx
        };
        recv(rx).await
    }

    /// Waits for the next emission after the computation starts.
    pub fn listen(&self) -> AsyncM<T> {
        let this = self.clone();
        AsyncM::new(move |_| {
            let this = this.clone();
            async move { Ok(this.next_value().await) }
        })
    }

    /// The cached value if one exists, otherwise the next emission.
    ///
    /// Only one `wait` can be pending at a time: registering a new one
    /// silently replaces the previous waiter, which then never resolves.
    pub fn wait(&self) -> AsyncM<T> {
        let this = self.clone();
        AsyncM::new(move |_| {
            let this = this.clone();
            async move { Ok(this.cached_or_wait().await) }
        })
    }

    /// Like [`wait`](Emitter::wait), but every caller is queued and none is
    /// ever displaced.
    pub fn latest(&self) -> AsyncM<T> {
        let this = self.clone();
        AsyncM::new(move |_| {
            let this = this.clone();
            async move { Ok(this.cached_or_next().await) }
        })
    }

    /// Future emissions as a stream, starting with a `None` tick.
    ///
    /// Values emitted before a tail is run are not replayed.
    pub fn receive(&self) -> Stream<T> {
        Stream::Next(None, self.receive_tail())
    }

    fn receive_tail(&self) -> AsyncM<Stream<T>> {
        let this = self.clone();
        AsyncM::new(move |p| {
            let this = this.clone();
            async move {
                let a = this.next_value().await;
                p.checkpoint().await;
                Ok(Stream::Next(Some(a), this.receive_tail()))
            }
        })
    }
}
