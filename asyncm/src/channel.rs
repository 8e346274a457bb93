//! Unbounded FIFO hand-off between producers and consumers.
//!
//! Writers never wait. A write goes straight to the oldest pending reader if
//! there is one, otherwise it is buffered. Nothing is ever dropped or
//! duplicated, so a slow reader means an ever-growing buffer; set
//! [`Config::channel_high_water`] to get a warning when that happens.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::num::NonZeroUsize;
use tokio::sync::oneshot;

use crate::emitter::recv;
use crate::{AsyncM, Config, Value};

struct State<T> {
    data: VecDeque<T>,
    readers: VecDeque<oneshot::Sender<T>>,
}

/// Cloning a `Channel` yields another handle on the same queue.
pub struct Channel<T> {
    state: Arc<spin::Mutex<State<T>>>,
    high_water: Option<NonZeroUsize>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            high_water: self.high_water,
        }
    }
}

impl<T> core::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("buffered", &state.data.len())
            .field("readers", &state.readers.len())
            .finish()
    }
}

impl<T: Value> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value> Channel<T> {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(State {
                data: VecDeque::new(),
                readers: VecDeque::new(),
            })),
            high_water: config.channel_high_water,
        }
    }

    /// Hands `x` to the oldest pending reader, or buffers it.
    pub fn write(&self, mut x: T) {
        loop {
            let reader = {
                let mut state = self.state.lock();
                match state.readers.pop_front() {
                    Some(k) => k,
                    None => {
                        state.data.push_back(x);
                        if let Some(limit) = self.high_water {
                            if state.data.len() == limit.get() {
                                tracing::warn!(
                                    limit = limit.get(),
                                    "Channel buffer reached its high-water mark"
                                );
                            }
                        }
                        return;
                    }
                }
            };

            // A reader whose future was dropped hands the value back; try the next one
            match reader.send(x) {
                Ok(()) => return,
                Err(v) => x = v,
            }
        }
    }

    pub(crate) async fn recv(&self) -> T {
        let rx = {
            let mut state = self.state.lock();
            if let Some(x) = state.data.pop_front() {
                return x;
            }
            let (tx, rx) = oneshot::channel();
            state.readers.push_back(tx);
            rx
        };
        recv(rx).await
    }

    /// Takes the oldest buffered value, or queues for the next write.
    pub fn read(&self) -> AsyncM<T> {
        let this = self.clone();
        AsyncM::new(move |_| {
            let this = this.clone();
            async move { Ok(this.recv().await) }
        })
    }

    /// Number of values written but not yet read.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }
}
