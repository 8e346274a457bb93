//! Timer service used by every time-driven operation.
//!
//! The core never talks to a clock directly; it asks the [`Timer`] carried by
//! the Progress tree it runs under to resolve after a delay. [`TokioTimer`] is
//! the default and wraps `tokio::time`.
//!
//! # Example
//!
//! ```no_run
//! use asyncm::timer::sleep;
//! use time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! sleep(Duration::milliseconds(100)).await;
//!
//! // Negative durations return immediately
//! sleep(Duration::seconds(-1)).await;
//! # });
//! ```

use async_trait::async_trait;
use time::Duration;

/// An external service that resolves after a requested delay.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by the tokio runtime clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        sleep(duration).await
    }
}

/// Sleeps for the specified duration.
///
/// - Positive durations: sleeps for the specified time
/// - Zero or negative durations: returns immediately without sleeping
/// - Durations exceeding `std::time::Duration::MAX`: sleeps for `MAX`
pub async fn sleep(duration: Duration) {
    if !duration.is_positive() {
        return;
    }

    let std_duration: std::time::Duration = duration.try_into().unwrap_or(std::time::Duration::MAX);

    tokio::time::sleep(std_duration).await;
}
