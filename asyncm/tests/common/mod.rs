#![allow(dead_code)]

use std::sync::Once;

use time::Duration;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn ms(n: i64) -> Duration {
    Duration::milliseconds(n)
}

/// True if `f` is still pending once `wait` has elapsed on the test clock.
pub async fn never_resolves<F: core::future::Future>(f: F, wait: Duration) -> bool {
    let wait = std::time::Duration::from_millis(wait.whole_milliseconds() as u64);
    tokio::time::timeout(wait, f).await.is_err()
}
