use alloc::sync::Arc;
use thiserror::Error;

/// Failures surfaced by adapted external operations.
///
/// Cancellation is not an error: a cancelled computation never
/// completes, it does not fail.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("External operation failed: {0}")]
    External(Arc<dyn std::error::Error + Send + Sync>),

    #[error("External operation failed: {0}")]
    Message(Arc<str>),

    #[error("Continuation dropped without being resolved")]
    Abandoned,
}

impl Error {
    /// Wraps any error raised by an external operation.
    pub fn external<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::External(Arc::new(e))
    }

    /// An external failure that only carries a description.
    pub fn msg(msg: impl core::fmt::Display) -> Self {
        Self::Message(msg.to_string().into())
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = Error::external(std::io::Error::other("disk on fire"));
        assert_eq!(e.to_string(), "External operation failed: disk on fire");
        assert_eq!(
            Error::msg("timeout").to_string(),
            "External operation failed: timeout"
        );
    }

    #[test]
    fn clones_share_the_source() {
        let e = Error::external(std::io::Error::other("boom"));
        let c = e.clone();
        match (e, c) {
            (Error::External(a), Error::External(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("variant changed on clone"),
        }
    }
}
