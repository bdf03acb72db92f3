//! Error types for the request-processing engine.
//!
//! The central [`Error`] enum captures the recoverable and reportable failure
//! cases of the engine. Only configuration errors are fatal (the engine
//! refuses to start); transport errors are retried with backoff, and
//! per-request failures are isolated to the request and reported through the
//! ack/nack boundary.
//!
//! Invariant violations (duplicate in-flight ids, pool accounting underflow)
//! are deliberately *not* represented here: they panic, because continuing
//! with corrupted concurrency accounting would be worse than crashing.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch engine.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// `NodeOptions` failed startup validation. Fatal: the engine will not
    /// start with an invalid configuration.
    #[error("invalid node options: {reason}")]
    InvalidOptions { reason: String },

    /// `start()` was called while the dispatcher was already running (or
    /// after it had been shut down).
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// The transport failed to pull, ack, or nack. Pull failures are retried
    /// with bounded exponential backoff before surfacing as degraded health.
    #[error("transport error: {context}")]
    Transport { context: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("channel error: {context}")]
    Channel { context: String },
}

impl Error {
    /// Builds a [`Error::Transport`]; convenience for [`Transport`]
    /// implementations wrapping broker client errors.
    ///
    /// [`Transport`]: crate::Transport
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
        }
    }

    pub(crate) fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }
}
