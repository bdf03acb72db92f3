//! The transport boundary: pull requests in, push acknowledgments out.
//!
//! Any broker (message queue, log-based stream, polling database table)
//! plugs into the engine by implementing [`Transport`]. The adapter owns wire
//! decoding, connection management, and reconnection, and translates its
//! delivery semantics into the engine's at-least-once contract. The
//! dispatcher never sees transport-specific metadata.

mod channel;

pub use channel::{ChannelTransport, Producer};

use crate::error::Result;
use crate::request::{AckHandle, Delivery, Request};

/// A source of requests and a sink for their acknowledgments.
///
/// Connections may be shared across worker tasks only if the underlying
/// client is safe for concurrent use; otherwise the adapter must pool
/// connections sized to the dispatcher's pool.
pub trait Transport: Send + Sync + 'static {
    type Request: Request;

    /// Waits for the next wire message and decodes it into a [`Delivery`].
    ///
    /// Returns `Ok(None)` once the source has stopped for good; the pull loop
    /// then exits cleanly. The returned future must be cancel-safe: the
    /// dispatcher may drop it when a worker slot frees up first or at a
    /// shutdown boundary, and no delivery may be lost as a result.
    ///
    /// # Errors
    ///
    /// Transient failures (connection loss, decode errors) are returned as
    /// [`Error::Transport`] and retried by the dispatcher with bounded
    /// exponential backoff.
    ///
    /// [`Error::Transport`]: crate::Error::Transport
    fn pull_next(&self) -> impl Future<Output = Result<Option<Delivery<Self::Request>>>> + Send;

    /// Marks a delivery as successfully processed.
    ///
    /// Acking an already-settled handle is a no-op, never an error.
    fn ack(&self, handle: AckHandle) -> impl Future<Output = Result<()>> + Send;

    /// Marks a delivery as not processed. With `requeue`, the transport
    /// redelivers it; without, the transport applies its dead-letter policy.
    ///
    /// Nacking an already-settled handle is a no-op, never an error.
    fn nack(&self, handle: AckHandle, requeue: bool) -> impl Future<Output = Result<()>> + Send;
}
