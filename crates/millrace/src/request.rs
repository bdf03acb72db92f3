//! The request contract shared by transports, the dispatcher, and workers.
//!
//! A [`Request`] is one immutable unit of work. The engine never inspects the
//! payload; it only needs an identity, a locale tag, and optional tenancy
//! labels for observability. Transports mint a [`Delivery`] per wire message,
//! pairing the decoded request with an opaque [`AckHandle`] that the
//! dispatcher later settles.

/// A minimal capability interface for units of work processed by the engine.
///
/// Identity is an opaque `u64`, unique within a processing run (uniqueness
/// across restarts is the transport's concern). The locale tag affects the
/// formatting of messages produced *during* processing, never the processing
/// logic itself.
pub trait Request: Send + 'static {
    /// Unique id of this request within the current processing run.
    fn request_id(&self) -> u64;

    /// BCP 47-style locale tag used when formatting localized output.
    fn locale(&self) -> &str;

    /// Partition/tenant labels used for observability and fairness. The
    /// default is the zero partition for deployments without tenancy.
    fn tags(&self) -> RequestTags {
        RequestTags::default()
    }
}

/// Owning partition/tenant identifiers attached to a request.
///
/// These are carried into the in-flight map so operators can see which tenant
/// a stuck request belongs to. They never influence scheduling order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestTags {
    pub project_id: u64,
    pub client_id: u64,
}

/// An opaque settlement token minted by a transport, one per delivery.
///
/// Handles are settled exactly once by the dispatcher (ack on success, nack
/// otherwise). Settling an already-settled handle is a no-op by contract;
/// transports must tolerate it without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AckHandle(u64);

impl AckHandle {
    pub const fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub const fn tag(&self) -> u64 {
        self.0
    }
}

/// One decoded wire message: the request plus its settlement handle.
#[derive(Debug)]
pub struct Delivery<R> {
    pub request: R,
    pub handle: AckHandle,
}

impl<R> Delivery<R> {
    pub const fn new(request: R, handle: AckHandle) -> Self {
        Self { request, handle }
    }
}
