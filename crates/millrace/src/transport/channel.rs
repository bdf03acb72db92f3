//! An in-memory transport backed by a bounded tokio channel.
//!
//! Useful for tests, benches, and single-process deployments. It honors the
//! full [`Transport`] contract: settlement is idempotent, `nack(requeue =
//! true)` redelivers ahead of fresh messages, and dropping the [`Producer`]
//! ends the stream so `pull_next` returns `Ok(None)` once everything pending
//! has been served.

use super::Transport;
use crate::error::{Error, Result};
use crate::request::{AckHandle, Delivery, Request};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, mpsc};

/// Feeds requests into a [`ChannelTransport`].
///
/// Cloneable; the transport's stream ends once every clone has been dropped.
#[derive(Clone)]
pub struct Producer<R> {
    tx: mpsc::Sender<R>,
}

impl<R: Request> Producer<R> {
    /// Enqueues one request, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the transport has been dropped.
    pub async fn send(&self, request: R) -> Result<()> {
        self.tx.send(request).await.map_err(|_| Error::Channel {
            context: "channel transport receiver dropped".to_string(),
        })
    }
}

/// In-memory [`Transport`] implementation.
///
/// Requests are `Clone` because an unsettled delivery is retained until it is
/// acked or nacked, so a `nack(requeue = true)` can hand the same request out
/// again. This is the engine's at-least-once contract in miniature.
pub struct ChannelTransport<R> {
    rx: tokio::sync::Mutex<mpsc::Receiver<R>>,
    redeliver: parking_lot::Mutex<VecDeque<R>>,
    pending: parking_lot::Mutex<HashMap<u64, R>>,
    requeued: Notify,
    next_tag: AtomicU64,
}

impl<R: Request + Clone> ChannelTransport<R> {
    /// Creates a transport with the given channel capacity and its producer
    /// handle.
    pub fn bounded(capacity: usize) -> (Producer<R>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let transport = Self {
            rx: tokio::sync::Mutex::new(rx),
            redeliver: parking_lot::Mutex::new(VecDeque::new()),
            pending: parking_lot::Mutex::new(HashMap::new()),
            requeued: Notify::new(),
            next_tag: AtomicU64::new(0),
        };
        (Producer { tx }, transport)
    }

    /// Number of deliveries handed out but not yet settled.
    pub fn unsettled(&self) -> usize {
        self.pending.lock().len()
    }

    fn lease(&self, request: R) -> Delivery<R> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.lock().insert(tag, request.clone());
        Delivery::new(request, AckHandle::new(tag))
    }

    fn pop_redelivery(&self) -> Option<R> {
        self.redeliver.lock().pop_front()
    }
}

impl<R: Request + Clone> Transport for ChannelTransport<R> {
    type Request = R;

    async fn pull_next(&self) -> Result<Option<Delivery<R>>> {
        loop {
            if let Some(request) = self.pop_redelivery() {
                return Ok(Some(self.lease(request)));
            }

            let mut rx = self.rx.lock().await;
            // Re-check under the receiver lock: a nack may have raced us.
            if let Some(request) = self.pop_redelivery() {
                return Ok(Some(self.lease(request)));
            }

            tokio::select! {
                message = rx.recv() => match message {
                    Some(request) => return Ok(Some(self.lease(request))),
                    None => {
                        // Producers are gone; serve remaining redeliveries,
                        // then report the stream as stopped.
                        return match self.pop_redelivery() {
                            Some(request) => Ok(Some(self.lease(request))),
                            None => Ok(None),
                        };
                    }
                },
                () = self.requeued.notified() => continue,
            }
        }
    }

    async fn ack(&self, handle: AckHandle) -> Result<()> {
        // Idempotent: a second ack finds nothing pending and is a no-op.
        self.pending.lock().remove(&handle.tag());
        Ok(())
    }

    async fn nack(&self, handle: AckHandle, requeue: bool) -> Result<()> {
        let request = self.pending.lock().remove(&handle.tag());
        if let Some(request) = request {
            if requeue {
                self.redeliver.lock().push_back(request);
                self.requeued.notify_one();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Ping(u64);

    impl Request for Ping {
        fn request_id(&self) -> u64 {
            self.0
        }

        fn locale(&self) -> &str {
            "en-US"
        }
    }

    #[tokio::test]
    async fn delivers_in_send_order() {
        let (producer, transport) = ChannelTransport::bounded(8);
        producer.send(Ping(1)).await.unwrap();
        producer.send(Ping(2)).await.unwrap();

        let first = transport.pull_next().await.unwrap().unwrap();
        let second = transport.pull_next().await.unwrap().unwrap();
        assert_eq!(first.request.0, 1);
        assert_eq!(second.request.0, 2);
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let (producer, transport) = ChannelTransport::bounded(8);
        producer.send(Ping(1)).await.unwrap();

        let delivery = transport.pull_next().await.unwrap().unwrap();
        transport.ack(delivery.handle).await.unwrap();
        transport.ack(delivery.handle).await.unwrap();
        assert_eq!(transport.unsettled(), 0);
    }

    #[tokio::test]
    async fn nack_after_ack_is_a_noop() {
        let (producer, transport) = ChannelTransport::bounded(8);
        producer.send(Ping(1)).await.unwrap();

        let delivery = transport.pull_next().await.unwrap().unwrap();
        transport.ack(delivery.handle).await.unwrap();
        transport.nack(delivery.handle, true).await.unwrap();

        // No redelivery: the request was already settled.
        drop(producer);
        assert!(transport.pull_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_before_fresh_messages() {
        let (producer, transport) = ChannelTransport::bounded(8);
        producer.send(Ping(1)).await.unwrap();
        producer.send(Ping(2)).await.unwrap();

        let first = transport.pull_next().await.unwrap().unwrap();
        transport.nack(first.handle, true).await.unwrap();

        let redelivered = transport.pull_next().await.unwrap().unwrap();
        assert_eq!(redelivered.request.0, 1);
        let next = transport.pull_next().await.unwrap().unwrap();
        assert_eq!(next.request.0, 2);
    }

    #[tokio::test]
    async fn nack_without_requeue_drops_the_request() {
        let (producer, transport) = ChannelTransport::bounded(8);
        producer.send(Ping(1)).await.unwrap();

        let delivery = transport.pull_next().await.unwrap().unwrap();
        transport.nack(delivery.handle, false).await.unwrap();

        drop(producer);
        assert!(transport.pull_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_producer_ends_the_stream() {
        let (producer, transport) = ChannelTransport::<Ping>::bounded(8);
        drop(producer);
        assert!(transport.pull_next().await.unwrap().is_none());
    }
}
