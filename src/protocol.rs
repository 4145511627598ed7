// ABOUTME: The dispatching protocol: classifies inbound frames and lets two independent
// ABOUTME: waiters (the connection runner and an outstanding call) each wait for their own types

use bytes::Bytes;
use std::sync::Mutex;

use crate::error::{RpcError, RpcResult};
use crate::header::{MessageType, QueuedMessage};
use crate::queue::MessageQueue;
use crate::transport::FrameTransport;

/// `DispatchingProtocol` of Section 4.3. Wraps a [`FrameTransport`] with the
/// classified [`MessageQueue`] and the `wait_for_message` algorithm that lets
/// a server-loop waiter and a stub-call waiter share one connection without
/// either one stealing frames meant for the other (I1, I2, P1, P2, P3).
pub struct DispatchingProtocol {
    transport: std::sync::Arc<FrameTransport>,
    queue: Mutex<MessageQueue>,
}

impl DispatchingProtocol {
    pub fn new(transport: std::sync::Arc<FrameTransport>) -> Self {
        Self {
            transport,
            queue: Mutex::new(MessageQueue::new()),
        }
    }

    pub fn transport(&self) -> &std::sync::Arc<FrameTransport> {
        &self.transport
    }

    /// Drains every frame currently sitting in the transport's receive queue
    /// into the classified [`MessageQueue`]. Called by whichever waiter wakes
    /// first, so that a frame is never left unclassified for a type no
    /// currently-parked waiter asked for.
    fn drain_transport_into_queue(&self) -> RpcResult<()> {
        let mut queue = self.queue.lock().unwrap();
        while let Some(frame) = self.transport.try_next_frame() {
            queue.add(frame)?;
        }
        Ok(())
    }

    /// Waits until a message whose type is in `types` is available, draining
    /// whatever the transport has buffered first. Two concurrent callers with
    /// disjoint `types` sets each get their own message without blocking on
    /// each other (P3): the drain is unconditional on every wakeup, so a
    /// CALL sitting behind a REPLY for a different waiter is still queued for
    /// a later `get` instead of being skipped.
    ///
    /// The `Notified` future is created before the first drain+check so that
    /// a `push_frame` racing with this call is never missed: `Notify`'s
    /// contract guarantees a `notify_waiters()` issued any time after
    /// `subscribe()` was called, even before this future is polled, still
    /// wakes it.
    pub async fn wait_for_message(&self, types: &[MessageType]) -> RpcResult<QueuedMessage> {
        loop {
            let notified = self.transport.subscribe();

            self.drain_transport_into_queue()?;
            if let Some(msg) = self.queue.lock().unwrap().get(types) {
                return Ok(msg);
            }

            if !self.transport.is_open() {
                return Err(RpcError::ConnectionClosed);
            }

            notified.await;

            if !self.transport.is_open() {
                // The close may itself be what woke us; make one last
                // attempt to drain so a frame that arrived just before the
                // close still reaches its waiter.
                self.drain_transport_into_queue()?;
                if let Some(msg) = self.queue.lock().unwrap().get(types) {
                    return Ok(msg);
                }
                return Err(RpcError::ConnectionClosed);
            }
        }
    }

    /// Pushes a raw, already-received frame straight into the classified
    /// queue without going through the transport's notify path. Used by
    /// tests that want to seed the queue directly.
    #[cfg(test)]
    fn seed(&self, frame: Bytes) -> RpcResult<()> {
        self.queue.lock().unwrap().add(frame)
    }
}
