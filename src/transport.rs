// ABOUTME: Bridges whole-message WebSocket payloads to an RPC-framing-aware buffer
// ABOUTME: Write-buffer-then-flush-as-one-WS-message, plus the one-shot new-frame signal

use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{RpcError, RpcResult};
use crate::ws::WsSink;

struct Inner {
    received: std::collections::VecDeque<Bytes>,
    write_buf: BytesMut,
}

/// `FrameTransport` of Section 4.1. Owns the received-frame queue, the
/// write-accumulation buffer, the outbound WebSocket sink, and the
/// open/closed lifecycle flag. Deliberately has no byte-granular `read`:
/// see Section 4.1 "Why no read(n)".
pub struct FrameTransport {
    inner: Mutex<Inner>,
    notify: Notify,
    sink: tokio::sync::Mutex<WsSink>,
    open: AtomicBool,
}

impl FrameTransport {
    pub(crate) fn new(sink: WsSink) -> Self {
        Self {
            inner: Mutex::new(Inner {
                received: std::collections::VecDeque::new(),
                write_buf: BytesMut::new(),
            }),
            notify: Notify::new(),
            sink: tokio::sync::Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    /// Appends to the write buffer. Never blocks: this is a synchronous,
    /// in-memory append guarded by an uncontended, never-held-across-await
    /// mutex.
    pub fn write(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().write_buf.extend_from_slice(bytes);
    }

    /// Emits the accumulated write buffer as one WebSocket binary message
    /// and resets the buffer. The buffer is reset *before* the send so that
    /// a failed flush never leaves a partial message lingering for the next
    /// caller to accidentally prepend to (I3).
    pub async fn flush(&self) -> RpcResult<()> {
        let payload = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.write_buf)
        };
        if payload.is_empty() {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(payload.to_vec())).await?;
        Ok(())
    }

    /// Non-blocking: returns the oldest unconsumed frame, if any.
    pub(crate) fn try_next_frame(&self) -> Option<Bytes> {
        self.inner.lock().unwrap().received.pop_front()
    }

    /// Called by the WebSocket protocol adapter's read pump for every
    /// inbound message (the `onMessage` callback of the original design).
    pub(crate) fn push_frame(&self, frame: Bytes) {
        self.inner.lock().unwrap().received.push_back(frame);
        self.notify.notify_waiters();
    }

    /// Registers interest in the next `push_frame`/`close` before the
    /// caller re-checks its own condition, so that a frame arriving between
    /// the check and the await is never missed (`tokio::sync::Notify`'s
    /// documented race-free pattern: the `Notified` future must be created
    /// before the state it watches is re-read).
    pub(crate) fn subscribe(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Sends a WebSocket close with the normal code, drops all queued
    /// frames, clears the write buffer, and releases any waiter parked in
    /// `subscribe()` with a terminal error (I4).
    pub async fn close(&self) -> RpcResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.received.clear();
            inner.write_buf.clear();
        }
        let result = {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Close(None)).await
        };
        self.notify.notify_waiters();
        result.map_err(RpcError::from).or(Ok(()))
    }

    /// Discards any partial state left over for the frame currently being
    /// processed after a `HandlerError` (Section 7's purge hook). Queued
    /// frames for other types/waiters are untouched.
    pub fn purge_current(&self) {
        self.inner.lock().unwrap().write_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_flush_resets_buffer_even_on_empty_flush() {
        // Pure buffer bookkeeping can be tested without a live socket.
        let inner = Inner {
            received: std::collections::VecDeque::new(),
            write_buf: BytesMut::new(),
        };
        let mut inner = inner;
        inner.write_buf.extend_from_slice(b"abc");
        let taken = std::mem::take(&mut inner.write_buf);
        assert_eq!(&taken[..], b"abc");
        assert!(inner.write_buf.is_empty());
    }
}
