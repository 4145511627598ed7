// ABOUTME: Drives one connection's server side: waits for CALL/ONEWAY messages,
// ABOUTME: dispatches them to a Processor, and writes back REPLY/EXCEPTION frames

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{RemoteException, RpcError};
use crate::header::{self, MessageType};
use crate::protocol::DispatchingProtocol;

/// User-supplied request dispatch, keyed by method name. Bodies are handed
/// over as raw bytes rather than a generic codec type parameter: the
/// concrete request/response encoding is an external collaborator (Section
/// 1), so the runner only needs to move bytes in and bytes (or a remote
/// exception) back out.
///
/// Defined with a native `async fn` in trait (no `async_trait`), matching
/// `client::traits::AsyncSmppClient`'s own "native async traits" idiom.
pub trait Processor {
    fn process(
        &self,
        method_name: &str,
        body: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, RemoteException>> + Send;
}

/// Cooperative shutdown signal for a [`ConnectionRunner`]. Deliberately not
/// `tokio_util::sync::CancellationToken`, to avoid pulling in an extra crate
/// for one small type: this is the same `Notify`-plus-flag shape already
/// used by [`crate::transport::FrameTransport`].
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    async fn cancelled_fut(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// `ConnectionRunner` of Section 4.5: the server-side loop that owns one
/// connection's CALL/ONEWAY handling for as long as the connection is open
/// or until explicitly cancelled.
pub struct ConnectionRunner<P> {
    protocol: Arc<DispatchingProtocol>,
    processor: P,
    cancellation: CancellationToken,
}

impl<P: Processor> ConnectionRunner<P> {
    pub fn new(protocol: Arc<DispatchingProtocol>, processor: P) -> Self {
        Self {
            protocol,
            processor,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(protocol: Arc<DispatchingProtocol>, processor: P, cancellation: CancellationToken) -> Self {
        Self {
            protocol,
            processor,
            cancellation,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Runs until the connection closes or the token is cancelled. Each
    /// iteration waits for the next CALL or ONEWAY (a REPLY/EXCEPTION
    /// arriving in the meantime is left queued for whichever stub call is
    /// waiting on it, per I2/P3), dispatches it, and for CALL writes back
    /// exactly one REPLY or EXCEPTION frame carrying the same sequence id
    /// (I1). Every exit from the loop below — cancellation, connection
    /// closed, a framing violation, or a failed flush — ends in
    /// `transport.close()` (`close()` is idempotent, so the connection-closed
    /// path's already-closed transport is a harmless no-op), matching §4.5's
    /// `finally: transport.close()`.
    pub async fn run(&self) {
        self.run_until_closed().await;
        let _ = self.protocol.transport().close().await;
    }

    async fn run_until_closed(&self) {
        loop {
            let wait = self.protocol.wait_for_message(&[MessageType::Call, MessageType::Oneway]);
            tokio::pin!(wait);

            let message = tokio::select! {
                biased;
                _ = self.cancellation.cancelled_fut() => {
                    tracing::debug!("connection runner cancelled");
                    return;
                }
                result = &mut wait => result,
            };

            let message = match message {
                Ok(message) => message,
                Err(RpcError::ConnectionClosed) => {
                    tracing::debug!("connection closed, stopping runner");
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dispatching protocol error, stopping runner");
                    return;
                }
            };

            let is_oneway = message.header.message_type == MessageType::Oneway;
            let method_name = message.header.method_name.clone();
            let sequence_id = message.header.sequence_id;
            let result = self.processor.process(&method_name, message.body()).await;

            if is_oneway {
                if let Err(remote_err) = result {
                    tracing::warn!(method = %method_name, error = %remote_err, "oneway handler raised, discarding");
                }
                continue;
            }

            let mut buf = BytesMut::new();
            match result {
                Ok(reply_body) => {
                    header::write_header(&mut buf, &method_name, MessageType::Reply, sequence_id);
                    buf.extend_from_slice(&reply_body);
                }
                Err(remote_err) => {
                    header::write_header(&mut buf, &method_name, MessageType::Exception, sequence_id);
                    if let Err(encode_err) = remote_err_encode(&remote_err, &mut buf) {
                        tracing::error!(error = %encode_err, "failed to encode remote exception body");
                    }
                }
            }
            header::finalize_length(&mut buf);

            self.protocol.transport().write(&buf);
            if let Err(err) = self.protocol.transport().flush().await {
                tracing::warn!(error = %err, "failed to flush reply, stopping runner");
                self.protocol.transport().purge_current();
                return;
            }
        }
    }
}

fn remote_err_encode(err: &RemoteException, buf: &mut BytesMut) -> Result<(), RpcError> {
    use crate::header::RpcEncode;
    err.encode_body(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Processor for Echo {
        async fn process(&self, _method_name: &str, body: &[u8]) -> Result<Vec<u8>, RemoteException> {
            Ok(body.to_vec())
        }
    }

    struct AlwaysFails;

    impl Processor for AlwaysFails {
        async fn process(&self, method_name: &str, _body: &[u8]) -> Result<Vec<u8>, RemoteException> {
            Err(RemoteException::new(format!("no such method: {method_name}")))
        }
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_loop() {
        let transport = crate::ws::test_support::bare_transport().await;
        let protocol = Arc::new(DispatchingProtocol::new(transport));
        let runner = ConnectionRunner::new(protocol, Echo);
        runner.cancellation().cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), runner.run())
            .await
            .expect("run() should return promptly once cancelled");
    }

    #[test]
    fn always_fails_processor_produces_a_remote_exception() {
        let fut = AlwaysFails.process("missing", b"");
        let result = futures_util::FutureExt::now_or_never(fut).expect("processor is synchronous");
        assert!(result.is_err());
    }
}
