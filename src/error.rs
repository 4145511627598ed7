// ABOUTME: Crate-wide error taxonomy for the dispatching protocol, transport and stubs
// ABOUTME: Mirrors the connection-lifecycle and framing errors a generated SMPP client reports

use thiserror::Error;

/// The error taxonomy of Section 7, realized as one `thiserror` enum in the
/// style of `client::error::SmppError`.
#[derive(Debug, Error)]
pub enum RpcError {
    /// TCP/WS handshake did not complete within the connect bound.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The WebSocket `open` event was not observed within the open bound.
    #[error("websocket open timed out")]
    OpenTimeout,

    /// The peer or the local side closed the connection during a wait.
    #[error("connection closed")]
    ConnectionClosed,

    /// A received frame failed header decode, or a stub observed a seq-id
    /// it did not send. Always fatal: the byte stream's alignment is lost.
    #[error("framing violation: {reason}")]
    FramingViolation { reason: String },

    /// Raised by user code inside `Processor::process`.
    #[error("handler error: {0}")]
    HandlerError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The peer's processor raised an exception that was sent back as an
    /// EXCEPTION message rather than a REPLY.
    #[error("remote exception: {0}")]
    Remote(#[from] RemoteException),

    /// The connection runner's task was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// The body of an EXCEPTION message. Demos and generated stubs may replace
/// this with a richer, service-specific type by implementing their own
/// `RpcDecode`/`RpcEncode`; this is the default used when a processor's
/// handler returns a plain error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteException {
    pub message: String,
}

impl RemoteException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl crate::header::RpcEncode for RemoteException {
    fn encode_body(&self, buf: &mut bytes::BytesMut) -> RpcResult<()> {
        use bytes::BufMut;
        buf.put_slice(self.message.as_bytes());
        Ok(())
    }
}

impl crate::header::RpcDecode for RemoteException {
    fn decode_body(buf: &[u8]) -> RpcResult<Self> {
        Ok(RemoteException::new(String::from_utf8_lossy(buf).into_owned()))
    }
}
