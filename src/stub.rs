// ABOUTME: Generated-style call sites: encode a request, flush it, and for CALL
// ABOUTME: wait for the matching REPLY/EXCEPTION by sequence id

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{RemoteException, RpcError, RpcResult};
use crate::header::{self, MessageType, RpcDecode, RpcEncode};
use crate::protocol::DispatchingProtocol;

/// `Stub` of Section 4.7: the runtime a generated client/server interface
/// would sit on top of. One `Stub` owns one connection's outbound sequence
/// counter; it is typically wrapped in an `Arc` since the same connection
/// may be called from multiple tasks (e.g. a server calling back into a
/// registered peer while also servicing its own CALL loop).
pub struct Stub {
    protocol: Arc<DispatchingProtocol>,
    next_seq_id: AtomicI32,
}

impl Stub {
    pub fn new(protocol: Arc<DispatchingProtocol>) -> Self {
        Self {
            protocol,
            next_seq_id: AtomicI32::new(1),
        }
    }

    fn next_sequence_id(&self) -> i32 {
        self.next_seq_id.fetch_add(1, Ordering::Relaxed)
    }

    fn encode_request<Req: RpcEncode>(
        &self,
        method_name: &str,
        message_type: MessageType,
        sequence_id: i32,
        request: &Req,
    ) -> RpcResult<BytesMut> {
        let mut buf = BytesMut::new();
        header::write_header(&mut buf, method_name, message_type, sequence_id);
        request.encode_body(&mut buf)?;
        header::finalize_length(&mut buf);
        Ok(buf)
    }

    /// Sends `request` as a CALL and waits for the REPLY or EXCEPTION
    /// carrying the same sequence id, decoding it as `Resp`. A reply that
    /// arrives under a different sequence id is a `FramingViolation`: it
    /// means the byte stream's REPLY/EXCEPTION ordering assumption (Section
    /// 5, "no reordering") was violated, and there is no safe way to
    /// attribute it to another waiter, so it is treated as fatal rather than
    /// silently requeued. Per §4.7/§7, a framing violation always closes the
    /// connection before the error is returned; `close()` is idempotent, so
    /// a `ConnectionClosed` error propagating out of `wait_for_message`
    /// closes an already-closed transport harmlessly.
    pub async fn call<Req: RpcEncode, Resp: RpcDecode>(&self, method_name: &str, request: &Req) -> RpcResult<Resp> {
        let sequence_id = self.next_sequence_id();
        let buf = self.encode_request(method_name, MessageType::Call, sequence_id, request)?;

        self.protocol.transport().write(&buf);
        self.protocol.transport().flush().await?;

        let message = match self
            .protocol
            .wait_for_message(&[MessageType::Reply, MessageType::Exception])
            .await
        {
            Ok(message) => message,
            Err(err) => {
                let _ = self.protocol.transport().close().await;
                return Err(err);
            }
        };

        if message.header.sequence_id != sequence_id {
            let _ = self.protocol.transport().close().await;
            return Err(RpcError::FramingViolation {
                reason: format!(
                    "expected reply for sequence id {sequence_id}, got {}",
                    message.header.sequence_id
                ),
            });
        }

        let result = match message.header.message_type {
            MessageType::Reply => Resp::decode_body(message.body()),
            MessageType::Exception => {
                let exception = RemoteException::decode_body(message.body())?;
                Err(RpcError::Remote(exception))
            }
            other => Err(RpcError::FramingViolation {
                reason: format!("wait_for_message returned an unrequested type {other:?}"),
            }),
        };

        if let Err(RpcError::FramingViolation { .. }) = &result {
            let _ = self.protocol.transport().close().await;
        }
        result
    }

    /// Sends `request` as ONEWAY and returns as soon as it has been flushed.
    /// No reply is expected or awaited.
    pub async fn call_oneway<Req: RpcEncode>(&self, method_name: &str, request: &Req) -> RpcResult<()> {
        let sequence_id = self.next_sequence_id();
        let buf = self.encode_request(method_name, MessageType::Oneway, sequence_id, request)?;

        self.protocol.transport().write(&buf);
        self.protocol.transport().flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::bare_pair;

    #[tokio::test]
    async fn call_round_trips_through_a_loopback_server() {
        let (client_transport, server_transport) = bare_pair().await;
        let client_protocol = Arc::new(DispatchingProtocol::new(client_transport));
        let server_protocol = Arc::new(DispatchingProtocol::new(server_transport));

        tokio::spawn(async move {
            let message = server_protocol
                .wait_for_message(&[MessageType::Call])
                .await
                .unwrap();
            let request = String::decode_body(message.body()).unwrap();

            let mut buf = BytesMut::new();
            header::write_header(
                &mut buf,
                &message.header.method_name,
                MessageType::Reply,
                message.header.sequence_id,
            );
            request.to_uppercase().encode_body(&mut buf).unwrap();
            header::finalize_length(&mut buf);
            server_protocol.transport().write(&buf);
            server_protocol.transport().flush().await.unwrap();
        });

        let stub = Stub::new(client_protocol);
        let reply: String = stub.call("shout", &"hello".to_string()).await.unwrap();
        assert_eq!(reply, "HELLO");
    }

    #[tokio::test]
    async fn mismatched_sequence_id_is_a_framing_violation() {
        let (client_transport, server_transport) = bare_pair().await;
        let client_protocol = Arc::new(DispatchingProtocol::new(client_transport));

        let mut buf = BytesMut::new();
        header::write_header(&mut buf, "shout", MessageType::Reply, 999);
        "X".to_string().encode_body(&mut buf).unwrap();
        header::finalize_length(&mut buf);
        server_transport.write(&buf);
        server_transport.flush().await.unwrap();

        let stub = Stub::new(client_protocol);
        let result: RpcResult<String> = stub.call("shout", &"hello".to_string()).await;
        assert!(matches!(result, Err(RpcError::FramingViolation { .. })));
    }

    #[tokio::test]
    async fn call_oneway_does_not_wait_for_a_reply() {
        let (client_transport, _server_transport) = bare_pair().await;
        let client_protocol = Arc::new(DispatchingProtocol::new(client_transport));
        let stub = Stub::new(client_protocol);

        tokio::time::timeout(
            std::time::Duration::from_millis(200),
            stub.call_oneway("notify", &"hi".to_string()),
        )
        .await
        .expect("call_oneway should not block on a reply")
        .unwrap();
    }
}
