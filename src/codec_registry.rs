// ABOUTME: Method-name-keyed dispatch table, the RPC counterpart of `codec::PduRegistry`'s
// ABOUTME: command-id-keyed lookup; lets a server register typed handlers without a hand-written match

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::RemoteException;
use crate::header::{RpcDecode, RpcEncode};
use crate::runner::Processor;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type HandlerFn = Arc<dyn Fn(&[u8]) -> BoxFuture<Result<Vec<u8>, RemoteException>> + Send + Sync>;

/// A [`Processor`] that dispatches by method name into independently
/// registered typed handlers, generalizing `PduRegistry::decode_pdu`'s
/// command-id lookup to the open method-name space §6's "generated
/// processor" contract describes. A generated stub would normally hand-write
/// this match arm by arm; this is what it would generate into.
#[derive(Clone, Default)]
pub struct MethodDispatcher {
    handlers: HashMap<String, HandlerFn>,
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method_name` against a handler that decodes the request
    /// body as `Req`, invokes `handler`, and encodes its `Resp` as the reply
    /// body. A later `register` for the same name replaces the earlier one,
    /// matching `HashMap::insert`'s own semantics.
    pub fn register<Req, Resp, F, Fut>(&mut self, method_name: impl Into<String>, handler: F) -> &mut Self
    where
        Req: RpcDecode + Send + 'static,
        Resp: RpcEncode + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RemoteException>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.handlers.insert(
            method_name.into(),
            Arc::new(move |body: &[u8]| {
                let handler = handler.clone();
                let request = Req::decode_body(body).map_err(|e| RemoteException::new(e.to_string()));
                Box::pin(async move {
                    let response = handler(request?).await?;
                    let mut buf = BytesMut::new();
                    response
                        .encode_body(&mut buf)
                        .map_err(|e| RemoteException::new(e.to_string()))?;
                    Ok(buf.to_vec())
                }) as BoxFuture<Result<Vec<u8>, RemoteException>>
            }),
        );
        self
    }

    pub fn is_registered(&self, method_name: &str) -> bool {
        self.handlers.contains_key(method_name)
    }

    /// All currently-registered method names, in unspecified order — mirrors
    /// `PduRegistry::registered_commands`.
    pub fn registered_methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Processor for MethodDispatcher {
    async fn process(&self, method_name: &str, body: &[u8]) -> Result<Vec<u8>, RemoteException> {
        match self.handlers.get(method_name) {
            Some(handler) => handler(body).await,
            None => {
                tracing::warn!(%method_name, "no handler registered for method, treating as unknown");
                Err(RemoteException::new(format!("no such method: {method_name}")))
            }
        }
    }
}
