//! Counterpart of `demo/wsasync/server.py`: accepts connections, shuffles
//! the text any connected client sends it via `work`, and periodically
//! calls back into every connected client with `notify`.

use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use bytes::BytesMut;
use wsrpc::{ClientRegistry, RemoteException, RpcDecode, RpcEncode, RpcResult};

#[derive(FromArgs)]
/// shuffle server demo
struct Args {
    /// address to bind, e.g. 127.0.0.1:9000
    #[argh(option, default = "String::from(\"127.0.0.1:9000\")")]
    bind: String,
}

/// A plain string body, bincode-encoded so the demo has a realistic
/// serialization step instead of leaning on the raw `String` codec.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Text(String);

impl RpcEncode for Text {
    fn encode_body(&self, buf: &mut BytesMut) -> RpcResult<()> {
        let bytes = bincode::serialize(self).map_err(|e| wsrpc::RpcError::FramingViolation {
            reason: format!("bincode encode failed: {e}"),
        })?;
        buf.extend_from_slice(&bytes);
        Ok(())
    }
}

impl RpcDecode for Text {
    fn decode_body(buf: &[u8]) -> RpcResult<Self> {
        bincode::deserialize(buf).map_err(|e| wsrpc::RpcError::FramingViolation {
            reason: format!("bincode decode failed: {e}"),
        })
    }
}

#[derive(Clone)]
struct ShuffleHandler;

impl wsrpc::Processor for ShuffleHandler {
    async fn process(&self, method_name: &str, body: &[u8]) -> Result<Vec<u8>, RemoteException> {
        match method_name {
            "work" => {
                let Text(text) = Text::decode_body(body).map_err(|e| RemoteException::new(e.to_string()))?;
                tracing::info!(%text, "got work");
                let shuffled = shuffle(&text);
                let mut buf = BytesMut::new();
                Text(shuffled)
                    .encode_body(&mut buf)
                    .map_err(|e| RemoteException::new(e.to_string()))?;
                Ok(buf.to_vec())
            }
            other => Err(RemoteException::new(format!("no such method: {other}"))),
        }
    }
}

fn shuffle(text: &str) -> String {
    // A fixed, deterministic "shuffle" keeps the demo's output reproducible
    // without pulling in a random number generator dependency.
    text.chars().rev().collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Args = argh::from_env();
    let registry = Arc::new(ClientRegistry::new());

    let notify_registry = registry.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(2)).await;
            for stub in notify_registry.snapshot() {
                match stub.call::<Text, Text>("notify", &Text("some update".to_string())).await {
                    Ok(Text(reply)) => tracing::info!(%reply, "client responded"),
                    Err(err) => tracing::warn!(error = %err, "notify failed"),
                }
            }
        }
    });

    tracing::info!(bind = %args.bind, "server started");
    wsrpc::serve(args.bind, ShuffleHandler, registry, Duration::from_secs(10)).await?;
    Ok(())
}
