// ABOUTME: Counterpart of `examples/long_running_client.rs`: connects once, then runs a
// ABOUTME: bidirectional loop, calling "work" periodically while also answering server "notify"s

use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use bytes::BytesMut;
use tracing::{error, info, warn};
use wsrpc::{ConnectionRunner, MethodDispatcher, RpcDecode, RpcEncode, RpcResult, Stub};

#[derive(FromArgs)]
/// shuffle client demo
struct Args {
    /// the server to connect to, e.g. ws://127.0.0.1:9000
    #[argh(option, default = "String::from(\"ws://127.0.0.1:9000\")")]
    url: String,

    /// interval between "work" calls, in seconds
    #[argh(option, default = "5")]
    work_interval: u64,

    /// how long to run before disconnecting, in seconds (default: run forever)
    #[argh(option)]
    run_duration: Option<u64>,
}

/// Same bincode-framed text body the server demo uses.
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Args = argh::from_env();

    info!(url = %args.url, "connecting");
    let connection = wsrpc::connect(&args.url, Duration::from_secs(5)).await?;
    connection.wait_for_opened().await;
    info!("connected");

    // The server periodically calls back into us with "notify"; answer it
    // with the same shuffle the server applies to our own "work" requests,
    // so either side can be driven interactively and see a sensible reply.
    let mut dispatcher = MethodDispatcher::new();
    dispatcher.register("notify", |Text(text): Text| async move {
        info!(%text, "got notify from server");
        Ok(Text(text.chars().rev().collect()))
    });

    let runner = ConnectionRunner::new(connection.protocol().clone(), dispatcher);
    let cancellation = runner.cancellation().clone();
    let runner_task = tokio::spawn(async move { runner.run().await });

    let stub = Arc::new(Stub::new(connection.protocol().clone()));
    let work_interval = Duration::from_secs(args.work_interval);
    let deadline = args.run_duration.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    let mut ticker = tokio::time::interval(work_interval);
    let mut message_count: u64 = 0;

    loop {
        let tick = async {
            if let Some(deadline) = deadline {
                tokio::time::sleep_until(deadline).await;
            } else {
                std::future::pending::<()>().await
            }
        };

        tokio::select! {
            biased;
            _ = tick => {
                info!("run duration elapsed, shutting down");
                break;
            }
            _ = ticker.tick() => {
                message_count += 1;
                let text = Text(format!("message #{message_count}"));
                match stub.call::<Text, Text>("work", &text).await {
                    Ok(Text(reply)) => info!(%reply, "server responded"),
                    Err(err) => {
                        error!(error = %err, "work call failed, stopping");
                        break;
                    }
                }
            }
        }

        if !connection.is_open() {
            warn!("connection closed by peer");
            break;
        }
    }

    cancellation.cancel();
    let _ = connection.close().await;
    let _ = runner_task.await;

    info!(messages_sent = message_count, "client shut down cleanly");
    Ok(())
}
