//! Line-delimited JSON bridge server
//!
//! Reads one request per line, dispatches each as its own task, and writes
//! replies in completion order. Device work is still serialized by the USB
//! worker; only waiting (for example on a permission prompt) overlaps.

use crate::facade::SerialPortModule;
use anyhow::{Context, Result};
use protocol::{
    BridgeError, BridgeReply, ErrorCode, ProtocolError, decode_request, read_line_async,
    write_reply_async,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long in-flight requests may keep running once input has ended
pub const EOF_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Serve requests from `reader` until end of input
///
/// In-flight requests get [`EOF_GRACE_PERIOD`] to finish before returning;
/// whatever is still waiting then (typically a permission prompt) is
/// cancelled without a reply. The module is not shut down here; see
/// [`serve_stdio`].
pub async fn serve<R, W>(module: Arc<SerialPortModule>, mut reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<BridgeReply>();
    let writer_task = tokio::spawn(write_replies(writer, reply_rx));
    let mut tasks = JoinSet::new();

    loop {
        let line = match read_line_async(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Bridge input closed");
                break;
            }
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                warn!("Rejected {} byte request line (max {})", size, max);
                let _ = reply_tx.send(invalid(None, format!("Request line too large: {} bytes", size)));
                continue;
            }
            Err(e) => {
                error!("Failed to read bridge input: {}", e);
                break;
            }
        };

        if line.trim_ascii().is_empty() {
            continue;
        }

        let request = match decode_request(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request line: {}", e);
                let _ = reply_tx.send(invalid(None, format!("Malformed request: {}", e)));
                continue;
            }
        };

        let call = match request.call() {
            Ok(call) => call,
            Err(e) => {
                warn!("Invalid request {:?}: {}", request.id, e.message);
                let _ = reply_tx.send(BridgeReply::error(request.id, e));
                continue;
            }
        };

        debug!("Request {:?}: {}", request.id, call.name());
        let module = module.clone();
        let reply_tx = reply_tx.clone();
        tasks.spawn(async move {
            let reply = BridgeReply::from_result(request.id, module.dispatch(call).await);
            let _ = reply_tx.send(reply);
        });

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Request task failed: {}", e);
            }
        }
    }

    let drained = tokio::time::timeout(EOF_GRACE_PERIOD, async {
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Request task failed: {}", e);
            }
        }
    })
    .await
    .is_ok();
    if !drained {
        // Dropping a cancelled task's pending permission unregisters it
        warn!(
            "Cancelling {} request(s) still waiting at end of input",
            tasks.len()
        );
        tasks.shutdown().await;
    }

    drop(reply_tx);
    writer_task.await.context("Reply writer task failed")?;
    Ok(())
}

/// Serve the bridge over stdin/stdout, then stop the USB worker
pub async fn serve_stdio(module: Arc<SerialPortModule>) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let result = serve(module.clone(), reader, tokio::io::stdout()).await;
    module.shutdown().await;
    result
}

async fn write_replies<W>(mut writer: W, mut replies: mpsc::UnboundedReceiver<BridgeReply>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        if let Err(e) = write_reply_async(&mut writer, &reply).await {
            error!("Failed to write reply: {}", e);
            break;
        }
    }
}

fn invalid(id: Option<u64>, message: String) -> BridgeReply {
    BridgeReply::error(id, BridgeError::new(ErrorCode::InvalidRequest, message))
}
