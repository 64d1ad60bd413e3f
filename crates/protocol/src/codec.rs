//! Line-delimited JSON codec
//!
//! The bridge speaks one JSON object per line:
//! ```text
//! {"id":1,"op":"listDevices"}\n
//! ```
//!
//! Maximum line size is 1 MiB to bound memory use on malformed input.

use crate::error::{ProtocolError, Result};
use crate::messages::{BridgeReply, BridgeRequest};
use std::io::{BufRead, Read, Write};

#[cfg(feature = "async")]
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum allowed line size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode a reply as a single newline-terminated line
///
/// # Example
/// ```
/// use protocol::{BridgeReply, ReplyValue, encode_reply};
///
/// let line = encode_reply(&BridgeReply::ok(Some(1), ReplyValue::Bool(true))).unwrap();
/// assert_eq!(line, b"{\"id\":1,\"ok\":true}\n");
/// ```
pub fn encode_reply(reply: &BridgeReply) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(reply)?;

    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    line.push(b'\n');
    Ok(line)
}

/// Decode one request line (trailing newline optional)
///
/// # Example
/// ```
/// use protocol::decode_request;
///
/// let request = decode_request(b"{\"id\":7,\"op\":\"closePort\"}\n").unwrap();
/// assert_eq!(request.id, Some(7));
/// assert_eq!(request.op, "closePort");
/// ```
pub fn decode_request(line: &[u8]) -> Result<BridgeRequest> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    serde_json::from_slice(trim_line(line)).map_err(ProtocolError::from)
}

/// Read one request line from a buffered reader
///
/// Returns `Ok(None)` at end of input. Blank lines are skipped.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<BridgeRequest>> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .by_ref()
            .take(MAX_FRAME_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if !trim_line(&line).is_empty() {
            return decode_request(&line).map(Some);
        }
    }
}

/// Write one reply line to a writer
pub fn write_reply<W: Write>(writer: &mut W, reply: &BridgeReply) -> Result<()> {
    let line = encode_reply(reply)?;
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Async: Read one raw line (without decoding)
///
/// Returns `Ok(None)` at end of input. The caller decodes with
/// [`decode_request`] so that a malformed line can still be answered.
#[cfg(feature = "async")]
pub async fn read_line_async<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }

    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: line.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(Some(line))
}

/// Async: Write one reply line and flush
#[cfg(feature = "async")]
pub async fn write_reply_async<W>(writer: &mut W, reply: &BridgeReply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_reply(reply)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}
