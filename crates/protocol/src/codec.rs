//! Line-delimited JSON encoding and decoding
//!
//! QMP messages are single JSON objects terminated by a newline (QEMU
//! writes `\r\n`). Requests are written the same way.
//!
//! # Frame Format
//!
//! ```text
//! {"execute": "query-status", "id": "usb-hotplug-1"}\n
//! ```
//!
//! A single message larger than [`MAX_MESSAGE_SIZE`] is rejected to bound
//! memory use on a misbehaving peer.

use crate::{Command, ServerMessage, error::ProtocolError, error::Result};
use std::io::{BufRead, Read};

#[cfg(feature = "async")]
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum size of one message (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a command as one newline-terminated line
///
/// # Example
/// ```
/// use protocol::{Command, encode_command};
///
/// let bytes = encode_command(&Command::device_del("auto_0")).unwrap();
/// assert!(bytes.ends_with(b"\n"));
/// ```
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(command)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one server message from a line (trailing whitespace allowed)
///
/// # Example
/// ```
/// use protocol::{ServerMessage, decode_message};
///
/// let msg = decode_message(b"{\"return\": {}}\r\n").unwrap();
/// assert!(msg.is_reply());
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<ServerMessage> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    serde_json::from_slice(bytes.trim_ascii()).map_err(ProtocolError::from)
}

/// Read the next non-empty message line from a buffered reader
///
/// # Example
/// ```
/// use protocol::{ServerMessage, read_message};
/// use std::io::Cursor;
///
/// let mut cursor = Cursor::new(b"\r\n{\"return\": {}}\r\n".to_vec());
/// let msg = read_message(&mut cursor).unwrap();
/// assert_eq!(msg.kind(), "return");
/// ```
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<ServerMessage> {
    let limit = MAX_MESSAGE_SIZE as u64 + 1;
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
        if let Some(msg) = finish_line(&line, read, limit)? {
            return Ok(msg);
        }
    }
}

/// Async: write a command to an async writer (e.g. a Unix stream)
#[cfg(feature = "async")]
pub async fn write_command_async<W>(writer: &mut W, command: &Command) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_command(command)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Async: read the next non-empty message line from an async reader
#[cfg(feature = "async")]
pub async fn read_message_async<R>(reader: &mut R) -> Result<ServerMessage>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    read_message_resumable(reader, &mut line).await
}

/// Async: read the next message, keeping a partial line in `line`
///
/// Cancel safe. If the future is dropped before a full line arrives, the
/// bytes read so far stay in `line` and the next call continues from them.
/// `line` is empty again whenever a message (or an error) is returned.
#[cfg(feature = "async")]
pub async fn read_message_resumable<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<ServerMessage>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_MESSAGE_SIZE as u64 + 1;
    loop {
        let remaining = limit.saturating_sub(line.len() as u64);
        let read = if remaining == 0 {
            0
        } else {
            AsyncReadExt::take(&mut *reader, remaining)
                .read_until(b'\n', line)
                .await?
        };
        let total = if read == 0 && remaining > 0 { 0 } else { line.len() };
        let finished = finish_line(line, total, limit);
        let complete = !matches!(finished, Ok(None)) || line.last() == Some(&b'\n');
        if complete {
            line.clear();
        }
        if let Some(msg) = finished? {
            return Ok(msg);
        }
    }
}

/// Shared tail of the line readers; `None` means a blank line to skip
fn finish_line(line: &[u8], read: usize, limit: u64) -> Result<Option<ServerMessage>> {
    if read == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if read as u64 >= limit && line.last() != Some(&b'\n') {
        return Err(ProtocolError::MessageTooLarge {
            size: read,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if line.trim_ascii().is_empty() {
        return Ok(None);
    }
    decode_message(line).map(Some)
}
