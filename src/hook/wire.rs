//! Newline-delimited JSON framing shared by both ends of the IPC
//! channel. One message per line, one line per connection direction.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::constants::MAX_IPC_MESSAGE_BYTES;

/// Read one `\n`-terminated message line, refusing lines longer than
/// the IPC cap
pub(crate) async fn read_line_bounded<R>(reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    // One extra byte lets a maximum-length line keep its newline
    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_BYTES as u64 + 1));
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .context("failed to read message")?;
    if read == 0 {
        bail!("connection closed before a message arrived");
    }
    if line.ends_with('\n') {
        line.pop();
    }
    if line.len() > MAX_IPC_MESSAGE_BYTES {
        bail!("message exceeds {MAX_IPC_MESSAGE_BYTES} byte limit");
    }
    Ok(line)
}

pub(crate) async fn read_message<R, T>(reader: R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let line = read_line_bounded(reader).await?;
    serde_json::from_str(&line).context("failed to parse message")
}

pub(crate) async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message).context("failed to serialize message")?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("failed to write message")?;
    writer.flush().await.context("failed to flush message")?;
    Ok(())
}
