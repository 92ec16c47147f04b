//! Length-prefixed framing for archive payloads
//!
//! Success: `len: u32` (native endian) followed by exactly `len` bytes.
//! Failure: `0u32`, then `err_len: u32` and `err_len` bytes of UTF-8 text.
//! An empty successful payload is `0u32, 0u32`, so every reply to an archive
//! command is a complete frame.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CHUNK_SIZE, MAX_FAILURE_TEXT};
use crate::workspace::ensure_private_dir;

pub const LENGTH_FIELD: usize = 4;

pub fn encode_length(len: u32) -> [u8; LENGTH_FIELD] {
    len.to_ne_bytes()
}

pub fn decode_length(bytes: [u8; LENGTH_FIELD]) -> u32 {
    u32::from_ne_bytes(bytes)
}

/// First part of a frame as seen by the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHeader {
    /// `len` payload bytes follow
    Payload(u32),
    Failure(String),
}

/// Validate payload size against the 32-bit length field
pub fn validate_payload_size(size: u64) -> Result<u32> {
    u32::try_from(size)
        .map_err(|_| anyhow::anyhow!("payload too large: {} bytes (max: {})", size, u32::MAX))
}

async fn read_u32<R>(reader: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; LENGTH_FIELD];
    reader
        .read_exact(&mut buf)
        .await
        .context("connection closed before length field")?;
    Ok(decode_length(buf))
}

/// Send `size` bytes from `source` as a success frame.
pub async fn send_payload<W, R>(writer: &mut W, source: &mut R, size: u64) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let len = validate_payload_size(size)?;
    writer.write_all(&encode_length(len)).await?;
    if len == 0 {
        writer.write_all(&encode_length(0)).await?;
        writer.flush().await?;
        return Ok(());
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..to_read]).await?;
        if n == 0 {
            bail!("payload source ended with {} of {} bytes unsent", remaining, size);
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn send_bytes<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut source = data;
    send_payload(writer, &mut source, data.len() as u64).await
}

/// Send an opened file as a success frame; returns the bytes sent.
///
/// The size is taken from the file's metadata before anything is written,
/// so an oversized file fails without touching the stream.
pub async fn send_file<W>(writer: &mut W, file: &mut File) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let size = file.metadata().await?.len();
    validate_payload_size(size)?;
    send_payload(writer, file, size).await?;
    Ok(size)
}

/// Send a failure frame carrying `message`.
pub async fn send_failure<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut text = if message.is_empty() { "transfer failed" } else { message };
    if text.len() > MAX_FAILURE_TEXT {
        let mut cut = MAX_FAILURE_TEXT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text = &text[..cut];
    }
    let mut frame = Vec::with_capacity(2 * LENGTH_FIELD + text.len());
    frame.extend_from_slice(&encode_length(0));
    frame.extend_from_slice(&encode_length(text.len() as u32));
    frame.extend_from_slice(text.as_bytes());
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_header<R>(reader: &mut R) -> Result<FrameHeader>
where
    R: AsyncRead + Unpin,
{
    let len = read_u32(reader).await?;
    if len > 0 {
        return Ok(FrameHeader::Payload(len));
    }
    let err_len = read_u32(reader).await? as usize;
    if err_len == 0 {
        return Ok(FrameHeader::Payload(0));
    }
    if err_len > MAX_FAILURE_TEXT {
        bail!("failure text too large: {} bytes (max: {})", err_len, MAX_FAILURE_TEXT);
    }
    let mut text = vec![0u8; err_len];
    reader
        .read_exact(&mut text)
        .await
        .context("connection closed inside failure text")?;
    Ok(FrameHeader::Failure(String::from_utf8_lossy(&text).into_owned()))
}

/// Copy exactly `len` payload bytes from `reader` into `writer`, looping over
/// partial reads. Closing early is an error.
pub async fn receive_payload<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    len: u32,
    mut on_progress: F,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let total = len as u64;
    let mut received = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while received < total {
        let to_read = (total - received).min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..to_read]).await?;
        if n == 0 {
            bail!(
                "connection closed after {} of {} payload bytes",
                received,
                total
            );
        }
        writer.write_all(&buf[..n]).await?;
        received += n as u64;
        on_progress(received);
    }
    writer.flush().await?;
    Ok(received)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Payload(Vec<u8>),
    Failure(String),
}

/// Read one complete frame into memory.
pub async fn receive_to_vec<R>(reader: &mut R) -> Result<Received>
where
    R: AsyncRead + Unpin,
{
    match read_header(reader).await? {
        FrameHeader::Failure(msg) => Ok(Received::Failure(msg)),
        FrameHeader::Payload(len) => {
            let mut out = Vec::with_capacity(len as usize);
            receive_payload(reader, &mut out, len, |_| {}).await?;
            Ok(Received::Payload(out))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Saved {
    File { path: PathBuf, bytes: u64 },
    Failure(String),
}

/// Read one frame and store its payload as `dir/name`.
///
/// Bytes land in a hidden `.part` file that is renamed into place only after
/// the whole payload arrived; on any error the partial file is removed.
/// `on_start` is told the payload length before the first byte is read.
pub async fn receive_to_file<R, S, F>(
    reader: &mut R,
    dir: &Path,
    name: &str,
    on_start: S,
    on_progress: F,
) -> Result<Saved>
where
    R: AsyncRead + Unpin,
    S: FnOnce(u64),
    F: FnMut(u64),
{
    let len = match read_header(reader).await? {
        FrameHeader::Failure(msg) => return Ok(Saved::Failure(msg)),
        FrameHeader::Payload(len) => len,
    };
    on_start(len as u64);

    ensure_private_dir(dir)?;
    let part = dir.join(format!(".{}.part", name));
    let dest = dir.join(name);

    let result = async {
        let mut file = File::create(&part)
            .await
            .with_context(|| format!("create {}", part.display()))?;
        let bytes = receive_payload(reader, &mut file, len, on_progress).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&part, &dest)
            .await
            .with_context(|| format!("rename {} -> {}", part.display(), dest.display()))?;
        Ok::<u64, anyhow::Error>(bytes)
    }
    .await;

    match result {
        Ok(bytes) => Ok(Saved::File { path: dest, bytes }),
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}
