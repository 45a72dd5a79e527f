//! `Content-Length` framing for DAP messages.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{DapError, Result};

/// Upper bound on a single frame body.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Upper bound on a single header line, terminator included.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// One decoded frame.
#[derive(Debug)]
pub enum Frame {
    Message(Value),
    /// The header was valid and `length` bytes were consumed, but the body is
    /// not JSON. The stream is still aligned on the next frame.
    Malformed {
        length: usize,
        error: serde_json::Error,
    },
}

pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(&body);
    Ok(framed)
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let framed = encode(message)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Err(DapError::closed("debug adapter closed the connection"));
        }
        if line.last() != Some(&b'\n') {
            if read >= MAX_HEADER_LINE {
                return Err(DapError::Framing(format!(
                    "header line exceeds limit of {MAX_HEADER_LINE} bytes"
                )));
            }
            return Err(DapError::closed("connection closed inside a frame header"));
        }

        let text = std::str::from_utf8(&line)
            .map_err(|_| DapError::Framing("header line is not valid UTF-8".to_string()))?;
        let header = text.trim_end_matches(&['\r', '\n'][..]);

        if header.is_empty() {
            break;
        }

        let Some((name, value)) = header.split_once(':') else {
            return Err(DapError::Framing(format!("malformed header line {header:?}")));
        };

        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value.trim().parse::<usize>().map_err(|_| {
                DapError::Framing(format!("invalid Content-Length value {:?}", value.trim()))
            })?;
            content_length = Some(length);
        }
    }

    let length = content_length
        .ok_or_else(|| DapError::Framing("missing Content-Length header".to_string()))?;
    if length == 0 {
        return Err(DapError::Framing("Content-Length must be positive".to_string()));
    }
    if length > MAX_CONTENT_LENGTH {
        return Err(DapError::Framing(format!(
            "Content-Length {length} exceeds limit of {MAX_CONTENT_LENGTH} bytes"
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DapError::closed(format!("connection closed inside a {length}-byte frame body"))
        } else {
            DapError::Io(e)
        }
    })?;

    Ok(match serde_json::from_slice(&body) {
        Ok(value) => Frame::Message(value),
        Err(error) => Frame::Malformed { length, error },
    })
}
