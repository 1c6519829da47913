//! The RESP wire codec.
//!
//! Outbound commands are framed as counted arrays of binary-safe bulk
//! strings. Inbound replies dispatch on a one-byte prefix (`+` status, `-`
//! error, `:` integer, `$` bulk, `*` array) and recurse for arrays.
//!
//! The reader pulls from a fixed-size buffer and falls back to an unbounded
//! scratch buffer whenever a line or bulk value straddles a read boundary,
//! which is common and must not corrupt values split mid-frame.

use std::future::Future;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::reply::Reply;

/// Size of the fixed read buffer used for normal traffic.
pub(crate) const READ_BUFFER_SIZE: usize = 2048;

/// Errors raised while decoding the inbound byte stream. All of them are
/// fatal to the connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RespError {
    #[error("not expecting frame prefix 0x{0:02x}")]
    UnexpectedPrefix(u8),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("unable to parse integer: {0}")]
    InvalidInteger(String),
    #[error("bulk length out of range: {0}")]
    InvalidBulkLength(i64),
    #[error("array length out of range: {0}")]
    InvalidArrayLength(i64),
    #[error("expected CRLF terminator")]
    MissingCrlf,
    #[error("I/O error: {0}")]
    Io(String),
}

/// Incremental decoder over an async byte stream.
pub struct ReplyReader<R> {
    src: R,
    buf: [u8; READ_BUFFER_SIZE],
    offset: usize,
    end: usize,
    // spillover for values that step over the fixed buffer
    scratch: BytesMut,
}

type ValueFuture<'a> = Pin<Box<dyn Future<Output = Result<Reply, RespError>> + Send + 'a>>;

impl<R> ReplyReader<R>
where
    R: AsyncReadExt + Unpin + Send,
{
    pub fn new(src: R) -> Self {
        ReplyReader {
            src,
            buf: [0; READ_BUFFER_SIZE],
            offset: 0,
            end: 0,
            scratch: BytesMut::new(),
        }
    }

    /// Reads the next complete reply from the stream.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(reply))` - A fully decoded reply
    /// * `Ok(None)` - Clean end of stream at a frame boundary
    /// * `Err(RespError)` - A protocol violation or an end of stream in the
    ///   middle of a frame; both are fatal to the connection
    pub async fn read_reply(&mut self) -> Result<Option<Reply>, RespError> {
        if self.offset == self.end && !self.fill().await? {
            return Ok(None);
        }

        self.read_value().await.map(Some)
    }

    fn read_value(&mut self) -> ValueFuture<'_> {
        Box::pin(async move {
            let prefix = self.read_byte().await?;

            match prefix {
                b'+' => Ok(Reply::Status(self.read_line().await?)),
                b'-' => {
                    let line = self.read_line().await?;
                    Ok(Reply::Error(String::from_utf8_lossy(&line).into_owned()))
                }
                b':' => Ok(Reply::Integer(self.read_integer_line().await?)),
                b'$' => {
                    let length = self.read_integer_line().await?;
                    match length {
                        -1 => Ok(Reply::Bulk(None)),
                        n if n >= 0 => {
                            let body = self.read_bulk_body(n as usize).await?;
                            self.burn_crlf().await?;
                            Ok(Reply::Bulk(Some(body)))
                        }
                        other => Err(RespError::InvalidBulkLength(other)),
                    }
                }
                b'*' => {
                    let length = self.read_integer_line().await?;
                    match length {
                        -1 => Ok(Reply::Array(None)),
                        n if n >= 0 => {
                            let mut items = Vec::with_capacity(n as usize);
                            for _ in 0..n {
                                items.push(self.read_value().await?);
                            }
                            Ok(Reply::Array(Some(items)))
                        }
                        other => Err(RespError::InvalidArrayLength(other)),
                    }
                }
                other => Err(RespError::UnexpectedPrefix(other)),
            }
        })
    }

    async fn fill(&mut self) -> Result<bool, RespError> {
        self.offset = 0;
        self.end = 0;

        let bytes_read = self
            .src
            .read(&mut self.buf)
            .await
            .map_err(|e| RespError::Io(e.to_string()))?;

        self.end = bytes_read;
        Ok(bytes_read > 0)
    }

    async fn read_byte(&mut self) -> Result<u8, RespError> {
        if self.offset == self.end && !self.fill().await? {
            return Err(RespError::UnexpectedEof);
        }

        let byte = self.buf[self.offset];
        self.offset += 1;
        Ok(byte)
    }

    /// Reads up to the next CRLF, excluding the terminator.
    ///
    /// The fast path slices the fixed buffer directly; when the line steps
    /// over the buffer it is accumulated byte-wise in the scratch buffer.
    async fn read_line(&mut self) -> Result<Bytes, RespError> {
        if let Some(length) = self.find_crlf_in_buffer() {
            let line = Bytes::copy_from_slice(&self.buf[self.offset..self.offset + length]);
            self.offset += length + 2;
            return Ok(line);
        }

        self.scratch.clear();
        let mut have_cr = false;

        loop {
            let byte = self.read_byte().await?;

            if have_cr {
                if byte == b'\n' {
                    return Ok(self.scratch.split().freeze());
                }
                self.scratch.put_u8(b'\r');
                have_cr = false;
            }

            if byte == b'\r' {
                have_cr = true;
            } else {
                self.scratch.put_u8(byte);
            }
        }
    }

    fn find_crlf_in_buffer(&self) -> Option<usize> {
        self.buf[self.offset..self.end]
            .windows(2)
            .position(|pair| pair == b"\r\n")
    }

    async fn read_integer_line(&mut self) -> Result<i64, RespError> {
        let line = self.read_line().await?;

        if line.is_empty() {
            return Err(RespError::InvalidInteger(String::new()));
        }

        // single digit fast path; the server emits small lengths constantly
        if line.len() == 1 {
            let digit = line[0].wrapping_sub(b'0');
            if digit <= 9 {
                return Ok(i64::from(digit));
            }
        }

        let negative = line[0] == b'-';
        let digits = if negative { &line[1..] } else { &line[..] };

        if digits.is_empty() {
            return Err(RespError::InvalidInteger(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        }

        let mut value: i64 = 0;
        for &byte in digits {
            let digit = byte.wrapping_sub(b'0');
            if digit > 9 {
                return Err(RespError::InvalidInteger(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(digit)))
                .ok_or_else(|| {
                    RespError::InvalidInteger(String::from_utf8_lossy(&line).into_owned())
                })?;
        }

        Ok(if negative { -value } else { value })
    }

    async fn read_bulk_body(&mut self, length: usize) -> Result<Bytes, RespError> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        // fast path: the whole body is already buffered
        if self.end - self.offset >= length {
            let body = Bytes::copy_from_slice(&self.buf[self.offset..self.offset + length]);
            self.offset += length;
            return Ok(body);
        }

        self.scratch.clear();
        self.scratch.reserve(length);

        while self.scratch.len() < length {
            if self.offset == self.end && !self.fill().await? {
                return Err(RespError::UnexpectedEof);
            }

            let take = (length - self.scratch.len()).min(self.end - self.offset);
            self.scratch
                .put_slice(&self.buf[self.offset..self.offset + take]);
            self.offset += take;
        }

        Ok(self.scratch.split().freeze())
    }

    async fn burn_crlf(&mut self) -> Result<(), RespError> {
        if self.read_byte().await? != b'\r' || self.read_byte().await? != b'\n' {
            return Err(RespError::MissingCrlf);
        }
        Ok(())
    }
}

/// Writes the `*<count>\r\n` header that opens every command frame.
pub(crate) fn write_array_header(buf: &mut BytesMut, count: usize) {
    buf.put_u8(b'*');
    buf.put_slice(count.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

/// Writes a binary-safe bulk string argument.
pub(crate) fn write_bulk_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(value.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}

pub(crate) fn write_bulk_str(buf: &mut BytesMut, value: &str) {
    write_bulk_bytes(buf, value.as_bytes());
}

/// Writes an integer argument in its bulk string form.
///
/// Low non-negative integers are extremely common, so values with at most
/// two digits take an inlined `$1`/`$2` path. The encoding is identical to
/// the general one; decoders cannot tell the difference.
pub(crate) fn write_bulk_i64(buf: &mut BytesMut, value: i64) {
    if (0..=9).contains(&value) {
        buf.put_slice(b"$1\r\n");
        buf.put_u8(b'0' + value as u8);
        buf.put_slice(b"\r\n");
        return;
    }

    if (10..=99).contains(&value) {
        buf.put_slice(b"$2\r\n");
        buf.put_u8(b'0' + (value / 10) as u8);
        buf.put_u8(b'0' + (value % 10) as u8);
        buf.put_slice(b"\r\n");
        return;
    }

    write_bulk_str(buf, &value.to_string());
}

/// Writes a float argument; integral values reuse the integer path.
pub(crate) fn write_bulk_f64(buf: &mut BytesMut, value: f64) {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        write_bulk_i64(buf, value as i64);
    } else {
        write_bulk_str(buf, &value.to_string());
    }
}
