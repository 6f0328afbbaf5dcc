//! RESP wire codec: frame values, incremental parsing, and pipelined writing
//!
//! The parser never consumes bytes from the buffer until a full frame is
//! available, so callers can feed partial network reads and retry.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::str;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};

/// Flush the pipelined writer early once this many encoded bytes pile up.
const SPILL_BYTES: usize = 64 * 1024;

/// RESP data types.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n), None represents NULL
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...), None represents NULL array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Build a bulk string frame, the building block of commands.
    pub fn bulk<B: Into<Bytes>>(data: B) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, RespValue::SimpleString(_))
    }

    /// Frame type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk",
            RespValue::Array(_) => "array",
        }
    }
}

/// Codec error types.
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("invalid RESP frame: {0}")]
    InvalidFormat(String),
    #[error("invalid integer in frame: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),
    #[error("invalid UTF-8 in frame: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("connection closed before a full frame arrived")]
    UnexpectedEof,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame; nothing is
/// consumed in that case.
pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
    match probe(buf, 0)? {
        Some((value, end)) => {
            buf.advance(end);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Decode the frame starting at `pos` without consuming anything.
///
/// On success returns the value and the offset one past its final byte.
fn probe(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    match tag {
        b'+' => Ok(line(buf, pos + 1)?.map(|(text, end)| {
            (RespValue::SimpleString(text), end)
        })),
        b'-' => Ok(line(buf, pos + 1)?.map(|(text, end)| (RespValue::Error(text), end))),
        b':' => match line(buf, pos + 1)? {
            Some((text, end)) => Ok(Some((RespValue::Integer(text.trim().parse()?), end))),
            None => Ok(None),
        },
        b'$' => {
            let Some((len, body)) = length(buf, pos + 1)? else {
                return Ok(None);
            };
            if len < 0 {
                return Ok(Some((RespValue::BulkString(None), body)));
            }
            let len = len as usize;
            if buf.len() < body + len + 2 {
                return Ok(None);
            }
            if &buf[body + len..body + len + 2] != b"\r\n" {
                return Err(RespError::InvalidFormat(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[body..body + len]);
            Ok(Some((RespValue::BulkString(Some(data)), body + len + 2)))
        }
        b'*' => {
            let Some((len, mut next)) = length(buf, pos + 1)? else {
                return Ok(None);
            };
            if len < 0 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                match probe(buf, next)? {
                    Some((item, end)) => {
                        items.push(item);
                        next = end;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), next)))
        }
        other => Err(RespError::InvalidFormat(format!(
            "unknown frame tag: 0x{:02x}",
            other
        ))),
    }
}

/// Read a CRLF-terminated line starting at `start`, as owned text.
fn line(buf: &[u8], start: usize) -> Result<Option<(String, usize)>, RespError> {
    match find_crlf(buf, start) {
        Some(end) => {
            let text = str::from_utf8(&buf[start..end])?.to_string();
            Ok(Some((text, end + 2)))
        }
        None => Ok(None),
    }
}

/// Read a CRLF-terminated signed length starting at `start`.
fn length(buf: &[u8], start: usize) -> Result<Option<(i64, usize)>, RespError> {
    match find_crlf(buf, start) {
        Some(end) => {
            let len: i64 = str::from_utf8(&buf[start..end])?.trim().parse()?;
            Ok(Some((len, end + 2)))
        }
        None => Ok(None),
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    buf[start.min(buf.len())..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| start + i)
}

/// Encode one frame into `buf`.
pub fn encode(value: &RespValue, buf: &mut BytesMut) {
    match value {
        RespValue::SimpleString(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            buf.put_u8(b':');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
        RespValue::BulkString(Some(data)) => {
            buf.put_u8(b'$');
            buf.put_slice(data.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(data);
            buf.put_slice(b"\r\n");
        }
        RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode(item, buf);
            }
        }
    }
}

/// Encode a command as a multi-bulk array of its frames.
pub fn encode_multi_bulk(multi: &[RespValue], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(multi.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for frame in multi {
        encode(frame, buf);
    }
}

/// Incremental frame decoder over an async byte stream.
pub struct RespReader<R> {
    inner: R,
    buf: BytesMut,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            timeout: None,
        }
    }

    /// Apply `limit` to every read from the underlying stream.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Decode the next frame, reading from the stream as needed.
    pub async fn decode(&mut self) -> Result<RespValue, RespError> {
        loop {
            if let Some(value) = parse(&mut self.buf)? {
                return Ok(value);
            }
            let n = match self.timeout {
                Some(limit) => timeout(limit, self.inner.read_buf(&mut self.buf))
                    .await
                    .map_err(|_| {
                        io::Error::new(io::ErrorKind::TimedOut, "read from backend timed out")
                    })??,
                None => self.inner.read_buf(&mut self.buf).await?,
            };
            if n == 0 {
                return Err(RespError::UnexpectedEof);
            }
        }
    }
}

/// Pipelined command writer.
///
/// Commands accumulate in an internal buffer; [`flush`] pushes them to the
/// socket when forced, when `max_buffered` commands are pending, or when
/// `max_interval` has passed since the last flush. Oversized buffers spill
/// to the socket during [`encode_multi_bulk`] regardless of policy.
///
/// [`flush`]: FlushWriter::flush
/// [`encode_multi_bulk`]: FlushWriter::encode_multi_bulk
pub struct FlushWriter<W> {
    inner: W,
    buf: BytesMut,
    buffered: usize,
    max_buffered: usize,
    max_interval: Duration,
    last_flush: Instant,
    timeout: Option<Duration>,
}

impl<W: AsyncWrite + Unpin> FlushWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8192),
            buffered: 0,
            max_buffered: 256,
            max_interval: Duration::from_millis(1),
            last_flush: Instant::now(),
            timeout: None,
        }
    }

    pub fn max_buffered(mut self, count: usize) -> Self {
        self.max_buffered = count.max(1);
        self
    }

    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Apply `limit` to every write to the underlying stream.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Append one command to the pipeline buffer.
    pub async fn encode_multi_bulk(&mut self, multi: &[RespValue]) -> io::Result<()> {
        encode_multi_bulk(multi, &mut self.buf);
        self.buffered += 1;
        if self.buf.len() >= SPILL_BYTES {
            self.write_out().await?;
        }
        Ok(())
    }

    /// Flush buffered commands if `force` or a threshold is crossed.
    pub async fn flush(&mut self, force: bool) -> io::Result<()> {
        if !force
            && self.buffered < self.max_buffered
            && self.last_flush.elapsed() < self.max_interval
        {
            return Ok(());
        }
        self.write_out().await
    }

    async fn write_out(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let limit = self.timeout;
            let inner = &mut self.inner;
            let buf = &self.buf;
            let write = async move {
                inner.write_all(buf).await?;
                inner.flush().await
            };
            match limit {
                Some(limit) => timeout(limit, write).await.map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "write to backend timed out")
                })??,
                None => write.await?,
            }
            self.buf.clear();
        }
        self.buffered = 0;
        self.last_flush = Instant::now();
        Ok(())
    }
}
