//! Framed DAP transport.
//!
//! Wire format: a UTF-8 JSON body prefixed by HTTP-style headers terminated
//! with `\r\n\r\n`; the only required header is `Content-Length` (header
//! names are case-insensitive). [`FrameDecoder`] reassembles messages from
//! arbitrarily-split reads; [`Transport`] drives an async byte stream,
//! typically the stdio of an adapter child process.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DapError;
use crate::protocol::Message;

/// Encode a message into its wire form: `Content-Length` header plus body.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, DapError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| DapError::TransportFailure(format!("message encoding failed: {e}")))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder.
///
/// Feed it byte chunks as they arrive; it yields decoded messages and
/// framing errors. A malformed header discards the whole buffer (there is
/// no defined resync point), while an undecodable JSON body only skips
/// that one message, since the framing around it was still valid.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and drain every complete message from the buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Message, DapError>> {
        self.buf.extend_from_slice(bytes);
        let mut decoded = Vec::new();

        loop {
            let Some(header_end) = find_subsequence(&self.buf, b"\r\n\r\n") else {
                break;
            };

            let content_length = match parse_content_length(&self.buf[..header_end]) {
                Ok(length) => length,
                Err(err) => {
                    decoded.push(Err(err));
                    self.buf.clear();
                    continue;
                }
            };

            let body_start = header_end + 4;
            let body_end = body_start + content_length;
            if self.buf.len() < body_end {
                break;
            }

            let item = serde_json::from_slice::<Message>(&self.buf[body_start..body_end])
                .map_err(|e| DapError::InvalidMessage(format!("undecodable message body: {e}")));
            decoded.push(item);
            self.buf.drain(..body_end);
        }

        decoded
    }

    /// Bytes currently buffered awaiting the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, DapError> {
    let header = std::str::from_utf8(header)
        .map_err(|e| DapError::InvalidMessage(format!("non-UTF-8 header block: {e}")))?;
    for line in header.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            return value.parse::<usize>().map_err(|e| {
                DapError::InvalidMessage(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(DapError::InvalidMessage(
        "missing Content-Length header".into(),
    ))
}

/// Handler invoked for every decoded message or framing error.
pub type IngressHandler =
    Box<dyn FnMut(Result<Message, DapError>) -> BoxFuture<'static, ()> + Send>;

/// Async transport over a bidirectional byte stream.
///
/// Writes are atomic at message granularity (one lock acquisition covers
/// the whole frame). `close` is idempotent; after it, `send` fails and no
/// further ingress handler invocations occur.
pub struct Transport {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    reader: Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap a reader/writer pair (adapter stdout/stdin, a socket, or an
    /// in-memory duplex in tests).
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            reader: Mutex::new(Some(Box::new(reader))),
            reader_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Encode and write one message.
    ///
    /// A failed write leaves the stream in an unspecified state, so the
    /// transport marks itself closed.
    pub async fn send(&self, message: &Message) -> Result<(), DapError> {
        let frame = encode_message(message)?;
        let mut writer = self.writer.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(DapError::TransportFailure("transport is closed".into()));
        }
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(err) = result {
            self.closed.store(true, Ordering::SeqCst);
            return Err(DapError::TransportFailure(format!(
                "write failed mid-message: {err}"
            )));
        }
        Ok(())
    }

    /// Start the receive loop, invoking `handler` for every decoded
    /// message or framing error.
    ///
    /// Read errors and end-of-stream are surfaced to the handler as a
    /// single final [`DapError::TransportFailure`]. Calling this twice is
    /// a no-op.
    pub fn start_receiving(&self, mut handler: IngressHandler) {
        let Some(mut reader) = self.reader.lock().take() else {
            debug!("transport receive loop already started");
            return;
        };
        let task = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        handler(Err(DapError::TransportFailure(
                            "adapter closed the stream".into(),
                        )))
                        .await;
                        break;
                    }
                    Ok(n) => {
                        for item in decoder.feed(&chunk[..n]) {
                            handler(item).await;
                        }
                    }
                    Err(err) => {
                        handler(Err(DapError::TransportFailure(format!(
                            "read failed: {err}"
                        ))))
                        .await;
                        break;
                    }
                }
            }
        });
        *self.reader_task.lock() = Some(task);
    }

    /// Whether the transport has been closed (or died on a failed write).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the transport. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
