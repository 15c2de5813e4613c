//! Length-prefixed message framing for stream sockets.
//!
//! Wire format: a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. Frames concatenate back-to-back on one stream; there
//! is no trailer and no version field. Lengths outside `[1, 10 MiB]` are
//! protocol violations.
//!
//! [`FrameReader`] reassembles one complete payload per call, surviving
//! arbitrarily fragmented arrival, and enforces a deadline so a stalled
//! peer cannot wedge the caller. Every failure, and cancellation of an
//! in-flight read, leaves the reader reset so the connection can be closed
//! or retried cleanly. Readers and writers are per-connection; share them
//! across tasks only with external synchronization.

use crate::error::{ErrorCategory, SentinelError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest admissible payload: 10 MiB.
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;
/// Smallest admissible payload: empty messages are invalid.
pub const MIN_MESSAGE_SIZE: u32 = 1;
/// Length prefix size in bytes.
pub const HEADER_SIZE: usize = 4;
/// Deadline applied by [`FrameReader::new`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Payload bytes are pulled off the socket in chunks of this size.
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    ReadingHeader,
    ReadingPayload,
}

/// Writes length-prefixed messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameWriter;

impl FrameWriter {
    pub fn new() -> Self {
        Self
    }

    /// Frame `payload` and write it until depletion.
    ///
    /// Empty payloads fail with `message_too_small` and payloads over
    /// [`MAX_MESSAGE_SIZE`] fail with `message_too_large`; in both cases
    /// nothing is written to the socket.
    pub async fn write_message<S>(&self, socket: &mut S, payload: &[u8]) -> Result<(), SentinelError>
    where
        S: AsyncWrite + Unpin,
    {
        if payload.is_empty() {
            return Err(SentinelError::new(
                ErrorCategory::MessageTooSmall,
                "cannot send an empty message",
            ));
        }
        if payload.len() > MAX_MESSAGE_SIZE as usize {
            return Err(SentinelError::new(
                ErrorCategory::MessageTooLarge,
                format!(
                    "message of {} bytes exceeds the {} byte limit",
                    payload.len(),
                    MAX_MESSAGE_SIZE
                ),
            ));
        }

        let header = (payload.len() as u32).to_be_bytes();
        socket.write_all(&header).await.map_err(SentinelError::from)?;
        socket.write_all(payload).await.map_err(SentinelError::from)?;
        socket.flush().await.map_err(SentinelError::from)?;
        Ok(())
    }
}

/// Reassembles length-prefixed messages from a stream socket.
///
/// Stateful across partial reads within one call; after any return
/// (payload, error, or cancellation) the reader is back in its initial
/// state.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    expected_length: usize,
    state: ReadState,
    read_start: Option<Instant>,
    timeout: Duration,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            expected_length: 0,
            state: ReadState::ReadingHeader,
            read_start: None,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Replace the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read exactly one complete payload, blocking until it has fully
    /// arrived or the deadline expires.
    ///
    /// Errors: `connection_closed` on EOF before a full frame,
    /// `message_too_small` / `message_too_large` for invalid declared
    /// lengths (detected before any payload byte is consumed),
    /// `read_timeout` when the deadline passes, and mapped I/O errors from
    /// the socket. The reader is reset on every error.
    pub async fn read_complete_message<S>(&mut self, socket: &mut S) -> Result<Vec<u8>, SentinelError>
    where
        S: AsyncRead + Unpin,
    {
        let mut guard = ResetOnDrop { reader: self };
        guard.run(socket).await
    }

    /// True iff a full payload is buffered and the next loop iteration
    /// would return it. Non-blocking.
    pub fn has_complete_message(&self) -> bool {
        self.state == ReadState::ReadingPayload && self.buffer.len() >= self.expected_length
    }

    /// Drop any partial frame and return to the initial state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_length = 0;
        self.state = ReadState::ReadingHeader;
        self.read_start = None;
    }
}

/// Resets the reader when the read finishes, fails, or is cancelled
/// mid-message. Partial buffers are never observable after a call.
struct ResetOnDrop<'a> {
    reader: &'a mut FrameReader,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.reader.reset();
    }
}

impl ResetOnDrop<'_> {
    async fn run<S>(&mut self, socket: &mut S) -> Result<Vec<u8>, SentinelError>
    where
        S: AsyncRead + Unpin,
    {
        let reader = &mut *self.reader;
        let started = *reader.read_start.get_or_insert_with(Instant::now);

        loop {
            let remaining = match reader.timeout.checked_sub(started.elapsed()) {
                Some(remaining) => remaining,
                None => {
                    tracing::debug!(timeout = ?reader.timeout, "frame read timed out");
                    return Err(read_timeout_error(reader.timeout));
                }
            };

            match reader.state {
                ReadState::ReadingHeader => {
                    let needed = HEADER_SIZE - reader.buffer.len();
                    let n = read_chunk(socket, needed, remaining, &mut reader.buffer).await?;
                    if n == 0 {
                        return Err(SentinelError::new(
                            ErrorCategory::ConnectionClosed,
                            "connection closed while reading message header",
                        ));
                    }
                    if reader.buffer.len() >= HEADER_SIZE {
                        let b = &reader.buffer;
                        let declared = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
                        if declared < MIN_MESSAGE_SIZE {
                            return Err(SentinelError::new(
                                ErrorCategory::MessageTooSmall,
                                "peer declared a zero-length message",
                            ));
                        }
                        if declared > MAX_MESSAGE_SIZE {
                            tracing::warn!(
                                declared,
                                limit = MAX_MESSAGE_SIZE,
                                "peer declared an oversized message"
                            );
                            return Err(SentinelError::new(
                                ErrorCategory::MessageTooLarge,
                                format!(
                                    "peer declared a {declared} byte message, limit is {MAX_MESSAGE_SIZE}"
                                ),
                            ));
                        }
                        reader.buffer.clear();
                        reader.expected_length = declared as usize;
                        reader.state = ReadState::ReadingPayload;
                    }
                }
                ReadState::ReadingPayload => {
                    if reader.buffer.len() >= reader.expected_length {
                        let mut payload = std::mem::take(&mut reader.buffer);
                        payload.truncate(reader.expected_length);
                        return Ok(payload);
                    }
                    let to_read =
                        READ_CHUNK_SIZE.min(reader.expected_length - reader.buffer.len());
                    let n = read_chunk(socket, to_read, remaining, &mut reader.buffer).await?;
                    if n == 0 {
                        return Err(SentinelError::new(
                            ErrorCategory::ConnectionClosed,
                            "connection closed while reading message payload",
                        ));
                    }
                }
            }
        }
    }
}

/// Read up to `to_read` bytes into `buffer`, bounded by `remaining` time.
/// Returns the number of bytes read; zero means EOF.
async fn read_chunk<S>(
    socket: &mut S,
    to_read: usize,
    remaining: Duration,
    buffer: &mut Vec<u8>,
) -> Result<usize, SentinelError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; to_read];
    let n = tokio::time::timeout(remaining, socket.read(&mut chunk))
        .await
        .map_err(|_| read_timeout_error(remaining))?
        .map_err(SentinelError::from)?;
    buffer.extend_from_slice(&chunk[..n]);
    Ok(n)
}

fn read_timeout_error(timeout: Duration) -> SentinelError {
    SentinelError::new(
        ErrorCategory::ReadTimeout,
        format!("no complete message within {timeout:?}"),
    )
}
