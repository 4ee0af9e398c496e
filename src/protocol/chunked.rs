//! Chunked message transport.
//!
//! The radio accepts at most `chunk-size` bytes per write, so a logical message is
//! sent as consecutive chunks followed by a one-byte terminator write:
//!
//! ```text
//! payload (45 bytes, chunk-size 20):
//!   write 1: bytes  0..20
//!   write 2: bytes 20..40
//!   write 3: bytes 40..45
//!   write 4: "\n"
//! ```
//!
//! The receiver appends every chunk to a per-connection buffer and yields a message
//! once the buffer ends with the terminator. Writes are fire-and-forget with a fixed
//! pacing gap between them.
//!
//! A message that fails after some of its chunks went out leaves those chunks in the
//! receiver's buffer. The sender closes such a torn frame with a terminator, either at
//! once or before its next message, so the receiver drops only the broken message. An
//! empty frame carries no message.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer, with_timeout};

use crate::config::TransportConfig;
use crate::error::{ProtocolError, TransportError};

use super::link::ByteLink;

/// Delimiter closing every logical message. Never appears inside an encoded payload.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Transmit state of a `ChunkSender`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Sending,
}

/// Outgoing half of the chunked transport.
///
/// Only one message is on the air at a time: the transmit lock is held from the first
/// chunk through the terminator. `send` waits for an in-progress message to finish,
/// `try_send` refuses with `TransportError::Busy`.
pub struct ChunkSender {
    chunk_size: usize,
    pacing: Duration,
    write_timeout: Option<Duration>,
    /// Guards the air.
    tx: Mutex<CriticalSectionRawMutex, TxLine>,
}

#[derive(Debug, Default)]
struct TxLine {
    /// Chunks of an aborted message are still unterminated at the receiver.
    torn: bool,
}

impl ChunkSender {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_limits(config.chunk_size, config.pacing(), config.send_timeout())
    }

    pub fn with_limits(chunk_size: usize, pacing: Duration, write_timeout: Option<Duration>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pacing,
            write_timeout,
            tx: Mutex::new(TxLine::default()),
        }
    }

    pub fn state(&self) -> TxState {
        match self.tx.try_lock() {
            Ok(_) => TxState::Idle,
            Err(_) => TxState::Sending,
        }
    }

    /// Send one message, queueing behind any message already in flight.
    ///
    /// Returns the number of link writes issued, terminators included.
    pub async fn send<L: ByteLink>(&self, link: &L, payload: &[u8]) -> Result<usize, TransportError> {
        check_payload(payload)?;
        let mut line = self.tx.lock().await;
        self.transmit(&mut line, link, payload).await
    }

    /// Send one message only if nothing else is in flight.
    pub async fn try_send<L: ByteLink>(&self, link: &L, payload: &[u8]) -> Result<usize, TransportError> {
        check_payload(payload)?;
        let mut line = self.tx.try_lock().map_err(|_| TransportError::Busy)?;
        self.transmit(&mut line, link, payload).await
    }

    async fn transmit<L: ByteLink>(&self, line: &mut TxLine, link: &L, payload: &[u8]) -> Result<usize, TransportError> {
        let mut writes = 0;
        if line.torn {
            self.write(link, &[FRAME_TERMINATOR]).await?;
            line.torn = false;
            writes += 1;
            log::debug!("Closed torn frame before next message");
        }

        for (index, chunk) in payload.chunks(self.chunk_size).enumerate() {
            if let Err(e) = self.write(link, chunk).await {
                if index > 0 {
                    self.close_torn_frame(line, link).await;
                }
                return Err(e);
            }
            writes += 1;
            if self.pacing > Duration::from_ticks(0) {
                Timer::after(self.pacing).await;
            }
        }

        if let Err(e) = self.write(link, &[FRAME_TERMINATOR]).await {
            line.torn = true;
            return Err(e);
        }
        Ok(writes + 1)
    }

    /// Best-effort terminator after a failed chunk. On failure the next message retries it.
    async fn close_torn_frame<L: ByteLink>(&self, line: &mut TxLine, link: &L) {
        if let Err(e) = self.write(link, &[FRAME_TERMINATOR]).await {
            log::debug!("Torn frame left open: {}", e);
            line.torn = true;
        }
    }

    async fn write<L: ByteLink>(&self, link: &L, bytes: &[u8]) -> Result<(), TransportError> {
        match self.write_timeout {
            Some(timeout) => with_timeout(timeout, link.write(bytes))
                .await
                .map_err(|_| TransportError::Timeout(timeout.as_millis()))??,
            None => link.write(bytes).await?,
        }
        Ok(())
    }
}

fn check_payload(payload: &[u8]) -> Result<(), TransportError> {
    match payload.iter().position(|&b| b == FRAME_TERMINATOR) {
        Some(offset) => Err(TransportError::EmbeddedTerminator(offset)),
        None => Ok(()),
    }
}

/// Incoming half of the chunked transport, one per connection.
#[derive(Debug, Clone)]
pub struct Reassembler {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Reassembler {
    pub fn new(max_len: usize) -> Self {
        Self { buffer: Vec::new(), max_len }
    }

    /// Append a received chunk.
    ///
    /// Returns the complete message (terminator stripped) once the buffer ends with the
    /// terminator, `None` while incomplete or for an empty frame. A buffer that outgrows `max_len` without a
    /// terminator is discarded and reported as `StreamOverflow`.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.last() == Some(&FRAME_TERMINATOR) {
            self.buffer.pop();
            if self.buffer.is_empty() {
                return Ok(None);
            }
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }

        if self.buffer.len() > self.max_len {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(ProtocolError::StreamOverflow { len, max: self.max_len });
        }

        Ok(None)
    }

    /// Bytes held for a message that has not completed yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
