//! Framed DNS exchange over a tunnel stream.
//!
//! DNS over a stream transport uses a 16-bit big-endian length prefix in
//! front of each message, the same framing as DNS over TCP. [`DnsStream`]
//! implements one request/response round trip over any async stream, with
//! deadline-aware variants for the lookup path.
//!
//! The length read tolerates a one-byte short read: some middleboxes hand
//! the two prefix bytes over in separate segments, so a second read picks
//! up the remaining byte instead of failing.

use std::io;

use hickory_proto::op::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::deadline::Deadline;
use crate::error::LookupError;

/// Largest message accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// One DNS conversation over a length-prefixed stream.
#[derive(Debug)]
pub struct DnsStream<S> {
    inner: S,
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> DnsStream<S> {
    /// Wrap a stream obtained from a tunnel session.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Serialize `msg` and send it with its length prefix in one write.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::WriteMessage`] when serialization or the
    /// write fails.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), LookupError> {
        let body = msg.to_vec().map_err(LookupError::write)?;
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(LookupError::write(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {} bytes exceeds the frame limit", body.len()),
            )));
        }

        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&u16::try_from(body.len()).unwrap_or(u16::MAX).to_be_bytes());
        frame.extend_from_slice(&body);

        self.inner
            .write_all(&frame)
            .await
            .map_err(LookupError::write)?;
        self.inner.flush().await.map_err(LookupError::write)
    }

    /// Read one length-prefixed message.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ReadMessage`] when the read or
    /// deserialization fails, including an empty frame.
    pub async fn read_message(&mut self) -> Result<Message, LookupError> {
        let len = self.read_frame_len().await?;
        if len == 0 {
            return Err(LookupError::read(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty DNS frame",
            )));
        }

        let mut body = vec![0u8; len];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(LookupError::read)?;

        Message::from_vec(&body).map_err(LookupError::read)
    }

    /// [`Self::write_message`] bounded by a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ConnectionTimeout`] when the deadline fires
    /// mid-write, otherwise the write error.
    pub async fn write_message_deadline(
        &mut self,
        ctx: &Deadline,
        msg: &Message,
    ) -> Result<(), LookupError> {
        ctx.bound(self.write_message(msg)).await?
    }

    /// [`Self::read_message`] bounded by a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::ConnectionTimeout`] when the deadline fires
    /// mid-read, otherwise the read error.
    pub async fn read_message_deadline(&mut self, ctx: &Deadline) -> Result<Message, LookupError> {
        ctx.bound(self.read_message()).await?
    }

    /// Read the two-byte length prefix, tolerating a one-byte short read.
    async fn read_frame_len(&mut self) -> Result<usize, LookupError> {
        let mut prefix = [0u8; 2];
        let n = self
            .inner
            .read(&mut prefix)
            .await
            .map_err(LookupError::read)?;

        match n {
            0 => {
                return Err(LookupError::read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before the length prefix",
                )))
            }
            1 => {
                self.inner
                    .read_exact(&mut prefix[1..])
                    .await
                    .map_err(LookupError::read)?;
            }
            _ => {}
        }

        Ok(usize::from(u16::from_be_bytes(prefix)))
    }
}
