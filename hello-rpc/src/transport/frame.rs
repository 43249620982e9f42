//! Binary frame protocol
//!
//! Every message travels as one frame: a magic byte, a fixed-size
//! fixint-encoded [`FrameHeader`], then `payload_len` payload bytes.
//! A request or response is a header frame followed by a body frame
//! carrying the same message id. A trailer frame with the reserved
//! frame id and an empty payload marks graceful end of stream.

use async_trait::async_trait;
use bincode::{DefaultOptions, Options};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::message::MessageId;
use crate::transport::GracefulShutdown;

const INVALID_PROTOCOL: &str =
    "magic byte mismatch; peer may be using a different protocol or version";

type FrameId = u8;
type PayloadLen = u32;

const MAGIC: u8 = 11;
const END_FRAME_ID: FrameId = 255;

lazy_static! {
    static ref HEADER_LEN: usize =
        bincode::serialized_size(&FrameHeader::default()).unwrap() as usize;
}

/// Reads one frame off the wire
#[async_trait]
pub trait FrameRead {
    /// Reads the next frame. Returns `None` on end of stream, whether
    /// signalled by a trailer frame or by the peer closing the
    /// connection.
    async fn read_frame(&mut self) -> Option<Result<Frame, Error>>;
}

/// Writes one frame onto the wire
#[async_trait]
pub trait FrameWrite {
    /// Writes a complete frame and flushes it
    async fn write_frame(&mut self, frame: Frame) -> Result<(), Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FrameHeader {
    message_id: MessageId,
    frame_id: FrameId,
    payload_type: u8,
    payload_len: PayloadLen,
}

impl FrameHeader {
    fn new(
        message_id: MessageId,
        frame_id: FrameId,
        payload_type: PayloadType,
        payload_len: PayloadLen,
    ) -> Self {
        Self {
            message_id,
            frame_id,
            payload_type: payload_type.into(),
            payload_len,
        }
    }

    fn from_slice(buf: &[u8]) -> Result<Self, Error> {
        DefaultOptions::new()
            .with_fixint_encoding()
            .deserialize(buf)
            .map_err(|err| Error::Parse(err))
    }

    fn to_vec(&self) -> Result<Vec<u8>, Error> {
        DefaultOptions::new()
            .with_fixint_encoding()
            .serialize(self)
            .map_err(|err| Error::Parse(err))
    }
}

/// Kind of payload a frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Request or response header
    Header,
    /// Message body
    Data,
    /// End-of-stream marker
    Trailer,
}

impl From<u8> for PayloadType {
    fn from(t: u8) -> Self {
        match t {
            0 => Self::Header,
            1 => Self::Data,
            _ => Self::Trailer,
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(t: PayloadType) -> Self {
        match t {
            PayloadType::Header => 0,
            PayloadType::Data => 1,
            PayloadType::Trailer => 2,
        }
    }
}

/// One unit of transmission on the wire
#[derive(Debug)]
pub struct Frame {
    /// Id of the message this frame belongs to
    pub message_id: MessageId,
    /// Ordinal of the frame within the message
    pub frame_id: FrameId,
    /// Kind of payload carried
    pub payload_type: PayloadType,
    /// Serialized payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a new frame
    pub fn new(
        message_id: MessageId,
        frame_id: FrameId,
        payload_type: PayloadType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            frame_id,
            payload_type,
            payload,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + Sync> FrameRead for R {
    async fn read_frame(&mut self) -> Option<Result<Frame, Error>> {
        // EOF on the magic byte is a clean end of stream
        let mut magic = [0u8; 1];
        self.read_exact(&mut magic).await.ok()?;
        if magic[0] != MAGIC {
            return Some(Err(Error::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                INVALID_PROTOCOL,
            ))));
        }

        let mut buf = vec![0u8; *HEADER_LEN];
        if let Err(err) = self.read_exact(&mut buf).await {
            return Some(Err(err.into()));
        }
        let header = match FrameHeader::from_slice(&buf) {
            Ok(header) => header,
            Err(err) => return Some(Err(err)),
        };

        if let PayloadType::Trailer = header.payload_type.into() {
            if header.frame_id == END_FRAME_ID && header.payload_len == 0 {
                return None;
            }
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        if let Err(err) = self.read_exact(&mut payload).await {
            return Some(Err(err.into()));
        }

        Some(Ok(Frame::new(
            header.message_id,
            header.frame_id,
            header.payload_type.into(),
            payload,
        )))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + Sync> FrameWrite for W {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let Frame {
            message_id,
            frame_id,
            payload_type,
            payload,
        } = frame;

        if payload.len() > PayloadLen::MAX as usize {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "payload length {} exceeds maximum of {}",
                    payload.len(),
                    PayloadLen::MAX
                ),
            )));
        }

        let header = FrameHeader::new(message_id, frame_id, payload_type, payload.len() as u32);

        self.write_all(&[MAGIC]).await?;
        self.write_all(&header.to_vec()?).await?;
        self.write_all(&payload).await?;
        self.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl<W> GracefulShutdown for W
where
    W: FrameWrite + Send,
{
    async fn close(&mut self) {
        let end_frame = Frame::new(0, END_FRAME_ID, PayloadType::Trailer, Vec::new());
        if let Err(err) = self.write_frame(end_frame).await {
            log::error!("{:?}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_length() {
        let serialized = bincode::serialized_size(&FrameHeader::default()).unwrap() as usize;
        assert_eq!(serialized, *HEADER_LEN);
        assert_eq!(serialized, 8);
    }

    #[test]
    fn trailer_frame_ends_stream() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (mut tx, mut rx) = tokio::io::duplex(64);
            GracefulShutdown::close(&mut tx).await;
            assert!(rx.read_frame().await.is_none());
        });
    }

    #[test]
    fn magic_mismatch_is_an_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (mut tx, mut rx) = tokio::io::duplex(64);
            tx.write_all(&[0u8]).await.unwrap();
            let result = rx.read_frame().await.unwrap();
            assert!(matches!(result, Err(Error::Io(_))));
        });
    }
}
