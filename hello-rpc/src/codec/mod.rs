//! Marshaling of headers and bodies on top of the frame transport
//!
//! A connection is split into a [`CodecReader`] and a [`CodecWriter`] so
//! that reading and writing can proceed from dedicated tasks without
//! contention.

use async_trait::async_trait;
use erased_serde as erased;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::error::Error;
use crate::message::{Metadata, RequestHeader, ResponseHeader};
use crate::transport::frame::{Frame, FrameRead, FrameWrite, PayloadType};
use crate::transport::GracefulShutdown;

pub(crate) mod bincode;

/// Reading half of a connection
pub struct CodecReader<R> {
    reader: R,
}

impl<R> CodecReader<R> {
    /// Wraps the reading half of a connection
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

/// Writing half of a connection
pub struct CodecWriter<W> {
    writer: W,
}

impl<W> CodecWriter<W> {
    /// Wraps the writing half of a connection
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

/// Splits a duplex stream into framed codec halves
pub fn split<T>(stream: T) -> (CodecWriter<WriteHalf<T>>, CodecReader<ReadHalf<T>>)
where
    T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    let (reader, writer) = io::split(stream);
    (CodecWriter::new(writer), CodecReader::new(reader))
}

/// Serializes a value into payload bytes
pub trait Marshal {
    /// Serializes `val` with the wire encoding
    fn marshal<S: serde::Serialize>(val: &S) -> Result<Vec<u8>, Error>;
}

/// Deserializes a value from payload bytes
pub trait Unmarshal {
    /// Deserializes a value of type `D` from `buf`
    fn unmarshal<'de, D: serde::Deserialize<'de>>(buf: &'de [u8]) -> Result<D, Error>;
}

/// Client-side read operations on a connection
#[async_trait]
pub trait CodecRead: Unmarshal + Send {
    /// Reads the next response header. `None` means end of stream.
    async fn read_response_header(&mut self) -> Option<Result<ResponseHeader, Error>>;

    /// Reads the next response body as raw payload bytes
    async fn read_response_body(&mut self) -> Option<Result<Vec<u8>, Error>>;
}

/// Client-side write operations on a connection
#[async_trait]
pub trait CodecWrite: Marshal + Send {
    /// Writes a complete request: header frame followed by body frame
    async fn write_request(
        &mut self,
        header: RequestHeader,
        body: &(dyn erased::Serialize + Send + Sync),
    ) -> Result<(), Error>;

    /// Signals end of stream to the peer before the connection is dropped
    async fn shutdown(&mut self);
}

#[async_trait]
impl<R> CodecRead for CodecReader<R>
where
    R: FrameRead + Send + Sync + Unpin,
{
    async fn read_response_header(&mut self) -> Option<Result<ResponseHeader, Error>> {
        let frame = self.reader.read_frame().await?;
        Some(frame.and_then(|frame| Self::unmarshal(&frame.payload)))
    }

    async fn read_response_body(&mut self) -> Option<Result<Vec<u8>, Error>> {
        let frame = self.reader.read_frame().await?;
        Some(frame.map(|frame| frame.payload))
    }
}

#[async_trait]
impl<W> CodecWrite for CodecWriter<W>
where
    W: FrameWrite + Send + Sync + Unpin,
{
    async fn write_request(
        &mut self,
        header: RequestHeader,
        body: &(dyn erased::Serialize + Send + Sync),
    ) -> Result<(), Error> {
        let id = header.id();

        let buf = Self::marshal(&header)?;
        self.writer
            .write_frame(Frame::new(id, 0, PayloadType::Header, buf))
            .await?;

        let buf = Self::marshal(&body)?;
        self.writer
            .write_frame(Frame::new(id, 1, PayloadType::Data, buf))
            .await?;

        Ok(())
    }

    async fn shutdown(&mut self) {
        self.writer.close().await
    }
}
