//! Transport layer for the framed binary protocol

use async_trait::async_trait;

pub mod frame;

/// Graceful shutdown of the writing half of a connection.
///
/// Writes whatever end-of-stream marker the transport defines so the
/// peer can distinguish an orderly close from a dropped connection.
#[async_trait]
pub trait GracefulShutdown {
    /// Signals end of stream to the peer
    async fn close(&mut self);
}
