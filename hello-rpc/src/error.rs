//! Custom errors

use crate::message::MessageId;

/// Errors surfaced by endpoint parsing, connection management and RPC calls
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint is structurally malformed. Raised before any network
    /// activity takes place.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The underlying connection could not be established when dialing
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// IO failure on an established connection
    #[error("{0:?}")]
    Io(#[from] std::io::Error),

    /// Serialization of a request or deserialization of a response failed.
    /// Usually indicates a schema mismatch between client and server.
    #[error("{0}")]
    Parse(Box<dyn std::error::Error + Send + Sync>),

    /// The client machinery misbehaved (lost internal channel, join error)
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),

    /// The remote executed the procedure and reported an application fault
    #[error("remote error (code {code}): {message}")]
    Remote {
        /// Status code chosen by the server
        code: u32,
        /// Human readable fault description
        message: String,
    },

    /// The call was cancelled before a response arrived
    #[error("request ({0}) is canceled")]
    Canceled(MessageId),

    /// The armed deadline elapsed before a response arrived.
    ///
    /// The deadline is tracked on the client only, so a response may
    /// arrive just as the deadline elapses and still be reported as
    /// exceeded.
    #[error("request ({0}) reached deadline")]
    DeadlineExceeded(MessageId),

    /// A call was attempted on a channel that has been closed
    #[error("channel closed")]
    ChannelClosed,
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Parse(err)
    }
}

impl From<erased_serde::Error> for Error {
    fn from(err: erased_serde::Error) -> Self {
        Self::Parse(Box::new(err))
    }
}

// Internal channel sends only fail once the background loops have been
// stopped, which happens on close.
impl<T> From<flume::SendError<T>> for Error {
    fn from(_: flume::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
