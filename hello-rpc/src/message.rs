//! Wire-level request and response headers

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicU16;

/// Type of message id is u16
pub type MessageId = u16;

/// Atomic type of MessageId
pub type AtomicMessageId = AtomicU16;

/// Returning the metadata
pub trait Metadata {
    /// Message id carried by the header
    fn id(&self) -> MessageId;
}

/// Header of a request
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RequestHeader {
    /// Id correlating this request with its response
    pub id: MessageId,
    /// Procedure name in `"Service.method"` form
    pub service_method: String,
}

impl Metadata for RequestHeader {
    fn id(&self) -> MessageId {
        self.id
    }
}

/// Header of a response
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ResponseHeader {
    /// Id of the request this response answers
    pub id: MessageId,
    /// Whether the body carries a [`ServerFault`] instead of a result
    pub is_error: bool,
}

impl Metadata for ResponseHeader {
    fn id(&self) -> MessageId {
        self.id
    }
}

/// Application fault reported by the remote procedure.
///
/// Sent as the body of a response whose header has `is_error` set.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerFault {
    /// Status code chosen by the server
    pub code: u32,
    /// Human readable fault description
    pub message: String,
}

/// Type-erased request body handed to the writer task
pub(crate) type RequestBody = Box<dyn erased_serde::Serialize + Send + Sync>;

/// Raw response body bytes; `Ok` on success responses, `Err` on faults
pub(crate) type ResponsePayload = Result<Vec<u8>, Vec<u8>>;

/// Messages consumed by the writer task
pub(crate) enum ClientMessage {
    Request(RequestHeader, RequestBody),
    Stop,
}
