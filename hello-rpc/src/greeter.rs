//! Message types and typed stub of the greeting service
//!
//! This module is shaped like the output of a schema compiler and is
//! maintained by hand here: plain data records for the request and
//! reply, the published service name, and a client stub binding a
//! [`Client`] to the service's single procedure. The library core only
//! consumes this interface; schema conformance is not validated beyond
//! what serialization itself enforces.

use serde::{Deserialize, Serialize};

use crate::client::{Call, Client};

/// Name the greeting service is published under
pub const GREETER_SERVICE_NAME: &str = "Greeter";

/// Request of the `say_hello` procedure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    /// Name to greet. Takes the schema default (empty string) when not
    /// set by the caller.
    pub name: String,
}

/// Reply of the `say_hello` procedure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloReply {
    /// Greeting produced by the server
    pub message: String,
}

/// Typed stub binding a [`Client`] to the greeting service.
///
/// The stub is stateless; it borrows its `Client` and therefore cannot
/// outlive the channel it is bound to.
pub struct GreeterClient<'c> {
    client: &'c Client,
    service_name: &'c str,
}

impl<'c> GreeterClient<'c> {
    /// Binds a client to the greeting service
    pub fn bind(client: &'c Client) -> Self {
        Self {
            client,
            service_name: GREETER_SERVICE_NAME,
        }
    }

    /// Invokes the `say_hello` procedure on the remote
    pub fn say_hello(&self, args: HelloRequest) -> Call<HelloReply> {
        self.client
            .call(format!("{}.say_hello", self.service_name), args)
    }
}

/// Attaches the greeting stub to every [`Client`]
pub trait GreeterClientStub {
    /// Returns a stub bound to this client
    fn greeter(&self) -> GreeterClient<'_>;
}

impl GreeterClientStub for Client {
    fn greeter(&self) -> GreeterClient<'_> {
        GreeterClient::bind(self)
    }
}
