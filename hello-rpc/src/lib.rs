#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # An async RPC client for a greeting service over a framed binary TCP protocol.
//!
//! The crate provides a managed connection to a fixed remote endpoint
//! and a single synchronous unary call on top of it. An [`Endpoint`]
//! names the remote, a [`Client`] owns exactly one connection to it,
//! and the typed stub in [`greeter`] binds the client to the greeting
//! service's `say_hello` procedure.
//!
//! Connection establishment is eager: [`Client::dial`] fails with
//! [`Error::Connect`] when the remote is unreachable, so connect
//! failures are diagnosable separately from call failures. The
//! connection is released when [`Client::close`] is called or when the
//! `Client` is dropped, whichever happens first, on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use hello_rpc::greeter::{GreeterClient, HelloRequest};
//! use hello_rpc::{Client, Endpoint};
//!
//! # async fn run() -> Result<(), hello_rpc::Error> {
//! let endpoint: Endpoint = "127.0.0.1:50051".parse()?;
//! let client = Client::dial(&endpoint).await?;
//!
//! let greeter = GreeterClient::bind(&client);
//! let reply = greeter
//!     .say_hello(HelloRequest {
//!         name: "World".to_string(),
//!     })
//!     .await?;
//! println!("Greeting: {}", reply.message);
//!
//! client.close().await;
//! # Ok(()) }
//! ```

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod greeter;
pub mod message;
pub mod transport;

pub use client::{Call, Client};
pub use endpoint::Endpoint;
pub use error::Error;
