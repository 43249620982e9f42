//! End-to-end tests against an in-process fixture server speaking the
//! framed binary protocol over TCP.

use anyhow::Result;
use bincode::Options;
use std::time::Duration;
use tokio::io::{self, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;

use hello_rpc::greeter::{GreeterClientStub, HelloReply, HelloRequest};
use hello_rpc::message::{MessageId, RequestHeader, ResponseHeader, ServerFault};
use hello_rpc::transport::frame::{Frame, FrameRead, FrameWrite, PayloadType};
use hello_rpc::{Call, Client, Endpoint, Error};

const SLOW_REPLY_DELAY: Duration = Duration::from_millis(200);
const METHOD_NOT_FOUND: u32 = 404;

fn marshal<S: serde::Serialize>(val: &S) -> Vec<u8> {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .serialize(val)
        .expect("fixture failed to serialize")
}

fn unmarshal<'de, D: serde::Deserialize<'de>>(buf: &'de [u8]) -> D {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .deserialize(buf)
        .expect("fixture failed to deserialize")
}

/// Binds the fixture server to an ephemeral port and serves greeting
/// requests until the runtime is torn down.
async fn start_fixture() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("cannot bind fixture listener");
    let addr = listener.local_addr().expect("fixture has no local addr");
    task::spawn(serve(listener));
    Endpoint::new(addr.ip().to_string(), addr.port()).expect("fixture endpoint")
}

async fn serve(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                task::spawn(handle_connection(stream));
            }
            Err(_) => return,
        }
    }
}

async fn handle_connection(stream: TcpStream) {
    let (mut reader, mut writer) = io::split(stream);
    // a request is a header frame followed by a body frame
    while let Some(frame) = reader.read_frame().await {
        let frame = frame.expect("malformed request header frame");
        let header: RequestHeader = unmarshal(&frame.payload);
        let body = match reader.read_frame().await {
            Some(body) => body.expect("malformed request body frame"),
            None => return,
        };
        dispatch(&mut writer, header, body.payload).await;
    }
}

async fn dispatch(writer: &mut WriteHalf<TcpStream>, header: RequestHeader, body: Vec<u8>) {
    let id = header.id;
    match header.service_method.as_str() {
        "Greeter.say_hello" => {
            let request: HelloRequest = unmarshal(&body);
            let reply = HelloReply {
                message: format!("Hello, {}", request.name),
            };
            respond(writer, id, false, &reply).await;
        }
        "Greeter.slow_hello" => {
            let request: HelloRequest = unmarshal(&body);
            tokio::time::sleep(SLOW_REPLY_DELAY).await;
            let reply = HelloReply {
                message: format!("Hello, {}", request.name),
            };
            respond(writer, id, false, &reply).await;
        }
        unknown => {
            let fault = ServerFault {
                code: METHOD_NOT_FOUND,
                message: format!("method {} not found", unknown),
            };
            respond(writer, id, true, &fault).await;
        }
    }
}

async fn respond<S: serde::Serialize>(
    writer: &mut WriteHalf<TcpStream>,
    id: MessageId,
    is_error: bool,
    body: &S,
) {
    let header = ResponseHeader { id, is_error };
    writer
        .write_frame(Frame::new(id, 0, PayloadType::Header, marshal(&header)))
        .await
        .expect("fixture failed to write response header");
    writer
        .write_frame(Frame::new(id, 1, PayloadType::Data, marshal(body)))
        .await
        .expect("fixture failed to write response body");
}

async fn run_say_hello_round_trip() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let reply = client
        .greeter()
        .say_hello(HelloRequest {
            name: "World".to_string(),
        })
        .await?;
    assert_eq!(reply.message, "Hello, World");

    client.close().await;
    Ok(())
}

#[test]
fn say_hello_round_trip() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_say_hello_round_trip()).unwrap();
}

async fn run_empty_name_round_trips() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let reply = client.greeter().say_hello(HelloRequest::default()).await?;
    assert_eq!(reply.message, "Hello, ");

    client.close().await;
    Ok(())
}

#[test]
fn empty_name_round_trips() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_empty_name_round_trips()).unwrap();
}

async fn run_sequential_calls_are_independent() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let first = client
        .greeter()
        .say_hello(HelloRequest {
            name: "Alice".to_string(),
        })
        .await?;
    let second = client
        .greeter()
        .say_hello(HelloRequest {
            name: "Bob".to_string(),
        })
        .await?;
    assert_eq!(first.message, "Hello, Alice");
    assert_eq!(second.message, "Hello, Bob");

    client.close().await;
    Ok(())
}

#[test]
fn sequential_calls_are_independent() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_sequential_calls_are_independent()).unwrap();
}

async fn run_concurrent_calls_share_the_channel() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let (first, second) = futures::join!(
        client.greeter().say_hello(HelloRequest {
            name: "Alice".to_string(),
        }),
        client.greeter().say_hello(HelloRequest {
            name: "Bob".to_string(),
        }),
    );
    assert_eq!(first?.message, "Hello, Alice");
    assert_eq!(second?.message, "Hello, Bob");

    client.close().await;
    Ok(())
}

#[test]
fn concurrent_calls_share_the_channel() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_concurrent_calls_share_the_channel()).unwrap();
}

async fn run_call_after_close_fails() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    client.close().await;
    // second close is a no-op
    client.close().await;
    assert!(client.is_closed());

    let result = client
        .greeter()
        .say_hello(HelloRequest {
            name: "World".to_string(),
        })
        .await;
    assert!(matches!(result, Err(Error::ChannelClosed)));
    Ok(())
}

#[test]
fn call_after_close_fails() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_call_after_close_fails()).unwrap();
}

async fn run_close_fails_pending_calls() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let call: Call<HelloReply> = client.call(
        "Greeter.slow_hello",
        HelloRequest {
            name: "World".to_string(),
        },
    );
    client.close().await;

    let result = call.await;
    assert!(matches!(result, Err(Error::ChannelClosed)));
    Ok(())
}

#[test]
fn close_fails_pending_calls() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_close_fails_pending_calls()).unwrap();
}

async fn run_dial_unreachable_port_fails() -> Result<()> {
    // bind then drop to get a port with no listener
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let endpoint = Endpoint::new(addr.ip().to_string(), addr.port())?;
    let result = Client::dial(&endpoint).await;
    assert!(matches!(result, Err(Error::Connect(_))));
    Ok(())
}

#[test]
fn dial_unreachable_port_fails() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_dial_unreachable_port_fails()).unwrap();
}

async fn run_unknown_method_is_a_remote_error() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let result: Result<HelloReply, Error> = client
        .call("Greeter.shout_hello", HelloRequest::default())
        .await;
    match result {
        Err(Error::Remote { code, message }) => {
            assert_eq!(code, METHOD_NOT_FOUND);
            assert!(message.contains("shout_hello"));
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    client.close().await;
    Ok(())
}

#[test]
fn unknown_method_is_a_remote_error() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_unknown_method_is_a_remote_error()).unwrap();
}

async fn run_deadline_exceeded_leaves_channel_usable() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    client.timeout(Duration::from_millis(50));
    let result: Result<HelloReply, Error> = client
        .call(
            "Greeter.slow_hello",
            HelloRequest {
                name: "World".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::DeadlineExceeded(_))));

    // the deadline was armed for that call only
    let reply = client
        .greeter()
        .say_hello(HelloRequest {
            name: "Again".to_string(),
        })
        .await?;
    assert_eq!(reply.message, "Hello, Again");

    client.close().await;
    Ok(())
}

#[test]
fn deadline_exceeded_leaves_channel_usable() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_deadline_exceeded_leaves_channel_usable())
        .unwrap();
}

async fn run_cancel_leaves_channel_usable() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    let call: Call<HelloReply> = client.call(
        "Greeter.slow_hello",
        HelloRequest {
            name: "World".to_string(),
        },
    );
    call.cancel();
    let result = call.await;
    assert!(matches!(result, Err(Error::Canceled(_))));

    let reply = client
        .greeter()
        .say_hello(HelloRequest {
            name: "Again".to_string(),
        })
        .await?;
    assert_eq!(reply.message, "Hello, Again");

    client.close().await;
    Ok(())
}

#[test]
fn cancel_leaves_channel_usable() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_cancel_leaves_channel_usable()).unwrap();
}

async fn run_call_blocking_round_trip() -> Result<()> {
    let endpoint = start_fixture().await;
    let client = Client::dial(&endpoint).await?;

    // block_in_place needs a spawned task on the multi-thread runtime
    let handle = task::spawn(async move {
        let reply: HelloReply = client.call_blocking(
            "Greeter.say_hello",
            HelloRequest {
                name: "Blocking".to_string(),
            },
        )?;
        client.close().await;
        Ok::<_, Error>(reply)
    });
    let reply = handle.await??;
    assert_eq!(reply.message, "Hello, Blocking");
    Ok(())
}

#[test]
fn call_blocking_round_trip() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(run_call_blocking_round_trip()).unwrap();
}
