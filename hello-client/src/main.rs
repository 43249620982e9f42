use anyhow::Result;
use std::env;

use hello_rpc::greeter::{GreeterClient, HelloRequest};
use hello_rpc::{Client, Endpoint};

const ADDR_ENV_VAR: &str = "GREETER_ADDR";
const DEFAULT_ADDR: &str = "127.0.0.1:50051";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let addr = env::var(ADDR_ENV_VAR).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let endpoint: Endpoint = addr.parse()?;

    let client = Client::dial(&endpoint).await?;
    let greeter = GreeterClient::bind(&client);

    // close before surfacing the call result so the connection is
    // released on the failure path as well
    let result = greeter
        .say_hello(HelloRequest {
            name: "World".to_string(),
        })
        .await;
    client.close().await;

    let reply = result?;
    println!("Greeting: {}", reply.message);

    Ok(())
}
