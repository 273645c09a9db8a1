//! Connects to a chatline backend and prints state changes and events.
//!
//! ```sh
//! CHATLINE_API_KEY=key CHATLINE_TOKEN=jwt \
//!     cargo run --example connect -- wss://chat.example.com/connect
//! ```

use chatline_client::ws::{ConnectOptions, ConnectRequest, Notification, WsConnection};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:3030/connect".to_string());
    let api_key = std::env::var("CHATLINE_API_KEY").unwrap_or_default();
    let token = std::env::var("CHATLINE_TOKEN").unwrap_or_default();

    let request = ConnectRequest::with_credentials(Url::parse(&url)?, &api_key, &token);
    let connection = WsConnection::new(request, ConnectOptions::default());
    let mut notifications = connection.subscribe();
    connection.connect();

    if let Some(connection_id) = connection.connection_id().await {
        println!("connection id: {connection_id}");
    }

    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::ConnectionStateChanged(state) => println!("state: {state}"),
            Notification::EventReceived(event) => println!("event: {:?}", event.payload),
        }
    }

    Ok(())
}
