//! CLI for RouteMQ
//!
//! Subcommands:
//! - `server`: run the WebSocket broker
//! - `client`: bind, publish one message and ack its delivery (useful for smoke tests)

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use routemq::broker::Broker;
use routemq::config::{Settings, load_config_from};
use routemq::persistence::open_store;
use routemq::transport::message::{ClientMessage, ServerMessage};
use routemq::transport::websocket::start_websocket_server;
use routemq::utils::logging;

#[derive(Parser)]
#[command(name = "routemq")]
enum Command {
    /// Start the WebSocket broker
    Server,
    /// Run the example client
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "demo")]
        queue: String,
        #[arg(long, default_value = "")]
        routing_key: String,
        /// Sent as `auth` first when the server requires a password
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "Hello from routemq")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            let Some(config) = server_config("config/default") else {
                return ExitCode::FAILURE;
            };

            if let Err(e) = run_server(config).await {
                error!("Server failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Command::Client {
            url,
            queue,
            routing_key,
            password,
            payload,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &queue, &routing_key, password, payload).await {
                error!("Client failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Load the server configuration and install logging at its level. A config
/// error is logged at the default level and yields `None`.
fn server_config(path: &str) -> Option<Settings> {
    match load_config_from(path) {
        Ok(config) => {
            logging::init(&config.log.level);
            Some(config)
        }
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            None
        }
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.store)?;
    info!(driver = %config.store.driver, "store opened");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Broker::new(store, &config.broker));

    tokio::select! {
        res = start_websocket_server(&addr, broker, config.server.clone()) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_client(
    url: &str,
    queue: &str,
    routing_key: &str,
    password: Option<String>,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let mut requests = Vec::new();
    if let Some(password) = password {
        requests.push(ClientMessage::Auth { password });
    }
    requests.push(ClientMessage::Bind {
        queue: queue.to_string(),
        routing_key: routing_key.to_string(),
        no_ack: false,
    });
    requests.push(ClientMessage::Publish {
        queue: queue.to_string(),
        routing_key: routing_key.to_string(),
        publish_type: "direct".to_string(),
        payload,
    });

    for request in &requests {
        ws_stream
            .send(WsMessage::Text(serde_json::to_string(request)?.into()))
            .await?;
    }

    // Print replies until our own message comes back, then ack it.
    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        let text = text.as_str();
        println!("Incoming: {text}");

        match serde_json::from_str::<ServerMessage>(text)? {
            ServerMessage::Push { queue, msg_id, .. } => {
                let ack = ClientMessage::Ack { queue, msg_id };
                ws_stream
                    .send(WsMessage::Text(serde_json::to_string(&ack)?.into()))
                    .await?;
                break;
            }
            ServerMessage::Error { code, message } => {
                return Err(format!("server error {code}: {message}").into());
            }
            _ => {}
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
