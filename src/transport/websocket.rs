use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::message::PublishType;
use crate::client::Client;
use crate::config::ServerSettings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{BrokerError, STATUS_UNAUTHORIZED};

/// Bind `addr` and serve connections until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    broker: Arc<Broker>,
    settings: ServerSettings,
) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, broker, settings).await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    settings: ServerSettings,
) -> io::Result<()> {
    let settings = Arc::new(settings);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to accept connection: {e}");
                continue;
            }
        };
        debug!(%peer, "connection accepted");
        spawn(handle_connection(stream, broker.clone(), settings.clone()));
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Broker>, settings: Arc<ServerSettings>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let mut client = Client::new(tx.clone());
    info!(client = %client.id, "client connected");

    // The writer owns the sink; route queues and the read loop both go
    // through `tx`. It stops after forwarding a close frame.
    let writer_id = client.id.clone();
    let writer = spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if let Err(e) = ws_sender.send(msg).await {
                debug!(client = %writer_id, "failed to write frame: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let keepalive = keepalive_limit(&settings);
    let mut last_seen = Instant::now();

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = sleep_until(last_seen + keepalive.unwrap_or_default()), if keepalive.is_some() => {
                warn!(client = %client.id, "keepalive expired, closing connection");
                break;
            }
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(client = %client.id, "read error: {e}");
                break;
            }
            None => break,
        };
        last_seen = Instant::now();

        let text = match &msg {
            WsMessage::Text(_) | WsMessage::Binary(_) => match msg.to_text() {
                Ok(text) => text,
                Err(e) => {
                    let err = BrokerError::bad_request(format!("invalid message: {e}"));
                    if reply(&client, Err(err)).is_break() {
                        break;
                    }
                    continue;
                }
            },
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let response = match serde_json::from_str::<ClientMessage>(text) {
            Ok(request) => handle_client_message(&broker, &mut client, &settings, request).await,
            Err(e) => Err(BrokerError::bad_request(format!("invalid message: {e}"))),
        };
        if reply(&client, response).is_break() {
            break;
        }
    }

    broker.unbind_all(&mut client).await;
    let _ = tx.send(WsMessage::Close(None));
    let _ = writer.await;
    info!(client = %client.id, "client disconnected");
}

/// Send the outcome of one request. Breaks when the connection must close.
fn reply(
    client: &Client,
    response: Result<Option<ServerMessage>, BrokerError>,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    let (frame, fatal) = match response {
        Ok(Some(frame)) => (frame, false),
        Ok(None) => return ControlFlow::Continue(()),
        Err(err) => {
            let code = err.code();
            debug!(client = %client.id, code, "request failed: {err}");
            (
                ServerMessage::Error {
                    code,
                    message: err.to_string(),
                },
                code == STATUS_UNAUTHORIZED,
            )
        }
    };

    match client.send(&frame) {
        Ok(()) if !fatal => ControlFlow::Continue(()),
        Ok(()) => ControlFlow::Break(()),
        Err(e) => {
            debug!(client = %client.id, "failed to queue reply: {e}");
            ControlFlow::Break(())
        }
    }
}

/// Peers get 1.5 × the configured interval before they are dropped.
fn keepalive_limit(settings: &ServerSettings) -> Option<Duration> {
    match settings.keepalive_secs {
        0 => None,
        secs => Some(Duration::from_millis(secs * 1500)),
    }
}

/// Apply one client request and build the reply frame, if any.
pub async fn handle_client_message(
    broker: &Broker,
    client: &mut Client,
    settings: &ServerSettings,
    msg: ClientMessage,
) -> Result<Option<ServerMessage>, BrokerError> {
    let auth_required = settings.password.is_some() && !client.authenticated;

    match msg {
        ClientMessage::Auth { password } => match &settings.password {
            Some(expected) if *expected != password => {
                Err(BrokerError::protocol(STATUS_UNAUTHORIZED, "invalid password"))
            }
            _ => {
                client.authenticated = true;
                info!(client = %client.id, "authenticated");
                Ok(Some(ServerMessage::AuthOk))
            }
        },

        _ if auth_required => Err(BrokerError::protocol(
            STATUS_UNAUTHORIZED,
            "must auth first",
        )),

        ClientMessage::Heartbeat => Ok(None),

        ClientMessage::Publish {
            queue,
            routing_key,
            publish_type,
            payload,
        } => {
            let publish_type = publish_type
                .parse::<PublishType>()
                .map_err(BrokerError::bad_request)?;
            let msg_id = broker
                .publish(&queue, &routing_key, publish_type, Bytes::from(payload))
                .await?;
            Ok(Some(ServerMessage::PublishOk { msg_id }))
        }

        ClientMessage::Bind {
            queue,
            routing_key,
            no_ack,
        } => {
            broker.bind(client, &queue, &routing_key, no_ack).await?;
            Ok(Some(ServerMessage::BindOk { queue }))
        }

        ClientMessage::Unbind { queue } => {
            broker.unbind(client, &queue).await?;
            Ok(Some(ServerMessage::UnbindOk { queue }))
        }

        ClientMessage::Ack { queue, msg_id } => {
            broker.ack(client, &queue, msg_id).await?;
            Ok(None)
        }
    }
}
