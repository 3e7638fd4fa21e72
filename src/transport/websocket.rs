//! WebSocket transport
//!
//! Serves app subscribers of the embedded broker:
//! - accept TCP/WebSocket connections, refusing any over `max_connections`
//! - create a `Client` per connection and register it with the `Broker`
//! - translate `subscribe`, `unsubscribe` and `ack` frames into broker calls
//! - refuse `publish`, since only the backend writes to topics
//! - remove the client from every topic when the connection ends
//!
//! Each connection runs a reader (this task) and a writer task joined by an
//! unbounded channel. The broker lock is never held across an `.await`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::SubscriberId;
use crate::broker::{self, Broker, SharedBroker};
use crate::client::Client;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Error;

/// Bind `addr` and serve subscribers until the task is dropped.
pub async fn start_websocket_server(
    addr: &str,
    broker: SharedBroker,
    max_connections: usize,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, broker, max_connections).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, broker: SharedBroker, max_connections: usize) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        let broker = broker.clone();
        spawn(handle_connection(stream, peer, broker, max_connections));
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: SharedBroker,
    max_connections: usize,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error from {peer}: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = Client::new(tx);
    let client_id = client.id.clone();

    let admitted = {
        let mut broker = broker::lock(&broker);
        if broker.client_count() >= max_connections {
            false
        } else {
            broker.register_client(client);
            true
        }
    };
    if !admitted {
        warn!("Refusing {peer}: connection limit of {max_connections} reached");
        if let Some(frame) = frame(&ServerMessage::error("too many connections")) {
            let _ = ws_sender.send(frame).await;
        }
        let _ = ws_sender.close().await;
        return;
    }
    info!("{client_id} connected from {peer}");

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let client_id = client_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                broker::lock(&broker).cleanup_client(&client_id);
            }
        }
    };

    {
        let client_id = client_id.clone();
        let do_cleanup = do_cleanup.clone();

        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("Failed to send message to {client_id}: {e}");
                    break;
                }
            }
            do_cleanup();
            debug!("Send loop closed for {client_id}");
        });
    }

    while let Some(incoming) = ws_receiver.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => {
                let mut broker = broker::lock(&broker);
                handle_client_message(&mut broker, &client_id, text.as_str());
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error from {client_id}: {e}");
                break;
            }
        }
    }

    info!("{client_id} disconnected");
    do_cleanup();
}

/// Apply one text frame from `client_id` to the broker. Replies go through
/// the client's own channel so they stay ordered with deliveries.
pub fn handle_client_message(broker: &mut Broker, client_id: &SubscriberId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { topic }) if topic.trim().is_empty() => {
            reply(broker, client_id, &ServerMessage::error("topic must not be empty"));
        }
        Ok(ClientMessage::Subscribe { topic }) => {
            // the confirmation precedes any replayed history
            reply(
                broker,
                client_id,
                &ServerMessage::Subscribed {
                    topic: topic.clone(),
                },
            );
            broker.subscribe(&topic, client_id.clone());
            debug!("{client_id} subscribed to {topic}");
        }
        Ok(ClientMessage::Unsubscribe { topic }) => {
            broker.unsubscribe(&topic, client_id);
            debug!("{client_id} unsubscribed from {topic}");
            reply(broker, client_id, &ServerMessage::Unsubscribed { topic });
        }
        Ok(ClientMessage::Ack { message_id }) => {
            broker.handle_ack(&message_id);
        }
        Ok(ClientMessage::Publish { topic, .. }) => {
            warn!("{client_id} tried to publish to {topic}");
            reply(
                broker,
                client_id,
                &ServerMessage::error("publishing is not allowed for subscribers"),
            );
        }
        Err(err) => {
            warn!(
                "Invalid client message from {client_id}: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            reply(broker, client_id, &ServerMessage::error("invalid message"));
        }
    }
}

fn reply(broker: &Broker, client_id: &SubscriberId, msg: &ServerMessage) {
    let (Some(client), Some(frame)) = (broker.clients.get(client_id), frame(msg)) else {
        return;
    };
    let _ = client.sender.send(frame);
}

fn frame(msg: &ServerMessage) -> Option<WsMessage> {
    serde_json::to_string(msg).ok().map(WsMessage::text)
}
