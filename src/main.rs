//! CLI for Futside
//!
//! Subcommands:
//! - `server`: run the REST gateway and the event relay
//! - `seed`: add the public courts of Asa Sul, Brasília
//! - `reset`: erase every stored record
//! - `watch`: subscribe to the embedded broker and print events

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use futside::api::{AppState, create_router};
use futside::broker::Broker;
use futside::config::{RelayBackend, Settings, load_config};
use futside::persistence::{Database, MessageHistory};
use futside::relay::{BrokerPublisher, EventRelay, MqttPublisher};
use futside::service::FutsideService;
use futside::transport::message::{ClientMessage, ServerMessage};
use futside::transport::websocket::start_websocket_server;
use futside::utils::{Error, logging};
use futside::{push, seed};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "futside", version)]
enum Command {
    /// Start the REST gateway and the event relay
    Server,
    /// Insert the public courts of Asa Sul (safe to rerun)
    Seed,
    /// Erase all users, fields, matches and broker history
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Print events published on a topic of the embedded broker
    Watch {
        /// Embedded broker URL
        #[arg(long, default_value = "ws://127.0.0.1:8884")]
        url: String,
        /// Topic to subscribe to, e.g. futside/match/1/updates
        #[arg(long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Seed => run_seed(&settings).await,
        Command::Reset { yes } => run_reset(&settings, yes).await,
        Command::Watch { url, topic } => run_watch(&url, &topic).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), Error> {
    let database = Database::connect(&settings.database.url).await?;
    let store = database.repository();
    let notifier = push::notifier_from_settings(&settings.push);

    let mut broker = None;
    let relay = match settings.relay.backend {
        RelayBackend::Mqtt => EventRelay::new(Arc::new(MqttPublisher::connect(&settings.mqtt))),
        RelayBackend::Embedded => {
            let ttl = i64::try_from(settings.broker.message_ttl_secs)
                .ok()
                .filter(|ttl| *ttl > 0);
            let max = Some(settings.broker.max_messages_per_topic).filter(|max| *max > 0);
            let history = database.history(&settings.broker.history_path, ttl, max)?;
            info!("Replay history holds {} topic(s)", history.topic_count());
            let shared = Arc::new(Mutex::new(Broker::with_history(history)));
            broker = Some(shared.clone());
            EventRelay::new(Arc::new(BrokerPublisher::new(shared)))
        }
        RelayBackend::Disabled => EventRelay::disabled(),
    };
    info!(
        "Store: {}, event relay: {}, push: {}",
        database.backend(),
        relay.backend(),
        notifier.name()
    );

    let service = FutsideService::new(store.clone(), relay.clone(), notifier);
    let app = create_router(AppState::new(service));

    let addr = settings.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "futside v{} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );

    let broker_addr = settings.broker.bind_addr();
    let max_connections = settings.broker.max_connections;
    let embedded = async {
        match broker {
            Some(broker) => {
                tokio::spawn(Broker::start_retry_loop(broker.clone()));
                start_websocket_server(&broker_addr, broker, max_connections).await
            }
            None => std::future::pending().await,
        }
    };
    let gateway = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    let outcome = tokio::select! {
        res = gateway => res.map_err(Error::from),
        res = embedded => {
            error!("Embedded broker exited unexpectedly.");
            res
        }
    };

    relay.shutdown().await;
    store.flush().await?;
    info!("Shut down cleanly");
    outcome
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received. Exiting gracefully."),
        Err(e) => {
            error!("Cannot listen for the shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

async fn run_seed(settings: &Settings) -> Result<(), Error> {
    let store = Database::connect(&settings.database.url).await?.repository();
    let report = seed::seed_asa_sul(store.as_ref())
        .await
        .map_err(|e| Error::Other(e.to_string()))?;
    store.flush().await?;
    println!(
        "{} court(s) added, {} already present (owner id {})",
        report.created, report.skipped, report.owner_id
    );
    Ok(())
}

async fn run_reset(settings: &Settings, yes: bool) -> Result<(), Error> {
    if !yes {
        println!("This erases every stored record. Run again with --yes to confirm.");
        return Ok(());
    }
    let database = Database::connect(&settings.database.url).await?;
    let store = database.repository();
    store.clear().await?;
    if let Database::Postgres(_) = database {
        MessageHistory::open(&settings.broker.history_path, None, None)
            .and_then(|history| history.clear())
            .map_err(|e| Error::Store(e.into()))?;
    }
    store.flush().await?;
    println!("All data erased from {}", database.backend());
    Ok(())
}

async fn run_watch(url: &str, topic: &str) -> Result<(), Error> {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;
    let subscribe = ClientMessage::Subscribe {
        topic: topic.to_string(),
    };
    ws_stream
        .send(WsMessage::Text(to_frame(&subscribe)?.into()))
        .await?;

    while let Some(frame) = ws_stream.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::Message {
                topic,
                payload,
                message_id,
                qos,
                ..
            }) => {
                println!("[{topic}] {payload}");
                if qos >= 1 {
                    let ack = ClientMessage::Ack { message_id };
                    ws_stream
                        .send(WsMessage::Text(to_frame(&ack)?.into()))
                        .await?;
                }
            }
            Ok(ServerMessage::Subscribed { topic }) => println!("Subscribed to {topic}"),
            Ok(ServerMessage::Error { message }) => {
                return Err(Error::Other(format!("broker refused: {message}")));
            }
            Ok(other) => println!("{other:?}"),
            Err(e) => error!("Unreadable frame {text}: {e}"),
        }
    }
    Ok(())
}

fn to_frame(msg: &ClientMessage) -> Result<String, Error> {
    serde_json::to_string(msg).map_err(|e| Error::Other(e.to_string()))
}
