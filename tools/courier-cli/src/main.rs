//! courier: command line client for a courier WebSocket server.
//!
//! Speaks the same envelope protocol as the library: broadcasts, correlated
//! requests, and a live view of everything the server sends.
//!
//! ## Usage
//!
//! ```bash
//! # Broadcast a message
//! courier send chat '{"text": "hi"}'
//!
//! # Correlated request, give up after 5 seconds
//! courier request render.template.request '{"template": "Hello {{.name}}"}' --timeout-ms 5000
//!
//! # Print the next 10 inbound envelopes
//! courier --url ws://node.example.com:8080/ws watch --count 10
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use courier_client::{ClientConfig, ConnectionEvent, CorrelatedClient, RequestError};
use courier_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Courier WebSocket client
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint URL (default: COURIER_URL or ws://localhost:8080/ws)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Broadcast an uncorrelated message
    Send {
        /// Message type
        kind: String,
        /// JSON payload (default: null)
        data: Option<String>,
    },

    /// Send a correlated request and print the reply data
    Request {
        /// Message type
        kind: String,
        /// JSON payload (default: null)
        data: Option<String>,
        /// Reply deadline in milliseconds, 0 = wait until the connection ends
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print inbound envelopes as they arrive
    Watch {
        /// Stop after this many envelopes
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if args.verbose {
        telemetry = telemetry.with_log_level("debug");
    }
    let _telemetry = init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.url {
        config = config.with_url(url);
    }

    let client = CorrelatedClient::new(config)?;
    client.connect().await?;

    let result = run(&client, args.command).await;
    client.close().await;

    if args.metrics {
        eprintln!("{}", encode_metrics()?);
    }
    result
}

async fn run(client: &CorrelatedClient, command: Command) -> Result<()> {
    match command {
        Command::Send { kind, data } => {
            let data = parse_payload(data.as_deref())?;
            client.send(&kind, &data)?;
            info!(kind = %kind, "Broadcast sent");
        }

        Command::Request {
            kind,
            data,
            timeout_ms,
        } => {
            let data = parse_payload(data.as_deref())?;
            let timeout = match timeout_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => client.config().request_timeout,
            };

            match client
                .request_with_timeout::<_, Value>(&kind, &data, timeout)
                .await
            {
                Ok(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
                Err(e @ RequestError::Rejected(_)) => {
                    bail!("server rejected `{kind}`: {}", e.reason_text().unwrap_or_default())
                }
                Err(e) => return Err(e).with_context(|| format!("request `{kind}` failed")),
            }
        }

        Command::Watch { count } => watch(client, count).await?,
    }
    Ok(())
}

async fn watch(client: &CorrelatedClient, count: Option<usize>) -> Result<()> {
    let mut messages = client.messages().subscribe();
    let mut events = client.events();
    let mut seen = 0usize;

    while count.map_or(true, |limit| seen < limit) {
        tokio::select! {
            message = messages.recv() => match message {
                Ok(envelope) => {
                    println!("{}", envelope.to_text()?);
                    seen += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "Watcher fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => {
                if let Ok(ConnectionEvent::Closed(reason)) = event {
                    info!(reason = ?reason, "Connection closed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Parse a command line payload; absent means `null`.
fn parse_payload(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .with_context(|| format!("payload is not valid JSON: {text}")),
    }
}
