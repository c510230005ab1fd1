use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use skiff_signal::{generate_short_id, ClientFrame, ServerFrame};

#[derive(Parser, Debug)]
#[command(name = "skiff-pier")]
#[command(about = "skiff rendezvous relay and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay as a probe client
    Debug {
        /// Relay URL (e.g. ws://localhost:3003)
        #[arg(short, long, default_value = "ws://localhost:3003")]
        url: String,

        #[command(subcommand)]
        command: DebugCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DebugCommands {
    /// Register an identifier and print every frame the relay delivers
    Watch {
        /// Identifier to register (random if omitted)
        #[arg(short, long)]
        id: Option<String>,
    },
    /// Register, send an offer to a target identifier, and await the answer
    Call {
        /// Identifier to register for this probe (random if omitted)
        #[arg(short, long)]
        id: Option<String>,

        /// Identifier to call
        #[arg(short, long)]
        target: String,

        /// Offer blob to send, as JSON
        #[arg(short, long, default_value = "{\"probe\":true}")]
        blob: String,

        /// Display name sent with the offer
        #[arg(short, long, default_value = "skiff-probe")]
        name: String,
    },
}

pub async fn run_debug_client(url: String, command: DebugCommands) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {ws_url}");

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(connected)) => connected,
        Ok(Err(err)) => return Err(anyhow::anyhow!("connection to {ws_url} failed: {err}")),
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the relay running at {ws_url}?"
            ))
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let (short_id, call) = match command {
        DebugCommands::Watch { id } => (id.unwrap_or_else(generate_short_id), None),
        DebugCommands::Call {
            id,
            target,
            blob,
            name,
        } => {
            let blob: Value = serde_json::from_str(&blob)
                .map_err(|err| anyhow::anyhow!("--blob is not valid JSON: {err}"))?;
            (id.unwrap_or_else(generate_short_id), Some((target, blob, name)))
        }
    };

    let register = serde_json::to_string(&ClientFrame::RegisterShortId {
        short_id: short_id.clone(),
    })?;
    write.send(Message::Text(register.into())).await?;

    // Wait for the acknowledgment before doing anything else.
    let ack = timeout(Duration::from_secs(5), async {
        while let Some(message) = read.next().await {
            if let Message::Text(text) = message? {
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Registered { short_id }) => {
                        return Ok::<_, anyhow::Error>(short_id)
                    }
                    Ok(other) => debug!("pre-ack frame: {other:?}"),
                    Err(err) => debug!("unparseable frame: {err}"),
                }
            }
        }
        Err(anyhow::anyhow!("connection closed before acknowledgment"))
    })
    .await;

    match ack {
        Ok(Ok(acked)) => println!("registered as {acked}"),
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(anyhow::anyhow!("no registration acknowledgment within 5s")),
    }

    match call {
        None => {
            // Watch mode: print frames until the relay goes away.
            while let Some(message) = read.next().await {
                match message? {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str())
                    {
                        Ok(frame) => println!("{frame:?}"),
                        Err(err) => debug!("unparseable frame: {err}"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok(())
        }
        Some((target, blob, name)) => {
            let offer = serde_json::to_string(&ClientFrame::CallUser {
                user_to_call: target.clone(),
                signal_data: blob,
                from: short_id,
                name,
            })?;
            write.send(Message::Text(offer.into())).await?;
            println!("offer sent to {target}, awaiting answer");

            let outcome = timeout(Duration::from_secs(30), async {
                while let Some(message) = read.next().await {
                    if let Message::Text(text) = message? {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(ServerFrame::CallAccepted { signal }) => {
                                return Ok::<_, anyhow::Error>(signal);
                            }
                            Ok(ServerFrame::CallFailed { target, reason }) => {
                                return Err(anyhow::anyhow!(
                                    "relay could not reach {target}: {reason}"
                                ));
                            }
                            Ok(other) => debug!("interim frame: {other:?}"),
                            Err(err) => debug!("unparseable frame: {err}"),
                        }
                    }
                }
                Err(anyhow::anyhow!("connection closed before an answer arrived"))
            })
            .await;

            match outcome {
                Ok(Ok(signal)) => {
                    println!("answer: {signal}");
                    let _ = write.send(Message::Close(None)).await;
                    Ok(())
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Err(anyhow::anyhow!("no answer within 30s")),
            }
        }
    }
}
