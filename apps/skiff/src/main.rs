use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use skiff::negotiation::stub::StubNegotiatorFactory;
use skiff::session::{SessionClient, SessionConfig, SessionEvent};
use skiff::transport::websocket::WebSocketConnector;

/// skiff client: register a short identifier with a relay and negotiate
/// direct sessions with peers by id.
#[derive(Parser, Debug)]
#[command(name = "skiff")]
struct Args {
    /// Relay URL
    #[arg(long, env = "SKIFF_RELAY_URL", default_value = "ws://localhost:3003")]
    relay_url: String,

    /// Display name sent with outgoing calls
    #[arg(long, env = "SKIFF_NAME", default_value = "anonymous")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let connector = Arc::new(WebSocketConnector::new(&args.relay_url));
    let negotiators = Arc::new(StubNegotiatorFactory::default());
    let config = SessionConfig {
        display_name: args.name,
        ..SessionConfig::default()
    };
    let (client, mut events) = SessionClient::spawn(connector, negotiators, config);

    println!("your id: {}", client.short_id());
    println!("commands: call <ID> | accept | hangup | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !run_command(&client, line.trim()) {
                    break;
                }
            }
        }
    }

    let _ = client.shutdown();
    Ok(())
}

fn run_command(client: &SessionClient, line: &str) -> bool {
    match line.split_once(' ') {
        Some(("call", target)) => {
            let _ = client.initiate_call(target.trim());
        }
        None if line == "accept" => {
            let _ = client.accept_call();
        }
        None if line == "hangup" => {
            let _ = client.end_call();
        }
        None if line == "quit" => return false,
        None if line.is_empty() => {}
        _ => println!("unknown command: {line}"),
    }
    true
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::RelayConnected => println!("relay connected"),
        SessionEvent::RelayDisconnected => println!("relay connection lost, retrying"),
        SessionEvent::Registered { short_id } => println!("registered as {short_id}"),
        SessionEvent::RegistrationFailed { attempts } => {
            println!("registration failed after {attempts} attempts")
        }
        SessionEvent::IncomingCall { from, name } => {
            println!("incoming call from {name} ({from}) - type 'accept' to answer")
        }
        SessionEvent::CallConnected { peer } => println!("connected to {peer}"),
        SessionEvent::ChannelReady => println!("data channel ready"),
        SessionEvent::CallEnded => println!("call ended"),
        SessionEvent::RouteFailed { target, reason } => {
            println!("could not reach {target}: {reason}")
        }
        SessionEvent::CallRejected { reason } => println!("call rejected: {reason}"),
        SessionEvent::SendFailed => println!("message dropped, link is down"),
    }
}
