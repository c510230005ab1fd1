use clap::Parser;
use tracing::{error, info};

use skiff_pier::{
    cli::{self, Cli, Commands},
    config::Config,
    websocket::RelayState,
};

#[tokio::main]
async fn main() {
    // Default to INFO unless the environment says otherwise.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = Cli::parse();

    if let Some(Commands::Debug { url, command }) = args.command {
        if let Err(err) = cli::run_debug_client(url, command).await {
            error!("debug client error: {err}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    let state = RelayState::new();

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind relay address");

    info!("skiff-pier listening on {addr}");

    skiff_pier::serve(listener, state)
        .await
        .expect("relay server failed");
}
