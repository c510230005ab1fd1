pub mod cli;
pub mod config;
pub mod registry;
pub mod router;
pub mod websocket;

use tokio::net::TcpListener;
use websocket::{relay_router, RelayState};

/// Serve the relay on an already-bound listener. Split out from `main` so
/// tests can run the real server on an ephemeral port.
pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, relay_router(state)).await
}
