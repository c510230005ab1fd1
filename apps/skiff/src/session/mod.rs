use std::time::Duration;

use thiserror::Error;

pub mod call;
pub mod client;
pub mod registration;

pub use client::SessionClient;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session engine terminated")]
    Terminated,
}

/// State changes the embedding UI observes. Routine conditions (a peer not
/// online yet) and blocking ones (registration exhausted) both arrive here;
/// how loudly to surface them is the UI's call.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Control connection to the relay is up.
    RelayConnected,
    /// Control connection lost; a reconnect is scheduled.
    RelayDisconnected,
    /// The relay acknowledged our identifier.
    Registered { short_id: String },
    /// Registration attempts exhausted without an acknowledgment.
    RegistrationFailed { attempts: u32 },
    /// Somebody wants to establish a session with us.
    IncomingCall { from: String, name: String },
    /// Offer and answer have both been exchanged.
    CallConnected { peer: String },
    /// The direct data channel is usable.
    ChannelReady,
    /// The current call attempt ended (hangup, peer loss, or failure).
    CallEnded,
    /// The relay could not reach the addressed identifier.
    RouteFailed { target: String, reason: String },
    /// A call action was rejected locally before anything was sent.
    CallRejected { reason: String },
    /// A control frame was dropped because the link was down.
    SendFailed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name sent with outgoing calls.
    pub display_name: String,
    pub registration: registration::RetryPolicy,
    /// Reconnect delay bounds; the actual delay is jittered inside them so a
    /// relay restart does not see every client at once.
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "anonymous".to_string(),
            registration: registration::RetryPolicy::default(),
            reconnect_min: Duration::from_secs(3),
            reconnect_max: Duration::from_secs(8),
        }
    }
}
