use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Initiator,
    Answerer,
}

/// Where one call attempt stands. There is no `Ended` variant: ending an
/// attempt clears the slot that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Initiator: waiting for the local offer blob.
    Offering,
    /// Initiator: offer sent, waiting for the counterparty's answer.
    AwaitingAnswer,
    /// Answerer: offer received, waiting for the user to accept.
    Ringing,
    /// Answerer: accepted, waiting for the local answer blob.
    Answering,
    /// Blobs exchanged on both sides.
    Connected,
}

/// One session-establishment exchange. At most one exists per client; a new
/// attempt supersedes the old one, and the id keeps late events aimed at a
/// superseded attempt from being acted on.
#[derive(Debug)]
pub struct CallAttempt {
    pub id: u64,
    /// Counterparty identifier.
    pub peer: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Offer blob held until the user accepts (answerer path only).
    pub remote_offer: Option<Value>,
}

impl CallAttempt {
    pub fn outgoing(id: u64, target: String) -> Self {
        Self {
            id,
            peer: target,
            direction: CallDirection::Initiator,
            phase: CallPhase::Offering,
            remote_offer: None,
        }
    }

    pub fn incoming(id: u64, from: String, offer: Value) -> Self {
        Self {
            id,
            peer: from,
            direction: CallDirection::Answerer,
            phase: CallPhase::Ringing,
            remote_offer: Some(offer),
        }
    }
}
