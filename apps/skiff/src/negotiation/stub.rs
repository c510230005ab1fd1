//! In-process negotiator used by the demo CLI and the test suite. It emits a
//! synthetic local blob and reports the channel ready once it has seen the
//! remote half. Real deployments plug an actual NAT-traversal engine in
//! behind `NegotiatorFactory` instead.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{NegotiationError, NegotiationEvent, Negotiator, NegotiatorFactory};

#[derive(Default)]
pub struct StubNegotiatorFactory {
    counter: AtomicU64,
}

pub struct StubNegotiator {
    events: mpsc::UnboundedSender<NegotiationEvent>,
    initiator: bool,
    seq: u64,
}

impl NegotiatorFactory for StubNegotiatorFactory {
    fn create(
        &self,
        initiator: bool,
        events: mpsc::UnboundedSender<NegotiationEvent>,
    ) -> Result<Box<dyn Negotiator>, NegotiationError> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        if initiator {
            let _ = events.send(NegotiationEvent::LocalBlob(json!({
                "type": "offer",
                "sdp": format!("stub-offer-{seq}"),
            })));
        }
        Ok(Box::new(StubNegotiator {
            events,
            initiator,
            seq,
        }))
    }
}

impl Negotiator for StubNegotiator {
    fn feed_remote(&mut self, blob: Value) -> Result<(), NegotiationError> {
        if !blob.is_object() {
            return Err(NegotiationError::Remote("expected a JSON object".to_string()));
        }
        if !self.initiator {
            let _ = self.events.send(NegotiationEvent::LocalBlob(json!({
                "type": "answer",
                "sdp": format!("stub-answer-{}", self.seq),
            })));
        }
        let _ = self.events.send(NegotiationEvent::ChannelReady);
        Ok(())
    }
}
