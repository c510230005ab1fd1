use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use skiff_signal::ServerFrame;

use crate::registry::{EndpointHandle, Registry};

/// Resolves addressed identifiers and forwards reshaped control frames.
///
/// A routing failure is an ordinary event (the counterparty may simply not
/// be online yet): it is reported back to the sender and never escalated.
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver an offer to the identifier named in a `calluser` frame.
    pub fn relay_call(
        &self,
        sender: &EndpointHandle,
        user_to_call: String,
        signal_data: Value,
        from: String,
        name: String,
    ) {
        let frame = ServerFrame::IncomingCall {
            signal: signal_data,
            from,
            name,
        };
        self.relay(sender, &user_to_call, frame);
    }

    /// Deliver an answer back to the identifier that sent the offer.
    pub fn relay_answer(&self, sender: &EndpointHandle, to: String, signal: Value) {
        self.relay(sender, &to, ServerFrame::CallAccepted { signal });
    }

    fn relay(&self, sender: &EndpointHandle, target: &str, frame: ServerFrame) {
        match self.registry.lookup(target) {
            Some(handle) => {
                if handle.deliver(frame).is_ok() {
                    debug!(peer = %target, "relayed frame");
                } else {
                    debug!(peer = %target, "target endpoint gone");
                    self.report_failure(sender, target, "endpoint closed");
                }
            }
            None => {
                debug!(peer = %target, "target not registered");
                self.report_failure(sender, target, "not registered");
            }
        }
    }

    fn report_failure(&self, sender: &EndpointHandle, target: &str, reason: &str) {
        // Best effort: the sender may itself be gone by now.
        let _ = sender.deliver(ServerFrame::CallFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Drop the endpoint's registration, if any, and tell every other
    /// registered endpoint the session ended. The fan-out is unicast and
    /// best-effort; one dead peer never blocks the rest.
    pub fn handle_disconnect(&self, endpoint_id: &str) {
        let Some(short_id) = self.registry.remove(endpoint_id) else {
            return;
        };
        info!(%short_id, "endpoint disconnected, notifying peers");
        for peer in self.registry.peers_of(endpoint_id) {
            let _ = peer.deliver(ServerFrame::CallEnded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Envelope;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn handle(id: &str) -> (EndpointHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EndpointHandle::new(id.to_string(), tx), rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Option<ServerFrame> {
        match rx.try_recv() {
            Ok(Envelope::Deliver(frame)) => Some(frame),
            _ => None,
        }
    }

    #[test_timeout::timeout]
    fn relays_offer_reshaped_to_the_target() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone());
        let (caller, _caller_rx) = handle("ep-a");
        let (callee, mut callee_rx) = handle("ep-b");
        registry.register("B1bbb", callee);

        router.relay_call(
            &caller,
            "B1bbb".to_string(),
            json!({"sdp": "o1"}),
            "A1aaa".to_string(),
            "alice".to_string(),
        );

        assert_eq!(
            next_frame(&mut callee_rx),
            Some(ServerFrame::IncomingCall {
                signal: json!({"sdp": "o1"}),
                from: "A1aaa".to_string(),
                name: "alice".to_string(),
            })
        );
    }

    #[test_timeout::timeout]
    fn unknown_target_reports_failure_to_sender_only() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone());
        let (caller, mut caller_rx) = handle("ep-a");
        let (bystander, mut bystander_rx) = handle("ep-b");
        registry.register("B1bbb", bystander);

        router.relay_call(
            &caller,
            "ZZZZZ".to_string(),
            json!({"sdp": "o1"}),
            "A1aaa".to_string(),
            "alice".to_string(),
        );

        assert_eq!(
            next_frame(&mut caller_rx),
            Some(ServerFrame::CallFailed {
                target: "ZZZZZ".to_string(),
                reason: "not registered".to_string(),
            })
        );
        assert!(bystander_rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn dead_target_channel_reports_failure() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone());
        let (caller, mut caller_rx) = handle("ep-a");
        let (callee, callee_rx) = handle("ep-b");
        registry.register("B1bbb", callee);
        drop(callee_rx);

        router.relay_answer(&caller, "B1bbb".to_string(), json!({"sdp": "a1"}));

        assert_eq!(
            next_frame(&mut caller_rx),
            Some(ServerFrame::CallFailed {
                target: "B1bbb".to_string(),
                reason: "endpoint closed".to_string(),
            })
        );
    }

    #[test_timeout::timeout]
    fn disconnect_broadcasts_to_every_other_registered_endpoint() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone());
        let (a, mut a_rx) = handle("ep-a");
        let (b, mut b_rx) = handle("ep-b");
        let (c, mut c_rx) = handle("ep-c");
        registry.register("AAAAA", a);
        registry.register("BBBBB", b);
        registry.register("CCCCC", c);

        router.handle_disconnect("ep-a");

        assert!(registry.lookup("AAAAA").is_none());
        // The disconnected endpoint gets nothing.
        assert!(a_rx.try_recv().is_err());
        // Everyone else gets exactly one notification.
        for rx in [&mut b_rx, &mut c_rx] {
            assert_eq!(next_frame(rx), Some(ServerFrame::CallEnded));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test_timeout::timeout]
    fn disconnect_of_unregistered_endpoint_is_silent() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone());
        let (b, mut b_rx) = handle("ep-b");
        registry.register("BBBBB", b);

        router.handle_disconnect("ep-never-registered");

        assert!(b_rx.try_recv().is_err());
    }
}
