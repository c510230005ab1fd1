use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use skiff_signal::{generate_short_id, ClientFrame, ServerFrame};

use crate::negotiation::{NegotiationError, NegotiationEvent, Negotiator, NegotiatorFactory};
use crate::session::call::{CallAttempt, CallDirection, CallPhase};
use crate::session::registration::RegistrationState;
use crate::session::{SessionConfig, SessionError, SessionEvent};
use crate::transport::{Connector, Endpoint, EndpointEvent, TransportError};

enum Command {
    InitiateCall { target: String },
    AcceptCall,
    EndCall,
    Shutdown,
}

enum EngineEvent {
    Connected { epoch: u64, endpoint: Endpoint },
    ConnectFailed { epoch: u64, error: TransportError },
    Endpoint { epoch: u64, event: EndpointEvent },
    Negotiation { attempt: u64, event: NegotiationEvent },
}

enum Link {
    Connecting,
    Open(Endpoint),
    Down,
}

/// Handle to a running session engine. Commands are enqueued and applied by
/// the engine task; outcomes come back as [`SessionEvent`]s.
pub struct SessionClient {
    short_id: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionClient {
    /// Spawn the engine. The local identifier is generated here, once, and
    /// kept for the client's lifetime.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        negotiators: Arc<dyn NegotiatorFactory>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let short_id = generate_short_id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            short_id.clone(),
            connector,
            negotiators,
            config,
            commands_rx,
            events_tx,
        );
        tokio::spawn(engine.run());
        (
            Self {
                short_id,
                commands: commands_tx,
            },
            events_rx,
        )
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn initiate_call(&self, target: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::InitiateCall {
            target: target.into(),
        })
    }

    pub fn accept_call(&self) -> Result<(), SessionError> {
        self.send(Command::AcceptCall)
    }

    pub fn end_call(&self) -> Result<(), SessionError> {
        self.send(Command::EndCall)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Terminated)
    }
}

/// The session engine: one event-driven task owning every piece of client
/// state. All transitions happen here, in response to one event at a time,
/// so none of them can overlap. Timers are deadlines checked against current
/// state when they fire; a timer that outlived its purpose is a no-op.
struct Engine {
    short_id: String,
    connector: Arc<dyn Connector>,
    negotiators: Arc<dyn NegotiatorFactory>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<EngineEvent>,
    internal_rx: mpsc::UnboundedReceiver<EngineEvent>,
    /// Bumped for every connection attempt; events carrying an older epoch
    /// belong to a dead endpoint and are ignored.
    epoch: u64,
    link: Link,
    /// Single-slot queue for a frame produced while the link was mid-connect.
    pending_send: Option<ClientFrame>,
    registration: RegistrationState,
    registration_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
    call: Option<CallAttempt>,
    negotiator: Option<Box<dyn Negotiator>>,
    next_attempt_id: u64,
}

impl Engine {
    fn new(
        short_id: String,
        connector: Arc<dyn Connector>,
        negotiators: Arc<dyn NegotiatorFactory>,
        config: SessionConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let registration = RegistrationState::new(config.registration.clone());
        Self {
            short_id,
            connector,
            negotiators,
            config,
            commands,
            events,
            internal_tx,
            internal_rx,
            epoch: 0,
            link: Link::Down,
            pending_send: None,
            registration,
            registration_deadline: None,
            reconnect_deadline: None,
            call: None,
            negotiator: None,
            next_attempt_id: 0,
        }
    }

    async fn run(mut self) {
        self.start_connect();
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = self.internal_rx.recv() => self.handle_engine_event(event),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_deadline();
                }
            }
        }
        debug!(short_id = %self.short_id, "session engine stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.registration_deadline, self.reconnect_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_deadline(&mut self) {
        let now = Instant::now();
        if self.reconnect_deadline.is_some_and(|at| at <= now) {
            self.reconnect_deadline = None;
            self.start_connect();
        }
        if self.registration_deadline.is_some_and(|at| at <= now) {
            self.registration_deadline = None;
            // Stale once acknowledged or once the link went away.
            if matches!(self.link, Link::Open(_)) && !self.registration.is_acknowledged() {
                self.send_registration();
            }
        }
    }

    /// Kick off a connection attempt. Everything still in flight for the
    /// previous endpoint is superseded by the epoch bump.
    fn start_connect(&mut self) {
        self.epoch += 1;
        self.link = Link::Connecting;
        let epoch = self.epoch;
        let connector = self.connector.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let (endpoint_tx, mut endpoint_rx) = mpsc::unbounded_channel();
            match connector.connect(endpoint_tx).await {
                Ok(endpoint) => {
                    if internal
                        .send(EngineEvent::Connected { epoch, endpoint })
                        .is_err()
                    {
                        return;
                    }
                    while let Some(event) = endpoint_rx.recv().await {
                        if internal.send(EngineEvent::Endpoint { epoch, event }).is_err() {
                            break;
                        }
                    }
                }
                Err(error) => {
                    let _ = internal.send(EngineEvent::ConnectFailed { epoch, error });
                }
            }
        });
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected { epoch, endpoint } => {
                if epoch != self.epoch {
                    endpoint.close();
                    return;
                }
                info!(short_id = %self.short_id, "control connection established");
                self.link = Link::Open(endpoint);
                self.emit(SessionEvent::RelayConnected);
                // Fresh connection, fresh registration.
                self.registration.reset();
                self.send_registration();
                if let Some(frame) = self.pending_send.take() {
                    self.send_frame(frame);
                }
            }
            EngineEvent::ConnectFailed { epoch, error } => {
                if epoch != self.epoch {
                    return;
                }
                debug!(error = %error, "connect attempt failed");
                self.link = Link::Down;
                self.schedule_reconnect();
            }
            EngineEvent::Endpoint { epoch, event } => {
                if epoch != self.epoch {
                    debug!(epoch, "event from a superseded endpoint, ignoring");
                    return;
                }
                match event {
                    EndpointEvent::Frame(frame) => self.handle_frame(frame),
                    EndpointEvent::Closed => self.handle_link_lost(),
                }
            }
            EngineEvent::Negotiation { attempt, event } => {
                self.handle_negotiation(attempt, event)
            }
        }
    }

    fn handle_link_lost(&mut self) {
        if !matches!(self.link, Link::Open(_)) {
            return;
        }
        warn!(short_id = %self.short_id, "control connection lost");
        self.link = Link::Down;
        self.registration_deadline = None;
        self.emit(SessionEvent::RelayDisconnected);
        // A transport failure ends whatever attempt was in flight.
        self.end_call();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_deadline.is_some() {
            return;
        }
        let delay = self.reconnect_delay();
        debug!(?delay, "scheduling reconnect");
        self.reconnect_deadline = Some(Instant::now() + delay);
    }

    fn reconnect_delay(&self) -> Duration {
        let min = self.config.reconnect_min;
        let max = self.config.reconnect_max.max(min);
        if max == min {
            return min;
        }
        let span = (max - min).as_millis() as u64;
        min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
    }

    fn send_registration(&mut self) {
        match self.registration.begin_attempt() {
            Some(ack_wait) => {
                debug!(attempt = self.registration.attempts(), "sending registration");
                self.send_frame(ClientFrame::RegisterShortId {
                    short_id: self.short_id.clone(),
                });
                self.registration_deadline = Some(Instant::now() + ack_wait);
            }
            None if self.registration.is_exhausted() => {
                warn!(
                    attempts = self.registration.attempts(),
                    "registration attempts exhausted"
                );
                self.emit(SessionEvent::RegistrationFailed {
                    attempts: self.registration.attempts(),
                });
            }
            None => {}
        }
    }

    /// Send policy: open link sends now; a mid-connect link keeps only the
    /// most recent frame and flushes it once open; a down link drops the
    /// frame and gets a reconnect going.
    fn send_frame(&mut self, frame: ClientFrame) -> bool {
        match &self.link {
            Link::Open(endpoint) => {
                if endpoint.send(frame).is_ok() {
                    return true;
                }
            }
            Link::Connecting => {
                self.pending_send = Some(frame);
                return true;
            }
            Link::Down => {
                self.schedule_reconnect();
                return false;
            }
        }
        // Open, but the bridge died under us: treat it as a close.
        self.handle_link_lost();
        false
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Me { id } => debug!(endpoint = %id, "transport endpoint id"),
            ServerFrame::Registered { short_id } => {
                if short_id != self.short_id {
                    debug!(%short_id, "acknowledgment for a different identifier, ignoring");
                    return;
                }
                if self.registration.acknowledge() {
                    self.registration_deadline = None;
                    info!(short_id = %self.short_id, "identifier registered");
                    self.emit(SessionEvent::Registered { short_id });
                }
            }
            ServerFrame::IncomingCall { signal, from, name } => {
                self.handle_incoming_call(from, name, signal)
            }
            ServerFrame::CallAccepted { signal } => self.handle_call_accepted(signal),
            ServerFrame::CallEnded => {
                debug!("peer session ended");
                self.end_call();
            }
            ServerFrame::CallFailed { target, reason } => {
                // Routine condition; the attempt stays where it is and the
                // user decides whether to try again.
                info!(peer = %target, %reason, "relay could not reach the target");
                self.emit(SessionEvent::RouteFailed { target, reason });
            }
        }
    }

    fn handle_incoming_call(&mut self, from: String, name: String, signal: Value) {
        if self.call.is_some() {
            debug!("incoming call supersedes the active attempt");
            self.end_call();
        }
        let id = self.next_attempt();
        self.call = Some(CallAttempt::incoming(id, from.clone(), signal));
        info!(%from, %name, "incoming call");
        self.emit(SessionEvent::IncomingCall { from, name });
    }

    fn handle_call_accepted(&mut self, signal: Value) {
        let Some(call) = self.call.as_mut() else {
            debug!("answer with no active attempt, ignoring");
            return;
        };
        if call.phase != CallPhase::AwaitingAnswer {
            // Stale or duplicate answer for a superseded attempt.
            debug!(phase = ?call.phase, "answer in unexpected phase, ignoring");
            return;
        }
        let Some(negotiator) = self.negotiator.as_mut() else {
            debug!("answer without a live negotiator, ignoring");
            return;
        };
        match negotiator.feed_remote(signal) {
            Ok(()) => {
                call.phase = CallPhase::Connected;
                let peer = call.peer.clone();
                info!(%peer, "call connected");
                self.emit(SessionEvent::CallConnected { peer });
            }
            Err(err) => {
                warn!(error = %err, "negotiation rejected the answer");
                self.end_call();
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::InitiateCall { target } => self.initiate_call(target),
            Command::AcceptCall => self.accept_call(),
            Command::EndCall => self.end_call(),
            // Shutdown is consumed by the run loop.
            Command::Shutdown => {}
        }
    }

    fn initiate_call(&mut self, target: String) {
        let target = target.trim().to_string();
        if target.is_empty() {
            self.emit(SessionEvent::CallRejected {
                reason: "target identifier is empty".to_string(),
            });
            return;
        }
        if !self.registration.is_acknowledged() {
            self.emit(SessionEvent::CallRejected {
                reason: "not registered with the relay yet".to_string(),
            });
            return;
        }
        if self.call.is_some() {
            debug!("new outgoing call supersedes the active attempt");
            self.end_call();
        }
        let id = self.next_attempt();
        match self.spawn_negotiator(id, true) {
            Ok(negotiator) => {
                self.negotiator = Some(negotiator);
                self.call = Some(CallAttempt::outgoing(id, target.clone()));
                info!(%target, "initiating call");
            }
            Err(err) => {
                warn!(error = %err, "could not start negotiation");
                self.emit(SessionEvent::CallRejected {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn accept_call(&mut self) {
        let Some(call) = self.call.as_mut() else {
            self.emit(SessionEvent::CallRejected {
                reason: "no incoming call to accept".to_string(),
            });
            return;
        };
        if call.phase != CallPhase::Ringing {
            self.emit(SessionEvent::CallRejected {
                reason: "no incoming call to accept".to_string(),
            });
            return;
        }
        call.phase = CallPhase::Answering;
        let id = call.id;
        let Some(offer) = call.remote_offer.take() else {
            self.end_call();
            return;
        };
        match self.spawn_negotiator(id, false) {
            Ok(mut negotiator) => match negotiator.feed_remote(offer) {
                Ok(()) => {
                    self.negotiator = Some(negotiator);
                    debug!("answering call");
                }
                Err(err) => {
                    warn!(error = %err, "negotiation rejected the offer");
                    self.end_call();
                }
            },
            Err(err) => {
                warn!(error = %err, "could not start negotiation");
                self.end_call();
            }
        }
    }

    /// Idempotent: release the negotiator, clear the attempt slot, and
    /// notify once.
    fn end_call(&mut self) {
        self.negotiator = None;
        if let Some(call) = self.call.take() {
            info!(peer = %call.peer, "call ended");
            self.emit(SessionEvent::CallEnded);
        }
    }

    fn handle_negotiation(&mut self, attempt: u64, event: NegotiationEvent) {
        // Late events aimed at a superseded attempt are ignored, not acted on.
        if self.call.as_ref().map(|c| c.id) != Some(attempt) {
            debug!(attempt, "negotiation event for a superseded attempt, ignoring");
            return;
        }
        match event {
            NegotiationEvent::LocalBlob(blob) => self.handle_local_blob(blob),
            NegotiationEvent::ChannelReady => {
                info!("data channel ready");
                self.emit(SessionEvent::ChannelReady);
            }
            NegotiationEvent::Failed(reason) => {
                warn!(%reason, "negotiation failed");
                self.end_call();
            }
        }
    }

    fn handle_local_blob(&mut self, blob: Value) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        match (call.direction, call.phase) {
            (CallDirection::Initiator, CallPhase::Offering) => {
                call.phase = CallPhase::AwaitingAnswer;
                let peer = call.peer.clone();
                let frame = ClientFrame::CallUser {
                    user_to_call: peer.clone(),
                    signal_data: blob,
                    from: self.short_id.clone(),
                    name: self.config.display_name.clone(),
                };
                debug!(%peer, "sending offer");
                if !self.send_frame(frame) {
                    self.emit(SessionEvent::SendFailed);
                }
            }
            (CallDirection::Answerer, CallPhase::Answering) => {
                call.phase = CallPhase::Connected;
                let peer = call.peer.clone();
                let frame = ClientFrame::AnswerCall {
                    signal: blob,
                    to: peer.clone(),
                };
                debug!(%peer, "sending answer");
                if self.send_frame(frame) {
                    info!(%peer, "call connected");
                    self.emit(SessionEvent::CallConnected { peer });
                } else {
                    self.emit(SessionEvent::SendFailed);
                }
            }
            (direction, phase) => {
                debug!(?direction, ?phase, "unexpected local blob, ignoring")
            }
        }
    }

    fn spawn_negotiator(
        &mut self,
        attempt: u64,
        initiator: bool,
    ) -> Result<Box<dyn Negotiator>, NegotiationError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let negotiator = self.negotiators.create(initiator, tx)?;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal
                    .send(EngineEvent::Negotiation { attempt, event })
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(negotiator)
    }

    fn next_attempt(&mut self) -> u64 {
        self.next_attempt_id += 1;
        self.next_attempt_id
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
