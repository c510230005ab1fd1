use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use skiff::negotiation::stub::StubNegotiatorFactory;
use skiff::session::{SessionClient, SessionConfig, SessionEvent};
use skiff::transport::websocket::WebSocketConnector;
use skiff_pier::websocket::RelayState;

type Events = mpsc::UnboundedReceiver<SessionEvent>;

async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(skiff_pier::serve(listener, RelayState::new()));
    addr
}

fn spawn_client(addr: SocketAddr, name: &str) -> (SessionClient, Events) {
    let connector = Arc::new(WebSocketConnector::new(&format!("ws://{addr}")));
    SessionClient::spawn(
        connector,
        Arc::new(StubNegotiatorFactory::default()),
        SessionConfig {
            display_name: name.to_string(),
            ..SessionConfig::default()
        },
    )
}

/// Wait for the first event matching `pred`, skipping the rest.
async fn wait_for(
    events: &mut Events,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = Duration::from_secs(10);
    loop {
        let event = timeout(deadline, events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("engine stopped");
        if pred(&event) {
            return event;
        }
    }
}

#[test_timeout::tokio_timeout_test]
async fn two_clients_establish_a_session_through_the_relay() {
    let addr = spawn_relay().await;
    let (a, mut a_events) = spawn_client(addr, "alice");
    let (b, mut b_events) = spawn_client(addr, "bob");

    wait_for(&mut a_events, |e| matches!(e, SessionEvent::Registered { .. })).await;
    wait_for(&mut b_events, |e| matches!(e, SessionEvent::Registered { .. })).await;

    a.initiate_call(b.short_id()).unwrap();

    let ring = wait_for(&mut b_events, |e| {
        matches!(e, SessionEvent::IncomingCall { .. })
    })
    .await;
    match ring {
        SessionEvent::IncomingCall { from, name } => {
            assert_eq!(from, a.short_id());
            assert_eq!(name, "alice");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    b.accept_call().unwrap();

    let a_connected = wait_for(&mut a_events, |e| {
        matches!(e, SessionEvent::CallConnected { .. })
    })
    .await;
    assert_eq!(
        a_connected,
        SessionEvent::CallConnected {
            peer: b.short_id().to_string(),
        }
    );
    let b_connected = wait_for(&mut b_events, |e| {
        matches!(e, SessionEvent::CallConnected { .. })
    })
    .await;
    assert_eq!(
        b_connected,
        SessionEvent::CallConnected {
            peer: a.short_id().to_string(),
        }
    );

    wait_for(&mut a_events, |e| matches!(e, SessionEvent::ChannelReady)).await;
    wait_for(&mut b_events, |e| matches!(e, SessionEvent::ChannelReady)).await;
}

#[test_timeout::tokio_timeout_test]
async fn calling_an_unknown_identifier_reports_route_failure() {
    let addr = spawn_relay().await;
    let (a, mut a_events) = spawn_client(addr, "alice");
    wait_for(&mut a_events, |e| matches!(e, SessionEvent::Registered { .. })).await;

    a.initiate_call("ZZZZZ").unwrap();

    let failed = wait_for(&mut a_events, |e| {
        // Reaching Connected here would be a relay bug.
        assert!(!matches!(e, SessionEvent::CallConnected { .. }));
        matches!(e, SessionEvent::RouteFailed { .. })
    })
    .await;
    match failed {
        SessionEvent::RouteFailed { target, .. } => assert_eq!(target, "ZZZZZ"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn peer_disconnect_ends_the_call_via_broadcast() {
    let addr = spawn_relay().await;
    let (a, mut a_events) = spawn_client(addr, "alice");
    let (b, mut b_events) = spawn_client(addr, "bob");

    wait_for(&mut a_events, |e| matches!(e, SessionEvent::Registered { .. })).await;
    wait_for(&mut b_events, |e| matches!(e, SessionEvent::Registered { .. })).await;

    a.initiate_call(b.short_id()).unwrap();
    wait_for(&mut b_events, |e| {
        matches!(e, SessionEvent::IncomingCall { .. })
    })
    .await;
    b.accept_call().unwrap();
    wait_for(&mut a_events, |e| {
        matches!(e, SessionEvent::CallConnected { .. })
    })
    .await;

    // Alice goes away; the relay's broadcast ends the call on Bob's side.
    a.shutdown().unwrap();
    drop(a);
    wait_for(&mut b_events, |e| matches!(e, SessionEvent::CallEnded)).await;
}
