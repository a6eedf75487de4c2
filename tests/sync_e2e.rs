use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use theloop_lib::{
    client::SyncAgent,
    clock::ManualClock,
    config::ServerConfig,
    cycle::{CycleConfig, PhaseKind},
    protocol::{ClientCommand, ServerEvent},
    server::{serve_on, AppState},
    timer::{AdvisoryGate, CommandGate, TimerAction, TimerController},
};
use tokio::{net::TcpListener, net::TcpStream, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    timer: TimerController,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn spawn(listener: TcpListener, clock: &ManualClock) -> Self {
        Self::spawn_gated(listener, clock, Arc::new(AdvisoryGate)).await
    }

    async fn spawn_gated(
        listener: TcpListener,
        clock: &ManualClock,
        gate: Arc<dyn CommandGate>,
    ) -> Self {
        let addr = listener.local_addr().unwrap();
        let timer = TimerController::new(Arc::new(clock.clone()));
        let shutdown = CancellationToken::new();
        let state = AppState::new(ServerConfig::default(), timer.clone())
            .with_gate(gate)
            .with_shutdown(shutdown.clone());
        let handle = tokio::spawn(serve_on(listener, state));
        Self {
            addr,
            timer,
            shutdown,
            handle,
        }
    }

    async fn start(clock: &ManualClock) -> Self {
        Self::spawn(TcpListener::bind("127.0.0.1:0").await.unwrap(), clock).await
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        timeout(WAIT, self.handle).await.unwrap().unwrap().unwrap();
    }
}

async fn next_event(client: &mut Client) -> ServerEvent {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return ServerEvent::from_json(&text).unwrap();
        }
    }
}

async fn open(server: &TestServer) -> Client {
    let (client, _) = connect_async(server.url()).await.unwrap();
    client
}

#[tokio::test]
async fn hello_then_broadcast_to_everyone() {
    let clock = ManualClock::new(1_000_000);
    let server = TestServer::start(&clock).await;

    let mut alice = open(&server).await;
    let mut bob = open(&server).await;

    for client in [&mut alice, &mut bob] {
        match next_event(client).await {
            ServerEvent::State(record) => assert!(!record.is_running()),
            other => panic!("expected hello, got {other:?}"),
        }
    }

    let start = ClientCommand::Start {
        admin_id: Some("alice".into()),
    };
    alice.send(Message::Text(start.to_json())).await.unwrap();

    // The sender hears its own broadcast like everyone else.
    for client in [&mut alice, &mut bob] {
        match next_event(client).await {
            ServerEvent::Started(record) => {
                assert_eq!(record.start_timestamp(), Some(1_000_000));
                assert_eq!(record.started_by(), Some("alice"));
            }
            other => panic!("expected started, got {other:?}"),
        }
    }

    bob.send(Message::Text(ClientCommand::Stop.to_json()))
        .await
        .unwrap();
    for client in [&mut alice, &mut bob] {
        assert!(matches!(next_event(client).await, ServerEvent::Stopped(r) if !r.is_running()));
    }

    server.stop().await;
}

#[tokio::test]
async fn late_joiner_sees_the_same_start() {
    let clock = ManualClock::new(0);
    let server = TestServer::start(&clock).await;

    server.timer.start("admin".into()).await;
    clock.advance(1_920_000);

    let mut late = open(&server).await;
    match next_event(&mut late).await {
        ServerEvent::State(record) => assert_eq!(record.start_timestamp(), Some(0)),
        other => panic!("expected hello, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_ignored() {
    let clock = ManualClock::new(0);
    let server = TestServer::start(&clock).await;

    let mut client = open(&server).await;
    next_event(&mut client).await;

    for frame in ["not json", r#"{"event":"timer:explode"}"#, r#"{"data":{}}"#] {
        client.send(Message::Text(frame.into())).await.unwrap();
    }
    client
        .send(Message::Text(r#"{"event":"timer:start","data":{"adminId":7}}"#.into()))
        .await
        .unwrap();

    match next_event(&mut client).await {
        ServerEvent::Started(record) => assert_eq!(record.started_by(), Some("admin")),
        other => panic!("expected started, got {other:?}"),
    }

    server.stop().await;
}

struct StartLocked;

impl CommandGate for StartLocked {
    fn admit(&self, action: TimerAction, _requested_by: Option<&str>) -> anyhow::Result<String> {
        match action {
            TimerAction::Start => anyhow::bail!("starting is locked"),
            TimerAction::Stop => Ok("admin".to_string()),
        }
    }
}

#[tokio::test]
async fn refused_start_is_never_broadcast() {
    let clock = ManualClock::new(0);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = TestServer::spawn_gated(listener, &clock, Arc::new(StartLocked)).await;

    let mut client = open(&server).await;
    next_event(&mut client).await;

    let start = ClientCommand::Start {
        admin_id: Some("eve".into()),
    };
    client.send(Message::Text(start.to_json())).await.unwrap();
    client
        .send(Message::Text(ClientCommand::Stop.to_json()))
        .await
        .unwrap();

    // Frames are handled in order, so a started broadcast would come first.
    match next_event(&mut client).await {
        ServerEvent::Stopped(record) => assert!(!record.is_running()),
        other => panic!("expected stopped, got {other:?}"),
    }
    assert!(!server.timer.current().await.is_running());

    server.stop().await;
}

#[tokio::test]
async fn foreign_origin_is_refused() {
    let clock = ManualClock::new(0);
    let server = TestServer::start(&clock).await;

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://evil.example".parse().unwrap());

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("upgrade from a foreign origin was accepted"),
    }

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://localhost:5173".parse().unwrap());
    assert!(connect_async(request).await.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn agent_mirrors_commands_and_derives_phase() {
    let server_clock = ManualClock::new(0);
    let server = TestServer::start(&server_clock).await;

    let agent_clock = ManualClock::new(1_920_000);
    let agent = SyncAgent::with_clock(
        server.url(),
        Arc::new(CycleConfig::default()),
        Arc::new(agent_clock.clone()),
    );

    assert!(agent.start_timer(None).is_err());

    agent.connect().await.unwrap();
    agent.connect().await.unwrap();
    agent.wait_until_connected(WAIT).await.unwrap();
    assert_eq!(agent.start_timestamp(), None);

    let mut mirror = agent.mirror();
    let _ = mirror.borrow_and_update();
    agent.start_timer(Some("dana".into())).unwrap();
    timeout(WAIT, mirror.wait_for(|start| *start == Some(0)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.timer.current().await.started_by(), Some("dana"));

    let mut views = agent.views();
    let view = timeout(WAIT, views.wait_for(|view| view.is_running))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(view.phase, PhaseKind::ShortBreak);
    assert_eq!(view.remaining_seconds, 480);
    assert_eq!(view.cycle_number, 1);

    agent.stop_timer().unwrap();
    timeout(WAIT, mirror.wait_for(|start| start.is_none()))
        .await
        .unwrap()
        .unwrap();

    agent.shutdown().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn agent_reconnects_and_adopts_the_new_hello() {
    let clock = ManualClock::new(0);
    let first = TestServer::start(&clock).await;
    let addr = first.addr;
    first.timer.start("admin".into()).await;

    let agent = SyncAgent::with_clock(
        first.url(),
        Arc::new(CycleConfig::default()),
        Arc::new(clock.clone()),
    )
    .with_reconnect_delay(Duration::from_millis(50));
    agent.connect().await.unwrap();
    agent.wait_until_connected(WAIT).await.unwrap();
    assert_eq!(agent.start_timestamp(), Some(0));

    let mut connected = agent.connected();
    first.stop().await;
    timeout(WAIT, connected.wait_for(|is_connected| !*is_connected))
        .await
        .unwrap()
        .unwrap();
    // The last known start survives the outage.
    assert_eq!(agent.start_timestamp(), Some(0));
    assert!(agent.stop_timer().is_err());

    clock.set(500_000);
    let second = TestServer::spawn(TcpListener::bind(addr).await.unwrap(), &clock).await;
    second.timer.start("admin".into()).await;

    agent.wait_until_connected(WAIT).await.unwrap();
    let mut mirror = agent.mirror();
    timeout(WAIT, mirror.wait_for(|start| *start == Some(500_000)))
        .await
        .unwrap()
        .unwrap();

    agent.shutdown().await.unwrap();
    second.stop().await;
}
