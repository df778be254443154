//! Integration tests for the plaza server and client
//!
//! These tests run a real server on a loopback port and drive it with real
//! websocket connections whose frames are fed into client sessions.

use client::input::Command;
use client::network::{connect_url, decode_message, to_message, CommandOutcome, Session};
use futures_util::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::error::ServerError;
use server::network::{Server, ServerMessage};
use shared::{encode, ClientPacket, Direction, ServerPacket, WireFormat, WorldConfig};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEADLINE: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    control: mpsc::Sender<ServerMessage>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let mut server = Server::bind(ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            ..config
        })
        .await
        .expect("Failed to bind test server");

        let addr = server.local_addr();
        let control = server.sender();
        let task = tokio::spawn(async move { server.run().await });
        Self {
            addr,
            control,
            task,
        }
    }

    async fn stop(self) {
        self.control.send(ServerMessage::Shutdown).await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

/// A websocket connection feeding a client session, plus a log of every
/// discrete event it received.
struct TestClient {
    ws: WsStream,
    session: Session,
    format: WireFormat,
    events: Vec<ServerPacket>,
    binary_frames: usize,
    close_reason: Option<String>,
}

impl TestClient {
    async fn connect(addr: SocketAddr, name: &str, format: WireFormat) -> Self {
        Self::connect_with_world(addr, name, format, WorldConfig::default()).await
    }

    async fn connect_with_world(
        addr: SocketAddr,
        name: &str,
        format: WireFormat,
        world: WorldConfig,
    ) -> Self {
        let url = connect_url(&addr.to_string(), Some(name));
        let (ws, _) = connect_async(url.as_str())
            .await
            .expect("Failed to connect to test server");
        Self {
            ws,
            session: Session::new(world),
            format,
            events: Vec::new(),
            binary_frames: 0,
            close_reason: None,
        }
    }

    fn receive(&mut self, message: Message) {
        if message.is_binary() {
            self.binary_frames += 1;
        }
        if let Message::Close(Some(frame)) = &message {
            self.close_reason = Some(frame.reason.as_str().to_string());
        }
        if let Some(Ok(packet)) = decode_message(&message) {
            if !matches!(packet, ServerPacket::State { .. }) {
                self.events.push(packet);
            }
        }
        self.session.handle_message(&message, Instant::now());
    }

    /// Reads frames until `done` holds. Returns false on timeout or close.
    async fn pump_until<F: Fn(&TestClient) -> bool>(&mut self, done: F) -> bool {
        let deadline = tokio::time::Instant::now() + DEADLINE;
        while !done(self) {
            match timeout_at(deadline, self.ws.next()).await {
                Ok(Some(Ok(message))) => self.receive(message),
                _ => return false,
            }
        }
        true
    }

    /// Reads whatever arrives during `duration`.
    async fn pump_for(&mut self, duration: Duration) {
        let deadline = tokio::time::Instant::now() + duration;
        while let Ok(Some(Ok(message))) = timeout_at(deadline, self.ws.next()).await {
            self.receive(message);
        }
    }

    async fn send(&mut self, packet: &ClientPacket) {
        let frame = encode(packet, self.format).unwrap();
        self.ws.send(to_message(frame)).await.unwrap();
    }

    async fn command(&mut self, command: Command) {
        if let CommandOutcome::Send(packet) = self.session.handle_command(command, Instant::now())
        {
            self.send(&packet).await;
        }
    }

    async fn joined(&mut self) -> u32 {
        assert!(
            self.pump_until(|c| c.session.game_state.local_entry().is_some())
                .await,
            "never received own identity"
        );
        self.session.game_state.local_id.unwrap()
    }

    fn name_of(&self, id: u32) -> Option<String> {
        self.session
            .game_state
            .entry(id)
            .and_then(|entry| entry.identity.as_ref())
            .map(|identity| identity.name.clone())
    }

    fn leave_events_for(&self, id: u32) -> usize {
        self.events
            .iter()
            .filter(|packet| matches!(packet, ServerPacket::PlayerDisconnected { id: left } if *left == id))
            .count()
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// JOIN / LEAVE TESTS
mod membership_tests {
    use super::*;

    /// Tests that a late joiner learns existing names and existing clients
    /// learn the newcomer's name, and that ticks never erase them
    #[tokio::test]
    async fn identities_propagate_both_ways() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut alpha = TestClient::connect(server.addr, "Alpha", WireFormat::Json).await;
        let alpha_id = alpha.joined().await;
        assert_eq!(alpha.name_of(alpha_id).as_deref(), Some("Alpha"));

        let mut beta = TestClient::connect(server.addr, "Beta", WireFormat::Json).await;
        let beta_id = beta.joined().await;
        assert_ne!(alpha_id, beta_id);

        // Beta got Alpha through the initial listing
        assert_eq!(beta.name_of(alpha_id).as_deref(), Some("Alpha"));

        // Alpha got Beta through the join event
        assert!(alpha.pump_until(|c| c.name_of(beta_id).is_some()).await);
        assert_eq!(alpha.name_of(beta_id).as_deref(), Some("Beta"));

        // Motion-only snapshots keep flowing without touching names
        let tick = beta.session.game_state.last_tick;
        assert!(
            beta.pump_until(|c| c.session.game_state.last_tick >= tick + 5)
                .await
        );
        assert_eq!(beta.name_of(alpha_id).as_deref(), Some("Alpha"));

        alpha.close().await;
        beta.close().await;
        server.stop().await;
    }

    /// Tests that a disconnect removes the entity and is announced once
    #[tokio::test]
    async fn disconnect_is_announced_exactly_once() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut stayer = TestClient::connect(server.addr, "Stayer", WireFormat::Json).await;
        stayer.joined().await;
        let mut leaver = TestClient::connect(server.addr, "Leaver", WireFormat::Json).await;
        let leaver_id = leaver.joined().await;

        assert!(
            stayer
                .pump_until(|c| c.session.game_state.entry(leaver_id).is_some())
                .await
        );

        leaver.close().await;

        assert!(
            stayer
                .pump_until(|c| c.session.game_state.entry(leaver_id).is_none())
                .await
        );
        stayer.pump_for(Duration::from_millis(300)).await;

        assert_eq!(stayer.leave_events_for(leaver_id), 1);
        assert!(stayer.session.game_state.entry(leaver_id).is_none());

        stayer.close().await;
        server.stop().await;
    }

    /// Tests that a full server turns new connections away with a reason
    #[tokio::test]
    async fn full_server_rejects_with_close_frame() {
        let server = TestServer::start(ServerConfig {
            max_clients: 1,
            ..ServerConfig::default()
        })
        .await;

        let mut first = TestClient::connect(server.addr, "First", WireFormat::Json).await;
        first.joined().await;

        let mut second = TestClient::connect(server.addr, "Second", WireFormat::Json).await;
        assert!(second.pump_until(|c| c.close_reason.is_some()).await);
        assert_eq!(second.close_reason.as_deref(), Some("server full"));
        assert!(second.session.game_state.local_id.is_none());

        first.close().await;
        server.stop().await;
    }

    /// Tests that ids are not handed out twice after a client leaves
    #[tokio::test]
    async fn ids_are_not_reused() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut first = TestClient::connect(server.addr, "One", WireFormat::Json).await;
        let first_id = first.joined().await;
        first.close().await;

        let mut second = TestClient::connect(server.addr, "Two", WireFormat::Json).await;
        let second_id = second.joined().await;
        assert!(second_id > first_id);

        second.close().await;
        server.stop().await;
    }
}

/// MOVEMENT TESTS
mod movement_tests {
    use super::*;

    fn fast_world() -> WorldConfig {
        WorldConfig {
            speed: 3000.0,
            ..WorldConfig::default()
        }
    }

    /// Tests that holding a direction walks the entity into the wall and
    /// no further
    #[tokio::test]
    async fn movement_clamps_at_world_edge() {
        let server = TestServer::start(ServerConfig {
            world: fast_world(),
            ..ServerConfig::default()
        })
        .await;

        let mut mover =
            TestClient::connect_with_world(server.addr, "Mover", WireFormat::Json, fast_world())
                .await;
        mover.joined().await;

        mover.command(Command::Press(Direction::Left)).await;
        assert!(
            mover
                .pump_until(|c| {
                    let local = c.session.game_state.local_entry();
                    local.map(|e| e.moving && e.x == 0.0).unwrap_or(false)
                })
                .await
        );

        mover.pump_for(Duration::from_millis(200)).await;
        let local = mover.session.game_state.local_entry().unwrap();
        assert_eq!(local.x, 0.0);
        assert_eq!(local.direction, Direction::Left);

        mover.close().await;
        server.stop().await;
    }

    /// Tests that a stop intent halts the entity and clears its direction
    #[tokio::test]
    async fn stop_halts_and_clears_direction() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut walker = TestClient::connect(server.addr, "Walker", WireFormat::Json).await;
        let id = walker.joined().await;

        walker.command(Command::Press(Direction::Down)).await;
        assert!(
            walker
                .pump_until(|c| c.session.game_state.entry(id).map(|e| e.moving).unwrap_or(false))
                .await
        );

        walker.command(Command::Stop).await;
        assert!(
            walker
                .pump_until(|c| c.session.game_state.entry(id).map(|e| !e.moving).unwrap_or(false))
                .await
        );
        let stopped_at = walker.session.game_state.entry(id).unwrap().y;
        assert_eq!(
            walker.session.game_state.entry(id).unwrap().direction,
            Direction::None
        );

        walker.pump_for(Duration::from_millis(200)).await;
        assert_eq!(walker.session.game_state.entry(id).unwrap().y, stopped_at);

        walker.close().await;
        server.stop().await;
    }

    /// Tests that other clients see the mover's motion in snapshots
    #[tokio::test]
    async fn observers_see_motion() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut mover = TestClient::connect(server.addr, "Mover", WireFormat::Json).await;
        let mover_id = mover.joined().await;
        let mut watcher = TestClient::connect(server.addr, "Watcher", WireFormat::Json).await;
        watcher.joined().await;

        mover.command(Command::Press(Direction::Right)).await;
        assert!(
            watcher
                .pump_until(|c| {
                    c.session
                        .game_state
                        .entry(mover_id)
                        .map(|e| e.moving && e.direction == Direction::Right)
                        .unwrap_or(false)
                })
                .await
        );
        assert_eq!(watcher.name_of(mover_id).as_deref(), Some("Mover"));

        mover.close().await;
        watcher.close().await;
        server.stop().await;
    }
}

/// CHAT TESTS
mod chat_tests {
    use super::*;

    /// Tests that chat reaches other clients and the sender shows it once
    #[tokio::test]
    async fn chat_is_relayed_and_deduplicated_for_sender() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut speaker = TestClient::connect(server.addr, "Speaker", WireFormat::Json).await;
        let speaker_id = speaker.joined().await;
        let mut listener = TestClient::connect(server.addr, "Listener", WireFormat::Json).await;
        listener.joined().await;

        speaker.command(Command::Chat("  hello  ".to_string())).await;
        assert_eq!(
            speaker
                .session
                .game_state
                .local_entry()
                .unwrap()
                .messages
                .len(),
            1
        );

        assert!(
            listener
                .pump_until(|c| {
                    c.session
                        .game_state
                        .entry(speaker_id)
                        .and_then(|e| e.messages.newest())
                        .map(|m| m.text == "hello")
                        .unwrap_or(false)
                })
                .await
        );

        // The sender receives its own relay but does not show it twice
        assert!(
            speaker
                .pump_until(|c| c
                    .events
                    .iter()
                    .any(|p| matches!(p, ServerPacket::Chat { id, .. } if *id == speaker_id)))
                .await
        );
        assert_eq!(
            speaker
                .session
                .game_state
                .local_entry()
                .unwrap()
                .messages
                .len(),
            1
        );

        speaker.close().await;
        listener.close().await;
        server.stop().await;
    }

    /// Tests that blank chat is dropped by the server
    #[tokio::test]
    async fn blank_chat_is_not_relayed() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut speaker = TestClient::connect(server.addr, "Speaker", WireFormat::Json).await;
        speaker.joined().await;
        let mut listener = TestClient::connect(server.addr, "Listener", WireFormat::Json).await;
        listener.joined().await;

        speaker
            .send(&ClientPacket::Chat {
                text: "   ".to_string(),
                sequence: None,
            })
            .await;
        listener.pump_for(Duration::from_millis(300)).await;

        assert!(!listener
            .events
            .iter()
            .any(|p| matches!(p, ServerPacket::Chat { .. })));

        speaker.close().await;
        listener.close().await;
        server.stop().await;
    }

    /// Tests that a late joiner sees bubbles that are still on screen
    #[tokio::test]
    async fn late_joiner_sees_live_bubbles() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut speaker = TestClient::connect(server.addr, "Speaker", WireFormat::Json).await;
        let speaker_id = speaker.joined().await;
        speaker.command(Command::Chat("still here".to_string())).await;
        assert!(
            speaker
                .pump_until(|c| c
                    .events
                    .iter()
                    .any(|p| matches!(p, ServerPacket::Chat { .. })))
                .await
        );

        let mut late = TestClient::connect(server.addr, "Late", WireFormat::Json).await;
        late.joined().await;
        let bubble = late
            .session
            .game_state
            .entry(speaker_id)
            .and_then(|e| e.messages.newest())
            .map(|m| m.text.clone());
        assert_eq!(bubble.as_deref(), Some("still here"));

        speaker.close().await;
        late.close().await;
        server.stop().await;
    }
}

/// WIRE FORMAT TESTS
mod format_tests {
    use super::*;

    /// Tests a full session over binary frames
    #[tokio::test]
    async fn bincode_session_end_to_end() {
        let server = TestServer::start(ServerConfig {
            format: WireFormat::Bincode,
            ..ServerConfig::default()
        })
        .await;

        let mut client = TestClient::connect(server.addr, "Binary", WireFormat::Bincode).await;
        let id = client.joined().await;
        assert!(client.binary_frames >= 2);
        assert_eq!(client.name_of(id).as_deref(), Some("Binary"));

        client.command(Command::Press(Direction::Up)).await;
        assert!(
            client
                .pump_until(|c| c.session.game_state.entry(id).map(|e| e.moving).unwrap_or(false))
                .await
        );

        client.close().await;
        server.stop().await;
    }

    /// Tests that garbage frames are ignored and the connection survives
    #[tokio::test]
    async fn malformed_frames_do_not_drop_connection() {
        let server = TestServer::start(ServerConfig::default()).await;

        let mut client = TestClient::connect(server.addr, "Sloppy", WireFormat::Json).await;
        let id = client.joined().await;

        client.ws.send(Message::text("not json")).await.unwrap();
        client
            .ws
            .send(Message::text(r#"{"moveStart":{"direction":"none"}}"#))
            .await
            .unwrap();
        client.ws.send(Message::binary(vec![9, 9, 9])).await.unwrap();
        client
            .ws
            .send(Message::text(r#"{"moveStart":{"direction":"left"}}"#))
            .await
            .unwrap();

        assert!(
            client
                .pump_until(|c| {
                    c.session
                        .game_state
                        .entry(id)
                        .map(|e| e.moving && e.direction == Direction::Left)
                        .unwrap_or(false)
                })
                .await
        );

        client.close().await;
        server.stop().await;
    }
}
