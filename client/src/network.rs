use crate::game::ClientGameState;
use crate::input::{parse_command, Command, InputManager, Wanderer};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    decode_binary, decode_text, encode, ClientPacket, Frame, ProtocolError, ServerPacket,
    WireFormat, WorldConfig,
};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest frame delta fed to prediction, so a stalled terminal does not
/// fling the local entity across the world.
const MAX_FRAME_DT: f32 = 0.25;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server: String,
    pub name: Option<String>,
    pub format: WireFormat,
    pub bot: bool,
    pub world: WorldConfig,
}

impl ClientOptions {
    pub fn url(&self) -> String {
        connect_url(&self.server, self.name.as_deref())
    }
}

/// Builds the websocket URL, adding the `ws://` scheme when missing and the
/// display name as a query parameter.
pub fn connect_url(server: &str, name: Option<&str>) -> String {
    let mut url = if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("ws://{}", server)
    };

    let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) else {
        return url;
    };

    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    if url.contains('?') {
        url.push('&');
    } else {
        if !url[authority_start..].contains('/') {
            url.push('/');
        }
        url.push('?');
    }
    url.push_str("name=");
    url.push_str(&encode_query_value(name));
    url
}

fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Decodes a data frame. Control frames yield `None`.
pub fn decode_message(message: &Message) -> Option<Result<ServerPacket, ProtocolError>> {
    match message {
        Message::Text(text) => Some(decode_text(text.as_str())),
        Message::Binary(bytes) => Some(decode_binary(bytes)),
        _ => None,
    }
}

pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(bytes) => Message::binary(bytes),
    }
}

/// What the caller should do after a command was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Send(ClientPacket),
    Nothing,
    Quit,
}

#[derive(Debug, Default, Clone, Copy)]
struct TrafficStats {
    packets: u64,
    bytes: u64,
    malformed: u64,
}

/// Socket-free client logic: the mirror, held input and traffic counters.
pub struct Session {
    pub game_state: ClientGameState,
    pub input: InputManager,
    stats: TrafficStats,
}

impl Session {
    pub fn new(world: WorldConfig) -> Self {
        Self {
            game_state: ClientGameState::new(world),
            input: InputManager::new(),
            stats: TrafficStats::default(),
        }
    }

    /// Applies one data frame to the mirror. Undecodable frames are counted
    /// and dropped.
    pub fn handle_message(&mut self, message: &Message, now: Instant) {
        let Some(decoded) = decode_message(message) else {
            return;
        };
        self.stats.packets += 1;
        self.stats.bytes += message.len() as u64;

        match decoded {
            Ok(packet) => self.handle_packet(packet, now),
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Dropping malformed frame: {}", e);
            }
        }
    }

    pub fn handle_packet(&mut self, packet: ServerPacket, now: Instant) {
        match packet {
            ServerPacket::YourInfo { id, name, color } => {
                info!("Joined as {} (id {}, {})", name, id, color);
                self.game_state.apply_your_info(id, name, color);
            }
            ServerPacket::NewPlayer { player } => {
                info!("{} joined", player.name);
                self.game_state.apply_new_player(&player, now);
            }
            ServerPacket::PlayerDisconnected { id } => {
                let name = self.display_name(id);
                if self.game_state.apply_player_left(id) {
                    info!("{} left", name);
                }
            }
            ServerPacket::Chat { id, text, sequence } => {
                let name = self.display_name(id);
                if self.game_state.apply_chat(id, &text, sequence, now) {
                    info!("[{}] {}", name, text);
                }
            }
            ServerPacket::CurrentPlayers { players } => {
                info!("{} player(s) online", players.len());
                self.game_state.apply_current_players(players, now);
            }
            packet @ ServerPacket::State { .. } => self.game_state.apply_server_packet(packet, now),
        }
    }

    pub fn handle_command(&mut self, command: Command, now: Instant) -> CommandOutcome {
        let packet = match command {
            Command::Press(direction) => self.input.press(direction),
            Command::Release(direction) => self.input.release(direction),
            Command::Steer(direction) => self.input.steer(direction),
            Command::Stop => self.input.release_all(),
            Command::Chat(text) => self.game_state.compose_chat(&text, now),
            Command::Who => {
                self.log_players();
                None
            }
            Command::Quit => return CommandOutcome::Quit,
            Command::Unknown(line) => {
                warn!("Unknown command: {}", line);
                None
            }
        };

        match packet {
            Some(packet) => CommandOutcome::Send(packet),
            None => CommandOutcome::Nothing,
        }
    }

    /// Per-frame work: prediction with the measured delta and bubble expiry.
    pub fn frame(&mut self, dt: f32, now: Instant) {
        self.game_state.predict(self.input.active(), dt.min(MAX_FRAME_DT));
        self.game_state.sweep(now);
    }

    fn display_name(&self, id: u32) -> String {
        self.game_state
            .entry(id)
            .map(|entry| entry.display_name())
            .unwrap_or_else(|| format!("#{}", id))
    }

    fn log_players(&self) {
        for entry in self.game_state.entries() {
            let marker = if Some(entry.id) == self.game_state.local_id {
                "*"
            } else {
                " "
            };
            info!(
                "{} {:>4} {:<20} ({:>5.1}, {:>5.1}) {}{}",
                marker,
                entry.id,
                entry.display_name(),
                entry.x,
                entry.y,
                entry.direction,
                if entry.moving { " moving" } else { "" }
            );
        }
    }

    /// One-line status, resetting the traffic counters.
    pub fn summary(&mut self, now: Instant) -> String {
        let stats = std::mem::take(&mut self.stats);
        let local = match self.game_state.local_entry() {
            Some(entry) => format!("at ({:.0}, {:.0})", entry.x, entry.y),
            None => "not joined".to_string(),
        };
        let bubbles: usize = self
            .game_state
            .entries()
            .iter()
            .map(|entry| entry.messages.visible(now).count())
            .sum();

        format!(
            "tick {} | {} players | {} | {} bubbles | {} pkt/s {} B/s{}",
            self.game_state.last_tick,
            self.game_state.len(),
            local,
            bubbles,
            stats.packets,
            stats.bytes,
            if stats.malformed > 0 {
                format!(" ({} malformed)", stats.malformed)
            } else {
                String::new()
            }
        )
    }
}

/// Console client: one websocket connection driven by stdin or a bot.
pub struct Client {
    socket: WsStream,
    options: ClientOptions,
    session: Session,
    wanderer: Option<Wanderer>,
    rng: StdRng,
}

impl Client {
    pub async fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let url = options.url();
        info!("Connecting to {}", url);
        let (socket, _) = connect_async(url.as_str()).await?;

        let wanderer = options.bot.then(|| Wanderer::new(Instant::now()));
        Ok(Self {
            socket,
            session: Session::new(options.world),
            options,
            wanderer,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    async fn send_packet(&mut self, packet: &ClientPacket) -> Result<(), ClientError> {
        let frame = encode(packet, self.options.format)?;
        self.socket.send(to_message(frame)).await?;
        Ok(())
    }

    /// Returns false when the client should stop.
    async fn dispatch(&mut self, command: Command) -> Result<bool, ClientError> {
        match self.session.handle_command(command, Instant::now()) {
            CommandOutcome::Send(packet) => self.send_packet(&packet).await?,
            CommandOutcome::Nothing => {}
            CommandOutcome::Quit => return Ok(false),
        }
        Ok(true)
    }

    pub async fn run(&mut self) -> Result<(), ClientError> {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = self.wanderer.is_none();

        let mut frame_interval = interval(Duration::from_millis(16));
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary_interval = interval(Duration::from_secs(1));
        summary_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        if stdin_open {
            info!("Commands: /up /down /left /right /release <dir> /stop /who /quit, anything else chats");
        }

        loop {
            tokio::select! {
                message = self.socket.next() => match message {
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => info!("Server closed the connection: {}", frame.reason.as_str()),
                            None => info!("Server closed the connection"),
                        }
                        break;
                    }
                    Some(Ok(message)) => self.session.handle_message(&message, Instant::now()),
                    Some(Err(e)) => {
                        error!("Connection error: {}", e);
                        return Err(e.into());
                    }
                    None => break,
                },

                line = stdin.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if let Some(command) = parse_command(&line) {
                            if !self.dispatch(command).await? {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    self.session.frame(dt, now);

                    let command = match self.wanderer.as_mut() {
                        Some(wanderer) => wanderer.poll(&mut self.rng, now),
                        None => None,
                    };
                    if let Some(command) = command {
                        self.dispatch(command).await?;
                    }
                },

                _ = summary_interval.tick() => {
                    info!("{}", self.session.summary(Instant::now()));
                },
            }
        }

        let _ = self.socket.close(None).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Direction, PlayerInfo, PlayerState};
    use std::collections::HashMap;

    fn session_with_local() -> Session {
        let now = Instant::now();
        let mut session = Session::new(WorldConfig::default());
        session.handle_packet(
            ServerPacket::CurrentPlayers {
                players: HashMap::new(),
            },
            now,
        );
        session.handle_packet(
            ServerPacket::NewPlayer {
                player: PlayerInfo {
                    id: 1,
                    name: "Me".to_string(),
                    color: "#ffffff".to_string(),
                    x: 100.0,
                    y: 100.0,
                    direction: Direction::None,
                    moving: false,
                    messages: Vec::new(),
                },
            },
            now,
        );
        session.handle_packet(
            ServerPacket::YourInfo {
                id: 1,
                name: "Me".to_string(),
                color: "#ffffff".to_string(),
            },
            now,
        );
        session
    }

    #[test]
    fn test_connect_url() {
        assert_eq!(connect_url("127.0.0.1:3000", None), "ws://127.0.0.1:3000");
        assert_eq!(
            connect_url("ws://localhost:3000", Some("Bob")),
            "ws://localhost:3000/?name=Bob"
        );
        assert_eq!(
            connect_url("ws://host/play", Some("Big Cat&Co")),
            "ws://host/play?name=Big%20Cat%26Co"
        );
        assert_eq!(
            connect_url("ws://host/?room=1", Some("a")),
            "ws://host/?room=1&name=a"
        );
        assert_eq!(connect_url("host:1", Some("   ")), "ws://host:1");
    }

    #[test]
    fn test_decode_message_by_frame_kind() {
        let packet = ServerPacket::PlayerDisconnected { id: 7 };

        let text = to_message(encode(&packet, WireFormat::Json).unwrap());
        assert_eq!(decode_message(&text).unwrap().unwrap(), packet);

        let binary = to_message(encode(&packet, WireFormat::Bincode).unwrap());
        assert_eq!(decode_message(&binary).unwrap().unwrap(), packet);

        assert!(decode_message(&Message::Ping(Vec::new().into())).is_none());
        assert!(decode_message(&Message::text("nope")).unwrap().is_err());
    }

    #[test]
    fn test_malformed_frames_are_counted_not_applied() {
        let now = Instant::now();
        let mut session = Session::new(WorldConfig::default());
        session.handle_message(&Message::text("{\"bogus\":1}"), now);
        session.handle_message(&Message::binary(vec![0xff, 0xff]), now);

        assert!(session.game_state.is_empty());
        assert!(session.summary(now).contains("(2 malformed)"));
        // Counters reset after each summary
        assert!(!session.summary(now).contains("malformed"));
    }

    #[test]
    fn test_commands_produce_intents() {
        let now = Instant::now();
        let mut session = session_with_local();

        assert_eq!(
            session.handle_command(Command::Press(Direction::Right), now),
            CommandOutcome::Send(ClientPacket::MoveStart {
                direction: Direction::Right
            })
        );
        assert_eq!(
            session.handle_command(Command::Press(Direction::Right), now),
            CommandOutcome::Nothing
        );
        assert_eq!(
            session.handle_command(Command::Stop, now),
            CommandOutcome::Send(ClientPacket::MoveStop)
        );
        assert_eq!(
            session.handle_command(Command::Who, now),
            CommandOutcome::Nothing
        );
        assert_eq!(
            session.handle_command(Command::Quit, now),
            CommandOutcome::Quit
        );
    }

    #[test]
    fn test_chat_command_echoes_locally() {
        let now = Instant::now();
        let mut session = session_with_local();

        let outcome = session.handle_command(Command::Chat("hi".to_string()), now);
        let CommandOutcome::Send(ClientPacket::Chat { text, sequence }) = outcome else {
            panic!("expected chat intent, got {:?}", outcome);
        };
        assert_eq!(session.game_state.local_entry().unwrap().messages.len(), 1);

        session.handle_packet(ServerPacket::Chat { id: 1, text, sequence }, now);
        assert_eq!(session.game_state.local_entry().unwrap().messages.len(), 1);
    }

    #[test]
    fn test_frame_predicts_held_direction() {
        let now = Instant::now();
        let mut session = session_with_local();
        session.handle_command(Command::Press(Direction::Down), now);

        session.frame(0.5, now);
        assert_eq!(session.game_state.local_entry().unwrap().y, 200.0);

        // Oversized deltas are capped
        session.frame(10.0, now);
        assert_eq!(session.game_state.local_entry().unwrap().y, 250.0);

        let mut players = HashMap::new();
        players.insert(
            1,
            PlayerState {
                x: 100.0,
                y: 120.0,
                direction: Direction::Down,
                moving: true,
            },
        );
        session.handle_packet(ServerPacket::State { tick: 3, players }, now);
        assert_eq!(session.game_state.local_entry().unwrap().y, 120.0);
        assert!(session.summary(now).starts_with("tick 3 | 1 players"));
    }

    #[test]
    fn test_leave_for_unknown_player_is_harmless() {
        let mut session = session_with_local();
        session.handle_packet(ServerPacket::PlayerDisconnected { id: 99 }, Instant::now());
        assert_eq!(session.game_state.len(), 1);
    }

    #[test]
    fn test_connect_to_missing_server_fails() {
        let options = ClientOptions {
            server: "127.0.0.1:1".to_string(),
            name: None,
            format: WireFormat::Json,
            bot: false,
            world: WorldConfig::default(),
        };
        let result = tokio_test::block_on(Client::connect(options));
        assert!(matches!(result, Err(ClientError::WebSocket(_))));
    }
}
