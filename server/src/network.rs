//! Server network layer: websocket listener, per-connection tasks and the
//! main loop that owns the game state.
//!
//! Connection tasks never touch the game state. They forward decoded intents
//! to the main loop over a channel and drain their own outbound lanes, so the
//! tick pass and the intent handlers all run on one logical writer.

use crate::client_manager::{ClientHandle, ClientManager, ClientOutbox, Delivery};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{GameState, Outgoing};
use crate::utils::name_from_query;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{decode_binary, decode_text, encode, ClientPacket, Frame, ServerPacket, WireFormat};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        addr: SocketAddr,
        name: Option<String>,
        handle: ClientHandle,
        reply: oneshot::Sender<Option<u32>>,
    },
    PacketReceived {
        client_id: u32,
        packet: ClientPacket,
    },
    Disconnected {
        client_id: u32,
    },
    Shutdown,
}

/// Wraps an encoded packet in a websocket frame.
pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(bytes) => Message::binary(bytes),
    }
}

fn close_message(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    }))
}

/// Authoritative server coordinating connections and the tick loop
pub struct Server {
    local_addr: SocketAddr,
    config: ServerConfig,
    clients: ClientManager,
    game_state: GameState,
    rng: StdRng,
    acceptor: JoinHandle<()>,

    server_tx: mpsc::Sender<ServerMessage>,
    server_rx: mpsc::Receiver<ServerMessage>,
}

impl Server {
    /// Binds the listener and starts accepting connections. Failing to bind
    /// is the only fatal error.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on ws://{}", local_addr);

        let (server_tx, server_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let acceptor = tokio::spawn(accept_loop(
            listener,
            server_tx.clone(),
            config.event_queue_capacity,
        ));

        Ok(Server {
            local_addr,
            clients: ClientManager::new(config.max_clients),
            game_state: GameState::new(config.world),
            rng: StdRng::from_entropy(),
            acceptor,
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Channel into the main loop; sending `ServerMessage::Shutdown` stops `run`.
    pub fn sender(&self) -> mpsc::Sender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    /// Main loop: applies inbound messages as they arrive and runs one tick
    /// per interval.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let mut tick_interval = interval(self.config.world.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started: {} Hz, speed {}, world {}x{}, {} frames",
            self.config.world.tick_rate,
            self.config.world.speed,
            self.config.world.width,
            self.config.world.height,
            self.config.format
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick();
                },
            }
        }

        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                addr,
                name,
                handle,
                reply,
            } => self.handle_connect(addr, name, handle, reply),
            ServerMessage::PacketReceived { client_id, packet } => {
                self.handle_packet(client_id, packet)
            }
            ServerMessage::Disconnected { client_id } => self.handle_disconnect(client_id),
            ServerMessage::Shutdown => {}
        }
    }

    fn handle_connect(
        &mut self,
        addr: SocketAddr,
        name: Option<String>,
        handle: ClientHandle,
        reply: oneshot::Sender<Option<u32>>,
    ) {
        let Some(client_id) = self.clients.add_client(addr, handle) else {
            warn!("Rejecting {}: server full", addr);
            let _ = reply.send(None);
            return;
        };

        let now = Instant::now();
        let (name, color) = {
            let player = self
                .game_state
                .add_player(client_id, name, &mut self.rng, now);
            (player.name.clone(), player.color.clone())
        };

        let greeting = [
            ServerPacket::CurrentPlayers {
                players: self.game_state.current_players(now),
            },
            ServerPacket::YourInfo {
                id: client_id,
                name,
                color,
            },
        ];
        for packet in &greeting {
            let delivered = self
                .encode(packet)
                .map(|message| self.clients.send_to(client_id, message));
            if delivered != Some(Delivery::Queued) {
                self.drop_client(client_id, "greeting not delivered");
                break;
            }
        }

        if reply.send(Some(client_id)).is_err() {
            self.drop_client(client_id, "connection task gone");
        }
        self.flush_outgoing();
    }

    fn handle_packet(&mut self, client_id: u32, packet: ClientPacket) {
        if !self.clients.contains(client_id) {
            debug!("Ignoring packet from departed client {}", client_id);
            return;
        }
        if !self.game_state.apply(client_id, packet, Instant::now()) {
            debug!("Intent from client {} had no effect", client_id);
        }
        self.flush_outgoing();
    }

    fn handle_disconnect(&mut self, client_id: u32) {
        self.clients.remove_client(client_id);
        self.game_state.on_disconnect(client_id);
        self.flush_outgoing();
    }

    /// Removes a client the server can no longer reach. The leave event is
    /// queued by the game state only if the entity still existed.
    fn drop_client(&mut self, client_id: u32, reason: &str) {
        if self.clients.remove_client(client_id) {
            warn!("Evicting client {}: {}", client_id, reason);
        }
        self.game_state.on_disconnect(client_id);
    }

    /// Fans out every queued discrete event. Clients that cannot take one are
    /// evicted, which may queue further leave events, so this drains until
    /// the queue stays empty.
    fn flush_outgoing(&mut self) {
        loop {
            let outgoing = self.game_state.take_outgoing();
            if outgoing.is_empty() {
                break;
            }

            let mut failed = Vec::new();
            for Outgoing { packet, exclude } in outgoing {
                if let Some(message) = self.encode(&packet) {
                    failed.extend(self.clients.broadcast(&message, exclude));
                }
            }

            failed.sort_unstable();
            failed.dedup();
            for client_id in failed {
                self.drop_client(client_id, "event queue full or closed");
            }
        }
    }

    /// One fixed step: advance motion, expire chat, publish the snapshot.
    fn tick(&mut self) {
        let now = Instant::now();
        self.game_state.advance(self.config.world.tick_dt());
        self.game_state.sweep_messages(now);
        self.game_state.tick = self.game_state.tick.wrapping_add(1);

        if self.game_state.tick % 300 == 0 {
            debug!(
                "Tick {}: {} clients, {} players",
                self.game_state.tick,
                self.clients.len(),
                self.game_state.len()
            );
        }

        if self.clients.is_empty() {
            return;
        }

        let packet = self.game_state.state_packet();
        if let Some(message) = self.encode(&packet) {
            for client_id in self.clients.publish_snapshot(&message) {
                self.drop_client(client_id, "snapshot lane closed");
            }
            self.flush_outgoing();
        }
    }

    fn encode(&self, packet: &ServerPacket) -> Option<Message> {
        match encode(packet, self.config.format) {
            Ok(frame) => Some(to_message(frame)),
            Err(e) => {
                error!("Failed to encode packet: {}", e);
                None
            }
        }
    }

    pub fn format(&self) -> WireFormat {
        self.config.format
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    server_tx: mpsc::Sender<ServerMessage>,
    queue_capacity: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let server_tx = server_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, server_tx, queue_capacity).await
                    {
                        debug!("Connection {} ended: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Drives one websocket from handshake to close.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::Sender<ServerMessage>,
    queue_capacity: usize,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;

    let mut requested_name = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            requested_name = request.uri().query().and_then(name_from_query);
            Ok(response)
        },
    )
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (handle, outbox) = ClientHandle::channel(queue_capacity);
    let (reply_tx, reply_rx) = oneshot::channel();
    server_tx
        .send(ServerMessage::Connected {
            addr,
            name: requested_name,
            handle,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ServerError::LoopClosed)?;

    let client_id = match reply_rx.await {
        Ok(Some(client_id)) => client_id,
        Ok(None) => {
            ws_sender.send(close_message("server full")).await?;
            return Ok(());
        }
        Err(_) => return Err(ServerError::LoopClosed),
    };

    let result = tokio::select! {
        result = read_loop(client_id, &mut ws_receiver, &server_tx) => result,
        result = write_loop(&mut ws_sender, outbox) => result,
    };

    let _ = server_tx
        .send(ServerMessage::Disconnected { client_id })
        .await;
    result
}

async fn read_loop(
    client_id: u32,
    receiver: &mut WsSource,
    server_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), ServerError> {
    while let Some(message) = receiver.next().await {
        let packet = match message? {
            Message::Text(text) => decode_text::<ClientPacket>(text.as_str()),
            Message::Binary(bytes) => decode_binary::<ClientPacket>(&bytes),
            Message::Close(_) => {
                debug!("Client {} requested close", client_id);
                break;
            }
            _ => continue,
        };

        match packet {
            Ok(packet) => server_tx
                .send(ServerMessage::PacketReceived { client_id, packet })
                .await
                .map_err(|_| ServerError::LoopClosed)?,
            Err(e) => debug!("Dropping malformed frame from client {}: {}", client_id, e),
        }
    }
    Ok(())
}

/// Sends queued events first, then the newest snapshot, until the main loop
/// drops this client's handle.
async fn write_loop(sender: &mut WsSink, mut outbox: ClientOutbox) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            biased;

            event = outbox.events.recv() => match event {
                Some(message) => sender.send(message).await?,
                None => break,
            },

            changed = outbox.snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = outbox.snapshots.borrow_and_update().clone();
                if let Some(message) = snapshot {
                    sender.send(message).await?;
                }
            },
        }
    }

    let _ = sender.send(close_message("disconnected by server")).await;
    Ok(())
}
