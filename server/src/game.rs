//! Authoritative world state: the entity store, intent handlers and the tick
//! advance.
//!
//! `GameState` is owned by the server's main loop and mutated only from it,
//! so every intent handler and every tick pass runs to completion without
//! observing a partial write from another.

use crate::utils::{random_color, random_name};
use log::{debug, info};
use rand::Rng;
use shared::{
    ChatOverlay, ClientPacket, Direction, PlayerInfo, PlayerState, ServerPacket, WorldConfig,
    MAX_CHAT_LEN,
};
use std::collections::HashMap;
use std::time::Instant;

/// Distance kept from the world edges when choosing a spawn point.
const SPAWN_MARGIN: f32 = 50.0;

/// Server-side entity for one connection.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub moving: bool,
    pub messages: ChatOverlay,
}

impl Player {
    pub fn state(&self) -> PlayerState {
        PlayerState {
            x: self.x,
            y: self.y,
            direction: self.direction,
            moving: self.moving,
        }
    }

    pub fn info(&self, now: Instant) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
            x: self.x,
            y: self.y,
            direction: self.direction,
            moving: self.moving,
            messages: self.messages.lines(now),
        }
    }
}

/// A discrete event queued for fanout, optionally skipping one client.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub packet: ServerPacket,
    pub exclude: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub tick: u32,
    players: HashMap<u32, Player>,
    world: WorldConfig,
    outbox: Vec<Outgoing>,
}

impl GameState {
    pub fn new(world: WorldConfig) -> Self {
        Self {
            tick: 0,
            players: HashMap::new(),
            world,
            outbox: Vec::new(),
        }
    }

    pub fn world(&self) -> &WorldConfig {
        &self.world
    }

    /// Creates the entity for a freshly connected client and queues the join
    /// event for everyone else.
    pub fn add_player<R: Rng + ?Sized>(
        &mut self,
        client_id: u32,
        name: Option<String>,
        rng: &mut R,
        now: Instant,
    ) -> &Player {
        if self.players.contains_key(&client_id) {
            debug!("Player {} already exists, keeping current entity", client_id);
            return &self.players[&client_id];
        }

        let (spawn_x, spawn_y) = self.spawn_point(rng);
        let player = Player {
            id: client_id,
            name: name.unwrap_or_else(|| random_name(rng)),
            color: random_color(rng),
            x: spawn_x,
            y: spawn_y,
            direction: Direction::None,
            moving: false,
            messages: ChatOverlay::new(self.world.chat_capacity, self.world.chat_ttl),
        };

        info!(
            "Added player {} '{}' at ({:.1}, {:.1})",
            client_id, player.name, player.x, player.y
        );

        self.outbox.push(Outgoing {
            packet: ServerPacket::NewPlayer {
                player: player.info(now),
            },
            exclude: Some(client_id),
        });

        self.players.entry(client_id).or_insert(player)
    }

    fn spawn_point<R: Rng + ?Sized>(&self, rng: &mut R) -> (f32, f32) {
        let x = spawn_axis(rng, self.world.max_x());
        let y = spawn_axis(rng, self.world.max_y());
        (x, y)
    }

    pub fn player(&self, client_id: u32) -> Option<&Player> {
        self.players.get(&client_id)
    }

    /// Removes an entity. Calling it again for the same id is a no-op.
    pub fn remove_player(&mut self, client_id: u32) -> Option<Player> {
        let removed = self.players.remove(&client_id);
        if removed.is_some() {
            info!("Removed player {}", client_id);
        }
        removed
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Routes one decoded intent to its handler. Returns false when the
    /// intent was ignored.
    pub fn apply(&mut self, client_id: u32, packet: ClientPacket, now: Instant) -> bool {
        match packet {
            ClientPacket::MoveStart { direction } => self.on_move_start(client_id, direction),
            ClientPacket::MoveStop => self.on_move_stop(client_id),
            ClientPacket::Chat { text, sequence } => {
                self.on_chat(client_id, &text, sequence, now)
            }
        }
    }

    /// Starts (or re-aims) movement. A start while already moving only
    /// refreshes the direction.
    pub fn on_move_start(&mut self, client_id: u32, direction: Direction) -> bool {
        if direction.is_none() {
            debug!("Ignoring moveStart without direction from {}", client_id);
            return false;
        }
        match self.players.get_mut(&client_id) {
            Some(player) => {
                player.direction = direction;
                player.moving = true;
                true
            }
            None => false,
        }
    }

    /// Stops movement and clears the direction so a stale one cannot be replayed.
    pub fn on_move_stop(&mut self, client_id: u32) -> bool {
        match self.players.get_mut(&client_id) {
            Some(player) => {
                player.moving = false;
                player.direction = Direction::None;
                true
            }
            None => false,
        }
    }

    /// Records a chat line on the sender's overlay and queues its relay to
    /// every client, the sender included.
    pub fn on_chat(
        &mut self,
        client_id: u32,
        text: &str,
        sequence: Option<u32>,
        now: Instant,
    ) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let Some(player) = self.players.get_mut(&client_id) else {
            return false;
        };

        let text: String = text.chars().take(MAX_CHAT_LEN).collect();
        player.messages.push(text.clone(), now);
        debug!("Chat from {}: {}", client_id, text);

        self.outbox.push(Outgoing {
            packet: ServerPacket::Chat {
                id: client_id,
                text,
                sequence,
            },
            exclude: None,
        });
        true
    }

    /// Removes the entity and queues exactly one leave event for it.
    pub fn on_disconnect(&mut self, client_id: u32) -> bool {
        if self.remove_player(client_id).is_none() {
            return false;
        }
        self.outbox.push(Outgoing {
            packet: ServerPacket::PlayerDisconnected { id: client_id },
            exclude: None,
        });
        true
    }

    /// Moves every entity that is currently moving by `speed * dt` and clamps
    /// it to the world. Returns the number of entities advanced.
    pub fn advance(&mut self, dt: f32) -> usize {
        let world = self.world;
        let mut moved = 0;

        for player in self.players.values_mut() {
            if !player.moving || player.direction.is_none() {
                continue;
            }
            let (x, y) = world.step(player.x, player.y, player.direction, dt);
            player.x = x;
            player.y = y;
            moved += 1;
        }

        moved
    }

    pub fn sweep_messages(&mut self, now: Instant) -> usize {
        self.players
            .values_mut()
            .map(|player| player.messages.sweep(now))
            .sum()
    }

    pub fn snapshot(&self) -> HashMap<u32, PlayerState> {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.state()))
            .collect()
    }

    pub fn state_packet(&self) -> ServerPacket {
        ServerPacket::State {
            tick: self.tick,
            players: self.snapshot(),
        }
    }

    pub fn current_players(&self, now: Instant) -> HashMap<u32, PlayerInfo> {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.info(now)))
            .collect()
    }

    /// Drains the discrete events queued since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

// Uniform over the interior, falling back to the whole range on tiny worlds
fn spawn_axis<R: Rng + ?Sized>(rng: &mut R, max: f32) -> f32 {
    if max > 2.0 * SPAWN_MARGIN {
        rng.gen_range(SPAWN_MARGIN..=max - SPAWN_MARGIN)
    } else if max > 0.0 {
        rng.gen_range(0.0..=max)
    } else {
        0.0
    }
}
