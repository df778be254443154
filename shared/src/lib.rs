use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod codec;
pub mod overlay;

pub use codec::{decode_binary, decode_text, encode, Frame, ProtocolError, WireFormat};
pub use overlay::{ChatEntry, ChatOverlay};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const ENTITY_SIZE: f32 = 20.0;
pub const PLAYER_SPEED: f32 = 200.0;
pub const TICK_RATE: u32 = 30;
pub const CHAT_TTL_MS: u64 = 5000;
pub const MAX_CHAT_BUBBLES: usize = 2;
pub const MAX_CHAT_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 24;

/// Movement intent of an entity. `None` means no direction is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    #[default]
    None,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit displacement in screen coordinates (y grows downwards).
    pub fn delta(self) -> (f32, f32) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
            Direction::None => (0.0, 0.0),
        }
    }

    pub fn is_none(self) -> bool {
        self == Direction::None
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "w" => Ok(Direction::Up),
            "down" | "s" => Ok(Direction::Down),
            "left" | "a" => Ok(Direction::Left),
            "right" | "d" => Ok(Direction::Right),
            "none" => Ok(Direction::None),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Motion fields carried by every tick snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub moving: bool,
}

/// A chat bubble still alive on the sender's overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub text: String,
    pub remaining_ms: u64,
}

/// Full public description of an entity, sent on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: u32,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub moving: bool,
    pub messages: Vec<ChatLine>,
}

impl PlayerInfo {
    pub fn state(&self) -> PlayerState {
        PlayerState {
            x: self.x,
            y: self.y,
            direction: self.direction,
            moving: self.moving,
        }
    }
}

/// Intents sent from a client to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientPacket {
    MoveStart {
        direction: Direction,
    },
    MoveStop,
    Chat {
        text: String,
        sequence: Option<u32>,
    },
}

/// Messages pushed from the server to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ServerPacket {
    CurrentPlayers {
        players: HashMap<u32, PlayerInfo>,
    },
    YourInfo {
        id: u32,
        name: String,
        color: String,
    },
    NewPlayer {
        player: PlayerInfo,
    },
    PlayerDisconnected {
        id: u32,
    },
    State {
        tick: u32,
        players: HashMap<u32, PlayerState>,
    },
    Chat {
        id: u32,
        text: String,
        sequence: Option<u32>,
    },
}

/// World dimensions and motion constants shared by the server tick and
/// client-side prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub entity_size: f32,
    pub speed: f32,
    pub tick_rate: u32,
    pub chat_ttl: Duration,
    pub chat_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            entity_size: ENTITY_SIZE,
            speed: PLAYER_SPEED,
            tick_rate: TICK_RATE,
            chat_ttl: Duration::from_millis(CHAT_TTL_MS),
            chat_capacity: MAX_CHAT_BUBBLES,
        }
    }
}

impl WorldConfig {
    /// Fixed simulation step of one tick, in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(self.tick_dt())
    }

    pub fn max_x(&self) -> f32 {
        (self.width - self.entity_size).max(0.0)
    }

    pub fn max_y(&self) -> f32 {
        (self.height - self.entity_size).max(0.0)
    }

    pub fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (x.clamp(0.0, self.max_x()), y.clamp(0.0, self.max_y()))
    }

    /// Moves a position `speed * dt` along `direction`, then clamps it into
    /// the world bounds.
    pub fn step(&self, x: f32, y: f32, direction: Direction, dt: f32) -> (f32, f32) {
        let distance = self.speed * dt;
        let (dx, dy) = direction.delta();
        self.clamp(x + dx * distance, y + dy * distance)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        (0.0..=self.max_x()).contains(&x) && (0.0..=self.max_y()).contains(&y)
    }
}
