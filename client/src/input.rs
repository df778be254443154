//! Turns terminal commands into movement and chat intents

use rand::Rng;
use shared::{ClientPacket, Direction};
use std::time::{Duration, Instant};

/// Tracks held directions in press order. The most recent press wins, and
/// releasing it falls back to the one pressed before.
#[derive(Debug, Default)]
pub struct InputManager {
    held: Vec<Direction>,
}

impl InputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direction the local entity should currently move in.
    pub fn active(&self) -> Direction {
        self.held.last().copied().unwrap_or_default()
    }

    pub fn is_held(&self, direction: Direction) -> bool {
        self.held.contains(&direction)
    }

    pub fn press(&mut self, direction: Direction) -> Option<ClientPacket> {
        if direction.is_none() || self.is_held(direction) {
            return None;
        }
        self.held.push(direction);
        Some(ClientPacket::MoveStart { direction })
    }

    pub fn release(&mut self, direction: Direction) -> Option<ClientPacket> {
        let position = self.held.iter().position(|d| *d == direction)?;
        let was_active = position + 1 == self.held.len();
        self.held.remove(position);

        if !was_active {
            return None;
        }
        Some(match self.held.last() {
            Some(next) => ClientPacket::MoveStart { direction: *next },
            None => ClientPacket::MoveStop,
        })
    }

    /// Holds `direction` alone, dropping anything else that was held.
    pub fn steer(&mut self, direction: Direction) -> Option<ClientPacket> {
        if direction.is_none() {
            return self.release_all();
        }
        let changed = self.active() != direction;
        self.held.clear();
        self.held.push(direction);
        changed.then_some(ClientPacket::MoveStart { direction })
    }

    pub fn release_all(&mut self) -> Option<ClientPacket> {
        if self.held.is_empty() {
            return None;
        }
        self.held.clear();
        Some(ClientPacket::MoveStop)
    }
}

/// A parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Press(Direction),
    Release(Direction),
    Steer(Direction),
    Stop,
    Chat(String),
    Who,
    Quit,
    Unknown(String),
}

/// Parses one line. Lines starting with `/` are commands, everything else
/// is chat. Blank lines yield nothing.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Chat(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let verb = words.next().unwrap_or("").to_ascii_lowercase();
    let argument = words.next();

    let command = match (verb.as_str(), argument) {
        ("stop", _) => Command::Stop,
        ("who", _) => Command::Who,
        ("quit" | "exit", _) => Command::Quit,
        ("release", Some(arg)) => match arg.parse::<Direction>() {
            Ok(direction) if !direction.is_none() => Command::Release(direction),
            _ => Command::Unknown(line.to_string()),
        },
        ("go", Some(arg)) => match arg.parse::<Direction>() {
            Ok(direction) => Command::Steer(direction),
            Err(_) => Command::Unknown(line.to_string()),
        },
        (verb, None) => match verb.parse::<Direction>() {
            Ok(direction) if !direction.is_none() => Command::Press(direction),
            _ => Command::Unknown(line.to_string()),
        },
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

const BOT_PHRASES: [&str; 6] = [
    "hello!",
    "anyone around?",
    "nice day for a walk",
    "brb",
    "over here",
    "gg",
];

/// Scripted input for unattended clients: changes course every second or
/// two and now and then says something.
pub struct Wanderer {
    next_turn: Instant,
}

impl Wanderer {
    pub fn new(now: Instant) -> Self {
        Self { next_turn: now }
    }

    pub fn poll<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) -> Option<Command> {
        if now < self.next_turn {
            return None;
        }
        self.next_turn = now + Duration::from_millis(rng.gen_range(1000..2000));

        let roll = rng.gen_range(0..10);
        Some(match roll {
            0 => Command::Chat(BOT_PHRASES[rng.gen_range(0..BOT_PHRASES.len())].to_string()),
            1 => Command::Stop,
            _ => Command::Steer(Direction::ALL[rng.gen_range(0..Direction::ALL.len())]),
        })
    }
}
