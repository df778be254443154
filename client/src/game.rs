use log::debug;
use shared::{
    ChatOverlay, ClientPacket, Direction, PlayerInfo, PlayerState, ServerPacket, WorldConfig,
    MAX_CHAT_LEN,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Own chat lines still waiting for their relay; older ones are forgotten.
const MAX_PENDING_ECHOES: usize = 32;

/// Display attributes fixed when an entity is first introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub color: String,
}

/// Client-side copy of one entity.
#[derive(Debug, Clone)]
pub struct MirrorEntry {
    pub id: u32,
    pub identity: Option<Identity>,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub moving: bool,
    pub messages: ChatOverlay,
}

impl MirrorEntry {
    fn new(id: u32, state: PlayerState, world: &WorldConfig) -> Self {
        Self {
            id,
            identity: None,
            x: state.x,
            y: state.y,
            direction: state.direction,
            moving: state.moving,
            messages: ChatOverlay::new(world.chat_capacity, world.chat_ttl),
        }
    }

    fn from_info(info: &PlayerInfo, world: &WorldConfig, now: Instant) -> Self {
        let mut entry = Self::new(info.id, info.state(), world);
        entry.identity = Some(Identity {
            name: info.name.clone(),
            color: info.color.clone(),
        });
        entry.messages.seed(&info.messages, now);
        entry
    }

    pub fn state(&self) -> PlayerState {
        PlayerState {
            x: self.x,
            y: self.y,
            direction: self.direction,
            moving: self.moving,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.identity {
            Some(identity) => identity.name.clone(),
            None => format!("#{}", self.id),
        }
    }

    // Motion only. Identity and messages are owned locally once set.
    fn apply_state(&mut self, state: &PlayerState) {
        self.x = state.x;
        self.y = state.y;
        self.direction = state.direction;
        self.moving = state.moving;
    }
}

/// The client's mirror of the server world plus local prediction.
///
/// Merge rules:
/// - `currentPlayers` replaces the whole mirror.
/// - `state` overwrites motion fields and creates unknown ids, but never
///   touches identity or chat bubbles.
/// - `newPlayer` / `yourInfo` fill identity only where none is set yet.
/// - `playerDisconnected` removes the id for good; ids are never reused, so
///   an older snapshot still in flight cannot bring it back.
pub struct ClientGameState {
    pub local_id: Option<u32>,
    pub last_tick: u32,
    entries: HashMap<u32, MirrorEntry>,
    departed: HashSet<u32>,
    pending_echoes: VecDeque<u32>,
    next_chat_sequence: u32,
    world: WorldConfig,
}

impl ClientGameState {
    pub fn new(world: WorldConfig) -> Self {
        Self {
            local_id: None,
            last_tick: 0,
            entries: HashMap::new(),
            departed: HashSet::new(),
            pending_echoes: VecDeque::new(),
            next_chat_sequence: 1,
            world,
        }
    }

    pub fn world(&self) -> &WorldConfig {
        &self.world
    }

    pub fn apply_server_packet(&mut self, packet: ServerPacket, now: Instant) {
        match packet {
            ServerPacket::CurrentPlayers { players } => self.apply_current_players(players, now),
            ServerPacket::YourInfo { id, name, color } => self.apply_your_info(id, name, color),
            ServerPacket::NewPlayer { player } => self.apply_new_player(&player, now),
            ServerPacket::PlayerDisconnected { id } => {
                self.apply_player_left(id);
            }
            ServerPacket::State { tick, players } => self.apply_snapshot(tick, &players),
            ServerPacket::Chat { id, text, sequence } => {
                self.apply_chat(id, &text, sequence, now);
            }
        }
    }

    pub fn apply_current_players(&mut self, players: HashMap<u32, PlayerInfo>, now: Instant) {
        self.entries = players
            .iter()
            .map(|(id, info)| (*id, MirrorEntry::from_info(info, &self.world, now)))
            .collect();
        self.departed.clear();
        self.pending_echoes.clear();
    }

    pub fn apply_your_info(&mut self, id: u32, name: String, color: String) {
        self.local_id = Some(id);
        let world = self.world;
        let entry = self.entries.entry(id).or_insert_with(|| {
            MirrorEntry::new(
                id,
                PlayerState {
                    x: 0.0,
                    y: 0.0,
                    direction: Direction::None,
                    moving: false,
                },
                &world,
            )
        });
        if entry.identity.is_none() {
            entry.identity = Some(Identity { name, color });
        }
    }

    pub fn apply_new_player(&mut self, info: &PlayerInfo, now: Instant) {
        if self.departed.contains(&info.id) {
            return;
        }
        match self.entries.get_mut(&info.id) {
            Some(entry) => {
                if entry.identity.is_none() {
                    entry.identity = Some(Identity {
                        name: info.name.clone(),
                        color: info.color.clone(),
                    });
                }
            }
            None => {
                self.entries
                    .insert(info.id, MirrorEntry::from_info(info, &self.world, now));
            }
        }
    }

    pub fn apply_player_left(&mut self, id: u32) -> bool {
        self.departed.insert(id);
        self.entries.remove(&id).is_some()
    }

    pub fn apply_snapshot(&mut self, tick: u32, players: &HashMap<u32, PlayerState>) {
        for (id, state) in players {
            if self.departed.contains(id) {
                continue;
            }
            match self.entries.get_mut(id) {
                Some(entry) => entry.apply_state(state),
                None => {
                    self.entries
                        .insert(*id, MirrorEntry::new(*id, *state, &self.world));
                }
            }
        }
        self.last_tick = tick;
    }

    /// Shows a relayed chat line. Returns false when it was ignored, either
    /// because the sender is unknown or because it is our own line that was
    /// already displayed when it was sent.
    pub fn apply_chat(
        &mut self,
        id: u32,
        text: &str,
        sequence: Option<u32>,
        now: Instant,
    ) -> bool {
        if Some(id) == self.local_id {
            if let Some(sequence) = sequence {
                if let Some(position) = self.pending_echoes.iter().position(|s| *s == sequence) {
                    self.pending_echoes.drain(..=position);
                    return false;
                }
            }
        }

        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.messages.push(text, now);
                true
            }
            None => {
                debug!("Chat for unknown player {}", id);
                false
            }
        }
    }

    /// Displays an outgoing chat line immediately and returns the intent to
    /// send. Blank lines produce nothing.
    pub fn compose_chat(&mut self, text: &str, now: Instant) -> Option<ClientPacket> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let text: String = text.chars().take(MAX_CHAT_LEN).collect();

        let sequence = self.next_chat_sequence;
        self.next_chat_sequence = self.next_chat_sequence.wrapping_add(1);

        let local = self.local_id.and_then(|id| self.entries.get_mut(&id));
        if let Some(entry) = local {
            entry.messages.push(text.clone(), now);
            self.pending_echoes.push_back(sequence);
            while self.pending_echoes.len() > MAX_PENDING_ECHOES {
                self.pending_echoes.pop_front();
            }
        }

        Some(ClientPacket::Chat {
            text,
            sequence: Some(sequence),
        })
    }

    /// Extrapolates the local entity along the held direction. The next
    /// snapshot overwrites whatever this produces.
    pub fn predict(&mut self, direction: Direction, dt: f32) -> bool {
        if direction.is_none() || dt <= 0.0 {
            return false;
        }
        let world = self.world;
        let Some(entry) = self.local_id.and_then(|id| self.entries.get_mut(&id)) else {
            return false;
        };

        let (x, y) = world.step(entry.x, entry.y, direction, dt);
        entry.x = x;
        entry.y = y;
        true
    }

    pub fn sweep(&mut self, now: Instant) -> usize {
        self.entries
            .values_mut()
            .map(|entry| entry.messages.sweep(now))
            .sum()
    }

    pub fn entry(&self, id: u32) -> Option<&MirrorEntry> {
        self.entries.get(&id)
    }

    pub fn local_entry(&self) -> Option<&MirrorEntry> {
        self.local_id.and_then(|id| self.entries.get(&id))
    }

    /// Entries ordered by id, for stable output.
    pub fn entries(&self) -> Vec<&MirrorEntry> {
        let mut entries: Vec<&MirrorEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
