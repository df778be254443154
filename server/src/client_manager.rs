//! Connection registry and per-client fanout for the multiplayer server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Id allocation (monotonic, never reused while the process runs)
//! - Capacity enforcement
//! - Non-blocking delivery of discrete events and tick snapshots
//!
//! Every client owns two outbound lanes. Discrete events (join, leave, chat)
//! go through a bounded queue so none of them is lost silently; snapshots go
//! through a single-slot `watch` channel that always holds only the newest
//! one. Neither lane ever makes the caller wait on socket I/O.

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Outcome of handing a message to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The client's event queue is full; it is not keeping up.
    Stalled,
    /// The connection's writer has gone away.
    Closed,
}

/// Sending half of a connection's outbound lanes, owned by the main loop.
#[derive(Debug)]
pub struct ClientHandle {
    events: mpsc::Sender<Message>,
    snapshots: watch::Sender<Option<Message>>,
}

/// Receiving half of a connection's outbound lanes, owned by its writer task.
#[derive(Debug)]
pub struct ClientOutbox {
    pub events: mpsc::Receiver<Message>,
    pub snapshots: watch::Receiver<Option<Message>>,
}

impl ClientHandle {
    /// Creates both halves with room for `capacity` queued events.
    pub fn channel(capacity: usize) -> (Self, ClientOutbox) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        (
            Self {
                events: event_tx,
                snapshots: snapshot_tx,
            },
            ClientOutbox {
                events: event_rx,
                snapshots: snapshot_rx,
            },
        )
    }

    pub fn send_event(&self, message: Message) -> Delivery {
        match self.events.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Stalled,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Replaces whatever snapshot is still waiting in the slot.
    pub fn publish_snapshot(&self, message: Message) -> Delivery {
        match self.snapshots.send(Some(message)) {
            Ok(()) => Delivery::Queued,
            Err(_) => Delivery::Closed,
        }
    }
}

/// A registered connection.
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    handle: ClientHandle,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, handle: ClientHandle) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            handle,
        }
    }
}

/// Tracks connected clients and fans messages out to them.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next id to hand out; ids are never recycled
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, handle: ClientHandle) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, handle));

        Some(client_id)
    }

    /// Drops a connection's handle, which closes its outbound lanes. Returns
    /// false if the client was already gone.
    pub fn remove_client(&mut self, client_id: u32) -> bool {
        match self.clients.remove(&client_id) {
            Some(client) => {
                info!(
                    "Client {} disconnected after {:.1}s",
                    client.id,
                    client.connected_at.elapsed().as_secs_f32()
                );
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn send_to(&self, client_id: u32, message: Message) -> Delivery {
        match self.clients.get(&client_id) {
            Some(client) => client.handle.send_event(message),
            None => Delivery::Closed,
        }
    }

    /// Queues a discrete event for every client except `exclude`. Returns the
    /// ids of clients that could not take it.
    pub fn broadcast(&self, message: &Message, exclude: Option<u32>) -> Vec<u32> {
        let mut failed = Vec::new();

        for (client_id, client) in &self.clients {
            if Some(*client_id) == exclude {
                continue;
            }
            let delivery = client.handle.send_event(message.clone());
            if delivery != Delivery::Queued {
                debug!("Event to client {} not delivered: {:?}", client_id, delivery);
                failed.push(*client_id);
            }
        }

        failed
    }

    /// Puts the tick snapshot in every client's slot. Returns the ids of
    /// clients whose writer has closed.
    pub fn publish_snapshot(&self, message: &Message) -> Vec<u32> {
        self.clients
            .iter()
            .filter(|(_, client)| client.handle.publish_snapshot(message.clone()) == Delivery::Closed)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.clients.keys().copied().collect()
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
