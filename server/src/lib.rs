//! # Realtime Sync Server Library
//!
//! This library provides the authoritative server for the shared-world
//! multiplayer core. It owns the canonical set of entities, applies client
//! intents to them, advances motion at a fixed rate and streams the result to
//! every connected client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server holds the only writable copy of the world. Clients send
//! intents (start moving, stop moving, chat) and receive state; they never
//! write positions directly.
//!
//! ### Client Management
//! Handles the lifecycle of websocket connections:
//! - Id assignment and capacity enforcement
//! - Greeting a new client with the full world and its own identity
//! - Announcing joins and leaves exactly once
//!
//! ### State Broadcasting
//! Every tick the full motion snapshot is pushed to each client. Snapshots are
//! idempotent overwrites, so a client that misses one simply takes the next.
//!
//! ## Architecture Design
//!
//! ### Single Mutation Owner
//! All changes to the world happen on the main loop in [`network::Server::run`].
//! Connection tasks forward decoded intents over a channel; the loop applies
//! them between ticks. A tick therefore never sees a half-applied intent and
//! the entity store needs no lock.
//!
//! ### Decoupled Delivery
//! Each client has a bounded event queue and a single-slot snapshot lane
//! drained by its own writer task. The loop only ever does non-blocking
//! hand-offs, so a slow client cannot delay the tick for anyone else; a client
//! whose event queue overflows is disconnected and can rejoin with a fresh
//! world.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Entity store, intent handlers, tick advance and snapshot building.
//!
//! ### Client Manager Module (`client_manager`)
//! Connection registry and per-client fanout lanes.
//!
//! ### Network Module (`network`)
//! Websocket listener, per-connection reader/writer tasks and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind(ServerConfig::with_addr("127.0.0.1:3000")).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod utils;
