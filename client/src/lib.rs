//! # Plaza Client Library
//!
//! Client side of the shared plaza: a console client that keeps a mirror of
//! the server's entities, predicts its own movement between snapshots and
//! shows short-lived chat bubbles.
//!
//! ## Architecture Overview
//!
//! The server is authoritative. Everything the client holds is a copy that
//! the next broadcast may overwrite, with one exception: identity (name and
//! colour) is fixed the first time an entity is introduced, because tick
//! snapshots carry motion only.
//!
//! ### Local Prediction
//! While a direction is held, the local entity is advanced every frame with
//! the measured frame delta, using the same `WorldConfig::step` the server
//! tick uses. When a snapshot arrives its position simply replaces the
//! prediction. There is no input replay; the world is slow enough that the
//! snap is not noticeable.
//!
//! ### Chat Overlay
//! Each entity keeps at most a few bubbles, each with its own expiry instant.
//! Expiry is a sweep run from the frame timer, so a bubble can never outlive
//! the entity that owns it. Own lines are displayed when sent and the
//! server's relay of them is recognised by sequence number and skipped.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - The entity mirror and its merge rules
//! - Local prediction
//! - Departed-id tracking so stale snapshots cannot resurrect entities
//!
//! ### Input Module (`input`)
//! - Held-direction tracking that turns presses and releases into intents
//! - Terminal command parsing
//! - A scripted wanderer for unattended clients
//!
//! ### Network Module (`network`)
//! - Websocket connection and frame encoding
//! - The client loop: server frames, stdin, frame timer, status line
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::network::{Client, ClientOptions};
//! use shared::{WireFormat, WorldConfig};
//!
//! # async fn run() -> Result<(), client::network::ClientError> {
//! let options = ClientOptions {
//!     server: "ws://127.0.0.1:3000".to_string(),
//!     name: Some("Otter".to_string()),
//!     format: WireFormat::Json,
//!     bot: true,
//!     world: WorldConfig::default(),
//! };
//! let mut client = Client::connect(options).await?;
//! client.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod game;
pub mod input;
pub mod network;
