//! # World Server Library
//!
//! This library implements the network-facing core of a tick-driven
//! multiplayer world server: the binary login handshake with its session
//! cipher exchange, steady-state packet decoding, and the per-tick entity
//! synchronization broadcast that keeps every connected client's view of
//! the world current.
//!
//! ## Core Responsibilities
//!
//! ### Login Handshake
//! Each connection starts in a staged login decoder that validates the
//! handshake request, answers it, parses the login block, derives the
//! inbound/outbound cipher pair from the exchanged seeds, and resolves the
//! attempt against the account store and the world's capacity. Partial
//! reads at any stage are preserved and resumed, never re-run.
//!
//! ### Entity Synchronization
//! Once per fixed tick the server builds, for every observer, one frame per
//! entity channel (players and NPCs): removals and movement for mobiles the
//! client already knows, add records for mobiles entering view, and a
//! byte-aligned change block for updated attributes. Per-tick state is
//! cleared in a single pass only after the last observer has been served.
//!
//! ### Steady-State Decoding
//! After login, inbound packets are cut out of the stream using the session
//! cipher and a static opcode size table. Decoded packets flow into a
//! dispatch seam where gameplay handlers attach.
//!
//! ## Architecture Design
//!
//! ### Tick Scheduler and Connection Tasks
//! A single select loop owns the TCP listener and the tick interval. Every
//! accepted socket gets a reader task (handshake, then steady-state
//! decoding) and a writer task draining an unbounded frame queue, so the
//! tick loop never blocks on socket I/O: it locks the world, builds frames,
//! and queues them.
//!
//! ### Shared World State
//! The world (tick counter plus slot-indexed player and NPC repositories)
//! lives behind one async lock shared by the tick loop and the login path.
//! Observers track what their client knows through serial-stamped local
//! sets, so a repository slot reused by a new mobile is never mistaken for
//! the old one.
//!
//! ## Module Organization
//!
//! - [`accounts`]: credential-to-profile loading seam used during login
//! - [`entity`]: locations, update flags, and the player/NPC mobile kinds
//! - [`game`]: the world, registration, and the per-tick pulse
//! - [`login`]: handshake state machine and authentication
//! - [`network`]: listener, accept loop, and tick scheduler
//! - [`packets`]: fixed response frames (handshake ack, login response,
//!   initial state)
//! - [`repository`]: bounded slot storage with serial-stamped occupants
//! - [`session`]: per-connection phases, stream buffering, and the
//!   steady-state decoder
//! - [`sync`]: synchronization frame assembly
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::accounts::{AccountLoader, DefaultAccounts};
//! use server::entity::Location;
//! use server::network::Server;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let accounts: Arc<dyn AccountLoader> =
//!         Arc::new(DefaultAccounts::new(Location::new(3222, 3218, 0)));
//!
//!     let mut server = Server::new(
//!         "127.0.0.1:43594",
//!         Duration::from_millis(600), // one world tick
//!         2000,
//!         accounts,
//!         false,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Notes
//!
//! Frames are opcode-led, with the opcode obfuscated by the next key of the
//! session's outbound cipher; payload lengths are fixed, byte-prefixed, or
//! short-prefixed per opcode. The outbound cipher is seeded from the same
//! four words as the inbound one with a fixed additive offset applied, so
//! both ends stay in step by construction. These wire-level pieces live in
//! the `protocol` crate; this library consumes them.

pub mod accounts;
pub mod entity;
pub mod game;
pub mod login;
pub mod network;
pub mod packets;
pub mod repository;
pub mod session;
pub mod sync;
