//! # Game Server Library
//!
//! Server side of the UDP netcode layer. A single [`network::ServerTransport`]
//! owns one socket and serves every client, attributing each datagram to a
//! session by its source endpoint.
//!
//! ## Modules
//!
//! - [`config`]: bind address, session capacity and idle timeout
//! - [`registry`]: endpoint to session mapping and per-session state
//! - [`network`]: the transport itself, the [`network::ServerHandler`]
//!   callback trait and the typed send operations
//! - [`game`]: a small demo lobby used by the `server` binary
//!
//! ## Threading
//!
//! Datagrams are received on a dedicated I/O thread and queued. They are
//! decoded and handed to the handler only when the game loop calls
//! [`network::ServerTransport::update`], so handler code always runs on the
//! game loop's thread.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::game::{Lobby, LobbyConfig};
//! use server::network::ServerTransport;
//! use std::time::Duration;
//!
//! let mut server = ServerTransport::new(ServerConfig::default());
//! server.start(8080).expect("bind");
//!
//! let mut lobby = Lobby::new(LobbyConfig::default());
//! loop {
//!     server.update(&mut lobby);
//!     lobby.tick(&server, 1.0 / 30.0);
//!     std::thread::sleep(Duration::from_millis(33));
//! }
//! ```

pub mod config;
pub mod game;
pub mod network;
pub mod registry;
