//! # Game Client Library
//!
//! Client side of the UDP netcode layer.
//!
//! - [`network`]: [`network::ClientTransport`], the connection state machine,
//!   typed sends and the callback registry
//! - [`input`]: a scripted input source standing in for a player, used by
//!   the headless `client` binary
//!
//! The transport never calls application code from its I/O thread. Received
//! datagrams wait in a queue until [`network::ClientTransport::update`] is
//! called, and callbacks run inside that call.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ClientTransport;
//! use shared::InputMask;
//!
//! let mut transport = ClientTransport::new();
//! transport.on_login_response(|response| {
//!     println!("Playing as {}", response.player_id);
//! });
//! transport.connect("127.0.0.1", 8080).expect("connect");
//! transport.send_login("Ace");
//!
//! loop {
//!     transport.send_input(InputMask::RIGHT | InputMask::SHOOT);
//!     transport.update();
//!     std::thread::sleep(std::time::Duration::from_millis(33));
//! }
//! ```

pub mod input;
pub mod network;
