//! Client transport: one UDP socket talking to one server
//!
//! ```text
//! [Disconnected] ──connect──→ [Connecting] ──socket open──→ [Connected]
//!       ↑                          │                             │
//!       │                     bind/resolve fails            disconnect
//!       │                          ↓                             │
//!       └──────connect─────── [Error]          [Disconnected] ←──┘
//! ```
//!
//! Received datagrams are queued by the I/O thread and only decoded when the
//! owner calls [`ClientTransport::update`], which runs the registered
//! callbacks on the caller's thread.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{
    route, EntityPosition, EntitySpawn, Frame, Header, HealthUpdate, Inbound, InputMask,
    IoContext, LoginResponse, NetError, Packet, PacketHandler, SequenceCounter, Username,
};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

type Callback<T> = Option<Box<dyn FnMut(T) + Send>>;

/// Registered application callbacks. Unset ones are skipped.
#[derive(Default)]
struct Callbacks {
    connected: Option<Box<dyn FnMut() + Send>>,
    disconnected: Option<Box<dyn FnMut() + Send>>,
    login_response: Callback<LoginResponse>,
    entity_spawn: Callback<EntitySpawn>,
    entity_position: Callback<EntityPosition>,
    entity_dead: Callback<u32>,
    score_update: Callback<u32>,
    health_update: Callback<HealthUpdate>,
    error: Option<Box<dyn FnMut(&str) + Send>>,
}

impl Callbacks {
    fn connected(&mut self) {
        if let Some(callback) = self.connected.as_mut() {
            callback();
        }
    }

    fn disconnected(&mut self) {
        if let Some(callback) = self.disconnected.as_mut() {
            callback();
        }
    }

    fn error(&mut self, message: &str) {
        if let Some(callback) = self.error.as_mut() {
            callback(message);
        }
    }
}

/// Sends decoded server packets to the matching callback.
impl PacketHandler for Callbacks {
    fn on_login_ok(&mut self, _header: &Header, response: &LoginResponse) {
        if let Some(callback) = self.login_response.as_mut() {
            callback(*response);
        }
    }

    fn on_entity_spawn(&mut self, _header: &Header, spawn: &EntitySpawn) {
        if let Some(callback) = self.entity_spawn.as_mut() {
            callback(*spawn);
        }
    }

    fn on_entity_position(&mut self, _header: &Header, position: &EntityPosition) {
        if let Some(callback) = self.entity_position.as_mut() {
            callback(*position);
        }
    }

    fn on_entity_dead(&mut self, _header: &Header, entity_id: u32) {
        if let Some(callback) = self.entity_dead.as_mut() {
            callback(entity_id);
        }
    }

    fn on_score_update(&mut self, _header: &Header, score: u32) {
        if let Some(callback) = self.score_update.as_mut() {
            callback(score);
        }
    }

    fn on_health_update(&mut self, _header: &Header, health: &HealthUpdate) {
        if let Some(callback) = self.health_update.as_mut() {
            callback(*health);
        }
    }
}

pub struct ClientTransport {
    state: ConnectionState,
    server: Option<SocketAddr>,
    io: Option<IoContext>,
    inbound: Arc<Mutex<VecDeque<Inbound>>>,
    sequence: SequenceCounter,
    callbacks: Callbacks,
}

impl ClientTransport {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            server: None,
            io: None,
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            sequence: SequenceCounter::new(),
            callbacks: Callbacks::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.io.as_ref().map(IoContext::local_addr)
    }

    /// Sequence id stamped on the most recent send, 0 before the first one.
    pub fn last_sequence_id(&self) -> u32 {
        self.sequence.current()
    }

    pub fn on_connected(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.connected = Some(Box::new(callback));
    }

    pub fn on_disconnected(&mut self, callback: impl FnMut() + Send + 'static) {
        self.callbacks.disconnected = Some(Box::new(callback));
    }

    pub fn on_login_response(&mut self, callback: impl FnMut(LoginResponse) + Send + 'static) {
        self.callbacks.login_response = Some(Box::new(callback));
    }

    pub fn on_entity_spawn(&mut self, callback: impl FnMut(EntitySpawn) + Send + 'static) {
        self.callbacks.entity_spawn = Some(Box::new(callback));
    }

    pub fn on_entity_position(&mut self, callback: impl FnMut(EntityPosition) + Send + 'static) {
        self.callbacks.entity_position = Some(Box::new(callback));
    }

    pub fn on_entity_dead(&mut self, callback: impl FnMut(u32) + Send + 'static) {
        self.callbacks.entity_dead = Some(Box::new(callback));
    }

    pub fn on_score_update(&mut self, callback: impl FnMut(u32) + Send + 'static) {
        self.callbacks.score_update = Some(Box::new(callback));
    }

    pub fn on_health_update(&mut self, callback: impl FnMut(HealthUpdate) + Send + 'static) {
        self.callbacks.health_update = Some(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.callbacks.error = Some(Box::new(callback));
    }

    /// Resolves the server, opens a local socket and starts receiving.
    ///
    /// Reaching `Connected` needs no reply from the server. On failure the
    /// state becomes `Error` and the error callback fires; calling `connect`
    /// again is the way to retry.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<(), NetError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {}
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(NetError::AlreadyActive("connected"));
            }
        }

        self.state = ConnectionState::Connecting;
        info!("Connecting to {}:{}", address, port);

        match self.open(address, port) {
            Ok((server, io)) => {
                self.server = Some(server);
                self.io = Some(io);
                self.state = ConnectionState::Connected;
                info!("Connected to {}", server);
                self.callbacks.connected();
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}:{}: {}", address, port, e);
                self.state = ConnectionState::Error;
                self.callbacks.error(&e.to_string());
                Err(e)
            }
        }
    }

    fn open(&self, address: &str, port: u16) -> Result<(SocketAddr, IoContext), NetError> {
        let server = resolve(address, port)?;

        let local = match server.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let queue = Arc::clone(&self.inbound);
        let io = IoContext::bind(local, "client-net", move |inbound| {
            queue.lock().push_back(inbound);
        })?;

        Ok((server, io))
    }

    /// Announces the disconnect to the server if connected, stops the I/O
    /// thread and returns to `Disconnected`.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            self.send_disconnect();
        }

        let was_open = self.io.is_some();
        if let Some(mut io) = self.io.take() {
            io.shutdown();
        }
        self.inbound.lock().clear();
        self.server = None;
        self.state = ConnectionState::Disconnected;

        if was_open {
            info!("Disconnected");
            self.callbacks.disconnected();
        }
    }

    pub fn send_login(&mut self, username: &str) -> bool {
        self.send(&Packet::Login(Username::new(username)))
    }

    pub fn send_input(&mut self, input: InputMask) -> bool {
        self.send(&Packet::Input(input))
    }

    pub fn send_ack(&mut self) -> bool {
        self.send(&Packet::Ack)
    }

    pub fn send_disconnect(&mut self) -> bool {
        self.send(&Packet::Disconnect)
    }

    fn send(&mut self, packet: &Packet) -> bool {
        if !self.is_connected() {
            return false;
        }
        let (Some(io), Some(server)) = (self.io.as_ref(), self.server) else {
            return false;
        };

        let bytes = match packet.encode(self.sequence.next()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {:?}: {}", packet.opcode(), e);
                self.callbacks.error(&e.to_string());
                return false;
            }
        };

        match io.send_to(&bytes, server) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send {:?}: {}", packet.opcode(), e);
                self.callbacks.error(&format!("Send failed: {}", e));
                false
            }
        }
    }

    /// Drains everything received since the last call and runs the matching
    /// callbacks in arrival order. Call once per tick.
    pub fn update(&mut self) {
        let pending = std::mem::take(&mut *self.inbound.lock());

        for inbound in pending {
            match inbound {
                Inbound::Datagram { bytes, from } => self.handle_datagram(&bytes, from),
                Inbound::ReceiveError(e) => {
                    self.callbacks.error(&format!("Receive error: {}", e));
                }
            }
        }
    }

    fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        if Some(from) != self.server {
            debug!("Dropping datagram from unexpected source {}", from);
            return;
        }

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping datagram from server: {}", e);
                return;
            }
        };

        if !frame.packet.opcode().is_client_bound() {
            debug!("Dropping {:?}: not a server packet", frame.packet.opcode());
            return;
        }

        route(&frame, &mut self.callbacks);
    }
}

impl Default for ClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.shutdown();
        }
    }
}

/// Resolves `address:port`, preferring an IPv4 result.
fn resolve(address: &str, port: u16) -> Result<SocketAddr, NetError> {
    let candidates: Vec<SocketAddr> = (address, port)
        .to_socket_addrs()
        .map_err(|e| NetError::Resolve(format!("{}:{}: {}", address, port, e)))?
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| NetError::Resolve(format!("{}:{}: no addresses", address, port)))
}
