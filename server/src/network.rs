//! Server transport: one UDP socket serving every client
//!
//! The I/O thread only queues raw datagrams. Everything else happens inside
//! [`ServerTransport::update`], called once per tick from the game loop:
//! datagrams are decoded, attributed to a session, and reported to the
//! caller's [`ServerHandler`]. The same call sweeps idle sessions.

use crate::config::ServerConfig;
use crate::registry::{Lookup, SessionId, SessionInfo, SessionRegistry};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{
    route, EntityDead, EntityPosition, EntitySpawn, Frame, Header, HealthUpdate, Inbound,
    InputMask, IoContext, LoginResponse, NetError, Packet, PacketHandler, ScoreUpdate,
    SequenceCounter, Username,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a disconnect packet
    ClientRequest,
    /// No datagram within the configured session timeout
    Timeout,
    /// The server called `disconnect_client`
    Kicked,
}

/// Receives session events during [`ServerTransport::update`].
///
/// Methods run on the thread calling `update` and get the transport back so
/// they can answer immediately (e.g. send a login response). Every method
/// defaults to doing nothing.
pub trait ServerHandler {
    fn on_client_connected(
        &mut self,
        _server: &ServerTransport,
        _session: SessionId,
        _endpoint: SocketAddr,
    ) {
    }

    fn on_client_disconnected(
        &mut self,
        _server: &ServerTransport,
        _session: SessionId,
        _reason: DisconnectReason,
    ) {
    }

    fn on_client_login(&mut self, _server: &ServerTransport, _session: SessionId, _username: &str) {}

    fn on_client_input(&mut self, _server: &ServerTransport, _session: SessionId, _input: InputMask) {}

    fn on_client_ack(&mut self, _server: &ServerTransport, _session: SessionId, _sequence_id: u32) {}

    fn on_error(&mut self, _server: &ServerTransport, _message: &str) {}
}

/// Authoritative side of the connection: socket, session registry and sends.
pub struct ServerTransport {
    config: ServerConfig,
    io: Option<IoContext>,
    registry: Mutex<SessionRegistry>,
    inbound: Arc<Mutex<VecDeque<Inbound>>>,
    sequence: SequenceCounter,
}

impl ServerTransport {
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::new(config.max_sessions);
        Self {
            config,
            io: None,
            registry: Mutex::new(registry),
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            sequence: SequenceCounter::new(),
        }
    }

    /// Binds the socket on `port` (0 picks a free port) and starts receiving.
    /// Returns the bound address.
    pub fn start(&mut self, port: u16) -> Result<SocketAddr, NetError> {
        if self.io.is_some() {
            return Err(NetError::AlreadyActive("running"));
        }

        let addr = SocketAddr::new(self.config.bind_address, port);
        let queue = Arc::clone(&self.inbound);
        let io = IoContext::bind(addr, "server-net", move |inbound| {
            queue.lock().push_back(inbound);
        })
        .map_err(|e| {
            error!("Failed to start server on {}: {}", addr, e);
            e
        })?;

        let local_addr = io.local_addr();
        self.io = Some(io);
        info!("Server listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Closes the socket, joins the I/O thread and forgets every session.
    pub fn stop(&mut self) {
        let Some(mut io) = self.io.take() else {
            return;
        };
        io.shutdown();

        self.registry.lock().clear();
        self.inbound.lock().clear();
        info!("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.io.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.io.as_ref().map(IoContext::local_addr)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Drains the inbound queue, dispatches every valid datagram to `handler`
    /// in arrival order, then removes sessions that went idle.
    pub fn update<H: ServerHandler>(&self, handler: &mut H) {
        let pending = std::mem::take(&mut *self.inbound.lock());

        for inbound in pending {
            match inbound {
                Inbound::Datagram { bytes, from } => self.handle_datagram(&bytes, from, handler),
                Inbound::ReceiveError(e) => {
                    handler.on_error(self, &format!("Receive error: {}", e));
                }
            }
        }

        let expired = self
            .registry
            .lock()
            .expire_idle(self.config.session_timeout, self.config.provisional_timeout);
        for session in expired {
            info!("Session {} timed out", session);
            handler.on_client_disconnected(self, session, DisconnectReason::Timeout);
        }
    }

    fn handle_datagram<H: ServerHandler>(&self, bytes: &[u8], from: SocketAddr, handler: &mut H) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        let opcode = frame.packet.opcode();
        if opcode.is_client_bound() {
            debug!("Dropping {:?} from {}: not a client packet", opcode, from);
            return;
        }

        if frame.packet == Packet::Disconnect {
            let removed = self.registry.lock().remove_by_endpoint(from);
            if let Some(session) = removed {
                handler.on_client_disconnected(self, session.id, DisconnectReason::ClientRequest);
            }
            return;
        }

        let lookup = self.registry.lock().get_or_create_client(from);
        let session = match lookup {
            Lookup::Existing(id) => id,
            Lookup::Created(id) => {
                handler.on_client_connected(self, id, from);
                id
            }
            Lookup::Full => {
                warn!("Server full, ignoring datagram from {}", from);
                return;
            }
        };

        let mut session_handler = SessionPackets {
            server: self,
            session,
            handler,
        };
        route(&frame, &mut session_handler);
    }

    /// Encodes and sends one packet to a session. False if the server is
    /// stopped, the session is unknown, or the send fails.
    pub fn send_to_session(&self, session: SessionId, packet: &Packet) -> bool {
        let Some(io) = self.io.as_ref() else {
            return false;
        };

        let endpoint = self.registry.lock().endpoint(session);
        let Some(endpoint) = endpoint else {
            debug!("Not sending {:?}: no session {}", packet.opcode(), session);
            return false;
        };

        let bytes = match packet.encode(self.sequence.next()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {:?}: {}", packet.opcode(), e);
                return false;
            }
        };

        match io.send_to(&bytes, endpoint) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send to session {} at {}: {}", session, endpoint, e);
                false
            }
        }
    }

    /// Sends the login response and, once it is on the wire, assigns
    /// `response.player_id` to the session, marking it authenticated. A
    /// failed send leaves the session as it was.
    pub fn send_login_response(&self, session: SessionId, response: LoginResponse) -> bool {
        if !self.send_to_session(session, &Packet::LoginOk(response)) {
            return false;
        }
        self.registry.lock().authenticate(session, response.player_id)
    }

    pub fn send_entity_spawn(&self, session: SessionId, spawn: EntitySpawn) -> bool {
        self.send_to_session(session, &Packet::EntityNew(spawn))
    }

    pub fn send_entity_position(&self, session: SessionId, position: EntityPosition) -> bool {
        self.send_to_session(session, &Packet::EntityPos(position))
    }

    pub fn send_entity_dead(&self, session: SessionId, entity_id: u32) -> bool {
        self.send_to_session(session, &Packet::EntityDead(EntityDead { entity_id }))
    }

    pub fn send_score_update(&self, session: SessionId, score: u32) -> bool {
        self.send_to_session(session, &Packet::ScoreUpdate(ScoreUpdate { score }))
    }

    pub fn send_health_update(&self, session: SessionId, health: HealthUpdate) -> bool {
        self.send_to_session(session, &Packet::HealthUpdate(health))
    }

    /// Sends `packet` to every registered session except `exclude` and
    /// returns how many sends succeeded. The packet is encoded once, so all
    /// recipients see the same sequence id.
    pub fn broadcast(&self, packet: &Packet, exclude: Option<SessionId>) -> usize {
        let Some(io) = self.io.as_ref() else {
            return 0;
        };

        let recipients = self.registry.lock().endpoints();
        if recipients.is_empty() {
            return 0;
        }

        let bytes = match packet.encode(self.sequence.next()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {:?}: {}", packet.opcode(), e);
                return 0;
            }
        };

        recipients
            .into_iter()
            .filter(|(session, _)| Some(*session) != exclude)
            .filter(|(session, endpoint)| match io.send_to(&bytes, *endpoint) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Broadcast to session {} at {} failed: {}", session, endpoint, e);
                    false
                }
            })
            .count()
    }

    /// Removes a session on the server's initiative. Nothing is sent to the client.
    pub fn disconnect_client<H: ServerHandler>(&self, session: SessionId, handler: &mut H) -> bool {
        let removed = self.registry.lock().remove(session);
        match removed {
            Some(_) => {
                handler.on_client_disconnected(self, session, DisconnectReason::Kicked);
                true
            }
            None => false,
        }
    }

    /// Copy of every session's metadata, ordered by session id.
    pub fn get_connected_clients(&self) -> Vec<SessionInfo> {
        self.registry.lock().snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Registers an endpoint without any traffic, for tests that need a
    /// session whose sends fail.
    #[cfg(test)]
    pub(crate) fn register_endpoint(&self, endpoint: SocketAddr) -> Lookup {
        self.registry.lock().get_or_create_client(endpoint)
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Routes one session's packets to the caller's handler, applying the
/// per-session rules (login bookkeeping, input gating, ack tracking).
struct SessionPackets<'a, H: ServerHandler> {
    server: &'a ServerTransport,
    session: SessionId,
    handler: &'a mut H,
}

impl<H: ServerHandler> PacketHandler for SessionPackets<'_, H> {
    fn on_login(&mut self, _header: &Header, username: &Username) {
        let name = username.as_str().into_owned();
        if !self
            .server
            .registry
            .lock()
            .set_username(self.session, name.clone())
        {
            return;
        }
        info!("Session {} logging in as '{}'", self.session, name);
        self.handler.on_client_login(self.server, self.session, &name);
    }

    fn on_ack(&mut self, header: &Header) {
        let known = match self.server.registry.lock().get_mut(self.session) {
            Some(session) => {
                session.record_ack(header.sequence_id);
                true
            }
            None => false,
        };
        if known {
            self.handler
                .on_client_ack(self.server, self.session, header.sequence_id);
        }
    }

    fn on_input(&mut self, header: &Header, mask: InputMask) {
        let accepted = match self.server.registry.lock().get_mut(self.session) {
            Some(session) if session.is_authenticated() => {
                session.accept_input_sequence(header.sequence_id)
            }
            Some(_) => {
                debug!("Ignoring input from unauthenticated session {}", self.session);
                false
            }
            None => false,
        };
        if accepted {
            self.handler.on_client_input(self.server, self.session, mask);
        }
    }
}
