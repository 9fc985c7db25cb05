//! Session registry: which endpoint belongs to which player
//!
//! Every datagram that decodes cleanly is attributed to a session by its
//! source endpoint. A session moves through three states:
//!
//! ```text
//! first valid datagram ──→ [Provisional] ──login response──→ [Authenticated]
//!                               │                                  │
//!                               └──── disconnect / idle sweep ─────┴──→ removed
//! ```
//!
//! The registry itself is a plain data structure; the server transport wraps
//! it in a single mutex and only holds that lock for map operations.

use log::info;
use shared::sequence_greater_than;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Server-assigned identifier for one endpoint's session. Starts at 1.
pub type SessionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Endpoint known, no identity yet
    Provisional,
    /// A player id has been assigned through a login response
    Authenticated,
}

/// Everything the server knows about one remote endpoint.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub endpoint: SocketAddr,
    /// Name from the most recent login packet
    pub username: Option<String>,
    /// Assigned when the session is authenticated
    pub player_id: Option<u32>,
    /// Last time any valid datagram arrived from this endpoint
    pub last_activity: Instant,
    /// Highest input sequence id accepted so far
    pub last_input_sequence: Option<u32>,
    /// Newest sequence id seen on an ack from this client
    pub last_acked_sequence: Option<u32>,
}

impl Session {
    pub fn new(id: SessionId, endpoint: SocketAddr) -> Self {
        Self {
            id,
            endpoint,
            username: None,
            player_id: None,
            last_activity: Instant::now(),
            last_input_sequence: None,
            last_acked_sequence: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.player_id.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Provisional
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Records an input sequence id. Returns false for duplicates and
    /// inputs older than one already accepted.
    pub fn accept_input_sequence(&mut self, sequence_id: u32) -> bool {
        match self.last_input_sequence {
            Some(last) if !sequence_greater_than(sequence_id, last) => false,
            _ => {
                self.last_input_sequence = Some(sequence_id);
                true
            }
        }
    }

    pub fn record_ack(&mut self, sequence_id: u32) {
        match self.last_acked_sequence {
            Some(last) if !sequence_greater_than(sequence_id, last) => {}
            _ => self.last_acked_sequence = Some(sequence_id),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            endpoint: self.endpoint,
            username: self.username.clone(),
            player_id: self.player_id,
            state: self.state(),
            last_activity: self.last_activity,
        }
    }
}

/// Immutable copy of a session's metadata, safe to hand out to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub endpoint: SocketAddr,
    pub username: Option<String>,
    pub player_id: Option<u32>,
    pub state: SessionState,
    pub last_activity: Instant,
}

/// Result of resolving an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Existing(SessionId),
    Created(SessionId),
    /// Unknown endpoint and no room for another session
    Full,
}

/// Maps endpoints to sessions and enforces the session capacity.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    by_endpoint: HashMap<SocketAddr, SessionId>,
    next_session_id: SessionId,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_endpoint: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Finds the session for `endpoint`, creating a provisional one on
    /// first contact. Existing sessions have their activity time refreshed.
    pub fn get_or_create_client(&mut self, endpoint: SocketAddr) -> Lookup {
        if let Some(&id) = self.by_endpoint.get(&endpoint) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.touch();
            }
            return Lookup::Existing(id);
        }

        if self.sessions.len() >= self.max_sessions {
            return Lookup::Full;
        }

        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1).max(1);

        self.sessions.insert(id, Session::new(id, endpoint));
        self.by_endpoint.insert(endpoint, id);
        info!("Session {} opened for {}", id, endpoint);

        Lookup::Created(id)
    }

    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<SessionId> {
        self.by_endpoint.get(&endpoint).copied()
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn endpoint(&self, id: SessionId) -> Option<SocketAddr> {
        self.sessions.get(&id).map(|session| session.endpoint)
    }

    pub fn set_username(&mut self, id: SessionId, username: String) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.username = Some(username);
                true
            }
            None => false,
        }
    }

    /// Promotes a session to authenticated. Returns false for unknown ids.
    pub fn authenticate(&mut self, id: SessionId, player_id: u32) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                if session.player_id != Some(player_id) {
                    info!(
                        "Session {} authenticated as player {} ({})",
                        id,
                        player_id,
                        session.username.as_deref().unwrap_or("<unnamed>")
                    );
                }
                session.player_id = Some(player_id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.by_endpoint.remove(&session.endpoint);
        info!("Session {} closed ({})", id, session.endpoint);
        Some(session)
    }

    pub fn remove_by_endpoint(&mut self, endpoint: SocketAddr) -> Option<Session> {
        let id = self.find_by_endpoint(endpoint)?;
        self.remove(id)
    }

    /// Removes every session idle for longer than its limit and returns their
    /// ids. Authenticated sessions get `timeout`; provisional ones get
    /// `provisional_timeout`, capped at `timeout`.
    pub fn expire_idle(
        &mut self,
        timeout: Duration,
        provisional_timeout: Duration,
    ) -> Vec<SessionId> {
        let provisional_timeout = provisional_timeout.min(timeout);
        let mut expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| match session.state() {
                SessionState::Authenticated => session.is_timed_out(timeout),
                SessionState::Provisional => session.is_timed_out(provisional_timeout),
            })
            .map(|session| session.id)
            .collect();
        expired.sort_unstable();

        for id in &expired {
            self.remove(*id);
        }

        expired
    }

    /// (id, endpoint) pairs for every session, ordered by id.
    pub fn endpoints(&self) -> Vec<(SessionId, SocketAddr)> {
        let mut endpoints: Vec<_> = self
            .sessions
            .values()
            .map(|session| (session.id, session.endpoint))
            .collect();
        endpoints.sort_unstable_by_key(|(id, _)| *id);
        endpoints
    }

    /// Metadata copies for every session, ordered by id.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        infos.sort_unstable_by_key(|info| info.id);
        infos
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_endpoint.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
