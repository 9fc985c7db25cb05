//! Server transport settings

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Settings for [`ServerTransport`](crate::network::ServerTransport).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address the socket binds to; the port is given to `start`
    pub bind_address: IpAddr,
    /// Maximum number of sessions, provisional ones included
    pub max_sessions: usize,
    /// Sessions silent for longer than this are removed by `update`
    pub session_timeout: Duration,
    /// Same, for sessions that never received a login response. Capped at
    /// `session_timeout`
    pub provisional_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_sessions: 32,
            session_timeout: Duration::from_secs(30),
            provisional_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn with_session_timeout(mut self, session_timeout: Duration) -> Self {
        self.session_timeout = session_timeout;
        self
    }

    pub fn with_provisional_timeout(mut self, provisional_timeout: Duration) -> Self {
        self.provisional_timeout = provisional_timeout;
        self
    }
}
