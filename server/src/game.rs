//! Demo lobby driving the server transport
//!
//! A minimal game collaborator: it hands out player ids on login, spawns one
//! entity per player, moves entities according to their latest input mask and
//! relays positions to everyone. It exists so the `server` binary has
//! something to serve; the transport does not depend on it.

use crate::network::{DisconnectReason, ServerHandler, ServerTransport};
use crate::registry::SessionId;
use log::{info, warn};
use shared::{
    entity_type, EntityDead, EntityPosition, EntitySpawn, HealthUpdate, InputMask, LoginResponse,
    Packet,
};
use std::collections::HashMap;

pub const PLAYER_MAX_HEALTH: f32 = 100.0;
pub const SHOT_SCORE: u32 = 10;

#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub map_width: u16,
    pub map_height: u16,
    pub max_players: usize,
    /// Units per second
    pub player_speed: f32,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            map_width: 1920,
            map_height: 1080,
            max_players: 4,
            player_speed: 300.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntity {
    pub player_id: u32,
    pub entity_id: u32,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub input: InputMask,
    pub score: u32,
}

impl PlayerEntity {
    fn spawn_packet(&self) -> EntitySpawn {
        EntitySpawn {
            entity_id: self.entity_id,
            entity_type: entity_type::PLAYER,
            x: self.x,
            y: self.y,
        }
    }
}

/// Spawn point for a player: a column on the left edge, one row per id.
pub fn spawn_point(player_id: u32) -> (f32, f32) {
    (100.0, 200.0 + player_id.saturating_sub(1) as f32 * 200.0)
}

/// Moves `(x, y)` along `input` for `dt` seconds, clamped to the map.
pub fn step_position(
    (x, y): (f32, f32),
    input: InputMask,
    speed: f32,
    dt: f32,
    map_width: u16,
    map_height: u16,
) -> (f32, f32) {
    let (dx, dy) = input.direction();
    let nx = (x + dx * speed * dt).clamp(0.0, f32::from(map_width));
    let ny = (y + dy * speed * dt).clamp(0.0, f32::from(map_height));
    (nx, ny)
}

pub struct Lobby {
    config: LobbyConfig,
    players: HashMap<SessionId, PlayerEntity>,
    next_player_id: u32,
}

impl Lobby {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            players: HashMap::new(),
            next_player_id: 1,
        }
    }

    pub fn player(&self, session: SessionId) -> Option<&PlayerEntity> {
        self.players.get(&session)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Advances every moving player by `dt` seconds and broadcasts the new
    /// positions.
    pub fn tick(&mut self, server: &ServerTransport, dt: f32) {
        for player in self.players.values_mut() {
            if player.input.direction() == (0.0, 0.0) {
                continue;
            }

            let (x, y) = step_position(
                (player.x, player.y),
                player.input,
                self.config.player_speed,
                dt,
                self.config.map_width,
                self.config.map_height,
            );
            if (x, y) == (player.x, player.y) {
                continue;
            }
            player.x = x;
            player.y = y;

            server.broadcast(
                &Packet::EntityPos(EntityPosition {
                    entity_id: player.entity_id,
                    x,
                    y,
                }),
                None,
            );
        }
    }

    fn login_response(&self, player_id: u32) -> LoginResponse {
        LoginResponse {
            player_id,
            map_width: self.config.map_width,
            map_height: self.config.map_height,
        }
    }
}

impl ServerHandler for Lobby {
    fn on_client_connected(
        &mut self,
        _server: &ServerTransport,
        session: SessionId,
        endpoint: std::net::SocketAddr,
    ) {
        info!("Session {} connected from {}", session, endpoint);
    }

    fn on_client_disconnected(
        &mut self,
        server: &ServerTransport,
        session: SessionId,
        reason: DisconnectReason,
    ) {
        let Some(player) = self.players.remove(&session) else {
            return;
        };
        info!(
            "Player {} ({}) left: {:?}",
            player.player_id, player.username, reason
        );
        server.broadcast(
            &Packet::EntityDead(EntityDead {
                entity_id: player.entity_id,
            }),
            None,
        );
    }

    fn on_client_login(&mut self, server: &ServerTransport, session: SessionId, username: &str) {
        // A repeated login just gets its answer again
        if let Some(player) = self.players.get(&session) {
            server.send_login_response(session, self.login_response(player.player_id));
            return;
        }

        if self.players.len() >= self.config.max_players {
            warn!("Lobby full, '{}' stays unauthenticated", username);
            return;
        }

        let player_id = self.next_player_id;

        let (x, y) = spawn_point(player_id);
        let player = PlayerEntity {
            player_id,
            entity_id: player_id,
            username: username.to_string(),
            x,
            y,
            input: InputMask::empty(),
            score: 0,
        };

        if !server.send_login_response(session, self.login_response(player_id)) {
            warn!("Could not answer login for session {}", session);
            return;
        }
        self.next_player_id += 1;
        info!("'{}' joined as player {}", username, player_id);

        for existing in self.players.values() {
            server.send_entity_spawn(session, existing.spawn_packet());
        }

        server.broadcast(&Packet::EntityNew(player.spawn_packet()), None);
        server.send_health_update(
            session,
            HealthUpdate {
                entity_id: player.entity_id,
                current: PLAYER_MAX_HEALTH,
                max: PLAYER_MAX_HEALTH,
            },
        );

        self.players.insert(session, player);
    }

    fn on_client_input(&mut self, server: &ServerTransport, session: SessionId, input: InputMask) {
        let Some(player) = self.players.get_mut(&session) else {
            return;
        };

        let fired = input.contains(InputMask::SHOOT) && !player.input.contains(InputMask::SHOOT);
        player.input = input;

        if fired {
            player.score += SHOT_SCORE;
            server.send_score_update(session, player.score);
        }
    }

    fn on_error(&mut self, _server: &ServerTransport, message: &str) {
        warn!("Transport error: {}", message);
    }
}
