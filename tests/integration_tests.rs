//! Integration tests for the client and server transports
//!
//! Every test runs both peers over real loopback UDP sockets. The transports
//! own their I/O threads, so the tests are plain `#[test]` functions that poll
//! `update()` until the expected callbacks have fired.

use assert_approx_eq::assert_approx_eq;
use client::network::{ClientTransport, ConnectionState};
use server::config::ServerConfig;
use server::game::{Lobby, LobbyConfig};
use server::network::{DisconnectReason, ServerHandler, ServerTransport};
use server::registry::{SessionId, SessionState};
use shared::{
    entity_type, EntitySpawn, Frame, Header, InputMask, LoginResponse, OpCode, Packet, Username,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Log<T> = Arc<Mutex<Vec<T>>>;

fn start_server() -> (ServerTransport, u16) {
    let mut server = ServerTransport::new(
        ServerConfig::default().with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    );
    let addr = server.start(0).expect("server should bind");
    (server, addr.port())
}

fn connect_client(port: u16) -> ClientTransport {
    let mut client = ClientTransport::new();
    client
        .connect("127.0.0.1", port)
        .expect("client should connect");
    client
}

/// Runs `step` until it returns true or two seconds pass.
fn poll(mut step: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn raw_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    socket
}

fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Records every server event and answers logins with a fixed response.
#[derive(Default)]
struct TestHandler {
    login_response: Option<LoginResponse>,
    connected: Vec<SessionId>,
    disconnected: Vec<(SessionId, DisconnectReason)>,
    logins: Vec<(SessionId, String)>,
    inputs: Vec<(SessionId, InputMask)>,
    acks: Vec<SessionId>,
}

impl TestHandler {
    fn answering(response: LoginResponse) -> Self {
        Self {
            login_response: Some(response),
            ..Self::default()
        }
    }

    fn events(&self) -> usize {
        self.connected.len()
            + self.disconnected.len()
            + self.logins.len()
            + self.inputs.len()
            + self.acks.len()
    }
}

impl ServerHandler for TestHandler {
    fn on_client_connected(&mut self, _: &ServerTransport, session: SessionId, _: SocketAddr) {
        self.connected.push(session);
    }

    fn on_client_disconnected(
        &mut self,
        _: &ServerTransport,
        session: SessionId,
        reason: DisconnectReason,
    ) {
        self.disconnected.push((session, reason));
    }

    fn on_client_login(&mut self, server: &ServerTransport, session: SessionId, username: &str) {
        self.logins.push((session, username.to_string()));
        if let Some(response) = self.login_response {
            server.send_login_response(session, response);
        }
    }

    fn on_client_input(&mut self, _: &ServerTransport, session: SessionId, input: InputMask) {
        self.inputs.push((session, input));
    }

    fn on_client_ack(&mut self, _: &ServerTransport, session: SessionId, _: u32) {
        self.acks.push(session);
    }
}

/// PROTOCOL SCENARIOS
mod scenario_tests {
    use super::*;

    #[test]
    fn login_response_reaches_client_callback() {
        let (server, port) = start_server();
        let response = LoginResponse {
            player_id: 1,
            map_width: 1024,
            map_height: 768,
        };
        let mut handler = TestHandler::answering(response);

        let mut client = connect_client(port);
        let received: Log<LoginResponse> = Default::default();
        let sink = Arc::clone(&received);
        client.on_login_response(move |r| sink.lock().unwrap().push(r));

        assert!(client.send_login("Ace"));
        assert!(poll(|| {
            server.update(&mut handler);
            client.update();
            !received.lock().unwrap().is_empty()
        }));

        assert_eq!(*received.lock().unwrap(), vec![response]);
        assert_eq!(handler.logins, vec![(1, "Ace".to_string())]);

        let sessions = server.get_connected_clients();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, SessionState::Authenticated);
        assert_eq!(sessions[0].player_id, Some(1));
        assert_eq!(sessions[0].username.as_deref(), Some("Ace"));
    }

    #[test]
    fn broadcast_skips_excluded_session() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();

        let spawned: Vec<Log<EntitySpawn>> = (0..3).map(|_| Default::default()).collect();
        let mut clients: Vec<ClientTransport> = Vec::new();
        for (i, log) in spawned.iter().enumerate() {
            let mut client = connect_client(port);
            let sink = Arc::clone(log);
            client.on_entity_spawn(move |spawn| sink.lock().unwrap().push(spawn));

            // Register one at a time so session ids follow client order
            assert!(client.send_ack());
            assert!(poll(|| {
                server.update(&mut handler);
                server.session_count() == i + 1
            }));
            clients.push(client);
        }

        let spawn = EntitySpawn {
            entity_id: 42,
            entity_type: entity_type::PLAYER,
            x: 100.0,
            y: 200.0,
        };
        assert_eq!(server.broadcast(&Packet::EntityNew(spawn), Some(2)), 2);

        assert!(poll(|| {
            clients.iter_mut().for_each(ClientTransport::update);
            !spawned[0].lock().unwrap().is_empty() && !spawned[2].lock().unwrap().is_empty()
        }));
        thread::sleep(Duration::from_millis(50));
        clients[1].update();

        assert_eq!(*spawned[0].lock().unwrap(), vec![spawn]);
        assert_eq!(*spawned[2].lock().unwrap(), vec![spawn]);
        assert!(spawned[1].lock().unwrap().is_empty());

        // Excluding an unknown session reaches everyone
        assert_eq!(server.broadcast(&Packet::EntityNew(spawn), Some(99)), 3);
    }

    #[test]
    fn input_mask_bits_survive_the_trip() {
        let (server, port) = start_server();
        let mut handler = TestHandler::answering(LoginResponse {
            player_id: 1,
            map_width: 1024,
            map_height: 768,
        });

        let mut client = connect_client(port);
        let logged_in: Log<()> = Default::default();
        let sink = Arc::clone(&logged_in);
        client.on_login_response(move |_| sink.lock().unwrap().push(()));

        client.send_login("Ace");
        assert!(poll(|| {
            server.update(&mut handler);
            client.update();
            !logged_in.lock().unwrap().is_empty()
        }));

        assert!(client.send_input(InputMask::from_bits(0b1_0001)));
        assert!(poll(|| {
            server.update(&mut handler);
            !handler.inputs.is_empty()
        }));

        let (_, mask) = handler.inputs[0];
        assert!(mask.contains(InputMask::UP));
        assert!(mask.contains(InputMask::SHOOT));
        assert!(!mask.contains(InputMask::DOWN));
        assert!(!mask.contains(InputMask::LEFT));
        assert!(!mask.contains(InputMask::RIGHT));
    }

    #[test]
    fn stray_short_datagram_is_ignored() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();

        let stray = raw_socket();
        stray.send_to(&[1, 2, 3], server_addr(port)).unwrap();

        // A valid datagram sent afterwards proves the stray one was drained
        let marker = raw_socket();
        marker
            .send_to(&Packet::Ack.encode(1).unwrap(), server_addr(port))
            .unwrap();
        assert!(poll(|| {
            server.update(&mut handler);
            !handler.acks.is_empty()
        }));

        assert_eq!(handler.connected, vec![1]);
        assert_eq!(handler.events(), 2);
        let sessions = server.get_connected_clients();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].endpoint, marker.local_addr().unwrap());
    }

    #[test]
    fn send_while_disconnected_sends_nothing() {
        let fake_server = raw_socket();
        let port = fake_server.local_addr().unwrap().port();

        let mut client = connect_client(port);
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let mut buf = [0u8; 64];
        let (len, _) = fake_server.recv_from(&mut buf).unwrap();
        assert_eq!(Frame::decode(&buf[..len]).unwrap().packet, Packet::Disconnect);

        assert!(!client.send_input(InputMask::UP));
        assert!(fake_server.recv_from(&mut buf).is_err());
    }
}

/// TRANSPORT PROPERTY TESTS
mod property_tests {
    use super::*;

    #[test]
    fn server_sequence_ids_increase() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();

        let peer = raw_socket();
        peer.send_to(&Packet::Ack.encode(1).unwrap(), server_addr(port))
            .unwrap();
        assert!(poll(|| {
            server.update(&mut handler);
            server.session_count() == 1
        }));

        assert!(server.send_entity_dead(1, 5));
        assert!(server.send_score_update(1, 100));
        assert_eq!(server.broadcast(&Packet::Ack, None), 1);

        let mut ids = Vec::new();
        let mut buf = [0u8; 64];
        for _ in 0..3 {
            let (len, _) = peer.recv_from(&mut buf).unwrap();
            ids.push(Frame::decode(&buf[..len]).unwrap().header.sequence_id);
        }
        assert!(ids.windows(2).all(|pair| pair[1] > pair[0]), "{:?}", ids);
    }

    #[test]
    fn client_callbacks_fire_in_arrival_order() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();

        let mut client = connect_client(port);
        let events: Log<String> = Default::default();
        let dead = Arc::clone(&events);
        client.on_entity_dead(move |id| dead.lock().unwrap().push(format!("dead {}", id)));
        let score = Arc::clone(&events);
        client.on_score_update(move |s| score.lock().unwrap().push(format!("score {}", s)));

        client.send_ack();
        assert!(poll(|| {
            server.update(&mut handler);
            server.session_count() == 1
        }));

        server.send_entity_dead(1, 3);
        server.send_score_update(1, 50);
        server.send_entity_dead(1, 4);

        // Give all three datagrams time to land before a single update
        thread::sleep(Duration::from_millis(100));
        client.update();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["dead 3".to_string(), "score 50".to_string(), "dead 4".to_string()]
        );
    }

    #[test]
    fn lying_packet_size_is_dropped() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();
        let peer = raw_socket();

        let header = Header {
            opcode: OpCode::Ack as u8,
            packet_size: 64,
            sequence_id: 1,
        };
        let lying = bincode::serialize(&header).unwrap();
        assert_eq!(lying.len(), 7);
        peer.send_to(&lying, server_addr(port)).unwrap();

        let truncated = Packet::Login(Username::new("Ace")).encode(2).unwrap();
        peer.send_to(&truncated[..10], server_addr(port)).unwrap();

        let unknown = [99u8, 7, 0, 1, 0, 0, 0];
        peer.send_to(&unknown, server_addr(port)).unwrap();

        // Server-bound only: a client-bound opcode from a peer is ignored too
        let wrong_way = Packet::ScoreUpdate(shared::ScoreUpdate { score: 1 })
            .encode(3)
            .unwrap();
        peer.send_to(&wrong_way, server_addr(port)).unwrap();

        let marker = raw_socket();
        marker
            .send_to(&Packet::Ack.encode(1).unwrap(), server_addr(port))
            .unwrap();
        assert!(poll(|| {
            server.update(&mut handler);
            !handler.acks.is_empty()
        }));

        assert_eq!(server.session_count(), 1);
        assert_eq!(handler.acks, vec![1]);
        assert_eq!(handler.events(), 2);
    }

    #[test]
    fn client_disconnect_removes_session() {
        let (server, port) = start_server();
        let mut handler = TestHandler::default();

        let mut client = connect_client(port);
        client.send_login("Ace");
        assert!(poll(|| {
            server.update(&mut handler);
            !handler.logins.is_empty()
        }));

        client.disconnect();
        assert!(poll(|| {
            server.update(&mut handler);
            !handler.disconnected.is_empty()
        }));
        assert_eq!(
            handler.disconnected,
            vec![(1, DisconnectReason::ClientRequest)]
        );
        assert!(server.get_connected_clients().is_empty());
    }

    #[test]
    fn reconnect_after_disconnect() {
        let (_server, port) = start_server();
        let mut client = connect_client(port);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect("127.0.0.1", port).unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.send_ack());
    }
}

/// DEMO LOBBY END-TO-END
mod lobby_tests {
    use super::*;

    #[test]
    fn lobby_session_lifecycle() {
        let (server, port) = start_server();
        let mut lobby = Lobby::new(LobbyConfig::default());

        let mut client = connect_client(port);
        let login: Log<LoginResponse> = Default::default();
        let spawns: Log<EntitySpawn> = Default::default();
        let positions: Log<(u32, f32, f32)> = Default::default();
        let health: Log<f32> = Default::default();
        {
            let sink = Arc::clone(&login);
            client.on_login_response(move |r| sink.lock().unwrap().push(r));
            let sink = Arc::clone(&spawns);
            client.on_entity_spawn(move |s| sink.lock().unwrap().push(s));
            let sink = Arc::clone(&positions);
            client.on_entity_position(move |p| sink.lock().unwrap().push((p.entity_id, p.x, p.y)));
            let sink = Arc::clone(&health);
            client.on_health_update(move |h| sink.lock().unwrap().push(h.current));
        }

        client.send_login("Pilot");
        assert!(poll(|| {
            server.update(&mut lobby);
            client.update();
            !health.lock().unwrap().is_empty()
        }));

        let response = login.lock().unwrap()[0];
        assert_eq!(response.player_id, 1);
        assert_eq!((response.map_width, response.map_height), (1920, 1080));
        assert_eq!(spawns.lock().unwrap()[0].entity_id, 1);
        assert_approx_eq!(health.lock().unwrap()[0], 100.0);

        client.send_input(InputMask::DOWN);
        assert!(poll(|| {
            server.update(&mut lobby);
            lobby.player(1).map(|p| p.input) == Some(InputMask::DOWN)
        }));

        lobby.tick(&server, 0.1);
        assert!(poll(|| {
            client.update();
            !positions.lock().unwrap().is_empty()
        }));
        let (entity_id, x, y) = positions.lock().unwrap()[0];
        assert_eq!(entity_id, 1);
        assert_approx_eq!(x, 100.0);
        assert_approx_eq!(y, 230.0);

        client.disconnect();
        assert!(poll(|| {
            server.update(&mut lobby);
            lobby.player_count() == 0
        }));
        assert_eq!(server.session_count(), 0);
    }
}
