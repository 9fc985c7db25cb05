//! Opcode-to-handler routing used by both peers
//!
//! Both peers follow the same discipline: read the header, check the opcode,
//! check the datagram is long enough for that opcode's packet, then call the
//! matching handler method. Anything that fails those checks is dropped
//! without a response.

use crate::error::ProtocolError;
use crate::protocol::{
    EntityPosition, EntitySpawn, Frame, Header, HealthUpdate, InputMask, LoginResponse, OpCode,
    Packet, Username,
};

/// Receives decoded packets. Every method defaults to ignoring the packet,
/// so each peer only implements the direction it consumes.
pub trait PacketHandler {
    fn on_login(&mut self, _header: &Header, _username: &Username) {}

    fn on_ack(&mut self, _header: &Header) {}

    fn on_disconnect(&mut self, _header: &Header) {}

    fn on_input(&mut self, _header: &Header, _mask: InputMask) {}

    fn on_login_ok(&mut self, _header: &Header, _response: &LoginResponse) {}

    fn on_entity_spawn(&mut self, _header: &Header, _spawn: &EntitySpawn) {}

    fn on_entity_position(&mut self, _header: &Header, _position: &EntityPosition) {}

    fn on_entity_dead(&mut self, _header: &Header, _entity_id: u32) {}

    fn on_score_update(&mut self, _header: &Header, _score: u32) {}

    fn on_health_update(&mut self, _header: &Header, _health: &HealthUpdate) {}
}

/// Calls the handler method matching an already decoded frame.
pub fn route<H: PacketHandler + ?Sized>(frame: &Frame, handler: &mut H) {
    let header = &frame.header;
    match &frame.packet {
        Packet::Login(username) => handler.on_login(header, username),
        Packet::Ack => handler.on_ack(header),
        Packet::Disconnect => handler.on_disconnect(header),
        Packet::Input(mask) => handler.on_input(header, *mask),
        Packet::LoginOk(response) => handler.on_login_ok(header, response),
        Packet::EntityNew(spawn) => handler.on_entity_spawn(header, spawn),
        Packet::EntityPos(position) => handler.on_entity_position(header, position),
        Packet::EntityDead(dead) => handler.on_entity_dead(header, dead.entity_id),
        Packet::ScoreUpdate(update) => handler.on_score_update(header, update.score),
        Packet::HealthUpdate(health) => handler.on_health_update(header, health),
    }
}

/// Decodes one datagram and routes it. Returns the opcode that was handled.
pub fn dispatch<H: PacketHandler + ?Sized>(
    datagram: &[u8],
    handler: &mut H,
) -> Result<OpCode, ProtocolError> {
    let frame = Frame::decode(datagram)?;
    route(&frame, handler);
    Ok(frame.packet.opcode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EntityDead, ScoreUpdate};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl PacketHandler for Recorder {
        fn on_login(&mut self, _header: &Header, username: &Username) {
            self.calls.push(format!("login:{}", username));
        }

        fn on_input(&mut self, header: &Header, mask: InputMask) {
            self.calls
                .push(format!("input:{}:{}", header.sequence_id, mask.bits()));
        }

        fn on_entity_dead(&mut self, _header: &Header, entity_id: u32) {
            self.calls.push(format!("dead:{}", entity_id));
        }

        fn on_score_update(&mut self, _header: &Header, score: u32) {
            self.calls.push(format!("score:{}", score));
        }
    }

    #[test]
    fn test_dispatch_routes_by_opcode() {
        let mut recorder = Recorder::default();

        let datagrams = vec![
            Packet::Login(Username::new("Ace")).encode(1).unwrap(),
            Packet::Input(InputMask::SHOOT).encode(2).unwrap(),
            Packet::EntityDead(EntityDead { entity_id: 7 })
                .encode(3)
                .unwrap(),
            Packet::ScoreUpdate(ScoreUpdate { score: 120 })
                .encode(4)
                .unwrap(),
        ];

        for datagram in &datagrams {
            dispatch(datagram, &mut recorder).unwrap();
        }

        assert_eq!(
            recorder.calls,
            vec!["login:Ace", "input:2:16", "dead:7", "score:120"]
        );
    }

    #[test]
    fn test_unhandled_opcode_uses_default_noop() {
        let mut recorder = Recorder::default();
        let opcode = dispatch(&Packet::Ack.encode(1).unwrap(), &mut recorder).unwrap();

        assert_eq!(opcode, OpCode::Ack);
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_short_datagram_never_reaches_handler() {
        let mut recorder = Recorder::default();
        let bytes = Packet::ScoreUpdate(ScoreUpdate { score: 1 })
            .encode(1)
            .unwrap();

        for len in 0..bytes.len() {
            assert!(dispatch(&bytes[..len], &mut recorder).is_err());
        }
        assert!(recorder.calls.is_empty());
    }
}
