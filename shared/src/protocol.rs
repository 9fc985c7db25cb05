//! Binary wire format shared by client and server
//!
//! Every datagram starts with a packed [`Header`] followed by a fixed-size
//! body whose layout is selected by the opcode. Fields are little-endian and
//! never padded, so the encoded size of each packet equals the sum of its
//! field widths:
//!
//! | Opcode | Packet          | Body                                  | Total |
//! |--------|-----------------|---------------------------------------|-------|
//! | 1      | Login           | username: [u8; 8]                     | 15    |
//! | 2      | Ack             | -                                     | 7     |
//! | 3      | Disconnect      | -                                     | 7     |
//! | 4      | Input           | mask: u8                              | 8     |
//! | 10     | LoginOk         | player_id: u32, width: u16, height: u16 | 15  |
//! | 11     | EntityNew       | entity_id: u32, type: u8, x: f32, y: f32 | 20 |
//! | 12     | EntityPos       | entity_id: u32, x: f32, y: f32        | 19    |
//! | 13     | EntityDead      | entity_id: u32                        | 11    |
//! | 14     | ScoreUpdate     | score: u32                            | 11    |
//! | 15     | HealthUpdate    | entity_id: u32, current: f32, max: f32 | 19   |
//!
//! Encoding goes through `bincode`'s fixed-int configuration, which writes
//! structs field by field with no length prefixes.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Size of the common header in bytes.
pub const HEADER_SIZE: usize = 7;
/// Width of the username field, terminator included.
pub const USERNAME_LEN: usize = 8;
/// Receive buffer size; no packet comes close to this.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Single-byte discriminator carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Client to server
    Login = 1,
    Ack = 2,
    Disconnect = 3,
    Input = 4,

    // Server to client
    LoginOk = 10,
    EntityNew = 11,
    EntityPos = 12,
    EntityDead = 13,
    ScoreUpdate = 14,
    HealthUpdate = 15,
}

impl OpCode {
    /// Body size in bytes for this opcode, header excluded.
    pub const fn body_size(self) -> usize {
        match self {
            OpCode::Login => USERNAME_LEN,
            OpCode::Ack | OpCode::Disconnect => 0,
            OpCode::Input => 1,
            OpCode::LoginOk => 8,
            OpCode::EntityNew => 13,
            OpCode::EntityPos => 12,
            OpCode::EntityDead | OpCode::ScoreUpdate => 4,
            OpCode::HealthUpdate => 12,
        }
    }

    /// Full encoded size: header plus body.
    pub const fn packet_size(self) -> usize {
        HEADER_SIZE + self.body_size()
    }

    /// True for opcodes the server sends and the client consumes.
    pub const fn is_client_bound(self) -> bool {
        self as u8 >= OpCode::LoginOk as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Login),
            2 => Ok(OpCode::Ack),
            3 => Ok(OpCode::Disconnect),
            4 => Ok(OpCode::Input),
            10 => Ok(OpCode::LoginOk),
            11 => Ok(OpCode::EntityNew),
            12 => Ok(OpCode::EntityPos),
            13 => Ok(OpCode::EntityDead),
            14 => Ok(OpCode::ScoreUpdate),
            15 => Ok(OpCode::HealthUpdate),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Common prefix of every packet.
///
/// `packet_size` is the total datagram size including the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub opcode: u8,
    pub packet_size: u16,
    pub sequence_id: u32,
}

impl Header {
    pub fn new(opcode: OpCode, sequence_id: u32) -> Self {
        Self {
            opcode: opcode as u8,
            packet_size: opcode.packet_size() as u16,
            sequence_id,
        }
    }

    /// Reads the header from the front of a datagram without looking at the body.
    pub fn read(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: datagram.len(),
            });
        }
        Ok(bincode::deserialize(&datagram[..HEADER_SIZE])?)
    }

    pub fn opcode(&self) -> Result<OpCode, ProtocolError> {
        OpCode::try_from(self.opcode)
    }
}

/// Fixed-width, NUL-terminated player name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Username([u8; USERNAME_LEN]);

impl Username {
    /// Builds a username, truncating to 7 bytes on a character boundary.
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(USERNAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = [0u8; USERNAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self(bytes)
    }

    /// Text up to the first NUL, or all 8 bytes when a peer omitted the terminator.
    pub fn as_str(&self) -> Cow<'_, str> {
        let len = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(USERNAME_LEN);
        String::from_utf8_lossy(&self.0[..len])
    }

    pub fn as_bytes(&self) -> &[u8; USERNAME_LEN] {
        &self.0
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Username({:?})", self.as_str())
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Per-tick button state: bit0=UP, bit1=DOWN, bit2=LEFT, bit3=RIGHT, bit4=SHOOT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputMask(u8);

impl InputMask {
    pub const UP: Self = Self(1);
    pub const DOWN: Self = Self(1 << 1);
    pub const LEFT: Self = Self(1 << 2);
    pub const RIGHT: Self = Self(1 << 3);
    pub const SHOOT: Self = Self(1 << 4);

    /// Bits that carry meaning; anything above is kept but ignored.
    pub const KNOWN_BITS: u8 = 0b1_1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 & Self::KNOWN_BITS == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Horizontal and vertical direction in {-1, 0, 1}, screen coordinates (y grows down).
    pub fn direction(self) -> (f32, f32) {
        let axis = |neg: Self, pos: Self| -> f32 {
            match (self.contains(neg), self.contains(pos)) {
                (true, false) => -1.0,
                (false, true) => 1.0,
                _ => 0.0,
            }
        };
        (axis(Self::LEFT, Self::RIGHT), axis(Self::UP, Self::DOWN))
    }
}

impl BitOr for InputMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for InputMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Entity type values carried in [`EntitySpawn::entity_type`].
pub mod entity_type {
    pub const PLAYER: u8 = 1;
    pub const ENEMY: u8 = 2;
    pub const MISSILE: u8 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub player_id: u32,
    pub map_width: u16,
    pub map_height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub entity_id: u32,
    pub entity_type: u8,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityPosition {
    pub entity_id: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDead {
    pub entity_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub entity_id: u32,
    pub current: f32,
    pub max: f32,
}

/// A decoded packet body, tagged by opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Login(Username),
    Ack,
    Disconnect,
    Input(InputMask),

    LoginOk(LoginResponse),
    EntityNew(EntitySpawn),
    EntityPos(EntityPosition),
    EntityDead(EntityDead),
    ScoreUpdate(ScoreUpdate),
    HealthUpdate(HealthUpdate),
}

impl Packet {
    pub fn opcode(&self) -> OpCode {
        match self {
            Packet::Login(_) => OpCode::Login,
            Packet::Ack => OpCode::Ack,
            Packet::Disconnect => OpCode::Disconnect,
            Packet::Input(_) => OpCode::Input,
            Packet::LoginOk(_) => OpCode::LoginOk,
            Packet::EntityNew(_) => OpCode::EntityNew,
            Packet::EntityPos(_) => OpCode::EntityPos,
            Packet::EntityDead(_) => OpCode::EntityDead,
            Packet::ScoreUpdate(_) => OpCode::ScoreUpdate,
            Packet::HealthUpdate(_) => OpCode::HealthUpdate,
        }
    }

    /// Serializes header and body into one datagram stamped with `sequence_id`.
    pub fn encode(&self, sequence_id: u32) -> Result<Vec<u8>, ProtocolError> {
        let header = Header::new(self.opcode(), sequence_id);
        let mut buffer = Vec::with_capacity(header.packet_size as usize);

        bincode::serialize_into(&mut buffer, &header)?;
        match self {
            Packet::Login(username) => bincode::serialize_into(&mut buffer, username)?,
            Packet::Ack | Packet::Disconnect => {}
            Packet::Input(mask) => bincode::serialize_into(&mut buffer, mask)?,
            Packet::LoginOk(body) => bincode::serialize_into(&mut buffer, body)?,
            Packet::EntityNew(body) => bincode::serialize_into(&mut buffer, body)?,
            Packet::EntityPos(body) => bincode::serialize_into(&mut buffer, body)?,
            Packet::EntityDead(body) => bincode::serialize_into(&mut buffer, body)?,
            Packet::ScoreUpdate(body) => bincode::serialize_into(&mut buffer, body)?,
            Packet::HealthUpdate(body) => bincode::serialize_into(&mut buffer, body)?,
        }

        debug_assert_eq!(buffer.len(), header.packet_size as usize);
        Ok(buffer)
    }
}

/// A header together with the packet it introduced.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub packet: Packet,
}

impl Frame {
    /// Validates and decodes one datagram.
    ///
    /// The datagram must be at least as long as the packet its opcode names
    /// and at least as long as the header's declared size. Trailing bytes
    /// beyond the expected size are ignored.
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::read(datagram)?;
        let opcode = header.opcode()?;

        let expected = opcode.packet_size();
        if datagram.len() < expected {
            return Err(ProtocolError::Truncated {
                expected,
                actual: datagram.len(),
            });
        }
        if header.packet_size as usize > datagram.len() {
            return Err(ProtocolError::SizeMismatch {
                declared: header.packet_size as usize,
                actual: datagram.len(),
            });
        }

        let body = &datagram[HEADER_SIZE..expected];
        let packet = match opcode {
            OpCode::Login => Packet::Login(bincode::deserialize(body)?),
            OpCode::Ack => Packet::Ack,
            OpCode::Disconnect => Packet::Disconnect,
            OpCode::Input => Packet::Input(bincode::deserialize(body)?),
            OpCode::LoginOk => Packet::LoginOk(bincode::deserialize(body)?),
            OpCode::EntityNew => Packet::EntityNew(bincode::deserialize(body)?),
            OpCode::EntityPos => Packet::EntityPos(bincode::deserialize(body)?),
            OpCode::EntityDead => Packet::EntityDead(bincode::deserialize(body)?),
            OpCode::ScoreUpdate => Packet::ScoreUpdate(bincode::deserialize(body)?),
            OpCode::HealthUpdate => Packet::HealthUpdate(bincode::deserialize(body)?),
        };

        Ok(Frame { header, packet })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_header_layout_is_packed_little_endian() {
        let header = Header::new(OpCode::Input, 0x0102_0304);
        let bytes = bincode::serialize(&header).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes, vec![4, 8, 0, 0x04, 0x03, 0x02, 0x01]);
    }

    /// One packet of every kind, in opcode order.
    fn every_packet() -> Vec<Packet> {
        vec![
            Packet::Login(Username::new("Ace")),
            Packet::Ack,
            Packet::Disconnect,
            Packet::Input(InputMask::SHOOT),
            Packet::LoginOk(LoginResponse {
                player_id: 1,
                map_width: 1024,
                map_height: 768,
            }),
            Packet::EntityNew(EntitySpawn {
                entity_id: 42,
                entity_type: entity_type::PLAYER,
                x: 100.0,
                y: 200.0,
            }),
            Packet::EntityPos(EntityPosition {
                entity_id: 42,
                x: 1.0,
                y: 2.0,
            }),
            Packet::EntityDead(EntityDead { entity_id: 42 }),
            Packet::ScoreUpdate(ScoreUpdate { score: 900 }),
            Packet::HealthUpdate(HealthUpdate {
                entity_id: 7,
                current: 50.0,
                max: 100.0,
            }),
        ]
    }

    #[test]
    fn test_encoded_sizes_match_opcode_table() {
        let packets = every_packet();

        let sizes: Vec<usize> = packets
            .iter()
            .map(|p| p.encode(1).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![15, 7, 7, 8, 15, 20, 19, 11, 11, 19]);
    }

    #[test]
    fn test_every_packet_decodes_to_itself() {
        for (seq, packet) in (100u32..).zip(every_packet()) {
            let bytes = packet.encode(seq).unwrap();
            let frame = Frame::decode(&bytes).unwrap();

            assert_eq!(frame.packet, packet);
            assert_eq!(frame.header.opcode, packet.opcode() as u8);
            assert_eq!(frame.header.sequence_id, seq);
            assert_eq!(usize::from(frame.header.packet_size), bytes.len());
        }
    }

    #[test]
    fn test_entity_spawn_decodes_field_values() {
        let packet = Packet::EntityNew(EntitySpawn {
            entity_id: 42,
            entity_type: entity_type::ENEMY,
            x: 100.5,
            y: -3.25,
        });
        let frame = Frame::decode(&packet.encode(9).unwrap()).unwrap();

        assert_eq!(frame.header.sequence_id, 9);
        assert_eq!(frame.header.packet_size, 20);
        match frame.packet {
            Packet::EntityNew(spawn) => {
                assert_eq!(spawn.entity_id, 42);
                assert_eq!(spawn.entity_type, entity_type::ENEMY);
                assert_approx_eq!(spawn.x, 100.5);
                assert_approx_eq!(spawn.y, -3.25);
            }
            other => panic!("Wrong packet after decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_short_header() {
        let result = Frame::decode(&[1, 15, 0]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let bytes = Packet::EntityPos(EntityPosition {
            entity_id: 1,
            x: 0.0,
            y: 0.0,
        })
        .encode(1)
        .unwrap();

        let result = Frame::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                expected: 19,
                actual: 18
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let mut bytes = Packet::Ack.encode(1).unwrap();
        bytes[0] = 99;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnknownOpcode(99))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_declaration() {
        let mut bytes = Packet::Input(InputMask::UP).encode(1).unwrap();
        bytes[1] = 200;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::SizeMismatch { declared: 200, .. })
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = Packet::ScoreUpdate(ScoreUpdate { score: 5 })
            .encode(3)
            .unwrap();
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.packet, Packet::ScoreUpdate(ScoreUpdate { score: 5 }));
    }

    #[test]
    fn test_username_truncates_to_seven_bytes() {
        let name = Username::new("Maverick99");
        assert_eq!(name.as_str(), "Maveric");
        assert_eq!(name.as_bytes()[7], 0);
    }

    #[test]
    fn test_username_truncates_on_char_boundary() {
        // each é is two bytes, so a cut at byte 7 would split a character
        let name = Username::new("ééééé");
        assert_eq!(name.as_str(), "ééé");
    }

    #[test]
    fn test_username_without_terminator_reads_all_bytes() {
        let mut bytes = Packet::Login(Username::new("x")).encode(1).unwrap();
        bytes[HEADER_SIZE..].copy_from_slice(b"ABCDEFGH");

        match Frame::decode(&bytes).unwrap().packet {
            Packet::Login(name) => assert_eq!(name.as_str(), "ABCDEFGH"),
            other => panic!("Wrong packet after decode: {:?}", other),
        }
    }

    #[test]
    fn test_input_mask_bits() {
        let mask = InputMask::from_bits(0b1_0010);
        assert!(mask.contains(InputMask::DOWN));
        assert!(mask.contains(InputMask::SHOOT));
        assert!(!mask.contains(InputMask::UP));
        assert!(!mask.contains(InputMask::LEFT));
        assert!(!mask.contains(InputMask::RIGHT));

        let mut built = InputMask::empty();
        built |= InputMask::DOWN;
        built.insert(InputMask::SHOOT);
        assert_eq!(built, mask);

        built.remove(InputMask::SHOOT);
        assert_eq!(built, InputMask::DOWN);
    }

    #[test]
    fn test_input_mask_direction() {
        assert_eq!((InputMask::UP | InputMask::RIGHT).direction(), (1.0, -1.0));
        assert_eq!((InputMask::LEFT | InputMask::RIGHT).direction(), (0.0, 0.0));
        assert_eq!(InputMask::empty().direction(), (0.0, 0.0));
        assert!(InputMask::from_bits(0b1110_0000).is_empty());
    }

    #[test]
    fn test_opcode_direction() {
        assert!(!OpCode::Login.is_client_bound());
        assert!(!OpCode::Input.is_client_bound());
        assert!(OpCode::LoginOk.is_client_bound());
        assert!(OpCode::HealthUpdate.is_client_bound());
    }
}
