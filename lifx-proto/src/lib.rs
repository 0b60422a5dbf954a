//! Low-level message types and framing for the LIFX LAN protocol.
//!
//! This lets you control lights on your local area network.  More info can be found here:
//! https://lan.developer.lifx.com/
//!
//! Since this is a low-level library, it does not deal with issues like talking to the network,
//! matching replies to requests, or waiting for responses.  This should be done at a
//! higher-level library (see the `lifx-lan` crate).
//!
//! Every message on the wire is a fixed 36-byte [Header] followed by a typed payload, all
//! little-endian.  [Header::pack] and [Message::encode] produce the bytes to send;
//! [Header::unpack] and [Message::decode] parse what comes back.
//!
//! # Unknown values
//! It's common to see packets from LIFX bulbs that don't match the documented protocol.  These
//! are suspected to be internal messages used by official LIFX apps.  Decoding one reports
//! [Error::UnknownMessageType], which does not necessarily represent a bug.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};
use thiserror::Error;

/// Packed size of the frame header, in bytes.
pub const HEADER_SIZE: usize = 36;

/// Protocol number carried in the low 12 bits of the frame flags.  Must be 1024.
const PROTOCOL: u16 = 1024;

/// Various message encoding/decoding errors.
#[derive(Debug, Error)]
pub enum Error {
    /// We were unable to parse a raw message because its type is unknown.
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    /// A header buffer was shorter than the fixed 36-byte layout.
    #[error("header needs 36 bytes, got {got}")]
    WrongHeaderLength { got: usize },

    /// One of the message fields contains an invalid or unsupported value.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Lifx strings are fixed-length on the wire (32 bytes, NUL-padded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifxString(pub String);

impl LifxString {
    /// Constructs a new LifxString, truncating to 32 bytes on a character boundary.
    pub fn new(s: &str) -> LifxString {
        let mut end = s.len().min(32);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        LifxString(s[..end].to_owned())
    }
}

impl std::fmt::Display for LifxString {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

impl std::cmp::PartialEq<str> for LifxString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Bulb color (Hue-Saturation-Brightness-Kelvin) as it appears on the wire.
///
/// All four components are unsigned 16-bit integers.  Hue, saturation, and brightness are
/// scaled over the full `u16` range; kelvin is carried as-is (normal values run from 2500
/// warm/yellow to 9000 cool/blue).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HSBK {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

trait LittleEndianWriter<T>: WriteBytesExt {
    fn write_val(&mut self, v: T) -> Result<(), io::Error>;
}

macro_rules! derive_writer {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: WriteBytesExt> LittleEndianWriter<$t> for T {
            fn write_val(&mut self, v: $t) -> Result<(), io::Error> {
                self . $m ::<LittleEndian>(v)
            }
        }
    )*

}
}

derive_writer! { write_u32: u32, write_u16: u16, write_i16: i16, write_u64: u64 }

impl<T: WriteBytesExt> LittleEndianWriter<u8> for T {
    fn write_val(&mut self, v: u8) -> Result<(), io::Error> {
        self.write_u8(v)
    }
}

impl<T> LittleEndianWriter<HSBK> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: HSBK) -> Result<(), io::Error> {
        self.write_val(v.hue)?;
        self.write_val(v.saturation)?;
        self.write_val(v.brightness)?;
        self.write_val(v.kelvin)?;
        Ok(())
    }
}

impl<T> LittleEndianWriter<&LifxString> for T
where
    T: WriteBytesExt,
{
    fn write_val(&mut self, v: &LifxString) -> Result<(), io::Error> {
        let bytes = v.0.as_bytes();
        for idx in 0..32 {
            if idx >= bytes.len() {
                self.write_u8(0)?;
            } else {
                self.write_u8(bytes[idx])?;
            }
        }
        Ok(())
    }
}

trait LittleEndianReader<T> {
    fn read_val(&mut self) -> Result<T, io::Error>;
}

macro_rules! derive_reader {
{ $( $m:ident: $t:ty ),*} => {
    $(
        impl<T: ReadBytesExt> LittleEndianReader<$t> for T {
            fn read_val(&mut self) -> Result<$t, io::Error> {
                self . $m ::<LittleEndian>()
            }
        }
    )*

}
}

derive_reader! { read_u32: u32, read_u16: u16, read_i16: i16, read_u64: u64 }

impl<R: ReadBytesExt> LittleEndianReader<u8> for R {
    fn read_val(&mut self) -> Result<u8, io::Error> {
        self.read_u8()
    }
}

impl<R: ReadBytesExt> LittleEndianReader<HSBK> for R {
    fn read_val(&mut self) -> Result<HSBK, io::Error> {
        let hue = self.read_val()?;
        let sat = self.read_val()?;
        let bri = self.read_val()?;
        let kel = self.read_val()?;
        Ok(HSBK {
            hue,
            saturation: sat,
            brightness: bri,
            kelvin: kel,
        })
    }
}

impl<R: ReadBytesExt> LittleEndianReader<LifxString> for R {
    fn read_val(&mut self) -> Result<LifxString, io::Error> {
        let mut raw = [0u8; 32];
        for v in &mut raw {
            *v = self.read_val()?;
        }
        // Trailing NUL padding is not part of the label.
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let label = std::str::from_utf8(&raw[..end])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "label is not valid utf-8"))?;
        Ok(LifxString(label.to_owned()))
    }
}

macro_rules! unpack {
    ($payload:expr, $typ:ident, $( $n:ident: $t:ident ),*) => {
        {
        let mut c = Cursor::new($payload);
        $(
            let $n: $t = c.read_val()?;
        )*

        Message::$typ{
            $(
                $n,
            )*
        }
        }

    };
}

/// Decoded LIFX Messages
///
/// This enum lists all of the LIFX message types known to this library: the discovery pair,
/// the light state/power/color operations, and the generic acknowledgement.
///
/// Note that many other message types exist; anything else decodes to
/// [Error::UnknownMessageType].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// GetService - 2
    ///
    /// Sent by a client as a broadcast to acquire responses from all devices on the local
    /// network.  No payload.  Causes the devices to transmit a [Message::StateService].
    GetService,

    /// StateService - 3
    ///
    /// Response to [Message::GetService].
    StateService {
        /// unsigned 8-bit integer; always 1, for "UDP".
        service: u8,
        /// Port number the device listens on.  If the service is temporarily unavailable, the
        /// port value will be 0.
        port: u32,
    },

    /// Acknowledgement - 45
    ///
    /// Response to any message sent with ack_required set to 1.  No payload.
    Acknowledgement,

    /// Get - 101
    ///
    /// Sent by a client to obtain the light state.  No payload.  Causes the device to transmit
    /// a [Message::State].
    Get,

    /// SetColor - 102
    ///
    /// Sent by a client to change the light color.
    ///
    /// If the header res_required field is set to one (1) then the device will transmit a
    /// State message.
    SetColor {
        reserved: u8,
        /// Color in HSBK.
        color: HSBK,
        /// Color transition time in milliseconds.
        duration: u32,
    },

    /// State - 107
    ///
    /// Sent by a device to provide the current light state.
    State {
        color: HSBK,
        reserved: i16,
        /// Must be either 0x0000 (off) or 0xFFFF (on).
        power: u16,
        /// The bulb's human-readable label.
        label: LifxString,
        reserved2: u64,
    },

    /// SetPower - 117
    ///
    /// Sent by a client to change the light power level.  The level must be either 0 or 65535.
    ///
    /// If the header res_required field is set to one (1) then the device will transmit a
    /// StatePower message.
    SetPower {
        level: u16,
        /// Power transition time in milliseconds.
        duration: u32,
    },

    /// StatePower - 118
    ///
    /// Sent by a device to provide the current power level.
    StatePower { level: u16 },
}

impl Message {
    /// The wire type id of this message, as carried in [Header::typ].
    pub fn type_id(&self) -> u16 {
        match *self {
            Message::GetService => 2,
            Message::StateService { .. } => 3,
            Message::Acknowledgement => 45,
            Message::Get => 101,
            Message::SetColor { .. } => 102,
            Message::State { .. } => 107,
            Message::SetPower { .. } => 117,
            Message::StatePower { .. } => 118,
        }
    }

    /// Packs this message's payload into bytes.  The header is built separately.
    ///
    /// Inbound message types can be encoded too, which is how the fake bulbs in tests are
    /// built.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::new();
        match self {
            Message::GetService | Message::Acknowledgement | Message::Get => {
                // these types have no payload
            }
            Message::StateService { service, port } => {
                v.write_val(*service)?;
                v.write_val(*port)?;
            }
            Message::SetColor {
                reserved,
                color,
                duration,
            } => {
                v.write_val(*reserved)?;
                v.write_val(*color)?;
                v.write_val(*duration)?;
            }
            Message::State {
                color,
                reserved,
                power,
                label,
                reserved2,
            } => {
                v.write_val(*color)?;
                v.write_val(*reserved)?;
                v.write_val(*power)?;
                v.write_val(label)?;
                v.write_val(*reserved2)?;
            }
            Message::SetPower { level, duration } => {
                v.write_val(*level)?;
                v.write_val(*duration)?;
            }
            Message::StatePower { level } => {
                v.write_val(*level)?;
            }
        }
        Ok(v)
    }

    /// Tries to parse a payload, based on the message type from its header.
    pub fn decode(typ: u16, payload: &[u8]) -> Result<Message, Error> {
        Ok(match typ {
            2 => Message::GetService,
            3 => unpack!(payload, StateService, service: u8, port: u32),
            45 => Message::Acknowledgement,
            101 => Message::Get,
            102 => unpack!(payload, SetColor, reserved: u8, color: HSBK, duration: u32),
            107 => unpack!(
                payload,
                State,
                color: HSBK,
                reserved: i16,
                power: u16,
                label: LifxString,
                reserved2: u64
            ),
            117 => unpack!(payload, SetPower, level: u16, duration: u32),
            118 => unpack!(payload, StatePower, level: u16),
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

/// The LIFX LAN frame header.
///
/// Every packet starts with this fixed 36-byte structure; the payload follows immediately.
/// Only the fields a client actually steers are surfaced here.  Everything else in the
/// layout (origin, addressable, protocol number, the reserved runs) is pinned to the
/// constants the protocol requires when packing, and ignored when unpacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Size of the entire message in bytes, including this header.
    pub size: u16,

    /// Whether [Header::target] addresses all devices (broadcast discovery) rather than one.
    pub tagged: bool,

    /// Unique client identifier; replies are unicast back to the socket that used it.
    ///
    /// If the source is zero, the device may answer with a broadcast that every client on the
    /// subnet receives.
    pub source: u32,

    /// 6-byte device MAC address zero-extended to 64 bits, or zero for all devices.
    pub target: u64,

    /// Response message required.
    ///
    /// Message types that read data from a light should always set this.
    pub res_required: bool,

    /// Acknowledgement message required.
    ///
    /// Causes the light to send a [Message::Acknowledgement].
    pub ack_required: bool,

    /// Wrap-around message sequence number.
    pub sequence: u8,

    /// Message type; determines the payload being used.
    pub typ: u16,
}

impl Header {
    /// Packs this header into exactly [HEADER_SIZE] bytes.
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut v = Vec::with_capacity(HEADER_SIZE);

        // Frame: size, then origin/tagged/addressable/protocol packed as a u16.
        v.write_u16::<LittleEndian>(self.size)?;
        let mut d: u16 = PROTOCOL;
        d |= 1 << 12; // addressable, must be one
        if self.tagged {
            d |= 1 << 13;
        }
        v.write_u16::<LittleEndian>(d)?;
        v.write_u32::<LittleEndian>(self.source)?;

        // Frame address.
        v.write_u64::<LittleEndian>(self.target)?;
        v.extend_from_slice(&[0; 6]);
        let b: u8 = if self.res_required { 1 } else { 0 } | if self.ack_required { 2 } else { 0 };
        v.write_u8(b)?;
        v.write_u8(self.sequence)?;

        // Protocol header.
        v.write_u64::<LittleEndian>(0)?;
        v.write_u16::<LittleEndian>(self.typ)?;
        v.write_u16::<LittleEndian>(0)?;

        Ok(v)
    }

    /// Given some bytes (generally read from a network socket), unpack the leading header.
    pub fn unpack(v: &[u8]) -> Result<Header, Error> {
        if v.len() < HEADER_SIZE {
            return Err(Error::WrongHeaderLength { got: v.len() });
        }
        let mut c = Cursor::new(v);

        let size = c.read_val()?;

        // origin + tagged + addressable + protocol
        let d: u16 = c.read_val()?;
        let tagged = (d & 0b0010_0000_0000_0000) > 0;
        let protocol = d & 0b0000_1111_1111_1111;
        if protocol != PROTOCOL {
            return Err(Error::Protocol(format!(
                "unpacked header had protocol version {}",
                protocol
            )));
        }

        let source = c.read_val()?;
        let target = c.read_val()?;

        // 6 reserved bytes, then the res/ack flags and the sequence number.
        for _ in 0..6 {
            let _: u8 = c.read_val()?;
        }
        let b: u8 = c.read_val()?;
        let res_required = (b & 0b01) > 0;
        let ack_required = (b & 0b10) > 0;
        let sequence = c.read_val()?;

        let _: u64 = c.read_val()?;
        let typ = c.read_val()?;

        Ok(Header {
            size,
            tagged,
            source,
            target,
            res_required,
            ack_required,
            sequence,
            typ,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pack_size() {
        let header = Header {
            size: 0x1122,
            tagged: true,
            source: 1234567,
            target: 0,
            res_required: false,
            ack_required: false,
            sequence: 0,
            typ: 2,
        };

        let v = header.pack().unwrap();
        assert_eq!(v.len(), HEADER_SIZE);
        assert_eq!(v[0], 0x22);
        assert_eq!(v[1], 0x11);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            size: 49,
            tagged: false,
            source: 0x053741ca,
            target: 0x0000_AABB_CCDD_EEFF,
            res_required: true,
            ack_required: true,
            sequence: 248,
            typ: 0x4455,
        };

        let unpacked = Header::unpack(&header.pack().unwrap()).unwrap();
        assert_eq!(header, unpacked);
    }

    #[test]
    fn test_header_roundtrip_all_sequences() {
        for s in 0..=255u8 {
            let header = Header {
                size: 36,
                tagged: s % 2 == 0,
                source: u32::from(s) * 99991,
                target: u64::from(s) << 40,
                res_required: s % 2 == 1,
                ack_required: s % 3 == 0,
                sequence: s,
                typ: u16::from(s),
            };
            assert_eq!(header, Header::unpack(&header.pack().unwrap()).unwrap());
        }
    }

    #[test]
    fn test_decode_header() {
        let v = vec![
            0x24, 0x00, 0x00, 0x14, 0xca, 0x41, 0x37, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x98, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00,
        ];

        let header = Header::unpack(&v).unwrap();
        assert_eq!(header.size, 0x0024);
        assert_eq!(header.tagged, false);
        assert_eq!(header.source, 0x053741ca);
        assert_eq!(header.res_required, true);
        assert_eq!(header.ack_required, false);
        assert_eq!(header.sequence, 0x98);
        assert_eq!(header.typ, 0x33);
    }

    #[test]
    fn test_decode_header_too_short() {
        let v = vec![0x24, 0x00, 0x00, 0x14];
        match Header::unpack(&v) {
            Err(Error::WrongHeaderLength { got: 4 }) => {}
            other => panic!("expected WrongHeaderLength, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_header_bad_protocol() {
        let mut v = vec![0u8; HEADER_SIZE];
        v[2] = 0x01; // protocol = 1
        v[3] = 0x14;
        assert!(matches!(Header::unpack(&v), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_state_packet() {
        // A State (107) reply captured from a bulb labelled "Kitchen".
        let v = vec![
            0x58, 0x00, 0x00, 0x54, 0xca, 0x41, 0x37, 0x05, 0xd0, 0x73, 0xd5, 0x02, 0x97, 0xde,
            0x00, 0x00, 0x4c, 0x49, 0x46, 0x58, 0x56, 0x32, 0x00, 0xc0, 0x44, 0x30, 0xeb, 0x47,
            0xc4, 0x48, 0x18, 0x14, 0x6b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff,
            0xb8, 0x0b, 0x00, 0x00, 0xff, 0xff, 0x4b, 0x69, 0x74, 0x63, 0x68, 0x65, 0x6e, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let header = Header::unpack(&v).unwrap();
        assert_eq!(header.size as usize, v.len());
        assert_eq!(header.typ, 107);

        let msg = Message::decode(header.typ, &v[HEADER_SIZE..]).unwrap();
        match msg {
            Message::State {
                color,
                power,
                label,
                ..
            } => {
                assert_eq!(
                    color,
                    HSBK {
                        hue: 0,
                        saturation: 0,
                        brightness: 0xffff,
                        kelvin: 3000,
                    }
                );
                assert_eq!(power, 0xffff);
                assert_eq!(label, *"Kitchen");
            }
            other => panic!("expected State, got {:?}", other),
        }
    }

    #[test]
    fn test_build_a_packet() {
        // packet taken from https://lan.developer.lifx.com/docs/building-a-lifx-packet

        let msg = Message::SetColor {
            reserved: 0,
            color: HSBK {
                hue: 21845,
                saturation: 0xffff,
                brightness: 0xffff,
                kelvin: 3500,
            },
            duration: 1024,
        };
        let payload = msg.encode().unwrap();

        let header = Header {
            size: (HEADER_SIZE + payload.len()) as u16,
            tagged: true,
            source: 0,
            target: 0,
            res_required: false,
            ack_required: false,
            sequence: 0,
            typ: msg.type_id(),
        };

        let mut bytes = header.pack().unwrap();
        bytes.extend_from_slice(&payload);
        assert_eq!(bytes.len(), 49);
        assert_eq!(
            bytes,
            vec![
                0x31, 0x00, 0x00, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x66, 0x00, 0x00, 0x00, 0x00, 0x55, 0x55, 0xFF, 0xFF, 0xFF,
                0xFF, 0xAC, 0x0D, 0x00, 0x04, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_state_service_roundtrip() {
        let msg = Message::StateService {
            service: 1,
            port: 56700,
        };
        let payload = msg.encode().unwrap();
        assert_eq!(payload.len(), 5);
        assert_eq!(Message::decode(3, &payload).unwrap(), msg);
    }

    #[test]
    fn test_decode_unknown_type() {
        match Message::decode(103, &[]) {
            Err(Error::UnknownMessageType(103)) => {}
            other => panic!("expected UnknownMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_truncated_payload() {
        // StatePower needs two bytes.
        assert!(matches!(Message::decode(118, &[0xff]), Err(Error::Io(_))));
    }

    #[test]
    fn test_label_padding_roundtrip() {
        let msg = Message::State {
            color: HSBK {
                hue: 1,
                saturation: 2,
                brightness: 3,
                kelvin: 3500,
            },
            reserved: 0,
            power: 0,
            label: LifxString::new("bedside"),
            reserved2: 0,
        };
        let payload = msg.encode().unwrap();
        assert_eq!(payload.len(), 52);
        assert_eq!(Message::decode(107, &payload).unwrap(), msg);
    }

    #[test]
    fn test_label_not_utf8() {
        let mut payload = Message::State {
            color: HSBK {
                hue: 0,
                saturation: 0,
                brightness: 0,
                kelvin: 2500,
            },
            reserved: 0,
            power: 0,
            label: LifxString::new(""),
            reserved2: 0,
        }
        .encode()
        .unwrap();
        payload[12] = 0xff; // first label byte
        assert!(Message::decode(107, &payload).is_err());
    }

    #[test]
    fn test_lifx_string_truncates() {
        let s = LifxString::new("ssssssssssssssssssssssssssssssssssss");
        assert_eq!(s.0.len(), 32);
    }
}
