//! The unicast request/response dialog with a single bulb.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use lifx_proto::{Header, Message, HEADER_SIZE};

use crate::color::{Hsbk, Power};
use crate::error::{is_timeout, Error, TransportError};
use crate::{process_source, Bulb, State, RECV_BUF_SIZE};

/// Handle to a bulb reachable by unicast UDP.
///
/// Produced by [crate::discover]; can also be constructed directly when the bulb's id and
/// endpoint are already known.  Every call opens its own short-lived socket, so a handle is
/// safe to share across threads; the only state calls race on is the sequence counter.
#[derive(Debug)]
pub struct UdpBulb {
    target: u64,
    addr: SocketAddr,
    sequence: AtomicU8,
}

impl UdpBulb {
    pub fn new(target: u64, addr: SocketAddr) -> UdpBulb {
        UdpBulb {
            target,
            addr,
            sequence: AtomicU8::new(0),
        }
    }

    /// The bulb's id: its MAC address, zero-extended to 64 bits.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// The unicast endpoint the bulb advertised.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Samples the wrap-around sequence number for one request.
    ///
    /// Matching replies by sequence is not needed here, since every call reads exactly one
    /// datagram from its own socket; the number is stamped into headers for operator
    /// debugging.
    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// One full request/response cycle: frame, send, read one datagram, decode.
    fn send_and_receive(&self, msg: &Message, timeout: Duration) -> Result<Message, Error> {
        let payload = msg.encode().map_err(TransportError::from)?;
        let header = Header {
            size: (HEADER_SIZE + payload.len()) as u16,
            tagged: false,
            source: process_source(),
            target: self.target,
            res_required: true,
            ack_required: false,
            sequence: self.next_sequence(),
            typ: msg.type_id(),
        };
        let mut packet = header.pack().map_err(TransportError::from)?;
        packet.extend_from_slice(&payload);

        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(TransportError::from)?;
        socket.connect(self.addr).map_err(TransportError::from)?;
        socket
            .set_write_timeout(Some(timeout))
            .map_err(TransportError::from)?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::from)?;

        socket.send(&packet).map_err(TransportError::from)?;

        let mut buf = [0u8; RECV_BUF_SIZE];
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e) if is_timeout(e) => return Err(Error::NoResponse),
            Err(e) => return Err(TransportError::Io(e).into()),
        };

        let reply = Header::unpack(&buf[..n]).map_err(TransportError::from)?;
        let msg = Message::decode(reply.typ, &buf[HEADER_SIZE..n]).map_err(TransportError::from)?;
        Ok(msg)
    }
}

impl Bulb for UdpBulb {
    fn state(&self, timeout: Duration) -> Result<State, Error> {
        match self.send_and_receive(&Message::Get, timeout)? {
            Message::State {
                color,
                power,
                label,
                ..
            } => Ok(State {
                label: label.0,
                power: Power::from_wire(power)?,
                color: Hsbk::from_wire(color),
            }),
            other => Err(unexpected("State", &other)),
        }
    }

    fn set_power(
        &self,
        power: Power,
        transition: Duration,
        timeout: Duration,
    ) -> Result<(), Error> {
        let req = Message::SetPower {
            level: power.to_wire(),
            duration: millis(transition),
        };
        // Some firmwares answer a SetPower with a StatePower echo, others with a bare
        // acknowledgement; take whichever arrives first.
        match self.send_and_receive(&req, timeout)? {
            Message::StatePower { .. } | Message::Acknowledgement => Ok(()),
            other => Err(unexpected("StatePower or Acknowledgement", &other)),
        }
    }

    fn set_color(&self, color: Hsbk, transition: Duration, timeout: Duration) -> Result<(), Error> {
        let color = color.to_wire()?;
        let req = Message::SetColor {
            reserved: 0,
            color,
            duration: millis(transition),
        };
        match self.send_and_receive(&req, timeout)? {
            Message::State { .. } | Message::Acknowledgement => Ok(()),
            other => Err(unexpected("State or Acknowledgement", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &Message) -> Error {
    TransportError::UnexpectedReply {
        expected,
        got: got.type_id(),
    }
    .into()
}

/// Transition time in whole milliseconds, saturating at the wire field's range.
fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
