//! Bulb discovery via UDP broadcast.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::debug;

use lifx_proto::{Header, Message, HEADER_SIZE};

use crate::bulb::UdpBulb;
use crate::error::{is_timeout, Error, TransportError};
use crate::{process_source, RECV_BUF_SIZE};

/// All LIFX devices listen for discovery broadcasts on this port.
const BROADCAST_PORT: u16 = 56700;

/// Broadcasts a service query and returns the lazy sequence of bulbs that answer.
///
/// The returned [Discovery] yields each distinct bulb at most once, in arrival order, and
/// finishes at the deadline.  It is not restartable; scan again with a fresh call.  Dropping
/// it early cancels the scan and releases the socket.
///
/// Failing to open the socket or to send the broadcast reports an error here, before
/// anything is yielded; trouble after that just ends the sequence with whatever was found.
pub fn discover(timeout: Duration) -> Result<Discovery, Error> {
    Discovery::start(
        SocketAddr::from((Ipv4Addr::BROADCAST, BROADCAST_PORT)),
        timeout,
    )
}

/// A running discovery scan.  See [discover].
#[derive(Debug)]
pub struct Discovery {
    socket: UdpSocket,
    deadline: Instant,
    seen: HashSet<u64>,
}

impl Discovery {
    fn start(target: SocketAddr, timeout: Duration) -> Result<Discovery, Error> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(TransportError::from)?;
        socket.set_broadcast(true).map_err(TransportError::from)?;

        let header = Header {
            size: HEADER_SIZE as u16,
            tagged: true,
            source: process_source(),
            target: 0,
            res_required: false,
            ack_required: false,
            sequence: 0,
            typ: Message::GetService.type_id(),
        };
        let packet = header.pack().map_err(TransportError::from)?;
        socket
            .send_to(&packet, target)
            .map_err(TransportError::from)?;

        Ok(Discovery {
            socket,
            deadline: Instant::now() + timeout,
            seen: HashSet::new(),
        })
    }
}

impl Iterator for Discovery {
    type Item = UdpBulb;

    fn next(&mut self) -> Option<UdpBulb> {
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let remaining = self.deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() || self.socket.set_read_timeout(Some(remaining)).is_err() {
                return None;
            }

            let (n, addr) = match self.socket.recv_from(&mut buf) {
                Ok(got) => got,
                Err(ref e) if is_timeout(e) => return None,
                Err(e) => {
                    // Discovery is best-effort: keep whatever was already yielded.
                    debug!("discovery read failed: {}", e);
                    return None;
                }
            };

            let header = match Header::unpack(&buf[..n]) {
                Ok(header) => header,
                Err(e) => {
                    debug!("ignoring malformed datagram from {}: {}", addr, e);
                    continue;
                }
            };
            if header.target == 0 || !self.seen.insert(header.target) {
                continue;
            }

            let port = match Message::decode(header.typ, &buf[HEADER_SIZE..n]) {
                Ok(Message::StateService { port, .. }) => port,
                Ok(other) => {
                    debug!(
                        "ignoring unexpected message type {} from {}",
                        other.type_id(),
                        addr
                    );
                    continue;
                }
                Err(e) => {
                    debug!("ignoring malformed datagram from {}: {}", addr, e);
                    continue;
                }
            };
            let Ok(port) = u16::try_from(port) else {
                debug!("ignoring advertised port {} from {}", port, addr);
                continue;
            };

            return Some(UdpBulb::new(header.target, SocketAddr::new(addr.ip(), port)));
        }
    }
}
