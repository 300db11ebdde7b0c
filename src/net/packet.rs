use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Instant;

/// Identifies the port family a datagram arrived on. Every bound socket is
/// labeled with its origin when the reactor starts, and the label travels
/// with each packet so downstream workers can route without re-inspecting
/// addresses.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Origin {
    /// the command / control port
    Cmd,
    /// the receive port of the MSC endpoint with the given id
    Msc(String),
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Cmd => write!(f, "cmd"),
            Origin::Msc(id) => write!(f, "msc_{}", id),
        }
    }
}

/// A raw inbound datagram. The arrival timestamp is assigned here, on the
/// reactor side, so queueing delays never reorder packets.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Vec<u8>,
    pub origin: Origin,
    pub sender: SocketAddr,
    pub received_at: Instant,
}

impl Packet {
    pub fn new(payload: Vec<u8>, origin: Origin, sender: SocketAddr) -> Packet {
        Packet {
            payload,
            origin,
            sender,
            received_at: Instant::now(),
        }
    }
}
