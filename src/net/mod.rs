pub mod packet;
pub mod packet_queue;
pub mod reactor;
pub mod send_socket;

/// Upper bound on a single datagram's payload, both receive and send side.
/// All peers speak one JSON object per datagram, so anything bigger is a
/// protocol violation anyway.
pub const MAX_DATAGRAM_SIZE: usize = 4096;
