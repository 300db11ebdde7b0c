//! Shared scaffolding for the crate's tests: canned configurations, packet
//! builders and a send socket that captures datagrams instead of hitting
//! the network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{CmdConfig, GatewayConfig, MscEndpointConfig};
use crate::net::packet::{Origin, Packet};
use crate::net::send_socket::RawSendSocket;

/// A minimal valid configuration with the given MSC ids (in order) and a
/// 200 ms request deadline. Addresses are placeholders - nothing gets
/// bound in unit tests.
pub fn test_config(msc_ids: &[&str]) -> GatewayConfig {
    GatewayConfig {
        cmd: CmdConfig {
            local_addr: "127.0.0.1:9000".parse().unwrap(),
            remote_addr: "127.0.0.1:9001".parse().unwrap(),
            response_timeout: Duration::from_millis(200),
            queue_size: 10,
            default_agent_timeout: Duration::from_millis(2000),
        },
        msc_endpoints: msc_ids
            .iter()
            .enumerate()
            .map(|(i, id)| MscEndpointConfig {
                id: id.to_string(),
                local_addr: format!("127.0.0.1:{}", 9100 + 2 * i).parse().unwrap(),
                remote_addr: format!("127.0.0.1:{}", 9101 + 2 * i).parse().unwrap(),
                response_timeout: Duration::from_millis(200),
            })
            .collect(),
        stream_ports: Vec::new(),
    }
}

pub fn packet_at(payload: &[u8], origin: Origin, received_at: Instant) -> Packet {
    Packet {
        payload: payload.to_vec(),
        origin,
        sender: "127.0.0.1:4000".parse().unwrap(),
        received_at,
    }
}

pub fn packet_from(payload: &[u8], origin: Origin, sender: SocketAddr) -> Packet {
    Packet::new(payload.to_vec(), origin, sender)
}

/// Captures outbound datagrams for assertions.
pub struct CapturingSendSocket {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl CapturingSendSocket {
    pub fn new() -> Arc<CapturingSendSocket> {
        Arc::new(CapturingSendSocket {
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Everything sent so far, parsed as JSON, in send order.
    pub fn sent_json(&self) -> Vec<(SocketAddr, Value)> {
        self.sent
            .lock()
            .iter()
            .map(|(to, buf)| {
                (
                    *to,
                    serde_json::from_slice(buf).expect("captured datagram should be JSON"),
                )
            })
            .collect()
    }
}

#[async_trait]
impl RawSendSocket for CapturingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, buf: &[u8]) {
        self.sent.lock().push((to, buf.to_vec()));
    }
}
