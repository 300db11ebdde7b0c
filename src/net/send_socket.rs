use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is an abstraction for transmitting a single datagram, introduced to
///  facilitate mocking the I/O part away for testing.
#[async_trait]
pub trait RawSendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, buf: &[u8]);
}

#[async_trait]
impl RawSendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        // UDP semantics: a lost datagram is a lost datagram, no retry
        if let Err(e) = self.send_to(buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}

/// A single send socket shared by all workers. Receiving stays with the
/// reactor's bound sockets; everything outbound goes through here.
pub struct SendSocket {
    socket: Arc<dyn RawSendSocket>,
}

impl SendSocket {
    /// Binds an ephemeral local port for sending.
    pub async fn bind() -> anyhow::Result<SendSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(SendSocket::new(Arc::new(Arc::new(socket))))
    }

    pub fn new(socket: Arc<dyn RawSendSocket>) -> SendSocket {
        SendSocket { socket }
    }

    pub async fn send_raw(&self, to: SocketAddr, buf: &[u8]) {
        self.socket.do_send_packet(to, buf).await;
    }

    /// Serialize one JSON document and transmit it as one datagram.
    pub async fn send_json(&self, to: SocketAddr, document: &Value) {
        match serde_json::to_vec(document) {
            Ok(buf) => self.socket.do_send_packet(to, &buf).await,
            Err(e) => error!("cannot serialize outbound JSON document: {}", e),
        }
    }
}
