use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::GatewayConfig;
use crate::dispatch::messages::MscInput;
use crate::net::packet::{Origin, Packet};
use crate::net::packet_queue::PacketQueue;
use crate::net::MAX_DATAGRAM_SIZE;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The ingress side of the gateway: one long-lived OS thread owning all
/// bound receive sockets, multiplexed through a single readiness poll.
///
/// The reactor never parses payloads. It classifies each datagram by the
/// socket it arrived on and hands it off: command packets go to the command
/// queue, MSC packets go to their lane of the MSC queue with a drain nudge
/// to the owning worker. Everything heavier happens in the worker tasks.
pub struct Reactor {
    poll: Poll,
    sockets: Vec<(UdpSocket, Origin)>,
    cmd_queue: Arc<PacketQueue>,
    msc_queue: Arc<PacketQueue>,
    msc_workers: FxHashMap<String, mpsc::UnboundedSender<MscInput>>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Binds all configured receive sockets. Failing to bind any of them is
    /// a fatal startup error, surfaced here so the caller can refuse to
    /// start rather than run half-deaf.
    pub fn bind(
        config: &GatewayConfig,
        cmd_queue: Arc<PacketQueue>,
        msc_queue: Arc<PacketQueue>,
        msc_workers: FxHashMap<String, mpsc::UnboundedSender<MscInput>>,
        shutdown: Arc<AtomicBool>,
    ) -> anyhow::Result<Reactor> {
        let poll = Poll::new().context("cannot create readiness poll")?;
        let mut sockets = Vec::new();

        let mut bindings = vec![(config.cmd.local_addr, Origin::Cmd)];
        for msc in &config.msc_endpoints {
            bindings.push((msc.local_addr, Origin::Msc(msc.id.clone())));
        }

        for (addr, origin) in bindings {
            let mut socket = UdpSocket::bind(addr)
                .with_context(|| format!("cannot bind {} socket on {}", origin, addr))?;
            poll.registry()
                .register(&mut socket, Token(sockets.len()), Interest::READABLE)
                .with_context(|| format!("cannot register {} socket", origin))?;
            debug!(local_addr = %socket.local_addr()?, %origin, "bound receive socket");
            sockets.push((socket, origin));
        }

        Ok(Reactor {
            poll,
            sockets,
            cmd_queue,
            msc_queue,
            msc_workers,
            shutdown,
        })
    }

    /// The local address a given origin's socket is actually bound to.
    /// Interesting when the configuration asked for port 0.
    pub fn local_addr(&self, origin: &Origin) -> Option<std::net::SocketAddr> {
        self.sockets
            .iter()
            .find(|(_, o)| o == origin)
            .and_then(|(socket, _)| socket.local_addr().ok())
    }

    pub fn spawn(self) -> anyhow::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || self.run())
            .context("cannot spawn reactor thread")
    }

    fn run(mut self) {
        let mut events = Events::with_capacity(self.sockets.len().max(8));
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("readiness poll failed: {}", e);
                continue;
            }

            for event in &events {
                self.drain_socket(event.token(), &mut buf);
            }
        }

        info!("reactor shut down");
    }

    /// mio is edge-triggered: a ready socket is read until it would block,
    /// so no datagram is left behind until the next readiness edge.
    fn drain_socket(&self, token: Token, buf: &mut [u8]) {
        let (socket, origin) = &self.sockets[token.0];

        loop {
            match socket.recv_from(buf) {
                Ok((len, sender)) => {
                    trace!(%origin, len, %sender, "received datagram");
                    let pkt = Packet::new(buf[..len].to_vec(), origin.clone(), sender);
                    self.deliver(pkt);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(%origin, "recv_from failed: {}", e);
                    break;
                }
            }
        }
    }

    fn deliver(&self, pkt: Packet) {
        match &pkt.origin {
            Origin::Cmd => self.cmd_queue.push(pkt),
            Origin::Msc(id) => match self.msc_workers.get(id) {
                Some(worker) => {
                    self.msc_queue.push(pkt);
                    // wake the worker; losing the nudge is fine, its drain
                    // tick picks the packet up anyway
                    let _ = worker.send(MscInput::Drain);
                }
                None => {
                    error!(agent_id = %id, "no MSC worker bound to this id, dropping packet");
                }
            },
        }
    }
}
