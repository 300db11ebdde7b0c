use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{GatewayConfig, MscEndpointConfig};
use crate::dispatch::broadcaster::run_broadcaster;
use crate::dispatch::dispatcher::{run_dispatcher, Dispatcher};
use crate::dispatch::ingress::IngressWorker;
use crate::dispatch::messages::{DispatcherInput, Event, FinalResponse, MscInput};
use crate::dispatch::msc_worker::MscWorker;
use crate::dispatch::responder::run_responder;
use crate::net::packet::Origin;
use crate::net::packet_queue::PacketQueue;
use crate::net::reactor::Reactor;
use crate::net::send_socket::SendSocket;

/// The gateway's public API: binds all sockets, wires the workers together
/// and runs until the supplied shutdown future resolves.
///
/// All channels are created here, before any worker is spawned, so the
/// cyclic wiring (ingress needs the dispatcher, the dispatcher needs the
/// responder and every MSC worker, MSC workers need the dispatcher again)
/// reduces to handing pre-made handles into each constructor.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    test_mode: bool,
    shutdown: Arc<AtomicBool>,
    reactor: Reactor,
    send_socket: Arc<SendSocket>,
    cmd_queue: Arc<PacketQueue>,
    msc_queue: Arc<PacketQueue>,
    dispatcher_tx: mpsc::UnboundedSender<DispatcherInput>,
    dispatcher_rx: mpsc::UnboundedReceiver<DispatcherInput>,
    responder_tx: mpsc::UnboundedSender<FinalResponse>,
    responder_rx: mpsc::UnboundedReceiver<FinalResponse>,
    broadcaster_tx: mpsc::UnboundedSender<Event>,
    broadcaster_rx: mpsc::UnboundedReceiver<Event>,
    msc_txs: FxHashMap<String, mpsc::UnboundedSender<MscInput>>,
    msc_rxs: Vec<(MscEndpointConfig, mpsc::UnboundedReceiver<MscInput>)>,
}

impl Gateway {
    /// Binds every configured socket. Any bind failure is fatal and
    /// surfaces here, before anything starts running.
    pub async fn bind(config: Arc<GatewayConfig>, test_mode: bool) -> anyhow::Result<Gateway> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let cmd_queue = Arc::new(PacketQueue::new(config.cmd.queue_size));
        let msc_queue = Arc::new(PacketQueue::new(config.cmd.queue_size));
        let send_socket = Arc::new(SendSocket::bind().await?);

        let (dispatcher_tx, dispatcher_rx) = mpsc::unbounded_channel();
        let (responder_tx, responder_rx) = mpsc::unbounded_channel();
        let (broadcaster_tx, broadcaster_rx) = mpsc::unbounded_channel();

        let mut msc_txs = FxHashMap::default();
        let mut msc_rxs = Vec::new();
        for msc in &config.msc_endpoints {
            let (tx, rx) = mpsc::unbounded_channel();
            msc_txs.insert(msc.id.clone(), tx);
            msc_rxs.push((msc.clone(), rx));
        }

        let reactor = Reactor::bind(
            &config,
            cmd_queue.clone(),
            msc_queue.clone(),
            msc_txs.clone(),
            shutdown.clone(),
        )?;

        Ok(Gateway {
            config,
            test_mode,
            shutdown,
            reactor,
            send_socket,
            cmd_queue,
            msc_queue,
            dispatcher_tx,
            dispatcher_rx,
            responder_tx,
            responder_rx,
            broadcaster_tx,
            broadcaster_rx,
            msc_txs,
            msc_rxs,
        })
    }

    /// The command socket's actual local address. Interesting when the
    /// configuration asked for port 0.
    pub fn cmd_local_addr(&self) -> Option<SocketAddr> {
        self.reactor.local_addr(&Origin::Cmd)
    }

    pub fn msc_local_addr(&self, agent_id: &str) -> Option<SocketAddr> {
        self.reactor.local_addr(&Origin::Msc(agent_id.to_owned()))
    }

    /// Spawns the reactor thread and all worker tasks, then waits for
    /// `shutdown_signal`. Teardown stops the reactor via the shared flag
    /// and aborts the workers mid-tick; in-flight requests are abandoned
    /// (re-sending after a restart is the client's job, per UDP).
    pub async fn run(self, shutdown_signal: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!(
            cmd_local = %self.config.cmd.local_addr,
            num_msc = self.config.msc_endpoints.len(),
            "starting gateway"
        );

        let reactor_handle = self.reactor.spawn()?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_responder(
            self.responder_rx,
            self.send_socket.clone(),
        )));
        tasks.push(tokio::spawn(run_broadcaster(
            self.config.clone(),
            self.broadcaster_rx,
            self.send_socket.clone(),
        )));
        for (settings, rx) in self.msc_rxs {
            let worker = MscWorker::new(
                settings,
                self.msc_queue.clone(),
                self.dispatcher_tx.clone(),
                self.broadcaster_tx.clone(),
                self.send_socket.clone(),
            );
            tasks.push(tokio::spawn(worker.run(rx)));
        }
        tasks.push(tokio::spawn(run_dispatcher(
            Dispatcher::new(self.config.clone(), self.msc_txs, self.responder_tx),
            self.dispatcher_rx,
        )));
        tasks.push(tokio::spawn(
            IngressWorker::new(
                self.config.clone(),
                self.cmd_queue,
                self.dispatcher_tx,
                self.send_socket,
                self.test_mode,
            )
            .run(),
        ));

        shutdown_signal.await;

        info!("stopping gateway");
        self.shutdown.store(true, Ordering::Relaxed);
        for task in &tasks {
            task.abort();
        }
        let _ = tokio::task::spawn_blocking(move || reactor_handle.join()).await;
        info!("gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::net::UdpSocket;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use super::*;

    struct Harness {
        client: UdpSocket,
        remote_sink: UdpSocket,
        msc_peers: Vec<UdpSocket>,
        cmd_addr: SocketAddr,
        msc_addrs: Vec<SocketAddr>,
        stop: Option<oneshot::Sender<()>>,
        gateway_task: JoinHandle<anyhow::Result<()>>,
    }

    /// Real-socket harness: the gateway binds port 0 everywhere, the test
    /// plays client, remote sink and all MSC peers.
    async fn start_gateway(num_msc: usize, response_timeout_ms: u64) -> Harness {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote_sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut msc_peers = Vec::new();
        for _ in 0..num_msc {
            msc_peers.push(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        }

        let msc_agents: Vec<Value> = msc_peers
            .iter()
            .enumerate()
            .map(|(i, peer)| {
                json!({
                    "id": format!("{}", i + 1),
                    "local_address": "127.0.0.1:0",
                    "remote_address": peer.local_addr().unwrap().to_string(),
                    "response_timeout_ms": response_timeout_ms,
                })
            })
            .collect();
        let config_json = json!({
            "cmd": {
                "local_address": "127.0.0.1:0",
                "remote_address": remote_sink.local_addr().unwrap().to_string(),
                "response_timeout_ms": response_timeout_ms,
                "agent_settings": { "queue_size": 100 }
            },
            "msc_agent": msc_agents,
            "stream_ports": []
        });
        let config = Arc::new(GatewayConfig::parse(&config_json.to_string()).unwrap());

        let gateway = Gateway::bind(config, false).await.unwrap();
        let cmd_addr = gateway.cmd_local_addr().unwrap();
        let msc_addrs = (0..num_msc)
            .map(|i| gateway.msc_local_addr(&format!("{}", i + 1)).unwrap())
            .collect();

        let (stop, stopped) = oneshot::channel();
        let gateway_task = tokio::spawn(gateway.run(async move {
            let _ = stopped.await;
        }));

        Harness {
            client,
            remote_sink,
            msc_peers,
            cmd_addr,
            msc_addrs,
            stop: Some(stop),
            gateway_task,
        }
    }

    impl Harness {
        async fn shutdown(mut self) {
            let _ = self.stop.take().unwrap().send(());
            self.gateway_task.await.unwrap().unwrap();
        }
    }

    async fn recv_json(socket: &UdpSocket) -> Value {
        let mut buf = [0u8; 4096];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .unwrap();
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_fan_out_aggregation_and_per_agent_timeout() {
        let harness = start_gateway(2, 400).await;

        harness
            .client
            .send_to(br#"{"command":"ping","target":"all"}"#, harness.cmd_addr)
            .await
            .unwrap();

        // the provisional ack goes to the remote sink, not the client
        let ack = recv_json(&harness.remote_sink).await;
        assert_eq!(ack["status"], "accepted");

        // both peers got the client's command verbatim; only peer 1 answers
        let sub1 = recv_json(&harness.msc_peers[0]).await;
        assert_eq!(sub1, json!({"command": "ping", "target": "all"}));
        let sub2 = recv_json(&harness.msc_peers[1]).await;
        assert_eq!(sub2, json!({"command": "ping", "target": "all"}));

        harness.msc_peers[0]
            .send_to(br#"{"request_id":"req_1","ok":true}"#, harness.msc_addrs[0])
            .await
            .unwrap();

        let final_response = recv_json(&harness.client).await;
        assert_eq!(final_response["status"], "completed");
        assert_eq!(final_response["request_id"], "req_1");
        let responses = final_response["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["agent_id"], "1");
        assert_eq!(responses[0]["ok"], true);
        assert_eq!(responses[0]["success"], true);
        assert_eq!(responses[1], json!({"error": "timeout", "agent_id": "2", "success": false}));

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejections_go_back_to_the_sender() {
        let harness = start_gateway(1, 300).await;

        harness.client.send_to(b"hello", harness.cmd_addr).await.unwrap();
        let rejection = recv_json(&harness.client).await;
        assert_eq!(rejection["error"], "validation_failed");

        harness
            .client
            .send_to(br#"{"command":"x","target":"nonexistent"}"#, harness.cmd_addr)
            .await
            .unwrap();
        let rejection = recv_json(&harness.client).await;
        assert_eq!(rejection["error"], "invalid_target");

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsolicited_msc_traffic_is_broadcast() {
        let harness = start_gateway(1, 300).await;

        harness.msc_peers[0]
            .send_to(br#"{"event":"alarm","code":7}"#, harness.msc_addrs[0])
            .await
            .unwrap();

        let event = recv_json(&harness.remote_sink).await;
        assert_eq!(event, json!({"event": "alarm", "code": 7}));

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_datagrams_yield_independent_requests() {
        let harness = start_gateway(1, 300).await;
        let payload = br#"{"command":"ping","target":"1"}"#;

        harness.client.send_to(payload, harness.cmd_addr).await.unwrap();
        harness.client.send_to(payload, harness.cmd_addr).await.unwrap();

        // the single peer sees two sub-commands and answers both
        for expected_id in ["req_1", "req_2"] {
            let _ = recv_json(&harness.msc_peers[0]).await;
            harness.msc_peers[0]
                .send_to(
                    json!({"request_id": expected_id, "done": true}).to_string().as_bytes(),
                    harness.msc_addrs[0],
                )
                .await
                .unwrap();
        }

        let first = recv_json(&harness.client).await;
        let second = recv_json(&harness.client).await;
        let mut ids = vec![
            first["request_id"].as_str().unwrap().to_string(),
            second["request_id"].as_str().unwrap().to_string(),
        ];
        ids.sort();
        assert_eq!(ids, vec!["req_1", "req_2"]);

        harness.shutdown().await;
    }
}
