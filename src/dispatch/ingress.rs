use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::dispatch::messages::{DispatcherInput, ValidatedCommand};
use crate::dispatch::WORKER_TICK_INTERVAL;
use crate::net::packet_queue::PacketQueue;
use crate::net::send_socket::SendSocket;

/// Drains the command queue: validates each packet's JSON shape, rejects
/// malformed commands back to their sender, acknowledges accepted ones to
/// the configured remote sink and forwards them to the dispatcher under a
/// fresh request id.
pub struct IngressWorker {
    config: Arc<GatewayConfig>,
    queue: Arc<PacketQueue>,
    dispatcher: mpsc::UnboundedSender<DispatcherInput>,
    send_socket: Arc<SendSocket>,
    test_mode: bool,
    /// per-process, strictly increasing, never reused
    request_counter: u64,
}

impl IngressWorker {
    pub fn new(
        config: Arc<GatewayConfig>,
        queue: Arc<PacketQueue>,
        dispatcher: mpsc::UnboundedSender<DispatcherInput>,
        send_socket: Arc<SendSocket>,
        test_mode: bool,
    ) -> IngressWorker {
        IngressWorker {
            config,
            queue,
            dispatcher,
            send_socket,
            test_mode,
            request_counter: 0,
        }
    }

    pub async fn run(mut self) {
        let mut ticks = time::interval(WORKER_TICK_INTERVAL);
        loop {
            ticks.tick().await;
            self.process_one().await;
        }
    }

    /// One non-blocking pop per tick.
    pub async fn process_one(&mut self) {
        let Some(pkt) = self.queue.try_pop() else {
            return;
        };

        let cmd = match validate_command(&pkt.payload) {
            Ok(cmd) => cmd,
            Err(reason) => {
                warn!(sender = %pkt.sender, "command validation failed: {}", reason);
                let error = json!({"error": "validation_failed", "message": reason});
                self.send_socket.send_json(pkt.sender, &error).await;
                return;
            }
        };

        // NB: the provisional ack deliberately goes to the configured remote
        // sink, not back to the sender - the sender gets the final response
        self.send_socket
            .send_json(
                self.config.cmd.remote_addr,
                &json!({"status": "accepted", "message": "Command received for processing"}),
            )
            .await;

        if self.test_mode {
            info!("accepted command:\n{:#}", cmd);
        }

        self.request_counter += 1;
        let request_id = format!("req_{}", self.request_counter);
        debug!(%request_id, sender = %pkt.sender, "command forwarded to dispatcher");

        let _ = self.dispatcher.send(DispatcherInput::Command(ValidatedCommand {
            cmd,
            original_sender: pkt.sender,
            request_id,
        }));
    }
}

/// The inbound command contract: a JSON object with a string `command`
/// field. Everything else is rejected with a reason that goes back to the
/// sender verbatim.
fn validate_command(payload: &[u8]) -> Result<Value, String> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| format!("invalid JSON: {}", e))?;

    if !value.is_object() {
        return Err("payload is not a JSON object".to_string());
    }
    match value.get("command") {
        None => Err("missing 'command' field".to_string()),
        Some(Value::String(_)) => Ok(value),
        Some(_) => Err("'command' is not a string".to_string()),
    }
}
