use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use crate::config::GatewayConfig;
use crate::dispatch::messages::{
    AgentReply, DispatcherInput, FinalResponse, MscInput, SubCommand, ValidatedCommand,
};
use crate::dispatch::WORKER_TICK_INTERVAL;

/// The in-memory record of one in-flight fan-out. Lives in the dispatcher's
/// table from command arrival until the final response is emitted, then
/// becomes unreachable.
struct PendingRequest {
    /// agents still expected to respond; never grows after creation
    waiting_for: Vec<String>,
    /// received responses in arrival order, each enriched with `agent_id`
    /// and `success`
    responses: Vec<Value>,
    original_sender: SocketAddr,
    started_at: Instant,
}

/// The fan-out state machine. A validated command is resolved to its target
/// agents and tracked as a [PendingRequest] until either every target
/// replied or the deadline passed - whichever happens first detaches the
/// entry and emits exactly one final response.
///
/// The table is owned by the dispatcher task alone, so it needs no lock:
/// all three inputs (commands, replies, the sweep tick) are serialized
/// through [run_dispatcher]'s `select!` loop.
pub struct Dispatcher {
    config: Arc<GatewayConfig>,
    /// fan-out order for `target: "all"` is the configured order
    msc_order: Vec<String>,
    msc_workers: FxHashMap<String, mpsc::UnboundedSender<MscInput>>,
    responder: mpsc::UnboundedSender<FinalResponse>,
    pending: FxHashMap<String, PendingRequest>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<GatewayConfig>,
        msc_workers: FxHashMap<String, mpsc::UnboundedSender<MscInput>>,
        responder: mpsc::UnboundedSender<FinalResponse>,
    ) -> Dispatcher {
        Dispatcher {
            msc_order: config.msc_ids(),
            config,
            msc_workers,
            responder,
            pending: Default::default(),
        }
    }

    pub fn on_command(&mut self, cmd: ValidatedCommand) {
        let target = cmd.cmd.get("target").and_then(Value::as_str).unwrap_or("");

        let targets: Vec<String> = if target == "all" {
            self.msc_order.clone()
        } else if !target.is_empty() && self.msc_workers.contains_key(target) {
            vec![target.to_owned()]
        } else {
            warn!(request_id = %cmd.request_id, %target, "invalid target");
            self.emit(
                json!({"error": "invalid_target", "message": "Target not found"}),
                cmd.original_sender,
            );
            return;
        };

        if targets.is_empty() {
            warn!(request_id = %cmd.request_id, "no targets configured");
            self.emit(
                json!({"error": "no_targets", "message": "No valid targets found"}),
                cmd.original_sender,
            );
            return;
        }

        debug!(request_id = %cmd.request_id, num_targets = targets.len(), "dispatching command");

        self.pending.insert(
            cmd.request_id.clone(),
            PendingRequest {
                waiting_for: targets.clone(),
                responses: Vec::with_capacity(targets.len()),
                original_sender: cmd.original_sender,
                started_at: Instant::now(),
            },
        );

        for target_id in targets {
            let sub = SubCommand {
                cmd: cmd.cmd.clone(),
                request_id: cmd.request_id.clone(),
                target_id: target_id.clone(),
            };
            if let Some(worker) = self.msc_workers.get(&target_id) {
                if worker.send(MscInput::SubCommand(sub)).is_err() {
                    // worker is gone (shutdown); the sweep will time the
                    // request out
                    error!(agent_id = %target_id, "MSC worker channel closed");
                }
            }
        }
    }

    pub fn on_reply(&mut self, reply: AgentReply) {
        let Some(pending) = self.pending.get_mut(&reply.request_id) else {
            // late reply after the sweep removed the entry, or unknown id
            debug!(request_id = %reply.request_id, agent_id = %reply.agent_id, "dropping reply for unknown request");
            return;
        };

        let Some(pos) = pending.waiting_for.iter().position(|id| id == &reply.agent_id) else {
            debug!(request_id = %reply.request_id, agent_id = %reply.agent_id, "dropping duplicate reply");
            return;
        };
        pending.waiting_for.remove(pos);

        let mut response = reply.response;
        if let Some(obj) = response.as_object_mut() {
            obj.insert("agent_id".to_string(), reply.agent_id.into());
            obj.insert("success".to_string(), reply.success.into());
        }
        pending.responses.push(response);

        if pending.waiting_for.is_empty() {
            // the entry must be detached before emitting so the id can
            // never complete twice
            let request_id = reply.request_id;
            let pending = self
                .pending
                .remove(&request_id)
                .expect("entry was just looked up");
            self.finish(&request_id, pending);
        }
    }

    /// Times out every pending request older than the configured deadline,
    /// synthesizing an error element for each agent that stayed silent.
    pub fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let timeout = self.config.cmd.response_timeout;

        // collect first: the table cannot be mutated mid-iteration
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.started_at) >= timeout)
            .map(|(request_id, _)| request_id.clone())
            .collect();

        for request_id in expired {
            let Some(mut pending) = self.pending.remove(&request_id) else {
                continue;
            };
            warn!(%request_id, missing = pending.waiting_for.len(), "request timed out");

            for agent_id in std::mem::take(&mut pending.waiting_for) {
                pending.responses.push(json!({
                    "error": "timeout",
                    "agent_id": agent_id,
                    "success": false,
                }));
            }
            self.finish(&request_id, pending);
        }
    }

    fn finish(&self, request_id: &str, pending: PendingRequest) {
        let response = json!({
            "status": "completed",
            "request_id": request_id,
            "responses": pending.responses,
        });
        debug!(%request_id, "final response prepared");
        self.emit(response, pending.original_sender);
    }

    fn emit(&self, response: Value, destination: SocketAddr) {
        if self
            .responder
            .send(FinalResponse {
                response,
                destination,
            })
            .is_err()
        {
            error!("responder channel closed, dropping final response");
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

pub async fn run_dispatcher(
    mut dispatcher: Dispatcher,
    mut inputs: mpsc::UnboundedReceiver<DispatcherInput>,
) {
    let mut sweep_ticks = time::interval(WORKER_TICK_INTERVAL);
    loop {
        select! {
            input = inputs.recv() => {
                match input {
                    Some(DispatcherInput::Command(cmd)) => dispatcher.on_command(cmd),
                    Some(DispatcherInput::Reply(reply)) => dispatcher.on_reply(reply),
                    None => break,
                }
            }
            _ = sweep_ticks.tick() => dispatcher.sweep_timeouts(),
        }
    }
}
