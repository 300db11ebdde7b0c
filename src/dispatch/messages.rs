//! The typed messages exchanged between the gateway's workers. Each worker
//! owns its state exclusively and reacts to one message at a time; these
//! structs are the only thing that crosses worker boundaries.

use std::net::SocketAddr;

use serde_json::Value;

/// A command that passed ingress validation, on its way to the dispatcher.
#[derive(Debug, Clone)]
pub struct ValidatedCommand {
    pub cmd: Value,
    pub original_sender: SocketAddr,
    pub request_id: String,
}

/// The client's command, forwarded unchanged to one MSC endpoint.
#[derive(Debug, Clone)]
pub struct SubCommand {
    pub cmd: Value,
    pub request_id: String,
    pub target_id: String,
}

/// An MSC endpoint's answer to a specific request.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub response: Value,
    pub request_id: String,
    pub agent_id: String,
    pub success: bool,
}

/// The single aggregated document going back to the original sender.
#[derive(Debug, Clone)]
pub struct FinalResponse {
    pub response: Value,
    pub destination: SocketAddr,
}

/// An MSC-originated JSON document without a request id, forwarded to the
/// broadcast sink.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_data: Value,
}

/// Everything the dispatcher reacts to (its timeout sweep is a tick, not a
/// message).
#[derive(Debug)]
pub enum DispatcherInput {
    Command(ValidatedCommand),
    Reply(AgentReply),
}

/// Inputs of one MSC worker. `Drain` is the reactor's nudge that its lane
/// of the MSC queue has new packets; the worker also drains periodically.
#[derive(Debug)]
pub enum MscInput {
    SubCommand(SubCommand),
    Drain,
}
