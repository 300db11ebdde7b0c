pub mod broadcaster;
pub mod dispatcher;
pub mod ingress;
pub mod messages;
pub mod msc_worker;
pub mod responder;

use std::time::Duration;

/// Tick period shared by the cooperative workers: the ingress queue poll,
/// the MSC drain tick and the dispatcher's timeout sweep.
pub const WORKER_TICK_INTERVAL: Duration = Duration::from_millis(10); //TODO configurable?
