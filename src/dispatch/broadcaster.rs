use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::dispatch::messages::Event;
use crate::net::send_socket::SendSocket;

/// Stateless fan-in for asynchronous MSC events: everything that arrives
/// here goes out to the configured command-remote address as one datagram
/// per event.
pub async fn run_broadcaster(
    config: Arc<GatewayConfig>,
    mut events: mpsc::UnboundedReceiver<Event>,
    send_socket: Arc<SendSocket>,
) {
    while let Some(event) = events.recv().await {
        debug!("broadcasting event");
        send_socket
            .send_json(config.cmd.remote_addr, &event.event_data)
            .await;
    }
}
