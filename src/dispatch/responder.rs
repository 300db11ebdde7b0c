use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::dispatch::messages::FinalResponse;
use crate::net::send_socket::SendSocket;

/// Stateless tail of the pipeline: each aggregated response document is
/// sent to the original command sender as a single datagram.
pub async fn run_responder(
    mut responses: mpsc::UnboundedReceiver<FinalResponse>,
    send_socket: Arc<SendSocket>,
) {
    while let Some(response) = responses.recv().await {
        debug!(destination = %response.destination, "sending final response");
        send_socket
            .send_json(response.destination, &response.response)
            .await;
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::test_util::CapturingSendSocket;

    use super::*;

    #[tokio::test]
    async fn test_final_response_goes_to_its_destination() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = CapturingSendSocket::new();
        let task = tokio::spawn(run_responder(rx, Arc::new(SendSocket::new(sent.clone()))));

        let destination = "127.0.0.1:6001".parse().unwrap();
        tx.send(FinalResponse {
            response: json!({"status": "completed", "request_id": "req_1", "responses": []}),
            destination,
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let datagrams = sent.sent_json();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].0, destination);
        assert_eq!(datagrams[0].1["status"], "completed");
    }
}
