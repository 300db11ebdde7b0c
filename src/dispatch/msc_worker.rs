use std::sync::Arc;

use serde_json::Value;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, warn};

use crate::config::MscEndpointConfig;
use crate::dispatch::messages::{AgentReply, DispatcherInput, Event, MscInput, SubCommand};
use crate::dispatch::WORKER_TICK_INTERVAL;
use crate::net::packet_queue::PacketQueue;
use crate::net::send_socket::SendSocket;

/// What an inbound MSC datagram turned out to be.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// a synchronous answer to a request this gateway fanned out
    Reply { request_id: String, payload: Value },
    /// anything else - forwarded to the broadcast sink
    Event(Value),
}

/// An object carrying a string `request_id` answers a known request;
/// every other parseable payload is an asynchronous event.
pub fn classify_inbound(payload: &[u8]) -> Result<Inbound, serde_json::Error> {
    let value: Value = serde_json::from_slice(payload)?;

    let request_id = value
        .as_object()
        .and_then(|obj| obj.get("request_id"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(match request_id {
        Some(request_id) => Inbound::Reply {
            request_id,
            payload: value,
        },
        None => Inbound::Event(value),
    })
}

/// Fronts one external MSC endpoint: forwards sub-commands to its remote
/// address and classifies traffic arriving on its lane of the MSC queue.
///
/// Replies are deferred: nothing is reported to the dispatcher when a
/// sub-command goes out, only when the endpoint actually answers. Silent
/// endpoints surface as timeout elements in the final response.
pub struct MscWorker {
    settings: MscEndpointConfig,
    msc_queue: Arc<PacketQueue>,
    dispatcher: mpsc::UnboundedSender<DispatcherInput>,
    broadcaster: mpsc::UnboundedSender<Event>,
    send_socket: Arc<SendSocket>,
}

impl MscWorker {
    pub fn new(
        settings: MscEndpointConfig,
        msc_queue: Arc<PacketQueue>,
        dispatcher: mpsc::UnboundedSender<DispatcherInput>,
        broadcaster: mpsc::UnboundedSender<Event>,
        send_socket: Arc<SendSocket>,
    ) -> MscWorker {
        MscWorker {
            settings,
            msc_queue,
            dispatcher,
            broadcaster,
            send_socket,
        }
    }

    pub async fn run(self, mut inputs: mpsc::UnboundedReceiver<MscInput>) {
        let mut drain_ticks = time::interval(WORKER_TICK_INTERVAL);
        loop {
            select! {
                input = inputs.recv() => {
                    match input {
                        Some(MscInput::SubCommand(sub)) => self.forward_sub_command(sub).await,
                        Some(MscInput::Drain) => self.drain_incoming().await,
                        None => break,
                    }
                }
                _ = drain_ticks.tick() => self.drain_incoming().await,
            }
        }
    }

    /// The sub-command carries the client's JSON unchanged; the endpoint
    /// sees exactly what the client sent.
    pub async fn forward_sub_command(&self, sub: SubCommand) {
        debug!(
            agent_id = %self.settings.id,
            request_id = %sub.request_id,
            "forwarding sub-command to external endpoint"
        );
        self.send_socket
            .send_json(self.settings.remote_addr, &sub.cmd)
            .await;
    }

    /// Consumes this worker's lane of the MSC queue until it is empty.
    pub async fn drain_incoming(&self) {
        while let Some(pkt) = self.msc_queue.pop_for_agent(&self.settings.id) {
            match classify_inbound(&pkt.payload) {
                Err(e) => {
                    warn!(
                        agent_id = %self.settings.id,
                        sender = %pkt.sender,
                        "dropping unparseable packet: {}", e
                    );
                }
                Ok(Inbound::Reply {
                    request_id,
                    payload,
                }) => {
                    debug!(agent_id = %self.settings.id, %request_id, "sync reply forwarded");
                    let _ = self.dispatcher.send(DispatcherInput::Reply(AgentReply {
                        response: payload,
                        request_id,
                        agent_id: self.settings.id.clone(),
                        success: true,
                    }));
                }
                Ok(Inbound::Event(event_data)) => {
                    debug!(agent_id = %self.settings.id, "async event forwarded");
                    let _ = self.broadcaster.send(Event { event_data });
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use serde_json::json;

    use crate::net::packet::Origin;
    use crate::test_util::{packet_from, test_config, CapturingSendSocket};

    use super::*;

    #[rstest]
    #[case::reply(br#"{"request_id":"req_7","ok":true}"#, Inbound::Reply {
        request_id: "req_7".to_string(),
        payload: json!({"request_id": "req_7", "ok": true}),
    })]
    #[case::event(br#"{"event":"alarm","code":7}"#, Inbound::Event(json!({"event": "alarm", "code": 7})))]
    #[case::request_id_not_a_string(br#"{"request_id":12}"#, Inbound::Event(json!({"request_id": 12})))]
    #[case::not_an_object(b"[1,2]", Inbound::Event(json!([1, 2])))]
    fn test_classify_inbound(#[case] payload: &[u8], #[case] expected: Inbound) {
        assert_eq!(classify_inbound(payload).unwrap(), expected);
    }

    #[rstest]
    #[case::garbage(b"not json")]
    #[case::truncated(br#"{"request_id": "#)]
    fn test_classify_inbound_rejects(#[case] payload: &[u8]) {
        assert!(classify_inbound(payload).is_err());
    }

    fn worker() -> (
        MscWorker,
        Arc<PacketQueue>,
        mpsc::UnboundedReceiver<DispatcherInput>,
        mpsc::UnboundedReceiver<Event>,
        Arc<CapturingSendSocket>,
    ) {
        let config = test_config(&["1", "2"]);
        let msc_queue = Arc::new(PacketQueue::new(10));
        let (dispatcher_tx, dispatcher_rx) = mpsc::unbounded_channel();
        let (broadcaster_tx, broadcaster_rx) = mpsc::unbounded_channel();
        let sent = CapturingSendSocket::new();
        let worker = MscWorker::new(
            config.msc_endpoints[0].clone(),
            msc_queue.clone(),
            dispatcher_tx,
            broadcaster_tx,
            Arc::new(SendSocket::new(sent.clone())),
        );
        (worker, msc_queue, dispatcher_rx, broadcaster_rx, sent)
    }

    #[tokio::test]
    async fn test_sub_command_is_forwarded_without_local_ack() {
        let (worker, _, mut dispatcher_rx, _, sent) = worker();

        worker
            .forward_sub_command(SubCommand {
                cmd: json!({"command": "ping", "target": "1"}),
                request_id: "req_1".to_string(),
                target_id: "1".to_string(),
            })
            .await;

        let datagrams = sent.sent_json();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].0, worker.settings.remote_addr);
        assert_eq!(datagrams[0].1, json!({"command": "ping", "target": "1"}));

        // no optimistic reply: the dispatcher hears nothing until the
        // endpoint answers
        assert!(dispatcher_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drain_classifies_replies_and_events() {
        let (worker, msc_queue, mut dispatcher_rx, mut broadcaster_rx, _) = worker();
        let peer = "127.0.0.1:7777".parse().unwrap();

        msc_queue.push(packet_from(
            br#"{"request_id":"req_3","status":"done"}"#,
            Origin::Msc("1".to_string()),
            peer,
        ));
        msc_queue.push(packet_from(br#"{"event":"alarm","code":7}"#, Origin::Msc("1".to_string()), peer));
        msc_queue.push(packet_from(b"garbage", Origin::Msc("1".to_string()), peer));
        // another agent's lane must stay untouched
        msc_queue.push(packet_from(br#"{"event":"other"}"#, Origin::Msc("2".to_string()), peer));

        worker.drain_incoming().await;

        let DispatcherInput::Reply(reply) = dispatcher_rx.try_recv().unwrap() else {
            panic!("expected a reply");
        };
        assert_eq!(reply.request_id, "req_3");
        assert_eq!(reply.agent_id, "1");
        assert!(reply.success);
        assert_eq!(reply.response["status"], "done");
        assert!(dispatcher_rx.try_recv().is_err());

        assert_eq!(broadcaster_rx.try_recv().unwrap().event_data, json!({"event": "alarm", "code": 7}));
        assert!(broadcaster_rx.try_recv().is_err());

        assert_eq!(msc_queue.len(), 1);
        assert_eq!(msc_queue.pop_for_agent("2").unwrap().payload, br#"{"event":"other"}"#);
    }
}
