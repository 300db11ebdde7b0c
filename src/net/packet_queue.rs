use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::net::packet::{Origin, Packet};

/// Bounded, timestamp-ordered queue of inbound packets, shared between the
/// reactor thread (push side) and the worker tasks (pop side).
///
/// Packets are kept in one FIFO lane per origin. Since the reactor is the
/// only producer and stamps packets at creation, each lane is sorted by
/// arrival time by construction, and the globally earliest packet is always
/// at the front of one of the lanes.
///
/// When the queue is full, pushing evicts the oldest element first so the
/// freshest packets survive. Push never blocks and never fails.
pub struct PacketQueue {
    inner: Mutex<Lanes>,
    not_empty: Condvar,
    max_size: usize,
}

struct Lanes {
    by_origin: FxHashMap<Origin, VecDeque<Packet>>,
    size: usize,
}

impl Lanes {
    /// front-of-lane element with the earliest arrival timestamp
    fn take_oldest(&mut self) -> Option<Packet> {
        let origin = self
            .by_origin
            .iter()
            .filter_map(|(origin, lane)| lane.front().map(|pkt| (origin, pkt.received_at)))
            .min_by_key(|&(_, received_at)| received_at)
            .map(|(origin, _)| origin.clone())?;

        self.take_front(&origin)
    }

    fn take_front(&mut self, origin: &Origin) -> Option<Packet> {
        let pkt = self.by_origin.get_mut(origin)?.pop_front()?;
        self.size -= 1;
        Some(pkt)
    }
}

impl PacketQueue {
    pub fn new(max_size: usize) -> PacketQueue {
        PacketQueue {
            inner: Mutex::new(Lanes {
                by_origin: Default::default(),
                size: 0,
            }),
            not_empty: Condvar::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, pkt: Packet) {
        {
            let mut inner = self.inner.lock();
            if inner.size >= self.max_size {
                if let Some(evicted) = inner.take_oldest() {
                    warn!(evicted_origin = %evicted.origin, "packet queue full, dropped oldest packet");
                }
            }

            inner
                .by_origin
                .entry(pkt.origin.clone())
                .or_default()
                .push_back(pkt);
            inner.size += 1;
        }
        self.not_empty.notify_one();
    }

    /// Pop the packet with the earliest arrival timestamp, waiting up to
    /// `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(pkt) = inner.take_oldest() {
                return Some(pkt);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.not_empty.wait_for(&mut inner, deadline - now);
        }
    }

    /// Non-blocking variant of [PacketQueue::pop], for cooperative callers
    /// that poll on a tick instead of parking a thread.
    pub fn try_pop(&self) -> Option<Packet> {
        self.inner.lock().take_oldest()
    }

    /// Non-blocking; earliest packet that arrived on the MSC port of
    /// `agent_id`, preserving per-agent arrival order.
    pub fn pop_for_agent(&self, agent_id: &str) -> Option<Packet> {
        self.inner
            .lock()
            .take_front(&Origin::Msc(agent_id.to_owned()))
    }
}
