//! Per-endpoint queues of calls waiting for a connection.

use std::collections::{hash_map::Entry, HashMap, VecDeque};

use crate::{
    call::{CallerContext, RemoteCall},
    topology::Endpoint,
};

/// A call that arrived before its endpoint had a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSend {
    /// Who to answer.
    pub caller: CallerContext,
    /// What to send once connected.
    pub call: RemoteCall,
}

/// FIFO queues of [`PendingSend`] entries, keyed by endpoint.
///
/// A queue exists only while its endpoint is waiting for a connection. Every entry is consumed
/// exactly once: sent when the connection comes up, or failed when the connect attempt fails.
#[derive(Clone, Debug, Default)]
pub struct PendingQueues {
    queues: HashMap<Endpoint, VecDeque<PendingSend>>,
}

impl PendingQueues {
    /// Creates an empty set of queues.
    pub fn new() -> Self {
        PendingQueues::default()
    }

    /// Appends an entry to the endpoint's queue, creating the queue if absent.
    ///
    /// Returns `true` if the queue was freshly created. The caller must then issue exactly one
    /// connect command for the endpoint; later enqueues return `false` and must not.
    pub fn enqueue(&mut self, endpoint: &Endpoint, entry: PendingSend) -> bool {
        match self.queues.entry(endpoint.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(entry);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([entry]));
                true
            }
        }
    }

    /// Removes the endpoint's queue, returning its entries in arrival order.
    pub fn drain_all(&mut self, endpoint: &Endpoint) -> Vec<PendingSend> {
        self.queues
            .remove(endpoint)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// The number of entries queued for an endpoint.
    pub fn len(&self, endpoint: &Endpoint) -> usize {
        self.queues.get(endpoint).map_or(0, VecDeque::len)
    }

    /// Returns `true` if the endpoint has a queue.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.queues.contains_key(endpoint)
    }

    /// Returns `true` if no endpoint is waiting for a connection.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Iterates over every waiting endpoint and its queued entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &VecDeque<PendingSend>)> {
        self.queues.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(session: u64) -> PendingSend {
        PendingSend {
            caller: CallerContext::new(1, session),
            call: RemoteCall::new("db", "get", vec![session as u8]),
        }
    }

    #[test]
    fn only_first_enqueue_requests_connect() {
        let mut queues = PendingQueues::new();
        let endpoint = Endpoint::new("10.0.0.5", 9000);

        assert!(queues.enqueue(&endpoint, entry(1)));
        assert!(!queues.enqueue(&endpoint, entry(2)));
        assert!(!queues.enqueue(&endpoint, entry(3)));
        assert_eq!(queues.len(&endpoint), 3);
    }

    #[test]
    fn drain_returns_fifo_order_and_removes_queue() {
        let mut queues = PendingQueues::new();
        let endpoint = Endpoint::new("10.0.0.5", 9000);
        for session in 1..=3 {
            queues.enqueue(&endpoint, entry(session));
        }

        let drained: Vec<_> = queues
            .drain_all(&endpoint)
            .into_iter()
            .map(|entry| entry.caller.session)
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(!queues.contains(&endpoint));
        assert!(queues.is_empty());

        // The endpoint is waiting afresh, so the next enqueue must connect again.
        assert!(queues.enqueue(&endpoint, entry(4)));
    }

    #[test]
    fn drain_unknown_endpoint_is_empty() {
        let mut queues = PendingQueues::new();
        assert!(queues.drain_all(&Endpoint::new("nowhere", 1)).is_empty());
    }

    #[test]
    fn queues_are_independent_per_endpoint() {
        let mut queues = PendingQueues::new();
        let db = Endpoint::new("10.0.0.5", 9000);
        let cache = Endpoint::new("10.0.0.6", 6379);

        assert!(queues.enqueue(&db, entry(1)));
        assert!(queues.enqueue(&cache, entry(2)));
        assert_eq!(queues.drain_all(&db).len(), 1);
        assert_eq!(queues.len(&cache), 1);
    }
}
