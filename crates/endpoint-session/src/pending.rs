use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::connection::ConnectionRegistry;
use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::metrics;
use crate::resolver::EndpointResolver;

/// Per-endpoint FIFO of messages that could not be written immediately.
///
/// A message leaves its queue only after it was handed to an open connection,
/// so a drain interrupted by a close resumes exactly where it stopped.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queues: HashMap<EndpointId, VecDeque<String>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, endpoint: &EndpointId, message: String) {
        self.queues
            .entry(endpoint.clone())
            .or_default()
            .push_back(message);
    }

    /// Puts `messages` back at the head of `endpoint`'s queue, keeping their
    /// order.
    pub fn requeue_front(&mut self, endpoint: &EndpointId, messages: Vec<String>) {
        let queue = self.queues.entry(endpoint.clone()).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
    }

    /// Drains the queue of the endpoint owning `url` for as long as the
    /// connection stays open. Returns how many messages were delivered.
    pub fn resend(
        &mut self,
        url: &ConnectionUrl,
        resolver: &EndpointResolver,
        registry: &mut ConnectionRegistry,
    ) -> usize {
        let endpoint = match resolver.resolve(url) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                debug!(target = "session.pending", error = %err, "nothing to resend");
                return 0;
            }
        };
        let Some(queue) = self.queues.get_mut(&endpoint) else {
            return 0;
        };

        let mut delivered = 0;
        while let Some(message) = queue.front() {
            if !registry.is_connection_open(url) {
                debug!(
                    target = "session.pending",
                    endpoint = %endpoint,
                    remaining = queue.len(),
                    "connection closed mid-drain"
                );
                break;
            }
            if let Err(err) = registry.send_message(url, message) {
                warn!(
                    target = "session.pending",
                    endpoint = %endpoint,
                    error = %err,
                    "resend failed; keeping message queued"
                );
                break;
            }
            queue.pop_front();
            delivered += 1;
        }

        if delivered > 0 {
            metrics::MESSAGES_DRAINED.inc_by(delivered as u64);
            debug!(
                target = "session.pending",
                endpoint = %endpoint,
                delivered,
                remaining = queue.len(),
                "drained pending messages"
            );
        }
        delivered
    }

    pub fn len(&self, endpoint: &EndpointId) -> usize {
        self.queues.get(endpoint).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, endpoint: &EndpointId) -> bool {
        self.len(endpoint) == 0
    }

    /// Messages still waiting for `endpoint`, head first.
    pub fn messages(&self, endpoint: &EndpointId) -> Vec<String> {
        self.queues
            .get(endpoint)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointId> {
        self.queues.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockCall, MockTransport};

    struct Fixture {
        transport: MockTransport,
        resolver: EndpointResolver,
        registry: ConnectionRegistry,
        pending: PendingQueue,
        endpoint: EndpointId,
        url: ConnectionUrl,
    }

    fn fixture() -> Fixture {
        let transport = MockTransport::new();
        let mut resolver = EndpointResolver::new();
        let mut registry = ConnectionRegistry::new(Box::new(transport.factory()));
        let endpoint = EndpointId::from("agent");
        let url = ConnectionUrl::with_token("ws://agent.local/ws", "t1");
        resolver.set_mapping(endpoint.clone(), url.clone());
        registry.initialize_connection(&url);
        transport.clear_calls();
        Fixture {
            transport,
            resolver,
            registry,
            pending: PendingQueue::new(),
            endpoint,
            url,
        }
    }

    impl Fixture {
        fn enqueue(&mut self, messages: &[&str]) {
            for message in messages {
                self.pending.add(&self.endpoint, message.to_string());
            }
        }

        fn resend(&mut self) -> usize {
            self.pending
                .resend(&self.url, &self.resolver, &mut self.registry)
        }
    }

    #[test]
    fn drains_everything_in_order_while_open() {
        let mut fx = fixture();
        fx.enqueue(&["m1", "m2", "m3", "m4"]);
        fx.transport.set_open(&fx.url, true);

        assert_eq!(fx.resend(), 4);
        assert_eq!(fx.transport.sent(&fx.url), vec!["m1", "m2", "m3", "m4"]);
        assert!(fx.pending.is_empty(&fx.endpoint));
    }

    #[test]
    fn interrupted_drain_resumes_from_new_head() {
        let mut fx = fixture();
        fx.enqueue(&["1", "2", "3"]);
        fx.transport.script_open_checks(&fx.url, [true, true, false]);

        assert_eq!(fx.resend(), 2);
        assert_eq!(fx.transport.sent(&fx.url), vec!["1", "2"]);
        assert_eq!(fx.pending.messages(&fx.endpoint), vec!["3"]);

        fx.transport.script_open_checks(&fx.url, [true, true, true]);
        assert_eq!(fx.resend(), 1);
        assert_eq!(fx.transport.sent(&fx.url), vec!["1", "2", "3"]);
        assert!(fx.pending.is_empty(&fx.endpoint));
    }

    #[test]
    fn closed_connection_leaves_queue_untouched() {
        let mut fx = fixture();
        fx.enqueue(&["a", "b"]);

        assert_eq!(fx.resend(), 0);
        assert!(fx.transport.calls().is_empty());
        assert_eq!(fx.pending.messages(&fx.endpoint), vec!["a", "b"]);
    }

    #[test]
    fn failed_send_keeps_message_at_head() {
        let mut fx = fixture();
        fx.enqueue(&["a", "b"]);
        fx.transport.set_open(&fx.url, true);
        fx.transport.fail_sends(true);

        assert_eq!(fx.resend(), 0);
        assert_eq!(fx.pending.messages(&fx.endpoint), vec!["a", "b"]);

        fx.transport.fail_sends(false);
        assert_eq!(fx.resend(), 2);
        assert_eq!(
            fx.transport.calls(),
            vec![
                MockCall::Send(fx.url.clone(), "a".into()),
                MockCall::Send(fx.url.clone(), "b".into()),
            ]
        );
    }

    #[test]
    fn unmapped_url_is_a_no_op() {
        let mut fx = fixture();
        fx.enqueue(&["a"]);
        fx.transport.set_open(&fx.url, true);
        let stranger = ConnectionUrl::from("ws://elsewhere?token=x");

        assert_eq!(
            fx.pending
                .resend(&stranger, &fx.resolver, &mut fx.registry),
            0
        );
        assert_eq!(fx.pending.len(&fx.endpoint), 1);
    }

    #[test]
    fn queues_are_independent_per_endpoint() {
        let mut fx = fixture();
        let other = EndpointId::from("other");
        fx.pending.add(&other, "x".into());
        fx.enqueue(&["a"]);
        fx.transport.set_open(&fx.url, true);

        assert_eq!(fx.resend(), 1);
        assert_eq!(fx.pending.messages(&other), vec!["x"]);
        assert!(fx.pending.is_empty(&fx.endpoint));
    }

    #[test]
    fn requeued_messages_lead_in_original_order() {
        let mut fx = fixture();
        fx.enqueue(&["later"]);
        fx.pending
            .requeue_front(&fx.endpoint, vec!["one".into(), "two".into()]);

        assert_eq!(fx.pending.messages(&fx.endpoint), vec!["one", "two", "later"]);

        let fresh = EndpointId::from("fresh");
        fx.pending.requeue_front(&fresh, vec!["solo".into()]);
        assert_eq!(fx.pending.messages(&fresh), vec!["solo"]);
    }
}
