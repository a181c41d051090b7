use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::ConnectionRegistry;
use crate::endpoint::EndpointId;
use crate::metrics;
use crate::pending::PendingQueue;
use crate::resolver::EndpointResolver;

/// Outcome of a transmit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Written to an open connection.
    Sent,
    /// Queued until the endpoint's connection reopens.
    Buffered,
}

/// Send path used by application code. Never fails: a closed or missing
/// connection degrades to buffering.
pub struct Transmitter<'a> {
    resolver: &'a EndpointResolver,
    registry: &'a mut ConnectionRegistry,
    pending: &'a mut PendingQueue,
}

impl<'a> Transmitter<'a> {
    pub fn new(
        resolver: &'a EndpointResolver,
        registry: &'a mut ConnectionRegistry,
        pending: &'a mut PendingQueue,
    ) -> Self {
        Self {
            resolver,
            registry,
            pending,
        }
    }

    pub fn transmit(&mut self, endpoint: &EndpointId, message: String) -> Delivery {
        let url = match self.resolver.get_url(endpoint) {
            Ok(url) => url,
            Err(_) => {
                debug!(target = "session.transmit", endpoint = %endpoint, "endpoint not mapped yet");
                return self.buffer(endpoint, message);
            }
        };

        if self.registry.is_connection_open(&url) {
            // Older buffered messages go first.
            if !self.pending.is_empty(endpoint) {
                self.pending.resend(&url, self.resolver, self.registry);
                if !self.pending.is_empty(endpoint) {
                    return self.buffer(endpoint, message);
                }
            }
            match self.registry.send_message(&url, &message) {
                Ok(()) => {
                    metrics::MESSAGES_SENT.inc();
                    return Delivery::Sent;
                }
                Err(err) => {
                    warn!(
                        target = "session.transmit",
                        endpoint = %endpoint,
                        error = %err,
                        "send on open connection failed"
                    );
                }
            }
        }
        self.buffer(endpoint, message)
    }

    fn buffer(&mut self, endpoint: &EndpointId, message: String) -> Delivery {
        self.pending.add(endpoint, message);
        metrics::MESSAGES_BUFFERED.inc();
        Delivery::Buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockCall, MockTransport};
    use crate::endpoint::ConnectionUrl;

    fn setup() -> (MockTransport, EndpointResolver, ConnectionRegistry, ConnectionUrl) {
        let transport = MockTransport::new();
        let mut resolver = EndpointResolver::new();
        let mut registry = ConnectionRegistry::new(Box::new(transport.factory()));
        let url = ConnectionUrl::with_token("ws://agent.local/ws", "t1");
        resolver.set_mapping(EndpointId::from("agent"), url.clone());
        registry.initialize_connection(&url);
        transport.clear_calls();
        (transport, resolver, registry, url)
    }

    #[test]
    fn open_connection_sends_without_buffering() {
        let (transport, resolver, mut registry, url) = setup();
        let mut pending = PendingQueue::new();
        transport.set_open(&url, true);
        let agent = EndpointId::from("agent");

        let delivery =
            Transmitter::new(&resolver, &mut registry, &mut pending).transmit(&agent, "hi".into());

        assert_eq!(delivery, Delivery::Sent);
        assert_eq!(transport.calls(), vec![MockCall::Send(url, "hi".into())]);
        assert!(pending.is_empty(&agent));
    }

    #[test]
    fn closed_connection_buffers_without_sending() {
        let (transport, resolver, mut registry, _url) = setup();
        let mut pending = PendingQueue::new();
        let agent = EndpointId::from("agent");

        let delivery =
            Transmitter::new(&resolver, &mut registry, &mut pending).transmit(&agent, "hi".into());

        assert_eq!(delivery, Delivery::Buffered);
        assert!(transport.sent_all().is_empty());
        assert_eq!(pending.messages(&agent), vec!["hi"]);
    }

    #[test]
    fn unmapped_endpoint_buffers() {
        let (transport, resolver, mut registry, url) = setup();
        let mut pending = PendingQueue::new();
        transport.set_open(&url, true);
        let ghost = EndpointId::from("ghost");

        let delivery =
            Transmitter::new(&resolver, &mut registry, &mut pending).transmit(&ghost, "boo".into());

        assert_eq!(delivery, Delivery::Buffered);
        assert_eq!(pending.messages(&ghost), vec!["boo"]);
        assert!(transport.sent_all().is_empty());
    }

    #[test]
    fn failed_send_falls_back_to_buffer() {
        let (transport, resolver, mut registry, url) = setup();
        let mut pending = PendingQueue::new();
        transport.set_open(&url, true);
        transport.fail_sends(true);
        let agent = EndpointId::from("agent");

        let delivery =
            Transmitter::new(&resolver, &mut registry, &mut pending).transmit(&agent, "hi".into());

        assert_eq!(delivery, Delivery::Buffered);
        assert_eq!(pending.messages(&agent), vec!["hi"]);
    }

    #[test]
    fn buffered_backlog_is_flushed_before_new_message() {
        let (transport, resolver, mut registry, url) = setup();
        let mut pending = PendingQueue::new();
        let agent = EndpointId::from("agent");
        pending.add(&agent, "old-1".into());
        pending.add(&agent, "old-2".into());
        transport.set_open(&url, true);

        let delivery =
            Transmitter::new(&resolver, &mut registry, &mut pending).transmit(&agent, "new".into());

        assert_eq!(delivery, Delivery::Sent);
        assert_eq!(transport.sent(&url), vec!["old-1", "old-2", "new"]);
    }
}
