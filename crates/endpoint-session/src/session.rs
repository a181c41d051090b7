use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::actions::ActionManager;
use crate::connection::{ConnectionFactory, ConnectionRegistry};
use crate::dispatch::{Dispatcher, MessageReceiver};
use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::pending::PendingQueue;
use crate::properties::PropertyStore;
use crate::resolver::EndpointResolver;
use crate::runtime::{EndpointStatus, Reconnector, SessionSnapshot};
use crate::sustainer::Sustainer;
use crate::transmit::{Delivery, Transmitter};

/// Composition root: owns the four stores plus the collaborators that act on
/// them. Runs inside the session actor; every method is synchronous.
///
/// Initialize and terminate live in [`crate::lifecycle`].
pub struct Session {
    pub(crate) resolver: EndpointResolver,
    pub(crate) properties: PropertyStore,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) pending: PendingQueue,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) sustainer: Box<dyn Sustainer>,
    pub(crate) actions: Box<dyn ActionManager>,
    pub(crate) reconnector: Reconnector,
    /// Base url each endpoint was last initialized with.
    pub(crate) bases: HashMap<EndpointId, String>,
    pub(crate) generations: HashMap<EndpointId, u64>,
}

impl Session {
    pub fn new(
        factory: Box<dyn ConnectionFactory>,
        receiver: Box<dyn MessageReceiver>,
        sustainer: Box<dyn Sustainer>,
        actions: Box<dyn ActionManager>,
        reconnector: Reconnector,
    ) -> Self {
        Self {
            resolver: EndpointResolver::new(),
            properties: PropertyStore::new(),
            registry: ConnectionRegistry::new(factory),
            pending: PendingQueue::new(),
            dispatcher: Dispatcher::new(receiver),
            sustainer,
            actions,
            reconnector,
            bases: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    pub fn transmit(&mut self, endpoint: &EndpointId, message: String) -> Delivery {
        Transmitter::new(&self.resolver, &mut self.registry, &mut self.pending)
            .transmit(endpoint, message)
    }

    /// Connection for `url` reports open: reset backoff, drain the backlog,
    /// then run the open callbacks.
    pub fn on_open(&mut self, url: &ConnectionUrl) {
        info!(target = "session.lifecycle", url = %url.base(), "connection opened");
        self.sustainer.reset(url, &mut self.properties);
        self.pending
            .resend(url, &self.resolver, &mut self.registry);
        for action in self.actions.on_open_actions(url) {
            action(url);
        }
    }

    /// Connection for `url` reports closed: run the close callbacks, then let
    /// the sustainer decide whether to reconnect.
    pub fn on_close(&mut self, url: &ConnectionUrl) {
        info!(target = "session.lifecycle", url = %url.base(), "connection closed");
        for action in self.actions.on_close_actions(url) {
            action(url);
        }
        self.sustainer
            .sustain(url, &mut self.properties, &self.reconnector);
    }

    pub fn on_message(&mut self, url: &ConnectionUrl, raw: &str) {
        self.dispatcher.dispatch(&self.resolver, url, raw);
    }

    /// Puts payloads the transport for `url` never wrote back at the head of
    /// the owning endpoint's queue, ahead of anything buffered since.
    pub fn on_unsent(&mut self, url: &ConnectionUrl, payloads: Vec<String>) {
        if payloads.is_empty() {
            return;
        }
        match self.resolver.resolve(url) {
            Ok(endpoint) => {
                debug!(
                    target = "session.lifecycle",
                    endpoint = %endpoint,
                    count = payloads.len(),
                    "re-queueing unsent messages"
                );
                self.pending.requeue_front(&endpoint, payloads);
            }
            Err(_) => warn!(
                target = "session.lifecycle",
                url = %url.base(),
                count = payloads.len(),
                "dropping unsent messages for an unmapped url"
            ),
        }
    }

    /// Runs the sustainer again for `url` after a reconnect could not obtain a
    /// token, so the endpoint keeps retrying instead of going quiet.
    pub fn retry_later(&mut self, url: &ConnectionUrl) {
        debug!(target = "session.lifecycle", url = %url.base(), "retrying reconnect later");
        self.sustainer
            .sustain(url, &mut self.properties, &self.reconnector);
    }

    /// Status of every endpoint that is mapped, remembered or has buffered
    /// messages, ordered by endpoint id.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut ids: BTreeSet<&EndpointId> = self.resolver.endpoints().map(|(id, _)| id).collect();
        ids.extend(self.bases.keys());
        ids.extend(self.pending.endpoints());

        let endpoints = ids
            .into_iter()
            .map(|endpoint| {
                let url = self.resolver.get_url(endpoint).ok();
                let open = url
                    .as_ref()
                    .map(|url| self.registry.is_connection_open(url))
                    .unwrap_or(false);
                let properties = url
                    .as_ref()
                    .and_then(|url| self.properties.get(url).ok().cloned());
                EndpointStatus {
                    endpoint: endpoint.clone(),
                    url,
                    open,
                    pending: self.pending.len(endpoint),
                    properties,
                }
            })
            .collect();
        SessionSnapshot { endpoints }
    }

    /// Terminates every mapped endpoint.
    pub fn terminate_all(&mut self) {
        let endpoints: Vec<EndpointId> = self
            .resolver
            .endpoints()
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        for endpoint in endpoints {
            self.terminate(&endpoint);
        }
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }
}
