use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::metrics;
use crate::resolver::EndpointResolver;

/// Consumer of inbound frames. Decoding the raw text is entirely up to the
/// implementation.
pub trait MessageReceiver: Send {
    fn receive(&self, endpoint: &EndpointId, raw: &str);
}

/// Forwards frames onto a channel, for consumers living in another task.
impl MessageReceiver for mpsc::UnboundedSender<(EndpointId, String)> {
    fn receive(&self, endpoint: &EndpointId, raw: &str) {
        if self.send((endpoint.clone(), raw.to_string())).is_err() {
            debug!(target = "session.dispatch", endpoint = %endpoint, "receiver channel closed");
        }
    }
}

/// Routes a frame that arrived on a url to the endpoint owning that url.
pub struct Dispatcher {
    receiver: Box<dyn MessageReceiver>,
}

impl Dispatcher {
    pub fn new(receiver: Box<dyn MessageReceiver>) -> Self {
        Self { receiver }
    }

    /// Returns `false` when the url belongs to no endpoint; such frames are
    /// dropped.
    pub fn dispatch(&self, resolver: &EndpointResolver, url: &ConnectionUrl, raw: &str) -> bool {
        match resolver.resolve(url) {
            Ok(endpoint) => {
                self.receiver.receive(&endpoint, raw);
                metrics::FRAMES_DISPATCHED.inc();
                true
            }
            Err(err) => {
                debug!(target = "session.dispatch", error = %err, "dropping frame");
                metrics::FRAMES_DROPPED.inc();
                false
            }
        }
    }
}
