use std::collections::HashMap;

use tracing::debug;

use crate::endpoint::ConnectionUrl;
use crate::error::ConnectionError;

pub mod mock;
pub mod websocket;

pub use websocket::{WebSocketConnection, WebSocketConnectionFactory};

/// One physical duplex text connection.
///
/// Implementations report opens, closes and inbound frames out of band
/// through [`crate::TransportEvents`]; the methods here only drive the
/// outbound side.
pub trait Connection: Send {
    fn open(&mut self);
    fn close(&mut self);
    fn send(&mut self, payload: &str) -> Result<(), ConnectionError>;
    fn is_open(&self) -> bool;
}

/// Builds the transport object for a freshly minted url.
pub trait ConnectionFactory: Send {
    fn create(&self, url: &ConnectionUrl) -> Box<dyn Connection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&ConnectionUrl) -> Box<dyn Connection> + Send,
{
    fn create(&self, url: &ConnectionUrl) -> Box<dyn Connection> {
        (self)(url)
    }
}

/// Owns at most one [`Connection`] per url.
pub struct ConnectionRegistry {
    factory: Box<dyn ConnectionFactory>,
    connections: HashMap<ConnectionUrl, Box<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Box<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            connections: HashMap::new(),
        }
    }

    /// Creates the connection object for `url`. A previous object for the same
    /// url is closed and replaced.
    pub fn initialize_connection(&mut self, url: &ConnectionUrl) {
        let connection = self.factory.create(url);
        if let Some(mut previous) = self.connections.insert(url.clone(), connection) {
            debug!(target = "session.registry", url = %url.base(), "replacing connection object");
            previous.close();
        }
    }

    pub fn establish_connection(&mut self, url: &ConnectionUrl) -> Result<(), ConnectionError> {
        self.get_mut(url)?.open();
        Ok(())
    }

    pub fn close_connection(&mut self, url: &ConnectionUrl) -> Result<(), ConnectionError> {
        self.get_mut(url)?.close();
        Ok(())
    }

    /// Forwards `payload` to the connection for `url`. The url must have been
    /// initialized first.
    pub fn send_message(&mut self, url: &ConnectionUrl, payload: &str) -> Result<(), ConnectionError> {
        self.get_mut(url)?.send(payload)
    }

    pub fn is_connection_open(&self, url: &ConnectionUrl) -> bool {
        self.connections
            .get(url)
            .map(|connection| connection.is_open())
            .unwrap_or(false)
    }

    /// Closes and forgets the connection for a retired url.
    pub fn remove(&mut self, url: &ConnectionUrl) -> bool {
        match self.connections.remove(url) {
            Some(mut connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, url: &ConnectionUrl) -> bool {
        self.connections.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn get_mut(&mut self, url: &ConnectionUrl) -> Result<&mut Box<dyn Connection>, ConnectionError> {
        self.connections
            .get_mut(url)
            .ok_or_else(|| ConnectionError::Unknown(url.clone()))
    }
}
