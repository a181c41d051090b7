//! Resilient session layer for logical endpoints carried over text sockets.
//!
//! Each endpoint id is bound to exactly one physical connection URL at a time.
//! The URL embeds a one-time token, so it changes on every (re)connect while the
//! endpoint id stays stable. Outbound messages are delivered at least once and in
//! order per endpoint: anything that cannot be written immediately is buffered
//! and drained when the connection reopens. Inbound frames are routed back to the
//! endpoint that owns the URL they arrived on.
//!
//! All state lives inside one session actor (see [`runtime`]); callers talk to it
//! through [`SessionHandle`], transports through [`TransportEvents`] and
//! sustainers through [`Reconnector`].

pub mod actions;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pending;
pub mod properties;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod sustainer;
pub mod token;
pub mod transmit;

pub use actions::{Action, ActionManager, ActionRegistry};
pub use config::SessionConfig;
pub use connection::{Connection, ConnectionFactory, ConnectionRegistry};
pub use dispatch::{Dispatcher, MessageReceiver};
pub use endpoint::{ConnectionUrl, EndpointId, TOKEN_QUERY_PARAM};
pub use error::{
    ConnectionError, InitializeError, PropertyError, ResolveError, SessionError, TokenError,
};
pub use pending::PendingQueue;
pub use properties::{ConnectionProperties, PropertyStore};
pub use resolver::EndpointResolver;
pub use runtime::{
    spawn_session, EndpointStatus, Reconnector, SessionHandle, SessionParts, SessionSnapshot,
    TransportEvents,
};
pub use session::Session;
pub use sustainer::{BackoffConfig, BackoffSustainer, Sustainer};
pub use token::{HttpTokenProvider, StaticTokenProvider, TokenProvider};
pub use transmit::{Delivery, Transmitter};
