//! The session actor.
//!
//! Every store lives inside one task. Application calls arrive on the command
//! channel; transport events, reconnect requests and resolved tokens arrive on
//! the internal channel. Both are handled strictly one at a time, so the stores
//! never need a lock. Token acquisition runs in its own task and posts its
//! result back, which keeps other endpoints flowing while one waits for a token.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actions::ActionManager;
use crate::connection::ConnectionFactory;
use crate::dispatch::MessageReceiver;
use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::error::{InitializeError, SessionError, TokenError};
use crate::lifecycle;
use crate::metrics;
use crate::properties::ConnectionProperties;
use crate::session::Session;
use crate::sustainer::Sustainer;
use crate::token::TokenProvider;

/// Collaborators a session is assembled from.
pub struct SessionParts {
    pub factory: Box<dyn ConnectionFactory>,
    pub receiver: Box<dyn MessageReceiver>,
    pub sustainer: Box<dyn Sustainer>,
    pub actions: Box<dyn ActionManager>,
    pub tokens: Arc<dyn TokenProvider>,
}

type InitializeReply = oneshot::Sender<Result<ConnectionUrl, InitializeError>>;

enum Command {
    Transmit {
        endpoint: EndpointId,
        message: String,
    },
    Initialize {
        endpoint: EndpointId,
        base: String,
        reply: InitializeReply,
    },
    Terminate {
        endpoint: EndpointId,
        reply: oneshot::Sender<Option<ConnectionUrl>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened(ConnectionUrl),
    Closed(ConnectionUrl),
    Message(ConnectionUrl, String),
    /// Payloads a transport accepted but never wrote, oldest first.
    Unsent(ConnectionUrl, Vec<String>),
}

pub(crate) struct TokenResolution {
    endpoint: EndpointId,
    base: String,
    generation: u64,
    /// Url being replaced when this initialize is a reconnect.
    previous: Option<ConnectionUrl>,
    token: Result<String, TokenError>,
    reply: Option<InitializeReply>,
}

pub(crate) enum Internal {
    Transport(TransportEvent),
    Reconnect(ConnectionUrl),
    TokenResolved(TokenResolution),
}

/// Per-endpoint view returned by [`SessionHandle::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub endpoint: EndpointId,
    /// Serialized without its token.
    #[serde(serialize_with = "crate::endpoint::redacted::serialize_opt")]
    pub url: Option<ConnectionUrl>,
    pub open: bool,
    pub pending: usize,
    pub properties: Option<ConnectionProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub endpoints: Vec<EndpointStatus>,
}

impl SessionSnapshot {
    pub fn endpoint(&self, endpoint: &EndpointId) -> Option<&EndpointStatus> {
        self.endpoints.iter().find(|status| &status.endpoint == endpoint)
    }
}

/// Application-facing handle. Cheap to clone; the actor stops once every
/// handle is dropped or [`SessionHandle::shutdown`] is called.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Queues `message` for `endpoint`. Never blocks; delivery is sent-now or
    /// buffered, decided inside the actor.
    pub fn transmit(
        &self,
        endpoint: impl Into<EndpointId>,
        message: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.commands
            .send(Command::Transmit {
                endpoint: endpoint.into(),
                message: message.into(),
            })
            .map_err(|_| SessionError::Stopped)
    }

    /// Binds `endpoint` to a fresh token-bearing url derived from `base` and
    /// starts connecting. Resolves once the connection is being established.
    pub async fn initialize(
        &self,
        endpoint: impl Into<EndpointId>,
        base: impl Into<String>,
    ) -> Result<ConnectionUrl, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Initialize {
                endpoint: endpoint.into(),
                base: base.into(),
                reply,
            })
            .map_err(|_| SessionError::Stopped)?;
        let result = rx.await.map_err(|_| SessionError::Stopped)?;
        Ok(result?)
    }

    /// Tears `endpoint` down and returns the url it was bound to.
    pub async fn terminate(
        &self,
        endpoint: impl Into<EndpointId>,
    ) -> Result<Option<ConnectionUrl>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Terminate {
                endpoint: endpoint.into(),
                reply,
            })
            .map_err(|_| SessionError::Stopped)?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| SessionError::Stopped)?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    /// Terminates every endpoint and stops the actor.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| SessionError::Stopped)
    }
}

/// Entry points a transport calls when its connection changes state.
#[derive(Clone)]
pub struct TransportEvents {
    internal: mpsc::UnboundedSender<Internal>,
}

impl TransportEvents {
    pub fn opened(&self, url: &ConnectionUrl) {
        self.post(TransportEvent::Opened(url.clone()));
    }

    pub fn closed(&self, url: &ConnectionUrl) {
        self.post(TransportEvent::Closed(url.clone()));
    }

    pub fn message(&self, url: &ConnectionUrl, raw: String) {
        self.post(TransportEvent::Message(url.clone(), raw));
    }

    /// Hands back payloads that were accepted by `send` but never written.
    /// Must be posted before the matching `closed`.
    pub fn unsent(&self, url: &ConnectionUrl, payloads: Vec<String>) {
        self.post(TransportEvent::Unsent(url.clone(), payloads));
    }

    pub fn post(&self, event: TransportEvent) {
        if self.internal.send(Internal::Transport(event)).is_err() {
            debug!(target = "session.runtime", "transport event after session stopped");
        }
    }

    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal, rx) = mpsc::unbounded_channel();
        (Self { internal }, rx)
    }
}

/// Lets a sustainer ask the session to reconnect a url.
#[derive(Clone)]
pub struct Reconnector {
    internal: mpsc::UnboundedSender<Internal>,
}

impl Reconnector {
    pub fn reconnect(&self, url: ConnectionUrl) {
        if self.internal.send(Internal::Reconnect(url)).is_err() {
            debug!(target = "session.runtime", "reconnect after session stopped");
        }
    }

    /// Requests a reconnect once `delay` has elapsed. Must be called from
    /// within a tokio runtime.
    pub fn reconnect_after(&self, url: ConnectionUrl, delay: Duration) {
        if delay.is_zero() {
            self.reconnect(url);
            return;
        }
        let reconnector = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reconnector.reconnect(url);
        });
    }

    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal, rx) = mpsc::unbounded_channel();
        (Self { internal }, rx)
    }
}

/// Builds the session from the parts returned by `build` and spawns its actor.
///
/// `build` receives the [`TransportEvents`] handle so connection factories can
/// report back into the session they belong to.
pub fn spawn_session<F>(build: F) -> (SessionHandle, JoinHandle<()>)
where
    F: FnOnce(&TransportEvents) -> SessionParts,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let events = TransportEvents {
        internal: internal_tx.clone(),
    };
    let parts = build(&events);
    let reconnector = Reconnector {
        internal: internal_tx.clone(),
    };
    let session = Session::new(
        parts.factory,
        parts.receiver,
        parts.sustainer,
        parts.actions,
        reconnector,
    );
    let actor = SessionActor {
        session,
        tokens: parts.tokens,
        internal: internal_tx,
    };
    let task = tokio::spawn(actor.run(commands_rx, internal_rx));
    (
        SessionHandle {
            commands: commands_tx,
        },
        task,
    )
}

struct SessionActor {
    session: Session,
    tokens: Arc<dyn TokenProvider>,
    internal: mpsc::UnboundedSender<Internal>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(target = "session.runtime", "session actor started");
        loop {
            tokio::select! {
                biased;
                Some(event) = internal.recv() => self.handle_internal(event),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        self.session.terminate_all();
        info!(target = "session.runtime", "session actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Transmit { endpoint, message } => {
                let delivery = self.session.transmit(&endpoint, message);
                debug!(target = "session.runtime", endpoint = %endpoint, ?delivery, "transmit");
            }
            Command::Initialize {
                endpoint,
                base,
                reply,
            } => {
                if let Err(err) = lifecycle::validate_base(&base) {
                    metrics::INITIALIZE_RESULTS
                        .with_label_values(&["invalid_base"])
                        .inc();
                    let _ = reply.send(Err(err));
                    return;
                }
                self.start_initialize(endpoint, base, None, Some(reply));
            }
            Command::Terminate { endpoint, reply } => {
                let url = self.session.terminate(&endpoint);
                let _ = reply.send(url);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Transport(TransportEvent::Opened(url)) => self.session.on_open(&url),
            Internal::Transport(TransportEvent::Closed(url)) => self.session.on_close(&url),
            Internal::Transport(TransportEvent::Message(url, raw)) => {
                self.session.on_message(&url, &raw)
            }
            Internal::Transport(TransportEvent::Unsent(url, payloads)) => {
                self.session.on_unsent(&url, payloads)
            }
            Internal::Reconnect(url) => match self.session.reconnect_target(&url) {
                Some((endpoint, base)) => self.start_initialize(endpoint, base, Some(url), None),
                None => {
                    debug!(target = "session.runtime", url = %url.base(), "reconnect no longer wanted")
                }
            },
            Internal::TokenResolved(resolution) => self.finish_initialize(resolution),
        }
    }

    fn start_initialize(
        &mut self,
        endpoint: EndpointId,
        base: String,
        previous: Option<ConnectionUrl>,
        reply: Option<InitializeReply>,
    ) {
        let generation = self.session.begin_initialize(&endpoint);
        let tokens = Arc::clone(&self.tokens);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let token = tokens.acquire().await;
            let resolution = TokenResolution {
                endpoint,
                base,
                generation,
                previous,
                token,
                reply,
            };
            if internal.send(Internal::TokenResolved(resolution)).is_err() {
                debug!(target = "session.runtime", "token resolved after session stopped");
            }
        });
    }

    fn finish_initialize(&mut self, resolution: TokenResolution) {
        let TokenResolution {
            endpoint,
            base,
            generation,
            previous,
            token,
            reply,
        } = resolution;

        let result = match token {
            Ok(token) => self
                .session
                .complete_initialize(endpoint, &base, &token, generation),
            Err(_) if self.session.check_generation(&endpoint, generation).is_err() => {
                Err(InitializeError::Superseded(endpoint))
            }
            Err(err) => {
                warn!(
                    target = "session.runtime",
                    endpoint = %endpoint,
                    error = %err,
                    "token acquisition failed"
                );
                Err(InitializeError::Token(err))
            }
        };

        // A failed reconnect keeps backing off from the url it was replacing.
        if let (Some(previous), Err(InitializeError::Token(_) | InitializeError::UrlInUse { .. })) =
            (&previous, &result)
        {
            self.session.retry_later(previous);
        }

        let label = match &result {
            Ok(_) => "ok",
            Err(InitializeError::Token(_)) => "token_error",
            Err(InitializeError::Superseded(_)) => "superseded",
            Err(InitializeError::InvalidBaseUrl { .. }) => "invalid_base",
            Err(InitializeError::UrlInUse { .. }) => "url_in_use",
        };
        metrics::INITIALIZE_RESULTS.with_label_values(&[label]).inc();

        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(err) = result {
                    debug!(target = "session.runtime", error = %err, "reconnect did not complete");
                }
            }
        }
    }
}
