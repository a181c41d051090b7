//! WebSocket transport built on tokio-tungstenite.
//!
//! `open()` spawns one task per connection that dials, reports `opened`, pumps
//! text frames in both directions and reports `closed` exactly once when the
//! socket ends for any reason, including a failed or timed out dial. Text that
//! was accepted by `send` but not written (still queued, or the write that
//! failed) is reported through `unsent` right before `closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Connection, ConnectionFactory};
use crate::endpoint::ConnectionUrl;
use crate::error::ConnectionError;
use crate::runtime::TransportEvents;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
enum DialError {
    #[error("connect timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    closing: AtomicBool,
}

#[derive(Clone)]
pub struct WebSocketConnectionFactory {
    events: TransportEvents,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnectionFactory {
    pub fn new(events: TransportEvents) -> Self {
        Self {
            events,
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl ConnectionFactory for WebSocketConnectionFactory {
    fn create(&self, url: &ConnectionUrl) -> Box<dyn Connection> {
        Box::new(WebSocketConnection::new(
            url.clone(),
            self.events.clone(),
            self.connect_timeout,
        ))
    }
}

pub struct WebSocketConnection {
    url: ConnectionUrl,
    events: TransportEvents,
    connect_timeout: Option<Duration>,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl WebSocketConnection {
    pub fn new(
        url: ConnectionUrl,
        events: TransportEvents,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            url,
            events,
            connect_timeout,
            shared: Arc::new(Shared::default()),
            outbound: None,
        }
    }

    fn running(&self) -> bool {
        matches!(&self.outbound, Some(tx) if !tx.is_closed())
    }
}

impl Connection for WebSocketConnection {
    /// Must be called from within a tokio runtime.
    fn open(&mut self) {
        if self.running() {
            debug!(target = "session.websocket", url = %self.url.base(), "already running");
            return;
        }
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared = Arc::clone(&shared);
        self.outbound = Some(tx);
        tokio::spawn(run_socket(
            self.url.clone(),
            self.events.clone(),
            self.connect_timeout,
            shared,
            rx,
        ));
    }

    fn close(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.open.store(false, Ordering::SeqCst);
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Outbound::Close);
        }
    }

    fn send(&mut self, payload: &str) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::NotOpen);
        }
        let tx = self.outbound.as_ref().ok_or(ConnectionError::Closed)?;
        tx.send(Outbound::Text(payload.to_string()))
            .map_err(|_| ConnectionError::Closed)
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

async fn dial(url: &ConnectionUrl, timeout: Option<Duration>) -> Result<Socket, DialError> {
    let connect = connect_async(url.as_str());
    let (socket, _) = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| DialError::TimedOut(limit))??,
        None => connect.await?,
    };
    Ok(socket)
}

async fn run_socket(
    url: ConnectionUrl,
    events: TransportEvents,
    connect_timeout: Option<Duration>,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut socket = match dial(&url, connect_timeout).await {
        Ok(socket) => socket,
        Err(err) => {
            // Never log the full url, it carries the token.
            warn!(target = "session.websocket", url = %url.base(), error = %err, "connect failed");
            events.closed(&url);
            return;
        }
    };

    if shared.closing.load(Ordering::SeqCst) {
        let _ = socket.close(None).await;
        events.closed(&url);
        return;
    }

    shared.open.store(true, Ordering::SeqCst);
    info!(target = "session.websocket", url = %url.base(), "websocket connected");
    events.opened(&url);

    let (mut sink, mut stream) = socket.split();
    let mut unsent = Vec::new();
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text.clone())).await {
                        warn!(target = "session.websocket", url = %url.base(), error = %err, "write failed");
                        unsent.push(text);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => events.message(&url, text),
                Some(Ok(Message::Binary(bytes))) => {
                    warn!(
                        target = "session.websocket",
                        url = %url.base(),
                        len = bytes.len(),
                        "dropping binary frame"
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(target = "session.websocket", url = %url.base(), error = %err, "read failed");
                    break;
                }
            },
        }
    }

    shared.open.store(false, Ordering::SeqCst);
    outbound.close();
    unsent.extend(drain_unsent(&mut outbound));
    if !unsent.is_empty() {
        debug!(target = "session.websocket", url = %url.base(), count = unsent.len(), "returning unsent text");
        events.unsent(&url, unsent);
    }
    info!(target = "session.websocket", url = %url.base(), "websocket closed");
    events.closed(&url);
}

/// Text still sitting on the writer channel, oldest first.
fn drain_unsent(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
    let mut unsent = Vec::new();
    while let Ok(command) = outbound.try_recv() {
        if let Outbound::Text(text) = command {
            unsent.push(text);
        }
    }
    unsent
}
