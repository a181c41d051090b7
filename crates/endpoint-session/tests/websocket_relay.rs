use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use endpoint_session::connection::WebSocketConnectionFactory;
use endpoint_session::{
    spawn_session, ActionRegistry, BackoffConfig, BackoffSustainer, EndpointId, HttpTokenProvider,
    SessionHandle, SessionParts, SessionSnapshot, StaticTokenProvider, TokenError, TokenProvider,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Clone, Default)]
struct ServerState {
    tokens_seen: Arc<Mutex<Vec<String>>>,
}

async fn ws_handler(
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(token) = query.get("token") {
        state.tokens_seen.lock().push(token.clone());
    }
    ws.on_upgrade(echo)
}

/// Echoes text frames with an `echo:` prefix; `drop` closes the socket.
async fn echo(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) if text == "drop" => {
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
            WsMessage::Text(text) => {
                if socket
                    .send(WsMessage::Text(format!("echo:{text}")))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            WsMessage::Close(_) => return,
            _ => {}
        }
    }
}

async fn token_handler(headers: HeaderMap) -> impl IntoResponse {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer secret") => (StatusCode::OK, Json(json!({ "token": "minted" }))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))),
    }
}

async fn serve(state: ServerState) -> (SocketAddr, oneshot::Sender<()>) {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/token", get(token_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    (addr, shutdown_tx)
}

fn init_logging() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn start(tokens: Arc<dyn TokenProvider>) -> (SessionHandle, mpsc::UnboundedReceiver<(EndpointId, String)>) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (session, _task) = spawn_session(|events| SessionParts {
        factory: Box::new(
            WebSocketConnectionFactory::new(events.clone())
                .with_connect_timeout(Some(Duration::from_secs(2))),
        ),
        receiver: Box::new(inbound_tx),
        sustainer: Box::new(BackoffSustainer::new(BackoffConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            max_attempts: 0,
        })),
        actions: Box::new(ActionRegistry::new()),
        tokens,
    });
    (session, inbound_rx)
}

async fn next_frame(inbound: &mut mpsc::UnboundedReceiver<(EndpointId, String)>) -> (EndpointId, String) {
    timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("frame before timeout")
        .expect("receiver open")
}

async fn wait_until_open_with(session: &SessionHandle, token: &str) -> SessionSnapshot {
    let marker = format!("token={token}");
    timeout(Duration::from_secs(5), async {
        loop {
            let snap = session.snapshot().await.expect("session running");
            let ready = snap
                .endpoint(&EndpointId::from("agent"))
                .is_some_and(|status| {
                    status.open
                        && status
                            .url
                            .as_ref()
                            .is_some_and(|url| url.as_str().ends_with(&marker))
                });
            if ready {
                return snap;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("endpoint open before timeout")
}

#[tokio::test]
async fn relays_through_websocket_and_survives_server_close() {
    init_logging();
    let state = ServerState::default();
    let (addr, shutdown) = serve(state.clone()).await;
    let tokens = Arc::new(StaticTokenProvider::new(["alpha", "beta"]));
    let (session, mut inbound) = start(tokens.clone());
    let agent = EndpointId::from("agent");

    session.transmit("agent", "early").unwrap();
    let url = session
        .initialize("agent", format!("ws://{addr}/ws"))
        .await
        .unwrap();
    assert_eq!(url.base(), format!("ws://{addr}/ws"));

    assert_eq!(next_frame(&mut inbound).await, (agent.clone(), "echo:early".into()));
    session.transmit("agent", "hello").unwrap();
    assert_eq!(next_frame(&mut inbound).await, (agent.clone(), "echo:hello".into()));

    session.transmit("agent", "drop").unwrap();
    wait_until_open_with(&session, "beta").await;
    assert_eq!(*state.tokens_seen.lock(), vec!["alpha", "beta"]);
    assert_eq!(tokens.issued(), 2);

    session.transmit("agent", "again").unwrap();
    assert_eq!(next_frame(&mut inbound).await, (agent.clone(), "echo:again".into()));

    assert!(session.terminate("agent").await.unwrap().is_some());
    shutdown.send(()).ok();
}

#[tokio::test]
async fn unreachable_server_keeps_messages_buffered() {
    init_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (session, _inbound) = start(Arc::new(StaticTokenProvider::single("t")));

    session
        .initialize("agent", format!("ws://{addr}/ws"))
        .await
        .unwrap();
    session.transmit("agent", "queued").unwrap();
    sleep(Duration::from_millis(100)).await;

    let snap = session.snapshot().await.unwrap();
    let status = snap.endpoint(&EndpointId::from("agent")).unwrap();
    assert!(!status.open);
    assert_eq!(status.pending, 1);
    session.terminate("agent").await.unwrap();
}

#[tokio::test]
async fn http_token_provider_fetches_with_bearer() {
    let (addr, shutdown) = serve(ServerState::default()).await;
    let url = format!("http://{addr}/token");

    let provider = HttpTokenProvider::new(url.clone()).with_bearer("secret");
    assert_eq!(provider.acquire().await.unwrap(), "minted");

    let anonymous = HttpTokenProvider::new(url);
    match anonymous.acquire().await {
        Err(TokenError::UnexpectedStatus { status, .. }) => {
            assert_eq!(status.as_u16(), 401)
        }
        other => panic!("expected 401, got {other:?}"),
    }
    shutdown.send(()).ok();
}
