use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use endpoint_session::{
    connection::WebSocketConnectionFactory, metrics, spawn_session, ActionRegistry,
    BackoffSustainer, EndpointId, HttpTokenProvider, SessionConfig, SessionHandle, SessionParts,
    StaticTokenProvider, TokenProvider,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "session-relay",
    author,
    version,
    about = "Relay stdin lines to named websocket endpoints and print what comes back"
)]
struct Cli {
    /// Endpoint to connect, as `name=ws://host/path`. Repeatable.
    #[arg(long = "endpoint", value_parser = parse_endpoint, required = true)]
    endpoints: Vec<(String, String)>,

    /// HTTP endpoint answering `{"token": "..."}` for every connect.
    #[arg(long, env = "ENDPOINT_SESSION_TOKEN_URL")]
    token_url: Option<String>,

    /// Bearer credential sent to the token endpoint.
    #[arg(long, env = "ENDPOINT_SESSION_TOKEN_BEARER")]
    token_bearer: Option<String>,

    /// Fixed token to use instead of a token endpoint. Repeatable; cycled.
    #[arg(long)]
    token: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Status,
    Metrics,
    Send { endpoint: String, message: String },
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected name=url, got `{raw}`")),
    }
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    match line {
        "" => None,
        "status" => Some(Input::Status),
        "metrics" => Some(Input::Metrics),
        _ => {
            let (endpoint, message) = line.split_once(char::is_whitespace)?;
            Some(Input::Send {
                endpoint: endpoint.to_string(),
                message: message.trim_start().to_string(),
            })
        }
    }
}

fn token_provider(cli: &Cli, config: &SessionConfig) -> Result<Arc<dyn TokenProvider>> {
    if !cli.token.is_empty() {
        return Ok(Arc::new(StaticTokenProvider::new(cli.token.clone())));
    }
    let Some(url) = cli.token_url.clone().or_else(|| config.token_url.clone()) else {
        bail!("either --token or --token-url is required");
    };
    let mut provider = HttpTokenProvider::new(url);
    if let Some(bearer) = cli.token_bearer.clone().or_else(|| config.token_bearer.clone()) {
        provider = provider.with_bearer(bearer);
    }
    Ok(Arc::new(provider))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SessionConfig::from_env();
    telemetry::init_tracing(&config.log_filter);

    let cli = Cli::parse();
    let tokens = token_provider(&cli, &config)?;
    info!(endpoints = cli.endpoints.len(), "starting session relay");

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<(EndpointId, String)>();
    let actions = ActionRegistry::new();
    actions.on_open(|url| info!(url = %url.base(), "endpoint connected"));
    actions.on_close(|url| info!(url = %url.base(), "endpoint disconnected"));

    let connect_timeout = config.connect_timeout;
    let backoff = config.backoff.clone();
    let (session, task) = spawn_session(move |events| SessionParts {
        factory: Box::new(
            WebSocketConnectionFactory::new(events.clone()).with_connect_timeout(connect_timeout),
        ),
        receiver: Box::new(inbound_tx),
        sustainer: Box::new(BackoffSustainer::new(backoff)),
        actions: Box::new(actions),
        tokens,
    });

    for (name, base) in &cli.endpoints {
        let url = session
            .initialize(name.as_str(), base.as_str())
            .await
            .with_context(|| format!("failed to initialize endpoint {name}"))?;
        info!(endpoint = %name, url = %url.base(), "endpoint initialized");
    }

    let result = relay(&session, inbound_rx).await;

    session.shutdown().ok();
    task.await.context("session actor panicked")?;
    info!("session relay stopped");
    result
}

async fn relay(
    session: &SessionHandle,
    mut inbound: mpsc::UnboundedReceiver<(EndpointId, String)>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    return Ok(());
                };
                match parse_input(&line) {
                    Some(Input::Status) => {
                        let snapshot = session.snapshot().await?;
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    Some(Input::Metrics) => {
                        print!("{}", String::from_utf8_lossy(&metrics::gather()));
                    }
                    Some(Input::Send { endpoint, message }) => {
                        session.transmit(endpoint, message)?;
                    }
                    None => warn!("expected `endpoint message`, `status` or `metrics`"),
                }
            }
            Some((endpoint, message)) = inbound.recv() => {
                println!("{endpoint}< {message}");
            }
            _ = signal::ctrl_c() => {
                info!("interrupt received");
                return Ok(());
            }
        }
    }
}
