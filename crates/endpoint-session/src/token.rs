//! Security token acquisition. Each initialize (and each reconnect) asks for a
//! fresh token, which ends up in the connection url.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::TokenError;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self) -> Result<String, TokenError>;
}

/// Hands out tokens from a fixed list, cycling once it reaches the end.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: Vec<String>,
    issued: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn single(token: impl Into<String>) -> Self {
        Self::new([token.into()])
    }

    /// How many tokens have been handed out so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self) -> Result<String, TokenError> {
        if self.tokens.is_empty() {
            return Err(TokenError::Unavailable("no static tokens configured".into()));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens[n % self.tokens.len()].clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Fetches tokens from an HTTP endpoint answering `{"token": "..."}`.
#[derive(Clone)]
pub struct HttpTokenProvider {
    http: Client,
    url: String,
    bearer: Option<String>,
}

impl HttpTokenProvider {
    pub fn new(url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            url: url.into(),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, bearer: impl Into<String>) -> Self {
        self.bearer = Some(bearer.into());
        self
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn acquire(&self) -> Result<String, TokenError> {
        let mut request = self.http.get(&self.url);
        if let Some(bearer) = &self.bearer {
            request = request.bearer_auth(bearer);
        }
        let res = request.send().await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TokenError::UnexpectedStatus { status, body });
        }
        let body: TokenResponse = res.json().await?;
        body.token
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_cycles_and_counts() {
        let provider = StaticTokenProvider::new(["a", "b"]);
        assert_eq!(provider.acquire().await.unwrap(), "a");
        assert_eq!(provider.acquire().await.unwrap(), "b");
        assert_eq!(provider.acquire().await.unwrap(), "a");
        assert_eq!(provider.issued(), 3);
    }

    #[tokio::test]
    async fn empty_static_provider_is_unavailable() {
        let provider = StaticTokenProvider::new(Vec::<String>::new());
        assert!(matches!(
            provider.acquire().await,
            Err(TokenError::Unavailable(_))
        ));
    }
}
