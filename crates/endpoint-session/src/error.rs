use thiserror::Error;

use crate::endpoint::{ConnectionUrl, EndpointId};

/// Lookup failures in the endpoint resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no url mapped for endpoint {0}")]
    EndpointNotFound(EndpointId),
    #[error("no endpoint mapped for url {0}")]
    UrlNotFound(ConnectionUrl),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("connection properties not initialized for {0}")]
    Unknown(ConnectionUrl),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("no connection registered for {0}")]
    Unknown(ConnectionUrl),
    #[error("connection not open")]
    NotOpen,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("token response did not contain a token")]
    MissingToken,
    #[error("token provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum InitializeError {
    #[error("token acquisition failed: {0}")]
    Token(#[from] TokenError),
    #[error("invalid base url {base}: {source}")]
    InvalidBaseUrl {
        base: String,
        #[source]
        source: url::ParseError,
    },
    #[error("initialize for {0} superseded before its token resolved")]
    Superseded(EndpointId),
    #[error("url minted for {endpoint} is already bound to {owner}")]
    UrlInUse {
        endpoint: EndpointId,
        owner: EndpointId,
    },
}

/// Errors surfaced by [`crate::SessionHandle`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session actor stopped")]
    Stopped,
    #[error(transparent)]
    Initialize(#[from] InitializeError),
}
