use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use url::form_urlencoded;

/// Query parameter carrying the per-connection credential.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Stable logical identifier for one application-level channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Address of one physical connection. Carries the token it was minted with,
/// so a reconnect for the same endpoint always yields a different value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionUrl(String);

impl ConnectionUrl {
    /// Appends `token` to `base` as the [`TOKEN_QUERY_PARAM`] query parameter.
    pub fn with_token(base: &str, token: &str) -> Self {
        let separator = if base.contains('?') { '&' } else { '?' };
        let encoded: String = form_urlencoded::byte_serialize(token.as_bytes()).collect();
        Self(format!("{base}{separator}{TOKEN_QUERY_PARAM}={encoded}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL with its token parameter removed.
    pub fn base(&self) -> &str {
        let url = self.0.as_str();
        for separator in ['?', '&'] {
            let marker = format!("{separator}{TOKEN_QUERY_PARAM}=");
            if let Some(idx) = url.rfind(&marker) {
                let rest = &url[idx + marker.len()..];
                // Only strip when the token is the trailing parameter.
                if !rest.contains('&') {
                    return &url[..idx];
                }
            }
        }
        url
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionUrl {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionUrl {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ConnectionUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `serialize_with` helpers that write a url as its [`ConnectionUrl::base`],
/// keeping the token out of snapshots and status output.
pub(crate) mod redacted {
    use super::*;

    pub fn serialize<S: Serializer>(url: &ConnectionUrl, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(url.base())
    }

    pub fn serialize_opt<S: Serializer>(
        url: &Option<ConnectionUrl>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match url {
            Some(url) => serializer.serialize_some(url.base()),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_token_as_first_query_parameter() {
        let url = ConnectionUrl::with_token("ws://agents.local/ws", "abc");
        assert_eq!(url.as_str(), "ws://agents.local/ws?token=abc");
        assert_eq!(url.base(), "ws://agents.local/ws");
    }

    #[test]
    fn appends_token_after_existing_query() {
        let url = ConnectionUrl::with_token("ws://agents.local/ws?agent=7", "abc");
        assert_eq!(url.as_str(), "ws://agents.local/ws?agent=7&token=abc");
        assert_eq!(url.base(), "ws://agents.local/ws?agent=7");
    }

    #[test]
    fn encodes_reserved_characters_in_token() {
        let url = ConnectionUrl::with_token("ws://h/ws", "a+b/c=&d");
        assert_eq!(url.as_str(), "ws://h/ws?token=a%2Bb%2Fc%3D%26d");
        assert_eq!(url.base(), "ws://h/ws");
    }

    #[test]
    fn base_of_tokenless_url_is_unchanged() {
        let url = ConnectionUrl::from("ws://h/ws?agent=1");
        assert_eq!(url.base(), "ws://h/ws?agent=1");
    }
}
