//! Endpoint initialize / terminate.
//!
//! Initialization is split in two around the async token fetch: the actor calls
//! [`Session::begin_initialize`], acquires a token off-task, and hands the result
//! to [`Session::complete_initialize`]. Each begin and each terminate bumps the
//! endpoint's generation, so a token that resolves after the endpoint was
//! terminated or re-initialized is discarded instead of resurrecting a mapping.

use tracing::{debug, info, warn};
use url::Url;

use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::error::InitializeError;
use crate::session::Session;

pub fn validate_base(base: &str) -> Result<(), InitializeError> {
    Url::parse(base)
        .map(|_| ())
        .map_err(|source| InitializeError::InvalidBaseUrl {
            base: base.to_string(),
            source,
        })
}

impl Session {
    /// Starts a new initialize for `endpoint` and returns its generation.
    pub fn begin_initialize(&mut self, endpoint: &EndpointId) -> u64 {
        self.bump_generation(endpoint)
    }

    /// Fails with [`InitializeError::Superseded`] unless `generation` is still
    /// the newest for `endpoint`.
    pub fn check_generation(
        &self,
        endpoint: &EndpointId,
        generation: u64,
    ) -> Result<(), InitializeError> {
        let current = self.generations.get(endpoint).copied().unwrap_or(0);
        if current == generation {
            return Ok(());
        }
        warn!(
            target = "session.lifecycle",
            endpoint = %endpoint,
            generation,
            current,
            "discarding superseded initialize"
        );
        Err(InitializeError::Superseded(endpoint.clone()))
    }

    /// Binds `endpoint` to `base` plus `token` and starts connecting.
    ///
    /// Order: mapping, properties, retire the replaced url if any, connection
    /// object, establish.
    pub fn complete_initialize(
        &mut self,
        endpoint: EndpointId,
        base: &str,
        token: &str,
        generation: u64,
    ) -> Result<ConnectionUrl, InitializeError> {
        self.check_generation(&endpoint, generation)?;

        let url = ConnectionUrl::with_token(base, token);
        if let Ok(owner) = self.resolver.resolve(&url) {
            if owner != endpoint {
                warn!(
                    target = "session.lifecycle",
                    endpoint = %endpoint,
                    owner = %owner,
                    url = %url.base(),
                    "refusing to bind a url another endpoint owns"
                );
                return Err(InitializeError::UrlInUse { endpoint, owner });
            }
        }
        let replaced = self.resolver.set_mapping(endpoint.clone(), url.clone());
        // A provider may hand out the same token again; keep the backoff going.
        let same_url_counters = self
            .properties
            .get(&url)
            .ok()
            .map(|p| (p.reconnect_delay, p.reconnect_attempts));
        self.properties.initialize_connection(&url);
        match (replaced, same_url_counters) {
            (Some(old), _) => self.retire(&old, &url),
            (None, Some((delay, attempts))) => {
                self.properties.set_connection_delay(&url, delay).ok();
                self.properties.set_reconnection_attempts(&url, attempts).ok();
            }
            (None, None) => {}
        }
        self.registry.initialize_connection(&url);
        if let Err(err) = self.registry.establish_connection(&url) {
            warn!(target = "session.lifecycle", endpoint = %endpoint, error = %err, "establish failed");
        }
        self.bases.insert(endpoint.clone(), base.to_string());

        info!(
            target = "session.lifecycle",
            endpoint = %endpoint,
            url = %url.base(),
            "endpoint initialized"
        );
        Ok(url)
    }

    /// Unbinds `endpoint`, stops reconnecting its url and closes it. Returns the
    /// url it was bound to, `None` when it was not mapped.
    pub fn terminate(&mut self, endpoint: &EndpointId) -> Option<ConnectionUrl> {
        self.bump_generation(endpoint);
        self.bases.remove(endpoint);
        let url = self.resolver.remove_mapping(endpoint)?;
        if let Err(err) = self.properties.disable_sustainer(&url) {
            debug!(target = "session.lifecycle", error = %err, "no properties to disable");
        }
        if let Err(err) = self.registry.close_connection(&url) {
            debug!(target = "session.lifecycle", error = %err, "no connection to close");
        }
        info!(target = "session.lifecycle", endpoint = %endpoint, "endpoint terminated");
        Some(url)
    }

    /// Endpoint and base to re-initialize when the sustainer asks to reconnect
    /// `url`. `None` when the url was retired, terminated or given up on.
    pub fn reconnect_target(&self, url: &ConnectionUrl) -> Option<(EndpointId, String)> {
        let endpoint = self.resolver.resolve(url).ok()?;
        if !self.properties.sustainer_enabled(url).unwrap_or(false) {
            return None;
        }
        let base = self.bases.get(&endpoint)?.clone();
        Some((endpoint, base))
    }

    fn retire(&mut self, old: &ConnectionUrl, new: &ConnectionUrl) {
        if let Err(err) = self.properties.carry_over(old, new) {
            debug!(target = "session.lifecycle", error = %err, "no counters to carry over");
        }
        self.registry.remove(old);
        self.properties.remove(old);
    }

    fn bump_generation(&mut self, endpoint: &EndpointId) -> u64 {
        let generation = self.generations.entry(endpoint.clone()).or_insert(0);
        *generation += 1;
        *generation
    }
}
