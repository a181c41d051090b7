use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::endpoint::ConnectionUrl;
use crate::error::PropertyError;

/// Reconnection bookkeeping for one connection url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    #[serde(serialize_with = "crate::endpoint::redacted::serialize")]
    pub url: ConnectionUrl,
    pub reconnect_delay: Duration,
    pub reconnect_attempts: u32,
    pub sustainer_enabled: bool,
}

impl ConnectionProperties {
    fn new(url: ConnectionUrl) -> Self {
        Self {
            url,
            reconnect_delay: Duration::ZERO,
            reconnect_attempts: 0,
            sustainer_enabled: true,
        }
    }
}

/// Per-url state shared with the sustainer. Holds counters only; when and
/// whether to retry is decided by the [`crate::Sustainer`].
#[derive(Debug, Default)]
pub struct PropertyStore {
    entries: HashMap<ConnectionUrl, ConnectionProperties>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs default properties for `url`, replacing any existing record.
    pub fn initialize_connection(&mut self, url: &ConnectionUrl) {
        self.entries
            .insert(url.clone(), ConnectionProperties::new(url.clone()));
    }

    pub fn get(&self, url: &ConnectionUrl) -> Result<&ConnectionProperties, PropertyError> {
        self.entries
            .get(url)
            .ok_or_else(|| PropertyError::Unknown(url.clone()))
    }

    fn get_mut(&mut self, url: &ConnectionUrl) -> Result<&mut ConnectionProperties, PropertyError> {
        self.entries
            .get_mut(url)
            .ok_or_else(|| PropertyError::Unknown(url.clone()))
    }

    pub fn connection_delay(&self, url: &ConnectionUrl) -> Result<Duration, PropertyError> {
        self.get(url).map(|p| p.reconnect_delay)
    }

    pub fn reconnection_attempts(&self, url: &ConnectionUrl) -> Result<u32, PropertyError> {
        self.get(url).map(|p| p.reconnect_attempts)
    }

    pub fn url(&self, url: &ConnectionUrl) -> Result<ConnectionUrl, PropertyError> {
        self.get(url).map(|p| p.url.clone())
    }

    pub fn sustainer_enabled(&self, url: &ConnectionUrl) -> Result<bool, PropertyError> {
        self.get(url).map(|p| p.sustainer_enabled)
    }

    pub fn disable_sustainer(&mut self, url: &ConnectionUrl) -> Result<(), PropertyError> {
        self.get_mut(url)?.sustainer_enabled = false;
        Ok(())
    }

    pub fn set_connection_delay(
        &mut self,
        url: &ConnectionUrl,
        delay: Duration,
    ) -> Result<(), PropertyError> {
        self.get_mut(url)?.reconnect_delay = delay;
        Ok(())
    }

    pub fn set_reconnection_attempts(
        &mut self,
        url: &ConnectionUrl,
        attempts: u32,
    ) -> Result<(), PropertyError> {
        self.get_mut(url)?.reconnect_attempts = attempts;
        Ok(())
    }

    /// Bumps the attempt counter and returns the new value.
    pub fn record_attempt(&mut self, url: &ConnectionUrl) -> Result<u32, PropertyError> {
        let entry = self.get_mut(url)?;
        entry.reconnect_attempts = entry.reconnect_attempts.saturating_add(1);
        Ok(entry.reconnect_attempts)
    }

    /// Zeroes delay and attempts after a successful open.
    pub fn reset(&mut self, url: &ConnectionUrl) -> Result<(), PropertyError> {
        let entry = self.get_mut(url)?;
        entry.reconnect_delay = Duration::ZERO;
        entry.reconnect_attempts = 0;
        Ok(())
    }

    /// Copies the backoff counters of a retired url onto its replacement.
    pub fn carry_over(
        &mut self,
        from: &ConnectionUrl,
        to: &ConnectionUrl,
    ) -> Result<(), PropertyError> {
        let (delay, attempts) = {
            let old = self.get(from)?;
            (old.reconnect_delay, old.reconnect_attempts)
        };
        let entry = self.get_mut(to)?;
        entry.reconnect_delay = delay;
        entry.reconnect_attempts = attempts;
        Ok(())
    }

    pub fn remove(&mut self, url: &ConnectionUrl) -> Option<ConnectionProperties> {
        self.entries.remove(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> ConnectionUrl {
        ConnectionUrl::from("ws://agent.local/ws?token=t1")
    }

    #[test]
    fn initializes_with_defaults() {
        let mut store = PropertyStore::new();
        store.initialize_connection(&url());

        assert_eq!(store.connection_delay(&url()).unwrap(), Duration::ZERO);
        assert_eq!(store.reconnection_attempts(&url()).unwrap(), 0);
        assert_eq!(store.url(&url()).unwrap(), url());
        assert!(store.sustainer_enabled(&url()).unwrap());
    }

    #[test]
    fn reads_fail_for_uninitialized_url() {
        let store = PropertyStore::new();
        assert_eq!(
            store.connection_delay(&url()),
            Err(PropertyError::Unknown(url()))
        );
        assert!(store.reconnection_attempts(&url()).is_err());
        assert!(store.url(&url()).is_err());
        assert!(store.sustainer_enabled(&url()).is_err());
    }

    #[test]
    fn disable_sustainer_is_idempotent() {
        let mut store = PropertyStore::new();
        store.initialize_connection(&url());
        store.disable_sustainer(&url()).unwrap();
        store.disable_sustainer(&url()).unwrap();
        assert!(!store.sustainer_enabled(&url()).unwrap());
    }

    #[test]
    fn reinitializing_restores_defaults() {
        let mut store = PropertyStore::new();
        store.initialize_connection(&url());
        store.record_attempt(&url()).unwrap();
        store.disable_sustainer(&url()).unwrap();

        store.initialize_connection(&url());
        assert_eq!(store.reconnection_attempts(&url()).unwrap(), 0);
        assert!(store.sustainer_enabled(&url()).unwrap());
    }

    #[test]
    fn counters_carry_over_to_replacement_url() {
        let old = url();
        let new = ConnectionUrl::from("ws://agent.local/ws?token=t2");
        let mut store = PropertyStore::new();
        store.initialize_connection(&old);
        store.record_attempt(&old).unwrap();
        store.record_attempt(&old).unwrap();
        store
            .set_connection_delay(&old, Duration::from_millis(400))
            .unwrap();

        store.initialize_connection(&new);
        store.carry_over(&old, &new).unwrap();

        assert_eq!(store.reconnection_attempts(&new).unwrap(), 2);
        assert_eq!(
            store.connection_delay(&new).unwrap(),
            Duration::from_millis(400)
        );
        assert!(store.sustainer_enabled(&new).unwrap());

        store.reset(&new).unwrap();
        assert_eq!(store.reconnection_attempts(&new).unwrap(), 0);
        assert_eq!(store.connection_delay(&new).unwrap(), Duration::ZERO);
    }
}
