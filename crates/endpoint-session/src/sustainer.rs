use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::endpoint::ConnectionUrl;
use crate::metrics;
use crate::properties::PropertyStore;
use crate::runtime::Reconnector;

/// Reconnection policy. The session calls `reset` when a url opens and
/// `sustain` when it closes; the policy keeps its counters in the
/// [`PropertyStore`] and asks for a reconnect through the [`Reconnector`].
pub trait Sustainer: Send {
    fn reset(&mut self, url: &ConnectionUrl, properties: &mut PropertyStore);
    fn sustain(
        &mut self,
        url: &ConnectionUrl,
        properties: &mut PropertyStore,
        reconnector: &Reconnector,
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt `attempt` (1-based): doubles each time, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Exponential backoff sustainer.
#[derive(Debug, Clone, Default)]
pub struct BackoffSustainer {
    config: BackoffConfig,
}

impl BackoffSustainer {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }
}

impl Sustainer for BackoffSustainer {
    fn reset(&mut self, url: &ConnectionUrl, properties: &mut PropertyStore) {
        if let Err(err) = properties.reset(url) {
            debug!(target = "session.sustainer", error = %err, "reset skipped");
        }
    }

    fn sustain(
        &mut self,
        url: &ConnectionUrl,
        properties: &mut PropertyStore,
        reconnector: &Reconnector,
    ) {
        match properties.sustainer_enabled(url) {
            Ok(true) => {}
            Ok(false) => {
                debug!(target = "session.sustainer", url = %url.base(), "sustainer disabled");
                return;
            }
            Err(err) => {
                debug!(target = "session.sustainer", error = %err, "not sustaining retired url");
                return;
            }
        }

        let attempts = match properties.record_attempt(url) {
            Ok(attempts) => attempts,
            Err(err) => {
                debug!(target = "session.sustainer", error = %err, "not sustaining retired url");
                return;
            }
        };
        if self.config.max_attempts > 0 && attempts > self.config.max_attempts {
            warn!(
                target = "session.sustainer",
                url = %url.base(),
                attempts = attempts - 1,
                "giving up on reconnect"
            );
            properties.disable_sustainer(url).ok();
            return;
        }

        let delay = self.config.delay_for(attempts);
        properties.set_connection_delay(url, delay).ok();
        info!(
            target = "session.sustainer",
            url = %url.base(),
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        metrics::RECONNECTS_SCHEDULED.inc();
        reconnector.reconnect_after(url.clone(), delay);
    }
}
