use crate::error::DonkyError;
use serde::Deserialize;
use std::time::Duration;

/// Host-supplied tuning for the synchronisation core. Every field has a
/// sensible default, so `DonkyConfig::default()` works out of the box and
/// TOML files only need to name what they change.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DonkyConfig {
    /// Maximum outbound notifications claimed per synchronise cycle.
    pub batch_limit: usize,
    /// Background sync period in seconds.
    pub sync_interval_secs: u64,
    /// Advance delay after a failed sequence task, in milliseconds.
    pub task_retry_delay_ms: u64,
    /// Per-submission transport deadline in seconds.
    pub submission_timeout_secs: u64,
    /// Endpoint for the stateless synchronise call.
    pub sync_endpoint: String,
}

impl Default for DonkyConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            sync_interval_secs: 60,
            task_retry_delay_ms: 2_000,
            submission_timeout_secs: 30,
            sync_endpoint: "notification/synchronise".to_owned(),
        }
    }
}

impl DonkyConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, DonkyError> {
        let config: Self =
            toml::from_str(raw).map_err(|err| DonkyError::configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DonkyError> {
        if self.batch_limit == 0 {
            return Err(DonkyError::configuration("batch_limit must be at least 1"));
        }
        if self.sync_interval_secs == 0 {
            return Err(DonkyError::configuration("sync_interval_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn task_retry_delay(&self) -> Duration {
        Duration::from_millis(self.task_retry_delay_ms)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    /// Selector configuration derived from the transport-facing fields.
    pub fn transport_selector_config(&self) -> donky_transport::TransportSelectorConfig {
        donky_transport::TransportSelectorConfig {
            sync_endpoint: self.sync_endpoint.clone(),
            submission_timeout: self.submission_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = DonkyConfig::from_toml_str("batch_limit = 25\n").expect("parse");
        assert_eq!(config.batch_limit, 25);
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.task_retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DonkyConfig::from_toml_str("batch_limt = 25\n").expect_err("typo rejected");
        assert_eq!(err.machine_code, crate::error::code::CONFIGURATION_INVALID);
    }

    #[test]
    fn zero_batch_limit_is_invalid() {
        let err = DonkyConfig::from_toml_str("batch_limit = 0\n").expect_err("invalid");
        assert_eq!(err.category, crate::error::ErrorCategory::Configuration);
    }
}
