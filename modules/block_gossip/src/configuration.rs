use std::time::Duration;

use anyhow::Result;
use config::Config;
use serde::Deserialize;

use crate::errors::GossipError;

/// Retry policy for a single download source.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Retries per source after the first attempt; 0 means one attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Delay before retry `attempt` (0-based): `initial_backoff * factor^attempt`.
    pub fn delay(&self, attempt: u32) -> Result<Duration, GossipError> {
        let secs = self.initial_backoff().as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::try_from_secs_f64(secs).map_err(|_| {
            GossipError::Configuration(format!("retry delay for attempt {attempt} is not finite"))
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GossipConfig {
    /// Target number of distinct acceptances per relayed hash
    pub relay_factor: usize,
    /// Contact-attempt cap knob, 0-100
    pub relay_saturation: u32,
    /// Run relay rounds before `relay()` returns
    pub is_synchronous: bool,
    /// Global fetch permits
    pub max_parallel_downloads: usize,
    pub retries: RetryConfig,
}

impl GossipConfig {
    /// Overlay the caller's configuration on the embedded defaults.
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let cfg: Self = full_config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), GossipError> {
        if self.relay_factor < 1 {
            return Err(GossipError::Configuration(
                "relay-factor must be at least 1".to_string(),
            ));
        }
        if self.relay_saturation > 100 {
            return Err(GossipError::Configuration(format!(
                "relay-saturation must be within 0-100, got {}",
                self.relay_saturation
            )));
        }
        if self.max_parallel_downloads < 1 {
            return Err(GossipError::Configuration(
                "max-parallel-downloads must be at least 1".to_string(),
            ));
        }
        if !self.retries.backoff_factor.is_finite() || self.retries.backoff_factor < 1.0 {
            return Err(GossipError::Configuration(format!(
                "backoff-factor must be a finite number >= 1.0, got {}",
                self.retries.backoff_factor
            )));
        }
        Ok(())
    }

    /// Cap on contact attempts per relayed hash: unlimited at saturation 100,
    /// otherwise `relay_factor * 100 / (100 - saturation)`.
    pub fn max_to_try(&self) -> usize {
        if self.relay_saturation >= 100 {
            usize::MAX
        } else {
            self.relay_factor * 100 / (100 - self.relay_saturation as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_overrides() {
        let cfg = GossipConfig::try_load(&Config::default()).unwrap();
        assert_eq!(cfg.relay_factor, 2);
        assert_eq!(cfg.relay_saturation, 90);
        assert!(!cfg.is_synchronous);
        assert_eq!(cfg.max_parallel_downloads, 5);
        assert_eq!(cfg.retries.max_retries, 3);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let config = Config::builder()
            .set_override("relay-factor", 7)
            .unwrap()
            .build()
            .unwrap();
        let cfg = GossipConfig::try_load(&config).unwrap();
        assert_eq!(cfg.relay_factor, 7);
        assert_eq!(cfg.relay_saturation, 90);
    }

    #[test]
    fn rejects_out_of_range_saturation() {
        let config = Config::builder()
            .set_override("relay-saturation", 150)
            .unwrap()
            .build()
            .unwrap();
        assert!(GossipConfig::try_load(&config).is_err());
    }

    #[test]
    fn rejects_sub_one_backoff_factor() {
        let config = Config::builder()
            .set_override("retries.backoff-factor", 0.5)
            .unwrap()
            .build()
            .unwrap();
        assert!(GossipConfig::try_load(&config).is_err());
    }

    #[test]
    fn saturation_caps_contact_attempts() {
        let mut cfg = GossipConfig::try_load(&Config::default()).unwrap();
        cfg.relay_factor = 3;

        cfg.relay_saturation = 0;
        assert_eq!(cfg.max_to_try(), 3);

        cfg.relay_saturation = 50;
        assert_eq!(cfg.max_to_try(), 6);

        cfg.relay_saturation = 100;
        assert_eq!(cfg.max_to_try(), usize::MAX);
    }

    #[test]
    fn backoff_delays_are_exponential() {
        let retries = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 100,
            backoff_factor: 2.0,
        };
        assert_eq!(retries.delay(0).unwrap(), Duration::from_millis(100));
        assert_eq!(retries.delay(1).unwrap(), Duration::from_millis(200));
        assert_eq!(retries.delay(2).unwrap(), Duration::from_millis(400));
    }

    #[test]
    fn non_finite_delay_is_a_configuration_error() {
        let retries = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: u64::MAX,
            backoff_factor: f64::MAX,
        };
        assert!(matches!(
            retries.delay(5),
            Err(GossipError::Configuration(_))
        ));
    }
}
