// Configuration management with layered configuration (file, env)

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub nats: NatsConfig,
    pub trigger: TriggerConfig,
    pub worker: WorkerConfig,
    pub platforms: PlatformsConfig,
    pub notifier: NotifierConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    pub consumer_name: String,
}

/// Trigger evaluation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Evaluation cadence. Must not exceed 60 seconds: firing granularity is
    /// the minute bucket and a coarser cadence would skip slots.
    pub tick_interval_seconds: u64,
    /// IANA timezone of the process-wide reference clock (e.g. "UTC").
    pub reference_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// TTL of the per-list publish lock.
    pub lock_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub instagram: InstagramSettings,
}

/// Per-platform API endpoint and protocol budgets. Base URL and API version
/// are configuration, not core logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramSettings {
    pub base_url: String,
    pub api_version: String,
    pub upload_max_retries: u32,
    pub poll_interval_seconds: u64,
    pub poll_max_attempts: u32,
    pub publish_max_retries: u32,
    /// Hard wall-clock deadline for one publish call, independent of the
    /// per-step budgets.
    pub call_timeout_seconds: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of each per-user broadcast channel.
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults -> file -> env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.redis.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.stream_name.is_empty() {
            return Err("NATS stream_name cannot be empty".to_string());
        }

        if self.trigger.tick_interval_seconds == 0 || self.trigger.tick_interval_seconds > 60 {
            return Err("Trigger tick_interval_seconds must be in 1..=60".to_string());
        }
        if Tz::from_str(&self.trigger.reference_timezone).is_err() {
            return Err(format!(
                "Invalid reference timezone: {}",
                self.trigger.reference_timezone
            ));
        }

        if self.worker.lock_ttl_seconds == 0 {
            return Err("Worker lock_ttl_seconds must be greater than 0".to_string());
        }

        let ig = &self.platforms.instagram;
        if ig.base_url.is_empty() {
            return Err("Instagram base_url cannot be empty".to_string());
        }
        if ig.poll_max_attempts == 0 {
            return Err("Instagram poll_max_attempts must be greater than 0".to_string());
        }
        if ig.call_timeout_seconds == 0 {
            return Err("Instagram call_timeout_seconds must be greater than 0".to_string());
        }

        if self.notifier.channel_capacity == 0 {
            return Err("Notifier channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Parsed reference clock timezone. `validate` guarantees this succeeds
    /// on validated settings.
    pub fn reference_timezone(&self) -> Result<Tz, String> {
        Tz::from_str(&self.trigger.reference_timezone)
            .map_err(|_| format!("Invalid reference timezone: {}", self.trigger.reference_timezone))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/autopost".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                pool_size: 10,
            },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                stream_name: "PUBLICATIONS".to_string(),
                consumer_name: "publication-workers".to_string(),
            },
            trigger: TriggerConfig {
                tick_interval_seconds: 60,
                reference_timezone: "UTC".to_string(),
            },
            worker: WorkerConfig {
                lock_ttl_seconds: 120,
            },
            platforms: PlatformsConfig {
                instagram: InstagramSettings {
                    base_url: "https://graph.facebook.com".to_string(),
                    api_version: "v21.0".to_string(),
                    upload_max_retries: 3,
                    poll_interval_seconds: 10,
                    poll_max_attempts: 30,
                    publish_max_retries: 3,
                    call_timeout_seconds: 900,
                    breaker_failure_threshold: 5,
                    breaker_cooldown_seconds: 60,
                },
            },
            notifier: NotifierConfig {
                host: "0.0.0.0".to_string(),
                port: 8081,
                channel_capacity: 64,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_coarse_tick_interval() {
        let mut settings = Settings::default();
        settings.trigger.tick_interval_seconds = 120;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_timezone() {
        let mut settings = Settings::default();
        settings.trigger.reference_timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reference_timezone_parses() {
        let settings = Settings::default();
        assert_eq!(settings.reference_timezone().unwrap(), chrono_tz::UTC);
    }
}
