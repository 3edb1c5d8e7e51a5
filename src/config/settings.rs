use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Retry and send settings for the outbox
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Send attempts before a message is moved to the failure store
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first automatic retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for a single retry delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0), 0 disables jitter
    #[serde(default)]
    pub jitter_factor: f64,
    /// Upper bound for a single send call, in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000 // 5 seconds
}

fn default_send_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Settings for the in-memory deliverer used by the console binary
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Probability (0.0 to 1.0) that a send fails with a network error
    #[serde(default)]
    pub failure_rate: f64,
    /// Artificial latency added to every send, in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_chat_id")]
    pub chat_id: String,
    #[serde(default = "default_sender_id")]
    pub sender_id: String,
}

fn default_latency_ms() -> u64 {
    50
}

fn default_chat_id() -> String {
    "general".to_string()
}

fn default_sender_id() -> String {
    "local-user".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("queue.max_attempts", default_max_attempts())?
            .set_default("queue.base_delay_ms", default_base_delay_ms())?
            .set_default("queue.backoff_multiplier", default_backoff_multiplier())?
            .set_default("queue.max_delay_ms", default_max_delay_ms())?
            .set_default("queue.send_timeout_ms", default_send_timeout_ms())?
            .set_default("log.level", default_log_level())?
            .set_default("log.format", default_log_format())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // OUTBOX__QUEUE__MAX_ATTEMPTS, OUTBOX__LOG__LEVEL, OUTBOX__SIMULATOR__FAILURE_RATE, etc.
            .add_source(
                Environment::with_prefix("OUTBOX")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Message(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.backoff_multiplier < 1.0 {
            return Err(ConfigError::Message(
                "queue.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.queue.max_delay_ms < self.queue.base_delay_ms {
            return Err(ConfigError::Message(
                "queue.max_delay_ms must be >= queue.base_delay_ms".to_string(),
            ));
        }
        if self.queue.send_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "queue.send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.queue.jitter_factor) {
            return Err(ConfigError::Message(
                "queue.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simulator.failure_rate) {
            return Err(ConfigError::Message(
                "simulator.failure_rate must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency_ms: default_latency_ms(),
            chat_id: default_chat_id(),
            sender_id: default_sender_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let queue = QueueSettings::default();
        assert_eq!(queue.max_attempts, 3);
        assert_eq!(queue.base_delay_ms, 200);
        assert_eq!(queue.backoff_multiplier, 2.0);
        assert_eq!(queue.jitter_factor, 0.0);

        let log = LogConfig::default();
        assert_eq!(log.level, "info");
        assert_eq!(log.format, "pretty");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.queue.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut settings = Settings::default();
        settings.queue.send_timeout_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.queue.base_delay_ms = 1000;
        settings.queue.max_delay_ms = 500;
        assert!(settings.validate().is_err());

        // Equal bounds mean a constant delay
        settings.queue.max_delay_ms = 1000;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_ratios() {
        let mut settings = Settings::default();
        settings.simulator.failure_rate = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.queue.jitter_factor = -0.1;
        assert!(settings.validate().is_err());
    }
}
