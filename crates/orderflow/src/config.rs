//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional `orderflow.toml`
//! in the working directory, then `ORDERFLOW__<SECTION>__<KEY>` environment
//! variables (for example `ORDERFLOW__FAULTS__PAYMENT_SUCCESS_RATE=1.0`).

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use orderflow_core::{ActivityOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrderflowConfig {
    pub activities: ActivitiesConfig,
    pub workflow: WorkflowConfig,
    pub faults: FaultConfig,
    pub log: LogConfig,
}

/// Timeout and retry settings of one activity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Start-to-close timeout of a single attempt
    pub timeout_secs: u64,
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2,
        }
    }
}

impl ActivityConfig {
    fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..Self::default()
        }
    }

    /// Converts the settings into executor options.
    pub fn options(&self) -> Result<ActivityOptions, ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "activity timeout_secs must be greater than 0".to_string(),
            ));
        }
        let retry_policy = RetryPolicy::exponential_backoff(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
        )
        .map_err(|e| ConfigError::Message(e.to_string()))?;
        Ok(ActivityOptions {
            start_to_close_timeout: Duration::from_secs(self.timeout_secs),
            retry_policy,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivitiesConfig {
    pub inventory: ActivityConfig,
    pub payment: ActivityConfig,
    pub shipping: ActivityConfig,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self {
            inventory: ActivityConfig::with_timeout(10),
            payment: ActivityConfig::with_timeout(15),
            shipping: ActivityConfig::with_timeout(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Whole-run limit; exceeding it ends the workflow as `TIMED_OUT`.
    pub execution_timeout_secs: Option<u64>,
    /// Events fetched per page when concatenating history.
    pub history_page_size: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: None,
            history_page_size: 100,
        }
    }
}

impl WorkflowConfig {
    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

/// Injected faults used to exercise retry and failure paths.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Probability that a payment attempt succeeds
    pub payment_success_rate: f64,
    pub min_delivery_days: u32,
    pub max_delivery_days: u32,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            payment_success_rate: 0.8,
            min_delivery_days: 3,
            max_delivery_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl OrderflowConfig {
    /// Loads configuration from `orderflow.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::builder()?
            .add_source(File::with_name("orderflow").required(false))
            .add_source(
                Environment::with_prefix("ORDERFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let loaded: OrderflowConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parses configuration from TOML text, filling gaps with defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config = Self::builder()?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        let loaded: OrderflowConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    // A partially specified activity table falls back to `ActivityConfig`
    // defaults, so the payment timeout is seeded at the source level.
    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder().set_default("activities.payment.timeout_secs", 15_i64)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for activity in [
            &self.activities.inventory,
            &self.activities.payment,
            &self.activities.shipping,
        ] {
            activity.options()?;
        }
        if !(0.0..=1.0).contains(&self.faults.payment_success_rate) {
            return Err(ConfigError::Message(
                "faults.payment_success_rate must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.faults.min_delivery_days > self.faults.max_delivery_days {
            return Err(ConfigError::Message(
                "faults.min_delivery_days must not exceed max_delivery_days".to_string(),
            ));
        }
        if self.workflow.history_page_size == 0 {
            return Err(ConfigError::Message(
                "workflow.history_page_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
