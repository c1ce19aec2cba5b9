use anyhow::Result;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

use crate::errors::AppError;
use crate::utils::retry::RetryConfig;
use crate::utils::time::parse_timezone;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IANA timezone used for daily/weekly wall-clock comparisons
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broadcast: BroadcastApiConfig,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Encoder subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder command, either a full path (/usr/bin/ffmpeg) or a name looked up in $PATH
    pub command: String,
    /// Ingest URL the broadcast stream key is appended to
    pub output_base_url: String,
    /// How long a graceful quit may take before the process is killed
    #[serde(with = "duration")]
    pub terminate_timeout: Duration,
    /// Extra arguments inserted before the output URL
    pub extra_output_args: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENCODER_COMMAND.to_string(),
            output_base_url: DEFAULT_OUTPUT_BASE_URL.to_string(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            extra_output_args: Vec::new(),
        }
    }
}

/// Restart policy for crashed encoders
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_retries: u32,
    #[serde(with = "duration")]
    pub restart_backoff_initial: Duration,
    #[serde(with = "duration")]
    pub restart_backoff_max: Duration,
    pub restart_backoff_multiplier: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            restart_backoff_initial: DEFAULT_RESTART_BACKOFF_INITIAL,
            restart_backoff_max: DEFAULT_RESTART_BACKOFF_MAX,
            restart_backoff_multiplier: DEFAULT_RESTART_BACKOFF_MULTIPLIER,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_backoff(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries + 1,
            initial_delay: self.restart_backoff_initial,
            max_delay: self.restart_backoff_max,
            backoff_multiplier: self.restart_backoff_multiplier,
            jitter: true,
        }
    }
}

/// Backup termination mechanisms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Backup timer fires this long after the expected end
    #[serde(with = "duration")]
    pub backup_grace: Duration,
    /// Interval of the periodic overdue sweep
    #[serde(with = "duration")]
    pub sweep_interval: Duration,
    /// Sweep force-stops streams overdue by more than this
    #[serde(with = "duration")]
    pub sweep_overdue_grace: Duration,
    /// Remaining time under which a stream reports as ending soon
    #[serde(with = "duration")]
    pub ending_soon_threshold: Duration,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            backup_grace: DEFAULT_BACKUP_GRACE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_overdue_grace: DEFAULT_SWEEP_OVERDUE_GRACE,
            ending_soon_threshold: DEFAULT_ENDING_SOON_THRESHOLD,
        }
    }
}

/// Recurring schedule evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "duration")]
    pub tick_interval: Duration,
    /// How early before the nominal time a trigger window opens
    #[serde(with = "duration")]
    pub early_window: Duration,
    /// How late after the nominal time a trigger window stays open
    #[serde(with = "duration")]
    pub late_window: Duration,
    /// Minimum time between two firings of the same definition
    #[serde(with = "duration")]
    pub cooldown: Duration,
    /// Missed occurrences older than this are skipped instead of caught up
    #[serde(with = "duration")]
    pub catch_up_horizon: Duration,
    pub creation_max_attempts: u32,
    #[serde(with = "duration")]
    pub creation_backoff_initial: Duration,
    #[serde(with = "duration")]
    pub creation_backoff_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            early_window: DEFAULT_EARLY_WINDOW,
            late_window: DEFAULT_LATE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
            catch_up_horizon: DEFAULT_CATCH_UP_HORIZON,
            creation_max_attempts: DEFAULT_CREATION_MAX_ATTEMPTS,
            creation_backoff_initial: DEFAULT_CREATION_BACKOFF_INITIAL,
            creation_backoff_max: DEFAULT_CREATION_BACKOFF_MAX,
        }
    }
}

impl SchedulerConfig {
    pub fn creation_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.creation_max_attempts,
            initial_delay: self.creation_backoff_initial,
            max_delay: self.creation_backoff_max,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Broadcast creation API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastApiConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    #[serde(with = "duration")]
    pub request_timeout: Duration,
}

impl Default for BroadcastApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BROADCAST_ENDPOINT.to_string(),
            api_token: None,
            request_timeout: DEFAULT_BROADCAST_REQUEST_TIMEOUT,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            encoder: EncoderConfig::default(),
            supervisor: SupervisorConfig::default(),
            termination: TerminationConfig::default(),
            scheduler: SchedulerConfig::default(),
            broadcast: BroadcastApiConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let config = if std::path::Path::new(config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    /// Parsed scheduling timezone
    pub fn timezone(&self) -> Result<Tz, AppError> {
        Ok(parse_timezone(&self.timezone)?)
    }

    /// Reject values the engine and supervisor cannot work with
    pub fn validate(&self) -> Result<(), AppError> {
        self.timezone()?;

        if self.encoder.command.trim().is_empty() {
            return Err(AppError::configuration("encoder.command must not be empty"));
        }
        if self.termination.sweep_interval.is_zero() {
            return Err(AppError::configuration(
                "termination.sweep_interval must be greater than zero",
            ));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(AppError::configuration(
                "scheduler.tick_interval must be greater than zero",
            ));
        }
        if self.scheduler.creation_max_attempts == 0 {
            return Err(AppError::configuration(
                "scheduler.creation_max_attempts must be at least 1",
            ));
        }
        if self.scheduler.cooldown <= self.scheduler.early_window + self.scheduler.late_window {
            // Cooldown shorter than the window lets one occurrence fire twice
            tracing::warn!(
                "scheduler.cooldown ({:?}) does not exceed the trigger window ({:?} + {:?})",
                self.scheduler.cooldown,
                self.scheduler.early_window,
                self.scheduler.late_window
            );
        }

        Ok(())
    }
}
