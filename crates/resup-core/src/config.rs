use crate::control::CancelToken;
use crate::retry::{
    CompositeRetryPolicy, ExponentialBackoffPolicy, LimitedAttemptsRetryPolicy,
    LimitedTimeRetryPolicy, Retrier, RetryPolicy,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default chunk size: 8 MiB (32 x 256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Largest accepted chunk size: 1 GiB. A stream buffers one chunk in memory.
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("chunk_size_bytes must be positive")]
    ZeroChunkSize,
    #[error("chunk_size_bytes must be at most {MAX_CHUNK_SIZE} (got {0})")]
    ChunkTooLarge(usize),
    #[error("retry section must set max_attempts or max_duration_secs")]
    UnboundedRetry,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("retry.max_duration_secs must be greater than zero")]
    ZeroRetryDuration,
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    BadDuration { field: &'static str, value: f64 },
    #[error("backoff.scaling must be at least 1.0 (got {0})")]
    BadScaling(f64),
    #[error("backoff.jitter must be between 0.0 and 1.0 (got {0})")]
    BadJitter(f64),
}

/// Retry limits. Both limits apply when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (including the first).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Maximum time spent retrying one call, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(8),
            max_duration_secs: Some(900.0),
        }
    }
}

impl RetryConfig {
    pub fn build_policy(&self) -> Box<dyn RetryPolicy> {
        let duration = self.max_duration_secs.map(secs_to_duration);
        match (self.max_attempts, duration) {
            (Some(n), Some(d)) => Box::new(CompositeRetryPolicy::attempts_or_duration(n, d)),
            (Some(n), None) => Box::new(LimitedAttemptsRetryPolicy::new(n)),
            (None, Some(d)) => Box::new(LimitedTimeRetryPolicy::new(d)),
            (None, None) => {
                let fallback = RetryConfig::default().max_attempts.unwrap_or(1);
                Box::new(LimitedAttemptsRetryPolicy::new(fallback))
            }
        }
    }
}

/// Jittered exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay bound after the first failure, in seconds (e.g. 0.25 = 250ms).
    pub initial_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: f64,
    /// Growth factor between consecutive attempts.
    pub scaling: f64,
    /// Fraction of each delay that is randomized away.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1.0,
            max_delay_secs: 300.0,
            scaling: 2.0,
            jitter: 0.5,
        }
    }
}

impl BackoffConfig {
    pub fn build_policy(&self) -> ExponentialBackoffPolicy {
        ExponentialBackoffPolicy::new(
            secs_to_duration(self.initial_delay_secs),
            secs_to_duration(self.max_delay_secs),
            self.scaling,
        )
        .with_jitter(self.jitter)
    }
}

/// Global configuration loaded from `~/.config/resup/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size in bytes; rounded up to the transport's alignment.
    pub chunk_size_bytes: usize,
    /// Root directory of the local object service (CLI only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            storage_root: None,
            retry: RetryConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge(self.chunk_size_bytes));
        }
        match (self.retry.max_attempts, self.retry.max_duration_secs) {
            (None, None) => return Err(ConfigError::UnboundedRetry),
            (Some(0), _) => return Err(ConfigError::ZeroAttempts),
            _ => {}
        }
        if let Some(d) = self.retry.max_duration_secs {
            check_secs("retry.max_duration_secs", d)?;
            if d == 0.0 {
                return Err(ConfigError::ZeroRetryDuration);
            }
        }
        check_secs("backoff.initial_delay_secs", self.backoff.initial_delay_secs)?;
        check_secs("backoff.max_delay_secs", self.backoff.max_delay_secs)?;
        if !(self.backoff.scaling >= 1.0) || !self.backoff.scaling.is_finite() {
            return Err(ConfigError::BadScaling(self.backoff.scaling));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::BadJitter(self.backoff.jitter));
        }
        Ok(())
    }

    /// Retrier for one stream or session, optionally tied to a cancel token.
    pub fn build_retrier(&self, cancel: Option<CancelToken>) -> Retrier {
        let retrier = Retrier::from_parts(
            self.retry.build_policy(),
            Arc::new(self.backoff.build_policy()),
        );
        match cancel {
            Some(token) => retrier.with_cancel(token),
            None => retrier,
        }
    }
}

fn check_secs(field: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::BadDuration { field, value })
    }
}

/// Out-of-range values (rejected by `validate`) collapse to zero here.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("resup")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Default root of the local object service: `~/.local/share/resup/storage`.
pub fn default_storage_root() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("resup")?;
    Ok(xdg_dirs.get_data_home().join("resup").join("storage"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<UploadConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = UploadConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: UploadConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
