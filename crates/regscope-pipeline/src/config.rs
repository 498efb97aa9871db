//! Pipeline configuration
//!
//! Loaded from TOML, then overridden by `REGSCOPE_*` environment
//! variables. Every field has a default, so a file may set only what it
//! changes.

use crate::error::PipelineError;
use regscope_analysis::{AnalysisConfig, RateLimit};
use regscope_core::SnapshotDate;
use regscope_store::{atomic, DataDir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_DATA_DIR: &str = "REGSCOPE_DATA_DIR";
pub const ENV_WORKERS: &str = "REGSCOPE_WORKERS";
pub const ENV_RATE_TIER: &str = "REGSCOPE_RATE_TIER";

/// Quota of the remote capability key in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateTier {
    #[default]
    Trial,
    Production,
    Custom(RateLimit),
}

impl RateTier {
    #[must_use]
    pub fn limit(&self) -> RateLimit {
        match self {
            Self::Trial => RateLimit::TRIAL,
            Self::Production => RateLimit::PRODUCTION,
            Self::Custom(limit) => *limit,
        }
    }
}

impl FromStr for RateTier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trial" => Ok(Self::Trial),
            "production" => Ok(Self::Production),
            other => Err(PipelineError::Configuration(format!(
                "unknown rate tier '{other}', expected trial or production"
            ))),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of all persisted state
    pub data_dir: PathBuf,
    /// Snapshot to run against; latest on disk when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_date: Option<SnapshotDate>,
    /// Units processed concurrently
    pub workers: usize,
    pub rate_tier: RateTier,
    /// Re-fetch documents whose workspace already exists
    pub ingest_refresh: bool,
    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_date: None,
            workers: 4,
            rate_tier: RateTier::default(),
            ingest_refresh: false,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl PipelineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_snapshot_date(mut self, date: SnapshotDate) -> Self {
        self.snapshot_date = Some(date);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rate_tier(mut self, tier: RateTier) -> Self {
        self.rate_tier = tier;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ingest_refresh(mut self, refresh: bool) -> Self {
        self.ingest_refresh = refresh;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    #[must_use]
    pub fn data(&self) -> DataDir {
        DataDir::new(&self.data_dir)
    }

    /// Read `path`, apply environment overrides and validate
    ///
    /// # Errors
    /// [`PipelineError::Configuration`] if the file is missing or
    /// malformed, an override does not parse, or the result is invalid
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let config: Self = atomic::read_toml(path)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            .ok_or_else(|| {
                PipelineError::Configuration(format!("config file {} not found", path.display()))
            })?;
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply `REGSCOPE_*` overrides found through `lookup`
    ///
    /// # Errors
    /// [`PipelineError::Configuration`] if an override does not parse
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PipelineError> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers.trim().parse().map_err(|_| {
                PipelineError::Configuration(format!("{ENV_WORKERS}='{workers}' is not a count"))
            })?;
        }
        if let Some(tier) = lookup(ENV_RATE_TIER) {
            self.rate_tier = tier.parse()?;
        }
        Ok(self)
    }

    /// # Errors
    /// [`PipelineError::Configuration`] describing the first problem found
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::Configuration(
                "workers must be positive".to_string(),
            ));
        }
        if !self.rate_tier.limit().is_valid() {
            return Err(PipelineError::Configuration(format!(
                "rate limit {:?} must allow at least one call and one token per minute",
                self.rate_tier.limit()
            )));
        }
        self.analysis.validate()?;
        Ok(())
    }
}
