//! AutoLT configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AutoLtError, Result};
use crate::types::{JobSet, PipelineKind};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutoLtConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AutoLtConfig {
    /// Load config from the default path (~/.autolt/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutoLtError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutoLtError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bad values up front - in particular an unknown pipeline kind,
    /// which must never surface in the middle of a run.
    pub fn validate(&self) -> Result<()> {
        PipelineKind::from_str(&self.schedule.default_pipeline)?;
        if self.schedule.start_hour > 23 || self.schedule.cutoff_hour > 23 {
            return Err(AutoLtError::Config(
                "schedule hours must be within 0..=23".into(),
            ));
        }
        if self.schedule.window_hours == 0 || self.schedule.window_hours > 24 {
            return Err(AutoLtError::Config(
                "schedule.window_hours must be within 1..=24".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AutoLT home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autolt")
    }
}

/// Issue tracker (Jira-style) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    /// Query used by the sync step to pull pending work.
    #[serde(default = "default_jql")]
    pub jql: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_jql() -> String {
    "project = EKPLT AND labels = AutoLT AND status = Open ORDER BY created ASC".into()
}
fn default_max_results() -> u32 {
    100
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            api_token: String::new(),
            jql: default_jql(),
            max_results: default_max_results(),
        }
    }
}

/// Build server connection + job-name mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub jobs: JobNames,
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            token: String::new(),
            timeout_secs: default_http_timeout_secs(),
            jobs: JobNames::default(),
        }
    }
}

/// Names of the external jobs each pipeline drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobNames {
    #[serde(default = "default_ekp_starter")]
    pub ekp_starter: String,
    #[serde(default = "default_ekp_test")]
    pub ekp_test: String,
    #[serde(default = "default_infosrv_starter")]
    pub infosrv_starter: String,
    #[serde(default = "default_infosrv_test")]
    pub infosrv_test: String,
    /// Deploy job, shared by both pipeline kinds.
    #[serde(default = "default_deploy")]
    pub deploy: String,
    /// Report job, shared by both pipeline kinds.
    #[serde(default = "default_report")]
    pub report: String,
}

fn default_ekp_starter() -> String {
    "Start_EKP_pipe".into()
}
fn default_ekp_test() -> String {
    "test-project-build".into()
}
fn default_infosrv_starter() -> String {
    "Start_infosrv_pipe".into()
}
fn default_infosrv_test() -> String {
    "infosrv_only".into()
}
fn default_deploy() -> String {
    "job.deploy".into()
}
fn default_report() -> String {
    "create_report".into()
}

impl Default for JobNames {
    fn default() -> Self {
        Self {
            ekp_starter: default_ekp_starter(),
            ekp_test: default_ekp_test(),
            infosrv_starter: default_infosrv_starter(),
            infosrv_test: default_infosrv_test(),
            deploy: default_deploy(),
            report: default_report(),
        }
    }
}

impl JobNames {
    /// Starter + primary test job pair for one pipeline kind.
    pub fn job_set(&self, kind: PipelineKind) -> JobSet {
        match kind {
            PipelineKind::Ekp => JobSet {
                starter: self.ekp_starter.clone(),
                primary_test: self.ekp_test.clone(),
            },
            PipelineKind::Infosrv => JobSet {
                starter: self.infosrv_starter.clone(),
                primary_test: self.infosrv_test.clone(),
            },
        }
    }
}

/// Slot template: a fixed-duration window at a fixed hour of day, scanned
/// forward day by day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hour of day a window opens (19 = 19:00 UTC).
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    /// Window duration in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// Past this hour "today" no longer offers a window.
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
    /// How many days ahead the allocator scans before giving up.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Pipeline kind assumed for tasks the tracker does not label.
    #[serde(default = "default_pipeline")]
    pub default_pipeline: String,
}

fn default_start_hour() -> u32 {
    19
}
fn default_window_hours() -> u32 {
    4
}
fn default_cutoff_hour() -> u32 {
    23
}
fn default_horizon_days() -> u32 {
    30
}
fn default_pipeline() -> String {
    "EKP".into()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            window_hours: default_window_hours(),
            cutoff_hour: default_cutoff_hour(),
            horizon_days: default_horizon_days(),
            default_pipeline: default_pipeline(),
        }
    }
}

impl ScheduleConfig {
    pub fn default_pipeline_kind(&self) -> Result<PipelineKind> {
        PipelineKind::from_str(&self.default_pipeline)
    }
}

/// Phase timings. All waits run through tokio, so sub-second values are
/// honored - tests rely on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Unconditional environment warm-up before each test phase.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
    /// Soak duration of each test phase.
    #[serde(default = "default_soak_secs")]
    pub soak_secs: u64,
    /// Poll interval while waiting out the deploy job.
    #[serde(default = "default_deploy_poll_secs")]
    pub deploy_poll_secs: u64,
    /// Upper bound on the deploy wait. Exceeding it is logged, not fatal.
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,
}

fn default_warmup_secs() -> u64 {
    30 * 60
}
fn default_soak_secs() -> u64 {
    60 * 60
}
fn default_deploy_poll_secs() -> u64 {
    30
}
fn default_deploy_timeout_secs() -> u64 {
    60 * 60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            warmup_secs: default_warmup_secs(),
            soak_secs: default_soak_secs(),
            deploy_poll_secs: default_deploy_poll_secs(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }
    pub fn soak(&self) -> Duration {
        Duration::from_secs(self.soak_secs)
    }
    pub fn deploy_poll(&self) -> Duration {
        Duration::from_secs(self.deploy_poll_secs)
    }
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}

/// Where the SQLite store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    AutoLtConfig::home_dir()
        .join("autolt.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
