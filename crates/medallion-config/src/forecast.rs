//! Forecasting scenario configuration.
//!
//! One immutable record per notebook run: scenario identity, column roles
//! and model hyperparameters. Every constructor validates, so a
//! `ForecastConfig` obtained from [`ForecastConfig::builder`] or
//! [`ForecastConfig::from_toml_str`] is always usable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastConfigError {
    #[error("forecast config field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("failed to parse forecast config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read forecast config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ForecastConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeGranularity::Daily => write!(f, "daily"),
            TimeGranularity::Weekly => write!(f, "weekly"),
            TimeGranularity::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    LightGbm,
    Prophet,
    Croston,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::LightGbm => write!(f, "lightgbm"),
            ModelType::Prophet => write!(f, "prophet"),
            ModelType::Croston => write!(f, "croston"),
        }
    }
}

/// A validated forecasting scenario. Deserialization goes through the same
/// checks as [`ForecastConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawForecastConfig")]
#[non_exhaustive]
pub struct ForecastConfig {
    // Scenario
    pub scenario_name: String,
    pub workspace_name: String,
    pub lakehouse_name: String,

    // Column roles
    pub time_col: String,
    pub target_col: String,
    pub id_col: String,

    // Forecasting
    pub forecast_horizon: u32,
    pub time_granularity: TimeGranularity,
    pub train_test_split_ratio: f64,

    // Feature engineering
    pub lag_periods: Vec<u32>,
    pub rolling_windows: Vec<u32>,
    pub calendar_features: bool,
    #[serde(serialize_with = "serialize_country")]
    pub holiday_country: Option<String>,

    // Model
    pub model_type: ModelType,
    pub n_estimators: u32,
    pub learning_rate: f64,
    pub early_stopping_rounds: u32,

    // Hyperparameter search
    pub optuna_n_trials: u32,
    pub optuna_timeout_secs: u64,

    // Clustering
    pub n_clusters: u32,
    pub clustering_features: Vec<String>,

    // Data quality thresholds
    pub max_null_ratio: f64,
    pub min_history_periods: usize,
    pub min_series_count: usize,

    /// Defaults to the scenario name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_table_prefix: Option<String>,

    pub generated_at: DateTime<Utc>,
}

/// Wire shape of [`ForecastConfig`]; every field a TOML file may set.
#[derive(Deserialize)]
struct RawForecastConfig {
    // Scenario
    scenario_name: String,
    workspace_name: String,
    lakehouse_name: String,

    // Column roles
    time_col: String,
    target_col: String,
    id_col: String,

    // Forecasting
    #[serde(default = "default_horizon")]
    forecast_horizon: u32,
    #[serde(default = "default_granularity")]
    time_granularity: TimeGranularity,
    #[serde(default = "default_split_ratio")]
    train_test_split_ratio: f64,

    // Feature engineering
    #[serde(default = "default_lag_periods")]
    lag_periods: Vec<u32>,
    #[serde(default = "default_rolling_windows")]
    rolling_windows: Vec<u32>,
    #[serde(default = "default_true")]
    calendar_features: bool,
    #[serde(
        default = "default_holiday_country",
        deserialize_with = "deserialize_country"
    )]
    holiday_country: Option<String>,

    // Model
    #[serde(default = "default_model_type")]
    model_type: ModelType,
    #[serde(default = "default_n_estimators")]
    n_estimators: u32,
    #[serde(default = "default_learning_rate")]
    learning_rate: f64,
    #[serde(default = "default_early_stopping")]
    early_stopping_rounds: u32,

    // Hyperparameter search
    #[serde(default = "default_n_trials")]
    optuna_n_trials: u32,
    #[serde(default = "default_optuna_timeout")]
    optuna_timeout_secs: u64,

    // Clustering
    #[serde(default = "default_n_clusters")]
    n_clusters: u32,
    #[serde(default = "default_clustering_features")]
    clustering_features: Vec<String>,

    // Data quality thresholds
    #[serde(default = "default_max_null_ratio")]
    max_null_ratio: f64,
    #[serde(default = "default_min_history")]
    min_history_periods: usize,
    #[serde(default = "default_min_series")]
    min_series_count: usize,

    #[serde(default)]
    output_table_prefix: Option<String>,
}

fn default_horizon() -> u32 {
    12
}
fn default_granularity() -> TimeGranularity {
    TimeGranularity::Monthly
}
fn default_split_ratio() -> f64 {
    0.8
}
fn default_lag_periods() -> Vec<u32> {
    vec![1, 3, 6, 12]
}
fn default_rolling_windows() -> Vec<u32> {
    vec![3, 6, 12]
}
fn default_true() -> bool {
    true
}
fn default_holiday_country() -> Option<String> {
    Some("US".to_string())
}
fn default_model_type() -> ModelType {
    ModelType::LightGbm
}
fn default_n_estimators() -> u32 {
    500
}
fn default_learning_rate() -> f64 {
    0.05
}
fn default_early_stopping() -> u32 {
    50
}
fn default_n_trials() -> u32 {
    50
}
fn default_optuna_timeout() -> u64 {
    600
}
fn default_n_clusters() -> u32 {
    5
}
fn default_clustering_features() -> Vec<String> {
    ["cv2", "adi", "mean_demand", "trend_strength"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_null_ratio() -> f64 {
    0.1
}
fn default_min_history() -> usize {
    24
}
fn default_min_series() -> usize {
    1
}

// TOML has no null; "" or "none" disables holiday features.
fn serialize_country<S>(country: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(country.as_deref().unwrap_or("none"))
}

fn deserialize_country<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

impl TryFrom<RawForecastConfig> for ForecastConfig {
    type Error = ForecastConfigError;

    fn try_from(raw: RawForecastConfig) -> Result<Self, Self::Error> {
        let config = ForecastConfig {
            scenario_name: raw.scenario_name,
            workspace_name: raw.workspace_name,
            lakehouse_name: raw.lakehouse_name,
            time_col: raw.time_col,
            target_col: raw.target_col,
            id_col: raw.id_col,
            forecast_horizon: raw.forecast_horizon,
            time_granularity: raw.time_granularity,
            train_test_split_ratio: raw.train_test_split_ratio,
            lag_periods: raw.lag_periods,
            rolling_windows: raw.rolling_windows,
            calendar_features: raw.calendar_features,
            holiday_country: raw.holiday_country,
            model_type: raw.model_type,
            n_estimators: raw.n_estimators,
            learning_rate: raw.learning_rate,
            early_stopping_rounds: raw.early_stopping_rounds,
            optuna_n_trials: raw.optuna_n_trials,
            optuna_timeout_secs: raw.optuna_timeout_secs,
            n_clusters: raw.n_clusters,
            clustering_features: raw.clustering_features,
            max_null_ratio: raw.max_null_ratio,
            min_history_periods: raw.min_history_periods,
            min_series_count: raw.min_series_count,
            output_table_prefix: raw.output_table_prefix,
            generated_at: Utc::now(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl ForecastConfig {
    /// Start a config with the required identity and column roles; every
    /// other parameter takes the template default.
    pub fn builder(
        scenario_name: impl Into<String>,
        workspace_name: impl Into<String>,
        lakehouse_name: impl Into<String>,
    ) -> ForecastConfigBuilder {
        ForecastConfigBuilder {
            config: ForecastConfig {
                scenario_name: scenario_name.into(),
                workspace_name: workspace_name.into(),
                lakehouse_name: lakehouse_name.into(),
                time_col: String::new(),
                target_col: String::new(),
                id_col: String::new(),
                forecast_horizon: default_horizon(),
                time_granularity: default_granularity(),
                train_test_split_ratio: default_split_ratio(),
                lag_periods: default_lag_periods(),
                rolling_windows: default_rolling_windows(),
                calendar_features: true,
                holiday_country: default_holiday_country(),
                model_type: default_model_type(),
                n_estimators: default_n_estimators(),
                learning_rate: default_learning_rate(),
                early_stopping_rounds: default_early_stopping(),
                optuna_n_trials: default_n_trials(),
                optuna_timeout_secs: default_optuna_timeout(),
                n_clusters: default_n_clusters(),
                clustering_features: default_clustering_features(),
                max_null_ratio: default_max_null_ratio(),
                min_history_periods: default_min_history(),
                min_series_count: default_min_series(),
                output_table_prefix: None,
                generated_at: Utc::now(),
            },
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ForecastConfigError> {
        let raw: RawForecastConfig = toml::from_str(content)?;
        Self::try_from(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForecastConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ForecastConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn output_table_prefix(&self) -> &str {
        self.output_table_prefix
            .as_deref()
            .unwrap_or(&self.scenario_name)
    }

    /// Output table for a pipeline stage, e.g. `table_name("prepared")`.
    pub fn table_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.output_table_prefix(), suffix)
    }

    pub fn validate(&self) -> Result<(), ForecastConfigError> {
        for (field, value) in [
            ("scenario_name", &self.scenario_name),
            ("workspace_name", &self.workspace_name),
            ("lakehouse_name", &self.lakehouse_name),
            ("time_col", &self.time_col),
            ("target_col", &self.target_col),
            ("id_col", &self.id_col),
        ] {
            if value.trim().is_empty() {
                return Err(ForecastConfigError::invalid(field, "must not be empty"));
            }
        }

        if self.forecast_horizon == 0 {
            return Err(ForecastConfigError::invalid(
                "forecast_horizon",
                "must be greater than 0",
            ));
        }

        let ratio = self.train_test_split_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(ForecastConfigError::invalid(
                "train_test_split_ratio",
                format!("must be strictly between 0 and 1, got {}", ratio),
            ));
        }

        for (field, values) in [
            ("lag_periods", &self.lag_periods),
            ("rolling_windows", &self.rolling_windows),
        ] {
            if values.is_empty() {
                return Err(ForecastConfigError::invalid(field, "must not be empty"));
            }
            if values.contains(&0) {
                return Err(ForecastConfigError::invalid(
                    field,
                    "periods must be positive",
                ));
            }
        }

        if !(self.learning_rate > 0.0) {
            return Err(ForecastConfigError::invalid(
                "learning_rate",
                "must be greater than 0",
            ));
        }

        if self.n_clusters == 0 {
            return Err(ForecastConfigError::invalid(
                "n_clusters",
                "must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.max_null_ratio) {
            return Err(ForecastConfigError::invalid(
                "max_null_ratio",
                format!("must be within [0, 1], got {}", self.max_null_ratio),
            ));
        }

        if let Some(prefix) = &self.output_table_prefix {
            if prefix.trim().is_empty() {
                return Err(ForecastConfigError::invalid(
                    "output_table_prefix",
                    "must not be empty when set",
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for ForecastConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Forecasting: {} ===", self.scenario_name)?;
        writeln!(f, "  Workspace: {}", self.workspace_name)?;
        writeln!(f, "  Lakehouse: {}", self.lakehouse_name)?;
        writeln!(
            f,
            "  Target: {}, ID: {}, Time: {}",
            self.target_col, self.id_col, self.time_col
        )?;
        writeln!(
            f,
            "  Horizon: {} {} periods",
            self.forecast_horizon, self.time_granularity
        )?;
        writeln!(f, "  Model: {}", self.model_type)?;
        write!(
            f,
            "  Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Builder for [`ForecastConfig`]; `build` runs validation.
#[derive(Debug, Clone)]
pub struct ForecastConfigBuilder {
    config: ForecastConfig,
}

impl ForecastConfigBuilder {
    pub fn columns(
        mut self,
        time_col: impl Into<String>,
        target_col: impl Into<String>,
        id_col: impl Into<String>,
    ) -> Self {
        self.config.time_col = time_col.into();
        self.config.target_col = target_col.into();
        self.config.id_col = id_col.into();
        self
    }

    pub fn horizon(mut self, periods: u32, granularity: TimeGranularity) -> Self {
        self.config.forecast_horizon = periods;
        self.config.time_granularity = granularity;
        self
    }

    pub fn train_test_split_ratio(mut self, ratio: f64) -> Self {
        self.config.train_test_split_ratio = ratio;
        self
    }

    pub fn lag_periods(mut self, lags: Vec<u32>) -> Self {
        self.config.lag_periods = lags;
        self
    }

    pub fn rolling_windows(mut self, windows: Vec<u32>) -> Self {
        self.config.rolling_windows = windows;
        self
    }

    pub fn calendar_features(mut self, enabled: bool) -> Self {
        self.config.calendar_features = enabled;
        self
    }

    pub fn holiday_country(mut self, country: Option<String>) -> Self {
        self.config.holiday_country = country;
        self
    }

    pub fn model(mut self, model_type: ModelType) -> Self {
        self.config.model_type = model_type;
        self
    }

    pub fn boosting(mut self, n_estimators: u32, learning_rate: f64, early_stopping: u32) -> Self {
        self.config.n_estimators = n_estimators;
        self.config.learning_rate = learning_rate;
        self.config.early_stopping_rounds = early_stopping;
        self
    }

    pub fn tuning(mut self, n_trials: u32, timeout_secs: u64) -> Self {
        self.config.optuna_n_trials = n_trials;
        self.config.optuna_timeout_secs = timeout_secs;
        self
    }

    pub fn clustering(mut self, n_clusters: u32, features: Vec<String>) -> Self {
        self.config.n_clusters = n_clusters;
        self.config.clustering_features = features;
        self
    }

    pub fn quality_thresholds(
        mut self,
        max_null_ratio: f64,
        min_history_periods: usize,
        min_series_count: usize,
    ) -> Self {
        self.config.max_null_ratio = max_null_ratio;
        self.config.min_history_periods = min_history_periods;
        self.config.min_series_count = min_series_count;
        self
    }

    pub fn output_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_table_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<ForecastConfig, ForecastConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
