//! Run configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate};
use harvester_core::{Period, RetryPolicy};
use serde::Deserialize;

/// Knobs for one harvest run. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Worker pool size of each parallel stage
    pub max_workers_per_stage: usize,
    /// Rate for operation classes without an override
    pub default_requests_per_second: f64,
    /// Per-operation-class overrides (class = endpoint operation name)
    pub requests_per_second: BTreeMap<String, f64>,
    pub page_size: usize,
    /// `None` = unbounded primary map
    pub primary_map_capacity: Option<usize>,
    pub per_request_timeout_secs: u64,
    /// `None` = no overall deadline
    pub total_run_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
    /// Hard page cap per combination, on top of the halt rules
    pub max_pages_per_partition: Option<usize>,
    /// Log a progress line every N completed tasks (non-TTY)
    pub progress_every: usize,
    /// Keep only combinations with these category codes (empty = all)
    pub category_filter: Vec<String>,
    /// Period passed to the resolved-id detail stages (default: previous month)
    pub reporting_period: Option<Period>,
    pub output_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_workers_per_stage: 8,
            default_requests_per_second: 5.0,
            requests_per_second: BTreeMap::new(),
            page_size: 100,
            primary_map_capacity: None,
            per_request_timeout_secs: 30,
            total_run_timeout_secs: None,
            retry: RetryPolicy::default(),
            max_pages_per_partition: None,
            progress_every: 100,
            category_filter: Vec::new(),
            reporting_period: None,
            output_dir: PathBuf::from("./data"),
        }
    }
}

/// Fatal configuration problem: the run aborts before any stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { field: String, reason: String },
    MissingCredential(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
            Self::MissingCredential(name) => write!(f, "missing credential {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers_per_stage == 0 {
            return Err(invalid("max_workers_per_stage", "must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "must be at least 1"));
        }
        if self.per_request_timeout_secs == 0 {
            return Err(invalid("per_request_timeout_secs", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !valid_rate(self.default_requests_per_second) {
            return Err(invalid(
                "default_requests_per_second",
                "must be a non-negative number",
            ));
        }
        if let Some((class, _)) = self
            .requests_per_second
            .iter()
            .find(|(_, rps)| !valid_rate(**rps))
        {
            return Err(invalid(
                &format!("requests_per_second.{class}"),
                "must be a non-negative number",
            ));
        }
        if let Some(period) = &self.reporting_period {
            if period.start > period.end {
                return Err(invalid(
                    "reporting_period",
                    format!("start {} is after end {}", period.start, period.end),
                ));
            }
        }
        Ok(())
    }

    pub fn per_request_timeout(&self) -> Duration {
        Duration::from_secs(self.per_request_timeout_secs)
    }

    pub fn total_run_timeout(&self) -> Option<Duration> {
        self.total_run_timeout_secs.map(Duration::from_secs)
    }

    /// Configured period, or the calendar month before `today`
    pub fn period_or_default(&self, today: NaiveDate) -> Period {
        self.reporting_period
            .unwrap_or_else(|| previous_month(today))
    }
}

// 0 disables limiting for the class
fn valid_rate(rps: f64) -> bool {
    rps.is_finite() && rps >= 0.0
}

/// First to last day of the calendar month before `today`
pub fn previous_month(today: NaiveDate) -> Period {
    let first_of_month = today - Days::new(u64::from(today.day0()));
    let end = first_of_month - Days::new(1);
    let start = end - Days::new(u64::from(end.day0()));
    Period { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let config = HarvestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_map_capacity, None);
        assert_eq!(config.per_request_timeout(), Duration::from_secs(30));
        assert_eq!(config.total_run_timeout(), None);
    }

    #[test]
    fn rejects_zero_workers() {
        let config = HarvestConfig {
            max_workers_per_stage: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_workers_per_stage"));
    }

    #[test]
    fn rejects_negative_class_rate() {
        let mut config = HarvestConfig::default();
        config.requests_per_second.insert("list".into(), -1.0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid requests_per_second.list: must be a non-negative number");
    }

    #[test]
    fn rejects_inverted_period() {
        let config = HarvestConfig {
            reporting_period: Some(Period {
                start: date(2025, 2, 1),
                end: date(2025, 1, 1),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn previous_month_bounds() {
        let p = previous_month(date(2025, 3, 15));
        assert_eq!((p.start, p.end), (date(2025, 2, 1), date(2025, 2, 28)));
        let p = previous_month(date(2025, 1, 1));
        assert_eq!((p.start, p.end), (date(2024, 12, 1), date(2024, 12, 31)));
        let p = previous_month(date(2024, 3, 31));
        assert_eq!((p.start, p.end), (date(2024, 2, 1), date(2024, 2, 29)));
    }

    #[test]
    fn parse_from_toml() {
        let config: HarvestConfig = toml::from_str(
            r#"
max_workers_per_stage = 4
primary_map_capacity = 500
category_filter = ["15", "12"]

[requests_per_second]
list = 2.0

[retry]
max_attempts = 6
base_delay_ms = 500

[reporting_period]
start = "2025-01-01"
end = "2025-01-31"
"#,
        )
        .unwrap();
        assert_eq!(config.max_workers_per_stage, 4);
        assert_eq!(config.primary_map_capacity, Some(500));
        assert_eq!(config.requests_per_second["list"], 2.0);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.page_size, 100);
        assert_eq!(
            config.period_or_default(date(2030, 1, 1)).end,
            date(2025, 1, 31)
        );
    }
}
