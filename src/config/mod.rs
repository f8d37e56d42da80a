//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup and fails fast on invalid values. Paths and
//! observability come from the environment; runner budgets, folder names and
//! the roster time zone come from the file named by `CREWSHEET_CONFIG`.

use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::runner::RunnerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file holding checkpoints, leases and scheduled tasks.
    pub db_path: PathBuf,
    /// JSON file holding the local spreadsheet workspace.
    pub workspace_path: PathBuf,
    pub settings: Settings,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let settings = match optional_var("CREWSHEET_CONFIG") {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        settings.validate()?;

        Ok(Self {
            db_path: optional_var("CREWSHEET_DB")
                .unwrap_or_else(|| "crewsheet.db".to_string())
                .into(),
            workspace_path: optional_var("CREWSHEET_WORKSPACE")
                .unwrap_or_else(|| "workspace.json".to_string())
                .into(),
            settings,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// File settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runner: RunnerConfig,
    pub folders: FolderNames,
    /// Offset of the roster's local time zone from UTC.
    pub utc_offset_minutes: i32,
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            folders: FolderNames::default(),
            utc_offset_minutes: 8 * 60,
            dispatch: DispatchSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        let runner = &self.runner;
        if runner.budget_ms == 0 {
            return Err(Error::Config("runner.budget_ms must be positive".into()));
        }
        if runner.continuation_delay_ms == 0 {
            return Err(Error::Config(
                "runner.continuation_delay_ms must be positive".into(),
            ));
        }
        if runner.lease_ttl_ms <= runner.budget_ms {
            return Err(Error::Config(format!(
                "runner.lease_ttl_ms ({}) must exceed runner.budget_ms ({})",
                runner.lease_ttl_ms, runner.budget_ms
            )));
        }
        if self.dispatch.poll_interval_ms == 0 {
            return Err(Error::Config("dispatch.poll_interval_ms must be positive".into()));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Names of the well-known folders and files in the drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderNames {
    pub main: String,
    pub individuals: String,
    pub events: String,
    pub availability: String,
    pub rostering: String,
    pub master_file: String,
    pub master_sheet: String,
    pub yearly_availability: String,
    pub yearly_roster: String,
}

impl Default for FolderNames {
    fn default() -> Self {
        Self {
            main: "ESS Main Folder".into(),
            individuals: "Individuals".into(),
            events: "1. Events (OTH) - Quotations x Timesheet x Invoice x Payout".into(),
            availability: "Availability".into(),
            rostering: "Rostering".into(),
            master_file: "Event Crew".into(),
            master_sheet: "Sheet1".into(),
            yearly_availability: "Yearly Availability".into(),
            yearly_roster: "Yearly Roster Mastersheet".into(),
        }
    }
}

impl FolderNames {
    pub fn year_folder(&self, year: i32) -> String {
        format!("ESS {year}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// How often the dispatcher looks for due continuations.
    pub poll_interval_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        settings.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            utc_offset_minutes = 0

            [runner]
            budget_ms = 60000

            [folders]
            main = "Crew Root"
            "#,
        )
        .unwrap();
        assert_eq!(settings.runner.budget_ms, 60_000);
        assert_eq!(settings.runner.continuation_delay_ms, 120_000);
        assert_eq!(settings.folders.main, "Crew Root");
        assert_eq!(settings.folders.individuals, "Individuals");
        assert_eq!(settings.utc_offset().unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn lease_shorter_than_budget_is_rejected() {
        let mut settings = Settings::default();
        settings.runner.lease_ttl_ms = settings.runner.budget_ms;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn absurd_offset_is_rejected() {
        let settings = Settings {
            utc_offset_minutes: 24 * 60,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
