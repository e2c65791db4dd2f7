use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ThermocalError};
use crate::types::Action;

/// Top-level configuration for thermocal.
///
/// Loaded from `~/.thermocal/config.toml` by default. Every component receives
/// the section it needs through its constructor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThermocalConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl ThermocalConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ThermocalConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_time_of_day("calendar.default_home_time", &self.calendar.default_home_time)?;
        parse_time_of_day("calendar.default_away_time", &self.calendar.default_away_time)?;
        self.calendar.timezone()?;

        if self.service.poll_minutes == 0 {
            return Err(ThermocalError::Config(
                "service.poll_minutes must be at least 1".to_string(),
            ));
        }

        if self.notifier.kind == NotifierKind::Mailgun {
            let missing: Vec<&str> = [
                ("mailgun_domain", &self.notifier.mailgun_domain),
                ("mailgun_api_key", &self.notifier.mailgun_api_key),
                ("to_address", &self.notifier.to_address),
                ("from_address", &self.notifier.from_address),
            ]
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| *k)
            .collect();
            if !missing.is_empty() {
                return Err(ThermocalError::Config(format!(
                    "notifier.kind = \"mailgun\" requires: {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Render the settings as `section.key = value` lines with secrets masked.
    pub fn describe(&self) -> String {
        fn show(value: &str) -> String {
            if value.is_empty() {
                "<EMPTY>".to_string()
            } else {
                value.to_string()
            }
        }
        fn mask(value: &str) -> String {
            if value.is_empty() {
                "<EMPTY>".to_string()
            } else {
                "<MASKED>".to_string()
            }
        }

        [
            format!("calendar.calendar_id = {}", show(&self.calendar.calendar_id)),
            format!("calendar.default_away_time = {}", self.calendar.default_away_time),
            format!("calendar.default_home_time = {}", self.calendar.default_home_time),
            format!("calendar.filter_tag = {}", show(&self.calendar.filter_tag)),
            format!("calendar.lookback_days = {}", self.calendar.lookback_days),
            format!("calendar.max_results = {}", self.calendar.max_results),
            format!("calendar.timezone = {}", self.calendar.timezone),
            format!("device.project_id = {}", mask(&self.device.project_id)),
            format!("device.structure = {}", show(&self.device.structure)),
            format!(
                "device.verification_wait_secs = {}",
                self.device.verification_wait_secs
            ),
            format!(
                "device.winter_home_min_celsius = {}",
                self.device.winter_home_min_celsius
            ),
            format!("general.data_dir = {}", self.general.data_dir),
            format!("general.debug = {}", self.general.debug),
            format!("general.log_level = {}", self.general.log_level),
            format!("general.token_file = {}", self.general.token_file),
            format!("notifier.kind = {}", self.notifier.kind),
            format!(
                "notifier.mailgun_api_key = {}",
                mask(&self.notifier.mailgun_api_key)
            ),
            format!("notifier.to_address = {}", show(&self.notifier.to_address)),
            format!(
                "service.execution_lookback_hours = {}",
                self.service.execution_lookback_hours
            ),
            format!("service.poll_minutes = {}", self.service.poll_minutes),
        ]
        .join("\n")
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

fn parse_time_of_day(key: &str, value: &str) -> Result<NaiveTime> {
    let valid_shape = value
        .split_once(':')
        .map(|(h, m)| {
            !h.is_empty()
                && h.len() <= 2
                && m.len() == 2
                && h.chars().all(|c| c.is_ascii_digit())
                && m.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false);
    if !valid_shape {
        return Err(ThermocalError::Config(format!(
            "{} ({}) not in correct format: H:mm",
            key, value
        )));
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| ThermocalError::Config(format!("{} ({}): {}", key, value, e)))
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite cache.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// OAuth authorized-user token file shared by the calendar and device clients.
    pub token_file: String,
    /// Log notifications instead of sending them.
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.thermocal/data".to_string(),
            log_level: "info".to_string(),
            token_file: "~/.thermocal/token.json".to_string(),
            debug: false,
        }
    }
}

/// Upstream calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub calendar_id: String,
    /// Free-text search tag selecting the entries thermocal cares about.
    pub filter_tag: String,
    pub max_results: u32,
    /// Days before today to include when listing entries.
    pub lookback_days: u32,
    /// Time of day (H:mm) assigned to all-day "home" entries.
    pub default_home_time: String,
    /// Time of day (H:mm) assigned to all-day "away" entries.
    pub default_away_time: String,
    /// IANA time zone for all-day entries and the listing window.
    pub timezone: String,
    pub api_base: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            filter_tag: "thermo".to_string(),
            max_results: 10,
            lookback_days: 2,
            default_home_time: "9:00".to_string(),
            default_away_time: "19:00".to_string(),
            timezone: "America/Denver".to_string(),
            api_base: "https://www.googleapis.com/calendar/v3".to_string(),
        }
    }
}

impl CalendarConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            ThermocalError::Config(format!("calendar.timezone ({}): {}", self.timezone, e))
        })
    }

    /// Time of day used for all-day entries of the given action.
    pub fn default_time_for(&self, action: Action) -> Result<NaiveTime> {
        match action {
            Action::Home => {
                parse_time_of_day("calendar.default_home_time", &self.default_home_time)
            }
            Action::Away => {
                parse_time_of_day("calendar.default_away_time", &self.default_away_time)
            }
        }
    }
}

/// Device API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Enterprise / project identifier used to build the API base URL.
    pub project_id: String,
    /// Label of the structure to control.
    pub structure: String,
    pub api_base: String,
    /// Minimum heat setpoint enforced by "home" during winter months.
    pub winter_home_min_celsius: f64,
    /// Pause after every successful API call.
    pub request_interval_ms: u64,
    /// Settle time between issuing commands and verifying them.
    pub verification_wait_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            structure: String::new(),
            api_base: "https://smartdevicemanagement.googleapis.com/v1".to_string(),
            winter_home_min_celsius: 20.0,
            request_interval_ms: 2000,
            verification_wait_secs: 20,
        }
    }
}

impl DeviceConfig {
    /// Base URL for the configured enterprise, without a trailing slash.
    pub fn enterprise_url(&self) -> String {
        format!(
            "{}/enterprises/{}",
            self.api_base.trim_end_matches('/'),
            self.project_id
        )
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub poll_minutes: u64,
    /// Waiting records older than this are no longer executed.
    pub execution_lookback_hours: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_minutes: 5,
            execution_lookback_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    Log,
    Mailgun,
}

impl std::fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifierKind::Log => write!(f, "log"),
            NotifierKind::Mailgun => write!(f, "mailgun"),
        }
    }
}

/// Cycle summary delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub mailgun_domain: String,
    pub mailgun_api_key: String,
    pub to_address: String,
    pub from_address: String,
}
