//! Command-line definitions.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use thermocal_core::types::Action;

use crate::service::ServiceMode;

/// Thermocal: drive thermostats from tagged calendar entries.
#[derive(Parser, Debug)]
#[command(name = "thermocal", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reconcile the calendar and execute due actions on a schedule.
    Service {
        #[arg(long, value_enum, default_value_t = ServiceMode::Both)]
        mode: ServiceMode,

        /// Minutes between cycles; overrides `service.poll_minutes`.
        #[arg(long)]
        poll: Option<u64>,

        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print cached or live state.
    Show {
        #[arg(value_enum)]
        target: ShowTarget,
    },
    /// Drive the structure to `home` or `away` now, outside the schedule.
    Set {
        #[arg(value_parser = parse_action)]
        action: Action,
    },
    /// Write a default config file if none exists.
    Init,
}

fn parse_action(value: &str) -> Result<Action, String> {
    value.to_ascii_lowercase().parse()
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    /// Every cached record.
    Cache,
    /// Records scheduled within the lookback window.
    Events,
    /// Thermostats, refreshed from the device API.
    Devices,
    /// Effective settings with secrets masked.
    Config,
}

impl CliArgs {
    /// Priority: --config flag > THERMOCAL_CONFIG env var > ~/.thermocal/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("THERMOCAL_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Poll interval in minutes: `--poll` if given and non-zero, else the
    /// configured value.
    pub fn resolve_poll(&self, config_minutes: u64) -> u64 {
        match self.command {
            Command::Service {
                poll: Some(minutes),
                ..
            } if minutes > 0 => minutes,
            _ => config_minutes,
        }
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".thermocal").join("config.toml");
    }
    PathBuf::from("config.toml")
}
