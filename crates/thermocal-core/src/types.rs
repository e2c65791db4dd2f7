//! Domain types shared by every thermocal crate.
//!
//! Action records, their lifecycle states, and the cached device topology.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Target device configuration requested by a calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Home,
    Away,
}

impl Action {
    pub const ALL: [Action; 2] = [Action::Home, Action::Away];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Home => write!(f, "home"),
            Action::Away => write!(f, "away"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(Action::Home),
            "away" => Ok(Action::Away),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

/// Lifecycle state of an action record.
///
/// `Waiting` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Waiting,
    Complete,
    Removed,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        match self {
            RecordState::Waiting => false,
            RecordState::Complete | RecordState::Removed => true,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Waiting => write!(f, "waiting"),
            RecordState::Complete => write!(f, "complete"),
            RecordState::Removed => write!(f, "removed"),
        }
    }
}

impl std::str::FromStr for RecordState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(RecordState::Waiting),
            "complete" => Ok(RecordState::Complete),
            "removed" => Ok(RecordState::Removed),
            _ => Err(format!("Unknown record state: {}", s)),
        }
    }
}

/// Thermostat HVAC mode, using the device API's wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HvacMode {
    Heat,
    Cool,
    #[serde(rename = "HEATCOOL")]
    HeatCool,
    Off,
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvacMode::Heat => write!(f, "HEAT"),
            HvacMode::Cool => write!(f, "COOL"),
            HvacMode::HeatCool => write!(f, "HEATCOOL"),
            HvacMode::Off => write!(f, "OFF"),
        }
    }
}

impl std::str::FromStr for HvacMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEAT" => Ok(HvacMode::Heat),
            "COOL" => Ok(HvacMode::Cool),
            "HEATCOOL" => Ok(HvacMode::HeatCool),
            "OFF" => Ok(HvacMode::Off),
            _ => Err(format!("Unknown HVAC mode: {}", s)),
        }
    }
}

/// Thermostat eco mode, using the device API's wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcoMode {
    #[serde(rename = "MANUAL_ECO")]
    ManualEco,
    #[serde(rename = "OFF")]
    Off,
}

impl fmt::Display for EcoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcoMode::ManualEco => write!(f, "MANUAL_ECO"),
            EcoMode::Off => write!(f, "OFF"),
        }
    }
}

impl std::str::FromStr for EcoMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL_ECO" => Ok(EcoMode::ManualEco),
            "OFF" => Ok(EcoMode::Off),
            _ => Err(format!("Unknown eco mode: {}", s)),
        }
    }
}

// =============================================================================
// Action records
// =============================================================================

/// A candidate record parsed from an upstream calendar entry, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActionRecord {
    pub source_id: String,
    pub calendar_id: String,
    pub scheduled_at: DateTime<FixedOffset>,
    pub action: Action,
    pub description: Option<String>,
    pub title: String,
}

impl NewActionRecord {
    /// The (source id, scheduled instant) pair used to detect removals.
    pub fn schedule_key(&self) -> (String, DateTime<Utc>) {
        (self.source_id.clone(), self.scheduled_at.with_timezone(&Utc))
    }
}

/// One scheduled action instance as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub source_id: String,
    pub calendar_id: String,
    pub scheduled_at: DateTime<FixedOffset>,
    pub action: Action,
    pub description: Option<String>,
    pub title: String,
    pub state: RecordState,
    pub actioned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn schedule_key(&self) -> (String, DateTime<Utc>) {
        (self.source_id.clone(), self.scheduled_at.with_timezone(&Utc))
    }
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {}/{} at {}>",
            self.source_id,
            self.action,
            self.state,
            self.scheduled_at.to_rfc3339()
        )
    }
}

// =============================================================================
// Device topology
// =============================================================================

/// A structure (home) that groups thermostats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStructure {
    /// Remote resource name, e.g. `enterprises/P/structures/S`.
    pub name: String,
    pub label: String,
}

/// Cached state of a single thermostat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceThermostat {
    /// Remote resource name, e.g. `enterprises/P/devices/D`.
    pub name: String,
    pub label: String,
    /// Name of the parent structure.
    pub structure_ref: String,
    pub mode: HvacMode,
    pub eco_mode: EcoMode,
    pub setpoint_celsius: Option<f64>,
    /// Last mode other than `OFF` seen for this thermostat.
    pub previous_mode: Option<HvacMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display_and_parse() {
        for action in Action::ALL {
            let parsed: Action = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
        assert!("eco".parse::<Action>().is_err());
        assert!("Home".parse::<Action>().is_err());
    }

    #[test]
    fn test_record_state_from_str() {
        assert_eq!("waiting".parse::<RecordState>().unwrap(), RecordState::Waiting);
        assert_eq!("complete".parse::<RecordState>().unwrap(), RecordState::Complete);
        assert_eq!("removed".parse::<RecordState>().unwrap(), RecordState::Removed);
        assert!("done".parse::<RecordState>().is_err());
    }

    #[test]
    fn test_record_state_terminal() {
        assert!(!RecordState::Waiting.is_terminal());
        assert!(RecordState::Complete.is_terminal());
        assert!(RecordState::Removed.is_terminal());
    }

    #[test]
    fn test_device_modes_use_wire_names() {
        assert_eq!(HvacMode::HeatCool.to_string(), "HEATCOOL");
        assert_eq!("HEAT".parse::<HvacMode>().unwrap(), HvacMode::Heat);
        assert_eq!(
            serde_json::to_string(&EcoMode::ManualEco).unwrap(),
            "\"MANUAL_ECO\""
        );
        assert_eq!(
            serde_json::from_str::<HvacMode>("\"HEATCOOL\"").unwrap(),
            HvacMode::HeatCool
        );
        assert!("heat".parse::<HvacMode>().is_err());
    }

    #[test]
    fn test_schedule_key_normalizes_offset() {
        let mountain = DateTime::parse_from_rfc3339("2024-01-10T18:00:00-07:00").unwrap();
        let utc = DateTime::parse_from_rfc3339("2024-01-11T01:00:00+00:00").unwrap();
        let a = NewActionRecord {
            source_id: "abc".into(),
            calendar_id: "primary".into(),
            scheduled_at: mountain,
            action: Action::Away,
            description: None,
            title: "thermo:away".into(),
        };
        let b = NewActionRecord {
            scheduled_at: utc,
            ..a.clone()
        };
        assert_eq!(a.schedule_key(), b.schedule_key());
    }
}
