//! Target device state for an action and the commands that reach it.

use std::fmt;

use thermocal_core::config::DeviceConfig;
use thermocal_core::types::{Action, DeviceThermostat, EcoMode, HvacMode};
use thermocal_device::{DeviceCommand, StructureSnapshot};

/// Months 1-4 and 10-12 count as winter.
pub fn is_winter(month: u32) -> bool {
    (1..=4).contains(&month) || (10..=12).contains(&month)
}

/// What to do with each thermostat's HVAC mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeTarget {
    /// Leave the mode alone.
    Keep,
    Exact(HvacMode),
    /// If the thermostat is `OFF`, put it back in its last non-`OFF` mode.
    RestorePrevious,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetState {
    pub action: Action,
    pub eco: EcoMode,
    pub mode: ModeTarget,
    /// Lower bound for the heat setpoint.
    pub min_heat_celsius: Option<f64>,
}

impl TargetState {
    /// `month` is the current month in the calendar's time zone.
    pub fn for_action(action: Action, month: u32, config: &DeviceConfig) -> Self {
        match action {
            Action::Away => Self {
                action,
                eco: EcoMode::ManualEco,
                mode: ModeTarget::Keep,
                min_heat_celsius: None,
            },
            Action::Home if is_winter(month) => Self {
                action,
                eco: EcoMode::Off,
                mode: ModeTarget::Exact(HvacMode::Heat),
                min_heat_celsius: Some(config.winter_home_min_celsius),
            },
            Action::Home => Self {
                action,
                eco: EcoMode::Off,
                mode: ModeTarget::RestorePrevious,
                min_heat_celsius: None,
            },
        }
    }
}

/// A single way a thermostat differs from the target.
#[derive(Debug, Clone, PartialEq)]
enum Deviation {
    Eco { current: EcoMode, wanted: EcoMode },
    Mode { current: HvacMode, wanted: HvacMode },
    Setpoint { current: Option<f64>, min: f64 },
}

impl Deviation {
    fn command(&self, t: &DeviceThermostat) -> DeviceCommand {
        match *self {
            Deviation::Eco { wanted, .. } => DeviceCommand::set_eco(&t.name, &t.label, wanted),
            Deviation::Mode { wanted, .. } => DeviceCommand::set_mode(&t.name, &t.label, wanted),
            Deviation::Setpoint { min, .. } => DeviceCommand::set_heat(&t.name, &t.label, min),
        }
    }
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deviation::Eco { current, wanted } => {
                write!(f, "eco is {}, expected {}", current, wanted)
            }
            Deviation::Mode { current, wanted } => {
                write!(f, "mode is {}, expected {}", current, wanted)
            }
            Deviation::Setpoint { current: Some(c), min } => {
                write!(f, "heat setpoint {:.1}C is below {:.1}C", c, min)
            }
            Deviation::Setpoint { current: None, min } => {
                write!(f, "no heat setpoint, expected at least {:.1}C", min)
            }
        }
    }
}

/// Deviations in command order: eco first, then mode, then setpoint.
fn deviations(target: &TargetState, t: &DeviceThermostat) -> Vec<Deviation> {
    let mut found = Vec::new();

    if t.eco_mode != target.eco {
        found.push(Deviation::Eco {
            current: t.eco_mode,
            wanted: target.eco,
        });
    }

    let wanted_mode = match target.mode {
        ModeTarget::Keep => None,
        ModeTarget::Exact(mode) => Some(mode),
        ModeTarget::RestorePrevious if t.mode == HvacMode::Off => {
            t.previous_mode.filter(|m| *m != HvacMode::Off)
        }
        ModeTarget::RestorePrevious => None,
    };
    if let Some(wanted) = wanted_mode {
        if t.mode != wanted {
            found.push(Deviation::Mode {
                current: t.mode,
                wanted,
            });
        }
    }

    if let Some(min) = target.min_heat_celsius {
        if t.setpoint_celsius.map_or(true, |c| c < min) {
            found.push(Deviation::Setpoint {
                current: t.setpoint_celsius,
                min,
            });
        }
    }

    found
}

/// Commands that move the structure to `target`. Thermostats already in
/// the target state get none.
pub fn plan(target: &TargetState, snapshot: &StructureSnapshot) -> Vec<DeviceCommand> {
    snapshot
        .thermostats
        .iter()
        .flat_map(|t| {
            deviations(target, t)
                .into_iter()
                .map(move |d| d.command(t))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Matches,
    Mismatch(Vec<String>),
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Matches)
    }
}

pub fn check(target: &TargetState, snapshot: &StructureSnapshot) -> Verification {
    let reasons: Vec<String> = snapshot
        .thermostats
        .iter()
        .flat_map(|t| {
            deviations(target, t)
                .into_iter()
                .map(move |d| format!("{}: {}", t.label, d))
        })
        .collect();

    if reasons.is_empty() {
        Verification::Matches
    } else {
        Verification::Mismatch(reasons)
    }
}
