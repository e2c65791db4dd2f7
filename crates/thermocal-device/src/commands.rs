//! SDM command envelopes.

use std::fmt;

use serde_json::{json, Value};

use thermocal_core::types::{EcoMode, HvacMode};

pub const SET_ECO_MODE: &str = "sdm.devices.commands.ThermostatEco.SetMode";
pub const SET_HVAC_MODE: &str = "sdm.devices.commands.ThermostatMode.SetMode";
pub const SET_HEAT: &str = "sdm.devices.commands.ThermostatTemperatureSetpoint.SetHeat";

/// One `executeCommand` call against one thermostat.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    /// Remote device name, e.g. `enterprises/P/devices/D`.
    pub device_name: String,
    /// Device label, for logs.
    pub label: String,
    pub command: String,
    pub params: Value,
}

impl DeviceCommand {
    pub fn set_eco(device_name: &str, label: &str, mode: EcoMode) -> Self {
        Self::new(device_name, label, SET_ECO_MODE, json!({ "mode": mode.to_string() }))
    }

    pub fn set_mode(device_name: &str, label: &str, mode: HvacMode) -> Self {
        Self::new(device_name, label, SET_HVAC_MODE, json!({ "mode": mode.to_string() }))
    }

    pub fn set_heat(device_name: &str, label: &str, celsius: f64) -> Self {
        Self::new(device_name, label, SET_HEAT, json!({ "heatCelsius": celsius }))
    }

    fn new(device_name: &str, label: &str, command: &str, params: Value) -> Self {
        Self {
            device_name: device_name.to_string(),
            label: label.to_string(),
            command: command.to_string(),
            params,
        }
    }

    /// Request body for `:executeCommand`.
    pub fn envelope(&self) -> Value {
        json!({ "command": self.command, "params": self.params })
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self
            .command
            .strip_prefix("sdm.devices.commands.")
            .unwrap_or(&self.command);
        write!(f, "{} {} {}", self.label, short, self.params)
    }
}
