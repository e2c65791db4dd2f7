//! Parse SDM `/devices` and `/structures` payloads into cached topology.

use std::collections::HashSet;

use serde_json::Value;

use thermocal_core::types::{DeviceStructure, DeviceThermostat, EcoMode, HvacMode};

use crate::error::DeviceError;

const THERMOSTAT_TYPE: &str = "sdm.devices.types.THERMOSTAT";
const DEVICE_INFO: &str = "sdm.devices.traits.Info";
const STRUCTURE_INFO: &str = "sdm.structures.traits.Info";
const MODE_TRAIT: &str = "sdm.devices.traits.ThermostatMode";
const ECO_TRAIT: &str = "sdm.devices.traits.ThermostatEco";
const SETPOINT_TRAIT: &str = "sdm.devices.traits.ThermostatTemperatureSetpoint";

/// Thermostats in a `/devices` response. Other device types are ignored.
///
/// Every thermostat must carry a unique custom name; `previous_mode` is left
/// for the repository to fill in.
pub fn parse_devices(payload: &Value) -> Result<Vec<DeviceThermostat>, DeviceError> {
    let mut labels = HashSet::new();
    let mut thermostats = Vec::new();

    for device in list(payload, "devices")? {
        let traits = &device["traits"];
        let is_thermostat =
            device["type"].as_str() == Some(THERMOSTAT_TYPE) || traits.get(MODE_TRAIT).is_some();
        if !is_thermostat {
            continue;
        }

        let name = required_str(device, "name")?;
        let label = traits[DEVICE_INFO]["customName"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DeviceError::Topology(format!("No custom label set for thermostat {}", name))
            })?;
        if !labels.insert(label.to_string()) {
            return Err(DeviceError::Topology(format!(
                "Multiple thermostats found labeled '{}'",
                label
            )));
        }

        let mode: HvacMode = traits[MODE_TRAIT]["mode"]
            .as_str()
            .ok_or_else(|| DeviceError::Topology(format!("Thermostat '{}' has no mode", label)))?
            .parse()
            .map_err(DeviceError::Topology)?;
        let eco_mode: EcoMode = match traits[ECO_TRAIT]["mode"].as_str() {
            Some(mode) => mode.parse().map_err(DeviceError::Topology)?,
            None => EcoMode::Off,
        };

        let parent = device["parentRelations"][0]["parent"]
            .as_str()
            .ok_or_else(|| {
                DeviceError::Topology(format!("Thermostat '{}' has no parent structure", label))
            })?;

        thermostats.push(DeviceThermostat {
            name: name.to_string(),
            label: label.to_string(),
            structure_ref: structure_of(parent).to_string(),
            mode,
            eco_mode,
            setpoint_celsius: traits[SETPOINT_TRAIT]["heatCelsius"].as_f64(),
            previous_mode: None,
        });
    }

    Ok(thermostats)
}

/// Structures in a `/structures` response.
pub fn parse_structures(payload: &Value) -> Result<Vec<DeviceStructure>, DeviceError> {
    list(payload, "structures")?
        .iter()
        .map(|structure| -> Result<DeviceStructure, DeviceError> {
            let name = required_str(structure, "name")?;
            let label = structure["traits"][STRUCTURE_INFO]["customName"]
                .as_str()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    DeviceError::Topology(format!("No custom label set for structure {}", name))
                })?;
            Ok(DeviceStructure {
                name: name.to_string(),
                label: label.trim().to_string(),
            })
        })
        .collect()
}

/// `enterprises/P/structures/S/rooms/R` -> `enterprises/P/structures/S`.
pub fn structure_of(parent: &str) -> &str {
    match parent.find("/rooms/") {
        Some(idx) => &parent[..idx],
        None => parent,
    }
}

/// An absent collection key means an empty collection.
fn list<'a>(payload: &'a Value, key: &str) -> Result<&'a [Value], DeviceError> {
    match payload.get(key) {
        None => Ok(&[][..]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(DeviceError::Malformed(format!("'{}' is not an array", key))),
    }
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, DeviceError> {
    value[key]
        .as_str()
        .ok_or_else(|| DeviceError::Malformed(format!("missing '{}'", key)))
}
