//! Plain-text rendering for the `show` commands.

use chrono_tz::Tz;

use thermocal_core::types::{ActionRecord, DeviceThermostat, EcoMode};

/// One line per record: local schedule time, action, state, title.
pub fn format_records(records: &[ActionRecord], tz: Tz) -> String {
    if records.is_empty() {
        return "No cached events".to_string();
    }

    records
        .iter()
        .map(|r| {
            let local = r.scheduled_at.with_timezone(&tz);
            let actioned = r
                .actioned_at
                .map(|t| format!(" (actioned {})", t.with_timezone(&tz).format("%Y-%m-%d %H:%M")))
                .unwrap_or_default();
            format!(
                "{}  {:<5} {:<9} {}{}",
                local.format("%Y-%m-%d %H:%M %Z"),
                r.action.to_string(),
                r.state.to_string(),
                r.title,
                actioned
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Label, mode, eco and setpoint for each thermostat. The setpoint is not
/// meaningful while eco is engaged.
pub fn format_thermostats(thermostats: &[DeviceThermostat]) -> String {
    if thermostats.is_empty() {
        return "No thermostats found".to_string();
    }

    thermostats
        .iter()
        .map(|t| {
            let setpoint = match (t.eco_mode, t.setpoint_celsius) {
                (EcoMode::ManualEco, _) | (_, None) => "N/A".to_string(),
                (EcoMode::Off, Some(c)) => format!("{:.1}C", c),
            };
            format!(
                "{}: mode={} eco={} setpoint={}",
                t.label, t.mode, t.eco_mode, setpoint
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use thermocal_core::types::{Action, HvacMode, RecordState};

    fn thermostat(label: &str, eco: EcoMode, setpoint: Option<f64>) -> DeviceThermostat {
        DeviceThermostat {
            name: format!("enterprises/p/devices/{}", label),
            label: label.to_string(),
            structure_ref: "enterprises/p/structures/s".into(),
            mode: HvacMode::Heat,
            eco_mode: eco,
            setpoint_celsius: setpoint,
            previous_mode: Some(HvacMode::Heat),
        }
    }

    #[test]
    fn test_setpoint_hidden_in_eco() {
        let out = format_thermostats(&[
            thermostat("hall", EcoMode::ManualEco, Some(19.0)),
            thermostat("den", EcoMode::Off, Some(20.5)),
        ]);
        assert_eq!(
            out,
            "hall: mode=HEAT eco=MANUAL_ECO setpoint=N/A\nden: mode=HEAT eco=OFF setpoint=20.5C"
        );
    }

    #[test]
    fn test_records_in_local_time() {
        let record = ActionRecord {
            id: Default::default(),
            source_id: "abc".into(),
            calendar_id: "primary".into(),
            scheduled_at: DateTime::parse_from_rfc3339("2024-01-11T01:00:00+00:00").unwrap(),
            action: Action::Away,
            description: None,
            title: "thermo:away".into(),
            state: RecordState::Complete,
            actioned_at: Some(Utc.with_ymd_and_hms(2024, 1, 11, 1, 0, 20).unwrap()),
            created_at: Default::default(),
        };
        let out = format_records(&[record], chrono_tz::America::Denver);
        assert_eq!(
            out,
            "2024-01-10 18:00 MST  away  complete  thermo:away (actioned 2024-01-10 18:00)"
        );
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(format_records(&[], chrono_tz::UTC), "No cached events");
        assert_eq!(format_thermostats(&[]), "No thermostats found");
    }
}
