//! Persisted device topology: structures and their thermostats.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use thermocal_core::error::ThermocalError;
use thermocal_core::types::{DeviceStructure, DeviceThermostat, HvacMode};

use crate::db::Database;

const THERMOSTAT_COLUMNS: &str =
    "name, label, structure_name, mode, eco_mode, setpoint_celsius, previous_mode";

pub struct DeviceRepository {
    db: Arc<Database>,
}

impl DeviceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replace the cached topology in one transaction.
    ///
    /// `previous_mode` survives the replacement and is moved forward to the
    /// current mode whenever that mode is not `OFF`. Returns the thermostats
    /// as stored.
    pub fn replace_topology(
        &self,
        structures: &[DeviceStructure],
        thermostats: &[DeviceThermostat],
        refreshed_at: DateTime<Utc>,
    ) -> Result<Vec<DeviceThermostat>, ThermocalError> {
        self.db.with_conn_mut(|conn| {
            let known = previous_modes(conn)?;

            let stored: Vec<DeviceThermostat> = thermostats
                .iter()
                .map(|t| {
                    let previous_mode = if t.mode != HvacMode::Off {
                        Some(t.mode)
                    } else {
                        known.get(&t.name).copied().flatten().or(t.previous_mode)
                    };
                    DeviceThermostat {
                        previous_mode,
                        ..t.clone()
                    }
                })
                .collect();

            let tx = conn
                .transaction()
                .map_err(|e| ThermocalError::Storage(format!("Failed to begin: {}", e)))?;

            tx.execute_batch("DELETE FROM device_thermostats; DELETE FROM device_structures;")
                .map_err(|e| ThermocalError::Storage(format!("Failed to clear topology: {}", e)))?;

            for s in structures {
                tx.execute(
                    "INSERT INTO device_structures (name, label, refreshed_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![s.name, s.label, refreshed_at.timestamp()],
                )
                .map_err(|e| {
                    ThermocalError::Storage(format!("Failed to store structure {}: {}", s.label, e))
                })?;
            }

            for t in &stored {
                tx.execute(
                    "INSERT INTO device_thermostats
                        (name, label, structure_name, mode, eco_mode, setpoint_celsius,
                         previous_mode, refreshed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        t.name,
                        t.label,
                        t.structure_ref,
                        t.mode.to_string(),
                        t.eco_mode.to_string(),
                        t.setpoint_celsius,
                        t.previous_mode.map(|m| m.to_string()),
                        refreshed_at.timestamp(),
                    ],
                )
                .map_err(|e| {
                    ThermocalError::Storage(format!("Failed to store thermostat {}: {}", t.label, e))
                })?;
            }

            tx.commit()
                .map_err(|e| ThermocalError::Storage(format!("Failed to commit topology: {}", e)))?;

            debug!(
                structures = structures.len(),
                thermostats = stored.len(),
                "Device topology replaced"
            );
            Ok(stored)
        })
    }

    /// Case-insensitive lookup of a structure by its custom name.
    pub fn structure_by_label(&self, label: &str) -> Result<Option<DeviceStructure>, ThermocalError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT name, label FROM device_structures WHERE label = ?1 COLLATE NOCASE",
                rusqlite::params![label],
                |row| {
                    Ok(DeviceStructure {
                        name: row.get(0)?,
                        label: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ThermocalError::Storage(e.to_string()))
        })
    }

    pub fn structures(&self) -> Result<Vec<DeviceStructure>, ThermocalError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, label FROM device_structures ORDER BY label ASC")
                .map_err(|e| ThermocalError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DeviceStructure {
                        name: row.get(0)?,
                        label: row.get(1)?,
                    })
                })
                .map_err(|e| ThermocalError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ThermocalError::Storage(e.to_string()))
        })
    }

    /// Thermostats whose parent is `structure_name`, ordered by label.
    pub fn thermostats_for(
        &self,
        structure_name: &str,
    ) -> Result<Vec<DeviceThermostat>, ThermocalError> {
        self.db.with_conn(|conn| {
            query_thermostats(
                conn,
                &format!(
                    "SELECT {} FROM device_thermostats WHERE structure_name = ?1 ORDER BY label ASC",
                    THERMOSTAT_COLUMNS
                ),
                rusqlite::params![structure_name],
            )
        })
    }

    pub fn thermostats(&self) -> Result<Vec<DeviceThermostat>, ThermocalError> {
        self.db.with_conn(|conn| {
            query_thermostats(
                conn,
                &format!(
                    "SELECT {} FROM device_thermostats ORDER BY label ASC",
                    THERMOSTAT_COLUMNS
                ),
                [],
            )
        })
    }
}

fn previous_modes(conn: &Connection) -> Result<HashMap<String, Option<HvacMode>>, ThermocalError> {
    let mut stmt = conn
        .prepare("SELECT name, previous_mode FROM device_thermostats")
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    let mut modes = HashMap::new();
    for row in rows {
        let (name, mode) = row.map_err(|e| ThermocalError::Storage(e.to_string()))?;
        let mode = mode
            .map(|m| m.parse::<HvacMode>())
            .transpose()
            .map_err(ThermocalError::DataIntegrity)?;
        modes.insert(name, mode);
    }
    Ok(modes)
}

fn query_thermostats<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<DeviceThermostat>, ThermocalError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| Ok(row_to_thermostat(row)))
        .map_err(|e| ThermocalError::Storage(e.to_string()))?;

    let mut thermostats = Vec::new();
    for row in rows {
        thermostats.push(row.map_err(|e| ThermocalError::Storage(e.to_string()))??);
    }
    Ok(thermostats)
}

fn row_to_thermostat(row: &rusqlite::Row<'_>) -> Result<DeviceThermostat, ThermocalError> {
    let storage = |e: rusqlite::Error| ThermocalError::Storage(e.to_string());

    let mode: String = row.get(3).map_err(storage)?;
    let eco_mode: String = row.get(4).map_err(storage)?;
    let previous_mode: Option<String> = row.get(6).map_err(storage)?;

    Ok(DeviceThermostat {
        name: row.get(0).map_err(storage)?,
        label: row.get(1).map_err(storage)?,
        structure_ref: row.get(2).map_err(storage)?,
        mode: mode.parse().map_err(ThermocalError::DataIntegrity)?,
        eco_mode: eco_mode.parse().map_err(ThermocalError::DataIntegrity)?,
        setpoint_celsius: row.get(5).map_err(storage)?,
        previous_mode: previous_mode
            .map(|m| m.parse())
            .transpose()
            .map_err(ThermocalError::DataIntegrity)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermocal_core::types::EcoMode;

    const STRUCTURE: &str = "enterprises/p/structures/s";

    fn make_repo() -> DeviceRepository {
        DeviceRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn structure() -> DeviceStructure {
        DeviceStructure {
            name: STRUCTURE.to_string(),
            label: "Cabin".to_string(),
        }
    }

    fn thermostat(label: &str, mode: HvacMode) -> DeviceThermostat {
        DeviceThermostat {
            name: format!("enterprises/p/devices/{}", label.to_lowercase()),
            label: label.to_string(),
            structure_ref: STRUCTURE.to_string(),
            mode,
            eco_mode: EcoMode::Off,
            setpoint_celsius: Some(18.5),
            previous_mode: None,
        }
    }

    #[test]
    fn test_replace_and_lookup() {
        let repo = make_repo();
        repo.replace_topology(
            &[structure()],
            &[thermostat("Hall", HvacMode::Heat), thermostat("Attic", HvacMode::Cool)],
            Utc::now(),
        )
        .unwrap();

        let found = repo.structure_by_label("Cabin").unwrap().unwrap();
        assert_eq!(found.name, STRUCTURE);
        assert!(repo.structure_by_label("cabin").unwrap().is_some());
        assert!(repo.structure_by_label("Beach").unwrap().is_none());

        let thermostats = repo.thermostats_for(STRUCTURE).unwrap();
        assert_eq!(thermostats.len(), 2);
        assert_eq!(thermostats[0].label, "Attic");
        assert_eq!(thermostats[1].setpoint_celsius, Some(18.5));
        assert!(repo.thermostats_for("enterprises/p/structures/x").unwrap().is_empty());
    }

    #[test]
    fn test_previous_mode_survives_off() {
        let repo = make_repo();
        repo.replace_topology(&[structure()], &[thermostat("Hall", HvacMode::Cool)], Utc::now())
            .unwrap();

        let stored = repo
            .replace_topology(&[structure()], &[thermostat("Hall", HvacMode::Off)], Utc::now())
            .unwrap();
        assert_eq!(stored[0].mode, HvacMode::Off);
        assert_eq!(stored[0].previous_mode, Some(HvacMode::Cool));

        let reread = repo.thermostats().unwrap();
        assert_eq!(reread[0].previous_mode, Some(HvacMode::Cool));
    }

    #[test]
    fn test_replace_drops_stale_entries() {
        let repo = make_repo();
        repo.replace_topology(
            &[structure()],
            &[thermostat("Hall", HvacMode::Heat), thermostat("Attic", HvacMode::Heat)],
            Utc::now(),
        )
        .unwrap();
        repo.replace_topology(&[structure()], &[thermostat("Hall", HvacMode::Heat)], Utc::now())
            .unwrap();

        assert_eq!(repo.thermostats().unwrap().len(), 1);
        assert_eq!(repo.structures().unwrap().len(), 1);
    }
}
