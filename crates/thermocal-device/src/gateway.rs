//! Device gateway: the view of the thermostat fleet the executor works with.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use thermocal_core::types::{DeviceStructure, DeviceThermostat};
use thermocal_core::Clock;
use thermocal_storage::DeviceRepository;

use crate::client::DeviceClient;
use crate::commands::DeviceCommand;
use crate::error::DeviceError;
use crate::topology::{parse_devices, parse_structures};

/// Fresh state of one structure and its thermostats.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSnapshot {
    pub structure: DeviceStructure,
    pub thermostats: Vec<DeviceThermostat>,
}

#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Read current device state for the structure with this label.
    async fn snapshot(&self, structure_label: &str) -> Result<StructureSnapshot, DeviceError>;

    /// Send each command in order, stopping at the first failure.
    async fn apply(&self, commands: &[DeviceCommand]) -> Result<(), DeviceError>;
}

/// Gateway over the SDM API with the topology cached in SQLite.
pub struct SdmGateway {
    client: DeviceClient,
    repo: DeviceRepository,
    clock: Arc<dyn Clock>,
}

impl SdmGateway {
    pub fn new(client: DeviceClient, repo: DeviceRepository, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            repo,
            clock,
        }
    }

    /// Re-read structures and devices from the API and persist them.
    pub async fn refresh_topology(
        &self,
    ) -> Result<(Vec<DeviceStructure>, Vec<DeviceThermostat>), DeviceError> {
        let structures = parse_structures(&self.client.structures().await?)?;
        let devices = parse_devices(&self.client.devices().await?)?;
        let stored = self
            .repo
            .replace_topology(&structures, &devices, self.clock.now())?;

        info!(
            structures = structures.len(),
            thermostats = stored.len(),
            "Device topology refreshed"
        );
        Ok((structures, stored))
    }

    async fn refresh_devices(&self) -> Result<(), DeviceError> {
        let devices = parse_devices(&self.client.devices().await?)?;
        let structures = self.repo.structures()?;
        self.repo
            .replace_topology(&structures, &devices, self.clock.now())?;
        Ok(())
    }
}

#[async_trait]
impl DeviceGateway for SdmGateway {
    async fn snapshot(&self, structure_label: &str) -> Result<StructureSnapshot, DeviceError> {
        let structure = match self.repo.structure_by_label(structure_label)? {
            Some(structure) => {
                self.refresh_devices().await?;
                structure
            }
            None => {
                debug!(label = structure_label, "Structure not cached, refreshing topology");
                let (structures, _) = self.refresh_topology().await?;
                structures
                    .into_iter()
                    .find(|s| s.label.eq_ignore_ascii_case(structure_label))
                    .ok_or_else(|| {
                        DeviceError::Topology(format!(
                            "Could not find structure in API: {}",
                            structure_label
                        ))
                    })?
            }
        };

        let thermostats = self.repo.thermostats_for(&structure.name)?;
        Ok(StructureSnapshot {
            structure,
            thermostats,
        })
    }

    async fn apply(&self, commands: &[DeviceCommand]) -> Result<(), DeviceError> {
        for command in commands {
            info!(command = %command, "Sending device command");
            self.client.execute_command(command).await?;
        }
        Ok(())
    }
}
