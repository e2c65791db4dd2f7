//! Executor errors.

use thermocal_core::types::Action;
use thermocal_core::ThermocalError;
use thermocal_device::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Devices did not reach the target state after the settle delay.
    #[error("Verification of '{action}' failed: {}", .reasons.join("; "))]
    Verification { action: Action, reasons: Vec<String> },

    #[error(transparent)]
    Core(#[from] ThermocalError),
}

impl ActionError {
    /// True when the rest of the cycle should be abandoned.
    pub fn is_fatal(&self) -> bool {
        match self {
            ActionError::Device(e) => e.is_fatal(),
            ActionError::Verification { .. } => false,
            ActionError::Core(_) => true,
        }
    }
}
