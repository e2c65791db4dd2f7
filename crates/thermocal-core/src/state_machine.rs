//! Action record state machine with validated transitions.
//!
//! Waiting -> Complete (verified execution)
//! Waiting -> Removed (entry disappeared upstream)

use crate::error::ThermocalError;
use crate::types::RecordState;

/// Validate that a record state transition is allowed.
///
/// Only the two terminal transitions out of `Waiting` are valid; nothing
/// leaves `Complete` or `Removed`.
pub fn validate_transition(from: RecordState, to: RecordState) -> Result<(), ThermocalError> {
    let valid = match (from, to) {
        (RecordState::Waiting, RecordState::Complete) => true,
        (RecordState::Waiting, RecordState::Removed) => true,
        (RecordState::Waiting, RecordState::Waiting) => false,
        (RecordState::Complete, _) | (RecordState::Removed, _) => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ThermocalError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
