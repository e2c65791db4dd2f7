//! Thermocal action crate - decides what the thermostats should look like
//! for an action, drives them there, and confirms they got there.

pub mod error;
pub mod executor;
pub mod plan;

pub use error::ActionError;
pub use executor::{ActionExecutor, ActionOutcome, ExecutionReport, RecordFailure};
pub use plan::{check, is_winter, plan, ModeTarget, TargetState, Verification};
