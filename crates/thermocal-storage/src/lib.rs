//! Thermocal storage crate - SQLite cache of action records and device topology.

pub mod db;
pub mod devices;
pub mod migrations;
pub mod records;

pub use db::Database;
pub use devices::DeviceRepository;
pub use records::{ActionRecordRepository, InsertOutcome};
