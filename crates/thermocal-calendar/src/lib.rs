//! Thermocal calendar crate - turns tagged calendar entries into cached
//! action records and keeps the cache in step with the calendar.

pub mod diff;
pub mod error;
pub mod parse;
pub mod reconciler;
pub mod source;

pub use error::{CalendarError, ParseError};
pub use parse::{parse_title, ParsedTitle, ScheduleDefaults};
pub use reconciler::{ReconcileReport, Reconciler};
pub use source::{CalendarEntry, CalendarSource, EntryStart, GoogleCalendarSource};
