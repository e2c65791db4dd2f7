//! Entry title parsing and scheduling.
//!
//! Titles look like `<label>:<action>[:<description>]`, e.g.
//! `thermo:away` or `thermo:home:back from the airport`.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use chrono_tz::Tz;

use thermocal_core::config::CalendarConfig;
use thermocal_core::error::ThermocalError;
use thermocal_core::types::{Action, NewActionRecord};

use crate::error::ParseError;
use crate::source::{CalendarEntry, EntryStart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub label: String,
    pub action: Action,
    pub description: Option<String>,
}

/// Split on the first two `:`; anything after the second belongs to the
/// description. The action is case-insensitive.
pub fn parse_title(title: &str) -> Result<ParsedTitle, ParseError> {
    let mut parts = title.splitn(3, ':');
    let label = parts.next().unwrap_or_default().trim();
    let action = parts
        .next()
        .ok_or_else(|| ParseError::Format(title.to_string()))?
        .trim();

    let parsed: Action = action
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| ParseError::UnknownAction {
            title: title.to_string(),
            action: action.to_string(),
        })?;

    let description = parts
        .next()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Ok(ParsedTitle {
        label: label.to_string(),
        action: parsed,
        description,
    })
}

/// Calendar time zone and the default times applied to all-day entries.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleDefaults {
    pub timezone: Tz,
    pub home_time: NaiveTime,
    pub away_time: NaiveTime,
}

impl ScheduleDefaults {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, ThermocalError> {
        Ok(Self {
            timezone: config.timezone()?,
            home_time: config.default_time_for(Action::Home)?,
            away_time: config.default_time_for(Action::Away)?,
        })
    }

    /// When an entry should run. All-day entries run at the default time for
    /// their action in the calendar time zone; timed entries keep their own
    /// offset.
    pub fn scheduled_at(
        &self,
        entry: &CalendarEntry,
        action: Action,
    ) -> Result<DateTime<FixedOffset>, ParseError> {
        match &entry.start {
            EntryStart::DateTime(at) => Ok(*at),
            EntryStart::Date(date) => {
                let time = match action {
                    Action::Home => self.home_time,
                    Action::Away => self.away_time,
                };
                self.timezone
                    .from_local_datetime(&date.and_time(time))
                    .earliest()
                    .map(|at| at.fixed_offset())
                    .ok_or_else(|| ParseError::NonexistentLocalTime(entry.title.clone()))
            }
        }
    }
}

/// Build the candidate record for an upstream entry.
pub fn to_candidate(
    entry: &CalendarEntry,
    calendar_id: &str,
    defaults: &ScheduleDefaults,
) -> Result<NewActionRecord, ParseError> {
    let parsed = parse_title(&entry.title)?;
    let scheduled_at = defaults.scheduled_at(entry, parsed.action)?;

    Ok(NewActionRecord {
        source_id: entry.id.clone(),
        calendar_id: calendar_id.to_string(),
        scheduled_at,
        action: parsed.action,
        description: parsed.description,
        title: entry.title.clone(),
    })
}
