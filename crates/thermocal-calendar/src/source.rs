//! Upstream calendar access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value;
use tracing::debug;

use thermocal_core::config::CalendarConfig;
use thermocal_core::TokenProvider;

use crate::error::CalendarError;

/// Start of an upstream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStart {
    /// All-day entry.
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub id: String,
    pub title: String,
    pub start: EntryStart,
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Entries starting at or after `since` whose text matches `filter_tag`.
    ///
    /// A failed fetch is always an error, never an empty list.
    async fn list_entries(
        &self,
        calendar_id: &str,
        since: DateTime<FixedOffset>,
        filter_tag: &str,
        max_results: u32,
    ) -> Result<Vec<CalendarEntry>, CalendarError>;
}

/// Google Calendar v3 `events.list`.
pub struct GoogleCalendarSource {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    api_base: String,
}

impl GoogleCalendarSource {
    pub fn new(config: &CalendarConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            api_base: config.api_base.clone(),
        }
    }

    fn events_url(&self, calendar_id: &str) -> Result<reqwest::Url, CalendarError> {
        let mut url = reqwest::Url::parse(&self.api_base).map_err(|e| {
            CalendarError::Transport(format!("Invalid calendar api_base {}: {}", self.api_base, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::Transport(format!("Invalid api_base {}", self.api_base)))?
            .pop_if_empty()
            .extend(["calendars", calendar_id, "events"]);
        Ok(url)
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendarSource {
    async fn list_entries(
        &self,
        calendar_id: &str,
        since: DateTime<FixedOffset>,
        filter_tag: &str,
        max_results: u32,
    ) -> Result<Vec<CalendarEntry>, CalendarError> {
        let token = self.tokens.access_token().await?;
        let url = self.events_url(calendar_id)?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("timeMin", since.to_rfc3339()),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("q", filter_tag.to_string()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        match status {
            404 => return Err(CalendarError::CalendarNotFound(calendar_id.to_string())),
            401 => return Err(CalendarError::Unauthorized(body)),
            s if !(200..300).contains(&s) => return Err(CalendarError::Api { status, body }),
            _ => {}
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| CalendarError::MalformedResponse(e.to_string()))?;
        let entries = parse_events_response(&value)?;
        debug!(calendar_id, count = entries.len(), "Fetched calendar entries");
        Ok(entries)
    }
}

/// Convert an `events.list` body into entries.
///
/// The body must carry an `items` array; every item needs an id and a start.
pub fn parse_events_response(value: &Value) -> Result<Vec<CalendarEntry>, CalendarError> {
    let items = value["items"]
        .as_array()
        .ok_or_else(|| CalendarError::MalformedResponse("missing 'items' array".into()))?;

    items
        .iter()
        .map(|item| -> Result<CalendarEntry, CalendarError> {
            let id = item["id"]
                .as_str()
                .ok_or_else(|| CalendarError::MalformedResponse("entry without id".into()))?;
            let start = parse_start(&item["start"]).ok_or_else(|| {
                CalendarError::MalformedResponse(format!("entry {} has no valid start", id))
            })?;
            Ok(CalendarEntry {
                id: id.to_string(),
                title: item["summary"].as_str().unwrap_or_default().to_string(),
                start,
            })
        })
        .collect()
}

fn parse_start(start: &Value) -> Option<EntryStart> {
    if let Some(date_time) = start["dateTime"].as_str() {
        return DateTime::parse_from_rfc3339(date_time)
            .ok()
            .map(EntryStart::DateTime);
    }
    start["date"]
        .as_str()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EntryStart::Date)
}
