//! Calendar subsystem errors.

use thermocal_core::{AuthError, ThermocalError};

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Could not find calendar '{0}'")]
    CalendarNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Calendar API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed calendar response: {0}")]
    MalformedResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Core(#[from] ThermocalError),
}

impl CalendarError {
    /// Auth, network and storage failures. The cycle that hit one must not
    /// act on the cache it could not refresh.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CalendarError::Unauthorized(_)
                | CalendarError::Transport(_)
                | CalendarError::Auth(_)
                | CalendarError::Core(_)
        )
    }
}

impl From<reqwest::Error> for CalendarError {
    fn from(e: reqwest::Error) -> Self {
        CalendarError::Transport(e.to_string())
    }
}

/// A calendar entry whose title cannot be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Cannot parse entry title '{0}': expected <label>:<action>[:<description>]")]
    Format(String),

    #[error("Unknown action '{action}' in entry title '{title}'")]
    UnknownAction { title: String, action: String },

    #[error("Entry '{0}' falls on a local time that does not exist")]
    NonexistentLocalTime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_errors_are_fatal() {
        assert!(CalendarError::Unauthorized("expired".into()).is_fatal());
        assert!(CalendarError::Transport("reset".into()).is_fatal());
        assert!(CalendarError::Auth(AuthError::Expired).is_fatal());
        assert!(CalendarError::Core(ThermocalError::Storage("locked".into())).is_fatal());
    }

    #[test]
    fn test_response_errors_are_not_fatal() {
        assert!(!CalendarError::CalendarNotFound("work".into()).is_fatal());
        assert!(!CalendarError::Api {
            status: 500,
            body: "backend".into()
        }
        .is_fatal());
        assert!(!CalendarError::MalformedResponse("no items".into()).is_fatal());
    }
}
