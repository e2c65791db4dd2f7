pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod state_machine;
pub mod types;

pub use auth::{AuthError, StaticToken, TokenProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ThermocalConfig;
pub use error::{Result, ThermocalError};
pub use types::*;
