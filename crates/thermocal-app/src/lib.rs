//! Thermocal application crate - CLI, service loop and notifiers.

pub mod cli;
pub mod notifier;
pub mod service;
pub mod show;

pub use notifier::{build_notifier, LogNotifier, MailgunNotifier, Notifier, NotifyError};
pub use service::{CycleSummary, ServiceLoop, ServiceMode};
