//! Schedule of Classes availability watcher.
//!
//! Polls a course results page, turns it into a [`Snapshot`] of section
//! statuses, and emits an [`Event`] whenever the configured
//! [`AvailabilityRule`] flips between unavailable and available.

pub mod config;
pub mod detector;
pub mod error;
pub mod fetcher;
pub mod notifier;
pub mod parser;
pub mod rules;
pub mod runner;
pub mod state;
pub mod types;

pub use detector::{Detector, Observation};
pub use error::{ConfigError, FetchError, NotifyError, ParseError, StateError, WatchError};
pub use parser::{parse, parse_at};
pub use rules::{AvailabilityCheck, AvailabilityRule};
pub use types::*;
