//! Detection of availability transitions between two snapshots.

use crate::rules::{AvailabilityCheck, AvailabilityRule};
use crate::types::{AvailabilityState, Event, EventKind, SectionChange, Snapshot};
use tracing::debug;

/// Result of feeding a new snapshot to the detector.
#[derive(Debug, Clone)]
pub struct Observation {
    pub events: Vec<Event>,
    /// Snapshot to pass back in as `last` on the next observation
    pub last: Snapshot,
}

/// Compares snapshots under a fixed rule.
///
/// The detector holds no state between calls; the last known snapshot is
/// passed in and handed back by [`Detector::observe`].
#[derive(Debug, Clone)]
pub struct Detector {
    rule: AvailabilityRule,
}

impl Detector {
    pub fn new(rule: AvailabilityRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &AvailabilityRule {
        &self.rule
    }

    /// Evaluates the rule against a snapshot.
    pub fn availability(&self, snapshot: &Snapshot) -> AvailabilityState {
        self.rule.availability(snapshot)
    }

    /// Compares `previous` with `current` and returns at most one transition event.
    ///
    /// A missing `previous` (first observation) counts as unavailable, so a page
    /// that is already available produces a single `BecameAvailable` event.
    pub fn detect(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Vec<Event> {
        let was = previous
            .map(|snapshot| self.availability(snapshot))
            .unwrap_or(AvailabilityState::Unavailable);
        let now = self.availability(current);

        let kind = match (was, now) {
            (AvailabilityState::Unavailable, AvailabilityState::Available) => {
                EventKind::BecameAvailable
            }
            (AvailabilityState::Available, AvailabilityState::Unavailable) => {
                EventKind::BecameUnavailable
            }
            _ => {
                debug!(state = ?now, "Availability unchanged");
                return Vec::new();
            }
        };

        debug!(kind = %kind, "Availability transition");

        vec![Event {
            kind,
            timestamp: current.captured_at,
            changes: self.changed_sections(previous, current),
        }]
    }

    /// Runs [`Detector::detect`] and hands `current` back as the new last snapshot.
    pub fn observe(&self, last: Option<Snapshot>, current: Snapshot) -> Observation {
        let events = self.detect(last.as_ref(), &current);
        Observation {
            events,
            last: current,
        }
    }

    /// Rule-relevant sections whose status differs, current page order first,
    /// then sections that disappeared.
    fn changed_sections(
        &self,
        previous: Option<&Snapshot>,
        current: &Snapshot,
    ) -> Vec<SectionChange> {
        let mut changes: Vec<SectionChange> = current
            .sections()
            .iter()
            .filter(|s| self.rule.is_relevant(&s.id))
            .filter_map(|s| {
                let before = previous.and_then(|p| p.status_of(&s.id));
                (before != Some(s.status)).then(|| SectionChange {
                    id: s.id.clone(),
                    previous: before,
                    current: Some(s.status),
                })
            })
            .collect();

        if let Some(previous) = previous {
            changes.extend(
                previous
                    .sections()
                    .iter()
                    .filter(|s| self.rule.is_relevant(&s.id) && current.get(&s.id).is_none())
                    .map(|s| SectionChange {
                        id: s.id.clone(),
                        previous: Some(s.status),
                        current: None,
                    }),
            );
        }

        changes
    }
}
