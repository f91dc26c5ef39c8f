/// Types for section availability snapshots and change events
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized enrollment status of a single section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionStatus {
    Open,
    Closed,
    #[serde(alias = "WAITLISTED")]
    Waitlist,
    #[serde(alias = "CANCELED")]
    Cancelled,
    Unknown,
}

impl SectionStatus {
    /// Returns true if the section can be enrolled in directly.
    pub fn is_open(&self) -> bool {
        matches!(self, SectionStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Open => "OPEN",
            SectionStatus::Closed => "CLOSED",
            SectionStatus::Waitlist => "WAITLIST",
            SectionStatus::Cancelled => "CANCELLED",
            SectionStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meeting type of a section, derived from its identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    Lecture,
    Discussion,
    Lab,
    Seminar,
    Other,
}

impl SectionKind {
    /// Classifies an identifier such as `Lec 1` or `Dis 1A`.
    pub fn from_id(id: &str) -> Self {
        let lower = id.trim_start().to_ascii_lowercase();
        if lower.starts_with("lec") {
            SectionKind::Lecture
        } else if lower.starts_with("dis") {
            SectionKind::Discussion
        } else if lower.starts_with("lab") {
            SectionKind::Lab
        } else if lower.starts_with("sem") {
            SectionKind::Seminar
        } else {
            SectionKind::Other
        }
    }
}

/// Seat information extracted from the status column, when the page shows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatCounts {
    pub enrolled: Option<u32>,
    pub capacity: Option<u32>,
    pub available: Option<u32>,
    pub waitlist_taken: Option<u32>,
    pub waitlist_capacity: Option<u32>,
}

impl SeatCounts {
    pub fn is_empty(&self) -> bool {
        *self == SeatCounts::default()
    }
}

/// A single enrollable section as it appeared on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub status: SectionStatus,
    /// Status label as printed on the page (e.g. "Closed by Dept")
    pub raw_status: Option<String>,
    pub seats: Option<SeatCounts>,
}

impl Section {
    pub fn new(id: impl AsRef<str>, status: SectionStatus) -> Self {
        Self {
            id: normalize_section_id(id.as_ref()),
            status,
            raw_status: None,
            seats: None,
        }
    }

    pub fn kind(&self) -> SectionKind {
        SectionKind::from_id(&self.id)
    }
}

/// Point-in-time capture of every section on the page, in page order.
///
/// Section identifiers are unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    sections: Vec<Section>,
}

impl Snapshot {
    /// Builds a snapshot, keeping the first occurrence of any repeated identifier.
    pub fn new(captured_at: DateTime<Utc>, sections: Vec<Section>) -> Self {
        let mut unique: Vec<Section> = Vec::with_capacity(sections.len());
        for section in sections {
            if !unique.iter().any(|s| same_section_id(&s.id, &section.id)) {
                unique.push(section);
            }
        }

        Self {
            captured_at,
            sections: unique,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Looks up a section, ignoring case and whitespace differences in the identifier.
    pub fn get(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| same_section_id(&s.id, id))
    }

    pub fn status_of(&self, id: &str) -> Option<SectionStatus> {
        self.get(id).map(|s| s.status)
    }

    pub fn any_open(&self) -> bool {
        self.sections.iter().any(|s| s.status.is_open())
    }

    /// One-line rendering such as `Lec 1: OPEN | Dis 1A: CLOSED`.
    pub fn summary(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("{}: {}", s.id, s.status))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Whether the configured rule holds for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityState {
    Available,
    Unavailable,
}

impl AvailabilityState {
    pub fn is_available(&self) -> bool {
        matches!(self, AvailabilityState::Available)
    }
}

impl From<bool> for AvailabilityState {
    fn from(holds: bool) -> Self {
        if holds {
            AvailabilityState::Available
        } else {
            AvailabilityState::Unavailable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    BecameAvailable,
    BecameUnavailable,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BecameAvailable => "BECAME_AVAILABLE",
            EventKind::BecameUnavailable => "BECAME_UNAVAILABLE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one section before and after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionChange {
    pub id: String,
    pub previous: Option<SectionStatus>,
    pub current: Option<SectionStatus>,
}

/// Availability transition emitted by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Capture time of the snapshot that triggered the transition
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<SectionChange>,
}

impl Event {
    pub fn section_ids(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.id.as_str())
    }
}

/// Trims an identifier and collapses inner whitespace (`"Dis\n  1A"` -> `"Dis 1A"`).
pub fn normalize_section_id(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identifier equality, ignoring ASCII case and runs of whitespace.
pub fn same_section_id(a: &str, b: &str) -> bool {
    normalize_section_id(a).eq_ignore_ascii_case(&normalize_section_id(b))
}
