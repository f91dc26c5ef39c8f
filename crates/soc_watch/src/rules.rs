//! Availability rules: predicates over a [`Snapshot`].
//!
//! Each rule is its own strategy type implementing [`AvailabilityCheck`];
//! [`AvailabilityRule`] is the configured choice and dispatches to them.

use crate::error::ConfigError;
use crate::types::{normalize_section_id, same_section_id, AvailabilityState, SectionKind, Snapshot};
use std::fmt;
use std::str::FromStr;

/// A predicate deciding whether a snapshot counts as "available".
///
/// Implementations must be pure functions of the snapshot.
pub trait AvailabilityCheck {
    /// Returns true if the rule is satisfied by `snapshot`.
    fn holds(&self, snapshot: &Snapshot) -> bool;

    /// Returns true if the section takes part in this rule's decision.
    fn is_relevant(&self, section_id: &str) -> bool;
}

/// Available when at least one section is OPEN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnyOpen;

impl AvailabilityCheck for AnyOpen {
    fn holds(&self, snapshot: &Snapshot) -> bool {
        snapshot.any_open()
    }

    fn is_relevant(&self, _section_id: &str) -> bool {
        true
    }
}

/// Available when every lecture is OPEN and at least one discussion is OPEN.
///
/// A page without any lecture never satisfies this rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LectureAndDiscussion;

impl AvailabilityCheck for LectureAndDiscussion {
    fn holds(&self, snapshot: &Snapshot) -> bool {
        let mut lectures = snapshot
            .sections()
            .iter()
            .filter(|s| s.kind() == SectionKind::Lecture)
            .peekable();

        if lectures.peek().is_none() {
            return false;
        }
        if !lectures.all(|s| s.status.is_open()) {
            return false;
        }

        snapshot
            .sections()
            .iter()
            .any(|s| s.kind() == SectionKind::Discussion && s.status.is_open())
    }

    fn is_relevant(&self, section_id: &str) -> bool {
        matches!(
            SectionKind::from_id(section_id),
            SectionKind::Lecture | SectionKind::Discussion
        )
    }
}

/// Available when every watched section is present and OPEN.
///
/// The watch list is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificSections {
    watched: Vec<String>,
}

impl SpecificSections {
    /// Creates the rule from section identifiers, dropping blanks and duplicates.
    pub fn new<I, S>(sections: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut watched: Vec<String> = Vec::new();
        for raw in sections {
            let id = normalize_section_id(raw.as_ref());
            if !id.is_empty() && !watched.iter().any(|w| same_section_id(w, &id)) {
                watched.push(id);
            }
        }

        if watched.is_empty() {
            return Err(ConfigError::EmptyWatchList);
        }

        Ok(Self { watched })
    }

    /// Parses a comma separated list such as `"Lec 1, Dis 1A"`.
    pub fn from_list(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(','))
    }

    pub fn watched(&self) -> &[String] {
        &self.watched
    }
}

impl AvailabilityCheck for SpecificSections {
    fn holds(&self, snapshot: &Snapshot) -> bool {
        self.watched.iter().all(|id| {
            snapshot
                .status_of(id)
                .map(|status| status.is_open())
                .unwrap_or(false)
        })
    }

    fn is_relevant(&self, section_id: &str) -> bool {
        self.watched.iter().any(|w| same_section_id(w, section_id))
    }
}

/// The configured availability rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityRule {
    AnyOpen(AnyOpen),
    LectureAndDiscussion(LectureAndDiscussion),
    SpecificSections(SpecificSections),
}

impl AvailabilityRule {
    pub fn any_open() -> Self {
        AvailabilityRule::AnyOpen(AnyOpen)
    }

    pub fn lecture_and_discussion() -> Self {
        AvailabilityRule::LectureAndDiscussion(LectureAndDiscussion)
    }

    pub fn specific_sections<I, S>(sections: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SpecificSections::new(sections).map(AvailabilityRule::SpecificSections)
    }

    /// Builds a rule from its configured name and optional section list.
    pub fn from_parts(name: RuleName, sections: Option<&str>) -> Result<Self, ConfigError> {
        match name {
            RuleName::AnyOpen => Ok(Self::any_open()),
            RuleName::LectureAndDiscussion => Ok(Self::lecture_and_discussion()),
            RuleName::SpecificSections => {
                SpecificSections::from_list(sections.unwrap_or_default())
                    .map(AvailabilityRule::SpecificSections)
            }
        }
    }

    pub fn name(&self) -> RuleName {
        match self {
            AvailabilityRule::AnyOpen(_) => RuleName::AnyOpen,
            AvailabilityRule::LectureAndDiscussion(_) => RuleName::LectureAndDiscussion,
            AvailabilityRule::SpecificSections(_) => RuleName::SpecificSections,
        }
    }

    fn check(&self) -> &dyn AvailabilityCheck {
        match self {
            AvailabilityRule::AnyOpen(rule) => rule,
            AvailabilityRule::LectureAndDiscussion(rule) => rule,
            AvailabilityRule::SpecificSections(rule) => rule,
        }
    }

    /// Evaluates the rule against a snapshot.
    pub fn availability(&self, snapshot: &Snapshot) -> AvailabilityState {
        AvailabilityState::from(self.holds(snapshot))
    }
}

impl AvailabilityCheck for AvailabilityRule {
    fn holds(&self, snapshot: &Snapshot) -> bool {
        self.check().holds(snapshot)
    }

    fn is_relevant(&self, section_id: &str) -> bool {
        self.check().is_relevant(section_id)
    }
}

impl Default for AvailabilityRule {
    fn default() -> Self {
        Self::any_open()
    }
}

impl fmt::Display for AvailabilityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityRule::SpecificSections(rule) => {
                write!(f, "{} [{}]", self.name(), rule.watched.join(", "))
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Rule names as they appear on the command line and in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleName {
    AnyOpen,
    LectureAndDiscussion,
    SpecificSections,
}

impl RuleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::AnyOpen => "any_open",
            RuleName::LectureAndDiscussion => "lecture_and_discussion",
            RuleName::SpecificSections => "specific_sections",
        }
    }
}

impl FromStr for RuleName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "any_open" => Ok(RuleName::AnyOpen),
            "lecture_and_discussion" => Ok(RuleName::LectureAndDiscussion),
            "specific_sections" => Ok(RuleName::SpecificSections),
            _ => Err(ConfigError::UnknownRule(s.to_string())),
        }
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
