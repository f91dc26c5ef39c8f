//! Extraction of section statuses from Schedule of Classes HTML.
//!
//! Two page shapes are understood:
//! 1. The live SOC results layout: `div.data_row` rows holding a `div.sectionColumn`
//!    and a `div.statusColumn`
//! 2. A plain table where the first cell is the section and the last cell the status
//!
//! Anything else is reported as a [`ParseError`] so the caller can keep its previous state.

use crate::error::ParseError;
use crate::types::{
    normalize_section_id, same_section_id, SeatCounts, Section, SectionStatus, Snapshot,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

// Static selectors for parsing - compiled once
static DATA_ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div[class*='data_row']").unwrap());
static SECTION_COLUMN_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.sectionColumn").unwrap());
static STATUS_COLUMN_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.statusColumn").unwrap());
static CLS_SECTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".cls-section").unwrap());
static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static PARAGRAPH_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static TABLE_ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());

static SECTION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(lec|dis|lab|sem|tut)\s*\d\w*").unwrap());
static SECTION_ID_SEARCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(lec|dis|lab|sem|tut)\s*\d\w*").unwrap());
static STATUS_IN_HTML_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(closed by dept|open|full|wait[\s-]?list(?:ed)?|cancell?ed|closed)\b")
        .unwrap()
});
static CAPACITY_PAREN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\([^)]*capacity[^)]*\).*").unwrap());

static OF_ENROLLED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+of\s+(\d+)\s+enrolled").unwrap());
static OF_LEFT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+of\s+(\d+)\s+left").unwrap());
static OF_TAKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+of\s+(\d+)\s+taken").unwrap());
static SEATS_AVAILABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+seat(?:s|\(s\))?\s+(?:available|left)").unwrap());
static CLASS_FULL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)class\s+full\s*\((\d+)\)").unwrap());
static CAPACITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+capacity").unwrap());
static ENROLLED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+enrolled\b").unwrap());
static WAITLISTED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+waitlisted").unwrap());

/// Status phrases in match precedence. Input is lower-cased with hyphens
/// turned into spaces before lookup.
const STATUS_PHRASES: &[(&str, SectionStatus)] = &[
    ("closed by dept", SectionStatus::Closed),
    ("waitlist", SectionStatus::Waitlist),
    ("wait list", SectionStatus::Waitlist),
    ("cancelled", SectionStatus::Cancelled),
    ("canceled", SectionStatus::Cancelled),
    ("open", SectionStatus::Open),
    ("closed", SectionStatus::Closed),
    ("full", SectionStatus::Closed),
];

/// A section row before it becomes a [`Section`].
struct RawRow {
    id: String,
    status_text: Option<String>,
}

/// Parses SOC HTML into a snapshot stamped with the current time.
pub fn parse(html: &str) -> Result<Snapshot, ParseError> {
    parse_at(html, Utc::now())
}

/// Parses SOC HTML into a snapshot stamped with `captured_at`.
///
/// # Returns
/// * `Ok(Snapshot)` - Sections in page order, at least one
/// * `Err(ParseError)` - If no recognizable section listing is present
pub fn parse_at(html: &str, captured_at: DateTime<Utc>) -> Result<Snapshot, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::EmptyDocument);
    }

    let document = Html::parse_document(html);

    let (mut rows, soc_candidates) = collect_soc_rows(&document);
    let mut candidates = soc_candidates;
    if rows.is_empty() {
        // Fallback: plain table layout
        let (table_rows, table_candidates) = collect_table_rows(&document);
        rows = table_rows;
        candidates += table_candidates;
    }

    if candidates == 0 {
        warn!("No section rows found; SOC HTML structure may have changed");
        return Err(ParseError::NoSectionRows);
    }
    if rows.is_empty() {
        warn!(rows = candidates, "Candidate rows found but none had a section identifier");
        return Err(ParseError::NoSections { rows: candidates });
    }

    let mut sections: Vec<Section> = Vec::with_capacity(rows.len());
    for row in rows {
        if sections.iter().any(|s| same_section_id(&s.id, &row.id)) {
            warn!(section = %row.id, "Duplicate section identifier on page, keeping first");
            continue;
        }
        sections.push(build_section(row));
    }

    debug!(sections = sections.len(), "Parsed SOC page");
    Ok(Snapshot::new(captured_at, sections))
}

/// Maps a status label to a [`SectionStatus`], case-insensitively.
///
/// Seat-count parentheticals are ignored, and label variants such as
/// "Waitlisted", "Wait List" and "Closed by Dept" are understood. Unrecognized
/// text maps to [`SectionStatus::Unknown`].
pub fn normalize_status(text: &str) -> SectionStatus {
    let cleaned = CAPACITY_PAREN_REGEX.replace(text, "");
    let lower = cleaned
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    STATUS_PHRASES
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(_, status)| *status)
        .unwrap_or(SectionStatus::Unknown)
}

/// Extracts seat numbers from a status text, if there are any.
pub fn parse_seat_counts(text: &str) -> Option<SeatCounts> {
    let mut seats = SeatCounts::default();

    if let Some(caps) = OF_ENROLLED_REGEX.captures(text) {
        seats.enrolled = caps.get(1).and_then(|m| m.as_str().parse().ok());
        seats.capacity = caps.get(2).and_then(|m| m.as_str().parse().ok());
    }

    if let Some(caps) = OF_LEFT_REGEX.captures(text) {
        seats.available = caps.get(1).and_then(|m| m.as_str().parse().ok());
        seats.capacity = caps.get(2).and_then(|m| m.as_str().parse().ok());
    }

    if let Some(caps) = SEATS_AVAILABLE_REGEX.captures(text) {
        seats.available = caps.get(1).and_then(|m| m.as_str().parse().ok());
    }

    if let Some(caps) = OF_TAKEN_REGEX.captures(text) {
        seats.waitlist_taken = caps.get(1).and_then(|m| m.as_str().parse().ok());
        seats.waitlist_capacity = caps.get(2).and_then(|m| m.as_str().parse().ok());
    }

    if let Some(caps) = CLASS_FULL_REGEX.captures(text) {
        let full: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
        seats.capacity = seats.capacity.or(full);
        seats.enrolled = seats.enrolled.or(full);
        seats.available = seats.available.or(Some(0));
    }

    // "(0 capacity, 0 enrolled, 0 waitlisted)" parenthetical
    if seats.capacity.is_none() {
        seats.capacity = first_number(&CAPACITY_REGEX, text);
    }
    if seats.enrolled.is_none() {
        seats.enrolled = first_number(&ENROLLED_REGEX, text);
    }
    if seats.waitlist_taken.is_none() {
        seats.waitlist_taken = first_number(&WAITLISTED_REGEX, text);
    }

    if seats.available.is_none() {
        if let (Some(capacity), Some(enrolled)) = (seats.capacity, seats.enrolled) {
            seats.available = Some(capacity.saturating_sub(enrolled));
        }
    }

    if seats.is_empty() {
        None
    } else {
        Some(seats)
    }
}

fn first_number(regex: &Regex, text: &str) -> Option<u32> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn build_section(row: RawRow) -> Section {
    let Some(text) = row.status_text else {
        debug!(section = %row.id, "Section has no status text");
        return Section::new(&row.id, SectionStatus::Unknown);
    };

    let status = normalize_status(&text);
    if status == SectionStatus::Unknown {
        debug!(section = %row.id, text = %text, "Unrecognized status text");
    }

    let raw_status = CAPACITY_PAREN_REGEX.replace(&text, "").trim().to_string();

    Section {
        id: normalize_section_id(&row.id),
        status,
        raw_status: Some(raw_status).filter(|s| !s.is_empty()),
        seats: parse_seat_counts(&text),
    }
}

/// Collapsed text content of an element.
fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns matched rows and the number of candidate rows inspected.
fn collect_soc_rows(document: &Html) -> (Vec<RawRow>, usize) {
    let mut rows = Vec::new();
    let mut candidates = 0;

    for row in document.select(&DATA_ROW_SELECTOR) {
        let Some(section_col) = row.select(&SECTION_COLUMN_SELECTOR).next() else {
            continue;
        };
        let Some(status_col) = row.select(&STATUS_COLUMN_SELECTOR).next() else {
            continue;
        };
        candidates += 1;

        let Some(id) = extract_soc_section_id(&section_col) else {
            continue;
        };

        rows.push(RawRow {
            id,
            status_text: extract_soc_status(&status_col),
        });
    }

    (rows, candidates)
}

fn extract_soc_section_id(section_col: &ElementRef) -> Option<String> {
    let container = section_col
        .select(&CLS_SECTION_SELECTOR)
        .next()
        .unwrap_or(*section_col);

    let from_link = container
        .select(&LINK_SELECTOR)
        .next()
        .map(|a| element_text(&a))
        .filter(|text| SECTION_ID_REGEX.is_match(text));

    from_link.or_else(|| {
        let text = element_text(&container);
        SECTION_ID_SEARCH_REGEX
            .find(&text)
            .map(|m| m.as_str().to_string())
    })
    .map(|id| normalize_section_id(&id))
}

fn extract_soc_status(status_col: &ElementRef) -> Option<String> {
    let text = status_col
        .select(&PARAGRAPH_SELECTOR)
        .next()
        .map(|p| element_text(&p))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| element_text(status_col));

    if !text.is_empty() {
        return Some(text);
    }

    // Text nodes can be empty when the label only lives in markup
    let inner = status_col.inner_html();
    STATUS_IN_HTML_REGEX
        .find(&inner)
        .map(|m| m.as_str().to_string())
}

/// Returns matched rows and the number of candidate rows inspected.
fn collect_table_rows(document: &Html) -> (Vec<RawRow>, usize) {
    let mut rows = Vec::new();
    let mut candidates = 0;

    for tr in document.select(&TABLE_ROW_SELECTOR) {
        let cells: Vec<String> = tr.select(&CELL_SELECTOR).map(|c| element_text(&c)).collect();
        if cells.len() < 2 {
            continue;
        }
        candidates += 1;

        let label = &cells[0];
        if !SECTION_ID_REGEX.is_match(label) {
            continue;
        }

        let mut status = &cells[cells.len() - 1];
        if cells.len() >= 3 && !status.is_empty() && status.chars().all(|c| c.is_ascii_digit()) {
            // Trailing numeric column (seat count); the status is one to the left
            status = &cells[cells.len() - 2];
        }

        rows.push(RawRow {
            id: normalize_section_id(label),
            status_text: Some(status.clone()).filter(|s| !s.is_empty()),
        });
    }

    (rows, candidates)
}
