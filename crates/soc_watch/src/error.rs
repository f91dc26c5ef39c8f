//! Error types for the watcher.

use thiserror::Error;

/// The page did not contain anything that looks like a section listing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Body was empty or whitespace only
    #[error("Empty document")]
    EmptyDocument,

    /// Neither the SOC row layout nor a section table was found
    #[error("No section rows found; page layout may have changed")]
    NoSectionRows,

    /// Candidate rows exist but none of them carried a section identifier
    #[error("Found {rows} candidate rows but no section identifiers")]
    NoSections { rows: usize },
}

/// Errors while downloading the SOC page.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    /// Network/HTTP transport failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Server answered with a non-success status
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// Could not build the HTTP client
    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },
}

impl FetchError {
    /// Returns true if the server asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status: 429, .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network {
            message: err.to_string(),
        }
    }
}

/// Errors while persisting the last snapshot.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors while delivering a notification.
#[derive(Debug, Error, Clone)]
pub enum NotifyError {
    /// Network/HTTP request failed
    #[error("{notifier}: network error: {message}")]
    Network { notifier: &'static str, message: String },

    /// Endpoint answered with a non-success status
    #[error("{notifier}: endpoint returned status {status}")]
    Status { notifier: &'static str, status: u16 },

    /// Slack API answered `ok: false`
    #[error("{notifier}: Slack API error: {error}")]
    SlackApi { notifier: &'static str, error: String },
}

/// Invalid or missing configuration, reported before polling starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No URL configured (use --url or SOC_URL)")]
    MissingUrl,

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Unknown availability rule: {0}")]
    UnknownRule(String),

    #[error("Rule specific_sections needs at least one section (use --sections or SOC_SECTIONS)")]
    EmptyWatchList,

    #[error("Poll interval must be at least one second")]
    InvalidInterval,

    #[error("Slack bot notifications need both a bot token and a user ID")]
    IncompleteSlackBot,
}

/// Top-level error for a poll iteration.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WatchError {
    /// Returns true if the next scheduled poll may succeed without intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatchError::Parse(_) | WatchError::Fetch(_) | WatchError::State(_)
        )
    }
}
