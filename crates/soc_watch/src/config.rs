//! Configuration from command-line flags, `SOC_*` environment variables and a `.env` file.
use crate::error::ConfigError;
use crate::rules::{AvailabilityRule, RuleName};
use clap::builder::FalseyValueParser;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default location of the persisted last snapshot.
pub const DEFAULT_STATE_PATH: &str = ".state/last.json";

/// Raw command-line arguments. Flags take precedence over environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "soc-watch",
    about = "Schedule of Classes availability watcher - monitor a course page for seat openings",
    version
)]
pub struct CliArgs {
    /// SOC results URL to monitor
    #[arg(long, env = "SOC_URL")]
    pub url: Option<String>,

    /// Poll interval in seconds
    #[arg(long, env = "SOC_INTERVAL_SEC", default_value_t = 60)]
    pub interval: u64,

    /// Availability rule (any_open, lecture_and_discussion, specific_sections)
    #[arg(long, env = "SOC_RULE", default_value = "any_open")]
    pub rule: String,

    /// Comma-separated section IDs for specific_sections (e.g. "Lec 1,Dis 1A")
    #[arg(long, env = "SOC_SECTIONS")]
    pub sections: Option<String>,

    /// Where the last snapshot is kept between runs
    #[arg(long, env = "SOC_STATE_FILE", default_value = DEFAULT_STATE_PATH)]
    pub state_file: PathBuf,

    /// Run a single poll and exit
    #[arg(long)]
    pub once: bool,

    /// Verbose logging
    #[arg(short, long, env = "SOC_VERBOSE", value_parser = FalseyValueParser::new())]
    pub verbose: bool,

    /// Generic webhook receiving a JSON body per event
    #[arg(long, env = "SOC_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Slack Incoming Webhook URL
    #[arg(long, env = "SOC_SLACK_WEBHOOK")]
    pub slack_webhook: Option<String>,

    /// Slack Bot User OAuth Token (xoxb-...) for DM notifications
    #[arg(long, env = "SOC_SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: Option<String>,

    /// Slack User ID (U0xxxxx) to receive DM notifications
    #[arg(long = "slack-dm-user", env = "SOC_SLACK_DM_USER_ID")]
    pub slack_dm_user_id: Option<String>,

    /// Slack channel to post to instead of a DM; pings the DM user
    #[arg(long, env = "SOC_SLACK_CHANNEL")]
    pub slack_channel: Option<String>,

    /// Post the status line to Slack on every poll
    #[arg(long, env = "SOC_SLACK_TEST", value_parser = FalseyValueParser::new())]
    pub slack_test: bool,
}

/// Slack Bot API delivery target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackBotConfig {
    pub token: String,
    pub user_id: String,
    pub channel: Option<String>,
}

/// Validated watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub url: Url,
    pub interval: Duration,
    pub rule: AvailabilityRule,
    pub state_path: PathBuf,
    pub verbose: bool,
    pub webhook_url: Option<Url>,
    pub slack_webhook_url: Option<Url>,
    pub slack_bot: Option<SlackBotConfig>,
    /// Send the per-poll status line to Slack, not only transitions
    pub slack_status_every_poll: bool,
}

impl WatchConfig {
    /// Creates a configuration with defaults for everything but the URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            interval: Duration::from_secs(60),
            rule: AvailabilityRule::default(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            verbose: false,
            webhook_url: None,
            slack_webhook_url: None,
            slack_bot: None,
            slack_status_every_poll: false,
        }
    }

    /// Validates raw arguments into a configuration.
    ///
    /// # Returns
    /// * `Ok(WatchConfig)` - Ready to run
    /// * `Err(ConfigError)` - On a missing/invalid URL, unknown rule, empty watch
    ///   list, zero interval, or half-configured Slack bot
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let url = args
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUrl)?;
        let url = parse_http_url(url)?;

        if args.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        let rule_name: RuleName = args.rule.parse()?;
        let rule = AvailabilityRule::from_parts(rule_name, args.sections.as_deref())?;

        let slack_bot = match (
            non_empty(&args.slack_bot_token),
            non_empty(&args.slack_dm_user_id),
        ) {
            (Some(token), Some(user_id)) => Some(SlackBotConfig {
                token,
                user_id,
                channel: non_empty(&args.slack_channel),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteSlackBot),
        };

        Ok(Self {
            url,
            interval: Duration::from_secs(args.interval),
            rule,
            state_path: args.state_file.clone(),
            verbose: args.verbose,
            webhook_url: non_empty(&args.webhook_url)
                .map(|u| parse_http_url(&u))
                .transpose()?,
            slack_webhook_url: non_empty(&args.slack_webhook)
                .map(|u| parse_http_url(&u))
                .transpose()?,
            slack_bot,
            slack_status_every_poll: args.slack_test,
        })
    }

    /// Returns true if any Slack delivery is configured.
    pub fn has_slack(&self) -> bool {
        self.slack_webhook_url.is_some() || self.slack_bot.is_some()
    }
}

/// Loads `KEY=value` lines from an env file into the process environment.
///
/// Variables that are already set are left alone. Without `path`, a `.env` file is
/// looked up from the current directory upward. Returns the file that was loaded.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => dotenvy::from_path(path).ok().map(|()| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            message: format!("unsupported scheme {scheme}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOC_URL: &str =
        "https://sa.ucla.edu/ro/public/soc/Results?SubjectAreaName=Computer+Science";

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["soc-watch", "--url", SOC_URL];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = WatchConfig::from_args(&args(&[])).unwrap();

        assert_eq!(config.url.as_str(), SOC_URL);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.rule, AvailabilityRule::any_open());
        assert_eq!(config.state_path, PathBuf::from(DEFAULT_STATE_PATH));
        assert!(!config.has_slack());
    }

    #[test]
    fn test_specific_sections_from_flags() {
        let config = WatchConfig::from_args(&args(&[
            "--rule",
            "specific_sections",
            "--sections",
            "Lec 1, Dis 1A",
        ]))
        .unwrap();

        assert_eq!(
            config.rule,
            AvailabilityRule::specific_sections(["Lec 1", "Dis 1A"]).unwrap()
        );
    }

    #[test]
    fn test_specific_sections_without_list_fails() {
        let err = WatchConfig::from_args(&args(&["--rule", "specific_sections"])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyWatchList);
    }

    #[test]
    fn test_invalid_values() {
        let mut raw = args(&[]);
        raw.url = Some("ftp://example.com/soc".to_string());
        assert!(matches!(
            WatchConfig::from_args(&raw),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let mut raw = args(&[]);
        raw.interval = 0;
        assert_eq!(WatchConfig::from_args(&raw).unwrap_err(), ConfigError::InvalidInterval);

        let mut raw = args(&[]);
        raw.url = Some("  ".to_string());
        assert_eq!(WatchConfig::from_args(&raw).unwrap_err(), ConfigError::MissingUrl);
    }

    #[test]
    fn test_slack_bot_requires_user() {
        let err = WatchConfig::from_args(&args(&["--slack-bot-token", "xoxb-123"])).unwrap_err();
        assert_eq!(err, ConfigError::IncompleteSlackBot);

        let config = WatchConfig::from_args(&args(&[
            "--slack-bot-token",
            "xoxb-123",
            "--slack-dm-user",
            "U0123",
        ]))
        .unwrap();
        assert_eq!(
            config.slack_bot,
            Some(SlackBotConfig {
                token: "xoxb-123".to_string(),
                user_id: "U0123".to_string(),
                channel: None,
            })
        );
    }

    #[test]
    fn test_env_file_fills_unset_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "SOC_WATCH_ENV_FILE_ONLY=from-file\nSOC_WATCH_ENV_FILE_PRESET=from-file\n",
        )
        .unwrap();
        std::env::set_var("SOC_WATCH_ENV_FILE_PRESET", "from-env");

        assert_eq!(load_env_file(Some(&path)), Some(path.clone()));
        assert_eq!(std::env::var("SOC_WATCH_ENV_FILE_ONLY").unwrap(), "from-file");
        assert_eq!(std::env::var("SOC_WATCH_ENV_FILE_PRESET").unwrap(), "from-env");

        assert_eq!(load_env_file(Some(&dir.path().join("absent.env"))), None);
    }
}
