// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use tracing::Level;

use crate::debounce::FlushStrategy;
use crate::errors::ConfigError;
use crate::sender::RecipientList;
use crate::telegram::DEFAULT_API_URL;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_JOURNAL_COMMAND: &str = "journalctl --user -f -o json";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime configuration for the forwarder.
#[derive(Clone)]
pub struct Config {
    /// Bot token. Without one every flush goes to the fallback sink.
    pub bot_token: Option<String>,
    /// Chat ids that receive every flush
    pub recipients: RecipientList,
    /// Only units starting with this prefix are forwarded; `None` forwards all
    pub unit_prefix: Option<String>,
    pub flush_strategy: FlushStrategy,
    /// Upper bound on one delivery attempt to one recipient
    pub send_timeout: Duration,
    pub api_url: String,
    /// Formatting mode sent with each message, omitted when `None`
    pub parse_mode: Option<String>,
    /// Minimum level of the process's own log events that get forwarded
    pub forward_level: Level,
    /// Console log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Program and arguments producing the journal stream
    pub journal_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            recipients: RecipientList::default(),
            unit_prefix: None,
            flush_strategy: FlushStrategy::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            api_url: DEFAULT_API_URL.to_string(),
            parse_mode: Some("Markdown".to_string()),
            forward_level: Level::WARN,
            log_level: "info".to_string(),
            journal_command: split_command(DEFAULT_JOURNAL_COMMAND),
        }
    }
}

impl Config {
    /// Reads the process environment. See [`Config::from_lookup`].
    #[must_use]
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from `lookup`, which maps variable names to
    /// values.
    ///
    /// Parsing is lenient: a malformed value keeps its default and the
    /// problem is returned so the caller can report it once logging is up.
    /// Call [`Config::validate`] before using the result.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut issues = Vec::new();
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        config.bot_token = non_empty("TGLOG_BOT_TOKEN").map(|val| val.trim().to_string());

        if let Some(raw) = lookup("TGLOG_RECIPIENTS") {
            let (recipients, errors) = RecipientList::parse(&raw);
            config.recipients = recipients;
            issues.extend(errors);
        }

        config.unit_prefix = non_empty("TGLOG_UNIT_PREFIX");

        if let Some(raw) = non_empty("TGLOG_FLUSH_STRATEGY") {
            match raw.parse() {
                Ok(strategy) => config.flush_strategy = strategy,
                Err(e) => issues.push(e),
            }
        }

        if let Some(raw) = non_empty("TGLOG_SEND_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.send_timeout = Duration::from_secs(secs),
                Err(_) => issues.push(ConfigError::Invalid(format!(
                    "TGLOG_SEND_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"
                ))),
            }
        }

        if let Some(url) = non_empty("TGLOG_API_URL") {
            config.api_url = url.trim().to_string();
        }

        // set but empty disables the parse mode
        if let Some(mode) = lookup("TGLOG_PARSE_MODE") {
            let mode = mode.trim();
            config.parse_mode = (!mode.is_empty()).then(|| mode.to_string());
        }

        if let Some(raw) = non_empty("TGLOG_FORWARD_LEVEL") {
            match raw.trim().parse::<Level>() {
                Ok(level) => config.forward_level = level,
                Err(_) => issues.push(ConfigError::Invalid(format!(
                    "TGLOG_FORWARD_LEVEL '{raw}' is not a log level"
                ))),
            }
        }

        if let Some(level) = non_empty("TGLOG_LOG_LEVEL") {
            config.log_level = level.trim().to_lowercase();
        }

        if let Some(command) = lookup("TGLOG_JOURNAL_COMMAND") {
            config.journal_command = split_command(&command);
        }

        (config, issues)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_strategy.window().is_zero() {
            return Err(ConfigError::Invalid(
                "flush window must be greater than 0".to_string(),
            ));
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "TGLOG_SEND_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.journal_command.is_empty() {
            return Err(ConfigError::Invalid(
                "TGLOG_JOURNAL_COMMAND cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("recipients", &self.recipients)
            .field("unit_prefix", &self.unit_prefix)
            .field("flush_strategy", &self.flush_strategy)
            .field("send_timeout", &self.send_timeout)
            .field("api_url", &self.api_url)
            .field("parse_mode", &self.parse_mode)
            .field("forward_level", &self.forward_level)
            .field("log_level", &self.log_level)
            .field("journal_command", &self.journal_command)
            .finish()
    }
}
