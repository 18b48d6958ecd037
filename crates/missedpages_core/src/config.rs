use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "missedpages/0.1";
pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const DEFAULT_TREND_DAYS: usize = 300;
pub const DEFAULT_REDIRECT_COMMENT: &str = "Redirected from the missed pages log";
pub const DEFAULT_ACTOR_NAME: &str = "missedpages";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MissedPagesConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub rights: RightsSection,
    #[serde(default)]
    pub actor: ActorSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LedgerSection {
    /// Row cap for the main report until it grows real pagination.
    #[serde(default = "default_log_limit")]
    pub log_limit: usize,
    #[serde(default = "default_trend_days")]
    pub trend_days: usize,
    pub redirect_comment: Option<String>,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            log_limit: DEFAULT_LOG_LIMIT,
            trend_days: DEFAULT_TREND_DAYS,
            redirect_comment: None,
        }
    }
}

/// Names of the host rights each administrative action requires.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RightsSection {
    #[serde(default = "default_redirect_right")]
    pub redirect: String,
    #[serde(default = "default_ignore_right")]
    pub ignore: String,
    #[serde(default = "default_delete_right")]
    pub delete: String,
}

impl Default for RightsSection {
    fn default() -> Self {
        Self {
            redirect: default_redirect_right(),
            ignore: default_ignore_right(),
            delete: default_delete_right(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ActorSection {
    pub name: Option<String>,
    #[serde(default)]
    pub rights: Vec<String>,
}

impl MissedPagesConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        if let Some(value) = env_nonempty("WIKI_API_URL") {
            return Some(value);
        }
        self.wiki.api_url.clone()
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_nonempty("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn redirect_comment(&self) -> &str {
        self.ledger
            .redirect_comment
            .as_deref()
            .filter(|comment| !comment.trim().is_empty())
            .unwrap_or(DEFAULT_REDIRECT_COMMENT)
    }

    /// Identity recorded on redirect edits: config > env WIKI_BOT_USER > DEFAULT_ACTOR_NAME.
    pub fn actor_name(&self) -> String {
        if let Some(name) = self.actor.name.as_deref()
            && !name.trim().is_empty()
        {
            return name.trim().to_string();
        }
        env_nonempty("WIKI_BOT_USER").unwrap_or_else(|| DEFAULT_ACTOR_NAME.to_string())
    }
}

/// Load and parse a config from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MissedPagesConfig> {
    if !config_path.exists() {
        return Ok(MissedPagesConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MissedPagesConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    validate_config(&parsed)
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

fn validate_config(config: &MissedPagesConfig) -> Result<()> {
    if config.ledger.log_limit == 0 {
        bail!("ledger.log_limit must be at least 1");
    }
    if config.ledger.trend_days == 0 {
        bail!("ledger.trend_days must be at least 1");
    }
    for (key, right) in [
        ("rights.redirect", &config.rights.redirect),
        ("rights.ignore", &config.rights.ignore),
        ("rights.delete", &config.rights.delete),
    ] {
        if right.trim().is_empty() {
            bail!("{key} cannot be empty");
        }
    }
    Ok(())
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_log_limit() -> usize {
    DEFAULT_LOG_LIMIT
}

fn default_trend_days() -> usize {
    DEFAULT_TREND_DAYS
}

fn default_redirect_right() -> String {
    "edit".to_string()
}

fn default_ignore_right() -> String {
    "block".to_string()
}

fn default_delete_right() -> String {
    "delete".to_string()
}
