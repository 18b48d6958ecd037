use std::env;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MissedPagesConfig;
use crate::error::LedgerError;
use crate::title::CanonicalTitle;

/// A request to turn `page` into a redirect to `target`.
#[derive(Debug, Clone, Copy)]
pub struct RedirectEdit<'a> {
    pub page: &'a CanonicalTitle,
    pub target: &'a CanonicalTitle,
    pub editor: &'a str,
    pub comment: &'a str,
}

impl RedirectEdit<'_> {
    pub fn content(&self) -> String {
        redirect_wikitext(self.target)
    }

    pub fn summary(&self) -> String {
        if self.editor.trim().is_empty() {
            self.comment.to_string()
        } else {
            format!("{} (requested by {})", self.comment, self.editor.trim())
        }
    }
}

/// Wikitext for a page whose whole content is a redirect to `target`.
pub fn redirect_wikitext(target: &CanonicalTitle) -> String {
    format!("#REDIRECT [[{}]]", target.text())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditFailure {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Rejected(String),
}

impl EditFailure {
    pub fn into_ledger_error(self, page: &CanonicalTitle) -> LedgerError {
        match self {
            Self::Conflict(detail) => LedgerError::EditConflict {
                title: page.text(),
                detail,
            },
            Self::Rejected(detail) => LedgerError::EditRejected {
                title: page.text(),
                detail,
            },
        }
    }
}

/// Writes page content on the host wiki. Implementations may fail for any
/// reason (rights, conflicts, policy); callers treat every failure as "nothing
/// was written".
pub trait ContentEditor {
    fn save_redirect(&mut self, edit: &RedirectEdit<'_>) -> Result<(), EditFailure>;
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },
    #[error("MediaWiki API request failed with HTTP {0}")]
    Http(StatusCode),
    #[error("failed to call MediaWiki API: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("{0}")]
    Protocol(String),
}

impl From<ApiError> for EditFailure {
    fn from(error: ApiError) -> Self {
        match &error {
            ApiError::Api { code, .. } if code == "editconflict" => {
                Self::Conflict(error.to_string())
            }
            _ => Self::Rejected(error.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiEditorConfig {
    pub api_url: String,
    pub user_agent: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiEditorConfig {
    pub fn from_config(config: &MissedPagesConfig) -> Self {
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            username: env_nonempty("WIKI_BOT_USER"),
            password: env_nonempty("WIKI_BOT_PASS"),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// [`ContentEditor`] backed by the MediaWiki Action API, logged in with a bot
/// password.
pub struct MediaWikiEditor {
    client: Client,
    config: MediaWikiEditorConfig,
    logged_in: bool,
    csrf_token: Option<String>,
}

impl MediaWikiEditor {
    pub fn new(config: MediaWikiEditorConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            logged_in: false,
            csrf_token: None,
        })
    }

    fn api_url(&self) -> Result<Url, ApiError> {
        if self.config.api_url.trim().is_empty() {
            return Err(ApiError::Protocol(
                "WIKI_API_URL is not configured".to_string(),
            ));
        }
        Url::parse(self.config.api_url.trim()).map_err(|error| {
            ApiError::Protocol(format!("invalid WIKI_API_URL {}: {error}", self.config.api_url))
        })
    }

    fn request_json_get(&self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.api_url()?;
        let pairs = with_format(params);

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        return Err(ApiError::Http(status));
                    }
                    return decode_payload(response);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(ApiError::Transport(error));
                }
            }
        }

        Err(ApiError::Protocol(
            "MediaWiki API request exhausted retry budget".to_string(),
        ))
    }

    fn request_json_post(
        &self,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value, ApiError> {
        let url = self.api_url()?;
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = with_format(params);

        for attempt in 0..=max_retries {
            let response = self
                .client
                .post(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();
            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        return Err(ApiError::Http(status));
                    }
                    return decode_payload(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(ApiError::Transport(error));
                }
            }
        }

        Err(ApiError::Protocol(
            "MediaWiki API request exhausted retry budget".to_string(),
        ))
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn ensure_logged_in(&mut self) -> Result<(), ApiError> {
        if self.logged_in {
            return Ok(());
        }
        let (Some(username), Some(password)) =
            (self.config.username.clone(), self.config.password.clone())
        else {
            return Err(ApiError::Protocol(
                "WIKI_BOT_USER and WIKI_BOT_PASS are required to create redirects".to_string(),
            ));
        };

        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let login_token = decode::<TokenQueryResponse>(token_response, "login token")?
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| ApiError::Protocol("failed to get MediaWiki login token".to_string()))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username),
                ("lgpassword", password),
                ("lgtoken", login_token),
            ],
            false,
        )?;
        let login = decode::<LoginResponse>(login_response, "login")?.login;
        match login.result.as_deref() {
            Some("Success") => {
                debug!("logged in to MediaWiki API");
                self.logged_in = true;
                self.csrf_token = None;
                Ok(())
            }
            other => Err(ApiError::Protocol(format!(
                "MediaWiki login failed: {}",
                login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ))),
        }
    }

    fn ensure_csrf_token(&mut self) -> Result<String, ApiError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let token = decode::<TokenQueryResponse>(response, "csrf token")?
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| ApiError::Protocol("failed to get MediaWiki csrf token".to_string()))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl ContentEditor for MediaWikiEditor {
    fn save_redirect(&mut self, edit: &RedirectEdit<'_>) -> Result<(), EditFailure> {
        self.ensure_logged_in()?;
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", edit.page.text()),
                ("text", edit.content()),
                ("summary", edit.summary()),
                ("token", token),
            ],
            true,
        );
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                if matches!(&error, ApiError::Api { code, .. } if code == "badtoken") {
                    self.csrf_token = None;
                }
                warn!(page = %edit.page, "MediaWiki redirect edit failed: {error}");
                return Err(error.into());
            }
        };
        check_edit_result(response, edit.page)
    }
}

fn check_edit_result(response: Value, page: &CanonicalTitle) -> Result<(), EditFailure> {
    let edit = decode::<EditResponse>(response, "edit")?
        .edit
        .ok_or_else(|| {
            EditFailure::Rejected("missing edit payload in API response".to_string())
        })?;
    match edit.result.as_deref() {
        Some("Success") => Ok(()),
        other => Err(EditFailure::Rejected(format!(
            "MediaWiki edit failed for {page}: {}",
            other.unwrap_or("unknown")
        ))),
    }
}

fn with_format(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn decode_payload(response: reqwest::blocking::Response) -> Result<Value, ApiError> {
    let payload: Value = response.json().map_err(|error| {
        ApiError::Protocol(format!("failed to decode MediaWiki API JSON response: {error}"))
    })?;
    api_error_from_payload(&payload).map_or(Ok(payload), Err)
}

fn api_error_from_payload(payload: &Value) -> Option<ApiError> {
    let error = payload.get("error")?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    Some(ApiError::Api {
        code: code.to_string(),
        info: info.to_string(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|error| ApiError::Protocol(format!("failed to decode {what} response: {error}")))
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
