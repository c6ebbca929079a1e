use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api_error::FailureKind;
use crate::config::{DEFAULT_USER_AGENT, ToolConfig};
use crate::site::Site;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemotePage {
    pub title: String,
    pub namespace: i32,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    /// Timestamp of the revision the edit is based on, for conflict detection.
    pub base_timestamp: Option<String>,
    pub minor: bool,
    pub bot: bool,
    /// Fail with `missingtitle` instead of creating the page.
    pub no_create: bool,
    /// Fail with `articleexists` instead of overwriting an existing page.
    pub create_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditResult {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

pub trait WikiReadApi {
    /// Current wikitext of `title`, or `None` when the page does not exist.
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, request: &EditRequest) -> Result<EditResult>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    pub maxlag: Option<u64>,
}

impl MediaWikiClientConfig {
    pub fn from_env(api_url: &str) -> Self {
        Self::from_env_with_defaults(api_url, DEFAULT_USER_AGENT, None)
    }

    pub fn for_site(site: &Site, config: &ToolConfig) -> Self {
        Self::from_env_with_defaults(site.api_url(), &config.user_agent(), config.maxlag())
    }

    fn from_env_with_defaults(api_url: &str, user_agent: &str, maxlag: Option<u64>) -> Self {
        Self {
            api_url: api_url.to_string(),
            user_agent: user_agent.to_string(),
            timeout_ms: env_value_u64("MW_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("MW_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("MW_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("MW_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("MW_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("MW_HTTP_RETRY_DELAY_MS", 500),
            maxlag,
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_pairs(&self, params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(params.len() + 3);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        if let Some(maxlag) = self.config.maxlag {
            pairs.push(("maxlag".to_string(), maxlag.to_string()));
        }
        for (key, value) in params {
            pairs.push(((*key).to_string(), value.clone()));
        }
        pairs
    }

    fn request_json(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let retry_delay_ms = self.config.retry_delay_ms;
        let pairs = self.request_pairs(params);
        let action = params
            .iter()
            .find(|(key, _)| *key == "action")
            .map(|(_, value)| value.as_str())
            .unwrap_or("?")
            .to_string();

        run_attempts(
            max_retries,
            |attempt, can_retry| self.send_once(&pairs, &action, is_write, attempt, can_retry),
            |attempt| sleep(backoff_delay(retry_delay_ms, attempt, is_write)),
        )
    }

    fn send_once(
        &mut self,
        pairs: &[(String, String)],
        action: &str,
        is_write: bool,
        attempt: usize,
        can_retry: bool,
    ) -> Result<Attempt> {
        self.apply_rate_limit(is_write);
        debug!(
            "{} action={action} attempt={attempt}",
            if is_write { "POST" } else { "GET" }
        );
        let request = if is_write {
            self.client.post(&self.config.api_url).form(pairs)
        } else {
            self.client.get(&self.config.api_url).query(pairs)
        };
        let response = match request
            .header("User-Agent", self.config.user_agent.clone())
            .send()
        {
            Ok(response) => response,
            Err(error) if can_retry && is_retryable_error(&error) => {
                debug!("retrying action={action} after transport error: {error}");
                return Ok(Attempt::Retry);
            }
            Err(error) => return Err(error).context("failed to call MediaWiki API"),
        };

        let status = response.status();
        if !status.is_success() {
            if can_retry && is_retryable_status(status) {
                debug!("retrying action={action} after HTTP {status}");
                return Ok(Attempt::Retry);
            }
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        classify_payload(payload, action, can_retry)
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            false,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl TokenedEdit for MediaWikiClient {
    fn csrf_token(&mut self) -> Result<String> {
        self.ensure_csrf_token()
    }

    fn forget_csrf_token(&mut self) {
        self.csrf_token = None;
    }

    fn submit_edit(&mut self, request: &EditRequest, token: String) -> Result<EditResult> {
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.clone()),
            ("text", request.text.clone()),
            ("summary", request.summary.clone()),
        ];
        if let Some(timestamp) = &request.base_timestamp {
            params.push(("basetimestamp", timestamp.clone()));
        }
        for (key, enabled) in [
            ("minor", request.minor),
            ("bot", request.bot),
            ("nocreate", request.no_create),
            ("createonly", request.create_only),
        ] {
            if enabled {
                params.push((key, "1".to_string()));
            }
        }
        params.push(("token", token));
        let response = self.request_json(&params, true)?;
        parse_edit_response(&request.title, response)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>> {
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp|ids".to_string()),
                ("rvslots", "main".to_string()),
            ],
            false,
        )?;
        parse_page_response(title, response)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            false,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn edit_page(&mut self, request: &EditRequest) -> Result<EditResult> {
        edit_with_token_refresh(self, request)
    }
}

/// Split an API response into its payload or its classified `error` member.
pub fn check_api_response(payload: Value) -> std::result::Result<Value, FailureKind> {
    match FailureKind::from_response(&payload) {
        Some(failure) => Err(failure),
        None => Ok(payload),
    }
}

pub fn is_bad_token(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<FailureKind>(),
        Some(FailureKind::BadToken(_))
    )
}

/// Where CSRF tokens come from and how an edit is sent with one.
trait TokenedEdit {
    fn csrf_token(&mut self) -> Result<String>;
    fn forget_csrf_token(&mut self);
    fn submit_edit(&mut self, request: &EditRequest, token: String) -> Result<EditResult>;
}

/// Submit `request`; a `badtoken` rejection drops the cached token and the
/// edit is sent exactly once more with a fresh one.
fn edit_with_token_refresh<T: TokenedEdit>(api: &mut T, request: &EditRequest) -> Result<EditResult> {
    let token = api.csrf_token()?;
    match api.submit_edit(request, token) {
        Err(error) if is_bad_token(&error) => {
            warn!("{error}; refreshing csrf token and retrying once");
            api.forget_csrf_token();
            let token = api.csrf_token()?;
            api.submit_edit(request, token)
        }
        other => other,
    }
}

#[derive(Debug)]
enum Attempt {
    Done(Value),
    Retry,
}

/// Call `attempt` until it yields a payload or an error, waiting between
/// tries. `attempt` learns whether another try is still in the budget.
fn run_attempts<A, W>(max_retries: usize, mut attempt: A, mut wait: W) -> Result<Value>
where
    A: FnMut(usize, bool) -> Result<Attempt>,
    W: FnMut(usize),
{
    for index in 0..=max_retries {
        match attempt(index, index < max_retries)? {
            Attempt::Done(payload) => return Ok(payload),
            Attempt::Retry => wait(index),
        }
    }
    bail!("MediaWiki API request exhausted retry budget")
}

fn classify_payload(payload: Value, action: &str, can_retry: bool) -> Result<Attempt> {
    match check_api_response(payload) {
        Err(failure @ FailureKind::MaxLag(_)) if can_retry => {
            warn!("{failure}; retrying action={action}");
            Ok(Attempt::Retry)
        }
        Err(failure) => Err(failure.into()),
        Ok(payload) => Ok(Attempt::Done(payload)),
    }
}

fn backoff_delay(retry_delay_ms: u64, attempt: usize, is_write: bool) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = retry_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    let multiplier = if is_write { 2u64 } else { 1u64 };
    Duration::from_millis(base.saturating_mul(multiplier).saturating_add(jitter))
}

fn parse_page_response(title: &str, response: Value) -> Result<Option<RemotePage>> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page content API response")?;
    let Some(page) = parsed.query.pages.into_iter().next() else {
        bail!("page query for {title} returned no pages");
    };
    if page.invalid.unwrap_or(false) {
        bail!(
            "invalid page title {title}: {}",
            page.invalidreason.unwrap_or_else(|| "no reason given".to_string())
        );
    }
    if page.missing.unwrap_or(false) {
        return Ok(None);
    }
    let revision = page
        .revisions
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("page {} has no revisions", page.title))?;
    let content = revision
        .slots
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .ok_or_else(|| anyhow::anyhow!("page {} has no main slot content", page.title))?;
    let page_id = page
        .pageid
        .ok_or_else(|| anyhow::anyhow!("page {} has no page id", page.title))?;

    Ok(Some(RemotePage {
        title: page.title,
        namespace: page.ns,
        page_id,
        revision_id: revision.revid,
        timestamp: revision.timestamp,
        content,
    }))
}

fn parse_edit_response(title: &str, response: Value) -> Result<EditResult> {
    let edit_payload: EditResponse =
        serde_json::from_value(response).context("failed to decode edit response")?;
    let edit = edit_payload
        .edit
        .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
    if edit.result.as_deref() != Some("Success") {
        bail!(
            "MediaWiki edit failed for {}: {}",
            title,
            edit.result.unwrap_or_else(|| "unknown".to_string())
        );
    }
    Ok(EditResult {
        title: edit.title.unwrap_or_else(|| title.to_string()),
        new_revision_id: edit.newrevid,
        no_change: edit.nochange.unwrap_or(false),
    })
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
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    #[serde(default)]
    ns: i32,
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    invalidreason: Option<String>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
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
    title: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}
