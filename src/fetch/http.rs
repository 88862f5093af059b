//! # HTTP crawl handler
//!
//! Crawls one community per job: its `about` document and the newest listing.
//! With client credentials configured it authenticates through the
//! client-credentials grant and uses the API host; without them, or when the
//! API rejects an issued token, it falls back to the public JSON endpoints.
//! A failed token exchange fails the job.
//!
//! Every outbound request, token exchange included, first takes a permit from
//! the shared [`RateLimiter`]. A `429` is retried after the upstream
//! `Retry-After` delay composed with the regular pacing interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::{CrawlReport, ExecutionError, JobHandler};
use crate::config::UpstreamConfig;
use crate::models::crawl_job::Model as CrawlJobModel;
use crate::rate_limiter::RateLimiter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Tokens are refreshed this long before the upstream expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
const MAX_SUBJECT_LEN: usize = 64;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

pub struct HttpCrawlHandler {
    client: Client,
    limiter: Arc<RateLimiter>,
    config: UpstreamConfig,
    api_base: Url,
    public_base: Url,
    token_url: Url,
    token: Mutex<Option<CachedToken>>,
}

impl HttpCrawlHandler {
    pub fn new(config: UpstreamConfig, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let api_base = parse_base("api_base", &config.api_base)?;
        let public_base = parse_base("public_base", &config.public_base)?;
        let token_url = Url::parse(&config.token_url)
            .with_context(|| format!("invalid upstream token_url '{}'", config.token_url))?;

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            limiter,
            config,
            api_base,
            public_base,
            token_url,
            token: Mutex::new(None),
        })
    }

    async fn crawl_authenticated(
        &self,
        subject: &str,
        client_id: &str,
        client_secret: &str,
        report: &mut CrawlReport,
    ) -> Result<(), ExecutionError> {
        let token = self.bearer_token(client_id, client_secret, report).await?;

        let about = endpoint(&self.api_base, &["r", subject, "about"]);
        self.fetch_json(about, Some(&token), report).await?;

        let mut listing = endpoint(&self.api_base, &["r", subject, "new"]);
        listing
            .query_pairs_mut()
            .append_pair("limit", &self.config.listing_limit.to_string());
        let body = self.fetch_json(listing, Some(&token), report).await?;
        report.items = listing_size(&body)?;
        report.authenticated = true;
        Ok(())
    }

    async fn crawl_public(&self, subject: &str, report: &mut CrawlReport) -> Result<(), ExecutionError> {
        let about = endpoint(&self.public_base, &["r", subject, "about.json"]);
        self.fetch_json(about, None, report).await?;

        let mut listing = endpoint(&self.public_base, &["r", subject, "new.json"]);
        listing
            .query_pairs_mut()
            .append_pair("limit", &self.config.listing_limit.to_string());
        let body = self.fetch_json(listing, None, report).await?;
        report.items = listing_size(&body)?;
        Ok(())
    }

    /// Cached application token, exchanged again once it nears expiry.
    async fn bearer_token(
        &self,
        client_id: &str,
        client_secret: &str,
        report: &mut CrawlReport,
    ) -> Result<String, ExecutionError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Instant::now()) {
            return Ok(token.access_token.clone());
        }

        let response = self
            .send_paced(
                || {
                    self.client
                        .post(self.token_url.clone())
                        .basic_auth(client_id, Some(client_secret))
                        .form(&[("grant_type", "client_credentials")])
                },
                report,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::TokenExchange {
                status: status.as_u16(),
                url: self.token_url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        report.bytes += bytes.len() as u64;
        let token: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ExecutionError::Malformed(format!("token response: {}", e)))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        debug!(ttl_secs = ttl.as_secs(), "Obtained upstream application token");
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch_json(
        &self,
        url: Url,
        token: Option<&str>,
        report: &mut CrawlReport,
    ) -> Result<Value, ExecutionError> {
        let response = self
            .send_paced(
                || {
                    let request = self.client.get(url.clone());
                    match token {
                        Some(token) => request.header("Authorization", format!("Bearer {}", token)),
                        None => request,
                    }
                },
                report,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::UpstreamStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        report.bytes += bytes.len() as u64;
        serde_json::from_slice(&bytes)
            .map_err(|e| ExecutionError::Malformed(format!("{}: {}", url, e)))
    }

    /// Send a request built by `build`, pacing through the limiter and
    /// retrying throttled responses up to the configured limit.
    async fn send_paced<F>(&self, build: F, report: &mut CrawlReport) -> Result<Response, ExecutionError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.limiter.acquire().await?;
        let mut throttled: u32 = 0;

        loop {
            report.requests += 1;
            let response = build().send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let retry_after = parse_retry_after(response.headers(), Utc::now());
            counter!("upstream_throttled_total").increment(1);

            if throttled >= self.config.max_throttle_retries {
                return Err(ExecutionError::UpstreamThrottled {
                    attempts: throttled + 1,
                    retry_after,
                });
            }
            throttled += 1;

            let delay = retry_after.unwrap_or_else(|| self.limiter.interval());
            warn!(
                url = %response.url(),
                attempt = throttled,
                delay_ms = delay.as_millis() as u64,
                "Upstream throttled request; backing off"
            );
            self.limiter.acquire_after(delay).await?;
        }
    }
}

#[async_trait]
impl JobHandler for HttpCrawlHandler {
    async fn execute(&self, job: &CrawlJobModel) -> Result<CrawlReport, ExecutionError> {
        let subject = validate_subject(&job.subject_id)?;
        let mut report = CrawlReport::default();

        if let (Some(client_id), Some(client_secret)) =
            (&self.config.client_id, &self.config.client_secret)
        {
            match self
                .crawl_authenticated(subject, client_id, client_secret, &mut report)
                .await
            {
                Ok(()) => {
                    info!(
                        job_id = %job.id,
                        subject_id = subject,
                        requests = report.requests,
                        items = report.items,
                        "Crawled subject through authenticated API"
                    );
                    return Ok(report);
                }
                Err(ExecutionError::UpstreamStatus { status, url })
                    if status == StatusCode::UNAUTHORIZED.as_u16() =>
                {
                    self.invalidate_token().await;
                    counter!("upstream_auth_fallbacks_total").increment(1);
                    warn!(%url, "Upstream rejected credentials; falling back to public endpoints");
                }
                Err(err) => return Err(err),
            }
        }

        self.crawl_public(subject, &mut report).await?;
        info!(
            job_id = %job.id,
            subject_id = subject,
            requests = report.requests,
            items = report.items,
            "Crawled subject through public endpoints"
        );
        Ok(report)
    }
}

fn parse_base(field: &str, value: &str) -> anyhow::Result<Url> {
    let url = Url::parse(value).with_context(|| format!("invalid upstream {} '{}'", field, value))?;
    if url.cannot_be_a_base() {
        bail!("upstream {} '{}' cannot be used as a base URL", field, value);
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn validate_subject(subject: &str) -> Result<&str, ExecutionError> {
    let valid = !subject.is_empty()
        && subject.len() <= MAX_SUBJECT_LEN
        && subject.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(subject)
    } else {
        Err(ExecutionError::InvalidSubject(subject.to_string()))
    }
}

fn listing_size(body: &Value) -> Result<u64, ExecutionError> {
    body.pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| children.len() as u64)
        .ok_or_else(|| ExecutionError::Malformed("listing without data.children".to_string()))
}

/// `Retry-After` as either delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(
            parse_retry_after(&headers("7"), now),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:50Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn retry_after_in_the_past_is_zero() {
        let now = Utc::now();
        assert_eq!(
            parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn retry_after_garbage_is_ignored() {
        assert_eq!(parse_retry_after(&headers("soon"), Utc::now()), None);
        assert_eq!(parse_retry_after(&HeaderMap::new(), Utc::now()), None);
    }

    #[test]
    fn endpoint_appends_segments() {
        let base = Url::parse("https://api.example.com/v1/").unwrap();
        assert_eq!(
            endpoint(&base, &["r", "rust", "about"]).as_str(),
            "https://api.example.com/v1/r/rust/about"
        );

        let bare = Url::parse("http://127.0.0.1:9999").unwrap();
        assert_eq!(
            endpoint(&bare, &["r", "rust", "new.json"]).as_str(),
            "http://127.0.0.1:9999/r/rust/new.json"
        );
    }

    #[test]
    fn subjects_are_restricted_to_community_names() {
        assert!(validate_subject("rust_lang").is_ok());
        assert!(validate_subject("").is_err());
        assert!(validate_subject("../admin").is_err());
        assert!(validate_subject("a b").is_err());
        assert!(validate_subject(&"x".repeat(MAX_SUBJECT_LEN + 1)).is_err());
    }

    #[test]
    fn listing_size_counts_children() {
        let body = serde_json::json!({"data": {"children": [{}, {}, {}]}});
        assert_eq!(listing_size(&body).unwrap(), 3);
        assert!(listing_size(&serde_json::json!({"data": {}})).is_err());
    }
}
