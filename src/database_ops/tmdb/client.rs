use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::config::TmdbCrawlConfig;
use super::throttle::{AdaptiveThrottle, ThrottleSettings};
use crate::database_ops::errors::CrawlError;

/// The one capability the crawl needs from HTTP: GET a URL, get JSON back.
///
/// Retries, backoff and pacing live behind this trait; callers see either a JSON body or
/// a terminal failure.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value, CrawlError>;
}

/// Endpoint URLs for the movie API.
#[derive(Debug, Clone)]
pub struct TmdbUrls {
    base: String,
    api_key: Option<String>,
    sort_by: String,
    release_types: String,
}

impl TmdbUrls {
    pub fn new(cfg: &TmdbCrawlConfig) -> Self {
        Self {
            base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            sort_by: cfg.sort_by.clone(),
            release_types: cfg.release_types.clone(),
        }
    }

    pub fn discover(&self, year: i32, page: u32) -> String {
        let mut url = format!(
            "{}/discover/movie?sort_by={}&page={}&with_release_type={}&primary_release_year={}",
            self.base,
            self.sort_by,
            page,
            urlencode_pipe(&self.release_types),
            year
        );
        self.push_key(&mut url);
        url
    }

    pub fn movie(&self, movie_id: i64) -> String {
        self.with_key(format!("{}/movie/{}", self.base, movie_id))
    }

    pub fn credits(&self, movie_id: i64) -> String {
        self.with_key(format!("{}/movie/{}/credits", self.base, movie_id))
    }

    pub fn person(&self, person_id: i64) -> String {
        self.with_key(format!("{}/person/{}", self.base, person_id))
    }

    fn with_key(&self, mut url: String) -> String {
        if let Some(key) = &self.api_key {
            url.push_str(&format!("?api_key={}", key));
        }
        url
    }

    fn push_key(&self, url: &mut String) {
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&api_key={}", key));
        }
    }
}

fn urlencode_pipe(raw: &str) -> String {
    raw.replace('|', "%7C")
}

/// Paced, bounded, retrying HTTP client.
///
/// `concurrent_requests` caps in-flight requests across every chain; the shared
/// [`AdaptiveThrottle`] spaces request starts.
#[derive(Clone)]
pub struct TmdbClient {
    http: Client,
    permits: Arc<Semaphore>,
    throttle: AdaptiveThrottle,
    max_retries: u32,
    backoff_ms: u64,
}

impl TmdbClient {
    pub fn new(cfg: &TmdbCrawlConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout())
            .build()
            .context("failed to construct TMDB HTTP client")?;
        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(cfg.concurrent_requests.max(1))),
            throttle: AdaptiveThrottle::new(ThrottleSettings::from_config(cfg)),
            max_retries: cfg.max_retries,
            backoff_ms: cfg.backoff_ms,
        })
    }

    fn backoff(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let wait = Duration::from_millis(self.backoff_ms * (attempt as u64 + 1));
        match retry_after {
            Some(secs) => wait.max(Duration::from_secs(secs)),
            None => wait,
        }
    }
}

#[async_trait]
impl Fetch for TmdbClient {
    async fn fetch_json(&self, url: &str) -> Result<Value, CrawlError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CrawlError::transport(url, e.to_string()))?;
        let mut attempt = 0u32;
        loop {
            self.throttle.wait().await;
            let started = Instant::now();
            let response = self
                .http
                .get(url)
                .header("Accept", "application/json")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp
                            .text()
                            .await
                            .map_err(|e| CrawlError::transport(url, e.to_string()))?;
                        self.throttle.observe(started.elapsed(), true).await;
                        return serde_json::from_str(&text)
                            .map_err(|e| CrawlError::parse("response", e.to_string()));
                    }
                    self.throttle.observe(started.elapsed(), false).await;

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        if attempt >= self.max_retries {
                            return Err(CrawlError::transport(
                                url,
                                format!("status {} after {} retries", status, attempt),
                            ));
                        }
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok());
                        let wait = self.backoff(attempt, retry_after);
                        warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "retrying request");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(CrawlError::transport(url, format!("status {}", status)));
                }
                Err(err) => {
                    self.throttle.observe(started.elapsed(), false).await;
                    if attempt >= self.max_retries {
                        return Err(CrawlError::transport(url, err.to_string()));
                    }
                    let wait = self.backoff(attempt, None);
                    debug!(error = %err, attempt, "request failed; backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> TmdbUrls {
        TmdbUrls::new(&TmdbCrawlConfig {
            api_base: "https://api.example/3/".into(),
            api_key: Some("k".into()),
            ..Default::default()
        })
    }

    #[test]
    fn discover_url_carries_partition_and_page() {
        assert_eq!(
            urls().discover(2019, 3),
            "https://api.example/3/discover/movie?sort_by=popularity.desc&page=3&with_release_type=2%7C3&primary_release_year=2019&api_key=k"
        );
    }

    #[test]
    fn detail_urls_append_key() {
        let u = urls();
        assert_eq!(u.movie(550), "https://api.example/3/movie/550?api_key=k");
        assert_eq!(u.credits(550), "https://api.example/3/movie/550/credits?api_key=k");
        assert_eq!(u.person(287), "https://api.example/3/person/287?api_key=k");
    }

    #[test]
    fn backoff_grows_and_respects_retry_after() {
        let client = TmdbClient::new(&TmdbCrawlConfig {
            backoff_ms: 100,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.backoff(0, None), Duration::from_millis(100));
        assert_eq!(client.backoff(2, None), Duration::from_millis(300));
        assert_eq!(client.backoff(0, Some(2)), Duration::from_secs(2));
    }
}
