//! Scripted [`Fetch`] stand-in shared by the crawl tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::client::{Fetch, TmdbUrls};
use super::config::TmdbCrawlConfig;
use crate::database_ops::errors::CrawlError;

pub const TEST_BASE: &str = "http://tmdb.test/3";

pub fn test_config() -> TmdbCrawlConfig {
    TmdbCrawlConfig {
        api_base: TEST_BASE.to_string(),
        api_key: None,
        year_start: 2019,
        year_end: 2019,
        ..Default::default()
    }
}

pub fn test_urls() -> TmdbUrls {
    TmdbUrls::new(&test_config())
}

/// Canned responses keyed by full URL. Unknown URLs fail as transport errors; a `Value::String`
/// body is served as a raw non-JSON payload and fails to parse. Stalled URLs never answer.
///
/// URLs can be tagged with a movie id so in-flight requests are also counted per movie.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, Value>,
    stalled: HashSet<String>,
    movie_of: HashMap<String, i64>,
    requested: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    per_movie: Mutex<HashMap<i64, (usize, usize)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: impl Into<String>, body: Value) -> Self {
        self.responses.insert(url.into(), body);
        self
    }

    /// Same as [`respond`](Self::respond), counting the request against `movie_id`.
    pub fn respond_for(self, movie_id: i64, url: impl Into<String>, body: Value) -> Self {
        let url = url.into();
        let mut this = self.respond(url.clone(), body);
        this.movie_of.insert(url, movie_id);
        this
    }

    pub fn stall(mut self, url: impl Into<String>) -> Self {
        self.stalled.insert(url.into());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous requests seen for one movie.
    pub fn peak_in_flight_for(&self, movie_id: i64) -> usize {
        self.per_movie
            .lock()
            .ok()
            .and_then(|m| m.get(&movie_id).map(|(_, peak)| *peak))
            .unwrap_or(0)
    }

    fn track(&self, movie_id: Option<i64>, delta: isize) {
        let (Some(movie_id), Ok(mut map)) = (movie_id, self.per_movie.lock()) else {
            return;
        };
        let entry = map.entry(movie_id).or_default();
        if delta > 0 {
            entry.0 += 1;
            entry.1 = entry.1.max(entry.0);
        } else {
            entry.0 -= 1;
        }
    }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value, CrawlError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let movie_id = self.movie_of.get(url).copied();
        self.track(movie_id, 1);
        if let Ok(mut log) = self.requested.lock() {
            log.push(url.to_string());
        }
        if self.stalled.contains(url) {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.track(movie_id, -1);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.responses.get(url) {
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .map_err(|e| CrawlError::parse("response", e.to_string())),
            Some(body) => Ok(body.clone()),
            None => Err(CrawlError::transport(url, "status 404 Not Found")),
        }
    }
}
