use anyhow::{bail, Result};
use std::time::Duration;

use crate::util::env::{env_flag, env_opt, env_parse};

pub const DEFAULT_API_BASE: &str = "https://api.themoviedb.org/3";

/// Lowest surrogate ID the crawler hands out for new people.
pub const DEFAULT_PEOPLE_FLOOR: i64 = 34527;

#[derive(Debug, Clone)]
pub struct TmdbCrawlConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub year_start: i32,
    pub year_end: i32,
    pub sort_by: String,
    pub release_types: String,
    pub concurrent_requests: usize,
    pub download_delay_ms: u64,
    pub autothrottle: bool,
    pub autothrottle_start_delay_ms: u64,
    pub autothrottle_max_delay_ms: u64,
    pub autothrottle_target_concurrency: f64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub max_inflight_chains: usize,
    pub user_agent: String,
    pub people_floor: i64,
}

impl Default for TmdbCrawlConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            year_start: 2025,
            year_end: 2025,
            sort_by: "popularity.desc".to_string(),
            release_types: "2|3".to_string(),
            concurrent_requests: 4,
            download_delay_ms: 250,
            autothrottle: true,
            autothrottle_start_delay_ms: 5_000,
            autothrottle_max_delay_ms: 60_000,
            autothrottle_target_concurrency: 1.0,
            max_retries: 3,
            backoff_ms: 1_000,
            timeout_secs: 30,
            max_inflight_chains: 32,
            user_agent: "reel-ingest/0.1".to_string(),
            people_floor: DEFAULT_PEOPLE_FLOOR,
        }
    }
}

impl TmdbCrawlConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_base: env_opt("TMDB_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(d.api_base),
            api_key: env_opt("TMDB_API_KEY"),
            year_start: env_parse("TMDB_YEAR_START", d.year_start),
            year_end: env_parse("TMDB_YEAR_END", d.year_end),
            sort_by: env_opt("TMDB_SORT_BY").unwrap_or(d.sort_by),
            release_types: env_opt("TMDB_RELEASE_TYPES").unwrap_or(d.release_types),
            concurrent_requests: env_parse("TMDB_CONCURRENT_REQUESTS", d.concurrent_requests),
            download_delay_ms: env_parse("TMDB_DOWNLOAD_DELAY_MS", d.download_delay_ms),
            autothrottle: env_flag("TMDB_AUTOTHROTTLE", d.autothrottle),
            autothrottle_start_delay_ms: env_parse(
                "TMDB_AUTOTHROTTLE_START_DELAY_MS",
                d.autothrottle_start_delay_ms,
            ),
            autothrottle_max_delay_ms: env_parse(
                "TMDB_AUTOTHROTTLE_MAX_DELAY_MS",
                d.autothrottle_max_delay_ms,
            ),
            autothrottle_target_concurrency: env_parse(
                "TMDB_AUTOTHROTTLE_TARGET_CONCURRENCY",
                d.autothrottle_target_concurrency,
            ),
            max_retries: env_parse("TMDB_MAX_RETRIES", d.max_retries),
            backoff_ms: env_parse("TMDB_BACKOFF_MS", d.backoff_ms),
            timeout_secs: env_parse("TMDB_TIMEOUT_SECS", d.timeout_secs),
            max_inflight_chains: env_parse("TMDB_MAX_INFLIGHT_CHAINS", d.max_inflight_chains),
            user_agent: env_opt("TMDB_USER_AGENT").unwrap_or(d.user_agent),
            people_floor: env_parse("PEOPLE_ID_FLOOR", d.people_floor),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.year_start > self.year_end {
            bail!(
                "year range is empty: start {} > end {}",
                self.year_start,
                self.year_end
            );
        }
        if self.concurrent_requests == 0 {
            bail!("TMDB_CONCURRENT_REQUESTS must be >= 1");
        }
        if self.max_inflight_chains == 0 {
            bail!("TMDB_MAX_INFLIGHT_CHAINS must be >= 1");
        }
        if self.people_floor < 1 {
            bail!("PEOPLE_ID_FLOOR must be >= 1");
        }
        if self.autothrottle && self.autothrottle_max_delay_ms < self.download_delay_ms {
            bail!("TMDB_AUTOTHROTTLE_MAX_DELAY_MS must be >= TMDB_DOWNLOAD_DELAY_MS");
        }
        let target = self.autothrottle_target_concurrency;
        if !(target.is_finite() && target > 0.0) {
            bail!("TMDB_AUTOTHROTTLE_TARGET_CONCURRENCY must be a finite number > 0");
        }
        Ok(())
    }

    /// One discovery partition per release year, oldest first.
    pub fn partitions(&self) -> Vec<i32> {
        (self.year_start..=self.year_end).collect()
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TmdbCrawlConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.partitions(), vec![2025]);
    }

    #[test]
    fn rejects_inverted_year_range() {
        let cfg = TmdbCrawlConfig {
            year_start: 2020,
            year_end: 2019,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_max_delay_below_min_delay() {
        let cfg = TmdbCrawlConfig {
            download_delay_ms: 2_000,
            autothrottle_max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_target_concurrency() {
        for target in [f64::NAN, f64::INFINITY, 0.0, -1.0] {
            let cfg = TmdbCrawlConfig {
                autothrottle_target_concurrency: target,
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "accepted {target}");
        }
        let parsed = TmdbCrawlConfig {
            autothrottle_target_concurrency: "nan".parse().unwrap(),
            ..Default::default()
        };
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn partitions_cover_inclusive_range() {
        let cfg = TmdbCrawlConfig {
            year_start: 2019,
            year_end: 2021,
            ..Default::default()
        };
        assert_eq!(cfg.partitions(), vec![2019, 2020, 2021]);
    }
}
