use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info};

use super::chain::assemble;
use super::client::{Fetch, TmdbUrls};
use super::config::TmdbCrawlConfig;
use super::models::{AssembledRecord, DiscoveredItem};
use super::pagination::{paginate_partition, PartitionOutcome, PartitionReport};
use crate::database_ops::record_writer::{run_writer, RecordWriter, WriterStats};
use crate::database_ops::store::CatalogStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub assembled: u64,
    pub dropped: u64,
    /// Movies listed more than once during the run; only the first listing is crawled.
    pub duplicates: u64,
}

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub partitions: Vec<PartitionReport>,
    pub chains: ChainStats,
    pub writer: WriterStats,
}

impl CrawlSummary {
    pub fn pages(&self) -> u32 {
        self.partitions.iter().map(|p| p.pages).sum()
    }

    pub fn discovered(&self) -> u64 {
        self.partitions.iter().map(|p| p.discovered).sum()
    }

    pub fn log(&self) {
        let elapsed = self.finished_at - self.started_at;
        for p in &self.partitions {
            info!(year = p.year, pages = p.pages, discovered = p.discovered, outcome = ?p.outcome, "partition");
        }
        info!(
            pages = self.pages(),
            discovered = self.discovered(),
            duplicates = self.chains.duplicates,
            assembled = self.chains.assembled,
            dropped = self.chains.dropped,
            written = self.writer.written,
            failed = self.writer.failed,
            people_inserted = self.writer.people_inserted,
            people_reused = self.writer.people_reused,
            credits = self.writer.credits,
            elapsed_secs = elapsed.num_seconds(),
            "crawl finished"
        );
        let ceilinged = self
            .partitions
            .iter()
            .filter(|p| p.outcome == PartitionOutcome::CeilingReached)
            .count();
        if ceilinged > 0 {
            info!(ceilinged, "some partitions hit the discover page ceiling");
        }
    }
}

/// Crawl every configured partition and persist what comes back.
///
/// Pagination for all partitions runs concurrently. Discovered items feed a dispatcher that
/// keeps at most `max_inflight_chains` movie chains running; assembled records flow to the
/// single writer task. The returned summary is produced once every stage has drained.
/// Dropping the future (Ctrl-C) aborts the dispatcher, its chains and the writer; an open
/// movie transaction is rolled back, committed ones stand.
pub async fn run_crawl<F, S>(
    fetcher: Arc<F>,
    writer: RecordWriter<S>,
    cfg: &TmdbCrawlConfig,
) -> (RecordWriter<S>, CrawlSummary)
where
    F: Fetch + 'static,
    S: CatalogStore + 'static,
{
    let started_at = Utc::now();
    let urls = Arc::new(TmdbUrls::new(cfg));
    let max_chains = cfg.max_inflight_chains.max(1);
    info!(
        year_start = cfg.year_start,
        year_end = cfg.year_end,
        concurrent_requests = cfg.concurrent_requests,
        max_chains,
        autothrottle = cfg.autothrottle,
        "crawl starting"
    );

    let (item_tx, item_rx) = mpsc::channel::<DiscoveredItem>(max_chains * 4);
    let (record_tx, record_rx) = mpsc::channel::<AssembledRecord>(max_chains);

    let writer_task = tokio::spawn(run_writer(writer, record_rx));
    let dispatcher = tokio::spawn(dispatch_chains(
        fetcher.clone(),
        urls.clone(),
        item_rx,
        record_tx,
        max_chains,
    ));
    let _abort = AbortOnDrop(vec![writer_task.abort_handle(), dispatcher.abort_handle()]);

    let partitions = join_all(
        cfg.partitions()
            .into_iter()
            .map(|year| paginate_partition(fetcher.as_ref(), urls.as_ref(), year, &item_tx)),
    )
    .await;
    drop(item_tx);

    let chains = match dispatcher.await {
        Ok(stats) => stats,
        Err(err) => {
            error!(error = %err, "chain dispatcher panicked");
            ChainStats::default()
        }
    };
    let (writer, writer_stats) = match writer_task.await {
        Ok(done) => done,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    };

    let summary = CrawlSummary {
        started_at,
        finished_at: Utc::now(),
        partitions,
        chains,
        writer: writer_stats,
    };
    (writer, summary)
}

/// Aborts the background tasks if `run_crawl` is dropped before they finish, so a cancelled
/// crawl stops writing at once. The dispatcher's `JoinSet` takes its chains down with it.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

async fn dispatch_chains<F>(
    fetcher: Arc<F>,
    urls: Arc<TmdbUrls>,
    mut items: mpsc::Receiver<DiscoveredItem>,
    records: mpsc::Sender<AssembledRecord>,
    max_chains: usize,
) -> ChainStats
where
    F: Fetch + 'static,
{
    let mut stats = ChainStats::default();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut set: JoinSet<bool> = JoinSet::new();

    while let Some(item) = items.recv().await {
        if !seen.insert(item.id) {
            debug!(movie_id = item.id, "movie already crawled this run");
            stats.duplicates += 1;
            continue;
        }
        while set.len() >= max_chains {
            if let Some(done) = set.join_next().await {
                tally(&mut stats, done);
            }
        }
        let fetcher = fetcher.clone();
        let urls = urls.clone();
        let records = records.clone();
        set.spawn(async move {
            match assemble(fetcher.as_ref(), urls.as_ref(), item).await {
                Some(record) => records.send(record).await.is_ok(),
                None => false,
            }
        });
    }
    while let Some(done) = set.join_next().await {
        tally(&mut stats, done);
    }
    stats
}

fn tally(stats: &mut ChainStats, done: Result<bool, tokio::task::JoinError>) {
    match done {
        Ok(true) => stats.assembled += 1,
        Ok(false) => stats.dropped += 1,
        Err(err) => {
            error!(error = %err, "movie chain task failed");
            stats.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::tmdb::fake::{test_config, test_urls, ScriptedFetcher};
    use serde_json::json;

    fn fixture() -> ScriptedFetcher {
        let urls = test_urls();
        ScriptedFetcher::new()
            .respond(
                urls.discover(2019, 1),
                json!({
                    "page": 1,
                    "total_pages": 2,
                    "results": [
                        { "id": 10, "title": "Parasite", "release_date": "2019-05-30" },
                        { "id": 11, "title": "Broken", "release_date": "2019-01-01" }
                    ]
                }),
            )
            .respond(
                urls.discover(2019, 2),
                json!({
                    "page": 2,
                    "total_pages": 2,
                    "results": [
                        { "id": 12, "title": "Unfiled", "release_date": "2019-08-01" },
                        { "id": 10, "title": "Parasite", "release_date": "2019-05-30" }
                    ]
                }),
            )
            .respond(
                urls.movie(10),
                json!({ "runtime": 132, "production_countries": [{ "iso_3166_1": "KR" }] }),
            )
            .respond(
                urls.credits(10),
                json!({
                    "cast": [{ "id": 1, "name": "Song Kang-ho" }],
                    "crew": [{ "id": 2, "name": "Bong Joon-ho", "job": "Director" }]
                }),
            )
            .respond(urls.person(1), json!({ "gender": 2, "birthday": "1967-01-17" }))
            .respond(urls.person(2), json!({ "gender": 2, "birthday": "1969-09-14" }))
            // 11: credits endpoint missing, chain dropped
            .respond(urls.movie(11), json!({ "runtime": 80 }))
            // 12: country not in the reference table, write rolled back
            .respond(
                urls.movie(12),
                json!({ "runtime": 95, "production_countries": [{ "iso_3166_1": "ZZ" }] }),
            )
            .respond(
                urls.credits(12),
                json!({ "cast": [{ "id": 3, "name": "Nobody Known" }], "crew": [] }),
            )
            .respond(urls.person(3), json!({}))
    }

    #[tokio::test]
    async fn crawl_persists_complete_movies_and_isolates_failures() {
        let store = MemoryStore::new().with_countries(["kr", "us"]);
        let writer = RecordWriter::prepare(store.clone(), 34527).await.unwrap();
        let fetcher = Arc::new(fixture());

        let (writer, summary) = run_crawl(fetcher.clone(), writer, &test_config()).await;

        assert_eq!(summary.pages(), 2);
        assert_eq!(summary.discovered(), 4);
        assert_eq!(summary.chains.duplicates, 1);
        assert_eq!(summary.chains.assembled, 2);
        assert_eq!(summary.chains.dropped, 1);
        assert_eq!(summary.writer.written, 1);
        assert_eq!(summary.writer.failed_movie_ids, vec![12]);
        assert_eq!(summary.partitions[0].outcome, PartitionOutcome::Exhausted);

        let tables = store.snapshot().await;
        assert_eq!(tables.movies.len(), 1);
        assert_eq!(tables.movies[&10].country, "kr");
        assert_eq!(tables.movies[&10].year_released, 2019);
        assert_eq!(tables.credits_for(10), vec![(34527, "A"), (34528, "D")]);
        assert_eq!(tables.people[&34527].surname, "Kang-ho");
        assert_eq!(tables.people[&34527].born, 1967);
        // movie 12 failed on its country before any person was resolved
        assert_eq!(writer.resolver().next_id(), 34529);
        assert_eq!(writer.resolver().cache().len(), 2);

        let detail_requests = fetcher
            .requested()
            .iter()
            .filter(|u| u.as_str() == test_urls().movie(10))
            .count();
        assert_eq!(detail_requests, 1);
    }

    #[tokio::test]
    async fn second_run_reuses_people_from_the_database() {
        let store = MemoryStore::new().with_countries(["kr"]);
        let writer = RecordWriter::prepare(store.clone(), 34527).await.unwrap();
        run_crawl(Arc::new(fixture()), writer, &test_config()).await;

        let writer = RecordWriter::prepare(store.clone(), 34527).await.unwrap();
        assert_eq!(writer.resolver().next_id(), 34529);
        let (_, summary) = run_crawl(Arc::new(fixture()), writer, &test_config()).await;

        assert_eq!(summary.writer.people_inserted, 0);
        assert_eq!(summary.writer.people_reused, 2);
        let tables = store.snapshot().await;
        assert_eq!(tables.people.len(), 2);
        assert_eq!(tables.credits.len(), 2);
    }

    #[tokio::test]
    async fn dropping_the_crawl_aborts_chains_and_writer() {
        let urls = test_urls();
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .respond(
                    urls.discover(2019, 1),
                    json!({
                        "page": 1,
                        "total_pages": 1,
                        "results": [{ "id": 10, "title": "Parasite", "release_date": "2019-05-30" }]
                    }),
                )
                .stall(urls.movie(10)),
        );
        let store = MemoryStore::new().with_countries(["kr"]);
        let writer = RecordWriter::prepare(store.clone(), 34527).await.unwrap();
        let cfg = test_config();

        let crawl = run_crawl(fetcher.clone(), writer, &cfg);
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), crawl).await;
        assert!(outcome.is_err(), "stalled crawl finished");
        assert!(fetcher.requested().contains(&urls.movie(10)));

        for _ in 0..100 {
            if Arc::strong_count(&fetcher) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&fetcher), 1, "chain still holds the fetcher");
        assert!(store.snapshot().await.movies.is_empty());
    }
}
