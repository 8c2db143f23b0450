use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{Fetch, TmdbUrls};
use super::models::{DiscoverPage, DiscoveredItem};
use crate::database_ops::errors::CrawlError;

/// Deepest discovery page the API will serve.
pub const MAX_DISCOVER_PAGE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Last reported page was fetched.
    Exhausted,
    /// More pages exist but the API will not serve them.
    CeilingReached,
    /// A page failed to fetch or parse, or the consumer went away. Not retried.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    pub year: i32,
    pub pages: u32,
    pub discovered: u64,
    pub outcome: PartitionOutcome,
}

/// Walk the discovery pages of one release year, forwarding every item to `items`.
pub async fn paginate_partition<F: Fetch + ?Sized>(
    fetcher: &F,
    urls: &TmdbUrls,
    year: i32,
    items: &mpsc::Sender<DiscoveredItem>,
) -> PartitionReport {
    let mut report = PartitionReport {
        year,
        pages: 0,
        discovered: 0,
        outcome: PartitionOutcome::Exhausted,
    };
    info!(year, "partition starting");
    let mut page: u32 = 1;
    loop {
        let listing = match fetch_page(fetcher, &urls.discover(year, page)).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(year, page, error = %err, "abandoning partition");
                report.outcome = PartitionOutcome::Abandoned;
                break;
            }
        };
        report.pages += 1;
        let total_pages = listing.total_pages.unwrap_or(page);
        debug!(
            year,
            page,
            total_pages,
            count = listing.results.len(),
            "discover page fetched"
        );

        for item in listing.results {
            if items.send(item).await.is_err() {
                warn!(year, page, "item consumer closed; stopping partition");
                report.outcome = PartitionOutcome::Abandoned;
                return report;
            }
            report.discovered += 1;
        }

        if page >= total_pages {
            break;
        }
        if page >= MAX_DISCOVER_PAGE {
            warn!(
                year,
                total_pages,
                ceiling = MAX_DISCOVER_PAGE,
                "discover page ceiling reached; remaining pages are unreachable"
            );
            report.outcome = PartitionOutcome::CeilingReached;
            break;
        }
        page += 1;
    }
    info!(
        year,
        pages = report.pages,
        discovered = report.discovered,
        outcome = ?report.outcome,
        "partition finished"
    );
    report
}

async fn fetch_page<F: Fetch + ?Sized>(
    fetcher: &F,
    url: &str,
) -> Result<DiscoverPage, CrawlError> {
    let body = fetcher.fetch_json(url).await?;
    serde_json::from_value(body).map_err(|e| CrawlError::parse("discover", e.to_string()))
}
