use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_ingest::cli::db_counts::{self, DbCountsConfig};
use reel_ingest::database_ops::memory_store::MemoryStore;
use reel_ingest::database_ops::record_writer::RecordWriter;
use reel_ingest::database_ops::store::{CatalogStore, PgCatalogStore};
use reel_ingest::database_ops::tmdb::client::TmdbClient;
use reel_ingest::database_ops::tmdb::config::TmdbCrawlConfig;
use reel_ingest::database_ops::tmdb::ingest::{run_crawl, CrawlSummary};
use reel_ingest::logging::{init_tracing, DEFAULT_FILTER};
use reel_ingest::util::db::Db;
use reel_ingest::util::env as env_util;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reel", version, about = "Movie metadata crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Crawl discovery partitions and persist movies, people and credits
    Crawl {
        /// First release year to crawl (defaults to env TMDB_YEAR_START)
        #[arg(long)]
        year_start: Option<i32>,
        /// Last release year to crawl, inclusive (defaults to env TMDB_YEAR_END)
        #[arg(long)]
        year_end: Option<i32>,
        /// Lowest surrogate id for new people (defaults to env PEOPLE_ID_FLOOR)
        #[arg(long)]
        people_floor: Option<i64>,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Crawl into an in-memory catalog instead of Postgres
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Print row counts for the catalog tables
    Counts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Crawl {
            year_start,
            year_end,
            people_floor,
            db_url,
            dry_run,
        } => {
            let mut cfg = TmdbCrawlConfig::from_env();
            if let Some(y) = year_start {
                cfg.year_start = y;
            }
            if let Some(y) = year_end {
                cfg.year_end = y;
            }
            if let Some(floor) = people_floor {
                cfg.people_floor = floor;
            }
            cfg.validate()?;
            if cfg.api_key.is_none() {
                warn!("TMDB_API_KEY not set; requests will likely be rejected");
            }
            crawl(cfg, db_url, dry_run).await
        }
        Commands::Counts { db_url } => {
            db_counts::run(DbCountsConfig {
                database_url: db_url,
                people_floor: None,
            })
            .await
        }
    }
}

async fn crawl(cfg: TmdbCrawlConfig, db_url: Option<String>, dry_run: bool) -> Result<()> {
    let client = Arc::new(TmdbClient::new(&cfg)?);

    if dry_run {
        info!("dry run: writing into an in-memory catalog");
        let store = MemoryStore::new();
        let summary = crawl_into(client, store.clone(), &cfg).await?;
        let tables = store.snapshot().await;
        println!(
            "dry run catalog: {} movies, {} people, {} credits",
            tables.movies.len(),
            tables.people.len(),
            tables.credits.len()
        );
        print_summary(&summary);
        return Ok(());
    }

    let db_url = match db_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    info!(dsn = %env_util::redact_dsn(&db_url), "connecting to database");
    let max_conns = env_util::env_parse("DB_MAX_CONNS", 5u32);
    let db = Db::connect(&db_url, max_conns)
        .await
        .context("cannot connect to database")?;

    let result = crawl_into(client, PgCatalogStore::new(db.clone()), &cfg).await;
    db.close().await;
    print_summary(&result?);
    Ok(())
}

async fn crawl_into<S>(
    client: Arc<TmdbClient>,
    store: S,
    cfg: &TmdbCrawlConfig,
) -> Result<CrawlSummary>
where
    S: CatalogStore + 'static,
{
    let writer = RecordWriter::prepare(store, cfg.people_floor)
        .await
        .context("failed to read existing people ids")?;

    tokio::select! {
        (_, summary) = run_crawl(client, writer, cfg) => {
            summary.log();
            Ok(summary)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; uncommitted movies roll back, committed movies stand");
            bail!("crawl interrupted")
        }
    }
}

fn print_summary(summary: &CrawlSummary) {
    println!(
        "crawl {} → {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        summary.finished_at.format("%Y-%m-%d %H:%M:%S")
    );
    for p in &summary.partitions {
        println!(
            "  {}: {} pages, {} discovered ({:?})",
            p.year, p.pages, p.discovered, p.outcome
        );
    }
    println!(
        "assembled {} / dropped {} / duplicates {}",
        summary.chains.assembled, summary.chains.dropped, summary.chains.duplicates
    );
    println!(
        "written {} / failed {} (people inserted {}, reused {}, credits {})",
        summary.writer.written,
        summary.writer.failed,
        summary.writer.people_inserted,
        summary.writer.people_reused,
        summary.writer.credits
    );
    if !summary.writer.failed_movie_ids.is_empty() {
        println!("failed movie ids: {:?}", summary.writer.failed_movie_ids);
    }
}
