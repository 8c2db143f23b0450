use anyhow::Result;
use std::fmt::Write as _;

use crate::database_ops::tmdb::config::DEFAULT_PEOPLE_FLOOR;
use crate::util::db::Db;
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct DbCountsConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    /// IDs at or above this were minted by the crawler (defaults to env PEOPLE_ID_FLOOR).
    pub people_floor: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub movies: i64,
    pub movies_unknown_country: i64,
    pub people: i64,
    pub people_crawled: i64,
    pub max_people_id: i64,
    pub credits_cast: i64,
    pub credits_directed: i64,
}

fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

async fn count(db: &Db, sql: &str, bind: Option<i64>) -> Result<i64> {
    let mut q = sqlx::query_scalar::<_, i64>(sql).persistent(false);
    if let Some(v) = bind {
        q = q.bind(v);
    }
    match q.fetch_one(&db.pool).await {
        Ok(val) => Ok(val),
        Err(e) if is_undefined_table_error(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub async fn collect(db: &Db, people_floor: i64) -> Result<CatalogCounts> {
    Ok(CatalogCounts {
        movies: count(db, "SELECT count(*) FROM movies", None).await?,
        movies_unknown_country: count(
            db,
            "SELECT count(*) FROM movies WHERE country = '??'",
            None,
        )
        .await?,
        people: count(db, "SELECT count(*) FROM people", None).await?,
        people_crawled: count(
            db,
            "SELECT count(*) FROM people WHERE peopleid >= $1",
            Some(people_floor),
        )
        .await?,
        max_people_id: count(db, "SELECT COALESCE(MAX(peopleid), 0)::BIGINT FROM people", None)
            .await?,
        credits_cast: count(
            db,
            "SELECT count(*) FROM credits WHERE credited_as = 'A'",
            None,
        )
        .await?,
        credits_directed: count(
            db,
            "SELECT count(*) FROM credits WHERE credited_as = 'D'",
            None,
        )
        .await?,
    })
}

pub fn render(counts: &CatalogCounts, people_floor: i64) -> String {
    let mut out = String::new();
    writeln!(out, "DB COUNTS SUMMARY:").ok();
    writeln!(
        out,
        "movies: {} (country unknown: {})",
        counts.movies, counts.movies_unknown_country
    )
    .ok();
    writeln!(
        out,
        "people: {} (crawled, id >= {people_floor}: {})",
        counts.people, counts.people_crawled
    )
    .ok();
    writeln!(out, "max peopleid: {}", counts.max_people_id).ok();
    writeln!(
        out,
        "credits: {} (cast: {}, directed: {})",
        counts.credits_cast + counts.credits_directed,
        counts.credits_cast,
        counts.credits_directed
    )
    .ok();
    out
}

pub async fn run(cfg: DbCountsConfig) -> Result<()> {
    env_util::init_env();
    let db_url = match cfg.database_url.clone() {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let people_floor = cfg
        .people_floor
        .unwrap_or_else(|| env_util::env_parse("PEOPLE_ID_FLOOR", DEFAULT_PEOPLE_FLOOR));
    let db = Db::connect(&db_url, 2).await?;
    let counts = collect(&db, people_floor).await?;
    println!("{}", render(&counts, people_floor));
    db.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_every_table() {
        let counts = CatalogCounts {
            movies: 3,
            movies_unknown_country: 1,
            people: 10,
            people_crawled: 4,
            max_people_id: 34530,
            credits_cast: 9,
            credits_directed: 3,
        };
        let out = render(&counts, 34527);
        assert!(out.contains("movies: 3 (country unknown: 1)"));
        assert!(out.contains("people: 10 (crawled, id >= 34527: 4)"));
        assert!(out.contains("max peopleid: 34530"));
        assert!(out.contains("credits: 12 (cast: 9, directed: 3)"));
    }
}
