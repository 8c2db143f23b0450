//! Persistence seam for the movie/person/credit schema.
//!
//! ```text
//! movies  (movieid PK, title, country FK, year_released, runtime)
//! people  (peopleid PK, first_name NULL, surname NOT NULL, born NOT NULL DEFAULT 0, died NULL, gender)
//! credits (movieid FK, peopleid FK, credited_as, UNIQUE (movieid, peopleid, credited_as))
//! ```
//!
//! [`PgCatalogStore`] talks to Postgres; `memory_store::MemoryStore` backs dry runs and tests.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::instrument;

use crate::database_ops::errors::CrawlError;
use crate::database_ops::tmdb::models::{AssembledRecord, CreditRole};
use crate::normalization::person::PersonKey;
use crate::util::db::Db;

/// A new `people` row, fully defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRow {
    pub people_id: i64,
    pub first_name: Option<String>,
    pub surname: String,
    pub born: i32,
    pub died: Option<i32>,
    pub gender: &'static str,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    type Tx: CatalogTx;

    async fn begin(&self) -> Result<Self::Tx, CrawlError>;

    /// Highest existing `peopleid`, 0 for an empty table.
    async fn max_people_id(&self) -> Result<i64, CrawlError>;

    /// Move the `people` id sequence so its next value is `floor`.
    async fn align_people_sequence(&self, floor: i64) -> Result<(), CrawlError>;
}

/// One open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait CatalogTx: Send {
    /// Insert the movie, or update title and runtime of an existing row.
    async fn upsert_movie(&mut self, record: &AssembledRecord) -> Result<(), CrawlError>;

    /// Exact surname match plus first-name match where absent only matches absent.
    async fn find_person(&mut self, key: &PersonKey) -> Result<Option<i64>, CrawlError>;

    async fn insert_person(&mut self, row: &PersonRow) -> Result<(), CrawlError>;

    /// Insert-if-absent on the (movie, person, role) triple.
    async fn insert_credit(
        &mut self,
        movie_id: i64,
        people_id: i64,
        role: CreditRole,
    ) -> Result<(), CrawlError>;

    async fn commit(self) -> Result<(), CrawlError>;

    async fn rollback(self) -> Result<(), CrawlError>;
}

#[derive(Clone)]
pub struct PgCatalogStore {
    db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    type Tx = PgCatalogTx;

    async fn begin(&self) -> Result<PgCatalogTx, CrawlError> {
        let tx = self.db.pool.begin().await?;
        Ok(PgCatalogTx { tx })
    }

    async fn max_people_id(&self) -> Result<i64, CrawlError> {
        let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(peopleid), 0)::BIGINT FROM people")
            .persistent(false)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(max)
    }

    async fn align_people_sequence(&self, floor: i64) -> Result<(), CrawlError> {
        self.db.align_people_sequence(floor).await?;
        Ok(())
    }
}

pub struct PgCatalogTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTx for PgCatalogTx {
    #[instrument(skip(self, record), fields(movie_id = record.movie_id))]
    async fn upsert_movie(&mut self, record: &AssembledRecord) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO movies (movieid, title, country, year_released, runtime) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (movieid) DO UPDATE SET title = EXCLUDED.title, runtime = EXCLUDED.runtime",
        )
        .persistent(false)
        .bind(record.movie_id)
        .bind(&record.title)
        .bind(&record.country)
        .bind(record.year_released)
        .bind(record.runtime)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_person(&mut self, key: &PersonKey) -> Result<Option<i64>, CrawlError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT peopleid::BIGINT FROM people \
             WHERE surname = $1 AND first_name IS NOT DISTINCT FROM $2 \
             ORDER BY peopleid LIMIT 1",
        )
        .persistent(false)
        .bind(key.surname())
        .bind(key.first_name())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn insert_person(&mut self, row: &PersonRow) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO people (peopleid, first_name, surname, born, died, gender) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .persistent(false)
        .bind(row.people_id)
        .bind(row.first_name.as_deref())
        .bind(&row.surname)
        .bind(row.born)
        .bind(row.died)
        .bind(row.gender)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_credit(
        &mut self,
        movie_id: i64,
        people_id: i64,
        role: CreditRole,
    ) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO credits (movieid, peopleid, credited_as) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(movie_id)
        .bind(people_id)
        .bind(role.code())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), CrawlError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), CrawlError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
