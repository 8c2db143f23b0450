//! In-process catalog used by `crawl --dry-run` and by the persistence tests.
//!
//! Enforces the same keys as the Postgres schema: movie and person primary keys, the
//! credit triple, credit foreign keys and (when a country list is configured) the
//! movie country foreign key. Transactions are serialized: `begin` holds the table lock
//! until the transaction is committed or dropped.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database_ops::errors::CrawlError;
use crate::database_ops::store::{CatalogStore, CatalogTx, PersonRow};
use crate::database_ops::tmdb::models::{AssembledRecord, CreditRole};
use crate::normalization::person::PersonKey;

#[derive(Debug, Clone, PartialEq)]
pub struct MovieRow {
    pub title: String,
    pub country: String,
    pub year_released: i32,
    pub runtime: i32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub movies: BTreeMap<i64, MovieRow>,
    pub people: BTreeMap<i64, PersonRow>,
    pub credits: BTreeSet<(i64, i64, &'static str)>,
    /// Last value handed to `align_people_sequence`, mirroring `setval`.
    pub people_sequence: Option<i64>,
}

impl MemoryTables {
    pub fn credits_for(&self, movie_id: i64) -> Vec<(i64, &'static str)> {
        self.credits
            .iter()
            .filter(|(m, _, _)| *m == movie_id)
            .map(|(_, p, role)| (*p, *role))
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
    countries: Option<Arc<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject movies whose country is not in `codes`, like the `countries` foreign key.
    pub fn with_countries<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = Some(Arc::new(codes.into_iter().map(Into::into).collect()));
        self
    }

    /// Insert a pre-existing person outside any crawl transaction.
    pub async fn seed_person(&self, row: PersonRow) {
        self.tables.lock().await.people.insert(row.people_id, row);
    }

    pub async fn snapshot(&self) -> MemoryTables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, CrawlError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx {
            guard,
            work,
            countries: self.countries.clone(),
        })
    }

    async fn max_people_id(&self) -> Result<i64, CrawlError> {
        let tables = self.tables.lock().await;
        Ok(tables.people.keys().next_back().copied().unwrap_or(0))
    }

    async fn align_people_sequence(&self, floor: i64) -> Result<(), CrawlError> {
        self.tables.lock().await.people_sequence = Some(floor - 1);
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryTables>,
    work: MemoryTables,
    countries: Option<Arc<HashSet<String>>>,
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn upsert_movie(&mut self, record: &AssembledRecord) -> Result<(), CrawlError> {
        if let Some(existing) = self.work.movies.get_mut(&record.movie_id) {
            existing.title = record.title.clone();
            existing.runtime = record.runtime;
            return Ok(());
        }
        if let Some(countries) = &self.countries {
            if !countries.contains(&record.country) {
                return Err(CrawlError::ForeignKey(format!(
                    "country {:?} is not present in countries",
                    record.country
                )));
            }
        }
        self.work.movies.insert(
            record.movie_id,
            MovieRow {
                title: record.title.clone(),
                country: record.country.clone(),
                year_released: record.year_released,
                runtime: record.runtime,
            },
        );
        Ok(())
    }

    async fn find_person(&mut self, key: &PersonKey) -> Result<Option<i64>, CrawlError> {
        Ok(self
            .work
            .people
            .values()
            .find(|p| p.surname == key.surname() && p.first_name.as_deref() == key.first_name())
            .map(|p| p.people_id))
    }

    async fn insert_person(&mut self, row: &PersonRow) -> Result<(), CrawlError> {
        if self.work.people.contains_key(&row.people_id) {
            return Err(CrawlError::Database(format!(
                "duplicate key value violates unique constraint \"people_pkey\" (peopleid={})",
                row.people_id
            )));
        }
        self.work.people.insert(row.people_id, row.clone());
        Ok(())
    }

    async fn insert_credit(
        &mut self,
        movie_id: i64,
        people_id: i64,
        role: CreditRole,
    ) -> Result<(), CrawlError> {
        if !self.work.movies.contains_key(&movie_id) {
            return Err(CrawlError::ForeignKey(format!("movie {movie_id} does not exist")));
        }
        if !self.work.people.contains_key(&people_id) {
            return Err(CrawlError::ForeignKey(format!("person {people_id} does not exist")));
        }
        self.work.credits.insert((movie_id, people_id, role.code()));
        Ok(())
    }

    async fn commit(self) -> Result<(), CrawlError> {
        let MemoryTx {
            mut guard, work, ..
        } = self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), CrawlError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(movie_id: i64, country: &str) -> AssembledRecord {
        AssembledRecord {
            movie_id,
            title: "Heat".into(),
            year_released: 1995,
            country: country.into(),
            runtime: 170,
            people: Vec::new(),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_movie(&record(949, "us")).await.unwrap();
        drop(tx);
        assert!(store.snapshot().await.movies.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.upsert_movie(&record(949, "us")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.movies.len(), 1);
    }

    #[tokio::test]
    async fn unknown_country_is_a_foreign_key_violation() {
        let store = MemoryStore::new().with_countries(["us", "sp"]);
        let mut tx = store.begin().await.unwrap();
        let err = tx.upsert_movie(&record(1, "??")).await.unwrap_err();
        assert!(matches!(err, CrawlError::ForeignKey(_)));
    }

    #[tokio::test]
    async fn credit_requires_existing_person() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_movie(&record(1, "us")).await.unwrap();
        let err = tx.insert_credit(1, 42, CreditRole::Cast).await.unwrap_err();
        assert!(matches!(err, CrawlError::ForeignKey(_)));
    }
}
