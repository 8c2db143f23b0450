use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::database_ops::errors::CrawlError;
use crate::database_ops::people::{PendingIdentities, PersonResolver, Resolution};
use crate::database_ops::store::{CatalogStore, CatalogTx};
use crate::database_ops::tmdb::models::AssembledRecord;

/// Counts for one committed movie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub people_inserted: usize,
    pub people_reused: usize,
    pub credits: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
    pub people_inserted: u64,
    pub people_reused: u64,
    pub credits: u64,
    /// Movie IDs whose transaction rolled back.
    pub failed_movie_ids: Vec<i64>,
}

/// Persists assembled records, one transaction per movie.
pub struct RecordWriter<S: CatalogStore> {
    store: S,
    resolver: PersonResolver,
}

impl<S: CatalogStore> RecordWriter<S> {
    pub fn new(store: S, resolver: PersonResolver) -> Self {
        Self { store, resolver }
    }

    /// Seed the resolver from the database and align the people sequence.
    ///
    /// Sequence alignment is best-effort: a failure is logged and the writer is still built.
    pub async fn prepare(store: S, people_floor: i64) -> Result<Self, CrawlError> {
        match store.align_people_sequence(people_floor).await {
            Ok(()) => info!(people_floor, "people id sequence aligned"),
            Err(err) => warn!(
                error = %err,
                people_floor,
                "could not align people id sequence (might not exist)"
            ),
        }
        let max_existing = store.max_people_id().await?;
        let resolver = PersonResolver::new(people_floor, max_existing);
        info!(
            people_floor,
            max_existing,
            next_people_id = resolver.next_id(),
            "person resolver ready"
        );
        Ok(Self::new(store, resolver))
    }

    pub fn resolver(&self) -> &PersonResolver {
        &self.resolver
    }

    /// Write one movie with its people and credits atomically.
    ///
    /// Any error rolls the whole movie back; nothing of it remains in any table.
    pub async fn write(&mut self, record: &AssembledRecord) -> Result<WriteOutcome, CrawlError> {
        let mut tx = self.store.begin().await?;
        let mut pending = PendingIdentities::default();
        match self.write_in_tx(&mut tx, record, &mut pending).await {
            Ok(outcome) => {
                tx.commit().await?;
                self.resolver.publish(pending);
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        movie_id = record.movie_id,
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn write_in_tx(
        &mut self,
        tx: &mut S::Tx,
        record: &AssembledRecord,
        pending: &mut PendingIdentities,
    ) -> Result<WriteOutcome, CrawlError> {
        tx.upsert_movie(record).await?;
        let mut outcome = WriteOutcome::default();
        for credit in &record.people {
            let resolution = self.resolver.resolve(tx, credit, pending).await?;
            match resolution {
                Resolution::Inserted(_) => outcome.people_inserted += 1,
                Resolution::Cached(_) | Resolution::Existing(_) => outcome.people_reused += 1,
            }
            tx.insert_credit(record.movie_id, resolution.people_id(), credit.role)
                .await?;
            outcome.credits += 1;
        }
        Ok(outcome)
    }
}

/// Single-writer persistence loop.
///
/// Every record goes through this task, so person resolution and counter increments are
/// serialized without locks. A failed movie is logged and skipped; the loop only ends when
/// all senders are gone.
pub async fn run_writer<S: CatalogStore>(
    mut writer: RecordWriter<S>,
    mut records: mpsc::Receiver<AssembledRecord>,
) -> (RecordWriter<S>, WriterStats) {
    let mut stats = WriterStats::default();
    while let Some(record) = records.recv().await {
        match writer.write(&record).await {
            Ok(outcome) => {
                stats.written += 1;
                stats.people_inserted += outcome.people_inserted as u64;
                stats.people_reused += outcome.people_reused as u64;
                stats.credits += outcome.credits as u64;
                debug!(
                    movie_id = record.movie_id,
                    credits = outcome.credits,
                    people_inserted = outcome.people_inserted,
                    "committed movie"
                );
            }
            Err(err) => {
                stats.failed += 1;
                stats.failed_movie_ids.push(record.movie_id);
                error!(movie_id = record.movie_id, error = %err, "skipping movie; transaction rolled back");
            }
        }
    }
    info!(
        written = stats.written,
        failed = stats.failed,
        cached_people = writer.resolver().cache().len(),
        "record writer drained"
    );
    (writer, stats)
}
