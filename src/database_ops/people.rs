//! Person deduplication and surrogate-ID allocation.
//!
//! Resolution order for a credit: process-wide [`IdentityCache`], then identities minted
//! earlier in the same transaction, then a database lookup, and only then a fresh ID from
//! the counter. The resolver is owned by the single persistence task, so the whole
//! check-then-insert sequence for a key never interleaves with another resolution.

use std::collections::HashMap;
use tracing::debug;

use crate::database_ops::errors::CrawlError;
use crate::database_ops::store::{CatalogTx, PersonRow};
use crate::database_ops::tmdb::models::{Gender, PersonCredit};
use crate::normalization::person::PersonKey;

/// PersonKey → surrogate ID, for the lifetime of the process. No eviction.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<PersonKey, i64>,
}

impl IdentityCache {
    pub fn get(&self, key: &PersonKey) -> Option<i64> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: PersonKey, people_id: i64) {
        self.entries.insert(key, people_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identities resolved inside one open transaction.
///
/// Published into the cache on commit and thrown away on rollback, so the cache never
/// points at a row that was rolled back.
#[derive(Debug, Default)]
pub struct PendingIdentities {
    entries: HashMap<PersonKey, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Cached(i64),
    Existing(i64),
    Inserted(i64),
}

impl Resolution {
    pub fn people_id(self) -> i64 {
        match self {
            Resolution::Cached(id) | Resolution::Existing(id) | Resolution::Inserted(id) => id,
        }
    }
}

#[derive(Debug)]
pub struct PersonResolver {
    cache: IdentityCache,
    next_id: i64,
}

impl PersonResolver {
    /// Start the counter at `floor`, or just past `max_existing_id` if that is higher.
    pub fn new(floor: i64, max_existing_id: i64) -> Self {
        Self {
            cache: IdentityCache::default(),
            next_id: floor.max(max_existing_id.saturating_add(1)),
        }
    }

    /// The ID the next inserted person will receive.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Resolve a credited person to a surrogate ID inside `tx`.
    ///
    /// The counter advances as soon as an insert is decided, so an ID is never handed out
    /// twice even if the surrounding transaction later rolls back.
    pub async fn resolve<T>(
        &mut self,
        tx: &mut T,
        credit: &PersonCredit,
        pending: &mut PendingIdentities,
    ) -> Result<Resolution, CrawlError>
    where
        T: CatalogTx,
    {
        let key = PersonKey::from_full_name(&credit.full_name).ok_or_else(|| {
            CrawlError::Database(format!(
                "person {} has a blank name; surname is required",
                credit.external_id
            ))
        })?;

        if let Some(id) = self.cache.get(&key) {
            return Ok(Resolution::Cached(id));
        }
        if let Some(id) = pending.entries.get(&key) {
            return Ok(Resolution::Cached(*id));
        }
        if let Some(id) = tx.find_person(&key).await? {
            pending.entries.insert(key, id);
            return Ok(Resolution::Existing(id));
        }

        let people_id = self.next_id;
        self.next_id += 1;
        let row = PersonRow {
            people_id,
            first_name: key.first_name().map(str::to_string),
            surname: key.surname().to_string(),
            born: credit.born.unwrap_or(0),
            died: credit.died,
            gender: credit.gender.unwrap_or(Gender::Unknown).code(),
        };
        tx.insert_person(&row).await?;
        debug!(people_id, external_id = credit.external_id, "inserted person");
        pending.entries.insert(key, people_id);
        Ok(Resolution::Inserted(people_id))
    }

    /// Make a committed transaction's identities visible to later resolutions.
    pub fn publish(&mut self, pending: PendingIdentities) {
        for (key, id) in pending.entries {
            self.cache.insert(key, id);
        }
    }
}
