use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::{Fetch, TmdbUrls};
use super::models::{
    AssembledRecord, CreditRole, DiscoveredItem, Gender, MovieCredits, MovieDetail,
    PersonCredit, PersonDetail, DIRECTOR_JOB, MAX_CAST_PER_MOVIE,
};
use crate::database_ops::errors::CrawlError;
use crate::normalization::country::normalize_country;
use crate::normalization::person::leading_year;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    Discovered,
    DetailFetched,
    /// Credits selected; the next request is the detail for `people[0]`.
    CreditsFetched,
    /// `people[..i]` are enriched; the next request is the detail for `people[i]`.
    PersonEnriching(usize),
    Assembled,
}

/// State for one movie's dependent fetches.
///
/// Each [`advance`](Self::advance) issues exactly one request and moves one stage forward.
/// The chain owns its partially built record; nothing is shared with other chains.
#[derive(Debug)]
pub struct MovieChain {
    stage: ChainStage,
    record: AssembledRecord,
}

impl MovieChain {
    pub fn new(item: DiscoveredItem) -> Result<Self, CrawlError> {
        let year_released = leading_year(item.release_date.as_deref())
            .map_err(|e| CrawlError::parse("discover", e))?
            .unwrap_or(0);
        Ok(Self {
            stage: ChainStage::Discovered,
            record: AssembledRecord {
                movie_id: item.id,
                title: item.title.unwrap_or_default(),
                year_released,
                country: String::new(),
                runtime: 0,
                people: Vec::new(),
            },
        })
    }

    pub fn stage(&self) -> ChainStage {
        self.stage
    }

    /// Drive the chain to completion. Any failure drops the whole record.
    pub async fn run<F: Fetch + ?Sized>(
        mut self,
        fetcher: &F,
        urls: &TmdbUrls,
    ) -> Result<AssembledRecord, CrawlError> {
        while self.stage != ChainStage::Assembled {
            self.advance(fetcher, urls).await?;
        }
        Ok(self.record)
    }

    pub async fn advance<F: Fetch + ?Sized>(
        &mut self,
        fetcher: &F,
        urls: &TmdbUrls,
    ) -> Result<(), CrawlError> {
        let movie_id = self.record.movie_id;
        let next = match self.stage {
            ChainStage::Discovered => {
                let detail: MovieDetail =
                    fetch_as(fetcher, &urls.movie(movie_id), "detail").await?;
                self.apply_detail(detail);
                ChainStage::DetailFetched
            }
            ChainStage::DetailFetched => {
                let credits: MovieCredits =
                    fetch_as(fetcher, &urls.credits(movie_id), "credits").await?;
                self.record.people = select_credits(credits)?;
                debug!(movie_id, people = self.record.people.len(), "credits selected");
                if self.record.people.is_empty() {
                    ChainStage::Assembled
                } else {
                    ChainStage::CreditsFetched
                }
            }
            ChainStage::CreditsFetched | ChainStage::PersonEnriching(_) => {
                let i = match self.stage {
                    ChainStage::PersonEnriching(i) => i,
                    _ => 0,
                };
                let Some(person) = self.record.people.get_mut(i) else {
                    self.stage = ChainStage::Assembled;
                    return Ok(());
                };
                let detail: PersonDetail =
                    fetch_as(fetcher, &urls.person(person.external_id), "person").await?;
                enrich(person, detail)?;
                if i + 1 < self.record.people.len() {
                    ChainStage::PersonEnriching(i + 1)
                } else {
                    ChainStage::Assembled
                }
            }
            ChainStage::Assembled => ChainStage::Assembled,
        };
        debug!(movie_id, from = ?self.stage, to = ?next, "chain advanced");
        self.stage = next;
        Ok(())
    }

    fn apply_detail(&mut self, detail: MovieDetail) {
        self.record.runtime = detail.runtime.unwrap_or(0);
        self.record.country = normalize_country(
            detail
                .production_countries
                .iter()
                .flatten()
                .map(|c| c.iso_3166_1.as_deref()),
        );
        if self.record.title.is_empty() {
            self.record.title = detail.title.unwrap_or_default();
        }
    }
}

async fn fetch_as<T, F>(fetcher: &F, url: &str, stage: &'static str) -> Result<T, CrawlError>
where
    T: DeserializeOwned,
    F: Fetch + ?Sized,
{
    let body: Value = fetcher.fetch_json(url).await?;
    serde_json::from_value(body).map_err(|e| CrawlError::parse(stage, e.to_string()))
}

/// First five cast members in billing order, then every crew member credited as director.
fn select_credits(credits: MovieCredits) -> Result<Vec<PersonCredit>, CrawlError> {
    let cast = credits
        .cast
        .into_iter()
        .take(MAX_CAST_PER_MOVIE)
        .map(|c| named(c.id, c.name, CreditRole::Cast));
    let directors = credits
        .crew
        .into_iter()
        .filter(|c| c.job.as_deref() == Some(DIRECTOR_JOB))
        .map(|c| named(c.id, c.name, CreditRole::Director));
    cast.chain(directors).collect()
}

fn named(id: i64, name: Option<String>, role: CreditRole) -> Result<PersonCredit, CrawlError> {
    match name.filter(|n| !n.trim().is_empty()) {
        Some(name) => Ok(PersonCredit::new(id, name, role)),
        None => Err(CrawlError::parse(
            "credits",
            format!("person {id} has no name"),
        )),
    }
}

fn enrich(person: &mut PersonCredit, detail: PersonDetail) -> Result<(), CrawlError> {
    person.gender = Some(Gender::from_api(detail.gender));
    person.born = Some(
        leading_year(detail.birthday.as_deref())
            .map_err(|e| CrawlError::parse("person", e))?
            .unwrap_or(0),
    );
    person.died = leading_year(detail.deathday.as_deref())
        .map_err(|e| CrawlError::parse("person", e))?;
    Ok(())
}

/// Run one discovered item through its chain, logging and swallowing any failure.
pub async fn assemble<F: Fetch + ?Sized>(
    fetcher: &F,
    urls: &TmdbUrls,
    item: DiscoveredItem,
) -> Option<AssembledRecord> {
    let movie_id = item.id;
    let result = match MovieChain::new(item) {
        Ok(chain) => chain.run(fetcher, urls).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(movie_id, error = %err, "dropping movie");
            None
        }
    }
}
