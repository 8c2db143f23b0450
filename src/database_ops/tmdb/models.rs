//! Crawl data model and the subset of API payloads the chain reads.
//!
//! Payload structs are deliberately lenient (`Option` + `#[serde(default)]`): a field
//! the chain does not need must never make a whole response unparsable.

use serde::Deserialize;

/// Cast entries kept per movie, in billing order.
pub const MAX_CAST_PER_MOVIE: usize = 5;

/// Crew job title that marks a director credit.
pub const DIRECTOR_JOB: &str = "Director";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditRole {
    Cast,
    Director,
}

impl CreditRole {
    /// Value stored in `credits.credited_as`.
    pub fn code(self) -> &'static str {
        match self {
            CreditRole::Cast => "A",
            CreditRole::Director => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
    Unknown,
}

impl Gender {
    /// API convention: 1 = female, 2 = male, anything else unknown.
    pub fn from_api(code: Option<i64>) -> Self {
        match code {
            Some(1) => Gender::Female,
            Some(2) => Gender::Male,
            _ => Gender::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
            Gender::Unknown => "?",
        }
    }
}

/// Minimal identifying data from one discovery page entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredItem {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

/// One credited person. Enrichment fields stay `None` until the person-detail stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonCredit {
    pub external_id: i64,
    pub full_name: String,
    pub role: CreditRole,
    pub gender: Option<Gender>,
    /// Birth year; enrichment writes 0 when the API has no birthday.
    pub born: Option<i32>,
    /// Death year; stays `None` for the living or unknown.
    pub died: Option<i32>,
}

impl PersonCredit {
    pub fn new(external_id: i64, full_name: impl Into<String>, role: CreditRole) -> Self {
        Self {
            external_id,
            full_name: full_name.into(),
            role,
            gender: None,
            born: None,
            died: None,
        }
    }
}

/// One movie in its final form, ready for the record writer.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledRecord {
    pub movie_id: i64,
    pub title: String,
    pub year_released: i32,
    pub country: String,
    pub runtime: i32,
    /// Cast (at most five, billing order) followed by every director.
    pub people: Vec<PersonCredit>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverPage {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub results: Vec<DiscoveredItem>,
}

#[derive(Debug, Deserialize)]
pub struct ProductionCountry {
    #[serde(default)]
    pub iso_3166_1: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovieDetail {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub production_countries: Option<Vec<ProductionCountry>>,
}

#[derive(Debug, Deserialize)]
pub struct CastEntry {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CrewEntry {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovieCredits {
    #[serde(default)]
    pub cast: Vec<CastEntry>,
    #[serde(default)]
    pub crew: Vec<CrewEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PersonDetail {
    #[serde(default)]
    pub gender: Option<i64>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub deathday: Option<String>,
}
