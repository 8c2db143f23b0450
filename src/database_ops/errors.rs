use thiserror::Error;

/// SQLSTATE for foreign_key_violation.
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Failures of a single crawl chain or a single movie write.
///
/// None of these stop a run: the affected item is dropped (or its transaction rolled
/// back), one line is logged, and the crawl moves on.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Request failed after the HTTP client exhausted its retries, or returned a
    /// non-success status.
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// Body was not JSON, or not the shape the stage expects.
    #[error("malformed {stage} payload: {message}")]
    Parse { stage: &'static str, message: String },

    /// A referenced row is missing, typically a country code absent from `countries`.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("database error: {0}")]
    Database(String),
}

impl CrawlError {
    pub fn parse(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            stage,
            message: message.into(),
        }
    }

    pub fn transport(url: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for CrawlError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(PG_FOREIGN_KEY_VIOLATION) =>
            {
                CrawlError::ForeignKey(db_err.message().to_string())
            }
            _ => CrawlError::Database(err.to_string()),
        }
    }
}
