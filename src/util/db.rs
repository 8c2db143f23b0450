use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Name of the serial sequence behind `people.peopleid`.
pub const PEOPLE_ID_SEQUENCE: &str = "people_peopleid_seq";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Ensure TLS is enabled when DSN contains sslmode=require
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Advance the people id sequence to `floor - 1` so the next `nextval` is `floor`.
    ///
    /// Keeps manually seeded rows and sequence-issued ids apart. Callers treat a failure
    /// (missing sequence, missing privilege, a floor of 1 below the sequence minimum) as a
    /// warning.
    pub async fn align_people_sequence(&self, floor: i64) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT setval($1::regclass, $2, true)")
            .persistent(false)
            .bind(PEOPLE_ID_SEQUENCE)
            .bind(floor - 1)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
