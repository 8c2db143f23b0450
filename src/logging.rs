use tracing::warn;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::env_opt;

/// Default filter when `RUST_LOG` is unset: crawl progress at info, sqlx statement noise off.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

/// Install the process-wide subscriber for the `reel` binary.
///
/// `RUST_LOG` wins when it parses. A malformed `RUST_LOG` falls back to `default_filter`
/// and is reported once the subscriber is up, instead of silently logging nothing.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let (filter, rejected) = crawl_filter(env_opt("RUST_LOG").as_deref(), default_filter)?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if let Some(reason) = rejected {
        warn!(%reason, fallback = default_filter, "ignoring malformed RUST_LOG");
    }
    Ok(())
}

/// Pick the filter from an optional `RUST_LOG` value, returning why it was rejected if it was.
fn crawl_filter(
    from_env: Option<&str>,
    default_filter: &str,
) -> Result<(EnvFilter, Option<String>), anyhow::Error> {
    if let Some(directives) = from_env {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return Ok((filter, None)),
            Err(err) => {
                let fallback = EnvFilter::try_new(default_filter)?;
                return Ok((fallback, Some(err.to_string())));
            }
        }
    }
    Ok((EnvFilter::try_new(default_filter)?, None))
}
