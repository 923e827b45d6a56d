//! Pipeline configuration, loaded from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Runtime configuration for the job pipeline (orchestrator + worker pool).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub openai_api_key: String,

    /// Size of the worker pool.
    pub worker_count: usize,
    /// How long a worker blocks on an empty ready list before re-checking shutdown.
    pub dequeue_timeout: Duration,
    /// How often the promotion ticker sweeps the delayed set.
    pub promotion_interval: Duration,
    /// Default attempt budget for newly created jobs.
    pub max_attempts_default: u32,
    /// Base of the exponential backoff: `delay = base ^ attempt_count` minutes.
    pub backoff_base_minutes: u32,
    /// Tenant résumé quota enforced at intake.
    pub max_resumes_per_tenant: u32,
    /// Expected embedding vector dimensionality.
    pub embedding_dim: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults named in the external interfaces contract where unset.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,

            worker_count: env_parse("WORKER_COUNT", 4)?,
            dequeue_timeout: Duration::from_secs(env_parse("DEQUEUE_TIMEOUT_SECS", 5)?),
            promotion_interval: Duration::from_secs(env_parse("PROMOTION_INTERVAL_SECS", 30)?),
            max_attempts_default: env_parse("MAX_ATTEMPTS_DEFAULT", 3)?,
            backoff_base_minutes: env_parse("BACKOFF_BASE_MINUTES", 2)?,
            max_resumes_per_tenant: env_parse("MAX_RESUMES_PER_TENANT", 20)?,
            embedding_dim: env_parse("EMBEDDING_DIM", 1536)?,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe {
            env::remove_var("THIS_VAR_DOES_NOT_EXIST_IN_TESTS");
        }
        let v: usize = env_parse("THIS_VAR_DOES_NOT_EXIST_IN_TESTS", 7).unwrap();
        assert_eq!(v, 7);
    }
}
