//! Known-error matcher
//!
//! Evaluates the known-error regex library against a failure message.
//! The first match in creation order wins; an unparseable pattern is
//! skipped with a warning rather than failing classification.

use chrono::Duration;
use regex::Regex;
use tracing::warn;

use crate::models::KnownError;
use crate::repository::Repositories;
use crate::Result;

/// Linear backoff floor for auto-retries
const RETRY_FLOOR_SECS: i64 = 30;
/// Linear backoff ceiling for auto-retries
const RETRY_CEILING_SECS: i64 = 600;

/// Matches failure messages against the known-error library
#[derive(Clone)]
pub struct KnownErrorMatcher {
    repos: Repositories,
}

impl KnownErrorMatcher {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// The highest-priority (earliest created) known error whose regex
    /// matches the raw message. Substring semantics; library authors
    /// anchor explicitly where they need it.
    pub async fn match_message(&self, message: &str) -> Result<Option<KnownError>> {
        let library = self.repos.known_errors.list_ordered().await?;

        for known in library {
            let regex = match Regex::new(&known.pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    warn!("Skipping known error '{}' with bad pattern: {}", known.name, e);
                    continue;
                }
            };

            if regex.is_match(message) {
                return Ok(Some(known));
            }
        }

        Ok(None)
    }

    /// Linear backoff for auto-retry attempt N (1-indexed): N x 30s,
    /// clamped to [30s, 10min]
    pub fn retry_backoff(attempt: i32) -> Duration {
        let secs = (attempt as i64 * RETRY_FLOOR_SECS).clamp(RETRY_FLOOR_SECS, RETRY_CEILING_SECS);
        Duration::seconds(secs)
    }
}
