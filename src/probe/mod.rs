//! Probe module: fetches a target over HTTP and reports a [`ProbeResult`].
//!
//! The evaluation pipeline treats the result as opaque input; this module is
//! the executor the bundled scheduler uses to produce it.

mod http;

pub use http::*;

use crate::db::{ProbeOutcome, ProbeResult};

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Probe configuration for a single target.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub url: String,
    pub timeout: Duration,
}

impl ProbeConfig {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            timeout,
        }
    }
}

/// Map an HTTP status to a probe outcome.
///
/// Redirects are followed by the client, so a 3xx only shows up when the
/// redirect limit was hit; the endpoint still answered, which counts as up.
pub fn classify_status(status: u16) -> ProbeOutcome {
    match status {
        200..=399 => ProbeOutcome::Success,
        401 | 403 | 407 | 429 | 451 => ProbeOutcome::Blocked,
        _ => ProbeOutcome::Error,
    }
}

/// Run a probe with the given configuration.
pub async fn run_probe(prober: &HttpProber, config: &ProbeConfig) -> ProbeResult {
    // Add jitter to avoid thundering herd
    let jitter = rand::random::<u64>() % 100;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    prober.probe(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), ProbeOutcome::Success);
        assert_eq!(classify_status(204), ProbeOutcome::Success);
        assert_eq!(classify_status(304), ProbeOutcome::Success);
        assert_eq!(classify_status(403), ProbeOutcome::Blocked);
        assert_eq!(classify_status(429), ProbeOutcome::Blocked);
        assert_eq!(classify_status(404), ProbeOutcome::Error);
        assert_eq!(classify_status(500), ProbeOutcome::Error);
        assert_eq!(classify_status(503), ProbeOutcome::Error);
        assert_eq!(classify_status(101), ProbeOutcome::Error);
    }
}
