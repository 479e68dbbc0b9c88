//! HTTP probe implementation.

use chrono::Utc;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::time::Instant;

use super::{classify_status, ProbeConfig, ProbeError};
use crate::db::{ProbeOutcome, ProbeResult};

/// Maximum redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Shared HTTP client for probing targets.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(user_agent: &str) -> Result<Self, ProbeError> {
        if user_agent.trim().is_empty() {
            return Err(ProbeError::Config("user agent must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client })
    }

    /// Fetch the target once.
    ///
    /// Never fails: transport problems are reported through the outcome.
    /// Latency covers the full body transfer.
    pub async fn probe(&self, config: &ProbeConfig) -> ProbeResult {
        let url = normalize_url(&config.url);
        let observed_at = Utc::now();
        let start = Instant::now();

        let response = match self.client.get(&url).timeout(config.timeout).send().await {
            Ok(r) => r,
            Err(e) => return failed(&e, start, observed_at),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let outcome = classify_status(status);

        if outcome != ProbeOutcome::Success {
            tracing::debug!("Probe of {} returned {} ({})", url, status, outcome);
            return ProbeResult {
                outcome,
                status_code: Some(status),
                final_url: Some(final_url),
                latency_ms: elapsed_ms(start),
                observed_at,
                body: None,
                headers: None,
            };
        }

        let headers = collect_headers(response.headers());

        // Read the full body to measure complete transfer time. The bytes are
        // kept undecoded so snapshot sizes reflect what was transferred.
        match response.bytes().await {
            Ok(body) => ProbeResult {
                outcome,
                status_code: Some(status),
                final_url: Some(final_url),
                latency_ms: elapsed_ms(start),
                observed_at,
                body: Some(body.to_vec()),
                headers: Some(headers),
            },
            Err(e) => {
                let mut result = failed(&e, start, observed_at);
                result.status_code = Some(status);
                result.final_url = Some(final_url);
                result
            }
        }
    }
}

fn failed(e: &reqwest::Error, start: Instant, observed_at: chrono::DateTime<Utc>) -> ProbeResult {
    let outcome = if e.is_timeout() {
        ProbeOutcome::Timeout
    } else {
        ProbeOutcome::Error
    };
    tracing::debug!("Probe failed ({}): {}", outcome, e);

    ProbeResult {
        outcome,
        status_code: e.status().map(|s| s.as_u16()),
        final_url: e.url().map(|u| u.to_string()),
        latency_ms: elapsed_ms(start),
        observed_at,
        body: None,
        headers: None,
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Prefix bare hosts with `http://`.
pub fn normalize_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Flatten a header map, joining repeated headers with `", "`.
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let prober = HttpProber::new("driftwatch-test").unwrap();
        let config = ProbeConfig::new("http://256.256.256.256", Duration::from_millis(100));
        let result = prober.probe(&config).await;
        assert_eq!(result.outcome, ProbeOutcome::Error);
        assert!(result.body.is_none());
        assert!(result.headers.is_none());
    }

    #[tokio::test]
    async fn test_http_body_is_kept_as_raw_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body: &'static [u8] = b"<html><p>caf\xe9</p></html>";

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=iso-8859-1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let prober = HttpProber::new("driftwatch-test").unwrap();
        let config = ProbeConfig::new(&format!("http://{addr}/"), Duration::from_secs(5));
        let result = prober.probe(&config).await;

        assert_eq!(result.outcome, ProbeOutcome::Success);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.body.as_deref(), Some(body));
        assert_eq!(
            result.headers.unwrap()["content-type"],
            "text/html; charset=iso-8859-1"
        );
    }

    #[test]
    fn test_empty_user_agent_rejected() {
        assert!(matches!(HttpProber::new("  "), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url(" https://example.com/a "), "https://example.com/a");
    }

    #[test]
    fn test_collect_headers_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));

        let flat = collect_headers(&headers);
        assert_eq!(flat["content-type"], "text/html");
        assert_eq!(flat["set-cookie"], "a=1, b=2");
    }
}
