/*!
 * HTTP client for NCBI E-utilities (esearch / efetch)
 *
 * Requests are throttled to the configured interval and retried with
 * exponential backoff on transient failures (timeouts, 429, 5xx).
 */

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::parse::parse_search_response;
use super::LiteratureSource;
use crate::config::MatcherConfig;
use crate::{PubMatchError, Result};

/// Retry delays stop growing after this many doublings
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// E-utilities client with per-request timeout, bounded retries and a
/// minimum spacing between requests
pub struct EntrezClient {
    http: reqwest::Client,
    search_url: String,
    fetch_url: String,
    database: String,
    tool: Option<String>,
    email: Option<String>,
    max_retries: u32,
    retry_base_delay: Duration,
    request_interval: Duration,
    /// Start time of the most recent request, shared by all callers
    last_request: Mutex<Option<Instant>>,
}

impl EntrezClient {
    /// Build a client from matcher settings
    pub fn from_config(config: &MatcherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| PubMatchError::Custom {
                message: format!("Failed to create HTTP client: {}", e),
                suggestion: Some("Check your network configuration".to_string()),
            })?;

        Ok(Self {
            http,
            search_url: config.search_url.clone(),
            fetch_url: config.fetch_url.clone(),
            database: config.database.clone(),
            tool: config.tool.clone(),
            email: config.email.clone(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            request_interval: config.request_interval(),
            last_request: Mutex::new(None),
        })
    }

    /// Wait until `request_interval` has passed since the previous request
    ///
    /// The lock is held while sleeping, so concurrent callers queue up and
    /// the aggregate rate stays bounded.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_interval {
                tokio::time::sleep(self.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn identification(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(tool) = &self.tool {
            params.push(("tool", tool.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    async fn get_once(&self, url: &str, query: &[(&'static str, String)]) -> Result<String> {
        self.throttle().await;

        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PubMatchError::http_status(status.as_u16(), url));
        }
        Ok(response.text().await?)
    }

    /// GET with exponential backoff on retryable failures
    async fn get_with_retry(&self, url: &str, query: &[(&'static str, String)]) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            match self.get_once(url, query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt.min(MAX_BACKOFF_EXPONENT));
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "request to {} failed: {}; retrying",
                        url,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LiteratureSource for EntrezClient {
    async fn search(&self, term: &str, max_results: usize) -> Result<Vec<String>> {
        let mut query = vec![
            ("db", self.database.clone()),
            ("term", term.to_string()),
            ("retmode", "json".to_string()),
            ("retmax", max_results.to_string()),
        ];
        query.extend(self.identification());

        debug!(term, "searching");
        let body = self.get_with_retry(&self.search_url, &query).await?;
        parse_search_response(&body)
    }

    async fn fetch(&self, ids: &[String]) -> Result<String> {
        if ids.is_empty() {
            return Ok(String::new());
        }

        let mut query = vec![
            ("db", self.database.clone()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        query.extend(self.identification());

        debug!(count = ids.len(), "fetching records");
        self.get_with_retry(&self.fetch_url, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SEARCH_BODY: &str = r#"{"esearchresult":{"count":"2","idlist":["101","102"]}}"#;

    /// Local HTTP server answering the n-th connection with `responses[n]`
    /// (the last entry repeats); returns its base URL and a request counter
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request: Vec<u8> = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let reply = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (base, hits)
    }

    fn client_for(base: &str) -> EntrezClient {
        let config = MatcherConfig {
            search_url: format!("{}/esearch.fcgi", base),
            fetch_url: format!("{}/efetch.fcgi", base),
            request_interval_ms: 0,
            retry_base_delay_ms: 1,
            max_retries: 2,
            ..MatcherConfig::default()
        };
        EntrezClient::from_config(&config).unwrap()
    }

    fn client(interval_ms: u64) -> EntrezClient {
        let config = MatcherConfig {
            request_interval_ms: interval_ms,
            tool: Some("nppes-pubmatch".to_string()),
            email: Some("ops@example.org".to_string()),
            ..MatcherConfig::default()
        };
        EntrezClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_identification_params() {
        let params = client(0).identification();
        assert_eq!(
            params,
            vec![("tool", "nppes-pubmatch".to_string()), ("email", "ops@example.org".to_string())]
        );
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let client = client(50);
        let start = Instant::now();
        client.throttle().await;
        client.throttle().await;
        client.throttle().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_fetch_without_ids_issues_no_request() {
        let config = MatcherConfig {
            fetch_url: "http://127.0.0.1:9/unreachable".to_string(),
            ..MatcherConfig::default()
        };
        let client = EntrezClient::from_config(&config).unwrap();
        assert_eq!(client.fetch(&[]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (base, hits) = serve(vec![(503, "busy"), (200, SEARCH_BODY)]).await;
        let ids = client_for(&base).search("Smith J[Author]", 10).await.unwrap();
        assert_eq!(ids, vec!["101".to_string(), "102".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (base, hits) = serve(vec![(404, "not found")]).await;
        let err = client_for(&base).search("Smith J[Author]", 10).await.unwrap_err();
        assert!(matches!(
            err,
            PubMatchError::Http { status: Some(404), retryable: false, .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_stop_after_max_retries() {
        let (base, hits) = serve(vec![(503, "busy")]).await;
        let err = client_for(&base).fetch(&["101".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            PubMatchError::Http { status: Some(503), retryable: true, .. }
        ));
        // first attempt plus max_retries
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
