//! Lightweight strategy: a single HTTP GET via reqwest.
//!
//! Not a browser: whatever the server sends is the document. Unlike a
//! general-purpose client there is no internal retry; a timeout,
//! connection failure or non-2xx status is returned to the caller as is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

use super::Fetcher;
use crate::catalog::Target;
use crate::document::{Document, Strategy};
use crate::error::{ConfigError, FetchError};

/// Browser-like user agent; some wikis serve a stripped page to bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Direct-request fetcher.
#[derive(Clone, Debug)]
pub struct LightweightFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl LightweightFetcher {
    pub fn new(timeout_ms: u64, user_agent: &str) -> Result<Self, ConfigError> {
        let timeout = Duration::from_millis(timeout_ms);

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    fn network_error(url: &str, err: &reqwest::Error) -> FetchError {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}

#[async_trait]
impl Fetcher for LightweightFetcher {
    fn strategy(&self) -> Strategy {
        Strategy::Lightweight
    }

    async fn fetch(&self, target: &Target) -> Result<Document, FetchError> {
        let resp = self
            .client
            .get(&target.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Self::network_error(&target.url, &e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();

        if !resp.status().is_success() {
            return Err(FetchError::Http {
                url: target.url.clone(),
                status,
            });
        }

        let content = resp
            .text()
            .await
            .map_err(|e| Self::network_error(&target.url, &e))?;

        tracing::debug!(
            "fetched {} ({} bytes, status {status})",
            target.url,
            content.len()
        );

        Ok(Document {
            content,
            strategy: Strategy::Lightweight,
            final_url,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetHints;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(url: String) -> Target {
        Target {
            id: "goku".into(),
            url,
            hints: TargetHints::default(),
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/Goku"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><h1>Goku</h1></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = LightweightFetcher::new(5_000, DEFAULT_USER_AGENT).unwrap();
        let doc = fetcher
            .fetch(&target(format!("{}/wiki/Goku", server.uri())))
            .await
            .unwrap();
        assert_eq!(doc.strategy, Strategy::Lightweight);
        assert_eq!(doc.status, 200);
        assert!(doc.content.contains("<h1>Goku</h1>"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wiki/Nobody"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = LightweightFetcher::new(5_000, DEFAULT_USER_AGENT).unwrap();
        let err = fetcher
            .fetch(&target(format!("{}/wiki/Nobody", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = LightweightFetcher::new(50, DEFAULT_USER_AGENT).unwrap();
        let err = fetcher
            .fetch(&target(format!("{}/wiki/Slow", server.uri())))
            .await
            .unwrap_err();
        match err {
            FetchError::Network { timed_out, .. } => assert!(timed_out),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind and drop a listener to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher = LightweightFetcher::new(2_000, DEFAULT_USER_AGENT).unwrap();
        let err = fetcher
            .fetch(&target(format!("http://127.0.0.1:{port}/wiki/Goku")))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }
}
