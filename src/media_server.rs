//! Media server library refresh client.
//!
//! Completion triggers a refresh so the new file shows up in the media
//! server's library. Refresh failures are logged and audited but never fail
//! the job; the file is already in place.

use std::time::Duration;

use crate::config::MediaServerConfig;
use crate::error::{Error, Result};

/// Client for the media server's library-refresh endpoint
pub struct MediaServerClient {
    http: reqwest::Client,
    config: Option<MediaServerConfig>,
    timeout: Duration,
}

impl MediaServerClient {
    /// Build a client; with no configuration every refresh is a no-op
    pub fn new(config: Option<MediaServerConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            timeout: Duration::from_secs(30),
        }
    }

    /// Whether a media server is configured
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Ask the media server to rescan its library (or one section of it)
    pub async fn refresh_library(&self) -> Result<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let base = config.url.trim_end_matches('/');
        let url = match &config.library_id {
            Some(library_id) => format!("{base}/Library/Refresh?libraryId={library_id}"),
            None => format!("{base}/Library/Refresh"),
        };

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("MediaBrowser Token=\"{}\"", config.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Other(format!(
                "media server refresh returned HTTP {}",
                response.status()
            )));
        }

        tracing::info!("media server library refresh requested");
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn unconfigured_client_is_a_no_op() {
        let client = MediaServerClient::new(None);
        assert!(!client.is_configured());
        client.refresh_library().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_posts_with_the_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Library/Refresh"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = MediaServerClient::new(Some(MediaServerConfig {
            url: server.uri(),
            api_key: "k3y".into(),
            library_id: None,
        }));
        client.refresh_library().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0]
            .headers
            .get("authorization")
            .expect("refresh must authenticate");
        assert!(auth.to_str().unwrap().contains("k3y"));
    }

    #[tokio::test]
    async fn refresh_targets_the_configured_library() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Library/Refresh"))
            .and(query_param("libraryId", "42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = MediaServerClient::new(Some(MediaServerConfig {
            url: server.uri(),
            api_key: "k3y".into(),
            library_id: Some("42".into()),
        }));
        client.refresh_library().await.unwrap();
    }

    #[tokio::test]
    async fn http_failure_surfaces_as_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = MediaServerClient::new(Some(MediaServerConfig {
            url: server.uri(),
            api_key: "k3y".into(),
            library_id: None,
        }));
        let err = client.refresh_library().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
