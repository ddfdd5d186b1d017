//! Plain HTTP transport with a per-page cookie jar.
//!
//! Each [`HttpPage`] owns its own `reqwest::Client`, so cookies and
//! connections never leak between sessions. Closing a page drops the client.

use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::transport::{Document, FetchedBytes, FormMethod, FormSubmission, PortalPage, PortalTransport};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
    pub max_redirects: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            accept_invalid_certs: false,
            max_redirects: 10,
        }
    }
}

/// Transport that opens cookie-isolated HTTP clients.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<Client> {
        let fingerprint = FingerprintConfig::from_config(self.config.user_agent.as_deref());

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&fingerprint.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }

        Client::builder()
            .cookie_store(true)
            .user_agent(fingerprint.user_agent)
            .default_headers(headers)
            .redirect(Policy::limited(self.config.max_redirects))
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .timeout(self.config.timeout)
            .build()
            .map_err(BrowserError::Network)
    }
}

#[async_trait::async_trait]
impl PortalTransport for HttpTransport {
    async fn open_page(&self) -> Result<Box<dyn PortalPage>> {
        let client = self.build_client()?;
        Ok(Box::new(HttpPage {
            client: Some(client),
            current: None,
        }))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// One cookie jar plus the last document it loaded.
pub struct HttpPage {
    client: Option<Client>,
    current: Option<Document>,
}

impl HttpPage {
    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(BrowserError::Closed)
    }

    fn with_referer(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.current {
            Some(doc) => builder.header(REFERER, doc.url.as_str()),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder, url: &str) -> Result<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BrowserError::Timeout(format!("request to {url} timed out"))
            } else {
                BrowserError::Network(e)
            }
        })
    }

    async fn into_document(response: Response) -> Result<Document> {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Document {
            url,
            status,
            content_type,
            body,
        })
    }
}

#[async_trait::async_trait]
impl PortalPage for HttpPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Document> {
        let builder = self.with_referer(self.client()?.get(url).timeout(timeout));
        let response = Self::send(builder, url).await?;
        let document = Self::into_document(response).await?;

        debug!(url = %document.url, status = document.status, "navigated");
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn fetch_bytes(&mut self, url: &str, timeout: Duration) -> Result<FetchedBytes> {
        let builder = self.with_referer(self.client()?.get(url).timeout(timeout));
        let response = Self::send(builder, url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrowserError::NavigationError(format!(
                "fetching {url} returned HTTP {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedBytes {
            bytes,
            content_type,
        })
    }

    async fn submit_form(&mut self, form: &FormSubmission, timeout: Duration) -> Result<Document> {
        let client = self.client()?;
        let builder = match form.method {
            FormMethod::Get => client.get(&form.action).query(&form.fields),
            FormMethod::Post => {
                let mut builder = client.post(&form.action).form(&form.fields);
                if let Ok(origin) = url::Url::parse(&form.action) {
                    builder = builder.header(ORIGIN, origin.origin().ascii_serialization());
                }
                builder
            }
        };
        let builder = self.with_referer(builder.timeout(timeout));

        let response = Self::send(builder, &form.action).await?;
        let document = Self::into_document(response).await?;

        debug!(
            action = %form.action,
            fields = form.fields.len(),
            status = document.status,
            "submitted form"
        );
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn evaluate(&mut self, _script: &str, _timeout: Duration) -> Result<serde_json::Value> {
        Err(BrowserError::Unsupported(
            "script evaluation requires the browser transport".to_string(),
        ))
    }

    async fn snapshot(&mut self, _timeout: Duration) -> Result<Document> {
        self.client()?;
        self.current
            .clone()
            .ok_or_else(|| BrowserError::NavigationError("no document loaded".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_page_builds_client() {
        let transport = HttpTransport::new(HttpTransportConfig::default());
        assert_eq!(transport.name(), "http");
        let page = transport.open_page().await;
        assert!(page.is_ok());
    }

    #[tokio::test]
    async fn test_closed_page_rejects_calls() {
        let transport = HttpTransport::default();
        let mut page = transport.open_page().await.expect("open page");

        page.close().await.expect("close page");
        page.close().await.expect("close is idempotent");

        let result = page
            .navigate("https://portal.example", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(BrowserError::Closed)));
    }

    #[tokio::test]
    async fn test_snapshot_without_document() {
        let transport = HttpTransport::default();
        let mut page = transport.open_page().await.expect("open page");
        assert!(page.snapshot(Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_evaluate_unsupported() {
        let transport = HttpTransport::default();
        let mut page = transport.open_page().await.expect("open page");
        let result = page.evaluate("1 + 1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BrowserError::Unsupported(_))));
    }
}
