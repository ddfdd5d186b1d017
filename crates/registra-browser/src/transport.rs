//! Narrow capability interface the query engine drives portals through.

use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status of the response that produced this document
    pub status: u16,
    /// Response `Content-Type`, if known
    pub content_type: Option<String>,
    /// Response body (HTML or JSON)
    pub body: String,
}

impl Document {
    /// Build an HTML document with status 200.
    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
        }
    }

    /// Replace the status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// True for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when the body is a structured JSON payload.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
            || matches!(self.body.trim_start().chars().next(), Some('{' | '['))
    }
}

/// Raw bytes fetched within a session (captcha images).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP method of a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMethod {
    Get,
    #[default]
    Post,
}

/// A fully built form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    /// Absolute action URL
    pub action: String,
    pub method: FormMethod,
    /// Field name/value pairs in submission order
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    /// Value of the first field named `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One isolated browsing context: a browser tab or an HTTP client with its own
/// cookie jar. Nothing is shared between pages.
#[async_trait::async_trait]
pub trait PortalPage: Send {
    /// Load a URL, following redirects.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Document>;

    /// Fetch raw bytes with the page's cookies.
    async fn fetch_bytes(&mut self, url: &str, timeout: Duration) -> Result<FetchedBytes>;

    /// Submit a form and return the resulting document.
    async fn submit_form(&mut self, form: &FormSubmission, timeout: Duration) -> Result<Document>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str, timeout: Duration) -> Result<serde_json::Value>;

    /// Re-read the current document (used while waiting for client-side rendering).
    async fn snapshot(&mut self, timeout: Duration) -> Result<Document>;

    /// Release the underlying resource. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Whether the document can change after load (client-side rendering).
    fn renders_scripts(&self) -> bool {
        false
    }
}

/// Factory for fresh, isolated pages.
#[async_trait::async_trait]
pub trait PortalTransport: Send + Sync {
    /// Open a new page with empty cookie state.
    async fn open_page(&self) -> Result<Box<dyn PortalPage>>;

    /// Short transport name for logs.
    fn name(&self) -> &'static str;
}

/// Resolve `href` against the document URL `base`.
pub fn resolve_url(base: &str, href: &str) -> Result<String> {
    let base = url::Url::parse(base).map_err(|e| BrowserError::InvalidUrl(format!("{base}: {e}")))?;
    base.join(href.trim())
        .map(|u| u.to_string())
        .map_err(|e| BrowserError::InvalidUrl(format!("{href}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://portal.example/app/Busqueda.aspx", "Captcha.ashx?id=9").unwrap(),
            "https://portal.example/app/Captcha.ashx?id=9"
        );
        assert_eq!(
            resolve_url("https://portal.example/app/", "/img/c.png").unwrap(),
            "https://portal.example/img/c.png"
        );
        assert_eq!(
            resolve_url("https://portal.example/", "https://cdn.example/x").unwrap(),
            "https://cdn.example/x"
        );
    }

    #[test]
    fn test_document_kind() {
        let doc = Document::html("https://p.example", "<html></html>");
        assert!(doc.is_success());
        assert!(!doc.is_json());

        let doc = Document::html("https://p.example", "{\"ok\":true}").with_status(403);
        assert!(!doc.is_success());
        assert!(doc.is_json());
    }

    #[test]
    fn test_form_field_lookup() {
        let form = FormSubmission {
            action: "https://p.example/buscar".to_string(),
            method: FormMethod::Post,
            fields: vec![
                ("__VIEWSTATE".to_string(), "abc".to_string()),
                ("txtPlaca".to_string(), "ABC123".to_string()),
            ],
        };
        assert_eq!(form.field("txtPlaca"), Some("ABC123"));
        assert_eq!(form.field("missing"), None);
    }
}
