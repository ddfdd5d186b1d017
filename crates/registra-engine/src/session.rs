//! Session store: one isolated page per attempt.
//!
//! Opening a session loads the entry page, follows at most one frame or
//! meta-refresh hop to reach the document holding the search form, and
//! captures the form's anti-forgery fields.

use crate::classify::detect_block;
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use registra_browser::{
    resolve_url, BrowserError, Document, FormMethod, PortalPage, PortalTransport,
};
use registra_core::TargetId;
use registra_portal::{PortalDefinition, SearchHttpMethod};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// State for one attempt against one portal. Never shared between attempts.
pub struct Session {
    /// Identifier recorded in the attempt log
    pub id: Uuid,
    /// Portal the session was opened against
    pub target_id: TargetId,
    /// When the entry page was requested
    pub created_at: DateTime<Utc>,
    /// Document containing the search form (updated while waiting on renders)
    pub document: Document,
    /// Hidden fields echoed back on submission, in form order
    pub anti_forgery: Vec<(String, String)>,
    /// Resolved form action
    pub form_action: String,
    /// Method of the search form
    pub form_method: FormMethod,
    page: Box<dyn PortalPage>,
}

impl Session {
    /// The page this session drives.
    pub fn page(&mut self) -> &mut dyn PortalPage {
        self.page.as_mut()
    }

    /// Release the page. Errors are logged, not returned.
    pub async fn close(mut self) {
        if let Err(e) = self.page.close().await {
            warn!(session_id = %self.id, error = %e, "failed to close session page");
        } else {
            debug!(session_id = %self.id, "session closed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .field("url", &self.document.url)
            .field("anti_forgery", &self.anti_forgery.len())
            .finish_non_exhaustive()
    }
}

/// Opens and closes sessions through a transport.
pub struct SessionStore {
    transport: Arc<dyn PortalTransport>,
    timeout: Duration,
}

impl SessionStore {
    /// Store opening pages on `transport`; reaching the search form takes
    /// at most `timeout`.
    pub fn new(transport: Arc<dyn PortalTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Open a fresh session for `definition`.
    ///
    /// The whole handshake is bounded by the session timeout; running out of
    /// time is [`QueryError::SessionUnavailable`]. A 403/429 or a known
    /// anti-bot page is [`QueryError::Blocked`].
    pub async fn open(&self, definition: &PortalDefinition) -> Result<Session> {
        let mut page = self
            .transport
            .open_page()
            .await
            .map_err(|e| QueryError::SessionUnavailable(format!("opening page: {e}")))?;

        let handshake = tokio::time::timeout(
            self.timeout,
            Self::handshake(page.as_mut(), definition, self.timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(QueryError::SessionUnavailable(format!(
                "no search form within {}s",
                self.timeout.as_secs()
            )))
        });

        match handshake {
            Ok(located) => {
                let session = Session {
                    id: Uuid::new_v4(),
                    target_id: definition.id().clone(),
                    created_at: Utc::now(),
                    document: located.document,
                    anti_forgery: located.anti_forgery,
                    form_action: located.form_action,
                    form_method: match definition.search.method {
                        SearchHttpMethod::Get => FormMethod::Get,
                        SearchHttpMethod::Post => FormMethod::Post,
                    },
                    page,
                };
                debug!(
                    session_id = %session.id,
                    target_id = %session.target_id,
                    transport = self.transport.name(),
                    anti_forgery = session.anti_forgery.len(),
                    "session opened"
                );
                Ok(session)
            }
            Err(e) => {
                if let Err(close_err) = page.close().await {
                    warn!(error = %close_err, "failed to close page after handshake failure");
                }
                Err(e)
            }
        }
    }

    async fn handshake(
        page: &mut dyn PortalPage,
        definition: &PortalDefinition,
        timeout: Duration,
    ) -> Result<LocatedForm> {
        let entry = page
            .navigate(&definition.session.entry_url, timeout)
            .await
            .map_err(navigation_error)?;
        check_document(&entry, definition)?;

        let hop = match locate_form(&entry, definition)? {
            FormSearch::Found(located) => return Ok(located),
            FormSearch::Hop(url) => url,
            FormSearch::Missing => return Err(form_missing(definition)),
        };

        debug!(url = %hop, "following frame to search form");
        let framed = page.navigate(&hop, timeout).await.map_err(navigation_error)?;
        check_document(&framed, definition)?;

        match locate_form(&framed, definition)? {
            FormSearch::Found(located) => Ok(located),
            FormSearch::Hop(_) | FormSearch::Missing => Err(form_missing(definition)),
        }
    }
}

fn navigation_error(err: BrowserError) -> QueryError {
    if err.is_timeout() {
        QueryError::SessionUnavailable(format!("entry page timed out: {err}"))
    } else {
        QueryError::SessionUnavailable(err.to_string())
    }
}

fn form_missing(definition: &PortalDefinition) -> QueryError {
    QueryError::SelectorMissing(format!(
        "search form '{}' not found",
        definition.session.form_selector
    ))
}

fn check_document(document: &Document, definition: &PortalDefinition) -> Result<()> {
    if let Some(reason) = detect_block(document, &definition.markers.blocked) {
        return Err(QueryError::Blocked(reason));
    }
    if !document.is_success() {
        return Err(QueryError::SessionUnavailable(format!(
            "entry page returned HTTP {}",
            document.status
        )));
    }
    Ok(())
}

#[derive(Debug)]
struct LocatedForm {
    document: Document,
    anti_forgery: Vec<(String, String)>,
    form_action: String,
}

#[derive(Debug)]
enum FormSearch {
    Found(LocatedForm),
    Hop(String),
    Missing,
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| QueryError::Configuration(format!("invalid selector '{selector}': {e}")))
}

fn locate_form(document: &Document, definition: &PortalDefinition) -> Result<FormSearch> {
    let html = Html::parse_document(&document.body);
    let form_selector = parse_selector(&definition.session.form_selector)?;

    if let Some(form) = html.select(&form_selector).next() {
        let hidden = parse_selector("input[type=hidden][name], input[type=HIDDEN][name]")?;
        let allow = &definition.session.anti_forgery_fields;

        let mut anti_forgery = Vec::new();
        for input in form.select(&hidden) {
            let Some(name) = input.value().attr("name") else {
                continue;
            };
            if allow.is_empty() || allow.iter().any(|a| a == name) {
                let value = input.value().attr("value").unwrap_or_default();
                anti_forgery.push((name.to_string(), value.to_string()));
            }
        }
        for expected in allow {
            if !anti_forgery.iter().any(|(name, _)| name == expected) {
                warn!(field = %expected, "anti-forgery field missing from form");
            }
        }

        let form_action = match &definition.search.action {
            Some(action) => resolve_url(&document.url, action),
            None => match form.value().attr("action").filter(|a| !a.trim().is_empty()) {
                Some(action) => resolve_url(&document.url, action),
                None => Ok(document.url.clone()),
            },
        }
        .map_err(|e| QueryError::SiteChanged(format!("form action: {e}")))?;

        return Ok(FormSearch::Found(LocatedForm {
            document: document.clone(),
            anti_forgery,
            form_action,
        }));
    }

    let frame_selector = definition
        .session
        .frame_selector
        .as_deref()
        .unwrap_or("iframe[src], frame[src]");
    let frame = parse_selector(frame_selector)?;
    if let Some(src) = html
        .select(&frame)
        .find_map(|el| el.value().attr("src"))
        .filter(|src| !src.trim().is_empty())
    {
        let url = resolve_url(&document.url, src)
            .map_err(|e| QueryError::SiteChanged(format!("frame source: {e}")))?;
        return Ok(FormSearch::Hop(url));
    }

    if let Some(target) = meta_refresh_target(&html) {
        let url = resolve_url(&document.url, &target)
            .map_err(|e| QueryError::SiteChanged(format!("meta refresh: {e}")))?;
        return Ok(FormSearch::Hop(url));
    }

    Ok(FormSearch::Missing)
}

fn meta_refresh_target(html: &Html) -> Option<String> {
    let selector = Selector::parse("meta[http-equiv]").ok()?;
    html.select(&selector)
        .filter(|m| {
            m.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
        })
        .find_map(|m| {
            let content = m.value().attr("content")?;
            let lower = content.to_ascii_lowercase();
            let start = lower.find("url=")? + 4;
            let target = content[start..].trim().trim_matches(|c| c == '\'' || c == '"');
            (!target.is_empty()).then(|| target.to_string())
        })
}
