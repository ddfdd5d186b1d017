//! Challenge retriever.
//!
//! Finds the captcha on the session's search document and turns it into a
//! [`ChallengeArtifact`] for the solver. A challenge the portal left out is
//! not the same as one still loading: the first is fine when the definition
//! marks the challenge optional, the second is waited on while the page can
//! still change.

use crate::error::{QueryError, Result};
use crate::session::Session;
use base64::Engine as _;
use registra_browser::{resolve_url, Document};
use registra_portal::ChallengeSpec;
use registra_solver::{ChallengeArtifact, SolveConstraints};
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// A challenge tied to the session that produced it.
#[derive(Debug, Clone)]
pub struct ChallengeToken {
    /// Identifier recorded in the attempt log
    pub challenge_id: Uuid,
    /// Session the challenge was read from
    pub session_id: Uuid,
    /// What the solver receives
    pub artifact: ChallengeArtifact,
    /// Form field the answer is written to
    pub response_field: String,
    /// Length and charset hints for image codes
    pub constraints: SolveConstraints,
}

/// What the current document shows of the challenge.
#[derive(Debug, PartialEq, Eq)]
enum Lookup {
    Absent,
    Loading,
    ImageUrl(String),
    InlineImage { bytes: Vec<u8>, mime: String },
    SiteKey(String),
}

/// Reads the challenge off a session's search document.
pub struct ChallengeRetriever {
    wait: Duration,
    poll_interval: Duration,
    fetch_timeout: Duration,
}

impl ChallengeRetriever {
    /// `wait` bounds how long a challenge that is still loading is polled
    /// for; `fetch_timeout` bounds each image download.
    #[must_use]
    pub fn new(wait: Duration, poll_interval: Duration, fetch_timeout: Duration) -> Self {
        Self {
            wait,
            poll_interval,
            fetch_timeout,
        }
    }

    /// Get the challenge for `session`, or `None` when the portal has none.
    pub async fn get_challenge(
        &self,
        session: &mut Session,
        spec: &ChallengeSpec,
    ) -> Result<Option<ChallengeToken>> {
        if matches!(spec, ChallengeSpec::None) {
            return Ok(None);
        }

        let deadline = Instant::now() + self.wait;
        let lookup = loop {
            let lookup = locate(&session.document, spec)?;
            let settled = match lookup {
                Lookup::Absent if spec.is_optional() => return Ok(None),
                Lookup::Absent | Lookup::Loading => false,
                _ => true,
            };
            if settled {
                break lookup;
            }

            let now = Instant::now();
            if !session.page().renders_scripts() || now >= deadline {
                return Err(QueryError::ChallengeUnavailable(match lookup {
                    Lookup::Loading => "challenge did not finish loading".to_string(),
                    _ => "challenge not found on search page".to_string(),
                }));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            session.document = session
                .page()
                .snapshot(self.fetch_timeout)
                .await
                .map_err(|e| QueryError::ChallengeUnavailable(e.to_string()))?;
        };

        let artifact = match lookup {
            Lookup::ImageUrl(url) => {
                let fetched = session
                    .page()
                    .fetch_bytes(&url, self.fetch_timeout)
                    .await
                    .map_err(|e| QueryError::ChallengeUnavailable(format!("captcha image: {e}")))?;
                if fetched.bytes.is_empty() {
                    return Err(QueryError::ChallengeUnavailable(
                        "captcha image is empty".to_string(),
                    ));
                }
                ChallengeArtifact::Image {
                    bytes: fetched.bytes,
                    mime: fetched
                        .content_type
                        .unwrap_or_else(|| "image/png".to_string()),
                }
            }
            Lookup::InlineImage { bytes, mime } => ChallengeArtifact::Image { bytes, mime },
            Lookup::SiteKey(site_key) => match spec {
                ChallengeSpec::Widget { widget, .. } => ChallengeArtifact::Widget {
                    kind: *widget,
                    site_key,
                    page_url: session.document.url.clone(),
                },
                _ => return Err(QueryError::Internal("site key for non-widget challenge".into())),
            },
            Lookup::Absent | Lookup::Loading => {
                return Err(QueryError::Internal("unsettled challenge lookup".into()))
            }
        };

        let token = ChallengeToken {
            challenge_id: Uuid::new_v4(),
            session_id: session.id,
            response_field: response_field(spec),
            constraints: constraints(spec),
            artifact,
        };
        debug!(
            session_id = %token.session_id,
            challenge_id = %token.challenge_id,
            kind = %token.artifact.kind_label(),
            "challenge retrieved"
        );
        Ok(Some(token))
    }
}

fn response_field(spec: &ChallengeSpec) -> String {
    match spec {
        ChallengeSpec::Image { input_field, .. } => input_field.clone(),
        ChallengeSpec::Widget {
            widget,
            response_field,
            ..
        } => response_field
            .clone()
            .unwrap_or_else(|| widget.default_response_field().to_string()),
        ChallengeSpec::None => String::new(),
    }
}

fn constraints(spec: &ChallengeSpec) -> SolveConstraints {
    match spec {
        ChallengeSpec::Image {
            numeric_only,
            min_length,
            max_length,
            case_sensitive,
            ..
        } => SolveConstraints {
            numeric_only: *numeric_only,
            min_length: *min_length,
            max_length: *max_length,
            case_sensitive: *case_sensitive,
        },
        _ => SolveConstraints::default(),
    }
}

fn selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw)
        .map_err(|e| QueryError::Configuration(format!("invalid selector '{raw}': {e}")))
}

fn locate(document: &Document, spec: &ChallengeSpec) -> Result<Lookup> {
    let html = Html::parse_document(&document.body);

    match spec {
        ChallengeSpec::None => Ok(Lookup::Absent),
        ChallengeSpec::Image { image_selector, .. } => {
            let Some(image) = html.select(&selector(image_selector)?).next() else {
                return Ok(Lookup::Absent);
            };
            let src = image.value().attr("src").map(str::trim).unwrap_or_default();
            if src.is_empty() || src == "about:blank" || src == "#" {
                return Ok(Lookup::Loading);
            }
            if let Some(data) = src.strip_prefix("data:") {
                return decode_data_uri(data).map_or(Ok(Lookup::Loading), |(bytes, mime)| {
                    Ok(Lookup::InlineImage { bytes, mime })
                });
            }
            resolve_url(&document.url, src)
                .map(Lookup::ImageUrl)
                .map_err(|e| QueryError::SiteChanged(format!("captcha image source: {e}")))
        }
        ChallengeSpec::Widget {
            site_key,
            site_key_selector,
            ..
        } => {
            let element = html.select(&selector(site_key_selector)?).next();
            if let Some(key) = site_key {
                return Ok(if element.is_none() && spec.is_optional() {
                    Lookup::Absent
                } else {
                    Lookup::SiteKey(key.clone())
                });
            }
            let Some(element) = element else {
                return Ok(Lookup::Absent);
            };
            match element.value().attr("data-sitekey").map(str::trim) {
                Some(key) if !key.is_empty() => Ok(Lookup::SiteKey(key.to_string())),
                _ => Ok(Lookup::Loading),
            }
        }
    }
}

/// Decode the part of a `data:` URI after the scheme.
fn decode_data_uri(data: &str) -> Option<(Vec<u8>, String)> {
    let (meta, payload) = data.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
        .filter(|b| !b.is_empty())?;
    let mime = if mime.is_empty() { "image/png" } else { mime };
    Some((bytes, mime.to_string()))
}
