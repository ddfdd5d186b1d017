//! Query submitter.

use crate::challenge::ChallengeToken;
use crate::classify::{classify, Outcome, OutcomeLabel};
use crate::error::{QueryError, Result};
use crate::session::Session;
use registra_browser::{resolve_url, BrowserError, Document, FormSubmission};
use registra_core::QueryRequest;
use registra_portal::{PortalDefinition, ResultView};
use registra_solver::CaptchaSolution;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

/// A solved challenge paired with its answer.
#[derive(Debug, Clone, Copy)]
pub struct SolvedChallenge<'a> {
    /// Challenge read from the session being submitted
    pub token: &'a ChallengeToken,
    /// Answer written into the token's response field
    pub solution: &'a CaptchaSolution,
}

/// Posts the search form of a session.
pub struct QuerySubmitter {
    timeout: Duration,
}

impl QuerySubmitter {
    /// Submitter whose page operations each take at most `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Submit the search and return the result document, following a
    /// secondary result view when the portal uses one.
    pub async fn submit(
        &self,
        session: &mut Session,
        definition: &PortalDefinition,
        request: &QueryRequest,
        challenge: Option<SolvedChallenge<'_>>,
    ) -> Result<Document> {
        let form = build_form(session, definition, request, challenge)?;
        debug!(
            session_id = %session.id,
            action = %form.action,
            fields = form.fields.len(),
            value = %request.masked_value(),
            "submitting search"
        );

        let response = session
            .page()
            .submit_form(&form, self.timeout)
            .await
            .map_err(|e| transport_error("submitting search", &e))?;

        let ResultView::Secondary { link_selector, url } = &definition.search.result_view else {
            return Ok(response);
        };
        if let Some(label) = verdict_on_submission(&response, definition) {
            debug!(session_id = %session.id, outcome = %label, "submission answered directly");
            return Ok(response);
        }
        let Some(target) = secondary_target(&response, link_selector.as_deref(), url.as_deref())
        else {
            debug!(session_id = %session.id, "no secondary view link, using submission response");
            return Ok(response);
        };

        debug!(session_id = %session.id, url = %target, "opening result view");
        session
            .page()
            .navigate(&target, self.timeout)
            .await
            .map_err(|e| transport_error("opening result view", &e))
    }
}

/// Outcome the submission response already settles before any result view
/// is opened: a block, a rejected captcha, a server error or a no-data
/// phrase.
fn verdict_on_submission(response: &Document, definition: &PortalDefinition) -> Option<OutcomeLabel> {
    if response.status >= 500 {
        return Some(OutcomeLabel::TransientError);
    }
    let outcome = classify(response, definition);
    match outcome {
        Outcome::Blocked { .. } | Outcome::InvalidCaptcha { .. } | Outcome::Empty { .. } => {
            Some(outcome.label())
        }
        Outcome::Success(_) | Outcome::TransientError { .. } => None,
    }
}

fn transport_error(step: &str, err: &BrowserError) -> QueryError {
    if err.is_timeout() {
        QueryError::Transient(format!("{step} timed out"))
    } else {
        QueryError::Transient(format!("{step}: {err}"))
    }
}

/// Build the search form for one attempt.
///
/// Fields are written in order: the session's anti-forgery fields, fixed
/// fields, mode fields, the search value, the captcha answer and the submit
/// button. A later field with the same name replaces the earlier value in
/// place.
pub fn build_form(
    session: &Session,
    definition: &PortalDefinition,
    request: &QueryRequest,
    challenge: Option<SolvedChallenge<'_>>,
) -> Result<FormSubmission> {
    let search_field =
        definition
            .search_field(request.mode())
            .ok_or_else(|| QueryError::UnsupportedMode {
                target_id: definition.id().to_string(),
                mode: request.mode(),
            })?;

    let mut fields: Vec<(String, String)> = Vec::new();
    for (name, value) in &session.anti_forgery {
        set(&mut fields, name, value);
    }
    for (name, value) in &definition.search.fixed_fields {
        set(&mut fields, name, value);
    }
    if let Some(mode_fields) = definition.search.mode_fields.get(&request.mode()) {
        for (name, value) in mode_fields {
            set(&mut fields, name, value);
        }
    }
    set(&mut fields, search_field, request.value());

    if let Some(SolvedChallenge { token, solution }) = challenge {
        if token.session_id != session.id {
            return Err(QueryError::Internal(format!(
                "challenge {} belongs to session {}, not {}",
                token.challenge_id, token.session_id, session.id
            )));
        }
        set(&mut fields, &token.response_field, &solution.answer);
    }

    if let Some(submit) = &definition.search.submit_field {
        set(&mut fields, &submit.name, &submit.value);
    }

    Ok(FormSubmission {
        action: session.form_action.clone(),
        method: session.form_method,
        fields,
    })
}

fn set(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(n, _)| n == name) {
        Some((_, existing)) => *existing = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

fn secondary_target(
    response: &Document,
    link_selector: Option<&str>,
    fixed_url: Option<&str>,
) -> Option<String> {
    let linked = link_selector.and_then(|raw| {
        let selector = Selector::parse(raw).ok()?;
        let html = Html::parse_document(&response.body);
        let href = html.select(&selector).find_map(|el| {
            el.value()
                .attr("href")
                .or_else(|| el.value().attr("src"))
                .map(str::trim)
                .filter(|h| !h.is_empty() && !h.starts_with("javascript:") && *h != "#")
                .map(str::to_string)
        });
        href
    });

    linked
        .as_deref()
        .or(fixed_url)
        .and_then(|href| resolve_url(&response.url, href).ok())
}
