//! 2Captcha-protocol HTTP client (`in.php` / `res.php`).
//!
//! Several services speak the same protocol, so the base URL is configurable.

use crate::challenge::{ChallengeArtifact, JobId, PollStatus, SolveConstraints};
use crate::error::{classify_failure_code, Result, SolverError};
use crate::service::SolverService;
use async_trait::async_trait;
use base64::Engine as _;
use registra_core::{SolverConfig, WidgetKind};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

const NOT_READY: &str = "CAPCHA_NOT_READY";

/// 2Captcha-compatible solving service.
pub struct TwoCaptchaService {
    api_key: Zeroizing<String>,
    client: Client,
    base_url: String,
}

impl TwoCaptchaService {
    /// Create a service client against `base_url`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(SolverError::Network)?;

        Ok(Self {
            api_key: Zeroizing::new(api_key.into()),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a service client from configuration.
    ///
    /// # Errors
    /// Returns error if the provider is unknown or no API key is set.
    pub fn from_config(config: &SolverConfig) -> Result<Self> {
        if !config.provider.eq_ignore_ascii_case("2captcha") {
            return Err(SolverError::InvalidRequest(format!(
                "unsupported solver provider '{}'",
                config.provider
            )));
        }
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SolverError::MissingApiKey)?;

        Self::new(api_key, config.base_url.clone())
    }

    async fn read(response: Response) -> Result<ApiResponse> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SolverError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        parse_response(&body)
    }

    async fn res(&self, action: &str, id: Option<&JobId>) -> Result<ApiResponse> {
        let mut query: Vec<(&str, &str)> = vec![
            ("key", self.api_key.as_str()),
            ("action", action),
            ("json", "1"),
        ];
        if let Some(id) = id {
            query.push(("id", id.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/res.php", self.base_url))
            .query(&query)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[async_trait]
impl SolverService for TwoCaptchaService {
    async fn submit(
        &self,
        artifact: &ChallengeArtifact,
        constraints: &SolveConstraints,
    ) -> Result<JobId> {
        let mut form = submit_params(artifact, constraints)?;
        form.push(("key".to_string(), self.api_key.as_str().to_string()));

        let response = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await?;
        let reply = Self::read(response).await?;

        if reply.status == 1 {
            let job = JobId::new(reply.request_text());
            debug!(job_id = %job, kind = %artifact.kind_label(), "captcha submitted");
            Ok(job)
        } else {
            Err(classify_failure_code(&reply.request_text()))
        }
    }

    async fn poll(&self, job: &JobId) -> Result<PollStatus> {
        let reply = self.res("get", Some(job)).await?;
        Ok(reply.into_poll_status())
    }

    async fn report_incorrect(&self, job: &JobId) -> Result<()> {
        let reply = self.res("reportbad", Some(job)).await?;
        if reply.status == 1 {
            Ok(())
        } else {
            Err(classify_failure_code(&reply.request_text()))
        }
    }

    async fn balance(&self) -> Result<f64> {
        let reply = self.res("getbalance", None).await?;
        if reply.status != 1 {
            return Err(classify_failure_code(&reply.request_text()));
        }
        let text = reply.request_text();
        text.trim()
            .parse::<f64>()
            .map_err(|e| SolverError::ParseError(format!("balance '{text}': {e}")))
    }

    fn service_id(&self) -> &str {
        "2captcha"
    }
}

/// `in.php` form fields for a challenge, without the API key.
pub(crate) fn submit_params(
    artifact: &ChallengeArtifact,
    constraints: &SolveConstraints,
) -> Result<Vec<(String, String)>> {
    let mut params = vec![("json".to_string(), "1".to_string())];
    let mut push = |k: &str, v: String| params.push((k.to_string(), v));

    match artifact {
        ChallengeArtifact::Image { bytes, .. } => {
            if bytes.is_empty() {
                return Err(SolverError::InvalidRequest(
                    "captcha image is empty".to_string(),
                ));
            }
            push("method", "base64".to_string());
            push("body", base64::engine::general_purpose::STANDARD.encode(bytes));
            if constraints.numeric_only {
                push("numeric", "1".to_string());
            }
            if let Some(min) = constraints.min_length {
                push("min_len", min.to_string());
            }
            if let Some(max) = constraints.max_length {
                push("max_len", max.to_string());
            }
            if constraints.case_sensitive {
                push("regsense", "1".to_string());
            }
        }
        ChallengeArtifact::Widget {
            kind,
            site_key,
            page_url,
        } => {
            let (method, key_field) = match kind {
                WidgetKind::RecaptchaV2 => ("userrecaptcha", "googlekey"),
                WidgetKind::Hcaptcha => ("hcaptcha", "sitekey"),
                WidgetKind::Turnstile => ("turnstile", "sitekey"),
            };
            push("method", method.to_string());
            push(key_field, site_key.clone());
            push("pageurl", page_url.clone());
        }
    }

    Ok(params)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: u8,
    request: serde_json::Value,
}

impl ApiResponse {
    fn request_text(&self) -> String {
        match &self.request {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn into_poll_status(self) -> PollStatus {
        let text = self.request_text();
        if self.status == 1 {
            PollStatus::Ready(text)
        } else if text == NOT_READY {
            PollStatus::Pending
        } else {
            PollStatus::Failed(text)
        }
    }
}

fn parse_response(body: &str) -> Result<ApiResponse> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        SolverError::ParseError(format!("{e}: {preview}"))
    })
}
