use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::transport::{Document, FetchedBytes, FormMethod, FormSubmission, PortalPage, PortalTransport};
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_SCRIPT: &str = "(() => { const e = performance.getEntriesByType('navigation')[0]; \
     return e && e.responseStatus ? e.responseStatus : 200; })()";

fn cdp(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::ChromiumError(e.to_string())
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| BrowserError::Timeout(format!("{what} exceeded {timeout:?}")))?
}

/// Headless Chromium transport.
///
/// Every page lives in its own browser context, so cookies and storage are
/// never shared between sessions.
pub struct BrowserEngine {
    browser: Arc<Browser>,
    fingerprint: FingerprintConfig,
}

impl BrowserEngine {
    /// Create a new headless browser engine with a randomized fingerprint
    pub async fn new() -> Result<Self> {
        Self::launch(true, FingerprintConfig::randomized()).await
    }

    /// Launch Chromium with a specific fingerprint
    pub async fn launch(headless: bool, fingerprint: FingerprintConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height);
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp)?;

        // Spawn browser handler
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            fingerprint,
        })
    }
}

#[async_trait::async_trait]
impl PortalTransport for BrowserEngine {
    async fn open_page(&self) -> Result<Box<dyn PortalPage>> {
        let context = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp)?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context.clone())
            .build()
            .map_err(BrowserError::ChromiumError)?;
        let page = self.browser.new_page(target).await.map_err(cdp)?;

        page.set_user_agent(SetUserAgentOverrideParams::new(
            self.fingerprint.user_agent.clone(),
        ))
        .await
        .map_err(cdp)?;

        Ok(Box::new(ChromiumPage {
            browser: Arc::clone(&self.browser),
            page: Some(page),
            context: Some(context),
        }))
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// One tab in a private browser context.
pub struct ChromiumPage {
    browser: Arc<Browser>,
    page: Option<Page>,
    context: Option<BrowserContextId>,
}

#[derive(Deserialize)]
struct FetchResult {
    status: u16,
    #[serde(rename = "type")]
    content_type: Option<String>,
    data: String,
}

impl ChromiumPage {
    fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    async fn eval(page: &Page, script: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::ChromiumError)?;
        let result = page.evaluate_expression(params).await.map_err(cdp)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn read_document(page: &Page) -> Result<Document> {
        let body = page.content().await.map_err(cdp)?;
        let url = page.url().await.map_err(cdp)?.unwrap_or_default();
        let status = Self::eval(page, STATUS_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(200);

        Ok(Document {
            url,
            status,
            content_type: Some("text/html".to_string()),
            body,
        })
    }

    fn form_script(form: &FormSubmission) -> Result<String> {
        let action = serde_json::to_string(&form.action)
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let fields = serde_json::to_string(&form.fields)
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        let method = match form.method {
            FormMethod::Get => "get",
            FormMethod::Post => "post",
        };

        Ok(format!(
            "(() => {{ const f = document.createElement('form'); f.method = '{method}'; \
             f.action = {action}; for (const [k, v] of {fields}) {{ \
             const i = document.createElement('input'); i.type = 'hidden'; i.name = k; i.value = v; \
             f.appendChild(i); }} document.body.appendChild(f); \
             HTMLFormElement.prototype.submit.call(f); return true; }})()"
        ))
    }

    fn fetch_script(url: &str) -> Result<String> {
        let url = serde_json::to_string(url).map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(format!(
            "(async () => {{ const r = await fetch({url}, {{ credentials: 'include' }}); \
             const b = new Uint8Array(await r.arrayBuffer()); let s = ''; \
             for (let i = 0; i < b.length; i++) s += String.fromCharCode(b[i]); \
             return {{ status: r.status, type: r.headers.get('content-type'), data: btoa(s) }}; }})()"
        ))
    }
}

#[async_trait::async_trait]
impl PortalPage for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Document> {
        let page = self.page()?;
        let document = with_timeout(timeout, "navigate", async {
            page.goto(url).await.map_err(cdp)?;
            Self::read_document(page).await
        })
        .await?;
        debug!(url = %document.url, status = document.status, "navigated");
        Ok(document)
    }

    async fn fetch_bytes(&mut self, url: &str, timeout: Duration) -> Result<FetchedBytes> {
        let page = self.page()?;
        let script = Self::fetch_script(url)?;
        let value = with_timeout(timeout, "fetch", Self::eval(page, &script)).await?;

        let fetched: FetchResult = serde_json::from_value(value)
            .map_err(|e| BrowserError::NavigationError(format!("fetch {url}: {e}")))?;
        if !(200..300).contains(&fetched.status) {
            return Err(BrowserError::NavigationError(format!(
                "fetching {url} returned HTTP {}",
                fetched.status
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(fetched.data)
            .map_err(|e| BrowserError::NavigationError(format!("fetch {url}: {e}")))?;

        Ok(FetchedBytes {
            bytes,
            content_type: fetched.content_type,
        })
    }

    async fn submit_form(&mut self, form: &FormSubmission, timeout: Duration) -> Result<Document> {
        let page = self.page()?;
        let script = Self::form_script(form)?;
        with_timeout(timeout, "submit", async {
            Self::eval(page, &script).await?;
            page.wait_for_navigation().await.map_err(cdp)?;
            Self::read_document(page).await
        })
        .await
    }

    async fn evaluate(&mut self, script: &str, timeout: Duration) -> Result<serde_json::Value> {
        let page = self.page()?;
        with_timeout(timeout, "evaluate", Self::eval(page, script)).await
    }

    async fn snapshot(&mut self, timeout: Duration) -> Result<Document> {
        let page = self.page()?;
        with_timeout(timeout, "snapshot", Self::read_document(page)).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            page.close().await.map_err(cdp)?;
        }
        if let Some(context) = self.context.take() {
            self.browser
                .execute(DisposeBrowserContextParams::new(context))
                .await
                .map_err(cdp)?;
        }
        Ok(())
    }

    fn renders_scripts(&self) -> bool {
        true
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        let page = self.page.take();
        let context = self.context.take();
        if page.is_none() && context.is_none() {
            return;
        }

        // Dropped mid-pipeline (cancellation); release the tab in the background
        let browser = Arc::clone(&self.browser);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(page) = page {
                        let _ = page.close().await;
                    }
                    if let Some(context) = context {
                        let _ = browser.execute(DisposeBrowserContextParams::new(context)).await;
                    }
                });
            }
            Err(_) => warn!("browser page dropped outside a runtime; tab left open"),
        }
    }
}
