//! Scripted transport and solver for unit tests.

use async_trait::async_trait;
use registra_browser::{
    BrowserError, Document, FetchedBytes, FormSubmission, PortalPage, PortalTransport,
};
use registra_portal::PortalDefinition;
use registra_solver::{
    CaptchaSolution, CaptchaSolver, ChallengeArtifact, JobId, SolveConstraints, SolverError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const ENTRY_URL: &str = "https://portal.example/Busqueda.aspx";
pub(crate) const CAPTCHA_URL: &str = "https://portal.example/Captcha.ashx?id=1";

const DEFINITION: &str = r#"
[portal]
id = "test-portal"
name = "Test Portal"
url = "https://portal.example"
domain = "portal.example"
category = "infraction"
last_verified = "2026-09-01"

[session]
entry_url = "https://portal.example/Busqueda.aspx"
form_selector = "form#aspnetForm"

[challenge]
kind = "image"
image_selector = "img#imgCaptcha"
input_field = "txtCaptcha"
min_length = 4
max_length = 6

[search.modes]
plate = "txtPlaca"

[search.submit_field]
name = "btnBuscar"
value = "Buscar"

[results]
table_selectors = ["table#grdResultados"]

[markers]
no_data = ["Se encontraron 0 coincidencias"]
invalid_captcha = ["código de seguridad incorrecto"]

[[fields]]
source = "Papeleta"
target = "number"

[[fields]]
source = "Fecha"
target = "date"
kind = "date"

[[fields]]
source = "Monto"
target = "amount"
kind = "amount"

[[fields]]
source = "Estado"
target = "status"
"#;

pub(crate) fn portal_definition() -> PortalDefinition {
    let definition: PortalDefinition = toml::from_str(DEFINITION).expect("parse test definition");
    definition.validate().expect("valid test definition");
    definition
}

/// Search page carrying a captcha image and a view state of `tag`.
pub(crate) fn search_page(tag: &str) -> Document {
    Document::html(
        ENTRY_URL,
        format!(
            r#"<html><body><form id="aspnetForm" action="Busqueda.aspx" method="post">
                <input type="hidden" name="__VIEWSTATE" value="vs-{tag}" />
                <img id="imgCaptcha" src="Captcha.ashx?id=1" />
                <input type="text" name="txtCaptcha" />
                <input type="text" name="txtPlaca" />
            </form></body></html>"#
        ),
    )
}

pub(crate) fn results_page(rows: &[(&str, &str, &str, &str)]) -> Document {
    let body: String = rows
        .iter()
        .map(|(number, date, amount, status)| {
            format!("<tr><td>{number}</td><td>{date}</td><td>{amount}</td><td>{status}</td></tr>")
        })
        .collect();
    Document::html(
        ENTRY_URL,
        format!(
            r#"<html><body><table id="grdResultados">
                <tr><th>Papeleta</th><th>Fecha</th><th>Monto</th><th>Estado</th></tr>
                {body}
            </table></body></html>"#
        ),
    )
}

pub(crate) fn captcha_bytes() -> FetchedBytes {
    FetchedBytes {
        bytes: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
        content_type: Some("image/png".to_string()),
    }
}

/// Behaviour of one page, consumed by the next `open_page` call.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pages: HashMap<String, Document>,
    bytes: HashMap<String, FetchedBytes>,
    submits: VecDeque<Document>,
    snapshots: VecDeque<Document>,
    delay: Duration,
    renders_scripts: bool,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, url: &str, document: Document) -> Self {
        self.pages.insert(url.to_string(), document);
        self
    }

    pub(crate) fn image(mut self, url: &str, bytes: FetchedBytes) -> Self {
        self.bytes.insert(url.to_string(), bytes);
        self
    }

    pub(crate) fn submit(mut self, document: Document) -> Self {
        self.submits.push_back(document);
        self
    }

    pub(crate) fn snapshot(mut self, document: Document) -> Self {
        self.snapshots.push_back(document);
        self
    }

    /// Delay applied to every navigation.
    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn rendering(mut self) -> Self {
        self.renders_scripts = true;
        self
    }

    /// Search page with a captcha image, answered by `response` on submit.
    pub(crate) fn captcha_round(tag: &str, response: Document) -> Self {
        Self::new()
            .page(ENTRY_URL, search_page(tag))
            .image(CAPTCHA_URL, captcha_bytes())
            .submit(response)
    }
}

#[derive(Debug, Default)]
struct Log {
    opened: usize,
    closed: usize,
    navigations: Vec<String>,
    submissions: Vec<FormSubmission>,
}

/// Transport handing out one scripted page per `open_page`.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    log: Arc<Mutex<Log>>,
}

impl FakeTransport {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            log: Arc::default(),
        }
    }

    pub(crate) fn opened_pages(&self) -> usize {
        self.log.lock().unwrap().opened
    }

    pub(crate) fn closed_pages(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub(crate) fn navigations(&self) -> Vec<String> {
        self.log.lock().unwrap().navigations.clone()
    }

    pub(crate) fn submissions(&self) -> Vec<FormSubmission> {
        self.log.lock().unwrap().submissions.clone()
    }
}

#[async_trait]
impl PortalTransport for FakeTransport {
    async fn open_page(&self) -> registra_browser::Result<Box<dyn PortalPage>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BrowserError::NavigationError("no scripted page left".to_string()))?;
        self.log.lock().unwrap().opened += 1;
        Ok(Box::new(FakePage {
            script,
            log: Arc::clone(&self.log),
            current: None,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakePage {
    script: Script,
    log: Arc<Mutex<Log>>,
    current: Option<Document>,
    closed: bool,
}

#[async_trait]
impl PortalPage for FakePage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> registra_browser::Result<Document> {
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.log.lock().unwrap().navigations.push(url.to_string());
        let document = self
            .script
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::NavigationError(format!("unscripted url {url}")))?;
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn fetch_bytes(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> registra_browser::Result<FetchedBytes> {
        self.script
            .bytes
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::NavigationError(format!("unscripted bytes {url}")))
    }

    async fn submit_form(
        &mut self,
        form: &FormSubmission,
        _timeout: Duration,
    ) -> registra_browser::Result<Document> {
        self.log.lock().unwrap().submissions.push(form.clone());
        let document = self
            .script
            .submits
            .pop_front()
            .ok_or_else(|| BrowserError::NavigationError("unscripted submit".to_string()))?;
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn evaluate(
        &mut self,
        _script: &str,
        _timeout: Duration,
    ) -> registra_browser::Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn snapshot(&mut self, _timeout: Duration) -> registra_browser::Result<Document> {
        if let Some(document) = self.script.snapshots.pop_front() {
            self.current = Some(document);
        }
        self.current.clone().ok_or(BrowserError::Closed)
    }

    async fn close(&mut self) -> registra_browser::Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closed += 1;
        }
        Ok(())
    }

    fn renders_scripts(&self) -> bool {
        self.script.renders_scripts
    }
}

/// One scripted solver reply.
#[derive(Debug, Clone)]
pub(crate) enum Solve {
    Answer(&'static str),
    Unsolvable,
    ServiceError,
    Timeout,
}

#[derive(Default)]
pub(crate) struct FakeSolver {
    replies: Mutex<VecDeque<Solve>>,
    artifacts: Mutex<Vec<ChallengeArtifact>>,
    reports: Mutex<Vec<JobId>>,
}

impl FakeSolver {
    pub(crate) fn new(replies: Vec<Solve>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub(crate) fn solve_count(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    pub(crate) fn reports(&self) -> Vec<JobId> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptchaSolver for FakeSolver {
    async fn solve(
        &self,
        artifact: &ChallengeArtifact,
        _constraints: &SolveConstraints,
    ) -> registra_solver::Result<CaptchaSolution> {
        let n = {
            let mut artifacts = self.artifacts.lock().unwrap();
            artifacts.push(artifact.clone());
            artifacts.len()
        };
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Solve::Answer("abcd"));
        match reply {
            Solve::Answer(answer) => Ok(CaptchaSolution {
                answer: answer.to_string(),
                solve_latency_ms: 1_000,
                job_id: JobId::new(format!("job-{n}")),
            }),
            Solve::Unsolvable => Err(SolverError::Unsolvable {
                code: "ERROR_CAPTCHA_UNSOLVABLE".to_string(),
            }),
            Solve::ServiceError => Err(SolverError::Service {
                code: "ERROR_NO_SLOT_AVAILABLE".to_string(),
                message: "no free workers".to_string(),
            }),
            Solve::Timeout => Err(SolverError::Timeout { seconds: 30 }),
        }
    }

    async fn report_incorrect(&self, solution: &CaptchaSolution) -> registra_solver::Result<()> {
        self.reports.lock().unwrap().push(solution.job_id.clone());
        Ok(())
    }
}
