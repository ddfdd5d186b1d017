//! End-to-end query flow against a simulated WebForms portal using the
//! shipped SAT Lima definition.

use async_trait::async_trait;
use registra_browser::{
    BrowserError, Document, FetchedBytes, FormSubmission, PortalPage, PortalTransport,
};
use registra_core::{EngineConfig, SearchMode};
use registra_engine::{ErrorKind, QueryEngine, QueryStatus};
use registra_portal::{PortalLoader, PortalRegistry};
use registra_solver::{
    CaptchaSolution, CaptchaSolver, ChallengeArtifact, JobId, SolveConstraints, SolverError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENTRY: &str = "https://www.sat.gob.pe/VirtualSAT/modulos/papeletas.aspx";

/// Simulated portal: every page is a new server session whose view state and
/// captcha code only validate together.
#[derive(Clone, Default)]
struct SimulatedPortal {
    sessions: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    plates_with_tickets: Vec<&'static str>,
}

#[async_trait]
impl PortalTransport for SimulatedPortal {
    async fn open_page(&self) -> registra_browser::Result<Box<dyn PortalPage>> {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(SimulatedPage {
            session,
            portal: self.clone(),
            current: None,
        }))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

struct SimulatedPage {
    session: usize,
    portal: SimulatedPortal,
    current: Option<Document>,
}

impl SimulatedPage {
    fn search_page(&self) -> Document {
        let n = self.session;
        Document::html(
            ENTRY,
            format!(
                r#"<form id="aspnetForm" method="post" action="./papeletas.aspx">
                    <input type="hidden" name="__VIEWSTATE" value="state-{n}" />
                    <input type="hidden" name="__VIEWSTATEGENERATOR" value="CA0B0334" />
                    <input type="hidden" name="__EVENTVALIDATION" value="ev-{n}" />
                    <input type="hidden" name="ctl00$hdnTracking" value="ignored" />
                    <img id="ctl00_cplPrincipal_imgCaptcha" src="../Captcha.aspx?s={n}" />
                    <input name="ctl00$cplPrincipal$txtCaptcha" />
                    <input name="ctl00$cplPrincipal$txtPlaca" />
                </form>"#
            ),
        )
    }

    fn respond(&self, form: &FormSubmission) -> Document {
        let n = self.session;
        let code_ok = form.field("ctl00$cplPrincipal$txtCaptcha") == Some(&*format!("code{n}"))
            && form.field("__VIEWSTATE") == Some(&*format!("state-{n}"));
        if !code_ok {
            return Document::html(
                ENTRY,
                "<span id=\"lblMensaje\">El código de seguridad incorrecto, intente nuevamente</span>",
            );
        }

        let plate = form.field("ctl00$cplPrincipal$txtPlaca").unwrap_or_default();
        if !self.portal.plates_with_tickets.iter().any(|p| *p == plate) {
            return Document::html(
                ENTRY,
                format!("<div>Se encontraron 0 coincidencias con la Placa {plate}</div>"),
            );
        }

        Document::html(
            ENTRY,
            r#"<table id="ctl00_cplPrincipal_grdPapeletas">
                <tr><td>Placa</td><td>Papeleta</td><td>Fecha de Infracción</td><td>Falta</td><td>Importe</td><td>Estado</td></tr>
                <tr><td>ABC123</td><td>C0012345</td><td>05/01/2024</td><td>G-58</td><td>S/ 1,650.00</td><td>Pendiente</td></tr>
                <tr><td>ABC123</td><td>C0099871</td><td>21/07/2024</td><td>M-17</td><td>S/ 495.00</td><td>Pendiente</td></tr>
            </table>"#,
        )
    }
}

#[async_trait]
impl PortalPage for SimulatedPage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> registra_browser::Result<Document> {
        if url != ENTRY {
            return Err(BrowserError::NavigationError(format!("404 {url}")));
        }
        let document = self.search_page();
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn fetch_bytes(
        &mut self,
        url: &str,
        _timeout: Duration,
    ) -> registra_browser::Result<FetchedBytes> {
        let expected = format!("https://www.sat.gob.pe/VirtualSAT/Captcha.aspx?s={}", self.session);
        if url != expected {
            return Err(BrowserError::NavigationError(format!("404 {url}")));
        }
        Ok(FetchedBytes {
            bytes: format!("code{}", self.session).into_bytes(),
            content_type: Some("image/jpeg".to_string()),
        })
    }

    async fn submit_form(
        &mut self,
        form: &FormSubmission,
        _timeout: Duration,
    ) -> registra_browser::Result<Document> {
        assert_eq!(form.action, ENTRY);
        assert_eq!(form.field("ctl00$hdnTracking"), None);
        assert_eq!(form.field("ctl00$cplPrincipal$rbBusqueda"), Some("placa"));
        let document = self.respond(form);
        self.current = Some(document.clone());
        Ok(document)
    }

    async fn evaluate(
        &mut self,
        _script: &str,
        _timeout: Duration,
    ) -> registra_browser::Result<serde_json::Value> {
        Err(BrowserError::Unsupported("evaluate".to_string()))
    }

    async fn snapshot(&mut self, _timeout: Duration) -> registra_browser::Result<Document> {
        self.current.clone().ok_or(BrowserError::Closed)
    }

    async fn close(&mut self) -> registra_browser::Result<()> {
        self.portal.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reads the code straight from the image bytes, misreading the first
/// `misreads` images.
struct ReadingSolver {
    misreads: usize,
    solved: AtomicUsize,
    reported: Mutex<Vec<String>>,
}

impl ReadingSolver {
    fn new(misreads: usize) -> Self {
        Self {
            misreads,
            solved: AtomicUsize::new(0),
            reported: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CaptchaSolver for ReadingSolver {
    async fn solve(
        &self,
        artifact: &ChallengeArtifact,
        constraints: &SolveConstraints,
    ) -> registra_solver::Result<CaptchaSolution> {
        assert_eq!(constraints.max_length, Some(5));
        let ChallengeArtifact::Image { bytes, .. } = artifact else {
            return Err(SolverError::InvalidRequest("expected image".to_string()));
        };
        let n = self.solved.fetch_add(1, Ordering::SeqCst) + 1;
        let answer = if n <= self.misreads {
            "c0de1".to_string()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(CaptchaSolution {
            answer,
            solve_latency_ms: 8_000,
            job_id: JobId::new(format!("7201{n}")),
        })
    }

    async fn report_incorrect(&self, solution: &CaptchaSolution) -> registra_solver::Result<()> {
        self.reported
            .lock()
            .unwrap()
            .push(solution.job_id.as_str().to_string());
        Ok(())
    }
}

fn engine(portal: &SimulatedPortal, solver: &Arc<ReadingSolver>) -> QueryEngine {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../portal-definitions/infraction/sat-lima-papeletas.toml");
    let registry = PortalRegistry::new();
    registry
        .insert(PortalLoader::load_from_path(&path).expect("load SAT definition"))
        .expect("valid SAT definition");

    QueryEngine::new(
        Arc::new(registry),
        Arc::new(portal.clone()),
        Arc::clone(solver) as Arc<dyn CaptchaSolver>,
        EngineConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_tickets_found() {
    let portal = SimulatedPortal {
        plates_with_tickets: vec!["ABC123"],
        ..SimulatedPortal::default()
    };
    let solver = Arc::new(ReadingSolver::new(0));

    let result = engine(&portal, &solver)
        .query_target("sat-lima-papeletas", SearchMode::Plate, "abc-123")
        .await;

    assert_eq!(result.status, QueryStatus::Success, "{}", result.message);
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.records.len(), 2);

    let first = &result.records[0];
    assert_eq!(first.get("number"), Some("C0012345"));
    assert_eq!(first.get("date"), Some("2024-01-05"));
    assert_eq!(first.get("description"), Some("G-58"));
    assert_eq!(first.get("amount"), Some("1650.00"));
    assert_eq!(first.extra.get("Placa").map(String::as_str), Some("ABC123"));
    assert_eq!(portal.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_tickets() {
    let portal = SimulatedPortal::default();
    let solver = Arc::new(ReadingSolver::new(0));

    let result = engine(&portal, &solver)
        .query_target("sat-lima-papeletas", SearchMode::Plate, "XYZ987")
        .await;

    assert_eq!(result.status, QueryStatus::Empty);
    assert!(result.records.is_empty());
    assert_eq!(result.message, "Se encontraron 0 coincidencias con la Placa XYZ987");
}

#[tokio::test(start_paused = true)]
async fn test_misread_code_retried_in_new_session() {
    let portal = SimulatedPortal {
        plates_with_tickets: vec!["ABC123"],
        ..SimulatedPortal::default()
    };
    let solver = Arc::new(ReadingSolver::new(1));

    let result = engine(&portal, &solver)
        .query_target("sat-lima-papeletas", SearchMode::Plate, "ABC123")
        .await;

    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(result.attempts[0].error_kind, Some(ErrorKind::InvalidCaptcha));
    assert_eq!(portal.sessions.load(Ordering::SeqCst), 2);
    assert_eq!(portal.closed.load(Ordering::SeqCst), 2);
    assert_eq!(*solver.reported.lock().unwrap(), vec!["72011".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_misreads_exhaust_attempts() {
    let portal = SimulatedPortal::default();
    let solver = Arc::new(ReadingSolver::new(10));

    let result = engine(&portal, &solver)
        .query_target("sat-lima-papeletas", SearchMode::Plate, "ABC123")
        .await;

    assert_eq!(result.status, QueryStatus::Failed);
    assert_eq!(result.attempts_used, 3);
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidCaptcha));
    assert_eq!(portal.sessions.load(Ordering::SeqCst), 3);
}
