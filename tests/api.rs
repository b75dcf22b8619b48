use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use leadcapture::config::AppConfig;
use leadcapture::db::in_memory_pool;
use leadcapture::models::lead_models::{LeadSubmission, RecordId};
use leadcapture::popup::orchestrator::TriggerPolicy;
use leadcapture::repositories::lead_store::{RemoteStore, SqliteLeadStore, StoreError};
use leadcapture::repositories::sqlite_kv::SqliteKvStore;
use leadcapture::utils::lead_email::LeadEmailTemplate;
use leadcapture::utils::notifier::LogNotifier;
use leadcapture::{app, AppState};

struct Harness {
    state: Arc<AppState>,
    router: Router,
    leads: SqliteLeadStore,
}

fn harness_with(config: AppConfig, remote: Option<Arc<dyn RemoteStore>>) -> Harness {
    let pool = in_memory_pool().unwrap();
    let leads = SqliteLeadStore::new(pool.clone());
    let remote: Arc<dyn RemoteStore> = match remote {
        Some(remote) => remote,
        None => Arc::new(SqliteLeadStore::new(pool.clone())),
    };
    let notifier = Arc::new(LogNotifier::new(
        LeadEmailTemplate::new("YourIndiaPartner", chrono_tz::Tz::UTC),
        "sales@example.com",
    ));
    let state = Arc::new(AppState::new(
        config,
        Arc::new(SqliteKvStore::new(pool)),
        remote,
        notifier,
    ));
    Harness {
        router: app(state.clone()),
        state,
        leads,
    }
}

fn harness() -> Harness {
    harness_with(
        AppConfig {
            enable_debug_routes: true,
            ..AppConfig::default()
        },
        None,
    )
}

/// One browser: remembers the session cookie between requests.
struct Visitor {
    router: Router,
    cookie: Option<String>,
}

impl Visitor {
    fn new(harness: &Harness) -> Self {
        Self {
            router: harness.router.clone(),
            cookie: None,
        }
    }

    async fn send(&mut self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn json(&mut self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, text) = self.send(method, uri, body).await;
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

fn lead_form(email: &str) -> Value {
    json!({
        "services": ["IT Infrastructure", "Accounting & Tax"],
        "email": email,
        "whatsapp": "+91 98765-43210",
        "actionType": "immediate",
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();
    let (status, body) = Visitor::new(&h).json(Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn valid_submission_thanks_visitor_and_stores_everywhere() {
    let h = harness();
    let mut visitor = Visitor::new(&h);

    let (_, popup) = visitor.json(Method::GET, "/api/popup", None).await;
    assert_eq!(popup["state"], "idle");
    assert_eq!(popup["is_open"], false);

    let (_, opened) = visitor.json(Method::POST, "/api/popup/open", None).await;
    assert_eq!(opened["is_open"], true);

    let (status, body) = visitor
        .json(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Thank You");
    assert_eq!(body["stored_remotely"], true);
    assert!(!body["id"].as_str().unwrap().starts_with("local_"));

    assert_eq!(h.leads.count().unwrap(), 1);
    let (_, popup) = visitor.json(Method::GET, "/api/popup", None).await;
    assert_eq!(popup["state"], "closed");
    assert_eq!(popup["show_floating_button"], true);

    let (_, status) = visitor.json(Method::GET, "/api/debug/status", None).await;
    assert_eq!(status["marker_set"], true);
    assert_eq!(status["ledger_size"], 1);
    assert_eq!(status["latest"]["email"], "lead@example.com");
    assert_eq!(status["latest"]["whatsapp"], "+91 98765-43210");
}

#[tokio::test]
async fn invalid_fields_come_back_per_field() {
    let h = harness();
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;

    let (status, body) = visitor
        .json(
            Method::POST,
            "/api/leads",
            Some(json!({"services": [], "email": "nope", "whatsapp": "123"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["services"], "Please select at least one service");
    assert_eq!(body["errors"]["email"], "Please enter a valid email");
    assert_eq!(
        body["errors"]["whatsapp"],
        "Please enter a valid WhatsApp number (10-15 digits)"
    );
    assert_eq!(h.leads.count().unwrap(), 0);

    let (_, popup) = visitor.json(Method::GET, "/api/popup", None).await;
    assert_eq!(popup["is_open"], true);
}

#[tokio::test]
async fn submit_without_open_popup_conflicts() {
    let h = harness();
    let (status, _) = Visitor::new(&h)
        .json(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(h.leads.count().unwrap(), 0);
}

struct FailingStore;

#[async_trait]
impl RemoteStore for FailingStore {
    async fn insert(&self, _submission: &LeadSubmission) -> Result<RecordId, StoreError> {
        Err(StoreError::PermissionDenied("new row violates row-level security policy".to_string()))
    }
}

#[tokio::test]
async fn remote_failure_still_thanks_visitor_with_local_id() {
    let h = harness_with(
        AppConfig {
            enable_debug_routes: true,
            ..AppConfig::default()
        },
        Some(Arc::new(FailingStore) as Arc<dyn RemoteStore>),
    );
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;

    let (status, body) = visitor
        .json(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Thank You");
    assert_eq!(body["stored_remotely"], false);
    assert!(body["id"].as_str().unwrap().starts_with("local_"));

    let (_, ledger) = visitor.json(Method::GET, "/api/debug/ledger", None).await;
    assert_eq!(ledger.as_array().unwrap().len(), 1);
    assert_eq!(ledger[0]["id"], body["id"]);
}

#[tokio::test]
async fn marker_suppresses_auto_popup_for_returning_visitor() {
    let h = harness();
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;
    visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;

    // Drop the in-memory popup; only the stored marker survives.
    h.state.visitors.clear();

    let (_, popup) = visitor.json(Method::POST, "/api/popup/ready", None).await;
    assert_eq!(popup["state"], "suppressed");
    assert_eq!(popup["show_floating_button"], true);

    let (_, opened) = visitor.json(Method::POST, "/api/popup/open", None).await;
    assert_eq!(opened["state"], "visible");
}

#[tokio::test]
async fn next_page_load_follows_the_marker() {
    let h = harness();
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;
    visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;

    let (_, popup) = visitor.json(Method::POST, "/api/popup/ready", None).await;
    assert_eq!(popup["state"], "suppressed");
}

#[tokio::test]
async fn expired_marker_lets_the_popup_return() {
    let h = harness_with(
        AppConfig {
            visit_marker_ttl: Duration::ZERO,
            ..AppConfig::default()
        },
        None,
    );
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;
    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, popup) = visitor.json(Method::POST, "/api/popup/ready", None).await;
    assert_eq!(popup["state"], "scheduled");
}

#[tokio::test]
async fn visitors_do_not_share_markers() {
    let h = harness();
    let mut first = Visitor::new(&h);
    first.send(Method::POST, "/api/popup/open", None).await;
    first
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;

    let mut second = Visitor::new(&h);
    let (_, popup) = second.json(Method::POST, "/api/popup/ready", None).await;
    assert_eq!(popup["state"], "scheduled");
}

#[tokio::test]
async fn section_changes_trigger_popup() {
    let h = harness_with(
        AppConfig {
            popup: leadcapture::popup::orchestrator::PopupConfig {
                trigger: TriggerPolicy::OnSectionChange,
                ..Default::default()
            },
            ..AppConfig::default()
        },
        None,
    );
    let mut visitor = Visitor::new(&h);

    let (_, popup) = visitor
        .json(Method::POST, "/api/popup/section", Some(json!({"section_id": "hero"})))
        .await;
    assert_eq!(popup["is_open"], false);

    let (_, popup) = visitor
        .json(Method::POST, "/api/popup/section", Some(json!({"section_id": "services"})))
        .await;
    assert_eq!(popup["is_open"], true);
    assert_eq!(popup["presentation_variant"], 0);

    let (status, _) = visitor
        .json(Method::POST, "/api/popup/section", Some(json!({"section_id": "  "})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submissions_are_rate_limited_per_visitor() {
    let h = harness_with(
        AppConfig {
            submit_rate_per_minute: 1,
            ..AppConfig::default()
        },
        None,
    );
    let mut visitor = Visitor::new(&h);

    visitor.send(Method::POST, "/api/popup/open", None).await;
    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::OK);

    visitor.send(Method::POST, "/api/popup/open", None).await;
    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(h.leads.count().unwrap(), 1);

    let (status, _) = Visitor::new(&h)
        .send(Method::POST, "/api/popup/open", None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn corrected_form_is_not_rate_limited() {
    let h = harness_with(
        AppConfig {
            submit_rate_per_minute: 1,
            ..AppConfig::default()
        },
        None,
    );
    let mut visitor = Visitor::new(&h);
    visitor.send(Method::POST, "/api/popup/open", None).await;

    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = visitor
        .json(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Thank You");
    assert_eq!(h.leads.count().unwrap(), 1);
}

#[tokio::test]
async fn rejected_submit_on_closed_popup_keeps_quota() {
    let h = harness_with(
        AppConfig {
            submit_rate_per_minute: 1,
            ..AppConfig::default()
        },
        None,
    );
    let mut visitor = Visitor::new(&h);

    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    visitor.send(Method::POST, "/api/popup/open", None).await;
    let (status, _) = visitor
        .send(Method::POST, "/api/leads", Some(lead_form("lead@example.com")))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn debug_routes_are_off_by_default() {
    let h = harness_with(AppConfig::default(), None);
    let (status, _) = Visitor::new(&h)
        .send(Method::GET, "/api/debug/status", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ledger_exports_csv_stats_and_resets() {
    let h = harness();
    let mut visitor = Visitor::new(&h);
    for email in ["one@example.com", "two@example.com"] {
        visitor.send(Method::POST, "/api/popup/open", None).await;
        let (status, _) = visitor
            .send(Method::POST, "/api/leads", Some(lead_form(email)))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, csv) = visitor
        .send(Method::GET, "/api/debug/ledger?format=csv", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "ID,Date,Time,Action Type,Email,WhatsApp,Services");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(r#""IT Infrastructure; Accounting & Tax""#));

    let (_, stats) = visitor.json(Method::GET, "/api/debug/ledger/stats", None).await;
    assert_eq!(stats["stats"]["total"], 2);
    assert_eq!(stats["stats"]["immediate"], 2);
    assert_eq!(stats["stats"]["today"], 2);
    assert_eq!(stats["most_requested_services"][0]["service"], "Accounting & Tax");
    assert_eq!(stats["most_requested_services"][0]["count"], 2);

    let (status, _) = visitor
        .send(Method::GET, "/api/debug/ledger?format=xml", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    visitor.send(Method::POST, "/api/debug/reset", None).await;
    let (_, status) = visitor.json(Method::GET, "/api/debug/status", None).await;
    assert_eq!(status["marker_set"], false);
    assert_eq!(status["ledger_size"], 0);
    assert_eq!(status["popup"]["state"], "idle");
}
