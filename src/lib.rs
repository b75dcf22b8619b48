use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use diesel::r2d2::{self, ConnectionManager};
use diesel::SqliteConnection;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::Level;

pub mod api {
    pub mod resend;
    pub mod smtp;
    pub mod supabase;
}
pub mod handlers {
    pub mod debug_handlers;
    pub mod lead_handlers;
    pub mod popup_handlers;
    pub mod visitor;
}
pub mod jobs {
    pub mod scheduler;
}
pub mod models {
    pub mod lead_models;
}
pub mod popup {
    pub mod orchestrator;
}
pub mod repositories {
    pub mod kv_store;
    pub mod lead_store;
    pub mod local_ledger;
    pub mod sqlite_kv;
    pub mod visit_marker;
}
pub mod utils {
    pub mod export;
    pub mod lead_email;
    pub mod notifier;
    pub mod validation;
}
pub mod config;
pub mod db;
pub mod schema;

use config::AppConfig;
use handlers::{debug_handlers, lead_handlers, popup_handlers};
use popup::orchestrator::PopupOrchestrator;
use repositories::kv_store::KeyValueStore;
use repositories::lead_store::RemoteStore;
use utils::notifier::Notifier;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub type SubmitLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// How long a visitor may go quiet before their session and popup are dropped.
pub const VISITOR_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub struct VisitorSlot {
    pub popup: Arc<PopupOrchestrator>,
    pub last_seen: Instant,
}

pub struct AppState {
    pub config: AppConfig,
    pub kv: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub notifier: Arc<dyn Notifier>,
    pub visitors: DashMap<String, VisitorSlot>,
    pub submit_limiter: DashMap<String, SubmitLimiter>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            kv,
            remote,
            notifier,
            visitors: DashMap::new(),
            submit_limiter: DashMap::new(),
        }
    }

    pub fn submit_quota(&self) -> Quota {
        Quota::per_minute(NonZeroU32::new(self.config.submit_rate_per_minute).unwrap_or(nonzero!(5u32)))
    }

    /// Drops popups for visitors idle longer than `max_idle`. Returns how many went.
    pub fn evict_idle_visitors(&self, max_idle: Duration) -> usize {
        let before = self.visitors.len();
        self.visitors.retain(|_, slot| slot.last_seen.elapsed() < max_idle);
        self.submit_limiter.retain(|visitor, _| self.visitors.contains_key(visitor));
        before.saturating_sub(self.visitors.len())
    }
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let origin = frontend_url
        .and_then(|url| url.parse::<HeaderValue>().ok())
        .unwrap_or_else(|| HeaderValue::from_static("http://localhost:8080"));
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH])
        .allow_credentials(true)
}

/// Builds the HTTP service around `state`.
pub fn app(state: Arc<AppState>) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(
            VISITOR_IDLE_TIMEOUT.as_secs() as i64,
        )));

    let mut router = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/popup", get(popup_handlers::get_popup))
        .route("/api/popup/ready", post(popup_handlers::page_ready))
        .route("/api/popup/section", post(popup_handlers::section_entered))
        .route("/api/popup/open", post(popup_handlers::open_popup))
        .route("/api/popup/close", post(popup_handlers::close_popup))
        .route("/api/leads", post(lead_handlers::submit_lead));

    if state.config.enable_debug_routes {
        tracing::warn!("Debug routes enabled, local ledgers are readable over HTTP");
        router = router
            .route("/api/debug/status", get(debug_handlers::status))
            .route("/api/debug/ledger", get(debug_handlers::export_ledger))
            .route("/api/debug/ledger/stats", get(debug_handlers::ledger_stats))
            .route("/api/debug/reset", post(debug_handlers::reset));
    }

    router
        .layer(session_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(state.config.frontend_url.as_deref()))
        .with_state(state)
}
