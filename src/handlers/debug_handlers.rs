use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::handlers::visitor::resolve;
use crate::models::lead_models::{ActionType, PersistedLead};
use crate::popup::orchestrator::PopupOrchestrator;
use crate::utils::export;
use crate::AppState;

#[derive(Deserialize, Default)]
pub struct LedgerQuery {
    format: Option<String>,
    action_type: Option<ActionType>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

fn internal(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": message})))
}

async fn ledger_entries(popup: &PopupOrchestrator) -> Result<Vec<PersistedLead>, (StatusCode, Json<Value>)> {
    let ledger = popup.ledger().clone();
    let read = tokio::task::spawn_blocking(move || ledger.entries())
        .await
        .map_err(|e| e.to_string())
        .and_then(|entries| entries.map_err(|e| e.to_string()));
    read.map_err(|e| {
        tracing::error!("Failed to read local ledger: {}", e);
        internal("Failed to read local ledger")
    })
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (visitor, popup) = resolve(&state, &session).await?;
    let entries = ledger_entries(&popup).await?;
    let ledger = popup.ledger().clone();
    let marker = popup.visit_marker().clone();
    let (latest, marker_set) = tokio::task::spawn_blocking(move || (ledger.latest(), marker.is_set()))
        .await
        .map_err(|e| {
            tracing::error!("Debug status read for {} failed: {}", visitor, e);
            internal("Failed to read visitor state")
        })?;
    let latest = latest.unwrap_or_else(|e| {
        tracing::warn!("Latest submission unreadable for {}: {}", visitor, e);
        None
    });

    Ok(Json(json!({
        "visitor": visitor,
        "marker_set": marker_set,
        "ledger_size": entries.len(),
        "latest": latest,
        "popup": popup.snapshot(),
    })))
}

pub async fn export_ledger(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<LedgerQuery>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let (_, popup) = resolve(&state, &session).await?;
    let mut entries = ledger_entries(&popup).await?;
    if let Some(action_type) = query.action_type {
        entries = export::filter_by_action_type(&entries, action_type);
    }
    if query.from.is_some() || query.to.is_some() {
        let from = query.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = query.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        entries = export::filter_by_date_range(&entries, from, to);
    }

    match query.format.as_deref().unwrap_or("json") {
        "csv" => Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"submissions.csv\""),
            ],
            export::to_csv(&entries),
        )
            .into_response()),
        "json" => {
            let body = export::to_json(&entries).map_err(|e| {
                tracing::error!("Failed to serialize ledger: {}", e);
                internal("Failed to export ledger")
            })?;
            Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
        }
        other => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Unsupported format: {}", other)})),
        )),
    }
}

pub async fn ledger_stats(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (_, popup) = resolve(&state, &session).await?;
    let entries = ledger_entries(&popup).await?;
    Ok(Json(json!({
        "stats": export::stats(&entries, Utc::now()),
        "most_requested_services": export::most_requested_services(&entries),
    })))
}

/// Forgets the visitor entirely: marker, ledger and popup state.
pub async fn reset(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (visitor, popup) = resolve(&state, &session).await?;
    let marker = popup.visit_marker().clone();
    let ledger = popup.ledger().clone();
    let cleared = tokio::task::spawn_blocking(move || {
        marker.clear();
        ledger.clear()
    })
    .await
    .map_err(|e| e.to_string())
    .and_then(|cleared| cleared.map_err(|e| e.to_string()));
    cleared.map_err(|e| {
        tracing::error!("Failed to clear local ledger for {}: {}", visitor, e);
        internal("Failed to clear local ledger")
    })?;
    state.visitors.remove(&visitor);
    tracing::info!("Reset popup state for visitor {}", visitor);
    Ok(Json(json!({"message": "Reset"})))
}
