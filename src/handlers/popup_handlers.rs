use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::handlers::visitor::resolve;
use crate::popup::orchestrator::PageEvent;
use crate::AppState;

#[derive(Deserialize)]
pub struct SectionRequest {
    section_id: String,
}

pub async fn get_popup(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (_, popup) = resolve(&state, &session).await?;
    Ok(Json(json!(popup.snapshot())))
}

pub async fn page_ready(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (_, popup) = resolve(&state, &session).await?;
    popup.handle_event(PageEvent::Ready).await;
    Ok(Json(json!(popup.snapshot())))
}

pub async fn section_entered(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(req): Json<SectionRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let section = req.section_id.trim();
    if section.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "section_id must not be empty"})),
        ));
    }
    let (_, popup) = resolve(&state, &session).await?;
    popup.handle_event(PageEvent::SectionEntered(section.to_string())).await;
    Ok(Json(json!(popup.snapshot())))
}

pub async fn open_popup(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (visitor, popup) = resolve(&state, &session).await?;
    let view = popup.open();
    tracing::debug!("Visitor {} opened the popup (variant {})", visitor, view.presentation_variant);
    Ok(Json(json!(view)))
}

pub async fn close_popup(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (_, popup) = resolve(&state, &session).await?;
    Ok(Json(json!(popup.close())))
}
