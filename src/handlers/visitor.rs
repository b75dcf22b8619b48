use std::sync::Arc;
use std::time::Instant;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use tower_sessions::Session;
use uuid::Uuid;

use crate::popup::orchestrator::PopupOrchestrator;
use crate::repositories::kv_store::{KeyValueStore, NamespacedStore};
use crate::repositories::local_ledger::LocalLedger;
use crate::repositories::visit_marker::VisitMarker;
use crate::{AppState, VisitorSlot};

const VISITOR_ID_KEY: &str = "visitor_id";

/// Returns the visitor id stored in the session, minting one on first contact.
pub async fn visitor_id(session: &Session) -> Result<String, (StatusCode, Json<Value>)> {
    let existing = session.get::<String>(VISITOR_ID_KEY).await.map_err(|e| {
        tracing::error!("Session store error loading visitor: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Session store error"})),
        )
    })?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    session.insert(VISITOR_ID_KEY, &id).await.map_err(|e| {
        tracing::error!("Session store error saving visitor: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Session store error"})),
        )
    })?;
    tracing::debug!("New visitor {}", id);
    Ok(id)
}

/// The visitor's slice of the shared key-value store.
pub fn visitor_store(state: &AppState, visitor: &str) -> Arc<dyn KeyValueStore> {
    Arc::new(NamespacedStore::new(state.kv.clone(), visitor))
}

/// Looks up the visitor's popup, building it on first use, and marks the
/// visitor as active.
pub async fn popup_for(state: &AppState, visitor: &str) -> Arc<PopupOrchestrator> {
    if let Some(mut slot) = state.visitors.get_mut(visitor) {
        slot.last_seen = Instant::now();
        return slot.popup.clone();
    }

    let store = visitor_store(state, visitor);
    let popup = PopupOrchestrator::load(
        state.config.popup.clone(),
        VisitMarker::new(store.clone(), state.config.visit_marker_ttl),
        LocalLedger::new(store),
        state.remote.clone(),
        state.notifier.clone(),
        visitor,
    )
    .await;
    // Another request may have raced us here; the first one in wins.
    let slot = state
        .visitors
        .entry(visitor.to_string())
        .or_insert_with(|| VisitorSlot {
            popup,
            last_seen: Instant::now(),
        });
    slot.popup.clone()
}

/// Session lookup plus popup lookup, the common prologue of every popup route.
pub async fn resolve(
    state: &AppState,
    session: &Session,
) -> Result<(String, Arc<PopupOrchestrator>), (StatusCode, Json<Value>)> {
    let visitor = visitor_id(session).await?;
    let popup = popup_for(state, &visitor).await;
    Ok((visitor, popup))
}
