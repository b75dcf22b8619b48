use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use governor::RateLimiter;
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::handlers::visitor::resolve;
use crate::models::lead_models::RawFormFields;
use crate::popup::orchestrator::{PopupState, SubmitError};
use crate::utils::validation::{validate, ValidationErrors};
use crate::AppState;

fn rejected(visitor: &str, errors: ValidationErrors) -> (StatusCode, Json<Value>) {
    tracing::debug!("Rejected form from {}: {} invalid field(s)", visitor, errors.len());
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"errors": errors.messages()})),
    )
}

pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(fields): Json<RawFormFields>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (visitor, popup) = resolve(&state, &session).await?;

    let submission = match validate(&fields, Utc::now()) {
        Ok(submission) => submission,
        Err(errors) => return Err(rejected(&visitor, errors)),
    };

    // Only submissions that can reach the channels spend quota.
    if popup.state() == PopupState::Visible {
        let entry = state
            .submit_limiter
            .entry(visitor.clone())
            .or_insert_with(|| RateLimiter::keyed(state.submit_quota()));
        if entry.value().check_key(&visitor).is_err() {
            tracing::warn!("Submit rate limit exceeded for visitor {}", visitor);
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "Too many submissions, try again later"})),
            ));
        }
    }

    match popup.submit_validated(submission).await {
        Ok(receipt) => {
            tracing::info!(
                "Lead {} accepted from {} (stored remotely: {}, notified: {})",
                receipt.record.id,
                visitor,
                receipt.stored_remotely,
                receipt.notified
            );
            Ok(Json(json!({
                "message": "Thank You",
                "id": receipt.record.id,
                "stored_remotely": receipt.stored_remotely,
                "notified": receipt.notified,
            })))
        }
        Err(SubmitError::Invalid(errors)) => Err(rejected(&visitor, errors)),
        Err(e @ (SubmitError::NotOpen | SubmitError::InProgress)) => {
            Err((StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))))
        }
        Err(e @ SubmitError::Aborted(_)) => {
            tracing::error!("Submission from {} aborted: {}", visitor, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Submission failed"})),
            ))
        }
    }
}
