use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::lead_models::{LeadSubmission, RecordId};
use crate::repositories::lead_store::{RemoteStore, StoreError};

/// Inserts leads through Supabase's PostgREST endpoint with the public anon
/// key. Row-level security on the table decides whether anonymous inserts
/// are allowed; that policy lives in the Supabase project, not here.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    anon_key: String,
    table: String,
}

#[derive(Serialize)]
struct SubmissionBody<'a> {
    services: &'a [String],
    email: &'a str,
    whatsapp: &'a str,
    action_type: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct InsertedRow {
    id: Value,
}

#[derive(Deserialize, Default)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

impl SupabaseStore {
    pub fn new(client: Client, base_url: &str, anon_key: &str, table: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn insert(&self, submission: &LeadSubmission) -> Result<RecordId, StoreError> {
        let url = format!("{}/rest/v1/{}?select=id", self.base_url, self.table);
        let body = SubmissionBody {
            services: submission.services(),
            email: submission.email(),
            whatsapp: submission.whatsapp(),
            action_type: submission.action_type().as_str(),
            timestamp: submission.submitted_at().to_rfc3339(),
        };

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .header("Prefer", "return=representation")
            .json(&[body])
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &error_body));
        }

        let rows: Vec<InsertedRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Unknown(format!("Failed to parse insert response: {}", e)))?;

        match rows.into_iter().next().map(|row| row.id) {
            Some(Value::String(id)) => Ok(RecordId::new(id)),
            Some(Value::Number(id)) => Ok(RecordId::new(id.to_string())),
            _ => Err(StoreError::Unknown("Insert response carried no id".to_string())),
        }
    }
}

pub(crate) fn classify_failure(status: StatusCode, body: &str) -> StoreError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.as_deref().unwrap_or("");
    let detail = match parsed.message {
        Some(message) => format!("{} ({})", message, status),
        None => format!("{}: {}", status, body),
    };

    if code == "42501" || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StoreError::PermissionDenied(detail)
    } else if code == "42P01" || code == "PGRST205" || status == StatusCode::NOT_FOUND {
        StoreError::NotFound(detail)
    } else {
        StoreError::Unknown(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::lead_models::{ActionType, RawFormFields};
    use crate::utils::validation::validate;
    use axum::{extract::Query, http::HeaderMap, routing::post, Json, Router};
    use chrono::Utc;
    use std::collections::HashMap;

    fn lead() -> LeadSubmission {
        let raw = RawFormFields {
            services: vec!["Web Development".to_string()],
            email: "a@b.com".to_string(),
            whatsapp: "+919876543210".to_string(),
            action_type: Some(ActionType::Enquiry),
        };
        validate(&raw, Utc::now()).unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn failures_map_to_kinds() {
        let rls = r#"{"code":"42501","message":"new row violates row-level security policy"}"#;
        assert_eq!(classify_failure(StatusCode::UNAUTHORIZED, rls).kind(), "permission_denied");
        assert_eq!(classify_failure(StatusCode::FORBIDDEN, "").kind(), "permission_denied");

        let missing = r#"{"code":"PGRST205","message":"Could not find the table"}"#;
        assert_eq!(classify_failure(StatusCode::NOT_FOUND, missing).kind(), "not_found");
        assert_eq!(classify_failure(StatusCode::BAD_REQUEST, r#"{"code":"42P01"}"#).kind(), "not_found");

        assert_eq!(classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom").kind(), "unknown");
    }

    #[tokio::test]
    async fn posts_row_and_returns_generated_id() {
        let router = Router::new().route(
            "/rest/v1/form_submissions",
            post(
                |headers: HeaderMap, Query(query): Query<HashMap<String, String>>, Json(rows): Json<Vec<Value>>| async move {
                    assert_eq!(headers["apikey"], "anon");
                    assert_eq!(headers["authorization"], "Bearer anon");
                    assert_eq!(headers["prefer"], "return=representation");
                    assert_eq!(query.get("select").map(String::as_str), Some("id"));
                    assert_eq!(rows.len(), 1);
                    assert_eq!(rows[0]["action_type"], "enquiry");
                    assert_eq!(rows[0]["services"][0], "Web Development");
                    Json(serde_json::json!([{ "id": "2b7c1f0e" }]))
                },
            ),
        );
        let base = serve(router).await;
        let store = SupabaseStore::new(Client::new(), &format!("{}/", base), "anon", "form_submissions");

        let id = store.insert(&lead()).await.unwrap();
        assert_eq!(id.as_str(), "2b7c1f0e");
    }

    #[tokio::test]
    async fn numeric_ids_are_accepted() {
        let router = Router::new().route(
            "/rest/v1/leads",
            post(|| async { Json(serde_json::json!([{ "id": 17 }])) }),
        );
        let base = serve(router).await;
        let store = SupabaseStore::new(Client::new(), &base, "anon", "leads");
        assert_eq!(store.insert(&lead()).await.unwrap().as_str(), "17");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = SupabaseStore::new(Client::new(), &format!("http://{}", addr), "anon", "form_submissions");
        let err = store.insert(&lead()).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }
}
