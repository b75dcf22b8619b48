use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::lead_models::{LeadRow, LeadSubmission, RecordId},
    schema::form_submissions,
    DbPool,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Write rejected by access policy: {0}")]
    PermissionDenied(String),
    #[error("Target table not found: {0}")]
    NotFound(String),
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),
    #[error("Remote store error: {0}")]
    Unknown(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::PermissionDenied(_) => "permission_denied",
            StoreError::NotFound(_) => "not_found",
            StoreError::Unreachable(_) => "unreachable",
            StoreError::Unknown(_) => "unknown",
        }
    }
}

/// Where captured leads are meant to end up. One call, one row, no retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(&self, submission: &LeadSubmission) -> Result<RecordId, StoreError>;
}

/// Keeps leads in the service's own `form_submissions` table.
pub struct SqliteLeadStore {
    pool: DbPool,
}

impl SqliteLeadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        form_submissions::table
            .count()
            .get_result(&mut conn)
            .map_err(classify_diesel_error)
    }
}

#[async_trait]
impl RemoteStore for SqliteLeadStore {
    async fn insert(&self, submission: &LeadSubmission) -> Result<RecordId, StoreError> {
        let pool = self.pool.clone();
        let submission = submission.clone();
        tokio::task::spawn_blocking(move || insert_row(&pool, &submission))
            .await
            .map_err(|e| StoreError::Unknown(format!("insert task failed: {}", e)))?
    }
}

fn insert_row(pool: &DbPool, submission: &LeadSubmission) -> Result<RecordId, StoreError> {
    let mut conn = pool
        .get()
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;

    let id = Uuid::new_v4().to_string();
    let row = LeadRow::from_submission(&id, submission, Utc::now())
        .map_err(|e| StoreError::Unknown(e.to_string()))?;

    diesel::insert_into(form_submissions::table)
        .values(&row)
        .execute(&mut conn)
        .map_err(classify_diesel_error)?;

    Ok(RecordId::new(id))
}

fn classify_diesel_error(e: DieselError) -> StoreError {
    match &e {
        DieselError::DatabaseError(_, info) if info.message().contains("no such table") => {
            StoreError::NotFound(info.message().to_string())
        }
        DieselError::DatabaseError(_, info)
            if info.message().contains("readonly") || info.message().contains("not authorized") =>
        {
            StoreError::PermissionDenied(info.message().to_string())
        }
        _ => StoreError::Unknown(e.to_string()),
    }
}
