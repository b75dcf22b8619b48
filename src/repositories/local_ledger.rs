use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::lead_models::{LeadSubmission, PersistedLead, RecordId};
use crate::repositories::kv_store::{KeyValueStore, StorageError};

pub const LEDGER_KEY: &str = "yip_pending_submissions";
pub const LATEST_SUBMISSION_KEY: &str = "yip_form_submission";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `local_<unix millis>_<9 base36 chars>`
pub fn local_record_id(now: DateTime<Utc>) -> RecordId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    RecordId::new(format!("local_{}_{}", now.timestamp_millis(), suffix))
}

/// Append-only backup of every lead this visitor submitted, written no matter
/// what the remote channels did.
#[derive(Clone)]
pub struct LocalLedger {
    store: Arc<dyn KeyValueStore>,
}

impl LocalLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Records the lead under `remote_id`, or under a fresh local id when the
    /// remote store gave us none. Storage failures are logged, never returned:
    /// there is nothing left to fall back to.
    pub fn append(&self, submission: &LeadSubmission, remote_id: Option<RecordId>) -> PersistedLead {
        let now = Utc::now();
        let record = PersistedLead {
            id: remote_id.unwrap_or_else(|| local_record_id(now)),
            submission: submission.clone(),
            created_at: now,
        };

        match self.entries() {
            Ok(mut entries) => {
                entries.push(record.clone());
                if let Err(e) = self.write_json(LEDGER_KEY, &entries) {
                    tracing::error!("Failed to append lead {} to local ledger: {}", record.id, e);
                }
            }
            // Leave unreadable history in place rather than overwrite it.
            Err(e) => tracing::error!("Local ledger unreadable, lead {} not appended: {}", record.id, e),
        }

        if let Err(e) = self.write_json(LATEST_SUBMISSION_KEY, &record) {
            tracing::error!("Failed to store latest submission {}: {}", record.id, e);
        }

        tracing::info!("Lead {} stored in local ledger", record.id);
        record
    }

    pub fn entries(&self) -> Result<Vec<PersistedLead>, StorageError> {
        match self.store.get(LEDGER_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn latest(&self) -> Result<Option<PersistedLead>, StorageError> {
        match self.store.get(LATEST_SUBMISSION_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(LEDGER_KEY)?;
        self.store.remove(LATEST_SUBMISSION_KEY)?;
        Ok(())
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, None)
    }
}
