use std::sync::Arc;
use std::time::Duration;

use crate::repositories::kv_store::KeyValueStore;

pub const VISIT_MARKER_KEY: &str = "yip_popup_shown";
pub const DEFAULT_VISIT_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// "Popup already shown" flag. Once set it stays set until it expires or is
/// cleared; setting it again does not refresh the expiry.
#[derive(Clone)]
pub struct VisitMarker {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl VisitMarker {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Unreadable storage counts as "not set".
    pub fn is_set(&self) -> bool {
        match self.store.get(VISIT_MARKER_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!("Failed to read visit marker: {}", e);
                false
            }
        }
    }

    pub fn set(&self) {
        if self.is_set() {
            return;
        }
        if let Err(e) = self.store.set(VISIT_MARKER_KEY, "true", Some(self.ttl)) {
            tracing::error!("Failed to set visit marker: {}", e);
        }
    }

    /// Debug affordance: re-enables the automatic popup.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(VISIT_MARKER_KEY) {
            tracing::error!("Failed to clear visit marker: {}", e);
        }
    }
}
