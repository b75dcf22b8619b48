use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::AppState;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged_entries: usize,
    pub evicted_visitors: usize,
}

/// Purges expired key-value entries and forgets visitors idle past `max_idle`.
pub fn run_maintenance(state: &AppState, max_idle: Duration) -> MaintenanceReport {
    let purged_entries = match state.kv.purge_expired() {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("Failed to purge expired entries: {}", e);
            0
        }
    };
    let evicted_visitors = state.evict_idle_visitors(max_idle);
    MaintenanceReport {
        purged_entries,
        evicted_visitors,
    }
}

pub async fn start_scheduler(state: Arc<AppState>) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    let maintenance = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let state = state.clone();
        Box::pin(async move {
            let run = tokio::task::spawn_blocking(move || run_maintenance(&state, crate::VISITOR_IDLE_TIMEOUT));
            match run.await {
                Ok(report) => tracing::info!(
                    "Maintenance: purged {} expired entries, evicted {} idle visitors",
                    report.purged_entries,
                    report.evicted_visitors
                ),
                Err(e) => tracing::error!("Maintenance run failed: {}", e),
            }
        })
    })?;
    sched.add(maintenance).await?;

    sched.start().await?;
    tracing::debug!("Maintenance scheduler started");
    Ok(sched)
}
