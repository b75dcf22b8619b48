use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::models::lead_models::{LeadSubmission, PersistedLead, RawFormFields, RecordId};
use crate::repositories::lead_store::RemoteStore;
use crate::repositories::local_ledger::{local_record_id, LocalLedger};
use crate::repositories::visit_marker::VisitMarker;
use crate::utils::notifier::Notifier;
use crate::utils::validation::{validate, ValidationErrors};

/// Size of the render layer's palette of popup entrance animations.
pub const PRESENTATION_VARIANTS: usize = 8;

pub const DEFAULT_POPUP_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupState {
    Idle,
    Scheduled,
    Suppressed,
    Visible,
    Submitting,
    Closed,
}

/// What makes the popup appear on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Once, `delay` after the page reports ready.
    OnTimer { delay: Duration },
    /// On the first move from one page section to another.
    OnSectionChange,
}

#[derive(Debug, Clone)]
pub struct PopupConfig {
    pub trigger: TriggerPolicy,
    pub channel_timeout: Duration,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerPolicy::OnTimer {
                delay: DEFAULT_POPUP_DELAY,
            },
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
        }
    }
}

/// Signals from the render layer about the page the visitor is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Ready,
    SectionEntered(String),
}

/// Read-only view the render layer draws from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupView {
    pub state: PopupState,
    pub is_open: bool,
    pub presentation_variant: usize,
    pub show_floating_button: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub record: PersistedLead,
    pub stored_remotely: bool,
    pub notified: bool,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("Popup is not open")]
    NotOpen,
    #[error("A submission is already in progress")]
    InProgress,
    #[error("Submission pipeline aborted: {0}")]
    Aborted(String),
}

struct PopupInner {
    state: PopupState,
    variant: usize,
    floating_button: bool,
    timer_armed: bool,
    previous_section: Option<String>,
    section_changes: usize,
    /// Bumped on every page load; timers from an earlier page are ignored.
    page: u64,
}

impl PopupInner {
    fn loaded(suppressed: bool) -> Self {
        let mut inner = Self {
            state: PopupState::Idle,
            variant: 0,
            floating_button: false,
            timer_armed: false,
            previous_section: None,
            section_changes: 0,
            page: 0,
        };
        inner.start_page(suppressed);
        inner
    }

    fn start_page(&mut self, suppressed: bool) {
        self.page += 1;
        self.state = if suppressed {
            PopupState::Suppressed
        } else {
            PopupState::Idle
        };
        self.floating_button = suppressed;
        self.timer_armed = false;
        self.previous_section = None;
        self.section_changes = 0;
    }

    fn view(&self) -> PopupView {
        PopupView {
            state: self.state,
            is_open: matches!(self.state, PopupState::Visible | PopupState::Submitting),
            presentation_variant: self.variant,
            show_floating_button: self.floating_button,
        }
    }
}

/// Decides when the lead popup shows and runs the submission pipeline:
/// validate, then remote store and notifier side by side, then the local
/// ledger, then the visit marker.
///
/// The visit marker is set the first time the popup opens on its own and
/// again after every submission, so the automatic popup appears at most once
/// per marker lifetime. It is re-read on every page load, so the popup comes
/// back once the marker expires. `open` ignores the marker entirely.
///
/// Marker and ledger storage may hit the database, so those calls run on the
/// blocking pool like every other pool access.
pub struct PopupOrchestrator {
    config: PopupConfig,
    marker: VisitMarker,
    ledger: LocalLedger,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    visitor: String,
    inner: Mutex<PopupInner>,
    view: watch::Sender<PopupView>,
}

impl PopupOrchestrator {
    /// Builds the popup for one visitor, starting `Suppressed` when the visit
    /// marker is already set.
    pub async fn load(
        config: PopupConfig,
        marker: VisitMarker,
        ledger: LocalLedger,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
        visitor: &str,
    ) -> Arc<Self> {
        let suppressed = {
            let marker = marker.clone();
            tokio::task::spawn_blocking(move || marker.is_set())
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Visit marker read for {} failed: {}", visitor, e);
                    false
                })
        };
        if suppressed {
            tracing::debug!("Visitor {} already saw the popup, auto-show suppressed", visitor);
        }
        let inner = PopupInner::loaded(suppressed);
        let (view, _) = watch::channel(inner.view());

        Arc::new(Self {
            config,
            marker,
            ledger,
            remote,
            notifier,
            visitor: visitor.to_string(),
            inner: Mutex::new(inner),
            view,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PopupInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &PopupInner) {
        self.view.send_replace(inner.view());
    }

    async fn marker_is_set(&self) -> bool {
        let marker = self.marker.clone();
        match tokio::task::spawn_blocking(move || marker.is_set()).await {
            Ok(set) => set,
            Err(e) => {
                tracing::error!("Visit marker read for {} failed: {}", self.visitor, e);
                false
            }
        }
    }

    async fn mark_shown(&self) {
        let marker = self.marker.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || marker.set()).await {
            tracing::error!("Visit marker write for {} failed: {}", self.visitor, e);
        }
    }

    pub fn snapshot(&self) -> PopupView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PopupView> {
        self.view.subscribe()
    }

    pub fn state(&self) -> PopupState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.snapshot().is_open
    }

    pub fn presentation_variant(&self) -> usize {
        self.snapshot().presentation_variant
    }

    pub fn visit_marker(&self) -> &VisitMarker {
        &self.marker
    }

    pub fn ledger(&self) -> &LocalLedger {
        &self.ledger
    }

    /// Feeds page events from a channel until every sender is gone.
    pub async fn listen(self: Arc<Self>, mut events: mpsc::Receiver<PageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(self: &Arc<Self>, event: PageEvent) {
        match event {
            PageEvent::Ready => self.page_ready().await,
            PageEvent::SectionEntered(section) => self.section_entered(section).await,
        }
    }

    /// Every ready event is a fresh page. A popup that already finished on an
    /// earlier page starts over from the current marker.
    async fn page_ready(self: &Arc<Self>) {
        if matches!(self.state(), PopupState::Closed | PopupState::Suppressed) {
            let suppressed = self.marker_is_set().await;
            let mut inner = self.lock();
            if matches!(inner.state, PopupState::Closed | PopupState::Suppressed) {
                inner.start_page(suppressed);
                tracing::debug!(
                    "New page for {} (auto-show {})",
                    self.visitor,
                    if suppressed { "suppressed" } else { "allowed" }
                );
                self.publish(&inner);
            }
        }

        let delay = match self.config.trigger {
            TriggerPolicy::OnTimer { delay } => delay,
            TriggerPolicy::OnSectionChange => return,
        };

        let page = {
            let mut inner = self.lock();
            if inner.timer_armed {
                return;
            }
            inner.timer_armed = true;
            if inner.state != PopupState::Idle {
                return;
            }
            inner.state = PopupState::Scheduled;
            self.publish(&inner);
            inner.page
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.timer_fired(page).await;
            }
        });
    }

    fn still_waiting(&self, inner: &PopupInner, page: u64, waiting_in: PopupState) -> bool {
        if inner.page != page || inner.state != waiting_in {
            tracing::debug!(
                "Popup trigger for {} fired in state {:?}, skipping",
                self.visitor,
                inner.state
            );
            return false;
        }
        true
    }

    async fn timer_fired(&self, page: u64) {
        {
            let inner = self.lock();
            if !self.still_waiting(&inner, page, PopupState::Scheduled) {
                return;
            }
        }
        let marker_set = self.marker_is_set().await;
        {
            let mut inner = self.lock();
            if !self.still_waiting(&inner, page, PopupState::Scheduled) {
                return;
            }
            if marker_set {
                self.suppress(&mut inner);
                return;
            }
            self.show_automatically(&mut inner, 0);
        }
        self.mark_shown().await;
    }

    async fn section_entered(&self, section: String) {
        let (page, variant) = {
            let mut inner = self.lock();
            let changed = inner
                .previous_section
                .as_ref()
                .is_some_and(|previous| *previous != section);
            inner.previous_section = Some(section);
            if !changed {
                return;
            }
            inner.section_changes += 1;

            if self.config.trigger != TriggerPolicy::OnSectionChange || inner.state != PopupState::Idle {
                return;
            }
            (inner.page, (inner.section_changes - 1) % PRESENTATION_VARIANTS)
        };

        let marker_set = self.marker_is_set().await;
        {
            let mut inner = self.lock();
            if !self.still_waiting(&inner, page, PopupState::Idle) {
                return;
            }
            if marker_set {
                self.suppress(&mut inner);
                return;
            }
            self.show_automatically(&mut inner, variant);
        }
        self.mark_shown().await;
    }

    fn suppress(&self, inner: &mut PopupInner) {
        inner.state = PopupState::Suppressed;
        inner.floating_button = true;
        self.publish(inner);
    }

    /// Caller sets the visit marker once the lock is released.
    fn show_automatically(&self, inner: &mut PopupInner, variant: usize) {
        inner.state = PopupState::Visible;
        inner.variant = variant;
        inner.floating_button = true;
        tracing::info!("Showing lead popup to {} (variant {})", self.visitor, variant);
        self.publish(inner);
    }

    /// Manual open from the floating button or a call to action.
    pub fn open(&self) -> PopupView {
        let mut inner = self.lock();
        if !matches!(inner.state, PopupState::Visible | PopupState::Submitting) {
            inner.state = PopupState::Visible;
            inner.variant = rand::thread_rng().gen_range(0..PRESENTATION_VARIANTS);
            self.publish(&inner);
        }
        inner.view()
    }

    /// Dismiss without submitting. Does not touch the visit marker.
    pub fn close(&self) -> PopupView {
        let mut inner = self.lock();
        if inner.state == PopupState::Visible {
            inner.state = PopupState::Closed;
            inner.floating_button = true;
            self.publish(&inner);
        }
        inner.view()
    }

    /// Validates and, when the form is good, runs the whole pipeline. Channel
    /// failures never surface here; once validation passes the visitor gets a
    /// receipt. The pipeline keeps running even if the caller stops waiting.
    pub async fn submit(self: &Arc<Self>, fields: &RawFormFields) -> Result<SubmitReceipt, SubmitError> {
        let submission = validate(fields, Utc::now())?;
        self.submit_validated(submission).await
    }

    /// Pipeline for a form that already passed validation.
    pub async fn submit_validated(
        self: &Arc<Self>,
        submission: LeadSubmission,
    ) -> Result<SubmitReceipt, SubmitError> {
        {
            let mut inner = self.lock();
            match inner.state {
                PopupState::Visible => {
                    inner.state = PopupState::Submitting;
                    self.publish(&inner);
                }
                PopupState::Submitting => return Err(SubmitError::InProgress),
                _ => return Err(SubmitError::NotOpen),
            }
        }

        let this = Arc::clone(self);
        match tokio::spawn(async move { this.deliver(submission).await }).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                tracing::error!("Submission pipeline for {} aborted: {}", self.visitor, e);
                let mut inner = self.lock();
                inner.state = PopupState::Closed;
                self.publish(&inner);
                Err(SubmitError::Aborted(e.to_string()))
            }
        }
    }

    async fn deliver(&self, submission: LeadSubmission) -> SubmitReceipt {
        let timeout = self.config.channel_timeout;

        let store_task = {
            let remote = Arc::clone(&self.remote);
            let submission = submission.clone();
            tokio::spawn(async move { tokio::time::timeout(timeout, remote.insert(&submission)).await })
        };
        let notify_task = {
            let notifier = Arc::clone(&self.notifier);
            let submission = submission.clone();
            tokio::spawn(async move { tokio::time::timeout(timeout, notifier.send(&submission)).await })
        };
        let (stored, notified) = tokio::join!(store_task, notify_task);

        let remote_id: Option<RecordId> = match stored {
            Ok(Ok(Ok(id))) => {
                tracing::info!("Lead from {} stored remotely as {}", self.visitor, id);
                Some(id)
            }
            Ok(Ok(Err(e))) => {
                tracing::error!("Remote store failed for {} ({}): {}", self.visitor, e.kind(), e);
                None
            }
            Ok(Err(_)) => {
                tracing::warn!("Remote store timed out for {} after {:?}", self.visitor, timeout);
                None
            }
            Err(e) => {
                tracing::error!("Remote store task for {} failed: {}", self.visitor, e);
                None
            }
        };

        let notified = match notified {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                tracing::error!("Lead notification failed for {}: {}", self.visitor, e);
                false
            }
            Ok(Err(_)) => {
                tracing::warn!("Lead notification timed out for {} after {:?}", self.visitor, timeout);
                false
            }
            Err(e) => {
                tracing::error!("Lead notification task for {} failed: {}", self.visitor, e);
                false
            }
        };

        let stored_remotely = remote_id.is_some();
        let record = self.record_locally(submission, remote_id).await;

        {
            let mut inner = self.lock();
            inner.state = PopupState::Closed;
            inner.floating_button = true;
            self.publish(&inner);
        }

        SubmitReceipt {
            record,
            stored_remotely,
            notified,
        }
    }

    /// Ledger append, then the visit marker.
    async fn record_locally(&self, submission: LeadSubmission, remote_id: Option<RecordId>) -> PersistedLead {
        let ledger = self.ledger.clone();
        let marker = self.marker.clone();
        let pending = submission.clone();
        let fallback_id = remote_id.clone();
        let written = tokio::task::spawn_blocking(move || {
            let record = ledger.append(&pending, remote_id);
            marker.set();
            record
        })
        .await;

        match written {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Local ledger write for {} failed: {}", self.visitor, e);
                let now = Utc::now();
                PersistedLead {
                    id: fallback_id.unwrap_or_else(|| local_record_id(now)),
                    submission,
                    created_at: now,
                }
            }
        }
    }
}
