//! Generation pipeline: the ingestion state machine.
//!
//! ```text
//! Received -> Bundled -> LimitChecked -> Persisted -> DisplayRequested -> Done
//!     \__________\____________\______________\______________> Failed(reason)
//! ```
//!
//! Restored records enter at `Bundled`. Every run holds the lock of its id,
//! so a duplicate delivery, a restoration and an open of the same id never
//! interleave. Display is fire-and-forget: a run returns as soon as the
//! request is issued.

use std::sync::{Arc, PoisonError};

use tracing::{debug, error, warn};

use super::badge::BadgeUpdater;
use super::bundle::{BundleProcessor, BundledNotification, RawPayload};
use super::display::DisplayDispatcher;
use super::id_locks::IdLocks;
use super::limit::LimitManager;
use super::summary::SummaryManager;
use crate::clock::Clock;
use crate::metrics;
use crate::notifications::{NotificationError, NotificationRecord, NotificationStore, Result};
use crate::params::{ParamsService, PolicyParams};
use crate::reporting::ReceiptProcessor;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationState {
    Received,
    Bundled,
    LimitChecked,
    Persisted,
    DisplayRequested,
    Done,
    Failed(NotificationError),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted and handed to the display collaborator.
    Displayed,
    /// Persisted, then evicted right away by the visible limit.
    EvictedOnArrival,
    /// Restored record whose display was already requested by this process.
    AlreadyDisplayed,
    /// Restored record that was opened, dismissed or deleted meanwhile.
    Stale,
    /// Redelivery of a notification the user already interacted with.
    Duplicate,
    /// Not a notification.
    Ignored,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Displayed => "displayed",
            Disposition::EvictedOnArrival => "evicted_on_arrival",
            Disposition::AlreadyDisplayed => "already_displayed",
            Disposition::Stale => "stale",
            Disposition::Duplicate => "duplicate",
            Disposition::Ignored => "ignored",
            Disposition::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub id: Option<String>,
    /// Every state the run went through, ending in `Done` or `Failed`.
    pub trace: Vec<GenerationState>,
    pub disposition: Disposition,
    /// Ids evicted by this run's limit check.
    pub evicted: Vec<String>,
}

impl GenerationOutcome {
    pub fn state(&self) -> &GenerationState {
        self.trace.last().unwrap_or(&GenerationState::Received)
    }

    pub fn failure(&self) -> Option<&NotificationError> {
        match self.state() {
            GenerationState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn reached(&self, state: &GenerationState) -> bool {
        self.trace.contains(state)
    }
}

struct Run {
    id: Option<String>,
    trace: Vec<GenerationState>,
    evicted: Vec<String>,
}

impl Run {
    fn start(id: Option<String>, state: GenerationState) -> Self {
        Self {
            id,
            trace: vec![state],
            evicted: Vec::new(),
        }
    }

    fn advance(&mut self, state: GenerationState) {
        debug!("Notification {:?}: {:?}", self.id, state);
        self.trace.push(state);
    }

    fn finish(mut self, disposition: Disposition) -> GenerationOutcome {
        self.trace.push(GenerationState::Done);
        metrics::record_ingestion(disposition.as_str());
        GenerationOutcome {
            id: self.id,
            trace: self.trace,
            disposition,
            evicted: self.evicted,
        }
    }

    fn fail(mut self, err: NotificationError) -> GenerationOutcome {
        match &err {
            NotificationError::InvalidPayload(_) => warn!("Dropping payload: {}", err),
            NotificationError::StorageUnavailable(_) => {
                warn!("Notification {:?} not processed this cycle: {}", self.id, err)
            }
            _ => error!("Notification {:?} failed: {}", self.id, err),
        }
        metrics::record_ingestion(err.kind());
        self.trace.push(GenerationState::Failed(err));
        GenerationOutcome {
            id: self.id,
            trace: self.trace,
            disposition: Disposition::Failed,
            evicted: self.evicted,
        }
    }
}

pub struct GenerationPipeline {
    store: Arc<dyn NotificationStore>,
    bundler: BundleProcessor,
    limits: LimitManager,
    summaries: Arc<SummaryManager>,
    badge: Arc<BadgeUpdater>,
    display: Arc<DisplayDispatcher>,
    receipts: Option<Arc<ReceiptProcessor>>,
    params: Arc<dyn ParamsService>,
    locks: Arc<IdLocks>,
}

impl GenerationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        display: Arc<DisplayDispatcher>,
        summaries: Arc<SummaryManager>,
        badge: Arc<BadgeUpdater>,
        params: Arc<dyn ParamsService>,
        clock: Arc<dyn Clock>,
        locks: Arc<IdLocks>,
    ) -> Self {
        Self {
            bundler: BundleProcessor::new(store.clone(), clock),
            limits: LimitManager::new(store.clone(), display.clone()),
            store,
            summaries,
            badge,
            display,
            receipts: None,
            params,
            locks,
        }
    }

    /// Send a receive receipt for every newly stored notification.
    pub fn with_receipts(mut self, receipts: Arc<ReceiptProcessor>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    pub fn limits(&self) -> &LimitManager {
        &self.limits
    }

    /// Run an inbound payload through the whole pipeline.
    pub fn ingest(&self, payload: &RawPayload) -> GenerationOutcome {
        let mut run = Run::start(payload.id().map(str::to_string), GenerationState::Received);
        let params = self.params.current();

        let id_lock = payload.id().map(|id| self.locks.lock_for(id));
        let _guard = id_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let bundle = match self.bundler.process(payload, &params) {
            Ok(bundle) => bundle,
            Err(e) => return run.fail(e),
        };
        run.advance(GenerationState::Bundled);

        if bundle.ignored {
            return run.finish(Disposition::Ignored);
        }
        if !bundle.duplicates.is_empty() {
            return run.finish(Disposition::Duplicate);
        }
        let Some(single) = bundle.singles.into_iter().next() else {
            return run.finish(Disposition::Ignored);
        };

        let is_new = single.is_new();
        let record = match self.write_tentative(single) {
            Ok(record) => record,
            Err(e) => return run.fail(e),
        };
        if is_new {
            self.send_receipt(&record.id);
        }

        self.from_bundled(run, record, &params, bundle.summary_updates, false)
    }

    /// Re-run an already persisted record from `Bundled`.
    ///
    /// The record is re-read under its id lock; if it was opened, dismissed
    /// or deleted since it was queried, the run ends as `Stale`. A record
    /// whose display this process already requested is not displayed again.
    pub fn resubmit(&self, record: &NotificationRecord) -> GenerationOutcome {
        let run = Run::start(Some(record.id.clone()), GenerationState::Bundled);
        let params = self.params.current();

        let lock = self.locks.lock_for(&record.id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = match self.store.get(&record.id) {
            Ok(Some(current)) if current.is_visible() => current,
            Ok(_) => return run.finish(Disposition::Stale),
            Err(e) => return run.fail(e),
        };
        let groups = current.group_id.iter().cloned().collect();
        self.from_bundled(run, current, &params, groups, true)
    }

    fn write_tentative(&self, single: BundledNotification) -> Result<NotificationRecord> {
        if single.replaces.is_some() {
            return self.store.overwrite(&single.record);
        }
        match self.store.insert(&single.record) {
            Err(NotificationError::DuplicateId(id)) => {
                debug!("Notification {} stored concurrently, overwriting", id);
                self.store.overwrite(&single.record)
            }
            other => other,
        }
    }

    fn from_bundled(
        &self,
        mut run: Run,
        record: NotificationRecord,
        params: &PolicyParams,
        mut groups: Vec<String>,
        restored: bool,
    ) -> GenerationOutcome {
        let evicted = match self.limits.enforce_records(params.max_visible) {
            Ok(evicted) => evicted,
            Err(e) => return run.fail(e),
        };
        for victim in &evicted {
            if let Some(group) = &victim.group_id {
                groups.push(group.clone());
            }
        }
        run.evicted = evicted.into_iter().map(|victim| victim.id).collect();
        run.advance(GenerationState::LimitChecked);

        let persisted = match self.store.get(&record.id) {
            Ok(persisted) => persisted,
            Err(e) => return run.fail(e),
        };
        self.refresh_summaries(&groups, restored);

        let Some(persisted) = persisted else {
            self.refresh_badge();
            return run.finish(Disposition::EvictedOnArrival);
        };
        run.advance(GenerationState::Persisted);

        let requested = if restored {
            self.display.request_once(persisted)
        } else {
            self.display.request(persisted);
            true
        };
        self.refresh_badge();

        if !requested {
            return run.finish(Disposition::AlreadyDisplayed);
        }
        run.advance(GenerationState::DisplayRequested);
        run.finish(Disposition::Displayed)
    }

    fn send_receipt(&self, id: &str) {
        if let Some(receipts) = &self.receipts {
            // Failures are logged by the processor and never affect the run.
            let _ = receipts.report_received(id);
        }
    }

    fn refresh_summaries(&self, groups: &[String], restored: bool) {
        let mut seen: Vec<&str> = Vec::new();
        for group in groups {
            if seen.contains(&group.as_str()) {
                continue;
            }
            seen.push(group);
            let refreshed = if restored {
                self.summaries.refresh_restored(group)
            } else {
                self.summaries.refresh(group)
            };
            if let Err(e) = refreshed {
                warn!("Failed to refresh summary of group {}: {}", group, e);
            }
        }
    }

    fn refresh_badge(&self) {
        if let Err(e) = self.badge.refresh() {
            warn!("Failed to refresh badge count: {}", e);
        }
    }
}
