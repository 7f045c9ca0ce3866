//! Notification generation: from an inbound payload to a displayed record.

mod badge;
mod bundle;
mod display;
mod generation;
mod id_locks;
mod limit;
mod restoration;
mod summary;
mod worker;

pub use badge::BadgeUpdater;
pub use bundle::{
    BundleProcessor, BundleResult, BundledNotification, RawPayload, HIGH_PRIORITY_THRESHOLD,
    RESERVED_ID_PREFIX, TOKEN_REFRESH_SENDER,
};
pub use display::{DisplayDispatcher, NotificationDisplayer};
pub use generation::{Disposition, GenerationOutcome, GenerationPipeline, GenerationState};
pub use id_locks::IdLocks;
pub use limit::LimitManager;
pub use restoration::{RestorationWorkflow, RestoreReport};
pub use summary::{SummaryChange, SummaryManager, MIN_GROUP_SIZE_FOR_SUMMARY};
pub use worker::{GenerationWorker, PayloadSender};
