//! Group summaries.
//!
//! Every group with at least one visible member has a summary record holding
//! the member count. The summary is shown once the group has two or more
//! members and withdrawn when the last member goes away.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::display::DisplayDispatcher;
use crate::clock::Clock;
use crate::notifications::{
    summary_id, Clause, NotificationError, NotificationRecord, NotificationStore, Predicate,
    Result,
};

/// Minimum number of members before a group summary is shown.
pub const MIN_GROUP_SIZE_FOR_SUMMARY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryChange {
    /// The summary is stored and shown with this member count.
    Displayed(usize),
    /// The summary is stored but the group is too small to show it.
    Held(usize),
    /// The group has no members left; the summary is gone.
    Withdrawn,
}

pub struct SummaryManager {
    store: Arc<dyn NotificationStore>,
    display: Arc<DisplayDispatcher>,
    clock: Arc<dyn Clock>,
}

impl SummaryManager {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        display: Arc<DisplayDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            display,
            clock,
        }
    }

    /// Recompute the summary of `group` from the stored members.
    pub fn refresh(&self, group: &str) -> Result<SummaryChange> {
        self.refresh_inner(group, false)
    }

    /// Like [`refresh`](Self::refresh), but a summary already shown during
    /// this process lifetime is not shown again.
    pub fn refresh_restored(&self, group: &str) -> Result<SummaryChange> {
        self.refresh_inner(group, true)
    }

    fn refresh_inner(&self, group: &str, restored: bool) -> Result<SummaryChange> {
        let members = self.store.count(
            &Predicate::uninteracted().and(Clause::GroupId(group.to_string())),
        )?;
        let id = summary_id(group);

        if members == 0 {
            self.display.cancel(&id);
            match self.store.delete(&id) {
                Ok(()) | Err(NotificationError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            debug!("Withdrew summary of group {}", group);
            return Ok(SummaryChange::Withdrawn);
        }

        let summary = NotificationRecord::summary_for(group, self.clock.now())
            .with_property("count", json!(members))
            .with_property("title", json!(format!("{} new notifications", members)));
        let stored = match self.store.get(&id)? {
            Some(_) => self.store.overwrite(&summary)?,
            None => self.store.insert(&summary)?,
        };

        if members >= MIN_GROUP_SIZE_FOR_SUMMARY {
            if restored {
                self.display.request_once(stored);
            } else {
                self.display.request(stored);
            }
            debug!("Summary of group {} shows {} members", group, members);
            Ok(SummaryChange::Displayed(members))
        } else {
            self.display.cancel(&id);
            Ok(SummaryChange::Held(members))
        }
    }

    /// Refresh several groups, skipping duplicates.
    pub fn refresh_all<'a>(
        &self,
        groups: impl IntoIterator<Item = &'a str>,
    ) -> Vec<(String, Result<SummaryChange>)> {
        let mut seen: Vec<&str> = Vec::new();
        let mut results = Vec::new();
        for group in groups {
            if seen.contains(&group) {
                continue;
            }
            seen.push(group);
            results.push((group.to_string(), self.refresh(group)));
        }
        results
    }
}
