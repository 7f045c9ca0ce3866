//! Runtime policy parameters.
//!
//! Pipeline stages ask the [`ParamsService`] for a fresh [`PolicyParams`] at
//! the start of every ingestion and restoration cycle and never keep the
//! returned value beyond that cycle.

use std::sync::RwLock;

use crate::notifications::DEFAULT_RETENTION_WINDOW_SECS;

pub const DEFAULT_MAX_VISIBLE: usize = 49;
pub const DEFAULT_TTL_SECS: i64 = 259_200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyParams {
    /// Records older than this are never restored.
    pub retention_window_secs: i64,
    /// Maximum number of visible, uninteracted notifications.
    pub max_visible: usize,
    /// Whether expiration gates restoration.
    pub restore_ttl_filter: bool,
    pub receive_receipts_enabled: bool,
    /// Expiration applied to payloads that carry no `ttl`.
    pub default_ttl_secs: i64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            retention_window_secs: DEFAULT_RETENTION_WINDOW_SECS,
            max_visible: DEFAULT_MAX_VISIBLE,
            restore_ttl_filter: true,
            receive_receipts_enabled: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

pub trait ParamsService: Send + Sync {
    fn current(&self) -> PolicyParams;
}

/// Parameters fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticParams(pub PolicyParams);

impl ParamsService for StaticParams {
    fn current(&self) -> PolicyParams {
        self.0.clone()
    }
}

/// Parameters that can be replaced while the pipeline runs, e.g. after a
/// remote parameters fetch.
#[derive(Debug, Default)]
pub struct SharedParams {
    inner: RwLock<PolicyParams>,
}

impl SharedParams {
    pub fn new(params: PolicyParams) -> Self {
        Self {
            inner: RwLock::new(params),
        }
    }

    pub fn replace(&self, params: PolicyParams) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = params;
    }

    pub fn update(&self, f: impl FnOnce(&mut PolicyParams)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl ParamsService for SharedParams {
    fn current(&self) -> PolicyParams {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
