use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use ruamail_common::{Report, ReportId};

use crate::{SpoolError, store::ReportStore};

#[derive(Debug, Default)]
struct Inner {
    reports: BTreeMap<ReportId, Report>,
    errors: HashMap<ReportId, Vec<String>>,
    handed_out: HashSet<ReportId>,
}

/// In-memory report store
///
/// Reports are kept in a `BTreeMap` protected by an `RwLock`, so they are
/// handed out in identifier order. Intended for tests and one-shot runs; the
/// queue is lost when the process exits.
///
/// # Capacity Management
/// The store can be configured with a maximum capacity. When capacity is
/// reached, [`ReportStore::enqueue`] fails with [`SpoolError::Internal`].
#[derive(Debug, Clone, Default)]
pub struct MemoryReportStore {
    inner: Arc<RwLock<Inner>>,
    /// Maximum number of reports to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryReportStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Get the current number of queued reports
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reports
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a report is still queued
    #[must_use]
    pub fn contains(&self, id: &ReportId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reports
            .contains_key(id)
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn enqueue(&self, report: Report) -> crate::Result<ReportId> {
        let mut inner = self.inner.write()?;

        if inner.reports.contains_key(&report.id) {
            return Err(SpoolError::AlreadyExists(report.id));
        }

        if let Some(cap) = self.capacity
            && inner.reports.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory spool capacity exceeded: {}/{cap} reports",
                inner.reports.len()
            )));
        }

        let id = report.id.clone();
        inner.reports.insert(id.clone(), report);

        Ok(id)
    }

    async fn next_pending(&self) -> crate::Result<Option<Report>> {
        let mut inner = self.inner.write()?;

        let next = inner
            .reports
            .iter()
            .find(|(id, _)| !inner.handed_out.contains(*id))
            .map(|(_, report)| report.clone());

        if let Some(report) = &next {
            inner.handed_out.insert(report.id.clone());
        }

        Ok(next)
    }

    async fn delete(&self, id: &ReportId) -> crate::Result<()> {
        let mut inner = self.inner.write()?;

        inner
            .reports
            .remove(id)
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;
        inner.errors.remove(id);

        Ok(())
    }

    async fn record_error(&self, id: &ReportId, message: &str) -> crate::Result<()> {
        let mut inner = self.inner.write()?;

        if !inner.reports.contains_key(id) {
            return Err(SpoolError::NotFound(id.clone()));
        }

        inner
            .errors
            .entry(id.clone())
            .or_default()
            .push(message.to_string());

        Ok(())
    }

    async fn recorded_errors(&self, id: &ReportId) -> crate::Result<Vec<String>> {
        Ok(self.inner.read()?.errors.get(id).cloned().unwrap_or_default())
    }

    async fn list(&self) -> crate::Result<Vec<ReportId>> {
        Ok(self.inner.read()?.reports.keys().cloned().collect())
    }
}
