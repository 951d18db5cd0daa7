//! Run-once markers kept by the reference runner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::Label;

/// Where a runner remembers which run-once units already succeeded.
#[async_trait]
pub trait RunOnceStore: Send + Sync {
    /// Returns true if the unit succeeded in an earlier pass.
    async fn is_done(&self, label: &Label) -> bool;

    /// Marks the unit as done.
    async fn mark_done(&self, label: &Label);

    /// Forgets the unit, so it runs again.
    async fn forget(&self, label: &Label);
}

/// In-memory run-once store.
///
/// Clones share the same markers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunOnceStore {
    done: Arc<Mutex<BTreeSet<Label>>>,
}

impl InMemoryRunOnceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.done.lock().len()
    }

    /// Returns true if no unit is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.done.lock().is_empty()
    }
}

#[async_trait]
impl RunOnceStore for InMemoryRunOnceStore {
    async fn is_done(&self, label: &Label) -> bool {
        self.done.lock().contains(label)
    }

    async fn mark_done(&self, label: &Label) {
        self.done.lock().insert(label.clone());
    }

    async fn forget(&self, label: &Label) {
        self.done.lock().remove(label);
    }
}
