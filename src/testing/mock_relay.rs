//! In-memory bundle relay
//!
//! Records every submitted bundle and answers status lookups from a script.

use crate::error::{CoreError, Result};
use crate::execution::jito_client::{BundleRelay, RelayBundleStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct MockRelay {
    submitted: Mutex<Vec<Vec<String>>>,
    statuses: DashMap<String, RelayBundleStatus>,
    failures: Mutex<VecDeque<CoreError>>,
    next_id: AtomicU64,
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRelay {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            statuses: DashMap::new(),
            failures: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The next `count` submissions fail with `err`.
    pub fn fail_next(&self, count: usize, err: CoreError) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(err.clone());
        }
    }

    pub fn set_status(&self, bundle_id: &str, status: RelayBundleStatus) {
        self.statuses.insert(bundle_id.to_string(), status);
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn submitted(&self) -> Vec<Vec<String>> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl BundleRelay for MockRelay {
    fn name(&self) -> &str {
        "mock-relay"
    }

    async fn send_bundle(&self, encoded_transactions: &[String]) -> Result<String> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        self.submitted.lock().push(encoded_transactions.to_vec());
        let id = format!("bundle-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.statuses
            .entry(id.clone())
            .or_insert(RelayBundleStatus::Pending);
        Ok(id)
    }

    async fn bundle_status(&self, bundle_id: &str) -> Result<RelayBundleStatus> {
        Ok(self
            .statuses
            .get(bundle_id)
            .map(|s| s.value().clone())
            .unwrap_or(RelayBundleStatus::Invalid))
    }
}
