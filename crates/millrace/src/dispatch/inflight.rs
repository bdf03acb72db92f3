//! Live records of in-flight requests.
//!
//! The dispatcher inserts a [`ProcessingRequestInfo`] when it assigns a
//! request to a worker and removes it when the worker reports a terminal
//! outcome. The map is the engine's introspection surface: operators can
//! snapshot it or scan it for stuck requests. Its size is bounded by the
//! capacity semaphore, since entries are only created while holding a pool
//! permit, so the count can never exceed the pool size.

use crate::request::RequestTags;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// One in-flight request: identity, tenancy labels, and when processing
/// started.
#[derive(Clone, Debug)]
pub struct ProcessingRequestInfo {
    pub request_id: u64,
    pub tags: RequestTags,
    pub started_at: Instant,
}

/// Point-in-time view of the in-flight map.
pub type InflightSnapshot = Vec<ProcessingRequestInfo>;

/// Mutex-protected map of request id to in-flight record.
///
/// A duplicate insert or a remove of an unknown id means the concurrency
/// accounting is corrupt; both panic rather than continue.
#[derive(Debug, Default)]
pub(crate) struct InflightMap {
    entries: Mutex<HashMap<u64, ProcessingRequestInfo>>,
}

impl InflightMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a newly assigned request.
    ///
    /// # Panics
    ///
    /// Panics if the request id is already in flight: the same request must
    /// never be assigned to two workers concurrently.
    pub(crate) fn insert(&self, info: ProcessingRequestInfo) {
        let request_id = info.request_id;
        let previous = self.entries.lock().insert(request_id, info);
        assert!(
            previous.is_none(),
            "request {request_id} assigned while already in flight"
        );
    }

    /// Removes a completed request and returns its record.
    ///
    /// # Panics
    ///
    /// Panics if the id is unknown: a completion without an assignment means
    /// the accounting is corrupt.
    pub(crate) fn remove(&self, request_id: u64) -> ProcessingRequestInfo {
        self.entries
            .lock()
            .remove(&request_id)
            .unwrap_or_else(|| panic!("request {request_id} completed but was not in flight"))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn snapshot(&self) -> InflightSnapshot {
        self.entries.lock().values().cloned().collect()
    }

    /// Entries that have been processing for longer than `threshold`.
    pub(crate) fn stuck(&self, threshold: core::time::Duration) -> InflightSnapshot {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|info| now.duration_since(info.started_at) > threshold)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    fn info(id: u64) -> ProcessingRequestInfo {
        ProcessingRequestInfo {
            request_id: id,
            tags: RequestTags::default(),
            started_at: Instant::now(),
        }
    }

    #[test]
    fn insert_remove_roundtrip() {
        let map = InflightMap::new();
        map.insert(info(7));
        assert_eq!(map.len(), 1);

        let removed = map.remove(7);
        assert_eq!(removed.request_id, 7);
        assert!(map.is_empty());
    }

    #[test]
    #[should_panic(expected = "already in flight")]
    fn duplicate_insert_panics() {
        let map = InflightMap::new();
        map.insert(info(7));
        map.insert(info(7));
    }

    #[test]
    #[should_panic(expected = "was not in flight")]
    fn unknown_remove_panics() {
        let map = InflightMap::new();
        map.remove(7);
    }

    #[test]
    fn stuck_scan_filters_by_age() {
        let map = InflightMap::new();
        let old = ProcessingRequestInfo {
            request_id: 1,
            tags: RequestTags::default(),
            started_at: Instant::now() - Duration::from_secs(60),
        };
        map.insert(old);
        map.insert(info(2));

        let stuck = map.stuck(Duration::from_secs(30));
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].request_id, 1);
    }
}
