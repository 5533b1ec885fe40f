// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

/// Tracks logical memory usage for a component and its ancestors.
///
/// This is a lightweight accounting utility that only records bytes
/// explicitly reported by the caller. It does NOT reflect real process RSS
/// or allocator statistics. A limit of -1 means unlimited.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    limit: i64,
    parent: Option<Arc<MemTracker>>,
    consumption: AtomicI64,
    peak: AtomicI64,
}

impl MemTracker {
    /// Create a root tracker with no parent and no limit.
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit: -1,
            parent: None,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Create a child tracker. `limit` caps this tracker's own consumption;
    /// ancestors additionally apply their own limits.
    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>, limit: i64) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            parent: Some(Arc::clone(parent)),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Increase consumption for this tracker and all ancestors without
    /// checking any limit.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.consumption.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    /// Atomically reserve `bytes` against this tracker and every ancestor,
    /// or against none of them.
    ///
    /// Trackers are attempted root first; a rejection anywhere releases the
    /// reservations already taken, so a failed admission leaves every
    /// consumption figure exactly where it was.
    pub fn try_consume(&self, bytes: i64) -> bool {
        if bytes <= 0 {
            return true;
        }

        let mut chain: Vec<&MemTracker> = Vec::new();
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            chain.push(current);
            tracker = current.parent.as_deref();
        }
        chain.reverse();

        for (attempted, current) in chain.iter().enumerate() {
            let new_value = current.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if current.limit >= 0 && new_value > current.limit {
                current.consumption.fetch_sub(bytes, Ordering::AcqRel);
                for consumed in &chain[..attempted] {
                    consumed.consumption.fetch_sub(bytes, Ordering::AcqRel);
                }
                return false;
            }
            current.update_peak(new_value);
        }
        true
    }

    /// Whether `bytes` would fit under this tracker's own limit, ignoring
    /// every ancestor. Distinguishes local-limit rejections from pressure
    /// inherited from a parent budget.
    pub fn can_consume_no_ancestors(&self, bytes: i64) -> bool {
        if self.limit < 0 {
            return true;
        }
        self.consumption.load(Ordering::Acquire) + bytes <= self.limit
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

static PROCESS_TRACKER: OnceLock<Arc<MemTracker>> = OnceLock::new();

/// Global process-level logical memory tracker; per-tablet transaction
/// trackers parent to this by default.
pub fn process_mem_tracker() -> Arc<MemTracker> {
    Arc::clone(PROCESS_TRACKER.get_or_init(|| MemTracker::new_root("process")))
}

#[cfg(test)]
mod tests {
    use super::MemTracker;
    use proptest::prelude::*;

    #[test]
    fn consume_propagates_to_ancestors() {
        let root = MemTracker::new_root("root");
        let child = MemTracker::new_child("child", &root, -1);
        child.consume(100);
        assert_eq!(child.consumption(), 100);
        assert_eq!(root.consumption(), 100);
        child.release(100);
        assert_eq!(child.consumption(), 0);
        assert_eq!(root.consumption(), 0);
    }

    #[test]
    fn try_consume_rejects_over_local_limit() {
        let root = MemTracker::new_root("root");
        let child = MemTracker::new_child("child", &root, 64);
        assert!(child.try_consume(64));
        assert!(!child.try_consume(1));
        assert_eq!(child.consumption(), 64);
        assert_eq!(root.consumption(), 64);
    }

    #[test]
    fn failed_try_consume_unwinds_ancestor_reservations() {
        let root = MemTracker::new_root("root");
        let mid = MemTracker::new_child("mid", &root, 1000);
        let leaf = MemTracker::new_child("leaf", &mid, 10);
        assert!(!leaf.try_consume(11));
        assert_eq!(leaf.consumption(), 0);
        assert_eq!(mid.consumption(), 0);
        assert_eq!(root.consumption(), 0);
    }

    #[test]
    fn ancestor_limit_rejects_even_when_leaf_would_fit() {
        let root = MemTracker::new_root("root");
        let mid = MemTracker::new_child("mid", &root, 10);
        let leaf = MemTracker::new_child("leaf", &mid, 100);
        assert!(leaf.try_consume(8));
        assert!(!leaf.try_consume(8));
        assert!(leaf.can_consume_no_ancestors(8));
        assert_eq!(leaf.consumption(), 8);
        assert_eq!(mid.consumption(), 8);
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let root = MemTracker::new_root("root");
        root.consume(50);
        root.consume(50);
        root.release(80);
        root.consume(10);
        assert_eq!(root.consumption(), 30);
        assert_eq!(root.peak(), 100);
    }

    proptest! {
        // Any interleaving of successful reservations and matching releases
        // leaves the tracker and its parent exactly drained.
        #[test]
        fn reservations_and_releases_balance(sizes in prop::collection::vec(1i64..=4096, 1..32)) {
            let root = MemTracker::new_root("root");
            let child = MemTracker::new_child("child", &root, 1 << 20);
            let mut admitted = Vec::new();
            for size in &sizes {
                if child.try_consume(*size) {
                    admitted.push(*size);
                }
            }
            let total: i64 = admitted.iter().sum();
            prop_assert_eq!(child.consumption(), total);
            prop_assert_eq!(root.consumption(), total);
            for size in admitted {
                child.release(size);
            }
            prop_assert_eq!(child.consumption(), 0);
            prop_assert_eq!(root.consumption(), 0);
        }
    }
}
