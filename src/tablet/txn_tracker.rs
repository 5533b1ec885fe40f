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
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::common::error::{TabletError, TabletResult};
use crate::common::metrics::{Counter, IntGauge, MetricEntity};
use crate::common::util::LogThrottler;
use crate::runtime::mem_tracker::MemTracker;
use crate::micarocks_logging::{info, warn};

const MAX_TXNS_TO_PRINT: usize = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnKind {
    Write,
    AlterSchema,
}

/// One in-flight transaction as seen by the tracker. The driver is an
/// opaque, reference-counted object owned by the execution layer; the
/// tracker only needs its kind, its request payload size at admission
/// time, and a printable form for drain diagnostics.
pub trait TransactionDriver: Send + Sync {
    fn txn_kind(&self) -> TxnKind;
    fn request_size_bytes(&self) -> usize;
    fn describe(&self) -> String;
}

/// Hash-map key with `Arc` pointer identity: two handles to the same driver
/// are the same transaction.
struct DriverKey(Arc<dyn TransactionDriver>);

impl PartialEq for DriverKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DriverKey {}

impl Hash for DriverKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

struct TxnState {
    /// Captured at admit time; the request payload may be freed long before
    /// the transaction completes.
    memory_footprint: i64,
}

struct TrackerMetrics {
    all_inflight: Arc<IntGauge>,
    write_inflight: Arc<IntGauge>,
    alter_schema_inflight: Arc<IntGauge>,
    memory_pressure_rejections: Arc<Counter>,
    memory_limit_rejections: Arc<Counter>,
}

impl TrackerMetrics {
    fn new(entity: &Arc<MetricEntity>) -> Self {
        Self {
            all_inflight: entity.int_gauge("all_transactions_inflight"),
            write_inflight: entity.int_gauge("write_transactions_inflight"),
            alter_schema_inflight: entity.int_gauge("alter_schema_transactions_inflight"),
            memory_pressure_rejections: entity.counter("transaction_memory_pressure_rejections"),
            memory_limit_rejections: entity.counter("transaction_memory_limit_rejections"),
        }
    }
}

/// Per-tablet admission controller and registry of in-flight transactions.
///
/// Admission charges the transaction's payload size against a memory budget
/// shared with every ancestor tracker; the registry lock is only ever held
/// for O(1) hash-map operations. The tracker must be drained before it is
/// dropped.
pub struct TransactionTracker {
    pending: Mutex<HashMap<DriverKey, TxnState>>,
    mem_tracker: OnceLock<Arc<MemTracker>>,
    metrics: OnceLock<TrackerMetrics>,
    rejection_throttle: LogThrottler,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            mem_tracker: OnceLock::new(),
            metrics: OnceLock::new(),
            rejection_throttle: LogThrottler::new(Duration::from_secs(1)),
        }
    }

    /// Attach metrics. Call before any `add`.
    pub fn start_instrumentation(&self, entity: &Arc<MetricEntity>) {
        let _ = self.metrics.set(TrackerMetrics::new(entity));
    }

    /// Attach a memory budget as a child of `parent`. Call before any `add`.
    /// `limit_bytes` of -1 leaves admission unmetered.
    pub fn start_memory_tracking(
        &self,
        tablet_id: &str,
        parent: &Arc<MemTracker>,
        limit_bytes: i64,
    ) {
        if limit_bytes != -1 {
            let _ = self.mem_tracker.set(MemTracker::new_child(
                format!("txn_tracker.{tablet_id}"),
                parent,
                limit_bytes,
            ));
        }
    }

    /// Admit one transaction, charging its payload against the memory
    /// budget. Rejection returns `ServiceUnavailable` and leaves no trace
    /// in the registry or the budget.
    pub fn add(&self, driver: Arc<dyn TransactionDriver>) -> TabletResult<()> {
        let footprint = i64::try_from(driver.request_size_bytes()).unwrap_or(i64::MAX);
        if let Some(tracker) = self.mem_tracker.get() {
            if !tracker.try_consume(footprint) {
                if let Some(metrics) = self.metrics.get() {
                    metrics.memory_pressure_rejections.increment();
                    if !tracker.can_consume_no_ancestors(footprint) {
                        metrics.memory_limit_rejections.increment();
                    }
                }

                let msg = format!(
                    "transaction on tablet {} rejected due to memory pressure: the memory \
                     usage of this transaction ({}) plus the current consumption ({}) \
                     exceeds the transaction memory limit ({}) or the limit of an \
                     ancestral memory tracker",
                    tracker.label(),
                    footprint,
                    tracker.consumption(),
                    tracker.limit()
                );
                if let Some(suppressed) = self.rejection_throttle.should_log() {
                    warn!("{msg} [{suppressed} similar messages suppressed]");
                }
                return Err(TabletError::ServiceUnavailable(msg));
            }
        }

        self.increment_counters(driver.txn_kind());

        let mut pending = self.pending.lock().expect("txn tracker lock");
        let description = driver.describe();
        let prior = pending.insert(DriverKey(driver), TxnState {
            memory_footprint: footprint,
        });
        assert!(
            prior.is_none(),
            "transaction driver admitted twice: {description}"
        );
        Ok(())
    }

    /// Remove a completed transaction, crediting its footprint back.
    pub fn release(&self, driver: &Arc<dyn TransactionDriver>) {
        self.decrement_counters(driver.txn_kind());

        let mut pending = self.pending.lock().expect("txn tracker lock");
        let state = pending
            .remove(&DriverKey(Arc::clone(driver)))
            .unwrap_or_else(|| {
                panic!(
                    "could not remove pending transaction from map: {}",
                    driver.describe()
                )
            });
        drop(pending);
        if let Some(tracker) = self.mem_tracker.get() {
            tracker.release(state.memory_footprint);
        }
    }

    /// Strong-reference snapshot of every tracked driver.
    pub fn pending_transactions(&self) -> Vec<Arc<dyn TransactionDriver>> {
        let pending = self.pending.lock().expect("txn tracker lock");
        pending.keys().map(|key| Arc::clone(&key.0)).collect()
    }

    pub fn num_pending(&self) -> usize {
        self.pending.lock().expect("txn tracker lock").len()
    }

    /// Wait indefinitely for the tracker to drain.
    pub fn wait_for_all_to_finish(&self) {
        self.wait_for_all_to_finish_with_timeout(Duration::MAX)
            .expect("unbounded drain cannot time out");
    }

    /// Poll with capped exponential back-off until no transactions remain,
    /// complaining (with a dump of pending transactions) at increasingly
    /// sparse intervals.
    pub fn wait_for_all_to_finish_with_timeout(&self, timeout: Duration) -> TabletResult<()> {
        let mut wait_time_us: u64 = 250;
        let mut num_complaints: u32 = 0;
        let start_time = Instant::now();
        let mut next_log_time = start_time + Duration::from_secs(1);

        loop {
            let txns = self.pending_transactions();
            if txns.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            let elapsed = now.duration_since(start_time);
            if elapsed > timeout {
                return Err(TabletError::TimedOut(format!(
                    "timed out waiting for all transactions to finish: {} transactions \
                     pending, waited for {:?}",
                    txns.len(),
                    elapsed
                )));
            }
            if now > next_log_time {
                warn!(
                    "waiting for {} outstanding transactions to complete, now for {:?}",
                    txns.len(),
                    elapsed
                );
                info!(
                    "dumping up to {} currently running transactions:",
                    MAX_TXNS_TO_PRINT
                );
                for txn in txns.iter().take(MAX_TXNS_TO_PRINT) {
                    info!("{}", txn.describe());
                }

                num_complaints += 1;
                // Exponential back-off on how often the dump is repeated.
                next_log_time = now + Duration::from_secs(1u64 << num_complaints.min(8));
            }
            wait_time_us = (wait_time_us * 5 / 4).min(1_000_000);
            std::thread::sleep(Duration::from_micros(wait_time_us));
        }
    }

    fn increment_counters(&self, kind: TxnKind) {
        let Some(metrics) = self.metrics.get() else {
            return;
        };
        metrics.all_inflight.increment();
        match kind {
            TxnKind::Write => metrics.write_inflight.increment(),
            TxnKind::AlterSchema => metrics.alter_schema_inflight.increment(),
        }
    }

    fn decrement_counters(&self, kind: TxnKind) {
        let Some(metrics) = self.metrics.get() else {
            return;
        };
        assert!(
            metrics.all_inflight.value() > 0,
            "all-transactions-inflight gauge would go negative"
        );
        metrics.all_inflight.decrement();
        match kind {
            TxnKind::Write => {
                assert!(
                    metrics.write_inflight.value() > 0,
                    "write-transactions-inflight gauge would go negative"
                );
                metrics.write_inflight.decrement();
            }
            TxnKind::AlterSchema => {
                assert!(
                    metrics.alter_schema_inflight.value() > 0,
                    "alter-schema-transactions-inflight gauge would go negative"
                );
                metrics.alter_schema_inflight.decrement();
            }
        }
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionTracker {
    fn drop(&mut self) {
        // Accounted memory must have been credited back before teardown.
        // Skip the check while unwinding from another failure so the
        // original panic stays visible.
        if std::thread::panicking() {
            return;
        }
        let pending = self.pending.lock().expect("txn tracker lock");
        assert!(
            pending.is_empty(),
            "transaction tracker dropped with {} pending transactions",
            pending.len()
        );
    }
}
