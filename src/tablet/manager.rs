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
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::app_config::TabletConfig;
use crate::common::error::{TabletError, TabletResult};
use crate::common::metrics::MetricEntity;
use crate::common::util::TraceBuffer;
use crate::fs::FsManager;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::work_pool::WorkPool;
use crate::tablet::bootstrap::TabletBootstrapper;
use crate::tablet::metadata::{Quorum, QuorumRole, TabletMetadata, TabletSchema};
use crate::tablet::replica::{
    Clock, ConsensusFactory, MaintenanceManager, Messenger, TabletReplica, TabletState,
};
use crate::tablet::report::{ReportedTablet, TabletReport};
use crate::micarocks_logging::{debug, error, info, warn};

/// Node-wide collaborators the tablet manager threads through to replicas.
pub struct NodeContext {
    pub node_uuid: String,
    pub clock: Arc<dyn Clock>,
    pub messenger: Arc<dyn Messenger>,
    pub bootstrapper: Arc<dyn TabletBootstrapper>,
    pub consensus_factory: Arc<dyn ConsensusFactory>,
    pub maintenance_manager: Arc<dyn MaintenanceManager>,
    /// Per-tablet transaction budgets are children of this tracker.
    pub parent_mem_tracker: Arc<MemTracker>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    Initializing,
    Running,
    Quiescing,
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
struct TabletReportState {
    /// Value of `next_report_seq` when the tablet last changed; the change
    /// first appears in the report bearing this sequence number.
    change_seq: u32,
}

struct ManagerInner {
    tablets: HashMap<String, Arc<TabletReplica>>,
    creates_in_progress: HashSet<String>,
    dirty: HashMap<String, TabletReportState>,
    next_report_seq: u32,
    state: ManagerState,
}

/// Registry and lifecycle orchestrator for every tablet replica hosted on
/// this node.
///
/// One reader/writer lock guards the registry, the creates-in-progress set,
/// the dirty set, and the manager state. Lookups take the shared mode;
/// everything that mutates (including report generation, which assigns a
/// sequence number) takes the exclusive mode. Long-running work (bootstrap,
/// replica shutdown, metadata I/O) always happens outside the lock.
pub struct TabletManager {
    fs: Arc<dyn FsManager>,
    ctx: NodeContext,
    options: TabletConfig,
    open_tablet_pool: WorkPool,
    inner: RwLock<ManagerInner>,
}

/// Removes the tablet id from `creates_in_progress` on every exit path of
/// the create flow, including early returns and panics.
struct CreateInProgressGuard<'a> {
    manager: &'a TabletManager,
    tablet_id: &'a str,
}

impl Drop for CreateInProgressGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.manager.write_inner();
        let removed = inner.creates_in_progress.remove(self.tablet_id);
        if !std::thread::panicking() {
            assert!(
                removed,
                "create-in-progress entry for tablet {} vanished",
                self.tablet_id
            );
        }
    }
}

impl TabletManager {
    pub fn new(fs: Arc<dyn FsManager>, ctx: NodeContext, options: TabletConfig) -> Arc<Self> {
        let open_tablet_pool = WorkPool::new(
            "tablet-bootstrap",
            options.num_tablets_to_open_simultaneously,
        );
        Arc::new(Self {
            fs,
            ctx,
            options,
            open_tablet_pool,
            inner: RwLock::new(ManagerInner {
                tablets: HashMap::new(),
                creates_in_progress: HashSet::new(),
                dirty: HashMap::new(),
                next_report_seq: 0,
                state: ManagerState::Initializing,
            }),
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, ManagerInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, ManagerInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ManagerState {
        self.read_inner().state
    }

    /// Enumerate on-disk metadata, register every discovered replica, and
    /// queue its bootstrap. The manager is Running once this returns Ok;
    /// a metadata listing or load failure leaves it Initializing.
    pub fn init(self: &Arc<Self>) -> TabletResult<()> {
        assert_eq!(
            self.state(),
            ManagerState::Initializing,
            "tablet manager initialized twice"
        );

        let tablet_ids = self.fs.list_tablet_metadata()?;

        for tablet_id in tablet_ids {
            info!("Loading tablet metadata {tablet_id}");
            let meta = TabletMetadata::load(self.fs.as_ref(), &tablet_id)?;
            self.create_and_register_replica(&meta);
            self.submit_bootstrap(&meta)?;
        }

        self.write_inner().state = ManagerState::Running;
        Ok(())
    }

    /// Block until the bootstrap pool is idle, then surface the first
    /// failed replica's error, if any.
    pub fn wait_for_all_bootstraps_to_finish(&self) -> TabletResult<()> {
        assert_eq!(
            self.state(),
            ManagerState::Running,
            "wait_for_all_bootstraps_to_finish requires a running manager"
        );

        self.open_tablet_pool.wait();

        let inner = self.read_inner();
        for replica in inner.tablets.values() {
            if replica.state() == TabletState::Failed {
                return Err(replica.last_error().unwrap_or_else(|| {
                    panic!("tablet {} is Failed without an error", replica.tablet_id())
                }));
            }
        }
        Ok(())
    }

    /// Create, persist, and register a brand-new tablet; its bootstrap runs
    /// asynchronously. Returns the replica handle.
    #[allow(clippy::too_many_arguments)]
    pub fn create_new_tablet(
        self: &Arc<Self>,
        table_id: &str,
        tablet_id: &str,
        start_key: &str,
        end_key: &str,
        table_name: &str,
        schema: TabletSchema,
        mut quorum: Quorum,
    ) -> TabletResult<Arc<TabletReplica>> {
        assert_eq!(
            self.state(),
            ManagerState::Running,
            "create_new_tablet requires a running manager"
        );

        // A single-member local quorum must name this node as leader;
        // anything else is a programmer error upstream.
        if quorum.local {
            assert_eq!(
                quorum.peers.len(),
                1,
                "local quorum for tablet {tablet_id} must have exactly one peer"
            );
            assert_eq!(
                quorum.peers[0].permanent_uuid, self.ctx.node_uuid,
                "local quorum peer for tablet {tablet_id} is not this node"
            );
            assert_eq!(
                quorum.peers[0].role,
                QuorumRole::Leader,
                "local quorum peer for tablet {tablet_id} must be leader"
            );
        }
        // The initial sequence number is always -1, disregarding any
        // caller-supplied value.
        quorum.seqno = -1;

        {
            let mut inner = self.write_inner();
            if inner.tablets.contains_key(tablet_id) {
                return Err(TabletError::AlreadyPresent(format!(
                    "tablet {tablet_id} already registered"
                )));
            }
            if !inner.creates_in_progress.insert(tablet_id.to_string()) {
                return Err(TabletError::AlreadyPresent(format!(
                    "creation of tablet {tablet_id} already in progress"
                )));
            }
        }
        let _guard = CreateInProgressGuard {
            manager: self,
            tablet_id,
        };

        let meta = TabletMetadata::create_new(
            self.fs.as_ref(),
            table_id,
            tablet_id,
            table_name,
            schema,
            quorum,
            start_key,
            end_key,
        );
        meta.persist(self.fs.as_ref())?;

        let replica = self.create_and_register_replica(&meta);
        self.submit_bootstrap(&meta)?;
        Ok(replica)
    }

    /// Shut the replica down and drop it from the registry. A replica that
    /// was already quiescing or shut down means the caller raced another
    /// shutdown and gets `ServiceUnavailable`.
    pub fn delete_tablet(&self, replica: &Arc<TabletReplica>) -> TabletResult<()> {
        let tablet_id = replica.tablet_id();
        info!(
            "Deleting tablet {tablet_id} (table={} [id={}])",
            replica.meta().table_name(),
            replica.meta().table_id()
        );

        let prev_state = replica.shutdown();
        if matches!(prev_state, TabletState::Quiescing | TabletState::Shutdown) {
            return Err(TabletError::ServiceUnavailable(format!(
                "tablet {tablet_id} was not running: {prev_state:?}"
            )));
        }

        let mut inner = self.write_inner();
        let removed = inner.tablets.remove(tablet_id);
        assert!(
            removed.is_some(),
            "tablet {tablet_id} vanished from the registry during delete"
        );
        // The next incremental report must carry the removal even if every
        // earlier change was already acknowledged.
        Self::mark_dirty_unlocked(&mut inner, tablet_id);
        Ok(())
    }

    pub fn lookup_tablet(&self, tablet_id: &str) -> Option<Arc<TabletReplica>> {
        self.read_inner().tablets.get(tablet_id).cloned()
    }

    pub fn get_tablet_replica(&self, tablet_id: &str) -> TabletResult<Arc<TabletReplica>> {
        self.lookup_tablet(tablet_id)
            .ok_or_else(|| TabletError::NotFound(format!("tablet {tablet_id} not found")))
    }

    /// Snapshot of every registered replica handle.
    pub fn get_tablet_replicas(&self) -> Vec<Arc<TabletReplica>> {
        self.read_inner().tablets.values().cloned().collect()
    }

    /// Record that a tablet changed; it will first appear in the report
    /// carrying the current `next_report_seq`.
    pub fn mark_tablet_dirty(&self, tablet_id: &str) {
        let mut inner = self.write_inner();
        Self::mark_dirty_unlocked(&mut inner, tablet_id);
    }

    fn mark_dirty_unlocked(inner: &mut ManagerInner, tablet_id: &str) {
        let next_seq = inner.next_report_seq;
        match inner.dirty.get_mut(tablet_id) {
            Some(state) => {
                assert!(
                    state.change_seq <= next_seq,
                    "tablet {} dirty at seq {} which is newer than next report seq {}",
                    tablet_id,
                    state.change_seq,
                    next_seq
                );
                state.change_seq = next_seq;
            }
            None => {
                inner.dirty.insert(
                    tablet_id.to_string(),
                    TabletReportState {
                        change_seq: next_seq,
                    },
                );
            }
        }
        debug!("will report tablet {tablet_id} in report #{next_seq}");
    }

    /// Report every registered replica. Supersedes any pending deltas, so
    /// the dirty set is cleared.
    pub fn generate_full_tablet_report(&self) -> TabletReport {
        let mut inner = self.write_inner();
        let sequence_number = inner.next_report_seq;
        inner.next_report_seq += 1;

        let mut updated_tablets: Vec<ReportedTablet> = inner
            .tablets
            .iter()
            .map(|(tablet_id, replica)| Self::build_reported_tablet(tablet_id, replica))
            .collect();
        updated_tablets.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        inner.dirty.clear();

        TabletReport {
            sequence_number,
            is_incremental: false,
            updated_tablets,
            removed_tablet_ids: Vec::new(),
        }
    }

    /// Report every dirty tablet: still-registered ones as updates, the
    /// rest as removals. Dirty entries survive until acknowledged.
    pub fn generate_incremental_tablet_report(&self) -> TabletReport {
        let mut inner = self.write_inner();
        let sequence_number = inner.next_report_seq;
        inner.next_report_seq += 1;

        let ManagerInner { tablets, dirty, .. } = &*inner;
        let mut updated_tablets = Vec::new();
        let mut removed_tablet_ids = Vec::new();
        for tablet_id in dirty.keys() {
            match tablets.get(tablet_id) {
                Some(replica) => {
                    updated_tablets.push(Self::build_reported_tablet(tablet_id, replica));
                }
                None => removed_tablet_ids.push(tablet_id.clone()),
            }
        }
        updated_tablets.sort_by(|a, b| a.tablet_id.cmp(&b.tablet_id));
        removed_tablet_ids.sort();

        TabletReport {
            sequence_number,
            is_incremental: true,
            updated_tablets,
            removed_tablet_ids,
        }
    }

    /// The coordinator has observed the report with this sequence number;
    /// prune every dirty entry it covered. Newer marks survive.
    pub fn mark_tablet_report_acknowledged(&self, acked_seq: u32) {
        let mut inner = self.write_inner();
        assert!(
            acked_seq < inner.next_report_seq,
            "acknowledged report seq {} was never generated (next is {})",
            acked_seq,
            inner.next_report_seq
        );
        inner.dirty.retain(|_, state| state.change_seq > acked_seq);
    }

    /// Quiesce the node: stop the bootstrap pool, shut every replica down,
    /// and clear the registry. Idempotent once quiescing has begun.
    pub fn shutdown(&self) {
        {
            let mut inner = self.write_inner();
            match inner.state {
                ManagerState::Quiescing => {
                    debug!("tablet manager shutdown already in progress");
                    return;
                }
                ManagerState::Shutdown => {
                    debug!("tablet manager has already been shut down");
                    return;
                }
                ManagerState::Initializing | ManagerState::Running => {
                    info!("Shutting down tablet manager");
                    inner.state = ManagerState::Quiescing;
                }
            }
        }

        // Stop accepting bootstraps and drain the ones in flight.
        self.open_tablet_pool.shutdown();

        // Snapshot the replicas, then shut them down without holding the
        // registry lock: replica shutdown drains transactions and can take
        // arbitrarily long.
        let replicas = self.get_tablet_replicas();
        for replica in &replicas {
            replica.shutdown();
        }

        let mut inner = self.write_inner();
        assert_eq!(
            inner.tablets.len(),
            replicas.len(),
            "tablet registry changed during shutdown"
        );
        inner.tablets.clear();
        inner.state = ManagerState::Shutdown;
    }

    fn build_reported_tablet(tablet_id: &str, replica: &Arc<TabletReplica>) -> ReportedTablet {
        let state = replica.state();
        let error = if state == TabletState::Failed {
            replica.last_error().map(|e| e.to_string())
        } else {
            None
        };
        ReportedTablet {
            tablet_id: tablet_id.to_string(),
            state,
            role: replica.role(),
            error,
            schema_version: replica.schema_version(),
        }
    }

    fn create_and_register_replica(&self, meta: &Arc<TabletMetadata>) -> Arc<TabletReplica> {
        let tablet_id = meta.tablet_id().to_string();
        let replica = TabletReplica::new(Arc::clone(meta));

        let entity = MetricEntity::for_tablet(&tablet_id);
        replica.txn_tracker().start_instrumentation(&entity);
        replica.txn_tracker().start_memory_tracking(
            &tablet_id,
            &self.ctx.parent_mem_tracker,
            self.options.transaction_memory_limit_bytes(),
        );

        let mut inner = self.write_inner();
        let prior = inner.tablets.insert(tablet_id.clone(), Arc::clone(&replica));
        assert!(
            prior.is_none(),
            "unable to register tablet {tablet_id}: already registered"
        );
        drop(inner);
        info!("Registered tablet {tablet_id}");
        replica
    }

    fn submit_bootstrap(self: &Arc<Self>, meta: &Arc<TabletMetadata>) -> TabletResult<()> {
        let manager = Arc::clone(self);
        let meta = Arc::clone(meta);
        self.open_tablet_pool
            .submit(move || manager.open_tablet(&meta))
    }

    /// Bootstrap task body: reconstruct durable state, start the replica,
    /// and mark it for the next report. Failures are recorded on the
    /// replica, never thrown back to the submitter.
    fn open_tablet(&self, meta: &Arc<TabletMetadata>) {
        let tablet_id = meta.tablet_id();
        let replica = self.lookup_tablet(tablet_id).unwrap_or_else(|| {
            panic!("tablet {tablet_id} not registered prior to bootstrap")
        });

        info!("Bootstrapping tablet {tablet_id}");
        let trace = TraceBuffer::new();
        if let Err(e) = self.bootstrap_and_start(&replica, meta, &trace) {
            error!("Tablet {tablet_id} failed to bootstrap: {e}");
            replica.set_failed(e);
            return;
        }
        self.mark_tablet_dirty(tablet_id);

        let elapsed = trace.elapsed();
        if elapsed.as_millis() as u64 > self.options.start_warn_threshold_ms {
            warn!(
                "Tablet startup for {tablet_id} took {}ms",
                elapsed.as_millis()
            );
            warn!("Trace:\n{}", trace.dump());
        }
    }

    fn bootstrap_and_start(
        &self,
        replica: &Arc<TabletReplica>,
        meta: &Arc<TabletMetadata>,
        trace: &TraceBuffer,
    ) -> TabletResult<()> {
        replica.set_bootstrapping()?;

        trace.annotate("bootstrapping tablet");
        let output =
            self.ctx
                .bootstrapper
                .bootstrap_tablet(meta, &self.ctx.clock, replica.status_listener())?;

        trace.annotate("creating consensus");
        let consensus =
            self.ctx
                .consensus_factory
                .create(meta, &self.ctx.clock, &self.ctx.messenger)?;

        trace.annotate("initializing tablet replica");
        let storage = Arc::clone(&output.storage);
        replica.init(output.storage, output.log, consensus)?;

        trace.annotate("starting tablet replica");
        replica.start(&output.bootstrap_info)?;

        trace.annotate("registering maintenance operations");
        self.ctx.maintenance_manager.register_ops(&storage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ManagerState, NodeContext, TabletManager};
    use crate::common::app_config::TabletConfig;
    use crate::common::error::TabletResult;
    use crate::fs::LocalFsManager;
    use crate::runtime::mem_tracker::MemTracker;
    use crate::tablet::bootstrap::{BootstrapOutput, TabletBootstrapper};
    use crate::tablet::metadata::{Quorum, QuorumRole, TabletMetadata, TabletSchema};
    use crate::tablet::replica::{
        Clock, Consensus, ConsensusBootstrapInfo, ConsensusFactory, MaintenanceManager, Messenger,
        TabletState, TabletStatusListener, TabletStorage, WriteAheadLog,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    struct WallClock;

    impl Clock for WallClock {
        fn now_micros(&self) -> i64 {
            0
        }
    }

    struct NoopMessenger;

    impl Messenger for NoopMessenger {}

    struct NoopStorage {
        tablet_id: String,
        schema_version: u32,
    }

    impl TabletStorage for NoopStorage {
        fn tablet_id(&self) -> &str {
            &self.tablet_id
        }

        fn schema_version(&self) -> u32 {
            self.schema_version
        }
    }

    struct NoopLog;

    impl WriteAheadLog for NoopLog {
        fn close(&self) -> TabletResult<()> {
            Ok(())
        }
    }

    struct NoopConsensus;

    impl Consensus for NoopConsensus {
        fn start(&self, _info: &ConsensusBootstrapInfo) -> TabletResult<()> {
            Ok(())
        }

        fn shutdown(&self) {}

        fn role(&self) -> QuorumRole {
            QuorumRole::Leader
        }
    }

    struct NoopConsensusFactory;

    impl ConsensusFactory for NoopConsensusFactory {
        fn create(
            &self,
            _meta: &Arc<TabletMetadata>,
            _clock: &Arc<dyn Clock>,
            _messenger: &Arc<dyn Messenger>,
        ) -> TabletResult<Arc<dyn Consensus>> {
            Ok(Arc::new(NoopConsensus))
        }
    }

    struct NoopBootstrapper;

    impl TabletBootstrapper for NoopBootstrapper {
        fn bootstrap_tablet(
            &self,
            meta: &Arc<TabletMetadata>,
            _clock: &Arc<dyn Clock>,
            listener: &Arc<TabletStatusListener>,
        ) -> TabletResult<BootstrapOutput> {
            listener.set_status("replaying log");
            Ok(BootstrapOutput {
                storage: Arc::new(NoopStorage {
                    tablet_id: meta.tablet_id().to_string(),
                    schema_version: meta.schema_version(),
                }),
                log: Box::new(NoopLog),
                bootstrap_info: ConsensusBootstrapInfo::default(),
            })
        }
    }

    struct NoopMaintenanceManager;

    impl MaintenanceManager for NoopMaintenanceManager {
        fn register_ops(&self, _storage: &Arc<dyn TabletStorage>) {}
    }

    fn test_context() -> NodeContext {
        NodeContext {
            node_uuid: "node-uuid".to_string(),
            clock: Arc::new(WallClock),
            messenger: Arc::new(NoopMessenger),
            bootstrapper: Arc::new(NoopBootstrapper),
            consensus_factory: Arc::new(NoopConsensusFactory),
            maintenance_manager: Arc::new(NoopMaintenanceManager),
            parent_mem_tracker: MemTracker::new_root("test-root"),
        }
    }

    fn running_manager(dir: &std::path::Path) -> Arc<TabletManager> {
        let fs = Arc::new(LocalFsManager::open(dir).expect("open fs"));
        let manager = TabletManager::new(fs, test_context(), TabletConfig::default());
        manager.init().expect("init");
        manager
    }

    fn create_tablet(manager: &Arc<TabletManager>, tablet_id: &str) {
        manager
            .create_new_tablet(
                "table-1",
                tablet_id,
                "",
                "",
                "orders",
                TabletSchema::default(),
                Quorum::local_quorum("node-uuid"),
            )
            .expect("create");
    }

    #[test]
    fn full_then_incremental_with_no_activity_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        create_tablet(&manager, "tablet-1");
        manager
            .wait_for_all_bootstraps_to_finish()
            .expect("bootstraps");

        let full = manager.generate_full_tablet_report();
        assert!(!full.is_incremental);
        assert_eq!(full.updated_tablets.len(), 1);

        let incremental = manager.generate_incremental_tablet_report();
        assert!(incremental.is_incremental);
        assert_eq!(incremental.sequence_number, full.sequence_number + 1);
        assert!(incremental.is_empty());
        manager.shutdown();
    }

    #[test]
    fn report_sequence_numbers_are_gap_free() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        let mut seqs = Vec::new();
        seqs.push(manager.generate_full_tablet_report().sequence_number);
        seqs.push(manager.generate_incremental_tablet_report().sequence_number);
        seqs.push(manager.generate_incremental_tablet_report().sequence_number);
        seqs.push(manager.generate_full_tablet_report().sequence_number);
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        manager.shutdown();
    }

    #[test]
    fn acknowledgement_prunes_only_covered_marks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        create_tablet(&manager, "tablet-1");
        manager
            .wait_for_all_bootstraps_to_finish()
            .expect("bootstraps");

        // tablet-1 dirty at seq 0; report it.
        let report = manager.generate_incremental_tablet_report();
        assert_eq!(report.sequence_number, 0);
        assert_eq!(report.updated_tablets.len(), 1);

        // Re-dirty after the report: change_seq becomes 1.
        manager.mark_tablet_dirty("tablet-1");
        manager.mark_tablet_report_acknowledged(0);

        // The newer mark must survive the ack.
        let report = manager.generate_incremental_tablet_report();
        assert_eq!(report.updated_tablets.len(), 1);
        manager.shutdown();
    }

    #[test]
    fn delete_reports_removal_then_ack_clears_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        create_tablet(&manager, "tablet-1");
        manager
            .wait_for_all_bootstraps_to_finish()
            .expect("bootstraps");
        let first = manager.generate_incremental_tablet_report();
        manager.mark_tablet_report_acknowledged(first.sequence_number);

        let replica = manager.get_tablet_replica("tablet-1").expect("present");
        manager.delete_tablet(&replica).expect("delete");
        assert!(manager.lookup_tablet("tablet-1").is_none());

        let report = manager.generate_incremental_tablet_report();
        assert!(report.updated_tablets.is_empty());
        assert_eq!(report.removed_tablet_ids, vec!["tablet-1".to_string()]);

        manager.mark_tablet_report_acknowledged(report.sequence_number);
        let report = manager.generate_incremental_tablet_report();
        assert!(report.is_empty());
        manager.shutdown();
    }

    #[test]
    fn delete_raced_by_shutdown_is_service_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        create_tablet(&manager, "tablet-1");
        manager
            .wait_for_all_bootstraps_to_finish()
            .expect("bootstraps");
        let replica = manager.get_tablet_replica("tablet-1").expect("present");

        assert_eq!(replica.shutdown(), TabletState::Running);
        let err = manager.delete_tablet(&replica).expect_err("raced");
        assert!(err.is_service_unavailable());
        // The loser left the replica registered.
        assert!(manager.lookup_tablet("tablet-1").is_some());
        manager.shutdown();
    }

    #[test]
    fn concurrent_creates_produce_one_winner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    manager.create_new_tablet(
                        "table-1",
                        "tablet-contended",
                        "",
                        "",
                        "orders",
                        TabletSchema::default(),
                        Quorum::local_quorum("node-uuid"),
                    )
                })
            })
            .collect();

        let results: Vec<_> = threads.into_iter().map(|t| t.join().expect("join")).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_present()))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(already, results.len() - 1);
        manager.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_clears_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = running_manager(dir.path());
        create_tablet(&manager, "tablet-1");
        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::Shutdown);
        assert!(manager.get_tablet_replicas().is_empty());
        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::Shutdown);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // After acknowledging seq n, every surviving dirty mark is newer
        // than n: an incremental report generated after re-marking a subset
        // carries exactly that subset.
        #[test]
        fn ack_never_leaves_covered_marks(remark in prop::collection::vec(any::<bool>(), 1..8)) {
            let dir = tempfile::tempdir().expect("tempdir");
            let manager = running_manager(dir.path());
            for (i, _) in remark.iter().enumerate() {
                create_tablet(&manager, &format!("tablet-{i}"));
            }
            manager.wait_for_all_bootstraps_to_finish().expect("bootstraps");

            let report = manager.generate_incremental_tablet_report();
            prop_assert_eq!(report.updated_tablets.len(), remark.len());

            let remarked: Vec<String> = remark
                .iter()
                .enumerate()
                .filter(|(_, keep)| **keep)
                .map(|(i, _)| format!("tablet-{i}"))
                .collect();
            for tablet_id in &remarked {
                manager.mark_tablet_dirty(tablet_id);
            }
            manager.mark_tablet_report_acknowledged(report.sequence_number);

            let after = manager.generate_incremental_tablet_report();
            let mut reported: Vec<String> = after
                .updated_tablets
                .iter()
                .map(|t| t.tablet_id.clone())
                .collect();
            reported.sort();
            let mut expected = remarked.clone();
            expected.sort();
            prop_assert_eq!(reported, expected);
            manager.shutdown();
        }
    }
}
