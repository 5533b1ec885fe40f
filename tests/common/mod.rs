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
//! Common collaborators and helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use micarocks::common::app_config::TabletConfig;
use micarocks::common::error::{TabletError, TabletResult};
use micarocks::fs::LocalFsManager;
use micarocks::runtime::mem_tracker::MemTracker;
use micarocks::tablet::bootstrap::{BootstrapOutput, TabletBootstrapper};
use micarocks::tablet::manager::{NodeContext, TabletManager};
use micarocks::tablet::metadata::{Quorum, QuorumRole, TabletMetadata, TabletSchema};
use micarocks::tablet::replica::{
    Clock, Consensus, ConsensusBootstrapInfo, ConsensusFactory, MaintenanceManager, Messenger,
    TabletStatusListener, TabletStorage, WriteAheadLog,
};

pub const TEST_NODE_UUID: &str = "test-node-uuid";

pub struct TestClock;

impl Clock for TestClock {
    fn now_micros(&self) -> i64 {
        0
    }
}

pub struct TestMessenger;

impl Messenger for TestMessenger {}

pub struct TestStorage {
    tablet_id: String,
    schema_version: u32,
}

impl TabletStorage for TestStorage {
    fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

pub struct TestLog;

impl WriteAheadLog for TestLog {
    fn close(&self) -> TabletResult<()> {
        Ok(())
    }
}

pub struct TestConsensus;

impl Consensus for TestConsensus {
    fn start(&self, _info: &ConsensusBootstrapInfo) -> TabletResult<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn role(&self) -> QuorumRole {
        QuorumRole::Leader
    }
}

pub struct TestConsensusFactory;

impl ConsensusFactory for TestConsensusFactory {
    fn create(
        &self,
        _meta: &Arc<TabletMetadata>,
        _clock: &Arc<dyn Clock>,
        _messenger: &Arc<dyn Messenger>,
    ) -> TabletResult<Arc<dyn Consensus>> {
        Ok(Arc::new(TestConsensus))
    }
}

/// Bootstrapper that can be told to fail named tablets.
pub struct TestBootstrapper {
    fail_tablets: Mutex<HashSet<String>>,
}

impl TestBootstrapper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_tablets: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_tablet(&self, tablet_id: &str) {
        self.fail_tablets
            .lock()
            .expect("fail set lock")
            .insert(tablet_id.to_string());
    }
}

impl TabletBootstrapper for TestBootstrapper {
    fn bootstrap_tablet(
        &self,
        meta: &Arc<TabletMetadata>,
        _clock: &Arc<dyn Clock>,
        listener: &Arc<TabletStatusListener>,
    ) -> TabletResult<BootstrapOutput> {
        listener.set_status("replaying log");
        let failing = self
            .fail_tablets
            .lock()
            .expect("fail set lock")
            .contains(meta.tablet_id());
        if failing {
            return Err(TabletError::Corruption(format!(
                "injected bootstrap failure for tablet {}",
                meta.tablet_id()
            )));
        }
        Ok(BootstrapOutput {
            storage: Arc::new(TestStorage {
                tablet_id: meta.tablet_id().to_string(),
                schema_version: meta.schema_version(),
            }),
            log: Box::new(TestLog),
            bootstrap_info: ConsensusBootstrapInfo::default(),
        })
    }
}

/// Maintenance manager that remembers which tablets registered ops.
pub struct RecordingMaintenanceManager {
    registered: Mutex<Vec<String>>,
}

impl RecordingMaintenanceManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registered: Mutex::new(Vec::new()),
        })
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().expect("registered lock").clone()
    }
}

impl MaintenanceManager for RecordingMaintenanceManager {
    fn register_ops(&self, storage: &Arc<dyn TabletStorage>) {
        self.registered
            .lock()
            .expect("registered lock")
            .push(storage.tablet_id().to_string());
    }
}

/// One node's tablet manager over a temp data dir, with handles to the
/// injectable collaborators.
pub struct TestNode {
    pub temp_dir: TempDir,
    pub manager: Arc<TabletManager>,
    pub bootstrapper: Arc<TestBootstrapper>,
    pub maintenance: Arc<RecordingMaintenanceManager>,
    pub mem_root: Arc<MemTracker>,
}

impl TestNode {
    pub fn start() -> Self {
        Self::start_with_options(TabletConfig::default())
    }

    pub fn start_with_options(options: TabletConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let node = Self::open(temp_dir, options);
        node.manager.init().expect("init tablet manager");
        node
    }

    /// Build the manager without calling init, over an existing dir.
    pub fn open(temp_dir: TempDir, options: TabletConfig) -> Self {
        let fs = Arc::new(LocalFsManager::open(temp_dir.path()).expect("open fs"));
        let bootstrapper = TestBootstrapper::new();
        let maintenance = RecordingMaintenanceManager::new();
        let mem_root = MemTracker::new_root("test-node");
        let ctx = NodeContext {
            node_uuid: TEST_NODE_UUID.to_string(),
            clock: Arc::new(TestClock),
            messenger: Arc::new(TestMessenger),
            bootstrapper: Arc::clone(&bootstrapper) as Arc<dyn TabletBootstrapper>,
            consensus_factory: Arc::new(TestConsensusFactory),
            maintenance_manager: Arc::clone(&maintenance) as Arc<dyn MaintenanceManager>,
            parent_mem_tracker: Arc::clone(&mem_root),
        };
        let manager = TabletManager::new(fs, ctx, options);
        Self {
            temp_dir,
            manager,
            bootstrapper,
            maintenance,
            mem_root,
        }
    }

    pub fn create_tablet(&self, tablet_id: &str) -> TabletResult<()> {
        self.manager
            .create_new_tablet(
                "table-1",
                tablet_id,
                "",
                "ff",
                "orders",
                TabletSchema::default(),
                Quorum::local_quorum(TEST_NODE_UUID),
            )
            .map(|_| ())
    }
}
