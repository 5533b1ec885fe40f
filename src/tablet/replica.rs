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
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::common::error::{TabletError, TabletResult};
use crate::tablet::metadata::{QuorumRole, TabletMetadata};
use crate::tablet::txn_tracker::TransactionTracker;
use crate::micarocks_logging::info;

/// Lifecycle state of one hosted replica.
///
/// Transitions run Initializing → Bootstrapping → Running → Quiescing →
/// Shutdown; any state may fail to Failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TabletState {
    Initializing,
    Bootstrapping,
    Running,
    Quiescing,
    Shutdown,
    Failed,
}

/// Hybrid/physical time source, passed through to collaborators.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> i64;
}

/// RPC I/O handle. This layer never invokes it; it is threaded through to
/// the consensus engine, which owns all peer communication.
pub trait Messenger: Send + Sync {}

/// Open storage handle for one tablet, produced by bootstrap.
pub trait TabletStorage: Send + Sync {
    fn tablet_id(&self) -> &str;
    fn schema_version(&self) -> u32;
}

/// Write-ahead log handle, produced by bootstrap and owned by the replica
/// until shutdown.
pub trait WriteAheadLog: Send + Sync {
    fn close(&self) -> TabletResult<()>;
}

/// State recovered by log replay that consensus needs to resume.
#[derive(Clone, Debug, Default)]
pub struct ConsensusBootstrapInfo {
    pub last_committed_index: i64,
}

/// Replication engine surface for one tablet.
pub trait Consensus: Send + Sync {
    fn start(&self, info: &ConsensusBootstrapInfo) -> TabletResult<()>;
    fn shutdown(&self);
    fn role(&self) -> QuorumRole;
}

pub trait ConsensusFactory: Send + Sync {
    fn create(
        &self,
        meta: &Arc<TabletMetadata>,
        clock: &Arc<dyn Clock>,
        messenger: &Arc<dyn Messenger>,
    ) -> TabletResult<Arc<dyn Consensus>>;
}

/// Background-maintenance registration point (compaction, flush scheduling
/// live behind it).
pub trait MaintenanceManager: Send + Sync {
    fn register_ops(&self, storage: &Arc<dyn TabletStorage>);
}

/// Human-readable progress for one replica, updated through bootstrap and
/// lifecycle transitions.
pub struct TabletStatusListener {
    tablet_id: String,
    last_status: Mutex<String>,
}

impl TabletStatusListener {
    fn new(tablet_id: &str) -> Arc<Self> {
        Arc::new(Self {
            tablet_id: tablet_id.to_string(),
            last_status: Mutex::new("initializing".to_string()),
        })
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.last_status.lock().expect("status listener lock") = status.into();
    }

    pub fn last_status(&self) -> String {
        self.last_status.lock().expect("status listener lock").clone()
    }
}

struct ReplicaInner {
    state: TabletState,
    last_error: Option<TabletError>,
    storage: Option<Arc<dyn TabletStorage>>,
    log: Option<Box<dyn WriteAheadLog>>,
    consensus: Option<Arc<dyn Consensus>>,
}

/// State-machine wrapper around one hosted tablet replica.
///
/// Owns the transaction tracker and the bootstrap-produced handles; the
/// registry and any caller that looked the replica up share ownership.
pub struct TabletReplica {
    meta: Arc<TabletMetadata>,
    inner: Mutex<ReplicaInner>,
    txn_tracker: TransactionTracker,
    status_listener: Arc<TabletStatusListener>,
}

impl std::fmt::Debug for TabletReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletReplica")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl TabletReplica {
    pub fn new(meta: Arc<TabletMetadata>) -> Arc<Self> {
        let status_listener = TabletStatusListener::new(meta.tablet_id());
        Arc::new(Self {
            meta,
            inner: Mutex::new(ReplicaInner {
                state: TabletState::Initializing,
                last_error: None,
                storage: None,
                log: None,
                consensus: None,
            }),
            txn_tracker: TransactionTracker::new(),
            status_listener,
        })
    }

    pub fn tablet_id(&self) -> &str {
        self.meta.tablet_id()
    }

    pub fn meta(&self) -> &Arc<TabletMetadata> {
        &self.meta
    }

    pub fn txn_tracker(&self) -> &TransactionTracker {
        &self.txn_tracker
    }

    pub fn status_listener(&self) -> &Arc<TabletStatusListener> {
        &self.status_listener
    }

    pub fn state(&self) -> TabletState {
        self.inner.lock().expect("replica lock").state
    }

    /// The failure recorded when this replica entered `Failed`.
    pub fn last_error(&self) -> Option<TabletError> {
        self.inner.lock().expect("replica lock").last_error.clone()
    }

    pub fn role(&self) -> QuorumRole {
        let inner = self.inner.lock().expect("replica lock");
        match inner.consensus.as_ref() {
            Some(consensus) => consensus.role(),
            None => QuorumRole::NonParticipant,
        }
    }

    /// Schema version served by the open storage handle; absent until the
    /// replica has bootstrapped.
    pub fn schema_version(&self) -> Option<u32> {
        let inner = self.inner.lock().expect("replica lock");
        inner.storage.as_ref().map(|s| s.schema_version())
    }

    /// Enter `Bootstrapping`. Fails if the replica was shut down (or
    /// otherwise moved on) while the bootstrap task sat in the queue.
    pub fn set_bootstrapping(&self) -> TabletResult<()> {
        let mut inner = self.inner.lock().expect("replica lock");
        if inner.state != TabletState::Initializing {
            return Err(TabletError::IllegalState(format!(
                "tablet {} cannot start bootstrapping from {:?}",
                self.tablet_id(),
                inner.state
            )));
        }
        inner.state = TabletState::Bootstrapping;
        drop(inner);
        self.status_listener.set_status("bootstrapping");
        Ok(())
    }

    /// Install the bootstrap-produced handles.
    pub fn init(
        &self,
        storage: Arc<dyn TabletStorage>,
        log: Box<dyn WriteAheadLog>,
        consensus: Arc<dyn Consensus>,
    ) -> TabletResult<()> {
        let mut inner = self.inner.lock().expect("replica lock");
        if inner.state != TabletState::Bootstrapping {
            return Err(TabletError::IllegalState(format!(
                "tablet {} cannot init from {:?}",
                self.tablet_id(),
                inner.state
            )));
        }
        inner.storage = Some(storage);
        inner.log = Some(log);
        inner.consensus = Some(consensus);
        Ok(())
    }

    /// Start consensus and enter `Running`.
    pub fn start(&self, info: &ConsensusBootstrapInfo) -> TabletResult<()> {
        let consensus = {
            let inner = self.inner.lock().expect("replica lock");
            if inner.state != TabletState::Bootstrapping {
                return Err(TabletError::IllegalState(format!(
                    "tablet {} cannot start from {:?}",
                    self.tablet_id(),
                    inner.state
                )));
            }
            inner.consensus.clone().ok_or_else(|| {
                TabletError::IllegalState(format!(
                    "tablet {} started before init",
                    self.tablet_id()
                ))
            })?
        };

        // Consensus start may replicate; keep it outside the state lock.
        consensus.start(info)?;

        let mut inner = self.inner.lock().expect("replica lock");
        if inner.state != TabletState::Bootstrapping {
            return Err(TabletError::IllegalState(format!(
                "tablet {} state changed to {:?} during start",
                self.tablet_id(),
                inner.state
            )));
        }
        inner.state = TabletState::Running;
        drop(inner);
        self.status_listener.set_status("running");
        Ok(())
    }

    /// Record a failure; `last_error` is set exactly here.
    pub fn set_failed(&self, error: TabletError) {
        let mut inner = self.inner.lock().expect("replica lock");
        inner.state = TabletState::Failed;
        inner.last_error = Some(error.clone());
        drop(inner);
        self.status_listener.set_status(format!("failed: {error}"));
    }

    /// Quiesce and shut the replica down, returning the state it held
    /// before this call. Idempotent: a replica already in `Quiescing` or
    /// `Shutdown` is returned as-is, which lets callers detect that they
    /// raced another shutdown.
    pub fn shutdown(&self) -> TabletState {
        let (prev, consensus) = {
            let mut inner = self.inner.lock().expect("replica lock");
            match inner.state {
                TabletState::Quiescing | TabletState::Shutdown => return inner.state,
                prev => {
                    inner.state = TabletState::Quiescing;
                    (prev, inner.consensus.clone())
                }
            }
        };
        self.status_listener.set_status("quiescing");

        // Drain in-flight transactions and stop consensus outside the lock.
        self.txn_tracker.wait_for_all_to_finish();
        if let Some(consensus) = consensus {
            consensus.shutdown();
        }

        let log = {
            let mut inner = self.inner.lock().expect("replica lock");
            inner.state = TabletState::Shutdown;
            inner.storage = None;
            inner.consensus = None;
            inner.log.take()
        };
        if let Some(log) = log {
            if let Err(e) = log.close() {
                info!(
                    "tablet {} log close on shutdown failed: {e}",
                    self.tablet_id()
                );
            }
        }
        self.status_listener.set_status("shut down");
        prev
    }
}
