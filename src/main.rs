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
//! Single-node micarocks daemon.
//!
//! Hosts the tablet control plane over a local data directory. The network
//! surfaces (RPC, consensus transport, coordinator push) are separate
//! components; this binary wires their local stand-ins so a dev node can
//! create tablets and emit reports.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use micarocks::common::error::TabletResult;
use micarocks::fs::LocalFsManager;
use micarocks::micarocks_config;
use micarocks::micarocks_logging::{self, info, warn};
use micarocks::runtime::mem_tracker::process_mem_tracker;
use micarocks::tablet::bootstrap::{BootstrapOutput, TabletBootstrapper};
use micarocks::tablet::manager::{NodeContext, TabletManager};
use micarocks::tablet::metadata::{QuorumRole, TabletMetadata};
use micarocks::tablet::replica::{
    Clock, Consensus, ConsensusBootstrapInfo, ConsensusFactory, MaintenanceManager, Messenger,
    TabletStatusListener, TabletStorage, WriteAheadLog,
};

struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

struct LoopbackMessenger;

impl Messenger for LoopbackMessenger {}

struct LocalStorage {
    tablet_id: String,
    schema_version: u32,
}

impl TabletStorage for LocalStorage {
    fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

struct LocalLog;

impl WriteAheadLog for LocalLog {
    fn close(&self) -> TabletResult<()> {
        Ok(())
    }
}

/// Stand-in bootstrapper for a node without a WAL engine attached: tablets
/// come up empty at their metadata schema version.
struct LocalBootstrapper;

impl TabletBootstrapper for LocalBootstrapper {
    fn bootstrap_tablet(
        &self,
        meta: &Arc<TabletMetadata>,
        _clock: &Arc<dyn Clock>,
        listener: &Arc<TabletStatusListener>,
    ) -> TabletResult<BootstrapOutput> {
        listener.set_status("opening storage");
        Ok(BootstrapOutput {
            storage: Arc::new(LocalStorage {
                tablet_id: meta.tablet_id().to_string(),
                schema_version: meta.schema_version(),
            }),
            log: Box::new(LocalLog),
            bootstrap_info: ConsensusBootstrapInfo::default(),
        })
    }
}

/// Single-node consensus: this node leads every local quorum.
struct LocalConsensus {
    role: QuorumRole,
}

impl Consensus for LocalConsensus {
    fn start(&self, _info: &ConsensusBootstrapInfo) -> TabletResult<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn role(&self) -> QuorumRole {
        self.role
    }
}

struct LocalConsensusFactory {
    node_uuid: String,
}

impl ConsensusFactory for LocalConsensusFactory {
    fn create(
        &self,
        meta: &Arc<TabletMetadata>,
        _clock: &Arc<dyn Clock>,
        _messenger: &Arc<dyn Messenger>,
    ) -> TabletResult<Arc<dyn Consensus>> {
        let leads = meta
            .quorum()
            .peers
            .iter()
            .any(|p| p.permanent_uuid == self.node_uuid && p.role == QuorumRole::Leader);
        Ok(Arc::new(LocalConsensus {
            role: if leads {
                QuorumRole::Leader
            } else {
                QuorumRole::Follower
            },
        }))
    }
}

struct LoggingMaintenanceManager;

impl MaintenanceManager for LoggingMaintenanceManager {
    fn register_ops(&self, storage: &Arc<dyn TabletStorage>) {
        info!(
            "registered maintenance operations for tablet {}",
            storage.tablet_id()
        );
    }
}

fn run() -> Result<()> {
    let cfg = match std::env::args().nth(1) {
        Some(path) => micarocks_config::init_from_path(path)?,
        None => micarocks_config::config()?,
    };
    micarocks_logging::init(cfg.log.effective_filter());

    let node_uuid = format!("micarocks-{}", cfg.server.host);
    let fs = Arc::new(
        LocalFsManager::open(&cfg.server.data_dir)
            .with_context(|| format!("open data dir {}", cfg.server.data_dir))?,
    );

    let ctx = NodeContext {
        node_uuid: node_uuid.clone(),
        clock: Arc::new(SystemClock),
        messenger: Arc::new(LoopbackMessenger),
        bootstrapper: Arc::new(LocalBootstrapper),
        consensus_factory: Arc::new(LocalConsensusFactory { node_uuid }),
        maintenance_manager: Arc::new(LoggingMaintenanceManager),
        parent_mem_tracker: process_mem_tracker(),
    };

    let manager = TabletManager::new(fs, ctx, cfg.tablet.clone());
    manager.init().context("initialize tablet manager")?;
    if let Err(e) = manager.wait_for_all_bootstraps_to_finish() {
        warn!("at least one tablet failed to bootstrap: {e}");
    }

    let full = manager.generate_full_tablet_report();
    info!(
        "tablet manager running with {} tablets; full report: {}",
        full.updated_tablets.len(),
        serde_json::to_string(&full).context("encode report")?
    );

    let interval = Duration::from_secs(cfg.server.report_interval_secs.max(1));
    loop {
        std::thread::sleep(interval);
        let report = manager.generate_incremental_tablet_report();
        if report.is_empty() {
            continue;
        }
        info!(
            "incremental tablet report: {}",
            serde_json::to_string(&report).context("encode report")?
        );
        // Stands in for the coordinator round-trip.
        manager.mark_tablet_report_acknowledged(report.sequence_number);
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("micarocks failed to start: {e:#}");
        std::process::exit(1);
    }
}
