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
use std::sync::Arc;

use crate::common::error::TabletResult;
use crate::tablet::metadata::TabletMetadata;
use crate::tablet::replica::{
    Clock, ConsensusBootstrapInfo, TabletStatusListener, TabletStorage, WriteAheadLog,
};

/// Everything log replay hands back for one tablet: the open storage
/// handle, the write-ahead log positioned for appends, and the state
/// consensus resumes from.
pub struct BootstrapOutput {
    pub storage: Arc<dyn TabletStorage>,
    pub log: Box<dyn WriteAheadLog>,
    pub bootstrap_info: ConsensusBootstrapInfo,
}

/// Reconstructs a replica's durable state from metadata and the on-disk
/// log. The heavy lifting (segment scanning, replay) lives behind this
/// seam; callers only see the assembled output or an error that fails the
/// replica.
pub trait TabletBootstrapper: Send + Sync {
    fn bootstrap_tablet(
        &self,
        meta: &Arc<TabletMetadata>,
        clock: &Arc<dyn Clock>,
        listener: &Arc<TabletStatusListener>,
    ) -> TabletResult<BootstrapOutput>;
}
