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
use serde::{Deserialize, Serialize};

use crate::tablet::metadata::QuorumRole;
use crate::tablet::replica::TabletState;

/// One tablet's entry in a report to the coordinator.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReportedTablet {
    pub tablet_id: String,
    pub state: TabletState,
    pub role: QuorumRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

/// Wire payload pulled by the coordinator. Sequence numbers are strictly
/// monotonic and gap-free for the lifetime of one tablet manager.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TabletReport {
    pub sequence_number: u32,
    pub is_incremental: bool,
    pub updated_tablets: Vec<ReportedTablet>,
    pub removed_tablet_ids: Vec<String>,
}

impl TabletReport {
    pub fn is_empty(&self) -> bool {
        self.updated_tablets.is_empty() && self.removed_tablet_ids.is_empty()
    }
}
