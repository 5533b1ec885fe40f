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

use serde::{Deserialize, Serialize};

use crate::common::error::{TabletError, TabletResult};
use crate::fs::{BlockId, FsManager};

/// Role a peer plays within a tablet's replication group.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QuorumRole {
    Leader,
    Follower,
    Learner,
    NonParticipant,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct QuorumPeer {
    pub permanent_uuid: String,
    pub role: QuorumRole,
}

/// Replication group configuration for one tablet.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Quorum {
    /// True for a single-node group using local consensus.
    pub local: bool,
    pub seqno: i64,
    pub peers: Vec<QuorumPeer>,
}

impl Quorum {
    pub fn local_quorum(peer_uuid: impl Into<String>) -> Self {
        Self {
            local: true,
            seqno: -1,
            peers: vec![QuorumPeer {
                permanent_uuid: peer_uuid.into(),
                role: QuorumRole::Leader,
            }],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub type_name: String,
}

/// Table schema as carried through metadata; interpretation belongs to the
/// storage engine.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TabletSchema {
    pub columns: Vec<ColumnSchema>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct TabletMetadataRecord {
    table_id: String,
    tablet_id: String,
    table_name: String,
    schema_version: u32,
    start_key: String,
    end_key: String,
    schema: TabletSchema,
    quorum: Quorum,
    block_a: BlockId,
    block_b: BlockId,
}

/// The per-tablet record persisted in the metadata directory: identity,
/// key range, schema, quorum, and the two data block ids.
#[derive(Debug)]
pub struct TabletMetadata {
    record: TabletMetadataRecord,
}

impl TabletMetadata {
    /// Build metadata for a brand-new tablet, minting its block ids.
    /// Nothing is written to disk until `persist`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_new(
        fs: &dyn FsManager,
        table_id: &str,
        tablet_id: &str,
        table_name: &str,
        schema: TabletSchema,
        quorum: Quorum,
        start_key: &str,
        end_key: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            record: TabletMetadataRecord {
                table_id: table_id.to_string(),
                tablet_id: tablet_id.to_string(),
                table_name: table_name.to_string(),
                schema_version: 0,
                start_key: start_key.to_string(),
                end_key: end_key.to_string(),
                schema,
                quorum,
                block_a: fs.generate_block_id(),
                block_b: fs.generate_block_id(),
            },
        })
    }

    pub fn load(fs: &dyn FsManager, tablet_id: &str) -> TabletResult<Arc<Self>> {
        let bytes = fs.read_metadata_file(tablet_id)?;
        let record: TabletMetadataRecord = serde_json::from_slice(&bytes).map_err(|e| {
            TabletError::corruption(format!("parse metadata record for tablet {tablet_id}"), e)
        })?;
        if record.tablet_id != tablet_id {
            return Err(TabletError::Corruption(format!(
                "metadata record for tablet {tablet_id} names tablet {}",
                record.tablet_id
            )));
        }
        Ok(Arc::new(Self { record }))
    }

    pub fn persist(&self, fs: &dyn FsManager) -> TabletResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.record).map_err(|e| {
            TabletError::corruption(
                format!("encode metadata record for tablet {}", self.record.tablet_id),
                e,
            )
        })?;
        fs.write_metadata_file(&self.record.tablet_id, &bytes)
    }

    pub fn tablet_id(&self) -> &str {
        &self.record.tablet_id
    }

    pub fn table_id(&self) -> &str {
        &self.record.table_id
    }

    pub fn table_name(&self) -> &str {
        &self.record.table_name
    }

    pub fn schema_version(&self) -> u32 {
        self.record.schema_version
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.record.schema
    }

    pub fn quorum(&self) -> &Quorum {
        &self.record.quorum
    }

    pub fn start_key(&self) -> &str {
        &self.record.start_key
    }

    pub fn end_key(&self) -> &str {
        &self.record.end_key
    }

    pub fn block_a(&self) -> &BlockId {
        &self.record.block_a
    }

    pub fn block_b(&self) -> &BlockId {
        &self.record.block_b
    }
}
