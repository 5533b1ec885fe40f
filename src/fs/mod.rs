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
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::common::error::{TabletError, TabletResult};

/// Opaque identifier for a data block allocated to a tablet.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem surface the tablet layer depends on: enumerate the metadata
/// directory, read and replace named metadata records, and mint block ids.
pub trait FsManager: Send + Sync {
    /// Tablet ids that have a metadata record on disk.
    fn list_tablet_metadata(&self) -> TabletResult<Vec<String>>;

    fn read_metadata_file(&self, tablet_id: &str) -> TabletResult<Vec<u8>>;

    fn write_metadata_file(&self, tablet_id: &str, data: &[u8]) -> TabletResult<()>;

    fn generate_block_id(&self) -> BlockId;
}

/// `FsManager` over a local directory tree. Metadata records live under
/// `<root>/meta`, one file per tablet named by the tablet id.
pub struct LocalFsManager {
    root: PathBuf,
}

impl LocalFsManager {
    pub fn open(root: impl Into<PathBuf>) -> TabletResult<Self> {
        let root = root.into();
        let meta_dir = root.join("meta");
        fs::create_dir_all(&meta_dir)
            .map_err(|e| TabletError::io(format!("create {}", meta_dir.display()), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    fn metadata_path(&self, tablet_id: &str) -> PathBuf {
        self.meta_dir().join(tablet_id)
    }

    fn is_metadata_file_name(name: &str) -> bool {
        !name.is_empty() && !name.starts_with('.') && !name.ends_with(".tmp")
    }
}

impl FsManager for LocalFsManager {
    fn list_tablet_metadata(&self) -> TabletResult<Vec<String>> {
        let meta_dir = self.meta_dir();
        let entries = fs::read_dir(&meta_dir)
            .map_err(|e| TabletError::io(format!("list {}", meta_dir.display()), e))?;
        let mut tablets = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| TabletError::io(format!("list {}", meta_dir.display()), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_metadata_file_name(&name) {
                tablets.push(name);
            }
        }
        tablets.sort();
        Ok(tablets)
    }

    fn read_metadata_file(&self, tablet_id: &str) -> TabletResult<Vec<u8>> {
        let path = self.metadata_path(tablet_id);
        fs::read(&path).map_err(|e| TabletError::io(format!("read {}", path.display()), e))
    }

    fn write_metadata_file(&self, tablet_id: &str, data: &[u8]) -> TabletResult<()> {
        // Write-then-rename so a crash mid-persist never leaves a torn
        // record for the next startup scan to choke on.
        let path = self.metadata_path(tablet_id);
        let tmp = self.meta_dir().join(format!("{tablet_id}.tmp"));
        fs::write(&tmp, data).map_err(|e| TabletError::io(format!("write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| TabletError::io(format!("rename {} -> {}", tmp.display(), path.display()), e))
    }

    fn generate_block_id(&self) -> BlockId {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut hex = String::with_capacity(32);
        for b in bytes {
            hex.push_str(&format!("{b:02x}"));
        }
        BlockId(hex)
    }
}
