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
use std::io;

use thiserror::Error;

/// Errors surfaced by the tablet-hosting layer.
///
/// Every variant is `Clone` so a replica can hold its failure as `last_error`
/// while the same error is cloned into bootstrap-wait results and reports.
/// I/O and corruption failures therefore carry the underlying error rendered
/// into the message rather than a `#[source]` chain.
#[derive(Clone, Debug, Error)]
pub enum TabletError {
    #[error("already present: {0}")]
    AlreadyPresent(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("timed out: {0}")]
    TimedOut(String),
    #[error("io error: {0}")]
    IoError(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
}

pub type TabletResult<T> = Result<T, TabletError>;

impl TabletError {
    pub fn io(context: impl Into<String>, err: io::Error) -> Self {
        TabletError::IoError(format!("{}: {err}", context.into()))
    }

    pub fn corruption(context: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        TabletError::Corruption(format!("{}: {detail}", context.into()))
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, TabletError::AlreadyPresent(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TabletError::NotFound(_))
    }

    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, TabletError::ServiceUnavailable(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, TabletError::TimedOut(_))
    }
}

#[cfg(test)]
mod tests {
    use super::TabletError;

    #[test]
    fn io_error_carries_context_and_cause() {
        let err = TabletError::io(
            "read metadata record",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("read metadata record"), "{msg}");
        assert!(msg.contains("gone"), "{msg}");
    }

    #[test]
    fn kind_predicates_match_variants() {
        assert!(TabletError::AlreadyPresent("t".into()).is_already_present());
        assert!(TabletError::NotFound("t".into()).is_not_found());
        assert!(TabletError::ServiceUnavailable("t".into()).is_service_unavailable());
        assert!(!TabletError::Corruption("t".into()).is_timed_out());
    }
}
