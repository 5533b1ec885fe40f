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
use std::sync::atomic::{AtomicBool, Ordering};

use threadpool::ThreadPool;

use crate::common::error::{TabletError, TabletResult};

/// Bounded-concurrency task executor.
///
/// Submissions after `shutdown` are refused with `ServiceUnavailable`;
/// tasks already queued still run to completion before `shutdown` returns.
pub struct WorkPool {
    name: String,
    pool: ThreadPool,
    shut_down: AtomicBool,
}

impl WorkPool {
    pub fn new(name: impl Into<String>, num_threads: usize) -> Self {
        let name = name.into();
        let threads = num_threads.max(1);
        let pool = ThreadPool::with_name(name.clone(), threads);
        Self {
            name,
            pool,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn submit<F>(&self, task: F) -> TabletResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TabletError::ServiceUnavailable(format!(
                "work pool {} is shut down",
                self.name
            )));
        }
        self.pool.execute(task);
        Ok(())
    }

    /// Block until every queued and running task has completed.
    pub fn wait(&self) {
        self.pool.join();
    }

    /// Stop accepting new tasks, then drain the queue. Idempotent.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.pool.join();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
