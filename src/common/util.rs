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
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter for repetitive log lines.
///
/// `should_log` returns `Some(suppressed)` at most once per interval, where
/// `suppressed` is the number of calls swallowed since the last emitted line.
pub struct LogThrottler {
    min_interval: Duration,
    last_logged: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl LogThrottler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_logged: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn should_log(&self) -> Option<u64> {
        let mut last = self.last_logged.lock().expect("log throttler lock");
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                *last = Some(now);
                Some(self.suppressed.swap(0, Ordering::Relaxed))
            }
        }
    }
}

/// Append-only annotation buffer for one long-running task.
///
/// Each annotation records its offset from the buffer's creation; `dump`
/// renders the whole timeline for slow-startup warnings.
pub struct TraceBuffer {
    start: Instant,
    events: Mutex<Vec<(Duration, String)>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn annotate(&self, msg: impl Into<String>) {
        let at = self.start.elapsed();
        self.events
            .lock()
            .expect("trace buffer lock")
            .push((at, msg.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn dump(&self) -> String {
        let events = self.events.lock().expect("trace buffer lock");
        let mut out = String::new();
        for (at, msg) in events.iter() {
            let _ = writeln!(out, "{:>10.3}ms] {}", at.as_secs_f64() * 1000.0, msg);
        }
        out
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}
