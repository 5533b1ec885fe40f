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
//! Process-wide logging in glog's line format:
//! `Lyyyymmdd hh:mm:ss.uuuuuu thread file:line] message`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

static NEXT_THREAD_ORDINAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ORDINAL: u64 = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
}

/// Small dense id for the calling thread, assigned on first log line.
fn thread_ordinal() -> u64 {
    THREAD_ORDINAL.with(|ordinal| *ordinal)
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

struct CompactGlogFormat;

impl<S, N> FormatEvent<S, N> for CompactGlogFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        // The level names all start with their glog tag letter.
        let tag = meta.level().as_str().as_bytes()[0] as char;
        let location = meta.file().map(basename).unwrap_or_else(|| meta.target());

        write!(
            writer,
            "{tag}{} {} {location}:{}] ",
            Local::now().format("%Y%m%d %H:%M:%S%.6f"),
            thread_ordinal(),
            meta.line().unwrap_or(0),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. `filter` is either a bare level ("info")
/// or a full `EnvFilter` expression ("micarocks=debug,info"). Idempotent;
/// later calls keep the first configuration.
pub fn init(filter: &str) {
    INSTALLED.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            // Colors only on a real terminal; redirected logs stay plain.
            .with_ansi(atty::is(atty::Stream::Stderr))
            .event_format(CompactGlogFormat)
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .try_init();
    });
}

pub use tracing::{debug, error, info, trace, warn};
