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
//! In-process gauges and counters bound to a naming context.
//!
//! This is accounting only; export/scrape backends are out of scope for this
//! layer, so values are read back through `snapshot()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// A gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct IntGauge {
    value: AtomicI64,
}

impl IntGauge {
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
enum Metric {
    Gauge(Arc<IntGauge>),
    Counter(Arc<Counter>),
}

/// One named metric scope, e.g. `tablet` with a `tablet_id` attribute.
///
/// Registering the same name twice returns the existing instrument, so
/// re-attachment after a restart of the owning component is harmless.
#[derive(Debug)]
pub struct MetricEntity {
    name: String,
    attrs: BTreeMap<String, String>,
    metrics: Mutex<BTreeMap<String, Metric>>,
}

impl MetricEntity {
    pub fn new(name: impl Into<String>, attrs: BTreeMap<String, String>) -> Arc<Self> {
        let entity = Arc::new(Self {
            name: name.into(),
            attrs,
            metrics: Mutex::new(BTreeMap::new()),
        });
        registry().register(&entity);
        entity
    }

    pub fn for_tablet(tablet_id: &str) -> Arc<Self> {
        let mut attrs = BTreeMap::new();
        attrs.insert("tablet_id".to_string(), tablet_id.to_string());
        Self::new("tablet", attrs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn int_gauge(&self, name: &str) -> Arc<IntGauge> {
        let mut metrics = self.metrics.lock().expect("metric entity lock");
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Gauge(Arc::new(IntGauge::default())))
        {
            Metric::Gauge(gauge) => Arc::clone(gauge),
            Metric::Counter(_) => panic!(
                "metric {} already registered as a counter on entity {}",
                name, self.name
            ),
        }
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut metrics = self.metrics.lock().expect("metric entity lock");
        match metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Counter(Arc::new(Counter::default())))
        {
            Metric::Counter(counter) => Arc::clone(counter),
            Metric::Gauge(_) => panic!(
                "metric {} already registered as a gauge on entity {}",
                name, self.name
            ),
        }
    }

    /// Current values of every registered instrument.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        let metrics = self.metrics.lock().expect("metric entity lock");
        metrics
            .iter()
            .map(|(name, metric)| {
                let value = match metric {
                    Metric::Gauge(gauge) => gauge.value(),
                    Metric::Counter(counter) => i64::try_from(counter.value()).unwrap_or(i64::MAX),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// Process-wide list of live metric entities.
#[derive(Default)]
pub struct MetricRegistry {
    entities: Mutex<Vec<Weak<MetricEntity>>>,
}

impl MetricRegistry {
    fn register(&self, entity: &Arc<MetricEntity>) {
        let mut entities = self.entities.lock().expect("metric registry lock");
        entities.retain(|weak| weak.strong_count() > 0);
        entities.push(Arc::downgrade(entity));
    }

    pub fn entities(&self) -> Vec<Arc<MetricEntity>> {
        let entities = self.entities.lock().expect("metric registry lock");
        entities.iter().filter_map(Weak::upgrade).collect()
    }
}

static REGISTRY: OnceLock<MetricRegistry> = OnceLock::new();

pub fn registry() -> &'static MetricRegistry {
    REGISTRY.get_or_init(MetricRegistry::default)
}
