// Copyright 2025 larder Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{borrow::Cow, collections::HashMap, fmt::Debug, sync::Arc};

use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::metrics::{
    BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, BoxedHistogram, BoxedHistogramVec, Boxer, CounterOps,
    CounterVecOps, GaugeOps, GaugeVecOps, HistogramOps, HistogramVecOps, RegistryOps,
};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Metadata {
    name: Cow<'static, str>,
    desc: Cow<'static, str>,
    label_names: &'static [&'static str],
}

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
    Histogram(HistogramVec),
}

/// Prometheus metrics registry.
///
/// Metric vectors are registered lazily and deduplicated by name, so several
/// caches can share one registry.
#[derive(Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Registry,
    metrics: Arc<Mutex<HashMap<Metadata, MetricVec>>>,
}

impl Debug for PrometheusMetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricsRegistry").finish()
    }
}

impl PrometheusMetricsRegistry {
    /// Create a Prometheus metrics registry on `registry`.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn get_or_register_counter_vec(&self, metadata: Metadata) -> IntCounterVec {
        let vec = self
            .metrics
            .lock()
            .entry(metadata.clone())
            .or_insert_with(|| {
                let vec = IntCounterVec::new(
                    Opts::new(metadata.name.clone().into_owned(), metadata.desc.into_owned()),
                    metadata.label_names,
                )
                .unwrap();
                self.registry.register(Box::new(vec.clone())).unwrap();
                MetricVec::Counter(vec)
            })
            .clone();
        match vec {
            MetricVec::Counter(v) => v,
            _ => unreachable!(),
        }
    }

    fn get_or_register_gauge_vec(&self, metadata: Metadata) -> IntGaugeVec {
        let vec = self
            .metrics
            .lock()
            .entry(metadata.clone())
            .or_insert_with(|| {
                let vec = IntGaugeVec::new(
                    Opts::new(metadata.name.clone().into_owned(), metadata.desc.into_owned()),
                    metadata.label_names,
                )
                .unwrap();
                self.registry.register(Box::new(vec.clone())).unwrap();
                MetricVec::Gauge(vec)
            })
            .clone();
        match vec {
            MetricVec::Gauge(v) => v,
            _ => unreachable!(),
        }
    }

    fn get_or_register_histogram_vec(&self, metadata: Metadata) -> HistogramVec {
        let vec = self
            .metrics
            .lock()
            .entry(metadata.clone())
            .or_insert_with(|| {
                let vec = HistogramVec::new(
                    HistogramOpts::new(metadata.name.clone().into_owned(), metadata.desc.into_owned()),
                    metadata.label_names,
                )
                .unwrap();
                self.registry.register(Box::new(vec.clone())).unwrap();
                MetricVec::Histogram(vec)
            })
            .clone();
        match vec {
            MetricVec::Histogram(v) => v,
            _ => unreachable!(),
        }
    }
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as i64);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as i64);
    }

    fn absolute(&self, val: u64) {
        self.set(val as i64);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl HistogramOps for Histogram {
    fn record(&self, val: f64) {
        self.observe(val);
    }
}

impl HistogramVecOps for HistogramVec {
    fn histogram(&self, labels: &[Cow<'static, str>]) -> BoxedHistogram {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: impl Into<Cow<'static, str>>,
        desc: impl Into<Cow<'static, str>>,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        self.get_or_register_counter_vec(Metadata {
            name: name.into(),
            desc: desc.into(),
            label_names,
        })
        .boxed()
    }

    fn register_gauge_vec(
        &self,
        name: impl Into<Cow<'static, str>>,
        desc: impl Into<Cow<'static, str>>,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        self.get_or_register_gauge_vec(Metadata {
            name: name.into(),
            desc: desc.into(),
            label_names,
        })
        .boxed()
    }

    fn register_histogram_vec(
        &self,
        name: impl Into<Cow<'static, str>>,
        desc: impl Into<Cow<'static, str>>,
        label_names: &'static [&'static str],
    ) -> BoxedHistogramVec {
        self.get_or_register_histogram_vec(Metadata {
            name: name.into(),
            desc: desc.into(),
            label_names,
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test() {
        let p8s = PrometheusMetricsRegistry::new(Registry::new());

        let cv = p8s.register_counter_vec("test_counter_1", "test counter 1", &["label1", "label2"]);
        let c = cv.counter(&["l1".into(), "l2".into()]);
        c.increase(42);

        let gv = p8s.register_gauge_vec("test_gauge_1", "test gauge 1", &["label1", "label2"]);
        let g = gv.gauge(&["l1".into(), "l2".into()]);
        g.increase(514);
        g.decrease(114);
        g.absolute(114514);

        let hv = p8s.register_histogram_vec("test_histogram_1", "test histogram 1", &["label1", "label2"]);
        let h = hv.histogram(&["l1".into(), "l2".into()]);
        h.record(114.514);

        // registering the same series twice must reuse the existing vector
        let _ = p8s.register_counter_vec("test_counter_1", "test counter 1", &["label1", "label2"]);
    }
}
