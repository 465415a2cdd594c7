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

use super::{BoxedCounter, BoxedGauge, RegistryOps};
use crate::metrics::registry::noop::NoopMetricsRegistry;

/// Metric series of the cache engine.
#[derive(Debug)]
pub struct Metrics {
    /* cache service metrics */
    /// Entries inserted with a fresh key.
    pub cache_insert: BoxedCounter,
    /// Entries inserted over an existing key.
    pub cache_replace: BoxedCounter,
    /// In-place or reallocating updates of an existing entry.
    pub cache_update: BoxedCounter,
    /// Lookups served from a live slot.
    pub cache_hit: BoxedCounter,
    /// Lookups that found nothing usable.
    pub cache_miss: BoxedCounter,
    /// Entries removed by the caller.
    pub cache_remove: BoxedCounter,

    /// Current key-map entry count, refreshed on mutation and sweep.
    pub cache_entries: BoxedGauge,

    /* memory engine metrics */
    /// Pointers freed by the expiration sweep.
    pub memory_expire: BoxedCounter,
    /// Pointers freed by the LFU sweep.
    pub memory_evict: BoxedCounter,
    /// Whole-buffer clears performed by sweeps.
    pub memory_clear: BoxedCounter,

    /// Bytes consumed from buffer cursors.
    pub memory_used: BoxedGauge,
    /// Bytes referenced by live pointers.
    pub memory_live: BoxedGauge,
    /// Total off-heap capacity.
    pub memory_capacity: BoxedGauge,
}

impl Metrics {
    /// Create a metrics model with the given cache name on the registry.
    pub fn new<R>(name: &'static str, registry: &R) -> Self
    where
        R: RegistryOps,
    {
        let cache_op_total =
            registry.register_counter_vec("larder_cache_op_total", "larder cache service operations", &["name", "op"]);
        let cache_entries = registry.register_gauge_vec("larder_cache_entries", "larder cache entry count", &["name"]);

        let memory_op_total = registry.register_counter_vec(
            "larder_memory_op_total",
            "larder off-heap engine operations",
            &["name", "op"],
        );
        let memory_bytes =
            registry.register_gauge_vec("larder_memory_bytes", "larder off-heap byte figures", &["name", "type"]);

        let cache_insert = cache_op_total.counter(&[name.into(), "insert".into()]);
        let cache_replace = cache_op_total.counter(&[name.into(), "replace".into()]);
        let cache_update = cache_op_total.counter(&[name.into(), "update".into()]);
        let cache_hit = cache_op_total.counter(&[name.into(), "hit".into()]);
        let cache_miss = cache_op_total.counter(&[name.into(), "miss".into()]);
        let cache_remove = cache_op_total.counter(&[name.into(), "remove".into()]);

        let cache_entries = cache_entries.gauge(&[name.into()]);

        let memory_expire = memory_op_total.counter(&[name.into(), "expire".into()]);
        let memory_evict = memory_op_total.counter(&[name.into(), "evict".into()]);
        let memory_clear = memory_op_total.counter(&[name.into(), "clear".into()]);

        let memory_used = memory_bytes.gauge(&[name.into(), "used".into()]);
        let memory_live = memory_bytes.gauge(&[name.into(), "live".into()]);
        let memory_capacity = memory_bytes.gauge(&[name.into(), "capacity".into()]);

        Self {
            cache_insert,
            cache_replace,
            cache_update,
            cache_hit,
            cache_miss,
            cache_remove,
            cache_entries,
            memory_expire,
            memory_evict,
            memory_clear,
            memory_used,
            memory_live,
            memory_capacity,
        }
    }

    /// Create a metrics model that records nothing.
    pub fn noop() -> Self {
        Self::new("noop", &NoopMetricsRegistry)
    }
}
