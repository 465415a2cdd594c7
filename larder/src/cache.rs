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

use std::{sync::Arc, time::Duration};

use bytesize::ByteSize;
use hashbrown::HashMap;
use itertools::Itertools;
use larder_common::{
    bits,
    code::{CacheValue, TypeTag},
    metrics::Metrics,
};
use larder_memory::{BufferStats, MemoryManager, MemoryManagerConfig, Pointer};
use parking_lot::{Mutex, RwLock};
use twox_hash::XxHash64;

use crate::{
    error::{Error, Result},
    serde::{Compression, ValueDeserializer, ValueSerializer},
    sweeper::{Sweeper, SweeperHandle},
};

/// Builder of a [`Cache`].
///
/// All sizing is fixed at build time; buffers are neither added nor resized
/// afterwards.
#[derive(Debug)]
pub struct CacheBuilder {
    name: &'static str,
    buffers: usize,
    buffer_capacity: usize,
    shards: usize,
    initial_capacity: usize,
    fill_threshold: f64,
    disposal_interval: Duration,
    compression: Compression,
    metrics: Option<Arc<Metrics>>,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    /// Create a builder with the default configuration: one 64 MiB buffer,
    /// 64 map shards, 0.9 fill threshold, 10 s disposal interval, no
    /// compression.
    pub fn new() -> Self {
        Self {
            name: "larder",
            buffers: 1,
            buffer_capacity: 64 * 1024 * 1024,
            shards: 64,
            initial_capacity: 0,
            fill_threshold: 0.9,
            disposal_interval: Duration::from_secs(10),
            compression: Compression::None,
            metrics: None,
        }
    }

    /// Set the cache name, used in logs and metric labels.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the number of off-heap buffers.
    pub fn with_buffers(mut self, buffers: usize) -> Self {
        self.buffers = buffers;
        self
    }

    /// Set the capacity of each off-heap buffer in bytes.
    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Set the key-map shard count. Must be a power of two.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the initial key-map capacity hint, spread across the shards.
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Set the buffer fill ratio above which the LFU sweep reclaims.
    pub fn with_fill_threshold(mut self, fill_threshold: f64) -> Self {
        self.fill_threshold = fill_threshold;
        self
    }

    /// Set the recurring disposal interval used by
    /// [`Cache::schedule_disposal`].
    pub fn with_disposal_interval(mut self, disposal_interval: Duration) -> Self {
        self.disposal_interval = disposal_interval;
        self
    }

    /// Set the value compression algorithm.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the metric series to report on. Defaults to a no-op model.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<Cache> {
        if !bits::is_pow2(self.shards) {
            return Err(Error::ConfigError(format!(
                "shards must be a power of 2, given: {}",
                self.shards
            )));
        }

        let metrics = self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop()));
        let manager = MemoryManager::new(MemoryManagerConfig {
            buffers: self.buffers,
            buffer_capacity: self.buffer_capacity,
            fill_threshold: self.fill_threshold,
            metrics: metrics.clone(),
        })?;

        let shards = (0..self.shards)
            .map(|_| RwLock::new(HashMap::with_capacity(self.initial_capacity / self.shards)))
            .collect_vec();

        tracing::info!(
            "[cache]: {} initialized, buffers: {}, buffer capacity: {}, shards: {}",
            self.name,
            self.buffers,
            ByteSize::b(self.buffer_capacity as u64),
            self.shards,
        );

        Ok(Cache {
            inner: Arc::new(CacheInner {
                name: self.name,
                shards,
                manager,
                compression: self.compression,
                disposal_interval: self.disposal_interval,
                metrics,
                sweeper: Mutex::new(None),
            }),
        })
    }
}

pub(crate) struct CacheInner {
    name: &'static str,
    shards: Vec<RwLock<HashMap<String, Arc<Pointer>>>>,
    manager: MemoryManager,
    compression: Compression,
    disposal_interval: Duration,
    metrics: Arc<Metrics>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

/// The off-heap cache service.
///
/// Binds string keys to slot pointers in a sharded concurrent map, delegates
/// byte storage to the [`MemoryManager`] and value coding to the bincode
/// codec, and drives the background disposal cycle.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("name", &self.inner.name).finish()
    }
}

impl Cache {
    /// Create a builder with the default configuration.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<CacheInner>) -> Self {
        Self { inner }
    }

    fn shard_of(&self, key: &str) -> usize {
        (self.inner.shards.len() - 1) & XxHash64::oneshot(0, key.as_bytes()) as usize
    }

    /// Serialize `value` and store it under `key` without expiration.
    ///
    /// Any previous mapping for `key` is displaced; its bytes stay orphaned
    /// until a sweep reclaims the buffer.
    pub fn put<T>(&self, key: impl Into<String>, value: &T) -> Result<Arc<Pointer>>
    where
        T: CacheValue,
    {
        self.put_inner(key.into(), value, None)
    }

    /// Serialize `value` and store it under `key` with a time-to-live.
    ///
    /// A zero `ttl` means the entry never expires.
    pub fn put_with_ttl<T>(&self, key: impl Into<String>, value: &T, ttl: Duration) -> Result<Arc<Pointer>>
    where
        T: CacheValue,
    {
        self.put_inner(key.into(), value, Some(ttl))
    }

    /// Store raw `bytes` under `key` without expiration.
    pub fn put_bytes(&self, key: impl Into<String>, bytes: &[u8]) -> Result<Arc<Pointer>> {
        self.insert(key.into(), bytes, None, TypeTag::bytes())
    }

    /// Store raw `bytes` under `key` with a time-to-live.
    pub fn put_bytes_with_ttl(&self, key: impl Into<String>, bytes: &[u8], ttl: Duration) -> Result<Arc<Pointer>> {
        self.insert(key.into(), bytes, Some(ttl), TypeTag::bytes())
    }

    fn put_inner<T>(&self, key: String, value: &T, ttl: Option<Duration>) -> Result<Arc<Pointer>>
    where
        T: CacheValue,
    {
        let bytes = match ValueSerializer::serialize(value, self.inner.compression) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("[cache]: failed to encode value for key {key}: {e}");
                return Err(e);
            }
        };
        self.insert(key, &bytes, ttl, TypeTag::of::<T>())
    }

    fn insert(&self, key: String, bytes: &[u8], ttl: Option<Duration>, tag: TypeTag) -> Result<Arc<Pointer>> {
        let pointer = self.inner.manager.store(bytes, ttl, tag)?;
        let shard = self.shard_of(&key);
        let displaced = self.inner.shards[shard].write().insert(key, pointer.clone());
        match displaced {
            Some(old) => {
                // the old slot is orphaned; marking it free keeps the sweep
                // accounting exact
                self.inner.manager.free(&old);
                self.inner.metrics.cache_replace.increase(1);
            }
            None => {
                self.inner.metrics.cache_insert.increase(1);
                self.inner.metrics.cache_entries.increase(1);
            }
        }
        Ok(pointer)
    }

    /// Serialize `value` and replace the payload of the existing entry for
    /// `key`.
    ///
    /// Fails with [`Error::MissingKey`] when `key` has no live entry —
    /// updating a missing entry is a contract violation, not an implicit
    /// insert.
    pub fn update<T>(&self, key: &str, value: &T) -> Result<Arc<Pointer>>
    where
        T: CacheValue,
    {
        let bytes = match ValueSerializer::serialize(value, self.inner.compression) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("[cache]: failed to encode value for key {key}: {e}");
                return Err(e);
            }
        };
        self.replace(key, &bytes, TypeTag::of::<T>())
    }

    /// Replace the payload of the existing entry for `key` with raw `bytes`.
    pub fn update_bytes(&self, key: &str, bytes: &[u8]) -> Result<Arc<Pointer>> {
        self.replace(key, bytes, TypeTag::bytes())
    }

    fn replace(&self, key: &str, bytes: &[u8], tag: TypeTag) -> Result<Arc<Pointer>> {
        let shard = self.shard_of(key);
        let mut guard = self.inner.shards[shard].write();

        let Some(pointer) = guard.get(key).cloned() else {
            return Err(Error::MissingKey { key: key.to_string() });
        };
        if pointer.is_free() || pointer.expired(self.inner.manager.now_us()) {
            guard.remove(key);
            drop(guard);
            self.inner.manager.free(&pointer);
            self.inner.metrics.cache_entries.decrease(1);
            return Err(Error::MissingKey { key: key.to_string() });
        }

        let updated = self.inner.manager.update(&pointer, bytes, tag)?;
        if !Arc::ptr_eq(&pointer, &updated) {
            guard.insert(key.to_string(), updated.clone());
        }
        self.inner.metrics.cache_update.increase(1);
        Ok(updated)
    }

    /// Look up `key` and decode the payload as `T`.
    ///
    /// A free or expired pointer is removed and freed at detection time and
    /// reported as a miss. A shape-tag mismatch or decode failure is logged
    /// and reported as a miss, never propagated.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: CacheValue,
    {
        let Some((bytes, tag)) = self.lookup(key) else {
            self.inner.metrics.cache_miss.increase(1);
            return None;
        };
        if tag != TypeTag::of::<T>() {
            tracing::error!("[cache]: shape tag mismatch for key {key}: stored {tag:?}");
            self.inner.metrics.cache_miss.increase(1);
            return None;
        }
        match ValueDeserializer::deserialize(&bytes, self.inner.compression) {
            Ok(value) => {
                self.inner.metrics.cache_hit.increase(1);
                Some(value)
            }
            Err(e) => {
                tracing::error!("[cache]: failed to decode value for key {key}: {e}");
                self.inner.metrics.cache_miss.increase(1);
                None
            }
        }
    }

    /// Look up `key` and return the raw payload bytes.
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.lookup(key) {
            Some((bytes, _)) => {
                self.inner.metrics.cache_hit.increase(1);
                Some(bytes)
            }
            None => {
                self.inner.metrics.cache_miss.increase(1);
                None
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<(Vec<u8>, TypeTag)> {
        let shard = self.shard_of(key);
        let pointer = self.inner.shards[shard].read().get(key).cloned()?;
        match self.inner.manager.retrieve(&pointer) {
            Some(bytes) => Some((bytes, pointer.tag())),
            None => {
                // stale descriptor: expired or freed behind our back; drop
                // the entry at the moment of detection
                self.evict_entry(shard, key, &pointer);
                None
            }
        }
    }

    fn evict_entry(&self, shard: usize, key: &str, pointer: &Arc<Pointer>) {
        let mut guard = self.inner.shards[shard].write();
        if guard.get(key).is_some_and(|current| Arc::ptr_eq(current, pointer)) {
            guard.remove(key);
            drop(guard);
            self.inner.manager.free(pointer);
            self.inner.metrics.cache_entries.decrease(1);
        }
    }

    /// The slot pointer currently mapped for `key`, if any.
    ///
    /// The descriptor may be expired or freed; this is raw access for
    /// diagnostics and tests, not a liveness check.
    pub fn pointer(&self, key: &str) -> Option<Arc<Pointer>> {
        let shard = self.shard_of(key);
        self.inner.shards[shard].read().get(key).cloned()
    }

    /// Remove the entry for `key` and free its pointer.
    pub fn remove(&self, key: &str) {
        let shard = self.shard_of(key);
        if let Some(pointer) = self.inner.shards[shard].write().remove(key) {
            self.inner.manager.free(&pointer);
            self.inner.metrics.cache_remove.increase(1);
            self.inner.metrics.cache_entries.decrease(1);
        }
    }

    /// Empty the key map and reset the off-heap buffers.
    ///
    /// Not linearizable against concurrent writers: a racing `put` may land
    /// after its shard is drained and survive the clear.
    pub fn clear(&self) {
        for shard in &self.inner.shards {
            let entries = shard.write().drain().collect_vec();
            for (_, pointer) in entries {
                self.inner.manager.free(&pointer);
            }
        }
        self.inner.manager.clear();
        self.inner.metrics.cache_entries.absolute(0);
        tracing::info!("[cache]: {} cleared", self.inner.name);
    }

    /// Number of key-map entries.
    ///
    /// Expired-but-not-yet-swept entries are counted — an observable
    /// staleness window, not a bug.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether the key map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<Pointer>> {
        self.inner
            .shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect_vec())
            .collect_vec()
    }

    /// Run the expiration sweep once, synchronously.
    ///
    /// Returns the number of pointers freed.
    pub fn collect_expired(&self) -> usize {
        let snapshot = self.snapshot();
        self.inner.manager.collect_expired(&snapshot)
    }

    /// Run the LFU sweep once, synchronously.
    ///
    /// Returns the number of pointers freed.
    pub fn collect_lfu(&self) -> usize {
        let snapshot = self.snapshot();
        self.inner.manager.collect_lfu(&snapshot)
    }

    /// Drop map entries whose pointer is already free.
    ///
    /// Returns the number of entries dropped.
    pub fn purge_orphans(&self) -> usize {
        let mut purged = 0;
        for shard in &self.inner.shards {
            let mut guard = shard.write();
            let before = guard.len();
            guard.retain(|_, pointer| !pointer.is_free());
            purged += before - guard.len();
        }
        if purged > 0 {
            self.inner.metrics.cache_entries.decrease(purged as u64);
            tracing::debug!("[cache]: purged {purged} orphaned entr(ies)");
        }
        purged
    }

    pub(crate) fn dispose(&self) {
        tracing::info!("[cache]: {} begin disposal", self.inner.name);
        let expired = self.collect_expired();
        let evicted = self.collect_lfu();
        let purged = self.purge_orphans();
        tracing::info!(
            "[cache]: {} disposal complete, expired: {expired}, evicted: {evicted}, purged: {purged}",
            self.inner.name
        );
    }

    /// Run one expire-then-LFU disposal cycle asynchronously, without
    /// touching the recurring schedule.
    ///
    /// Falls back to a synchronous cycle when called outside a tokio runtime.
    pub fn collect_all(&self) {
        let cache = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { cache.dispose() });
            }
            Err(_) => cache.dispose(),
        }
    }

    /// Start the recurring background disposal at the configured interval.
    ///
    /// Must be called within a tokio runtime. Replaces any previous schedule.
    pub fn schedule_disposal(&self) {
        self.schedule_disposal_every(self.inner.disposal_interval)
    }

    /// Start the recurring background disposal at `interval`.
    ///
    /// Must be called within a tokio runtime. Replaces any previous schedule.
    pub fn schedule_disposal_every(&self, interval: Duration) {
        let handle = Sweeper::schedule(Arc::downgrade(&self.inner), interval);
        if let Some(old) = self.inner.sweeper.lock().replace(handle) {
            old.stop();
        }
        tracing::info!("[cache]: {} disposal scheduled every {interval:?}", self.inner.name);
    }

    /// Cancel the recurring background disposal, if scheduled.
    ///
    /// An in-flight cycle completes rather than being interrupted
    /// mid-mutation.
    pub fn close(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.stop();
        }
    }

    /// Occupancy snapshots of the off-heap buffers, in collection order.
    pub fn buffer_stats(&self) -> Vec<BufferStats> {
        self.inner.manager.buffer_stats()
    }

    /// Log per-buffer and aggregate occupancy figures.
    ///
    /// A read-only diagnostic, not part of the functional contract.
    pub fn dump_stats(&self) {
        tracing::info!("[cache]: *** {} statistics ***", self.inner.name);
        for stats in self.buffer_stats() {
            tracing::info!(
                "[cache]: buffer {} - capacity: {}, used: {}, live: {}",
                stats.id,
                ByteSize::b(stats.capacity as u64),
                ByteSize::b(stats.used as u64),
                ByteSize::b(stats.live as u64),
            );
        }
        tracing::info!(
            "[cache]: entries: {}, off-heap total: {}",
            self.len(),
            ByteSize::b(self.inner.manager.capacity() as u64),
        );
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    fn user() -> User {
        User {
            id: 42,
            name: "ferris".to_string(),
        }
    }

    fn cache(buffers: usize, buffer_capacity: usize, fill_threshold: f64) -> Cache {
        Cache::builder()
            .with_buffers(buffers)
            .with_buffer_capacity(buffer_capacity)
            .with_shards(1)
            .with_fill_threshold(fill_threshold)
            .build()
            .unwrap()
    }

    #[test_log::test]
    fn test_put_get_round_trip() {
        let cache = cache(1, 4096, 0.9);
        cache.put("user", &user()).unwrap();
        assert_eq!(cache.get::<User>("user"), Some(user()));
    }

    #[test_log::test]
    fn test_put_bytes_get_bytes_round_trip() {
        let cache = cache(1, 4096, 0.9);
        cache.put_bytes("raw", b"payload").unwrap();
        assert_eq!(cache.get_bytes("raw").unwrap(), b"payload");
        // raw entries are not typed entries
        assert_eq!(cache.get::<Vec<u8>>("raw"), None);
    }

    #[test_log::test]
    fn test_round_trip_with_compression() {
        for compression in [Compression::Lz4, Compression::Zstd] {
            let cache = Cache::builder()
                .with_buffer_capacity(4096)
                .with_shards(1)
                .with_compression(compression)
                .build()
                .unwrap();
            cache.put("user", &user()).unwrap();
            assert_eq!(cache.get::<User>("user"), Some(user()));
        }
    }

    #[test_log::test]
    fn test_get_missing_key() {
        let cache = cache(1, 4096, 0.9);
        assert_eq!(cache.get::<User>("nothing"), None);
    }

    #[test_log::test]
    fn test_expiry_is_lazy_on_get() {
        let cache = cache(1, 4096, 0.9);
        cache
            .put_with_ttl("user", &user(), Duration::from_millis(50))
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));

        // the stale entry is still counted until it is observed
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<User>("user"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test_log::test]
    fn test_zero_ttl_never_expires() {
        let cache = cache(1, 4096, 0.9);
        cache.put_with_ttl("user", &user(), Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.collect_expired(), 0);
        assert_eq!(cache.get::<User>("user"), Some(user()));
    }

    #[test_log::test]
    fn test_put_displaces_previous_entry() {
        let cache = cache(1, 4096, 0.9);
        let old = cache.put_bytes("key", b"old").unwrap();
        cache.put_bytes("key", b"new").unwrap();
        assert!(old.is_free());
        assert_eq!(cache.get_bytes("key").unwrap(), b"new");
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn test_update_missing_key_is_an_error() {
        let cache = cache(1, 4096, 0.9);
        assert!(matches!(
            cache.update("missing", &user()),
            Err(Error::MissingKey { .. })
        ));
    }

    #[test_log::test]
    fn test_update_in_place_and_reallocating() {
        let cache = cache(1, 4096, 0.9);
        let pointer = cache.put_bytes("key", &[1u8; 100]).unwrap();

        let updated = cache.update_bytes("key", &[2u8; 40]).unwrap();
        assert!(Arc::ptr_eq(&pointer, &updated));
        assert_eq!(cache.get_bytes("key").unwrap(), vec![2u8; 40]);

        let grown = cache.update_bytes("key", &[3u8; 200]).unwrap();
        assert!(!Arc::ptr_eq(&pointer, &grown));
        assert_eq!(cache.get_bytes("key").unwrap(), vec![3u8; 200]);
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn test_shape_tag_mismatch_is_a_miss() {
        let cache = cache(1, 4096, 0.9);
        cache.put("key", &42u64).unwrap();
        assert_eq!(cache.get::<String>("key"), None);
        // the entry itself stays live
        assert_eq!(cache.get::<u64>("key"), Some(42));
    }

    #[test_log::test]
    fn test_remove_frees_the_pointer() {
        let cache = cache(1, 4096, 0.9);
        let pointer = cache.put("user", &user()).unwrap();
        cache.remove("user");
        assert!(pointer.is_free());
        assert_eq!(cache.get::<User>("user"), None);
        assert_eq!(cache.len(), 0);

        // removing again is a no-op
        cache.remove("user");
    }

    #[test_log::test]
    fn test_clear_empties_map_and_buffers() {
        let cache = cache(2, 1000, 0.9);
        cache.put_bytes("a", &[0xaa; 600]).unwrap();
        cache.put_bytes("b", &[0xbb; 600]).unwrap();
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(cache.buffer_stats().iter().all(|s| s.used == 0));
        // storage is reusable after a clear
        cache.put_bytes("c", &[0xcc; 600]).unwrap();
        assert_eq!(cache.get_bytes("c").unwrap(), vec![0xcc; 600]);
    }

    #[test_log::test]
    fn test_buffer_routing_scenario() {
        let cache = cache(2, 1000, 0.9);
        cache.put_bytes("a", &[0xaa; 600]).unwrap();
        cache.put_bytes("b", &[0xbb; 600]).unwrap();

        assert_eq!(cache.get_bytes("a").unwrap(), vec![0xaa; 600]);

        let stats = cache.buffer_stats();
        assert_eq!(stats[0].used, 600);
        assert_eq!(stats[1].used, 600);

        cache.dump_stats();
    }

    #[test_log::test]
    fn test_capacity_exhausted_surfaces_as_error() {
        let cache = cache(2, 1000, 0.9);
        cache.put_bytes("a", &[0xaa; 600]).unwrap();
        cache.put_bytes("b", &[0xbb; 600]).unwrap();

        let err = cache.put_bytes("c", &[0xcc; 600]).unwrap_err();
        assert!(matches!(
            err,
            Error::Memory(larder_memory::Error::CapacityExhausted { .. })
        ));

        // stored payloads survive the failed store
        assert_eq!(cache.get_bytes("a").unwrap(), vec![0xaa; 600]);
        assert_eq!(cache.get_bytes("b").unwrap(), vec![0xbb; 600]);
    }

    #[test_log::test]
    fn test_lfu_scenario_cold_half_evicted() {
        let cache = cache(1, 1000, 0.5);
        for i in 0..10 {
            cache.put_bytes(format!("key-{i}"), &[i as u8; 100]).unwrap();
        }

        // heat up the second half
        for _ in 0..3 {
            for i in 5..10 {
                cache.get_bytes(&format!("key-{i}")).unwrap();
            }
        }

        assert_eq!(cache.collect_lfu(), 5);

        // freed entries linger in the map until purged
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.purge_orphans(), 5);
        assert_eq!(cache.len(), 5);

        for i in 0..10 {
            let got = cache.get_bytes(&format!("key-{i}"));
            if i < 5 {
                assert_eq!(got, None);
            } else {
                assert_eq!(got.unwrap(), vec![i as u8; 100]);
            }
        }
    }

    #[test_log::test]
    fn test_expire_sweep_then_size_drops() {
        let cache = cache(1, 4096, 0.9);
        cache
            .put_bytes_with_ttl("x", b"transient", Duration::from_millis(20))
            .unwrap();
        cache.put_bytes("y", b"durable").unwrap();

        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.collect_expired(), 1);
        assert_eq!(cache.purge_orphans(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_bytes("y").unwrap(), b"durable");
    }

    #[test_log::test]
    fn test_pointer_accessor() {
        let cache = cache(1, 4096, 0.9);
        let pointer = cache.put_bytes("key", b"value").unwrap();
        let looked_up = cache.pointer("key").unwrap();
        assert!(Arc::ptr_eq(&pointer, &looked_up));
        assert!(cache.pointer("missing").is_none());
    }

    #[test_log::test]
    fn test_concurrent_put_get_with_sweeps() {
        let cache = Cache::builder()
            .with_buffers(4)
            .with_buffer_capacity(256 * 1024)
            .with_shards(16)
            .with_fill_threshold(0.8)
            .build()
            .unwrap();

        let workers = (0..4)
            .map(|worker| {
                let c = cache.clone();
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(worker as u64);
                    for round in 0..200u32 {
                        let key = format!("worker-{worker}-{}", round % 16);
                        let value = vec![worker as u8; rng.random_range(1..=128)];
                        if c.put_bytes(key.as_str(), &value).is_ok() {
                            // a concurrent sweep may have evicted it already
                            if let Some(got) = c.get_bytes(&key) {
                                assert_eq!(got, value);
                            }
                        }
                    }
                })
            })
            .collect_vec();

        let gc = {
            let c = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    c.collect_expired();
                    c.collect_lfu();
                    c.purge_orphans();
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        gc.join().unwrap();
    }
}
