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

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use itertools::Itertools;
use larder_common::{code::TypeTag, metrics::Metrics};

use crate::{
    buffer::{Buffer, BufferStats},
    error::{Error, Result},
    pointer::{Pointer, NEVER},
};

/// Memory manager configuration.
#[derive(Debug)]
pub struct MemoryManagerConfig {
    /// Number of off-heap buffers, fixed for the engine's lifetime.
    pub buffers: usize,
    /// Capacity of each buffer in bytes. Must fit in `u32`.
    pub buffer_capacity: usize,
    /// Fill ratio above which the LFU sweep reclaims a buffer, in `(0, 1]`.
    pub fill_threshold: f64,
    /// Metric series to report sweep activity and occupancy on.
    pub metrics: Arc<Metrics>,
}

/// Owner of the ordered off-heap buffer collection.
///
/// Routes allocations to the current buffer, advancing and wrapping when it
/// fills; runs the expiration and LFU sweeps over pointer snapshots handed in
/// by the cache service. Holds no per-key state.
pub struct MemoryManager {
    buffers: Vec<Buffer>,
    current: AtomicUsize,
    epoch: Instant,
    fill_threshold: f64,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("buffers", &self.buffers.len())
            .field("fill_threshold", &self.fill_threshold)
            .finish()
    }
}

impl MemoryManager {
    /// Create a manager with `config.buffers` buffers of
    /// `config.buffer_capacity` bytes each.
    pub fn new(config: MemoryManagerConfig) -> Result<Self> {
        if config.buffers == 0 {
            return Err(Error::ConfigError("buffer count must be at least 1".to_string()));
        }
        if config.buffer_capacity == 0 || config.buffer_capacity > u32::MAX as usize {
            return Err(Error::ConfigError(format!(
                "buffer capacity must be in [1, {}], given: {}",
                u32::MAX,
                config.buffer_capacity
            )));
        }
        if !(config.fill_threshold > 0.0 && config.fill_threshold <= 1.0) {
            return Err(Error::ConfigError(format!(
                "fill threshold must be in (0, 1], given: {}",
                config.fill_threshold
            )));
        }

        let buffers = (0..config.buffers)
            .map(|id| Buffer::new(id as _, config.buffer_capacity))
            .collect_vec();
        config
            .metrics
            .memory_capacity
            .absolute((config.buffers * config.buffer_capacity) as u64);

        tracing::info!(
            "[manager]: initialized with {} buffer(s) of {} bytes each",
            config.buffers,
            config.buffer_capacity
        );

        Ok(Self {
            buffers,
            current: AtomicUsize::new(0),
            epoch: Instant::now(),
            fill_threshold: config.fill_threshold,
            metrics: config.metrics,
        })
    }

    /// Microseconds elapsed since the engine epoch.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Total capacity across all buffers.
    pub fn capacity(&self) -> usize {
        self.buffers.iter().map(Buffer::capacity).sum()
    }

    /// Store `bytes` with the given time-to-live and shape tag.
    ///
    /// A `ttl` of `None` or zero never expires. Tries the current buffer
    /// first, advances through the collection on exhaustion, and fails with
    /// [`Error::CapacityExhausted`] once every buffer has refused.
    pub fn store(&self, bytes: &[u8], ttl: Option<Duration>, tag: TypeTag) -> Result<Arc<Pointer>> {
        let now = self.now_us();
        let expires = match ttl {
            Some(ttl) if !ttl.is_zero() => now + ttl.as_micros() as u64,
            _ => NEVER,
        };
        self.store_raw(bytes, expires, tag)
    }

    fn store_raw(&self, bytes: &[u8], expires_us: u64, tag: TypeTag) -> Result<Arc<Pointer>> {
        let start = self.current.load(Ordering::Relaxed);
        for i in 0..self.buffers.len() {
            let index = (start + i) % self.buffers.len();
            let buffer = &self.buffers[index];
            let offset = match buffer.allocate(bytes.len()) {
                Ok(offset) => offset,
                Err(_) => continue,
            };
            buffer.write(offset, bytes);
            if i != 0 {
                self.current.store(index, Ordering::Relaxed);
                tracing::debug!("[manager]: allocation advanced to buffer {index}");
            }
            return Ok(Arc::new(Pointer::new(
                buffer.id(),
                offset,
                bytes.len() as u32,
                self.now_us(),
                expires_us,
                tag,
            )));
        }
        Err(Error::CapacityExhausted {
            requested: bytes.len(),
            capacity: self.capacity(),
        })
    }

    /// Replace the payload behind `pointer` with `bytes`.
    ///
    /// Overwrites in place when the new payload fits the existing span,
    /// shrinking the span to the payload. Otherwise allocates a fresh slot
    /// with store semantics, preserving the original expiration, and frees
    /// the displaced pointer — its bytes stay orphaned until a sweep resets
    /// the buffer, since a bump region cannot reuse a mid-buffer range.
    pub fn update(&self, pointer: &Arc<Pointer>, bytes: &[u8], tag: TypeTag) -> Result<Arc<Pointer>> {
        let (offset, len) = pointer.span();
        if !pointer.is_free() && bytes.len() <= len as usize {
            let buffer = &self.buffers[pointer.buffer() as usize];
            buffer.write(offset, bytes);
            pointer.set_span(offset, bytes.len() as u32);
            pointer.set_tag(tag);
            buffer.reclaim(len as usize - bytes.len());
            return Ok(pointer.clone());
        }

        let replacement = self.store_raw(bytes, pointer.expires_us(), tag)?;
        self.free(pointer);
        Ok(replacement)
    }

    /// Copy out the payload behind `pointer`, bumping its access stats.
    ///
    /// Returns `None` for a free or expired pointer — a stale descriptor is a
    /// cache miss, not an error. The free flag is re-checked after the copy
    /// so a racing sweep-and-reset cannot surface reused bytes as a hit.
    pub fn retrieve(&self, pointer: &Pointer) -> Option<Vec<u8>> {
        let now = self.now_us();
        if pointer.is_free() || pointer.expired(now) {
            return None;
        }
        let (offset, len) = pointer.span();
        let bytes = self.buffers[pointer.buffer() as usize].read(offset, len as usize);
        if pointer.is_free() {
            return None;
        }
        pointer.touch(now);
        Some(bytes)
    }

    /// Mark `pointer` free and retire its live bytes.
    ///
    /// Space is not reclaimed here; only a sweep's whole-buffer reset returns
    /// bytes to the allocator.
    pub fn free(&self, pointer: &Pointer) {
        if pointer.mark_free() {
            self.buffers[pointer.buffer() as usize].reclaim(pointer.len());
        }
    }

    /// Free every pointer in the snapshot whose expiration has passed.
    ///
    /// Returns the number of pointers freed. Buffers are not compacted; the
    /// LFU sweep and lazy lookups observe the updated liveness flags.
    pub fn collect_expired(&self, pointers: &[Arc<Pointer>]) -> usize {
        let now = self.now_us();
        let mut freed = 0;
        for pointer in pointers {
            if !pointer.is_free() && pointer.expired(now) {
                self.free(pointer);
                freed += 1;
            }
        }
        if freed > 0 {
            self.metrics.memory_expire.increase(freed as u64);
            tracing::debug!("[manager]: expiration sweep freed {freed} pointer(s)");
        }
        self.refresh_gauges();
        freed
    }

    /// Run the LFU sweep over the snapshot.
    ///
    /// For every buffer filled past the threshold, live pointers are ranked
    /// by hit count with last access as tie break, and freed from the bottom
    /// until the buffer's live bytes drop under the threshold. A swept buffer
    /// left without live bytes is reset outright — the preferred reclamation,
    /// since partial free cannot compact a bump region.
    ///
    /// Returns the number of pointers freed.
    pub fn collect_lfu(&self, pointers: &[Arc<Pointer>]) -> usize {
        let mut by_buffer = pointers
            .iter()
            .filter(|pointer| !pointer.is_free())
            .map(|pointer| (pointer.buffer(), pointer.clone()))
            .into_group_map();

        let mut freed = 0;
        for buffer in &self.buffers {
            let fill = buffer.used() as f64 / buffer.capacity() as f64;
            if fill < self.fill_threshold {
                continue;
            }

            let target = (self.fill_threshold * buffer.capacity() as f64) as usize;
            let mut candidates = by_buffer.remove(&buffer.id()).unwrap_or_default();
            candidates.sort_by_key(|pointer| (pointer.hits(), pointer.last_access_us()));

            let mut candidates = candidates.into_iter();
            while buffer.live() > target {
                let Some(victim) = candidates.next() else {
                    break;
                };
                if victim.is_free() {
                    continue;
                }
                self.free(&victim);
                freed += 1;
            }
        }
        if freed > 0 {
            self.metrics.memory_evict.increase(freed as u64);
            tracing::debug!("[manager]: lfu sweep freed {freed} pointer(s)");
        }

        for buffer in &self.buffers {
            if buffer.try_clear() {
                self.metrics.memory_clear.increase(1);
                tracing::debug!("[manager]: buffer {} cleared", buffer.id());
            }
        }
        self.refresh_gauges();
        freed
    }

    /// Reset every buffer and the allocation target.
    ///
    /// The caller must have marked all outstanding pointers free beforehand,
    /// so no descriptor still claims a range in the reset buffers.
    pub fn clear(&self) {
        for buffer in &self.buffers {
            buffer.clear();
        }
        self.current.store(0, Ordering::Relaxed);
        self.refresh_gauges();
        tracing::info!("[manager]: cleared");
    }

    /// Occupancy snapshots of all buffers, in collection order.
    pub fn buffer_stats(&self) -> Vec<BufferStats> {
        self.buffers.iter().map(Buffer::stats).collect_vec()
    }

    fn refresh_gauges(&self) {
        let used = self.buffers.iter().map(Buffer::used).sum::<usize>();
        let live = self.buffers.iter().map(Buffer::live).sum::<usize>();
        self.metrics.memory_used.absolute(used as u64);
        self.metrics.memory_live.absolute(live as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(buffers: usize, buffer_capacity: usize, fill_threshold: f64) -> MemoryManager {
        MemoryManager::new(MemoryManagerConfig {
            buffers,
            buffer_capacity,
            fill_threshold,
            metrics: Arc::new(Metrics::noop()),
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(MemoryManager::new(MemoryManagerConfig {
            buffers: 0,
            buffer_capacity: 1024,
            fill_threshold: 0.9,
            metrics: Arc::new(Metrics::noop()),
        })
        .is_err());
        assert!(MemoryManager::new(MemoryManagerConfig {
            buffers: 1,
            buffer_capacity: 0,
            fill_threshold: 0.9,
            metrics: Arc::new(Metrics::noop()),
        })
        .is_err());
        assert!(MemoryManager::new(MemoryManagerConfig {
            buffers: 1,
            buffer_capacity: 1024,
            fill_threshold: 1.5,
            metrics: Arc::new(Metrics::noop()),
        })
        .is_err());
    }

    #[test]
    fn test_store_routes_to_next_buffer() {
        let manager = manager(2, 1000, 0.9);

        let a = manager.store(&[0xaa; 600], None, TypeTag::bytes()).unwrap();
        let b = manager.store(&[0xbb; 600], None, TypeTag::bytes()).unwrap();
        assert_eq!(a.buffer(), 0);
        assert_eq!(b.buffer(), 1);

        assert_eq!(manager.retrieve(&a).unwrap(), vec![0xaa; 600]);

        let stats = manager.buffer_stats();
        assert_eq!(stats[0].used, 600);
        assert_eq!(stats[1].used, 600);
    }

    #[test]
    fn test_capacity_exhausted_leaves_stored_bytes_intact() {
        let manager = manager(2, 1000, 0.9);

        let a = manager.store(&[0xaa; 600], None, TypeTag::bytes()).unwrap();
        let b = manager.store(&[0xbb; 600], None, TypeTag::bytes()).unwrap();

        let err = manager.store(&[0xcc; 600], None, TypeTag::bytes()).unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { requested: 600, capacity: 2000 }));

        assert_eq!(manager.retrieve(&a).unwrap(), vec![0xaa; 600]);
        assert_eq!(manager.retrieve(&b).unwrap(), vec![0xbb; 600]);
    }

    #[test]
    fn test_update_in_place_shrinks_span() {
        let manager = manager(1, 1000, 0.9);

        let pointer = manager.store(&[1u8; 100], None, TypeTag::bytes()).unwrap();
        let (offset, _) = pointer.span();

        let updated = manager.update(&pointer, &[2u8; 40], TypeTag::bytes()).unwrap();
        assert!(Arc::ptr_eq(&pointer, &updated));
        assert_eq!(updated.span(), (offset, 40));
        assert_eq!(manager.retrieve(&updated).unwrap(), vec![2u8; 40]);

        // in-place reuse must not consume fresh cursor space
        assert_eq!(manager.buffer_stats()[0].used, 100);
        assert_eq!(manager.buffer_stats()[0].live, 40);
    }

    #[test]
    fn test_update_reallocates_when_payload_grows() {
        let manager = manager(1, 1000, 0.9);

        let pointer = manager.store(&[1u8; 100], None, TypeTag::bytes()).unwrap();
        let updated = manager.update(&pointer, &[2u8; 200], TypeTag::bytes()).unwrap();

        assert!(!Arc::ptr_eq(&pointer, &updated));
        assert!(pointer.is_free());
        assert_eq!(manager.retrieve(&pointer), None);
        assert_eq!(manager.retrieve(&updated).unwrap(), vec![2u8; 200]);

        // the displaced span stays orphaned until a sweep resets the buffer
        assert_eq!(manager.buffer_stats()[0].used, 300);
        assert_eq!(manager.buffer_stats()[0].live, 200);
    }

    #[test_log::test]
    fn test_expiration_sweep() {
        let manager = manager(1, 1000, 0.9);

        let transient = manager
            .store(&[1u8; 10], Some(Duration::from_millis(20)), TypeTag::bytes())
            .unwrap();
        let durable = manager.store(&[2u8; 10], None, TypeTag::bytes()).unwrap();

        std::thread::sleep(Duration::from_millis(50));

        let snapshot = vec![transient.clone(), durable.clone()];
        assert_eq!(manager.collect_expired(&snapshot), 1);
        assert!(transient.is_free());
        assert_eq!(manager.retrieve(&transient), None);
        assert_eq!(manager.retrieve(&durable).unwrap(), vec![2u8; 10]);

        // second pass finds nothing new
        assert_eq!(manager.collect_expired(&snapshot), 0);
    }

    #[test]
    fn test_expired_pointer_is_a_miss_before_any_sweep() {
        let manager = manager(1, 1000, 0.9);
        let pointer = manager
            .store(&[1u8; 10], Some(Duration::from_millis(10)), TypeTag::bytes())
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(manager.retrieve(&pointer), None);
        assert_eq!(pointer.hits(), 0);
    }

    #[test_log::test]
    fn test_lfu_sweep_evicts_cold_pointers() {
        let manager = manager(1, 1000, 0.5);

        let pointers = (0..10)
            .map(|i| manager.store(&[i as u8; 100], None, TypeTag::bytes()).unwrap())
            .collect_vec();

        // heat up the second half
        for pointer in &pointers[5..] {
            for _ in 0..3 {
                manager.retrieve(pointer).unwrap();
            }
        }

        let freed = manager.collect_lfu(&pointers);
        assert_eq!(freed, 5);

        // every survivor ranks at least as high as every evicted pointer
        let max_evicted = pointers[..5].iter().map(|p| (p.hits(), p.last_access_us())).max().unwrap();
        let min_kept = pointers[5..].iter().map(|p| (p.hits(), p.last_access_us())).min().unwrap();
        assert!(min_kept >= max_evicted);

        for (i, pointer) in pointers.iter().enumerate() {
            if i < 5 {
                assert!(pointer.is_free());
                assert_eq!(manager.retrieve(pointer), None);
            } else {
                assert_eq!(manager.retrieve(pointer).unwrap(), vec![i as u8; 100]);
            }
        }
    }

    #[test_log::test]
    fn test_lfu_sweep_resets_fully_dead_buffer() {
        let manager = manager(1, 1000, 0.5);

        let pointers = (0..10)
            .map(|i| manager.store(&[i as u8; 100], None, TypeTag::bytes()).unwrap())
            .collect_vec();
        for pointer in &pointers {
            manager.free(pointer);
        }

        manager.collect_lfu(&pointers);
        assert_eq!(manager.buffer_stats()[0].used, 0);

        // the reset buffer accepts allocations again
        assert!(manager.store(&[1u8; 900], None, TypeTag::bytes()).is_ok());
    }

    #[test]
    fn test_lfu_sweep_skips_buffers_under_threshold() {
        let manager = manager(1, 1000, 0.9);
        let pointers = (0..4)
            .map(|i| manager.store(&[i as u8; 100], None, TypeTag::bytes()).unwrap())
            .collect_vec();
        assert_eq!(manager.collect_lfu(&pointers), 0);
        assert!(pointers.iter().all(|p| !p.is_free()));
    }

    #[test]
    fn test_free_is_terminal() {
        let manager = manager(1, 1000, 0.9);
        let pointer = manager.store(&[1u8; 10], None, TypeTag::bytes()).unwrap();
        manager.free(&pointer);
        manager.free(&pointer);
        assert_eq!(manager.retrieve(&pointer), None);
        assert_eq!(manager.buffer_stats()[0].live, 0);
    }

    #[test]
    fn test_clear_resets_all_buffers() {
        let manager = manager(2, 1000, 0.9);
        let a = manager.store(&[1u8; 600], None, TypeTag::bytes()).unwrap();
        let b = manager.store(&[2u8; 600], None, TypeTag::bytes()).unwrap();
        manager.free(&a);
        manager.free(&b);
        manager.clear();
        assert!(manager.buffer_stats().iter().all(|s| s.used == 0 && s.live == 0));
        assert_eq!(manager.store(&[3u8; 600], None, TypeTag::bytes()).unwrap().buffer(), 0);
    }

    #[test_log::test]
    fn test_concurrent_stores_never_overlap() {
        use std::collections::HashMap;

        use rand::{rngs::SmallRng, Rng, SeedableRng};

        let manager = Arc::new(manager(4, 64 * 1024, 0.9));
        let handles = (0..8)
            .map(|worker| {
                let m = manager.clone();
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(worker);
                    let mut pointers = vec![];
                    loop {
                        let len = rng.random_range(1..=256);
                        match m.store(&vec![worker as u8; len], None, TypeTag::bytes()) {
                            Ok(pointer) => pointers.push(pointer),
                            Err(_) => return pointers,
                        }
                    }
                })
            })
            .collect_vec();

        let pointers = handles.into_iter().flat_map(|h| h.join().unwrap()).collect_vec();

        let mut by_buffer: HashMap<u32, Vec<(u32, u32)>> = HashMap::new();
        for pointer in &pointers {
            by_buffer.entry(pointer.buffer()).or_default().push(pointer.span());
        }
        for spans in by_buffer.values_mut() {
            spans.sort();
            for pair in spans.windows(2) {
                assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlapping spans: {pair:?}");
            }
        }
    }
}
