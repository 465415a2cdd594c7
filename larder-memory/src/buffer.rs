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
    fmt::Debug,
    ptr::NonNull,
    slice::from_raw_parts,
    sync::atomic::{AtomicUsize, Ordering},
};

use allocator_api2::alloc::{handle_alloc_error, Allocator, Global, Layout};
use parking_lot::RwLock;

use crate::{
    error::{Error, Result},
    pointer::BufferId,
};

/// Alignment of every buffer's backing region.
pub const PAGE: usize = 4096;

/// A fixed-capacity off-heap memory region with a monotonic bump allocator.
///
/// Ranges are handed out strictly forward; freeing a range never returns its
/// bytes to the allocator. Reclamation is a whole-buffer reset, taken only
/// when no live bytes remain.
///
/// Range reads and writes hold the content guard shared — allocation makes
/// their ranges disjoint, so they cannot overlap each other. A reset holds it
/// exclusive, so it cannot race any in-flight access.
pub struct Buffer {
    id: BufferId,
    ptr: *mut u8,
    capacity: usize,

    cursor: AtomicUsize,
    live: AtomicUsize,

    guard: RwLock<()>,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

/// Read-only snapshot of one buffer's occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// Buffer id.
    pub id: BufferId,
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Bytes consumed from the bump cursor.
    pub used: usize,
    /// Bytes referenced by live pointers.
    pub live: usize,
}

impl Buffer {
    /// Allocate a page-aligned buffer of exactly `capacity` bytes.
    ///
    /// The caller (the memory manager) validates `0 < capacity <= u32::MAX`.
    pub(crate) fn new(id: BufferId, capacity: usize) -> Self {
        let layout = unsafe { Layout::from_size_align_unchecked(capacity, PAGE) };
        let mut nonnull = match Global.allocate(layout) {
            Ok(nonnull) => nonnull,
            Err(_) => handle_alloc_error(layout),
        };
        let ptr = unsafe { nonnull.as_mut() }.as_mut_ptr();
        Self {
            id,
            ptr,
            capacity,
            cursor: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            guard: RwLock::new(()),
        }
    }

    /// Buffer id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed from the bump cursor.
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Bytes referenced by live pointers.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Occupancy snapshot for reporting.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            id: self.id,
            capacity: self.capacity,
            used: self.used(),
            live: self.live(),
        }
    }

    /// Reserve `len` contiguous bytes at the cursor.
    ///
    /// The reserve step is a single atomic update, so concurrent allocations
    /// never receive overlapping ranges.
    pub(crate) fn allocate(&self, len: usize) -> Result<u32> {
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                (cursor + len <= self.capacity).then_some(cursor + len)
            }) {
            Ok(offset) => {
                self.live.fetch_add(len, Ordering::AcqRel);
                Ok(offset as u32)
            }
            Err(cursor) => Err(Error::OutOfSpace {
                requested: len,
                remaining: self.capacity - cursor,
            }),
        }
    }

    /// Write `bytes` at `offset`.
    ///
    /// The range must have been returned by [`Buffer::allocate`]; anything
    /// else is a caller bug.
    pub(crate) fn write(&self, offset: u32, bytes: &[u8]) {
        let offset = offset as usize;
        assert!(
            offset + bytes.len() <= self.capacity,
            "write out of bounds: [{}, {}) on buffer {} with capacity {}",
            offset,
            offset + bytes.len(),
            self.id,
            self.capacity,
        );
        let _guard = self.guard.read();
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len()) };
    }

    /// Copy `len` bytes out at `offset`.
    pub(crate) fn read(&self, offset: u32, len: usize) -> Vec<u8> {
        let offset = offset as usize;
        assert!(
            offset + len <= self.capacity,
            "read out of bounds: [{}, {}) on buffer {} with capacity {}",
            offset,
            offset + len,
            self.id,
            self.capacity,
        );
        let _guard = self.guard.read();
        unsafe { from_raw_parts(self.ptr.add(offset), len) }.to_vec()
    }

    /// Retire `len` live bytes after a pointer into this buffer is freed.
    pub(crate) fn reclaim(&self, len: usize) {
        self.live.fetch_sub(len, Ordering::AcqRel);
    }

    /// Reset the cursor if no live bytes remain.
    ///
    /// Holds the content guard exclusively and re-checks liveness under it,
    /// so an access or allocation that slipped in first wins.
    pub(crate) fn try_clear(&self) -> bool {
        let _guard = self.guard.write();
        if self.live.load(Ordering::Acquire) == 0 && self.cursor.load(Ordering::Acquire) != 0 {
            self.cursor.store(0, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Reset the cursor unconditionally.
    ///
    /// Every previously issued offset becomes invalid; the caller must have
    /// marked all pointers into this buffer free beforehand.
    pub(crate) fn clear(&self) {
        let _guard = self.guard.write();
        self.cursor.store(0, Ordering::Release);
        self.live.store(0, Ordering::Release);
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .field("live", &self.live())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let layout = unsafe { Layout::from_size_align_unchecked(self.capacity, PAGE) };
        unsafe { Global.deallocate(NonNull::new_unchecked(self.ptr), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_allocation() {
        let buffer = Buffer::new(0, 1000);
        assert_eq!(buffer.allocate(600).unwrap(), 0);
        assert_eq!(buffer.used(), 600);

        let err = buffer.allocate(600).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { requested: 600, remaining: 400 }));

        assert_eq!(buffer.allocate(400).unwrap(), 600);
        assert_eq!(buffer.used(), 1000);
    }

    #[test]
    fn test_write_read_round_trip() {
        let buffer = Buffer::new(0, 4096);
        let offset = buffer.allocate(11).unwrap();
        buffer.write(offset, b"hello world");
        assert_eq!(buffer.read(offset, 11), b"hello world");
    }

    #[test]
    fn test_clear_resets_cursor() {
        let buffer = Buffer::new(0, 1024);
        let offset = buffer.allocate(512).unwrap();
        buffer.write(offset, &[7u8; 512]);

        // live bytes remain, the conditional reset must refuse
        assert!(!buffer.try_clear());
        buffer.reclaim(512);
        assert!(buffer.try_clear());
        assert_eq!(buffer.used(), 0);
        assert_eq!(buffer.allocate(1024).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_allocations_never_overlap() {
        use std::sync::Arc;

        let buffer = Arc::new(Buffer::new(0, 64 * 1024));
        let handles = (0..8)
            .map(|_| {
                let b = buffer.clone();
                std::thread::spawn(move || {
                    let mut spans = vec![];
                    while let Ok(offset) = b.allocate(17) {
                        spans.push((offset, 17u32));
                    }
                    spans
                })
            })
            .collect::<Vec<_>>();

        let mut spans = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlapping spans: {pair:?}");
        }
    }
}
