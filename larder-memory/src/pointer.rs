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
    sync::atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;
use larder_common::code::TypeTag;

/// Identifier of a buffer within the memory manager's ordered collection.
pub type BufferId = u32;

/// Expiration value of a pointer that never expires.
pub const NEVER: u64 = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        const FREE = 0b00000001;
    }
}

/// Descriptor of one allocated off-heap range and its metadata.
///
/// A pointer is shared between foreground callers and background sweeps, so
/// every mutable field is atomic. The offset/length pair is packed into a
/// single word so a reader never observes a torn span.
pub struct Pointer {
    buffer: BufferId,
    created_us: u64,
    expires_us: u64,

    span: AtomicU64,
    tag: AtomicU64,
    hits: AtomicU64,
    last_access_us: AtomicU64,
    flags: AtomicU64,
}

fn pack(offset: u32, len: u32) -> u64 {
    ((offset as u64) << u32::BITS) | len as u64
}

fn unpack(span: u64) -> (u32, u32) {
    ((span >> u32::BITS) as u32, span as u32)
}

impl Pointer {
    pub(crate) fn new(buffer: BufferId, offset: u32, len: u32, created_us: u64, expires_us: u64, tag: TypeTag) -> Self {
        Self {
            buffer,
            created_us,
            expires_us,
            span: AtomicU64::new(pack(offset, len)),
            tag: AtomicU64::new(tag.raw()),
            hits: AtomicU64::new(0),
            last_access_us: AtomicU64::new(created_us),
            flags: AtomicU64::new(0),
        }
    }

    /// The buffer this pointer's range lives in.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// The (offset, length) pair of the range, read atomically.
    pub fn span(&self) -> (u32, u32) {
        unpack(self.span.load(Ordering::Acquire))
    }

    /// The length of the range in bytes.
    pub fn len(&self) -> usize {
        self.span().1 as usize
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set_span(&self, offset: u32, len: u32) {
        self.span.store(pack(offset, len), Ordering::Release);
    }

    /// The shape tag recorded when the payload was stored.
    pub fn tag(&self) -> TypeTag {
        TypeTag::from_raw(self.tag.load(Ordering::Acquire))
    }

    pub(crate) fn set_tag(&self, tag: TypeTag) {
        self.tag.store(tag.raw(), Ordering::Release);
    }

    /// Creation time in microseconds since the engine epoch.
    pub fn created_us(&self) -> u64 {
        self.created_us
    }

    /// Expiration time in microseconds since the engine epoch, [`NEVER`] if none.
    pub fn expires_us(&self) -> u64 {
        self.expires_us
    }

    /// Whether the pointer is past its expiration at `now_us`.
    pub fn expired(&self, now_us: u64) -> bool {
        self.expires_us != NEVER && now_us > self.expires_us
    }

    /// Successful retrievals of this pointer.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Last access time in microseconds since the engine epoch.
    pub fn last_access_us(&self) -> u64 {
        self.last_access_us.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, now_us: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.last_access_us.store(now_us, Ordering::Relaxed);
    }

    /// Whether the pointer has been reclaimed.
    ///
    /// A free pointer is a dangling descriptor awaiting removal from the key
    /// map; its range must never be dereferenced again.
    pub fn is_free(&self) -> bool {
        self.flags.load(Ordering::Acquire) & Flags::FREE.bits() != 0
    }

    /// Mark the pointer free.
    ///
    /// Returns `true` for exactly one caller, however many race.
    pub(crate) fn mark_free(&self) -> bool {
        self.flags.fetch_or(Flags::FREE.bits(), Ordering::AcqRel) & Flags::FREE.bits() == 0
    }
}

impl Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (offset, len) = self.span();
        f.debug_struct("Pointer")
            .field("buffer", &self.buffer)
            .field("offset", &offset)
            .field("len", &len)
            .field("free", &self.is_free())
            .finish()
    }
}
