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

//! Off-heap memory engine for the larder cache.
//!
//! The engine owns a fixed set of page-aligned buffers, each with a monotonic
//! bump allocator: allocation only moves forward, freeing a slot only flips
//! its pointer's liveness flag, and space returns in whole-buffer resets
//! driven by the expiration and LFU sweeps. The trade-off is deliberate — no
//! fragmentation bookkeeping on the write path, coarse reclamation instead,
//! which suits a cache whose data is re-derivable.

/// The fixed-capacity bump-allocated buffer.
pub mod buffer;
/// Engine error types.
pub mod error;
/// The multi-buffer memory manager.
pub mod manager;
/// The slot pointer descriptor.
pub mod pointer;

pub use buffer::{BufferStats, PAGE};
pub use error::{Error, Result};
pub use manager::{MemoryManager, MemoryManagerConfig};
pub use pointer::{BufferId, Pointer, NEVER};
