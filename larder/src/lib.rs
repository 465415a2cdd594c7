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

//! larder - an off-heap key-value cache engine for Rust.
//!
//! larder keeps serialized values in manually managed page-aligned memory
//! regions, indexed by string key, with time-based expiration and
//! least-frequently-used eviction driven by a background disposal cycle.
//! Values never sit in the normal object graph, so caching large volumes of
//! data does not bloat allocator-visible state.
//!
//! # Example
//!
//! ```
//! use larder::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> larder::Result<()> {
//!     let cache = Cache::builder()
//!         .with_buffers(4)
//!         .with_buffer_capacity(16 * 1024 * 1024)
//!         .build()?;
//!     cache.schedule_disposal();
//!
//!     cache.put("greeting", &"hello".to_string())?;
//!     cache.put_with_ttl("blip", &42u64, Duration::from_secs(30))?;
//!
//!     assert_eq!(cache.get::<String>("greeting"), Some("hello".to_string()));
//!     cache.close();
//!     Ok(())
//! }
//! ```

mod cache;
mod error;
mod serde;
mod sweeper;

/// The commonly used re-exports.
pub mod prelude;

pub use crate::{
    cache::{Cache, CacheBuilder},
    error::{Error, Result},
    serde::Compression,
};
