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

use std::fmt::{self, Debug};

use serde::{de::DeserializeOwned, Serialize};
use twox_hash::XxHash64;

/// A value that can be stored in the cache.
///
/// Automatically implemented for types that implement serde's `Serialize` +
/// `DeserializeOwned` and are sendable across threads.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

const TAG_SEED: u64 = 0x6c61_7264;

/// Opaque identifier of a stored value's shape.
///
/// A tag is recorded in each slot pointer when a value is stored and verified
/// again when the value is decoded, so that a lookup with the wrong type is a
/// miss instead of a garbage decode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(u64);

impl TypeTag {
    /// The tag of the value type `T`.
    ///
    /// Derived from the type name, so it is stable within a build but not
    /// across renames of the type.
    pub fn of<T: 'static>() -> Self {
        Self(XxHash64::oneshot(TAG_SEED, std::any::type_name::<T>().as_bytes()))
    }

    /// The tag used for raw byte payloads stored without serialization.
    ///
    /// Distinct from any value type's tag, so a typed lookup against a raw
    /// entry misses cleanly instead of attempting a garbage decode.
    pub fn bytes() -> Self {
        Self(XxHash64::oneshot(TAG_SEED, b"raw-bytes"))
    }

    /// Reconstruct a tag from its raw representation.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw representation carried in a slot pointer.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:#018x})", self.0)
    }
}
