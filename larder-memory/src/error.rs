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

/// Off-heap engine error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A single buffer could not fit the requested allocation.
    #[error("out of space: requested {requested} bytes with {remaining} remaining")]
    OutOfSpace {
        /// Bytes requested.
        requested: usize,
        /// Bytes left before the buffer cursor hits capacity.
        remaining: usize,
    },
    /// No buffer in the engine could fit the requested allocation.
    #[error("capacity exhausted: requested {requested} bytes against {capacity} bytes total")]
    CapacityExhausted {
        /// Bytes requested.
        requested: usize,
        /// Total engine capacity.
        capacity: usize,
    },
    /// Engine configuration error.
    #[error("config error: {0}")]
    ConfigError(String),
}

/// Off-heap engine result.
pub type Result<T> = std::result::Result<T, Error>;
