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

/// Cache service error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Off-heap engine error.
    #[error(transparent)]
    Memory(#[from] larder_memory::Error),
    /// Value encode/decode error.
    #[error("serde error: {0}")]
    Serde(#[from] bincode::Error),
    /// Compression codec I/O error.
    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),
    /// Update called for a key with no live entry.
    #[error("no entry to update for key: {key}")]
    MissingKey {
        /// The offending key.
        key: String,
    },
    /// Cache configuration error.
    #[error("config error: {0}")]
    ConfigError(String),
}

/// Cache service result.
pub type Result<T> = std::result::Result<T, Error>;
