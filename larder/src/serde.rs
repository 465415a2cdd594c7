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

use larder_common::code::CacheValue;

use crate::error::Result;

/// Value compression applied before storing off-heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Store the bincode encoding as is.
    #[default]
    None,
    /// Compress the bincode encoding with lz4.
    Lz4,
    /// Compress the bincode encoding with zstd.
    Zstd,
}

impl Compression {
    /// Wire/byte representation of the compression algorithm.
    pub fn to_u8(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zstd => 2,
        }
    }

    /// Reconstruct the compression algorithm from its byte representation.
    pub fn try_from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ValueSerializer;

impl ValueSerializer {
    pub(crate) fn serialize<T>(value: &T, compression: Compression) -> Result<Vec<u8>>
    where
        T: CacheValue,
    {
        let mut buffer = vec![];
        match compression {
            Compression::None => bincode::serialize_into(&mut buffer, value)?,
            Compression::Lz4 => {
                let mut encoder = lz4::EncoderBuilder::new()
                    .checksum(lz4::ContentChecksum::NoChecksum)
                    .build(&mut buffer)?;
                bincode::serialize_into(&mut encoder, value)?;
                let (_, res) = encoder.finish();
                res?;
            }
            Compression::Zstd => {
                let encoder = zstd::Encoder::new(&mut buffer, 0)?.auto_finish();
                bincode::serialize_into(encoder, value)?;
            }
        }
        Ok(buffer)
    }
}

#[derive(Debug)]
pub(crate) struct ValueDeserializer;

impl ValueDeserializer {
    pub(crate) fn deserialize<T>(buf: &[u8], compression: Compression) -> Result<T>
    where
        T: CacheValue,
    {
        let value = match compression {
            Compression::None => bincode::deserialize_from(buf)?,
            Compression::Lz4 => {
                let decoder = lz4::Decoder::new(buf)?;
                bincode::deserialize_from(decoder)?
            }
            Compression::Zstd => {
                let decoder = zstd::Decoder::new(buf)?;
                bincode::deserialize_from(decoder)?
            }
        };
        Ok(value)
    }
}
