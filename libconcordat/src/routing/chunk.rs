// Copyright 2021-2022 Cargill Incorporated
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

use std::fmt::{Display, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};

use crate::document::ShardId;

/// One end of a shard key range. `MinKey` and `MaxKey` sort below and above every value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyBound {
    MinKey,
    Value(i64),
    MaxKey,
}

impl Display for KeyBound {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            KeyBound::MinKey => f.write_str("MinKey"),
            KeyBound::Value(v) => write!(f, "{}", v),
            KeyBound::MaxKey => f.write_str("MaxKey"),
        }
    }
}

/// A half-open range `[min, max)` of shard key values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    pub min: KeyBound,
    pub max: KeyBound,
}

impl ChunkRange {
    pub fn new(min: KeyBound, max: KeyBound) -> Self {
        ChunkRange { min, max }
    }

    /// The range covering the whole key space.
    pub fn full() -> Self {
        ChunkRange {
            min: KeyBound::MinKey,
            max: KeyBound::MaxKey,
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        let key = KeyBound::Value(key);
        self.min <= key && key < self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    pub fn overlaps(&self, other: &ChunkRange) -> bool {
        self.min < other.max && other.min < self.max
    }
}

impl Display for ChunkRange {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// Ownership of a chunk by a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    pub range: ChunkRange,
    pub shard: ShardId,
}

impl ChunkAssignment {
    pub fn new(range: ChunkRange, shard: ShardId) -> Self {
        ChunkAssignment { range, shard }
    }
}

/// The field a collection is sharded on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKeyPattern {
    pub field: String,
}

impl ShardKeyPattern {
    pub fn new<S: Into<String>>(field: S) -> Self {
        ShardKeyPattern {
            field: field.into(),
        }
    }
}

/// A named key range pinned to a set of shards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub range: ChunkRange,
    pub shards: Vec<ShardId>,
}
