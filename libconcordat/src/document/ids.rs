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

//! Identifiers shared by every operation document.

use std::fmt::{Display, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a shard participating in an operation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        ShardId(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        ShardId(id)
    }
}

/// The globally unique identifier of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        OperationId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        OperationId::new()
    }
}

impl From<Uuid> for OperationId {
    fn from(uuid: Uuid) -> Self {
        OperationId(uuid)
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

/// A logical cluster time, as reported by participants for prepare and fetch boundaries.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(ts: u64) -> Self {
        Timestamp(ts)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "Timestamp({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that identifiers serialize as their bare values.
    #[test]
    fn test_ids_serialize_transparently() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(serde_json::to_string(&ShardId::from("shard0"))?, "\"shard0\"");
        assert_eq!(serde_json::to_string(&Timestamp::new(42))?, "42");

        let id = OperationId::new();
        let json = serde_json::to_string(&id)?;
        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<OperationId>(&json)?, id);

        Ok(())
    }
}
