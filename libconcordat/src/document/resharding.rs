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

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::routing::{ChunkAssignment, ShardKeyPattern, Zone};

use super::{OperationId, Timestamp};

/// The per-recipient copy estimate derived from the donors' clone statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproxCopySize {
    pub approx_bytes_to_copy: u64,
    pub approx_documents_to_copy: u64,
}

/// The resharding-specific part of an operation document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardingMetadata {
    pub namespace: String,
    pub temporary_namespace: String,
    pub new_shard_key: ShardKeyPattern,
    pub zones: Vec<Zone>,
    pub chunk_plan: Vec<ChunkAssignment>,
    pub clone_timestamp: Option<Timestamp>,
    pub approx_copy_size: Option<ApproxCopySize>,
    pub critical_section_expires_at: Option<SystemTime>,
}

impl ReshardingMetadata {
    pub fn new(
        operation_id: &OperationId,
        namespace: &str,
        new_shard_key: ShardKeyPattern,
        zones: Vec<Zone>,
    ) -> Self {
        ReshardingMetadata {
            namespace: namespace.to_string(),
            temporary_namespace: temporary_namespace(namespace, operation_id),
            new_shard_key,
            zones,
            chunk_plan: Vec::new(),
            clone_timestamp: None,
            approx_copy_size: None,
            critical_section_expires_at: None,
        }
    }
}

// Recipients build the resharded collection under `<db>.system.resharding.<operation id>`.
fn temporary_namespace(namespace: &str, operation_id: &OperationId) -> String {
    let db = namespace.split('.').next().unwrap_or(namespace);
    format!("{}.system.resharding.{}", db, operation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the temporary namespace lives in the source collection's database.
    #[test]
    fn test_temporary_namespace() {
        let id = OperationId::new();
        let metadata = ReshardingMetadata::new(
            &id,
            "app.orders",
            ShardKeyPattern::new("customerId"),
            vec![],
        );
        assert_eq!(
            metadata.temporary_namespace,
            format!("app.system.resharding.{}", id)
        );
        assert!(metadata.clone_timestamp.is_none());
    }
}
