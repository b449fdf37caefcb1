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

//! The authoritative chunk-to-shard ownership and the routers that cache it.

mod chunk;
mod router;

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::document::{OperationId, ShardId};
use crate::error::RoutingError;

pub use chunk::{ChunkAssignment, ChunkRange, KeyBound, ShardKeyPattern, Zone};
pub use router::Router;

/// A window during which writes to a namespace are refused.
///
/// The catalog never ends a critical section on its own. `expires_at` records when the owning
/// coordinator's alarm aborts the operation; writes stay refused until that coordinator exits
/// the section or commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalSection {
    pub operation_id: OperationId,
    pub expires_at: SystemTime,
}

/// The routing table of one sharded collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionRouting {
    pub shard_key: ShardKeyPattern,
    pub chunks: Vec<ChunkAssignment>,
    pub version: u64,
    pub critical_section: Option<CriticalSection>,
}

impl CollectionRouting {
    pub fn owner(&self, key: i64) -> Option<&ShardId> {
        self.chunks
            .iter()
            .find(|chunk| chunk.range.contains(key))
            .map(|chunk| &chunk.shard)
    }

    /// The shards owning at least one chunk, in sorted order.
    pub fn owners(&self) -> Vec<ShardId> {
        let mut owners: Vec<ShardId> = self.chunks.iter().map(|c| c.shard.clone()).collect();
        owners.sort();
        owners.dedup();
        owners
    }
}

/// A change a coordinator makes to the routing catalog.
///
/// Applying the same change twice has the same effect as applying it once, so a coordinator that
/// resumes after a crash may re-issue it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingChange {
    EnterCriticalSection {
        namespace: String,
        operation_id: OperationId,
        expires_at: SystemTime,
    },
    ExitCriticalSection {
        namespace: String,
        operation_id: OperationId,
    },
    /// Installs a new shard key and chunk distribution and ends the operation's critical section.
    CommitDistribution {
        namespace: String,
        operation_id: OperationId,
        shard_key: ShardKeyPattern,
        chunks: Vec<ChunkAssignment>,
    },
}

/// The shard a request was routed to, at the routing version used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub shard: ShardId,
    pub version: u64,
}

#[derive(Default)]
pub struct RoutingCatalog {
    collections: RwLock<HashMap<String, CollectionRouting>>,
}

impl RoutingCatalog {
    pub fn new() -> Self {
        RoutingCatalog::default()
    }

    /// Registers a sharded collection at version 1, replacing any previous registration.
    pub fn register_collection(
        &self,
        namespace: &str,
        shard_key: ShardKeyPattern,
        chunks: Vec<ChunkAssignment>,
    ) {
        self.collections.write().insert(
            namespace.to_string(),
            CollectionRouting {
                shard_key,
                chunks,
                version: 1,
                critical_section: None,
            },
        );
    }

    pub fn snapshot(&self, namespace: &str) -> Result<CollectionRouting, RoutingError> {
        self.collections
            .read()
            .get(namespace)
            .cloned()
            .ok_or_else(|| RoutingError::NamespaceNotFound(namespace.to_string()))
    }

    pub fn owners(&self, namespace: &str) -> Result<Vec<ShardId>, RoutingError> {
        Ok(self.snapshot(namespace)?.owners())
    }

    pub fn version(&self, namespace: &str) -> Result<u64, RoutingError> {
        self.collections
            .read()
            .get(namespace)
            .map(|c| c.version)
            .ok_or_else(|| RoutingError::NamespaceNotFound(namespace.to_string()))
    }

    pub fn apply(&self, change: &RoutingChange) -> Result<(), RoutingError> {
        let mut collections = self.collections.write();
        match change {
            RoutingChange::EnterCriticalSection {
                namespace,
                operation_id,
                expires_at,
            } => {
                let collection = collection_mut(&mut collections, namespace)?;
                match collection.critical_section.as_ref().map(|s| s.operation_id) {
                    Some(holder) if &holder != operation_id => {
                        Err(RoutingError::InCriticalSection {
                            namespace: namespace.clone(),
                            operation_id: holder,
                        })
                    }
                    Some(_) => Ok(()),
                    None => {
                        info!(
                            "Entering critical section on {} for operation {}",
                            namespace, operation_id
                        );
                        collection.critical_section = Some(CriticalSection {
                            operation_id: *operation_id,
                            expires_at: *expires_at,
                        });
                        Ok(())
                    }
                }
            }
            RoutingChange::ExitCriticalSection {
                namespace,
                operation_id,
            } => {
                let collection = collection_mut(&mut collections, namespace)?;
                if matches!(&collection.critical_section, Some(s) if &s.operation_id == operation_id)
                {
                    info!(
                        "Exiting critical section on {} for operation {}",
                        namespace, operation_id
                    );
                    collection.critical_section = None;
                }
                Ok(())
            }
            RoutingChange::CommitDistribution {
                namespace,
                operation_id,
                shard_key,
                chunks,
            } => {
                let collection = collection_mut(&mut collections, namespace)?;
                if &collection.shard_key != shard_key || &collection.chunks != chunks {
                    collection.shard_key = shard_key.clone();
                    collection.chunks = chunks.clone();
                    collection.version += 1;
                    info!(
                        "Installed new distribution of {} at version {}",
                        namespace, collection.version
                    );
                }
                if matches!(&collection.critical_section, Some(s) if &s.operation_id == operation_id)
                {
                    collection.critical_section = None;
                }
                Ok(())
            }
        }
    }

    /// Routes a request for `key` made with routing information at `known_version`.
    ///
    /// Writes are refused while a critical section is active; reads are served by the current
    /// owner. Neither ever waits.
    pub fn route(
        &self,
        namespace: &str,
        key: i64,
        known_version: u64,
        is_write: bool,
    ) -> Result<Route, RoutingError> {
        let collections = self.collections.read();
        let collection = collections
            .get(namespace)
            .ok_or_else(|| RoutingError::NamespaceNotFound(namespace.to_string()))?;

        if known_version != collection.version {
            return Err(RoutingError::StaleVersion {
                namespace: namespace.to_string(),
                known: known_version,
                current: collection.version,
            });
        }
        if let (true, Some(section)) = (is_write, &collection.critical_section) {
            return Err(RoutingError::InCriticalSection {
                namespace: namespace.to_string(),
                operation_id: section.operation_id,
            });
        }

        collection
            .owner(key)
            .map(|shard| Route {
                shard: shard.clone(),
                version: collection.version,
            })
            .ok_or_else(|| RoutingError::NoOwner {
                namespace: namespace.to_string(),
                key,
            })
    }
}

fn collection_mut<'a>(
    collections: &'a mut HashMap<String, CollectionRouting>,
    namespace: &str,
) -> Result<&'a mut CollectionRouting, RoutingError> {
    collections
        .get_mut(namespace)
        .ok_or_else(|| RoutingError::NamespaceNotFound(namespace.to_string()))
}
