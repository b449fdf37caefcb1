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

//! Contains RoutingError

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use crate::document::OperationId;

/// An error returned by the routing catalog or a router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingError {
    /// The namespace is not sharded.
    NamespaceNotFound(String),

    /// Writes to the namespace are blocked by an operation's critical section.
    InCriticalSection {
        namespace: String,
        operation_id: OperationId,
    },

    /// The router's cached routing version is older than the authoritative one.
    StaleVersion {
        namespace: String,
        known: u64,
        current: u64,
    },

    /// No chunk covers the key.
    NoOwner { namespace: String, key: i64 },
}

impl RoutingError {
    /// Returns true if the request can be retried once routing information changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoutingError::InCriticalSection { .. } | RoutingError::StaleVersion { .. }
        )
    }
}

impl Error for RoutingError {}

impl Display for RoutingError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            RoutingError::NamespaceNotFound(ns) => write!(f, "namespace {} is not sharded", ns),
            RoutingError::InCriticalSection {
                namespace,
                operation_id,
            } => write!(
                f,
                "writes to {} are blocked by the critical section of operation {}",
                namespace, operation_id
            ),
            RoutingError::StaleVersion {
                namespace,
                known,
                current,
            } => write!(
                f,
                "routing version {} for {} is stale (current: {})",
                known, namespace, current
            ),
            RoutingError::NoOwner { namespace, key } => {
                write!(f, "no chunk of {} owns key {}", namespace, key)
            }
        }
    }
}
