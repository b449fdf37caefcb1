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

//! Contains StoreError

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use crate::document::OperationId;

use super::InternalError;
use super::InvalidStateError;

/// An error returned by an `OperationStore`.
#[derive(Debug)]
pub enum StoreError {
    /// No document exists for the operation.
    NotFound(OperationId),

    /// A document for the operation exists and conflicts with the one being persisted.
    AlreadyExists(OperationId),

    /// The stored document was modified since the writer last read it.
    VersionConflict {
        operation_id: OperationId,
        expected: u64,
        actual: u64,
    },

    /// Another unfinished resharding of the same namespace is stored.
    ConflictingOperation {
        namespace: String,
        operation_id: OperationId,
    },

    /// The requested change is not allowed for the stored document.
    InvalidState(InvalidStateError),

    /// The store failed for a reason unrelated to the request.
    Internal(InternalError),
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::InvalidState(e) => Some(e),
            StoreError::Internal(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            StoreError::NotFound(id) => write!(f, "no document for operation {}", id),
            StoreError::AlreadyExists(id) => {
                write!(f, "a conflicting document for operation {} exists", id)
            }
            StoreError::VersionConflict {
                operation_id,
                expected,
                actual,
            } => write!(
                f,
                "document for operation {} is at version {}, expected {}",
                operation_id, actual, expected
            ),
            StoreError::ConflictingOperation {
                namespace,
                operation_id,
            } => write!(
                f,
                "resharding {} of {} has not finished",
                operation_id, namespace
            ),
            StoreError::InvalidState(e) => write!(f, "{}", e),
            StoreError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl From<InvalidStateError> for StoreError {
    fn from(err: InvalidStateError) -> Self {
        StoreError::InvalidState(err)
    }
}

impl From<InternalError> for StoreError {
    fn from(err: InternalError) -> Self {
        StoreError::Internal(err)
    }
}
