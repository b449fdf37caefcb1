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

//! Durable storage for operation documents.

#[cfg(feature = "file-store")]
mod file;
mod memory;

use crate::document::{OperationDocument, OperationId};
use crate::error::{InvalidStateError, StoreError};

#[cfg(feature = "file-store")]
pub use file::FileOperationStore;
pub use memory::MemoryOperationStore;

/// A linearizable store of operation documents.
///
/// The store assigns document versions: `persist` stores version 1 and every successful
/// `compare_and_set` increments the version by one. A writer that presents a stale version is
/// rejected with `StoreError::VersionConflict`.
pub trait OperationStore: Send + Sync {
    /// Stores a new document and returns it as stored.
    ///
    /// Persisting a document whose kind and participants match an existing document with the same
    /// id returns the existing document; any other existing document is `AlreadyExists`. A new
    /// resharding is refused with `ConflictingOperation` while another resharding of the same
    /// namespace is unfinished.
    fn persist(&self, document: &OperationDocument) -> Result<OperationDocument, StoreError>;

    fn read(&self, operation_id: &OperationId) -> Result<OperationDocument, StoreError>;

    /// Replaces the stored document if it is still at `expected_version`, returning the document
    /// as stored with its new version.
    fn compare_and_set(
        &self,
        document: &OperationDocument,
        expected_version: u64,
    ) -> Result<OperationDocument, StoreError>;

    /// Removes a decided document which is still at `expected_version`.
    fn delete(&self, operation_id: &OperationId, expected_version: u64) -> Result<(), StoreError>;

    /// Returns every stored document, oldest first.
    fn list(&self) -> Result<Vec<OperationDocument>, StoreError>;
}

impl<S: OperationStore + ?Sized> OperationStore for std::sync::Arc<S> {
    fn persist(&self, document: &OperationDocument) -> Result<OperationDocument, StoreError> {
        (**self).persist(document)
    }

    fn read(&self, operation_id: &OperationId) -> Result<OperationDocument, StoreError> {
        (**self).read(operation_id)
    }

    fn compare_and_set(
        &self,
        document: &OperationDocument,
        expected_version: u64,
    ) -> Result<OperationDocument, StoreError> {
        (**self).compare_and_set(document, expected_version)
    }

    fn delete(&self, operation_id: &OperationId, expected_version: u64) -> Result<(), StoreError> {
        (**self).delete(operation_id, expected_version)
    }

    fn list(&self) -> Result<Vec<OperationDocument>, StoreError> {
        (**self).list()
    }
}

// Shared by the store implementations: decides the outcome of a persist given the document
// already stored under the same id, if any.
fn persisted(
    existing: Option<&OperationDocument>,
    document: &OperationDocument,
) -> Result<OperationDocument, StoreError> {
    match existing {
        Some(existing)
            if existing.kind() == document.kind()
                && existing.shard_ids() == document.shard_ids() =>
        {
            Ok(existing.clone())
        }
        Some(_) => Err(StoreError::AlreadyExists(*document.operation_id())),
        None => {
            let mut stored = document.clone();
            stored.set_version(1);
            Ok(stored)
        }
    }
}

// A namespace has at most one unfinished resharding, like a unique index over the stored
// resharding namespaces.
fn check_live_resharding<'a, I>(stored: I, document: &OperationDocument) -> Result<(), StoreError>
where
    I: IntoIterator<Item = &'a OperationDocument>,
{
    let namespace = match document.resharding() {
        Some(metadata) if !document.is_done() => &metadata.namespace,
        _ => return Ok(()),
    };
    let conflicting = stored.into_iter().find(|other| {
        other.operation_id() != document.operation_id()
            && !other.is_done()
            && other
                .resharding()
                .map(|metadata| &metadata.namespace == namespace)
                .unwrap_or(false)
    });
    match conflicting {
        Some(other) => Err(StoreError::ConflictingOperation {
            namespace: namespace.clone(),
            operation_id: *other.operation_id(),
        }),
        None => Ok(()),
    }
}

fn swapped(
    existing: Option<&OperationDocument>,
    document: &OperationDocument,
    expected_version: u64,
) -> Result<OperationDocument, StoreError> {
    let existing = existing.ok_or(StoreError::NotFound(*document.operation_id()))?;
    if existing.version() != expected_version {
        return Err(StoreError::VersionConflict {
            operation_id: *document.operation_id(),
            expected: expected_version,
            actual: existing.version(),
        });
    }
    let mut stored = document.clone();
    stored.set_version(expected_version + 1);
    Ok(stored)
}

fn check_delete(
    existing: Option<&OperationDocument>,
    operation_id: &OperationId,
    expected_version: u64,
) -> Result<(), StoreError> {
    let existing = existing.ok_or(StoreError::NotFound(*operation_id))?;
    if existing.version() != expected_version {
        return Err(StoreError::VersionConflict {
            operation_id: *operation_id,
            expected: expected_version,
            actual: existing.version(),
        });
    }
    if existing.decision().is_none() {
        return Err(StoreError::InvalidState(InvalidStateError::with_message(
            format!("operation {} can not be removed before it is decided", operation_id),
        )));
    }
    Ok(())
}
