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

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::document::{OperationDocument, OperationId};
use crate::error::StoreError;

use super::OperationStore;

/// An operation store held in memory.
#[derive(Default)]
pub struct MemoryOperationStore {
    documents: Mutex<BTreeMap<OperationId, OperationDocument>>,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        MemoryOperationStore::default()
    }
}

impl OperationStore for MemoryOperationStore {
    fn persist(&self, document: &OperationDocument) -> Result<OperationDocument, StoreError> {
        let mut documents = self.documents.lock();
        if !documents.contains_key(document.operation_id()) {
            super::check_live_resharding(documents.values(), document)?;
        }
        let stored = super::persisted(documents.get(document.operation_id()), document)?;
        documents.insert(*stored.operation_id(), stored.clone());
        Ok(stored)
    }

    fn read(&self, operation_id: &OperationId) -> Result<OperationDocument, StoreError> {
        self.documents
            .lock()
            .get(operation_id)
            .cloned()
            .ok_or(StoreError::NotFound(*operation_id))
    }

    fn compare_and_set(
        &self,
        document: &OperationDocument,
        expected_version: u64,
    ) -> Result<OperationDocument, StoreError> {
        let mut documents = self.documents.lock();
        let stored = super::swapped(
            documents.get(document.operation_id()),
            document,
            expected_version,
        )?;
        documents.insert(*stored.operation_id(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, operation_id: &OperationId, expected_version: u64) -> Result<(), StoreError> {
        let mut documents = self.documents.lock();
        super::check_delete(documents.get(operation_id), operation_id, expected_version)?;
        documents.remove(operation_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<OperationDocument>, StoreError> {
        let mut documents: Vec<OperationDocument> =
            self.documents.lock().values().cloned().collect();
        documents.sort_by_key(|doc| doc.created_at());
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_contract() {
        super::super::tests::check_store_contract(&MemoryOperationStore::new());
    }

    #[test]
    fn test_memory_store_live_resharding() {
        super::super::tests::check_live_resharding_contract(&MemoryOperationStore::new());
    }
}
