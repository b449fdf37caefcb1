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

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::document::{OperationDocument, OperationId};
use crate::error::{InternalError, StoreError};

use super::OperationStore;

const EXTENSION: &str = "json";

/// An operation store keeping one JSON file per operation in a directory.
///
/// Documents are written and synced to a temporary file which is then renamed over the previous
/// version, and the directory is synced before a write returns. A crash never leaves a partially
/// written document behind, and a write that returned survives power loss.
pub struct FileOperationStore {
    dir: PathBuf,
    // Serializes read-check-write sequences within this process.
    lock: Mutex<()>,
}

impl FileOperationStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(internal)?;
        Ok(FileOperationStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, operation_id: &OperationId) -> PathBuf {
        self.dir.join(format!("{}.{}", operation_id, EXTENSION))
    }

    fn load(&self, operation_id: &OperationId) -> Result<Option<OperationDocument>, StoreError> {
        match fs::read(self.path(operation_id)) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(internal),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(internal(err)),
        }
    }

    fn write(&self, document: &OperationDocument) -> Result<(), StoreError> {
        let path = self.path(document.operation_id());
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", document.operation_id(), EXTENSION));
        let bytes = serde_json::to_vec_pretty(document).map_err(internal)?;

        let mut file = File::create(&tmp).map_err(internal)?;
        file.write_all(&bytes).map_err(internal)?;
        file.sync_all().map_err(internal)?;
        fs::rename(&tmp, &path).map_err(internal)?;
        self.sync_dir()
    }

    // Makes a rename or removal in the directory durable.
    fn sync_dir(&self) -> Result<(), StoreError> {
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(internal)
    }
}

impl OperationStore for FileOperationStore {
    fn persist(&self, document: &OperationDocument) -> Result<OperationDocument, StoreError> {
        let _guard = self.lock.lock();
        let existing = self.load(document.operation_id())?;
        if existing.is_none() {
            super::check_live_resharding(&self.list()?, document)?;
        }
        let stored = super::persisted(existing.as_ref(), document)?;
        if existing.is_none() {
            self.write(&stored)?;
        }
        Ok(stored)
    }

    fn read(&self, operation_id: &OperationId) -> Result<OperationDocument, StoreError> {
        self.load(operation_id)?
            .ok_or(StoreError::NotFound(*operation_id))
    }

    fn compare_and_set(
        &self,
        document: &OperationDocument,
        expected_version: u64,
    ) -> Result<OperationDocument, StoreError> {
        let _guard = self.lock.lock();
        let existing = self.load(document.operation_id())?;
        let stored = super::swapped(existing.as_ref(), document, expected_version)?;
        self.write(&stored)?;
        Ok(stored)
    }

    fn delete(&self, operation_id: &OperationId, expected_version: u64) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let existing = self.load(operation_id)?;
        super::check_delete(existing.as_ref(), operation_id, expected_version)?;
        fs::remove_file(self.path(operation_id)).map_err(internal)?;
        self.sync_dir()
    }

    fn list(&self) -> Result<Vec<OperationDocument>, StoreError> {
        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(internal)? {
            let path = entry.map_err(internal)?.path();
            let is_document = path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
                && !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(true);
            if !is_document {
                continue;
            }
            let bytes = fs::read(&path).map_err(internal)?;
            documents.push(serde_json::from_slice(&bytes).map_err(internal)?);
        }
        documents.sort_by_key(|doc: &OperationDocument| doc.created_at());
        Ok(documents)
    }
}

fn internal<E: std::error::Error + 'static>(err: E) -> StoreError {
    StoreError::Internal(InternalError::from_source(Box::new(err)))
}
