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

//! The resharded collection as built by one recipient.
//!
//! Donors own disjoint shard key ranges, but their record ids are local to each donor and may
//! collide. The recipient therefore identifies documents by primary key, assigns record ids of
//! its own, and remembers which donor every document came from.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{ShardId, Timestamp};
use crate::error::ApplyError;

/// A record id assigned by the recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A document of the resharded collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub record_id: RecordId,
    pub donor: ShardId,
    /// The record id the document had on its donor.
    pub donor_record_id: u64,
    pub body: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OplogOp {
    Insert { primary_key: String, body: Value },
    Update { primary_key: String, body: Value },
    Delete { primary_key: String },
}

impl OplogOp {
    fn primary_key(&self) -> &str {
        match self {
            OplogOp::Insert { primary_key, .. }
            | OplogOp::Update { primary_key, .. }
            | OplogOp::Delete { primary_key } => primary_key,
        }
    }
}

/// A change a donor made after the clone timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OplogEntry {
    pub timestamp: Timestamp,
    pub donor_record_id: u64,
    pub op: OplogOp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneOutcome {
    Inserted(RecordId),
    /// The same donor already delivered the document; cloning is retried after failures.
    AlreadyCloned(RecordId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Entries at or below the donor's applied timestamp, already applied by an earlier batch.
    pub skipped: usize,
}

pub struct RecipientCollection {
    applied_through: HashMap<ShardId, Option<Timestamp>>,
    documents: BTreeMap<String, StoredDocument>,
    next_record_id: u64,
    oplog_entries_applied: u64,
}

impl RecipientCollection {
    pub fn new<I>(donors: I) -> Self
    where
        I: IntoIterator<Item = ShardId>,
    {
        RecipientCollection {
            applied_through: donors.into_iter().map(|donor| (donor, None)).collect(),
            documents: BTreeMap::new(),
            next_record_id: 1,
            oplog_entries_applied: 0,
        }
    }

    pub fn get(&self, primary_key: &str) -> Option<&StoredDocument> {
        self.documents.get(primary_key)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn oplog_entries_applied(&self) -> u64 {
        self.oplog_entries_applied
    }

    /// The timestamp of the last entry applied from `donor`.
    pub fn applied_through(&self, donor: &ShardId) -> Option<Timestamp> {
        self.applied_through.get(donor).copied().flatten()
    }

    /// Copies a document from a donor's snapshot at the clone timestamp.
    pub fn clone_document(
        &mut self,
        donor: &ShardId,
        primary_key: &str,
        donor_record_id: u64,
        body: Value,
    ) -> Result<CloneOutcome, ApplyError> {
        self.check_donor(donor)?;
        if let Some(existing) = self.documents.get(primary_key) {
            if &existing.donor == donor {
                return Ok(CloneOutcome::AlreadyCloned(existing.record_id));
            }
            return Err(ApplyError::DuplicateKey {
                primary_key: primary_key.to_string(),
                existing_donor: existing.donor.clone(),
                donor: donor.clone(),
            });
        }
        let record_id = self.insert(donor, primary_key, donor_record_id, body);
        Ok(CloneOutcome::Inserted(record_id))
    }

    /// Applies a batch of oplog entries from one donor.
    ///
    /// Entries must be in strictly increasing timestamp order. Entries the donor already had
    /// applied are skipped, so a batch may be redelivered. The batch is checked completely
    /// before anything is applied.
    pub fn apply_batch(
        &mut self,
        donor: &ShardId,
        entries: &[OplogEntry],
    ) -> Result<ApplyOutcome, ApplyError> {
        self.check_donor(donor)?;
        for pair in entries.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ApplyError::OutOfOrder {
                    donor: donor.clone(),
                    previous: pair[0].timestamp,
                    timestamp: pair[1].timestamp,
                });
            }
        }

        let applied_through = self.applied_through(donor);
        let pending: Vec<&OplogEntry> = entries
            .iter()
            .filter(|entry| applied_through.map_or(true, |ts| entry.timestamp > ts))
            .collect();
        self.check_ownership(donor, &pending)?;

        for entry in &pending {
            match &entry.op {
                OplogOp::Insert { primary_key, body } | OplogOp::Update { primary_key, body } => {
                    match self.documents.get_mut(primary_key) {
                        Some(existing) => {
                            existing.body = body.clone();
                            existing.donor_record_id = entry.donor_record_id;
                        }
                        None => {
                            self.insert(donor, primary_key, entry.donor_record_id, body.clone());
                        }
                    }
                }
                OplogOp::Delete { primary_key } => {
                    if matches!(self.documents.get(primary_key), Some(d) if &d.donor == donor) {
                        self.documents.remove(primary_key);
                    }
                }
            }
        }

        if let Some(last) = pending.last() {
            self.applied_through
                .insert(donor.clone(), Some(last.timestamp));
        }
        self.oplog_entries_applied += pending.len() as u64;
        Ok(ApplyOutcome {
            applied: pending.len(),
            skipped: entries.len() - pending.len(),
        })
    }

    fn check_donor(&self, donor: &ShardId) -> Result<(), ApplyError> {
        if self.applied_through.contains_key(donor) {
            Ok(())
        } else {
            Err(ApplyError::UnknownDonor(donor.clone()))
        }
    }

    // A write from one donor must never land on a document another donor delivered.
    fn check_ownership(&self, donor: &ShardId, entries: &[&OplogEntry]) -> Result<(), ApplyError> {
        let mut owners: HashMap<&str, Option<&ShardId>> = HashMap::new();
        for entry in entries {
            let key = entry.op.primary_key();
            let owner = match owners.get(key) {
                Some(owner) => *owner,
                None => self.documents.get(key).map(|d| &d.donor),
            };
            match (&entry.op, owner) {
                (OplogOp::Delete { .. }, Some(owner)) if owner == donor => {
                    owners.insert(key, None);
                }
                (OplogOp::Delete { .. }, _) => (),
                (_, Some(owner)) if owner != donor => {
                    return Err(ApplyError::DuplicateKey {
                        primary_key: key.to_string(),
                        existing_donor: owner.clone(),
                        donor: donor.clone(),
                    })
                }
                _ => {
                    owners.insert(key, Some(donor));
                }
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        donor: &ShardId,
        primary_key: &str,
        donor_record_id: u64,
        body: Value,
    ) -> RecordId {
        let record_id = RecordId(self.next_record_id);
        self.next_record_id += 1;
        self.documents.insert(
            primary_key.to_string(),
            StoredDocument {
                record_id,
                donor: donor.clone(),
                donor_record_id,
                body,
            },
        );
        record_id
    }
}
