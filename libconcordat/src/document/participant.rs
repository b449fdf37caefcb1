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

use serde::{Deserialize, Serialize};

use super::{AbortReason, ShardId, Timestamp};

/// What the coordinator knows about a participant's answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteState {
    Unknown,
    /// Asked to prepare without an answer. The coordinator leaves participants `Unknown` until
    /// they vote and asks either state to prepare again on resume.
    Prepared,
    VotedCommit,
    VotedAbort,
    /// The participant acknowledged the decision.
    Acknowledged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParticipantState {
    pub prepare_timestamp: Option<Timestamp>,
    pub abort_reason: Option<AbortReason>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DonorProgress {
    PreparingToDonate,
    ReadyToDonate,
    Donating,
    BlockingWrites,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorState {
    pub progress: DonorProgress,
    pub min_fetch_timestamp: Option<Timestamp>,
    pub bytes_to_clone: Option<u64>,
    pub documents_to_clone: Option<u64>,
}

impl Default for DonorState {
    fn default() -> Self {
        DonorState {
            progress: DonorProgress::PreparingToDonate,
            min_fetch_timestamp: None,
            bytes_to_clone: None,
            documents_to_clone: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecipientProgress {
    CreatingCollection,
    AwaitingCloneTimestamp,
    Cloning,
    Applying,
    CaughtUp,
    StrictConsistency,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientState {
    pub progress: RecipientProgress,
    pub bytes_copied: u64,
    pub documents_copied: u64,
    pub oplog_entries_applied: u64,
}

impl Default for RecipientState {
    fn default() -> Self {
        RecipientState {
            progress: RecipientProgress::CreatingCollection,
            bytes_copied: 0,
            documents_copied: 0,
            oplog_entries_applied: 0,
        }
    }
}

/// The roles a shard plays in a resharding operation. A shard may be both donor and recipient.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardingParticipantState {
    pub donor: Option<DonorState>,
    pub recipient: Option<RecipientState>,
}

impl ReshardingParticipantState {
    /// Returns true once every role of the shard has finished its cleanup.
    pub fn is_done(&self) -> bool {
        self.donor
            .as_ref()
            .map(|d| d.progress == DonorProgress::Done)
            .unwrap_or(true)
            && self
                .recipient
                .as_ref()
                .map(|r| r.progress == RecipientProgress::Done)
                .unwrap_or(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutableState {
    Transaction(TransactionParticipantState),
    Resharding(ReshardingParticipantState),
}

/// A participant of an operation, owned inline by its document and addressed by shard id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub shard_id: ShardId,
    pub vote_state: VoteState,
    pub mutable_state: MutableState,
}

impl ParticipantRef {
    pub fn transaction(shard_id: ShardId) -> Self {
        ParticipantRef {
            shard_id,
            vote_state: VoteState::Unknown,
            mutable_state: MutableState::Transaction(TransactionParticipantState::default()),
        }
    }

    pub fn resharding(shard_id: ShardId) -> Self {
        ParticipantRef {
            shard_id,
            vote_state: VoteState::Unknown,
            mutable_state: MutableState::Resharding(ReshardingParticipantState::default()),
        }
    }

    pub fn transaction_state(&self) -> Option<&TransactionParticipantState> {
        match &self.mutable_state {
            MutableState::Transaction(state) => Some(state),
            MutableState::Resharding(_) => None,
        }
    }

    pub fn transaction_state_mut(&mut self) -> Option<&mut TransactionParticipantState> {
        match &mut self.mutable_state {
            MutableState::Transaction(state) => Some(state),
            MutableState::Resharding(_) => None,
        }
    }

    pub fn resharding_state(&self) -> Option<&ReshardingParticipantState> {
        match &self.mutable_state {
            MutableState::Resharding(state) => Some(state),
            MutableState::Transaction(_) => None,
        }
    }

    pub fn resharding_state_mut(&mut self) -> Option<&mut ReshardingParticipantState> {
        match &mut self.mutable_state {
            MutableState::Resharding(state) => Some(state),
            MutableState::Transaction(_) => None,
        }
    }

    pub fn is_donor(&self) -> bool {
        self.resharding_state()
            .map(|s| s.donor.is_some())
            .unwrap_or(false)
    }

    pub fn is_recipient(&self) -> bool {
        self.resharding_state()
            .map(|s| s.recipient.is_some())
            .unwrap_or(false)
    }

    pub fn donor(&self) -> Option<&DonorState> {
        self.resharding_state().and_then(|s| s.donor.as_ref())
    }

    pub fn recipient(&self) -> Option<&RecipientState> {
        self.resharding_state().and_then(|s| s.recipient.as_ref())
    }

    pub fn donor_mut(&mut self) -> Option<&mut DonorState> {
        self.resharding_state_mut().and_then(|s| s.donor.as_mut())
    }

    pub fn recipient_mut(&mut self) -> Option<&mut RecipientState> {
        self.resharding_state_mut().and_then(|s| s.recipient.as_mut())
    }
}
