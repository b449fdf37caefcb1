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

use crate::document::{AbortReason, ApproxCopySize, Timestamp};
use crate::routing::{ChunkAssignment, ShardKeyPattern};

/// A command the coordinator sends to a participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticipantCommand {
    Prepare,
    Commit {
        commit_timestamp: Option<Timestamp>,
    },
    Abort,
    CreateCollection {
        temporary_namespace: String,
        shard_key: ShardKeyPattern,
        chunks: Vec<ChunkAssignment>,
    },
    PrepareToDonate,
    CloneStart {
        clone_timestamp: Timestamp,
        approx_copy_size: ApproxCopySize,
    },
    OplogApplyStart,
    BlockWrites,
    FinalizeApply,
    CommitResharding,
    AbortResharding,
    Forget,
}

impl ParticipantCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ParticipantCommand::Prepare => CommandKind::Prepare,
            ParticipantCommand::Commit { .. } => CommandKind::Commit,
            ParticipantCommand::Abort => CommandKind::Abort,
            ParticipantCommand::CreateCollection { .. } => CommandKind::CreateCollection,
            ParticipantCommand::PrepareToDonate => CommandKind::PrepareToDonate,
            ParticipantCommand::CloneStart { .. } => CommandKind::CloneStart,
            ParticipantCommand::OplogApplyStart => CommandKind::OplogApplyStart,
            ParticipantCommand::BlockWrites => CommandKind::BlockWrites,
            ParticipantCommand::FinalizeApply => CommandKind::FinalizeApply,
            ParticipantCommand::CommitResharding => CommandKind::CommitResharding,
            ParticipantCommand::AbortResharding => CommandKind::AbortResharding,
            ParticipantCommand::Forget => CommandKind::Forget,
        }
    }
}

/// The kind of a `ParticipantCommand`, without its arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Prepare,
    Commit,
    Abort,
    CreateCollection,
    PrepareToDonate,
    CloneStart,
    OplogApplyStart,
    BlockWrites,
    FinalizeApply,
    CommitResharding,
    AbortResharding,
    Forget,
}

impl CommandKind {
    /// Returns true for commands sent before the operation's decision. A failure of one of these
    /// may still abort the operation.
    pub fn is_pre_decision(&self) -> bool {
        !matches!(
            self,
            CommandKind::Commit
                | CommandKind::Abort
                | CommandKind::CommitResharding
                | CommandKind::AbortResharding
                | CommandKind::Forget
        )
    }
}

/// Progress reported by a resharding participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantReport {
    DonorReady {
        min_fetch_timestamp: Timestamp,
        bytes_to_clone: u64,
        documents_to_clone: u64,
    },
    RecipientCloned {
        bytes_copied: u64,
        documents_copied: u64,
    },
    RecipientCaughtUp {
        oplog_entries_applied: u64,
    },
    RecipientConsistent {
        oplog_entries_applied: u64,
    },
}

/// A successful answer to a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticipantReply {
    Prepared { prepare_timestamp: Timestamp },
    Ok,
    Report(ParticipantReport),
}

/// A participant's answer to a prepare request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrepareVote {
    Commit { prepare_timestamp: Timestamp },
    Abort { reason: AbortReason },
}

/// The only outcomes of a command that reach a state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticipantSignal {
    Vote(PrepareVote),
    Ack(CommandKind, ParticipantReply),
    /// The participant did not answer within the retry budget. This is never a vote.
    Unreachable(CommandKind),
}
