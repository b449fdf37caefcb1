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

use std::fmt::{Display, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};

/// Phases of the two-phase commit state machine, in the order they are reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommitPhase {
    Init,
    SentPrepare,
    CollectingVotes,
    DecisionMade,
    SendingDecision,
    AwaitingAcks,
    Done,
}

impl CommitPhase {
    pub fn is_decided(&self) -> bool {
        *self >= CommitPhase::DecisionMade
    }
}

/// Phases of the resharding state machine, in the order they are reached.
///
/// `Committing` and `Aborting` are the two branches out of the abortable phases; neither leads to
/// the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReshardingPhase {
    Initializing,
    PreparingToDonate,
    Cloning,
    ApplyingOplog,
    BlockingWrites,
    Committing,
    Aborting,
    RemovingStateDoc,
    Done,
}

impl ReshardingPhase {
    /// Returns true while the operation may still be aborted.
    pub fn is_abortable(&self) -> bool {
        *self <= ReshardingPhase::BlockingWrites
    }

    pub fn is_decided(&self) -> bool {
        *self >= ReshardingPhase::Committing
    }

    fn can_transition(&self, next: ReshardingPhase) -> bool {
        use ReshardingPhase::*;

        if *self == next {
            return true;
        }
        match next {
            Committing => *self == BlockingWrites,
            Aborting => self.is_abortable(),
            RemovingStateDoc => matches!(self, Committing | Aborting),
            Done => *self == RemovingStateDoc,
            _ => next > *self && self.is_abortable(),
        }
    }
}

/// The phase of an operation document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "machine", content = "phase", rename_all = "camelCase")]
pub enum Phase {
    TwoPhase(CommitPhase),
    Resharding(ReshardingPhase),
}

impl Phase {
    /// Returns true once the operation's decision point has been reached or passed.
    pub fn is_decided(&self) -> bool {
        match self {
            Phase::TwoPhase(phase) => phase.is_decided(),
            Phase::Resharding(phase) => phase.is_decided(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Phase::TwoPhase(CommitPhase::Done) | Phase::Resharding(ReshardingPhase::Done)
        )
    }

    /// Returns true if the document may move from this phase to `next`.
    ///
    /// Phases only move forward, never switch machines, and the resharding commit and abort
    /// branches exclude each other.
    pub fn can_transition(&self, next: &Phase) -> bool {
        match (self, next) {
            (Phase::TwoPhase(current), Phase::TwoPhase(next)) => next >= current,
            (Phase::Resharding(current), Phase::Resharding(next)) => current.can_transition(*next),
            _ => false,
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            Phase::TwoPhase(phase) => write!(f, "{:?}", phase),
            Phase::Resharding(phase) => write!(f, "{:?}", phase),
        }
    }
}

impl From<CommitPhase> for Phase {
    fn from(phase: CommitPhase) -> Self {
        Phase::TwoPhase(phase)
    }
}

impl From<ReshardingPhase> for Phase {
    fn from(phase: ReshardingPhase) -> Self {
        Phase::Resharding(phase)
    }
}
