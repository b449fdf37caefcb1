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

use crate::document::{AbortReason, ShardId};
use crate::proxy::{CommandKind, ParticipantReply, ParticipantReport, ParticipantSignal, PrepareVote};

/// The inputs of the coordinator state machines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Begin a newly persisted operation.
    Start,
    /// Re-issue whatever the durable phase still waits on, after recovery or an unreachable
    /// participant.
    Resume,
    /// The deadline of the current phase may have passed.
    Alarm,
    /// Abort the operation if it has not been decided.
    Cancel(AbortReason),
    /// The client no longer needs the outcome; remove the document once the operation is done.
    Forget,
    Deliver(ShardId, ParticipantMessage),
}

/// A participant's answer, as seen by a state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticipantMessage {
    Vote(PrepareVote),
    Ack(CommandKind),
    Report(ParticipantReport),
    Unreachable(CommandKind),
}

impl ParticipantMessage {
    pub fn from_signal(signal: ParticipantSignal) -> Self {
        match signal {
            ParticipantSignal::Vote(vote) => ParticipantMessage::Vote(vote),
            ParticipantSignal::Ack(_, ParticipantReply::Report(report)) => {
                ParticipantMessage::Report(report)
            }
            ParticipantSignal::Ack(kind, _) => ParticipantMessage::Ack(kind),
            ParticipantSignal::Unreachable(kind) => ParticipantMessage::Unreachable(kind),
        }
    }
}
