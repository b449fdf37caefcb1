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

//! The durable operation document and the types it is made of.

mod decision;
mod ids;
mod operation;
mod participant;
mod phase;
mod resharding;

pub use decision::{AbortReason, Decision, DecisionRecord};
pub use ids::{OperationId, ShardId, Timestamp};
pub use operation::{OperationDocument, OperationKind};
pub use participant::{
    DonorProgress, DonorState, MutableState, ParticipantRef, RecipientProgress, RecipientState,
    ReshardingParticipantState, TransactionParticipantState, VoteState,
};
pub use phase::{CommitPhase, Phase, ReshardingPhase};
pub use resharding::{ApproxCopySize, ReshardingMetadata};
