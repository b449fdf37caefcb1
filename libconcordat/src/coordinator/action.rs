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

use std::time::SystemTime;

use crate::document::{Decision, DecisionRecord, OperationDocument, Phase, ShardId};
use crate::proxy::{CommandKind, ParticipantCommand};
use crate::routing::RoutingChange;

/// The outputs of the coordinator state machines, carried out in order by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Durably replace the operation document. `alarm` is the document's deadline.
    Update {
        document: OperationDocument,
        alarm: Option<SystemTime>,
    },
    Send(ShardId, ParticipantCommand),
    Routing(RoutingChange),
    RemoveDocument,
    Notify(CoordinatorNotification),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorNotification {
    /// The decision is durable.
    Decided(DecisionRecord),
    /// Every participant has acknowledged the decision.
    Completed(Decision),
    /// A cancel arrived after the decision and was ignored.
    CancelRejected(Phase),
    ParticipantUnreachable(ShardId, CommandKind),
    /// A participant message did not apply to the current phase.
    MessageDropped(String),
}

/// Queues a durable write of `document`, arming the alarm at its deadline.
pub(crate) fn push_update(document: &OperationDocument, actions: &mut Vec<CoordinatorAction>) {
    actions.push(CoordinatorAction::Update {
        document: document.clone(),
        alarm: document.deadline(),
    });
}

pub(crate) fn push_dropped(message: String, actions: &mut Vec<CoordinatorAction>) {
    actions.push(CoordinatorAction::Notify(
        CoordinatorNotification::MessageDropped(message),
    ));
}
