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

use std::collections::HashSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{AlgorithmError, InvalidStateError};

use super::{
    CommitPhase, Decision, DecisionRecord, DonorState, MutableState, OperationId,
    ParticipantRef, Phase, RecipientState, ReshardingMetadata, ReshardingPhase, ShardId,
    VoteState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Transaction,
    Resharding,
    TenantMigration,
}

impl OperationKind {
    /// Returns true if the operation is driven by the two-phase commit state machine.
    pub fn is_two_phase(&self) -> bool {
        matches!(
            self,
            OperationKind::Transaction | OperationKind::TenantMigration
        )
    }
}

/// The durable state of a coordinated operation.
///
/// The document is only mutated by the coordinator instance that owns it; every change becomes
/// visible to other instances through the store's compare-and-set, which also assigns `version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDocument {
    operation_id: OperationId,
    kind: OperationKind,
    participants: Vec<ParticipantRef>,
    phase: Phase,
    decision: Option<DecisionRecord>,
    created_at: SystemTime,
    last_modified_at: SystemTime,
    version: u64,
    term: u64,
    deadline: Option<SystemTime>,
    forget_requested: bool,
    resharding: Option<ReshardingMetadata>,
}

impl OperationDocument {
    /// Creates the document of a transaction or tenant migration with a fixed participant list.
    pub fn new_two_phase(
        kind: OperationKind,
        participants: Vec<ShardId>,
        now: SystemTime,
    ) -> Result<Self, InvalidStateError> {
        if !kind.is_two_phase() {
            return Err(InvalidStateError::with_message(format!(
                "{:?} is not a two-phase commit operation",
                kind
            )));
        }
        if participants.is_empty() {
            return Err(InvalidStateError::with_message(
                "an operation requires at least one participant".into(),
            ));
        }
        check_unique(participants.iter())?;

        Ok(OperationDocument {
            operation_id: OperationId::new(),
            kind,
            participants: participants
                .into_iter()
                .map(ParticipantRef::transaction)
                .collect(),
            phase: Phase::TwoPhase(CommitPhase::Init),
            decision: None,
            created_at: now,
            last_modified_at: now,
            version: 0,
            term: 0,
            deadline: None,
            forget_requested: false,
            resharding: None,
        })
    }

    /// Creates the document of a resharding operation. Donors and recipients are added while the
    /// operation is `Initializing`.
    pub fn new_resharding(
        operation_id: OperationId,
        metadata: ReshardingMetadata,
        now: SystemTime,
    ) -> Self {
        OperationDocument {
            operation_id,
            kind: OperationKind::Resharding,
            participants: Vec::new(),
            phase: Phase::Resharding(ReshardingPhase::Initializing),
            decision: None,
            created_at: now,
            last_modified_at: now,
            version: 0,
            term: 0,
            deadline: None,
            forget_requested: false,
            resharding: Some(metadata),
        }
    }

    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn participants(&self) -> &[ParticipantRef] {
        &self.participants
    }

    pub fn participant(&self, shard_id: &ShardId) -> Option<&ParticipantRef> {
        self.participants.iter().find(|p| &p.shard_id == shard_id)
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.participants.iter().map(|p| p.shard_id.clone()).collect()
    }

    pub fn donors(&self) -> impl Iterator<Item = &ParticipantRef> {
        self.participants.iter().filter(|p| p.is_donor())
    }

    pub fn recipients(&self) -> impl Iterator<Item = &ParticipantRef> {
        self.participants.iter().filter(|p| p.is_recipient())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn decision(&self) -> Option<&DecisionRecord> {
        self.decision.as_ref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_modified_at(&self) -> SystemTime {
        self.last_modified_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    pub fn forget_requested(&self) -> bool {
        self.forget_requested
    }

    pub fn resharding(&self) -> Option<&ReshardingMetadata> {
        self.resharding.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }

    pub(crate) fn participant_mut(&mut self, shard_id: &ShardId) -> Option<&mut ParticipantRef> {
        self.participants
            .iter_mut()
            .find(|p| &p.shard_id == shard_id)
    }

    pub(crate) fn participants_mut(&mut self) -> &mut [ParticipantRef] {
        &mut self.participants
    }

    pub(crate) fn resharding_mut(&mut self) -> Option<&mut ReshardingMetadata> {
        self.resharding.as_mut()
    }

    /// Adds a donor. Donors are added before any recipient, while the operation initializes.
    pub(crate) fn add_donor(&mut self, shard_id: ShardId) -> Result<(), InvalidStateError> {
        self.check_initializing()?;
        if self.participants.iter().any(|p| p.is_recipient()) {
            return Err(InvalidStateError::with_message(format!(
                "cannot add donor {} after recipients",
                shard_id
            )));
        }
        if self.participant(&shard_id).is_some() {
            return Err(InvalidStateError::with_message(format!(
                "{} is already a donor",
                shard_id
            )));
        }
        let mut participant = ParticipantRef::resharding(shard_id);
        if let Some(state) = participant.resharding_state_mut() {
            state.donor = Some(DonorState::default());
        }
        self.participants.push(participant);
        Ok(())
    }

    /// Adds a recipient. A shard which is already a donor takes on both roles.
    pub(crate) fn add_recipient(&mut self, shard_id: ShardId) -> Result<(), InvalidStateError> {
        self.check_initializing()?;
        match self.participant_mut(&shard_id) {
            Some(participant) => match participant.resharding_state_mut() {
                Some(state) if state.recipient.is_none() => {
                    state.recipient = Some(RecipientState::default());
                    Ok(())
                }
                _ => Err(InvalidStateError::with_message(format!(
                    "{} is already a recipient",
                    shard_id
                ))),
            },
            None => {
                let mut participant = ParticipantRef::resharding(shard_id);
                if let Some(state) = participant.resharding_state_mut() {
                    state.recipient = Some(RecipientState::default());
                }
                self.participants.push(participant);
                Ok(())
            }
        }
    }

    fn check_initializing(&self) -> Result<(), InvalidStateError> {
        if self.phase != Phase::Resharding(ReshardingPhase::Initializing) {
            return Err(InvalidStateError::with_message(format!(
                "participants can not be added in phase {}",
                self.phase
            )));
        }
        Ok(())
    }

    /// Moves the document to `phase`. Decided phases require the matching decision to be set.
    pub(crate) fn set_phase<P: Into<Phase>>(&mut self, phase: P) -> Result<(), AlgorithmError> {
        let phase = phase.into();
        if !self.phase.can_transition(&phase) {
            return Err(AlgorithmError::InvalidState(
                InvalidStateError::with_message(format!(
                    "cannot move operation {} from {} to {}",
                    self.operation_id, self.phase, phase
                )),
            ));
        }
        let required = match phase {
            Phase::Resharding(ReshardingPhase::Committing) => Some(Decision::Commit),
            Phase::Resharding(ReshardingPhase::Aborting) => Some(Decision::Abort),
            _ => None,
        };
        match (&self.decision, required) {
            (None, _) if phase.is_decided() => {
                return Err(AlgorithmError::InvalidState(
                    InvalidStateError::with_message(format!(
                        "operation {} cannot enter {} without a decision",
                        self.operation_id, phase
                    )),
                ))
            }
            (Some(record), Some(required)) if record.decision != required => {
                return Err(AlgorithmError::protocol_violation(format!(
                    "operation {} decided {} but attempted to enter {}",
                    self.operation_id, record.decision, phase
                )))
            }
            _ => (),
        }
        self.phase = phase;
        Ok(())
    }

    /// Records the decision. Recording an identical decision again is a no-op; any other decision
    /// after the first is a protocol violation.
    pub(crate) fn set_decision(&mut self, record: DecisionRecord) -> Result<(), AlgorithmError> {
        match &self.decision {
            Some(existing) if *existing == record => Ok(()),
            Some(existing) => Err(AlgorithmError::protocol_violation(format!(
                "operation {} already decided {}, refusing {}",
                self.operation_id, existing.decision, record.decision
            ))),
            None => {
                self.decision = Some(record);
                Ok(())
            }
        }
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<SystemTime>) {
        self.deadline = deadline;
    }

    pub(crate) fn set_forget_requested(&mut self, forget_requested: bool) {
        self.forget_requested = forget_requested;
    }

    pub(crate) fn touch(&mut self, now: SystemTime) {
        self.last_modified_at = now;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn set_term(&mut self, term: u64) {
        self.term = term;
    }

    /// Checks the structural invariants of the document.
    pub fn validate(&self) -> Result<(), InvalidStateError> {
        check_unique(self.participants.iter().map(|p| &p.shard_id))?;

        let machine_matches = match (&self.phase, self.kind) {
            (Phase::TwoPhase(_), kind) => kind.is_two_phase(),
            (Phase::Resharding(_), kind) => kind == OperationKind::Resharding,
        };
        if !machine_matches {
            return Err(self.invalid(format!(
                "phase {} does not belong to a {:?} operation",
                self.phase, self.kind
            )));
        }

        if self.kind.is_two_phase() {
            if self.participants.is_empty() {
                return Err(self.invalid("has no participants".into()));
            }
            if self.resharding.is_some() {
                return Err(self.invalid("carries resharding metadata".into()));
            }
        } else if self.resharding.is_none() {
            return Err(self.invalid("is missing resharding metadata".into()));
        }

        for participant in &self.participants {
            let state_matches = match participant.mutable_state {
                MutableState::Transaction(_) => self.kind.is_two_phase(),
                MutableState::Resharding(ref state) => {
                    self.kind == OperationKind::Resharding
                        && (state.donor.is_some() || state.recipient.is_some())
                }
            };
            if !state_matches {
                return Err(self.invalid(format!(
                    "participant {} has the wrong state",
                    participant.shard_id
                )));
            }
        }

        match (&self.decision, self.phase.is_decided()) {
            (Some(_), false) => {
                return Err(self.invalid(format!("is decided in phase {}", self.phase)))
            }
            (None, true) => {
                return Err(self.invalid(format!("has no decision in phase {}", self.phase)))
            }
            _ => (),
        }

        if let Some(record) = &self.decision {
            let branch_matches = match self.phase {
                Phase::Resharding(ReshardingPhase::Committing) => record.is_commit(),
                Phase::Resharding(ReshardingPhase::Aborting) => !record.is_commit(),
                _ => true,
            };
            let commit_is_unanimous = !(record.is_commit()
                && self
                    .participants
                    .iter()
                    .any(|p| p.vote_state == VoteState::VotedAbort));
            if !branch_matches || !commit_is_unanimous {
                return Err(self.invalid(format!(
                    "decision {} contradicts its phase or votes",
                    record.decision
                )));
            }
        }

        Ok(())
    }

    fn invalid(&self, message: String) -> InvalidStateError {
        InvalidStateError::with_message(format!("operation {} {}", self.operation_id, message))
    }
}

fn check_unique<'a, I>(shards: I) -> Result<(), InvalidStateError>
where
    I: Iterator<Item = &'a ShardId>,
{
    let mut seen = HashSet::new();
    for shard in shards {
        if !seen.insert(shard) {
            return Err(InvalidStateError::with_message(format!(
                "participant {} is listed more than once",
                shard
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::proxy::ErrorCode;
    use crate::routing::ShardKeyPattern;

    use super::super::AbortReason;
    use super::*;

    fn shards(ids: &[&str]) -> Vec<ShardId> {
        ids.iter().map(|id| ShardId::from(*id)).collect()
    }

    fn resharding_doc() -> OperationDocument {
        let id = OperationId::new();
        let metadata =
            ReshardingMetadata::new(&id, "db.coll", ShardKeyPattern::new("newKey"), vec![]);
        OperationDocument::new_resharding(id, metadata, SystemTime::now())
    }

    /// Test that two-phase documents reject empty and duplicate participant lists.
    #[test]
    fn test_new_two_phase_participants() {
        let now = SystemTime::now();
        assert!(OperationDocument::new_two_phase(OperationKind::Transaction, vec![], now).is_err());
        assert!(OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards(&["s0", "s0"]),
            now
        )
        .is_err());
        assert!(OperationDocument::new_two_phase(
            OperationKind::Resharding,
            shards(&["s0"]),
            now
        )
        .is_err());

        let doc = OperationDocument::new_two_phase(
            OperationKind::TenantMigration,
            shards(&["s0", "s1"]),
            now,
        )
        .expect("valid document");
        assert_eq!(doc.participants().len(), 2);
        assert_eq!(doc.phase(), Phase::TwoPhase(CommitPhase::Init));
        assert!(doc.validate().is_ok());
    }

    /// Test that the decision is write-once: the same record is accepted again, a different one
    /// is a protocol violation.
    #[test]
    fn test_decision_write_once() -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards(&["s0"]),
            SystemTime::now(),
        )?;
        let commit = DecisionRecord::commit(None);

        doc.set_decision(commit.clone())?;
        doc.set_decision(commit.clone())?;
        match doc.set_decision(DecisionRecord::abort(AbortReason::new(
            ErrorCode::NoSuchTransaction,
            "late abort",
        ))) {
            Err(AlgorithmError::ProtocolViolation(_)) => (),
            res => panic!("expected protocol violation, got {:?}", res),
        }
        assert_eq!(doc.decision(), Some(&commit));

        Ok(())
    }

    /// Test that a decided phase can not be entered without a decision and that the invariant is
    /// checked by validate.
    #[test]
    fn test_decided_phase_requires_decision() -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards(&["s0", "s1"]),
            SystemTime::now(),
        )?;
        assert!(doc.set_phase(CommitPhase::DecisionMade).is_err());

        doc.set_decision(DecisionRecord::commit(None))?;
        assert!(doc.validate().is_err());

        doc.set_phase(CommitPhase::DecisionMade)?;
        assert!(doc.validate().is_ok());
        assert!(doc.set_phase(CommitPhase::CollectingVotes).is_err());

        Ok(())
    }

    /// Test that a commit decision with an abort vote fails validation.
    #[test]
    fn test_validate_commit_requires_unanimity() -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards(&["s0", "s1"]),
            SystemTime::now(),
        )?;
        if let Some(p) = doc.participant_mut(&ShardId::from("s1")) {
            p.vote_state = VoteState::VotedAbort;
        }
        doc.set_decision(DecisionRecord::commit(None))?;
        doc.set_phase(CommitPhase::DecisionMade)?;
        assert!(doc.validate().is_err());

        Ok(())
    }

    /// Test that donors are added before recipients and that a shard may hold both roles.
    #[test]
    fn test_resharding_participants() -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = resharding_doc();
        doc.add_donor("s0".into())?;
        doc.add_donor("s1".into())?;
        assert!(doc.add_donor("s1".into()).is_err());

        doc.add_recipient("s1".into())?;
        doc.add_recipient("s2".into())?;
        assert!(doc.add_recipient("s2".into()).is_err());
        assert!(doc.add_donor("s3".into()).is_err());

        assert_eq!(doc.participants().len(), 3);
        assert_eq!(doc.donors().count(), 2);
        assert_eq!(doc.recipients().count(), 2);
        let both = doc.participant(&"s1".into()).expect("s1 present");
        assert!(both.is_donor() && both.is_recipient());
        assert!(doc.validate().is_ok());

        doc.set_phase(ReshardingPhase::PreparingToDonate)?;
        assert!(doc.add_recipient("s4".into()).is_err());

        Ok(())
    }

    /// Test that the resharding branch must agree with the decision.
    #[test]
    fn test_resharding_branch_matches_decision() -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = resharding_doc();
        doc.add_donor("s0".into())?;
        doc.add_recipient("s1".into())?;
        doc.set_phase(ReshardingPhase::BlockingWrites)?;
        doc.set_decision(DecisionRecord::abort(AbortReason::new(
            ErrorCode::ReshardCollectionAborted,
            "aborted by user",
        )))?;

        match doc.set_phase(ReshardingPhase::Committing) {
            Err(AlgorithmError::ProtocolViolation(_)) => (),
            res => panic!("expected protocol violation, got {:?}", res),
        }
        doc.set_phase(ReshardingPhase::Aborting)?;
        assert!(doc.validate().is_ok());

        Ok(())
    }

    /// Test that a document survives a JSON round trip with camelCase field names.
    #[test]
    fn test_document_json_field_names() -> Result<(), Box<dyn std::error::Error>> {
        let doc = OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards(&["s0"]),
            SystemTime::now(),
        )?;
        let value = serde_json::to_value(&doc)?;
        assert!(value.get("operationId").is_some());
        assert!(value.get("lastModifiedAt").is_some());
        assert!(value["participants"][0].get("voteState").is_some());
        assert!(value["participants"][0].get("mutableState").is_some());

        let back: OperationDocument = serde_json::from_value(value)?;
        assert_eq!(back, doc);

        Ok(())
    }
}
