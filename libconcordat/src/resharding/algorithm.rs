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

use std::time::Duration;

use crate::algorithm::Algorithm;
use crate::coordinator::{
    push_dropped, push_update, CoordinatorAction, CoordinatorEvent, CoordinatorNotification,
    ParticipantMessage,
};
use crate::document::{
    AbortReason, Decision, DecisionRecord, DonorProgress, DonorState, OperationDocument, Phase,
    RecipientProgress, RecipientState, ReshardingMetadata, ReshardingPhase, ShardId, VoteState,
};
use crate::error::{AlgorithmError, InvalidStateError};
use crate::proxy::{CommandKind, ErrorCode, ParticipantCommand, ParticipantReport, PrepareVote};
use crate::routing::RoutingChange;
use crate::time::TimeSource;

use super::estimate::approx_copy_size;

/// The resharding state machine.
///
/// Each phase waits for every donor or recipient to report the progress it needs, then moves to
/// the next one. Any failure before the new distribution is installed aborts the operation; once
/// `Committing` is durable the operation only moves forward.
pub struct ReshardingAlgorithm<TS>
where
    TS: TimeSource,
{
    time_source: TS,
    critical_section_timeout: Duration,
}

impl<TS> ReshardingAlgorithm<TS>
where
    TS: TimeSource,
{
    pub fn new(time_source: TS, critical_section_timeout: Duration) -> Self {
        ReshardingAlgorithm {
            time_source,
            critical_section_timeout,
        }
    }

    fn critical_section_expired(&self, document: &OperationDocument) -> bool {
        document
            .resharding()
            .and_then(|metadata| metadata.critical_section_expires_at)
            .map(|expires_at| self.time_source.now() >= expires_at)
            .unwrap_or(false)
    }

    // Moves to the next phase once every participant has reached the current phase's goal.
    // Otherwise persists the document if it changed.
    fn advance(
        &self,
        document: OperationDocument,
        changed: bool,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        match resharding_phase(&document)? {
            ReshardingPhase::Initializing
                if all_recipients(&document, |r| {
                    r.progress >= RecipientProgress::AwaitingCloneTimestamp
                }) =>
            {
                self.start_donating(document, actions)
            }
            ReshardingPhase::PreparingToDonate
                if all_donors(&document, |d| d.progress >= DonorProgress::ReadyToDonate) =>
            {
                self.start_cloning(document, actions)
            }
            ReshardingPhase::Cloning
                if all_recipients(&document, |r| r.progress >= RecipientProgress::Applying) =>
            {
                self.start_applying(document, actions)
            }
            ReshardingPhase::ApplyingOplog
                if all_recipients(&document, |r| r.progress >= RecipientProgress::CaughtUp) =>
            {
                self.start_blocking_writes(document, actions)
            }
            ReshardingPhase::BlockingWrites
                if all_donors(&document, |d| d.progress >= DonorProgress::BlockingWrites)
                    && all_recipients(&document, |r| {
                        r.progress >= RecipientProgress::StrictConsistency
                    }) =>
            {
                if self.critical_section_expired(&document) {
                    self.push_abort_actions(document, timeout_reason(), actions)
                } else {
                    self.push_commit_actions(document, actions)
                }
            }
            ReshardingPhase::Committing | ReshardingPhase::Aborting
                if document
                    .participants()
                    .iter()
                    .all(|p| p.vote_state == VoteState::Acknowledged) =>
            {
                self.start_cleanup(document, actions)
            }
            ReshardingPhase::RemovingStateDoc
                if document
                    .participants()
                    .iter()
                    .all(|p| p.resharding_state().map(|s| s.is_done()).unwrap_or(true)) =>
            {
                self.push_complete_actions(document, actions)
            }
            _ => {
                if changed {
                    push_update(&document, actions);
                }
                Ok(())
            }
        }
    }

    fn start_donating(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        document.set_phase(ReshardingPhase::PreparingToDonate)?;
        push_update(&document, actions);
        push_outstanding_sends(&document, actions)
    }

    // Fixes the clone timestamp and the copy estimate, then lets recipients start cloning.
    fn start_cloning(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let clone_timestamp = document
            .donors()
            .filter_map(|p| p.donor().and_then(|d| d.min_fetch_timestamp))
            .max()
            .ok_or_else(|| invalid(&document, "no donor reported a fetch timestamp"))?;
        let num_recipients = document.recipients().count();
        let copy_size = approx_copy_size(
            document.donors().filter_map(|p| p.donor()),
            num_recipients,
        )
        .map_err(AlgorithmError::InvalidState)?;

        info!(
            "Operation {} cloning at {} with an estimate of {} bytes and {} documents per \
             recipient",
            document.operation_id(),
            clone_timestamp,
            copy_size.approx_bytes_to_copy,
            copy_size.approx_documents_to_copy
        );
        let metadata = metadata_mut(&mut document)?;
        metadata.clone_timestamp = Some(clone_timestamp);
        metadata.approx_copy_size = Some(copy_size);
        for participant in document.participants_mut() {
            if let Some(donor) = participant.donor_mut() {
                donor.progress = DonorProgress::Donating;
            }
            if let Some(recipient) = participant.recipient_mut() {
                recipient.progress = RecipientProgress::Cloning;
            }
        }
        document.set_phase(ReshardingPhase::Cloning)?;
        push_update(&document, actions);
        push_outstanding_sends(&document, actions)
    }

    fn start_applying(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        document.set_phase(ReshardingPhase::ApplyingOplog)?;
        push_update(&document, actions);
        push_outstanding_sends(&document, actions)
    }

    // Steps:
    //   - Persist BlockingWrites with the critical section's expiry as the deadline
    //   - Enter the critical section in the routing catalog
    //   - Tell donors to block writes and recipients to finish applying
    fn start_blocking_writes(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let expires_at = self.time_source.now() + self.critical_section_timeout;
        metadata_mut(&mut document)?.critical_section_expires_at = Some(expires_at);
        document.set_deadline(Some(expires_at));
        document.set_phase(ReshardingPhase::BlockingWrites)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Routing(
            RoutingChange::EnterCriticalSection {
                namespace: metadata(&document)?.namespace.clone(),
                operation_id: *document.operation_id(),
                expires_at,
            },
        ));
        push_outstanding_sends(&document, actions)
    }

    // Steps:
    //   - Persist the commit decision and Committing
    //   - Install the new distribution, which also ends the critical section
    //   - Tell every participant to commit
    fn push_commit_actions(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let record = DecisionRecord::commit(None);
        document.set_decision(record.clone())?;
        document.set_deadline(None);
        document.set_phase(ReshardingPhase::Committing)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Notify(CoordinatorNotification::Decided(
            record,
        )));
        actions.push(CoordinatorAction::Routing(commit_distribution(&document)?));
        push_outstanding_sends(&document, actions)
    }

    fn push_abort_actions(
        &self,
        mut document: OperationDocument,
        reason: AbortReason,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        info!(
            "Aborting resharding {}: {}",
            document.operation_id(),
            reason
        );
        let record = DecisionRecord::abort(reason);
        document.set_decision(record.clone())?;
        document.set_deadline(None);
        document.set_phase(ReshardingPhase::Aborting)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Notify(CoordinatorNotification::Decided(
            record,
        )));
        actions.push(CoordinatorAction::Routing(exit_critical_section(&document)?));
        push_outstanding_sends(&document, actions)
    }

    fn start_cleanup(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        document.set_phase(ReshardingPhase::RemovingStateDoc)?;
        push_update(&document, actions);
        push_outstanding_sends(&document, actions)
    }

    fn push_complete_actions(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let decision = decision(&document)?;
        document.set_phase(ReshardingPhase::Done)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Notify(
            CoordinatorNotification::Completed(decision),
        ));
        if document.forget_requested() {
            actions.push(CoordinatorAction::RemoveDocument);
        }
        Ok(())
    }

    fn handle_resume(
        &self,
        document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        match resharding_phase(&document)? {
            ReshardingPhase::BlockingWrites => {
                if self.critical_section_expired(&document) {
                    return self.push_abort_actions(document, timeout_reason(), actions);
                }
                let metadata = metadata(&document)?;
                let expires_at = metadata
                    .critical_section_expires_at
                    .ok_or_else(|| invalid(&document, "has no critical section expiry"))?;
                actions.push(CoordinatorAction::Routing(
                    RoutingChange::EnterCriticalSection {
                        namespace: metadata.namespace.clone(),
                        operation_id: *document.operation_id(),
                        expires_at,
                    },
                ));
            }
            ReshardingPhase::Committing => {
                actions.push(CoordinatorAction::Routing(commit_distribution(&document)?))
            }
            ReshardingPhase::Aborting => {
                actions.push(CoordinatorAction::Routing(exit_critical_section(&document)?))
            }
            ReshardingPhase::Done => {
                if document.forget_requested() {
                    actions.push(CoordinatorAction::RemoveDocument);
                }
                return Ok(());
            }
            _ => (),
        }
        push_outstanding_sends(&document, actions)?;
        self.advance(document, false, actions)
    }

    fn handle_vote(
        &self,
        mut document: OperationDocument,
        shard: ShardId,
        vote: PrepareVote,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let phase = resharding_phase(&document)?;
        match vote {
            PrepareVote::Abort { reason } if phase.is_abortable() => {
                match document.participant_mut(&shard) {
                    Some(participant) => participant.vote_state = VoteState::VotedAbort,
                    None => {
                        push_dropped(format!("failure from unknown participant {}", shard), actions);
                        return Ok(());
                    }
                }
                self.push_abort_actions(document, reason, actions)
            }
            PrepareVote::Abort { reason } => {
                push_dropped(
                    format!("late failure from {} in {:?}: {}", shard, phase, reason),
                    actions,
                );
                Ok(())
            }
            PrepareVote::Commit { .. } => {
                push_dropped(format!("unexpected prepare vote from {}", shard), actions);
                Ok(())
            }
        }
    }

    fn handle_ack(
        &self,
        mut document: OperationDocument,
        shard: ShardId,
        kind: CommandKind,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let phase = resharding_phase(&document)?;
        let decided = document.decision().map(|record| record.decision);
        let participant = match document.participant_mut(&shard) {
            Some(participant) => participant,
            None => {
                push_dropped(format!("{:?} ack from unknown participant {}", kind, shard), actions);
                return Ok(());
            }
        };

        let changed = match kind {
            CommandKind::CreateCollection => match participant.recipient_mut() {
                Some(recipient)
                    if phase == ReshardingPhase::Initializing
                        && recipient.progress == RecipientProgress::CreatingCollection =>
                {
                    recipient.progress = RecipientProgress::AwaitingCloneTimestamp;
                    true
                }
                _ => false,
            },
            CommandKind::BlockWrites => match participant.donor_mut() {
                Some(donor)
                    if phase == ReshardingPhase::BlockingWrites
                        && donor.progress == DonorProgress::Donating =>
                {
                    donor.progress = DonorProgress::BlockingWrites;
                    true
                }
                _ => false,
            },
            CommandKind::CommitResharding | CommandKind::AbortResharding => {
                let expected = match decided {
                    Some(Decision::Commit) => CommandKind::CommitResharding,
                    Some(Decision::Abort) => CommandKind::AbortResharding,
                    None => {
                        push_dropped(format!("{:?} ack from {} before decision", kind, shard), actions);
                        return Ok(());
                    }
                };
                if kind != expected {
                    return Err(AlgorithmError::protocol_violation(format!(
                        "{} acknowledged {:?} but the operation expected {:?}",
                        shard, kind, expected
                    )));
                }
                if participant.vote_state == VoteState::Acknowledged {
                    false
                } else {
                    participant.vote_state = VoteState::Acknowledged;
                    true
                }
            }
            CommandKind::Forget => {
                let state = participant.resharding_state_mut();
                match state {
                    Some(state) if phase == ReshardingPhase::RemovingStateDoc && !state.is_done() => {
                        if let Some(donor) = state.donor.as_mut() {
                            donor.progress = DonorProgress::Done;
                        }
                        if let Some(recipient) = state.recipient.as_mut() {
                            recipient.progress = RecipientProgress::Done;
                        }
                        true
                    }
                    _ => false,
                }
            }
            // Progress arrives as a report; a bare ack only means the command was accepted.
            CommandKind::PrepareToDonate
            | CommandKind::CloneStart
            | CommandKind::OplogApplyStart
            | CommandKind::FinalizeApply => false,
            CommandKind::Prepare | CommandKind::Commit | CommandKind::Abort => {
                push_dropped(format!("unexpected {:?} ack from {}", kind, shard), actions);
                return Ok(());
            }
        };

        self.advance(document, changed, actions)
    }

    fn handle_report(
        &self,
        mut document: OperationDocument,
        shard: ShardId,
        report: ParticipantReport,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let phase = resharding_phase(&document)?;
        if phase.is_decided() {
            push_dropped(format!("late report from {} in {:?}", shard, phase), actions);
            return Ok(());
        }

        let changed = match report {
            ParticipantReport::DonorReady {
                min_fetch_timestamp,
                bytes_to_clone,
                documents_to_clone,
            } => match document.participant_mut(&shard).and_then(|p| p.donor_mut()) {
                Some(donor) => {
                    let ready = phase == ReshardingPhase::PreparingToDonate
                        && donor.progress == DonorProgress::PreparingToDonate;
                    if ready {
                        donor.progress = DonorProgress::ReadyToDonate;
                        donor.min_fetch_timestamp = Some(min_fetch_timestamp);
                        donor.bytes_to_clone = Some(bytes_to_clone);
                        donor.documents_to_clone = Some(documents_to_clone);
                    }
                    ready
                }
                None => {
                    push_dropped(format!("donor report from {}, not a donor", shard), actions);
                    return Ok(());
                }
            },
            ParticipantReport::RecipientCloned {
                bytes_copied,
                documents_copied,
            } => match recipient_in(&mut document, &shard, phase, ReshardingPhase::Cloning, actions)
            {
                Some(recipient) if recipient.progress == RecipientProgress::Cloning => {
                    recipient.progress = RecipientProgress::Applying;
                    recipient.bytes_copied = bytes_copied;
                    recipient.documents_copied = documents_copied;
                    true
                }
                _ => false,
            },
            ParticipantReport::RecipientCaughtUp {
                oplog_entries_applied,
            } => match recipient_in(
                &mut document,
                &shard,
                phase,
                ReshardingPhase::ApplyingOplog,
                actions,
            ) {
                Some(recipient) if recipient.progress == RecipientProgress::Applying => {
                    recipient.progress = RecipientProgress::CaughtUp;
                    recipient.oplog_entries_applied = oplog_entries_applied;
                    true
                }
                _ => false,
            },
            ParticipantReport::RecipientConsistent {
                oplog_entries_applied,
            } => match recipient_in(
                &mut document,
                &shard,
                phase,
                ReshardingPhase::BlockingWrites,
                actions,
            ) {
                Some(recipient) if recipient.progress == RecipientProgress::CaughtUp => {
                    recipient.progress = RecipientProgress::StrictConsistency;
                    recipient.oplog_entries_applied = oplog_entries_applied;
                    true
                }
                _ => false,
            },
        };

        self.advance(document, changed, actions)
    }

    fn handle_unreachable(
        &self,
        document: OperationDocument,
        shard: ShardId,
        kind: CommandKind,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        if resharding_phase(&document)? == ReshardingPhase::BlockingWrites
            && self.critical_section_expired(&document)
        {
            return self.push_abort_actions(document, timeout_reason(), actions);
        }
        actions.push(CoordinatorAction::Notify(
            CoordinatorNotification::ParticipantUnreachable(shard, kind),
        ));
        Ok(())
    }
}

impl<TS> Algorithm for ReshardingAlgorithm<TS>
where
    TS: TimeSource,
{
    type Event = CoordinatorEvent;
    type Action = CoordinatorAction;
    type Context = OperationDocument;

    fn event(
        &self,
        event: Self::Event,
        mut document: Self::Context,
    ) -> Result<Vec<Self::Action>, AlgorithmError> {
        let mut actions = Vec::new();
        let phase = resharding_phase(&document)?;

        match event {
            // A new operation starts by creating the recipients' collections, which is the
            // outstanding work of Initializing.
            CoordinatorEvent::Start | CoordinatorEvent::Resume => {
                self.handle_resume(document, &mut actions)?
            }
            CoordinatorEvent::Alarm => {
                if phase == ReshardingPhase::BlockingWrites
                    && self.critical_section_expired(&document)
                {
                    self.push_abort_actions(document, timeout_reason(), &mut actions)?;
                }
            }
            CoordinatorEvent::Cancel(reason) => {
                if phase.is_abortable() {
                    self.push_abort_actions(document, reason, &mut actions)?;
                } else {
                    actions.push(CoordinatorAction::Notify(
                        CoordinatorNotification::CancelRejected(document.phase()),
                    ));
                }
            }
            CoordinatorEvent::Forget => {
                if phase == ReshardingPhase::Done {
                    actions.push(CoordinatorAction::RemoveDocument);
                } else if !document.forget_requested() {
                    document.set_forget_requested(true);
                    push_update(&document, &mut actions);
                }
            }
            CoordinatorEvent::Deliver(shard, message) => match message {
                ParticipantMessage::Vote(vote) => {
                    self.handle_vote(document, shard, vote, &mut actions)?
                }
                ParticipantMessage::Ack(kind) => {
                    self.handle_ack(document, shard, kind, &mut actions)?
                }
                ParticipantMessage::Report(report) => {
                    self.handle_report(document, shard, report, &mut actions)?
                }
                ParticipantMessage::Unreachable(kind) => {
                    self.handle_unreachable(document, shard, kind, &mut actions)?
                }
            },
        }

        Ok(actions)
    }
}

// Sends every command the current phase is still waiting on.
fn push_outstanding_sends(
    document: &OperationDocument,
    actions: &mut Vec<CoordinatorAction>,
) -> Result<(), AlgorithmError> {
    let metadata = metadata(document)?;
    let phase = resharding_phase(document)?;
    for participant in document.participants() {
        let shard = &participant.shard_id;
        let mut send = |command| actions.push(CoordinatorAction::Send(shard.clone(), command));
        let donor = participant.donor().map(|d| d.progress);
        let recipient = participant.recipient().map(|r| r.progress);

        match phase {
            ReshardingPhase::Initializing => {
                if recipient == Some(RecipientProgress::CreatingCollection) {
                    send(ParticipantCommand::CreateCollection {
                        temporary_namespace: metadata.temporary_namespace.clone(),
                        shard_key: metadata.new_shard_key.clone(),
                        chunks: metadata.chunk_plan.clone(),
                    });
                }
            }
            ReshardingPhase::PreparingToDonate => {
                if donor == Some(DonorProgress::PreparingToDonate) {
                    send(ParticipantCommand::PrepareToDonate);
                }
            }
            ReshardingPhase::Cloning => {
                if recipient == Some(RecipientProgress::Cloning) {
                    let clone_timestamp = metadata
                        .clone_timestamp
                        .ok_or_else(|| invalid(document, "is cloning without a clone timestamp"))?;
                    send(ParticipantCommand::CloneStart {
                        clone_timestamp,
                        approx_copy_size: metadata.approx_copy_size.unwrap_or_default(),
                    });
                }
            }
            ReshardingPhase::ApplyingOplog => {
                if recipient == Some(RecipientProgress::Applying) {
                    send(ParticipantCommand::OplogApplyStart);
                }
            }
            ReshardingPhase::BlockingWrites => {
                if donor == Some(DonorProgress::Donating) {
                    send(ParticipantCommand::BlockWrites);
                }
                if recipient == Some(RecipientProgress::CaughtUp) {
                    send(ParticipantCommand::FinalizeApply);
                }
            }
            ReshardingPhase::Committing => {
                if participant.vote_state != VoteState::Acknowledged {
                    send(ParticipantCommand::CommitResharding);
                }
            }
            ReshardingPhase::Aborting => {
                if participant.vote_state != VoteState::Acknowledged {
                    send(ParticipantCommand::AbortResharding);
                }
            }
            ReshardingPhase::RemovingStateDoc => {
                if !participant
                    .resharding_state()
                    .map(|s| s.is_done())
                    .unwrap_or(true)
                {
                    send(ParticipantCommand::Forget);
                }
            }
            ReshardingPhase::Done => (),
        }
    }
    Ok(())
}

// The recipient state of `shard` if the operation is in `expected`. A report from a shard
// which is not a recipient is dropped.
fn recipient_in<'a>(
    document: &'a mut OperationDocument,
    shard: &ShardId,
    phase: ReshardingPhase,
    expected: ReshardingPhase,
    actions: &mut Vec<CoordinatorAction>,
) -> Option<&'a mut RecipientState> {
    let recipient = document
        .participant_mut(shard)
        .and_then(|p| p.recipient_mut());
    if recipient.is_none() {
        push_dropped(format!("recipient report from {}, not a recipient", shard), actions);
    }
    recipient.filter(|_| phase == expected)
}

fn all_donors<F>(document: &OperationDocument, predicate: F) -> bool
where
    F: Fn(&DonorState) -> bool,
{
    document
        .participants()
        .iter()
        .filter_map(|p| p.donor())
        .all(predicate)
}

fn all_recipients<F>(document: &OperationDocument, predicate: F) -> bool
where
    F: Fn(&RecipientState) -> bool,
{
    document
        .participants()
        .iter()
        .filter_map(|p| p.recipient())
        .all(predicate)
}

fn commit_distribution(document: &OperationDocument) -> Result<RoutingChange, AlgorithmError> {
    let metadata = metadata(document)?;
    Ok(RoutingChange::CommitDistribution {
        namespace: metadata.namespace.clone(),
        operation_id: *document.operation_id(),
        shard_key: metadata.new_shard_key.clone(),
        chunks: metadata.chunk_plan.clone(),
    })
}

fn exit_critical_section(document: &OperationDocument) -> Result<RoutingChange, AlgorithmError> {
    Ok(RoutingChange::ExitCriticalSection {
        namespace: metadata(document)?.namespace.clone(),
        operation_id: *document.operation_id(),
    })
}

fn timeout_reason() -> AbortReason {
    AbortReason::new(
        ErrorCode::ReshardingCriticalSectionTimeout,
        "the critical section expired before recipients were consistent",
    )
}

fn resharding_phase(document: &OperationDocument) -> Result<ReshardingPhase, AlgorithmError> {
    match document.phase() {
        Phase::Resharding(phase) => Ok(phase),
        phase => Err(invalid(document, &format!("in phase {} is not a resharding", phase))),
    }
}

fn decision(document: &OperationDocument) -> Result<Decision, AlgorithmError> {
    document
        .decision()
        .map(|record| record.decision)
        .ok_or_else(|| invalid(document, "can not complete without a decision"))
}

fn metadata(document: &OperationDocument) -> Result<&ReshardingMetadata, AlgorithmError> {
    document
        .resharding()
        .ok_or_else(|| invalid(document, "is missing resharding metadata"))
}

fn metadata_mut(
    document: &mut OperationDocument,
) -> Result<&mut ReshardingMetadata, AlgorithmError> {
    let operation_id = *document.operation_id();
    document.resharding_mut().ok_or_else(|| {
        AlgorithmError::InvalidState(InvalidStateError::with_message(format!(
            "operation {} is missing resharding metadata",
            operation_id
        )))
    })
}

fn invalid(document: &OperationDocument, message: &str) -> AlgorithmError {
    AlgorithmError::InvalidState(InvalidStateError::with_message(format!(
        "operation {} {}",
        document.operation_id(),
        message
    )))
}
