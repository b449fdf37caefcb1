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
    AbortReason, CommitPhase, Decision, DecisionRecord, OperationDocument, Phase, ShardId,
    Timestamp, VoteState,
};
use crate::error::{AlgorithmError, InvalidStateError};
use crate::proxy::{CommandKind, ErrorCode, ParticipantCommand, PrepareVote};
use crate::time::TimeSource;

/// The two-phase commit state machine, used for transactions and tenant migrations.
///
/// Any abort vote, prepare failure or expired prepare deadline decides abort; commit requires a
/// commit vote from every participant. The decision is always part of a durable update before
/// any participant is told about it, and once decided the machine only redelivers that decision.
pub struct TransactionAlgorithm<TS>
where
    TS: TimeSource,
{
    time_source: TS,
    prepare_timeout: Duration,
}

impl<TS> TransactionAlgorithm<TS>
where
    TS: TimeSource,
{
    pub fn new(time_source: TS, prepare_timeout: Duration) -> Self {
        TransactionAlgorithm {
            time_source,
            prepare_timeout,
        }
    }

    fn deadline_passed(&self, document: &OperationDocument) -> bool {
        document
            .deadline()
            .map(|deadline| self.time_source.now() >= deadline)
            .unwrap_or(false)
    }

    // Sends Prepare to every participant which has not voted, moving the document through
    // SentPrepare to CollectingVotes. Vote states change only when a vote arrives.
    fn push_prepare_actions(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        if document.phase() == Phase::TwoPhase(CommitPhase::Init) {
            document.set_deadline(Some(self.time_source.now() + self.prepare_timeout));
            document.set_phase(CommitPhase::SentPrepare)?;
            push_update(&document, actions);
        }

        for participant in document.participants() {
            if matches!(
                participant.vote_state,
                VoteState::Unknown | VoteState::Prepared
            ) {
                actions.push(CoordinatorAction::Send(
                    participant.shard_id.clone(),
                    ParticipantCommand::Prepare,
                ));
            }
        }

        if document.phase() == Phase::TwoPhase(CommitPhase::SentPrepare) {
            document.set_phase(CommitPhase::CollectingVotes)?;
            push_update(&document, actions);
        }
        Ok(())
    }

    // Records the decision durably, then starts delivering it.
    fn push_decision_actions(
        &self,
        mut document: OperationDocument,
        record: DecisionRecord,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        document.set_decision(record.clone())?;
        document.set_deadline(None);
        document.set_phase(CommitPhase::DecisionMade)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Notify(CoordinatorNotification::Decided(
            record,
        )));
        self.push_delivery_actions(document, actions)
    }

    // Sends the durable decision to every participant which has not acknowledged it.
    fn push_delivery_actions(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let record = document.decision().cloned().ok_or_else(|| {
            AlgorithmError::InvalidState(InvalidStateError::with_message(format!(
                "operation {} has no decision to deliver",
                document.operation_id()
            )))
        })?;

        let pending: Vec<ShardId> = document
            .participants()
            .iter()
            .filter(|p| p.vote_state != VoteState::Acknowledged)
            .map(|p| p.shard_id.clone())
            .collect();
        if pending.is_empty() {
            return self.push_complete_actions(document, actions);
        }

        if commit_phase(&document)? < CommitPhase::SendingDecision {
            document.set_phase(CommitPhase::SendingDecision)?;
            push_update(&document, actions);
        }

        let command = match record.decision {
            Decision::Commit => ParticipantCommand::Commit {
                commit_timestamp: record.commit_timestamp,
            },
            Decision::Abort => ParticipantCommand::Abort,
        };
        for shard in pending {
            actions.push(CoordinatorAction::Send(shard, command.clone()));
        }

        if document.phase() != Phase::TwoPhase(CommitPhase::AwaitingAcks) {
            document.set_phase(CommitPhase::AwaitingAcks)?;
            push_update(&document, actions);
        }
        Ok(())
    }

    fn push_complete_actions(
        &self,
        mut document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let decision = document
            .decision()
            .map(|record| record.decision)
            .ok_or_else(|| {
                AlgorithmError::InvalidState(InvalidStateError::with_message(format!(
                    "operation {} can not complete without a decision",
                    document.operation_id()
                )))
            })?;
        document.set_phase(CommitPhase::Done)?;
        push_update(&document, actions);
        actions.push(CoordinatorAction::Notify(
            CoordinatorNotification::Completed(decision),
        ));
        if document.forget_requested() {
            actions.push(CoordinatorAction::RemoveDocument);
        }
        Ok(())
    }

    fn push_abort_actions(
        &self,
        document: OperationDocument,
        reason: AbortReason,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        info!(
            "Aborting operation {}: {}",
            document.operation_id(),
            reason
        );
        self.push_decision_actions(document, DecisionRecord::abort(reason), actions)
    }

    fn handle_vote(
        &self,
        mut document: OperationDocument,
        shard: ShardId,
        vote: PrepareVote,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        let phase = commit_phase(&document)?;
        let current = match document.participant(&shard) {
            Some(participant) => participant.vote_state,
            None => {
                push_dropped(format!("vote from unknown participant {}", shard), actions);
                return Ok(());
            }
        };

        if phase.is_decided() {
            let committed = document
                .decision()
                .map(|record| record.is_commit())
                .unwrap_or(false);
            return match vote {
                PrepareVote::Abort { reason } if committed => {
                    Err(AlgorithmError::protocol_violation(format!(
                        "{} voted abort ({}) on committed operation {}",
                        shard,
                        reason,
                        document.operation_id()
                    )))
                }
                _ => {
                    push_dropped(format!("late vote from {} in {:?}", shard, phase), actions);
                    Ok(())
                }
            };
        }

        match vote {
            PrepareVote::Commit { prepare_timestamp } => {
                if current == VoteState::VotedAbort {
                    return Err(AlgorithmError::protocol_violation(format!(
                        "{} voted commit after voting abort",
                        shard
                    )));
                }
                if let Some(participant) = document.participant_mut(&shard) {
                    participant.vote_state = VoteState::VotedCommit;
                    if let Some(state) = participant.transaction_state_mut() {
                        state.prepare_timestamp = Some(prepare_timestamp);
                    }
                }

                let all_voted = document
                    .participants()
                    .iter()
                    .all(|p| p.vote_state == VoteState::VotedCommit);
                if all_voted {
                    let commit_timestamp = max_prepare_timestamp(&document);
                    self.push_decision_actions(
                        document,
                        DecisionRecord::commit(commit_timestamp),
                        actions,
                    )
                } else {
                    if current != VoteState::VotedCommit {
                        push_update(&document, actions);
                    }
                    Ok(())
                }
            }
            PrepareVote::Abort { reason } => {
                if let Some(participant) = document.participant_mut(&shard) {
                    participant.vote_state = VoteState::VotedAbort;
                    if let Some(state) = participant.transaction_state_mut() {
                        state.abort_reason = Some(reason.clone());
                    }
                }
                self.push_abort_actions(document, reason, actions)
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
        let decision = match document.decision() {
            Some(record) => record.decision,
            None => {
                push_dropped(format!("{:?} ack from {} before decision", kind, shard), actions);
                return Ok(());
            }
        };
        let expected = match decision {
            Decision::Commit => CommandKind::Commit,
            Decision::Abort => CommandKind::Abort,
        };
        match kind {
            CommandKind::Commit | CommandKind::Abort if kind != expected => {
                return Err(AlgorithmError::protocol_violation(format!(
                    "{} acknowledged {:?} but operation {} decided {}",
                    shard,
                    kind,
                    document.operation_id(),
                    decision
                )))
            }
            CommandKind::Commit | CommandKind::Abort => (),
            _ => {
                push_dropped(format!("unexpected {:?} ack from {}", kind, shard), actions);
                return Ok(());
            }
        }

        match document.participant_mut(&shard) {
            Some(participant) if participant.vote_state == VoteState::Acknowledged => {
                return Ok(())
            }
            Some(participant) => participant.vote_state = VoteState::Acknowledged,
            None => {
                push_dropped(format!("ack from unknown participant {}", shard), actions);
                return Ok(());
            }
        }

        if document.is_done() {
            return Ok(());
        }
        let all_acked = document
            .participants()
            .iter()
            .all(|p| p.vote_state == VoteState::Acknowledged);
        if all_acked {
            self.push_complete_actions(document, actions)
        } else {
            push_update(&document, actions);
            Ok(())
        }
    }

    fn handle_unreachable(
        &self,
        document: OperationDocument,
        shard: ShardId,
        kind: CommandKind,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        if kind == CommandKind::Prepare
            && !commit_phase(&document)?.is_decided()
            && self.deadline_passed(&document)
        {
            let reason = AbortReason::from_shard(
                ErrorCode::ExceededTimeLimit,
                "participant did not vote before the prepare deadline",
                shard,
            );
            return self.push_abort_actions(document, reason, actions);
        }
        actions.push(CoordinatorAction::Notify(
            CoordinatorNotification::ParticipantUnreachable(shard, kind),
        ));
        Ok(())
    }

    fn handle_resume(
        &self,
        document: OperationDocument,
        actions: &mut Vec<CoordinatorAction>,
    ) -> Result<(), AlgorithmError> {
        match commit_phase(&document)? {
            CommitPhase::Init => self.push_prepare_actions(document, actions),
            CommitPhase::SentPrepare | CommitPhase::CollectingVotes => {
                if let Some(participant) = document
                    .participants()
                    .iter()
                    .find(|p| p.vote_state == VoteState::VotedAbort)
                {
                    let reason = participant
                        .transaction_state()
                        .and_then(|s| s.abort_reason.clone())
                        .unwrap_or_else(|| {
                            AbortReason::from_shard(
                                ErrorCode::NoSuchTransaction,
                                "participant voted abort",
                                participant.shard_id.clone(),
                            )
                        });
                    return self.push_abort_actions(document, reason, actions);
                }
                if document
                    .participants()
                    .iter()
                    .all(|p| p.vote_state == VoteState::VotedCommit)
                {
                    let commit_timestamp = max_prepare_timestamp(&document);
                    return self.push_decision_actions(
                        document,
                        DecisionRecord::commit(commit_timestamp),
                        actions,
                    );
                }
                if self.deadline_passed(&document) {
                    return self.push_abort_actions(
                        document,
                        AbortReason::new(ErrorCode::ExceededTimeLimit, "prepare deadline passed"),
                        actions,
                    );
                }
                self.push_prepare_actions(document, actions)
            }
            CommitPhase::DecisionMade | CommitPhase::SendingDecision | CommitPhase::AwaitingAcks => {
                self.push_delivery_actions(document, actions)
            }
            CommitPhase::Done => {
                if document.forget_requested() {
                    actions.push(CoordinatorAction::RemoveDocument);
                }
                Ok(())
            }
        }
    }
}

impl<TS> Algorithm for TransactionAlgorithm<TS>
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
        let phase = commit_phase(&document)?;

        match event {
            // Steps:
            //   - Mark every participant as asked to prepare, set the prepare deadline
            //   - Persist SentPrepare, then send Prepare to all participants
            //   - Persist CollectingVotes
            CoordinatorEvent::Start => {
                if phase == CommitPhase::Init {
                    self.push_prepare_actions(document, &mut actions)?;
                } else {
                    self.handle_resume(document, &mut actions)?;
                }
            }
            CoordinatorEvent::Resume => self.handle_resume(document, &mut actions)?,
            CoordinatorEvent::Alarm => {
                if !phase.is_decided() && phase != CommitPhase::Init && self.deadline_passed(&document)
                {
                    self.push_abort_actions(
                        document,
                        AbortReason::new(ErrorCode::ExceededTimeLimit, "prepare deadline passed"),
                        &mut actions,
                    )?;
                }
            }
            CoordinatorEvent::Cancel(reason) => {
                if phase.is_decided() {
                    actions.push(CoordinatorAction::Notify(
                        CoordinatorNotification::CancelRejected(document.phase()),
                    ));
                } else {
                    self.push_abort_actions(document, reason, &mut actions)?;
                }
            }
            CoordinatorEvent::Forget => {
                if phase == CommitPhase::Done {
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
                ParticipantMessage::Unreachable(kind) => {
                    self.handle_unreachable(document, shard, kind, &mut actions)?
                }
                ParticipantMessage::Report(report) => push_dropped(
                    format!("{} sent a resharding report {:?}", shard, report),
                    &mut actions,
                ),
            },
        }

        Ok(actions)
    }
}

fn commit_phase(document: &OperationDocument) -> Result<CommitPhase, AlgorithmError> {
    match document.phase() {
        Phase::TwoPhase(phase) => Ok(phase),
        phase => Err(AlgorithmError::InvalidState(InvalidStateError::with_message(
            format!(
                "operation {} in phase {} is not a two-phase commit",
                document.operation_id(),
                phase
            ),
        ))),
    }
}

fn max_prepare_timestamp(document: &OperationDocument) -> Option<Timestamp> {
    document
        .participants()
        .iter()
        .filter_map(|p| p.transaction_state().and_then(|s| s.prepare_timestamp))
        .max()
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use crate::document::OperationKind;
    use crate::time::ManualTimeSource;

    use super::*;

    fn algorithm(clock: &ManualTimeSource) -> TransactionAlgorithm<ManualTimeSource> {
        TransactionAlgorithm::new(clock.clone(), Duration::from_secs(30))
    }

    fn document(shards: &[&str]) -> OperationDocument {
        OperationDocument::new_two_phase(
            OperationKind::Transaction,
            shards.iter().map(|s| ShardId::from(*s)).collect(),
            SystemTime::UNIX_EPOCH,
        )
        .expect("valid document")
    }

    // The document as it would be after the driver carried out the updates.
    fn last_update(actions: &[CoordinatorAction]) -> OperationDocument {
        actions
            .iter()
            .rev()
            .find_map(|action| match action {
                CoordinatorAction::Update { document, .. } => Some(document.clone()),
                _ => None,
            })
            .expect("an update")
    }

    fn vote_commit(shard: &str, ts: u64) -> CoordinatorEvent {
        CoordinatorEvent::Deliver(
            shard.into(),
            ParticipantMessage::Vote(PrepareVote::Commit {
                prepare_timestamp: Timestamp::new(ts),
            }),
        )
    }

    fn collecting(
        alg: &TransactionAlgorithm<ManualTimeSource>,
        shards: &[&str],
    ) -> OperationDocument {
        let actions = alg
            .event(CoordinatorEvent::Start, document(shards))
            .expect("start");
        last_update(&actions)
    }

    /// Test that Start persists SentPrepare before sending Prepare, and arms the prepare deadline.
    #[test]
    fn test_start_persists_before_prepare() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let actions = alg.event(CoordinatorEvent::Start, document(&["s0", "s1"]))?;

        assert_eq!(actions.len(), 4);
        match &actions[0] {
            CoordinatorAction::Update { document, alarm } => {
                assert_eq!(document.phase(), Phase::TwoPhase(CommitPhase::SentPrepare));
                assert_eq!(*alarm, Some(clock.now() + Duration::from_secs(30)));
                assert_eq!(document.deadline(), *alarm);
            }
            action => panic!("expected update, got {:?}", action),
        }
        assert_eq!(
            actions[1],
            CoordinatorAction::Send("s0".into(), ParticipantCommand::Prepare)
        );
        assert_eq!(
            actions[2],
            CoordinatorAction::Send("s1".into(), ParticipantCommand::Prepare)
        );
        assert_eq!(
            last_update(&actions).phase(),
            Phase::TwoPhase(CommitPhase::CollectingVotes)
        );

        Ok(())
    }

    /// Test that participants stay Unknown until they vote, and that resuming only asks the
    /// unanswered participants to prepare.
    #[test]
    fn test_vote_state_unknown_until_vote() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0", "s1"]);
        assert!(doc
            .participants()
            .iter()
            .all(|p| p.vote_state == VoteState::Unknown));

        let doc = last_update(&alg.event(vote_commit("s0", 3), doc)?);
        let states: Vec<VoteState> = doc.participants().iter().map(|p| p.vote_state).collect();
        assert_eq!(states, vec![VoteState::VotedCommit, VoteState::Unknown]);

        let actions = alg.event(CoordinatorEvent::Resume, doc)?;
        let prepared: Vec<&ShardId> = actions
            .iter()
            .filter_map(|action| match action {
                CoordinatorAction::Send(shard, ParticipantCommand::Prepare) => Some(shard),
                _ => None,
            })
            .collect();
        assert_eq!(prepared, vec![&ShardId::from("s1")]);

        Ok(())
    }

    /// Test that unanimous commit votes decide commit at the highest prepare timestamp, and that
    /// the decision is persisted before it is sent.
    #[test]
    fn test_unanimous_commit() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0", "s1"]);

        let actions = alg.event(vote_commit("s0", 7), doc)?;
        assert_eq!(actions.len(), 1);
        let doc = last_update(&actions);
        assert!(doc.decision().is_none());

        let actions = alg.event(vote_commit("s1", 5), doc)?;
        let first_send = actions
            .iter()
            .position(|a| matches!(a, CoordinatorAction::Send(..)))
            .expect("decision sent");
        let decided_update = actions
            .iter()
            .position(|a| {
                matches!(a, CoordinatorAction::Update { document, .. } if document.decision().is_some())
            })
            .expect("decision persisted");
        assert!(decided_update < first_send);

        let expected = CoordinatorAction::Send(
            "s0".into(),
            ParticipantCommand::Commit {
                commit_timestamp: Some(Timestamp::new(7)),
            },
        );
        assert!(actions.contains(&expected));
        assert_eq!(
            last_update(&actions).phase(),
            Phase::TwoPhase(CommitPhase::AwaitingAcks)
        );

        Ok(())
    }

    /// Test that a single abort vote decides abort whatever the other votes are.
    #[test]
    fn test_any_abort_vote_aborts() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0", "s1", "s2"]);
        let doc = last_update(&alg.event(vote_commit("s0", 1), doc)?);

        let actions = alg.event(
            CoordinatorEvent::Deliver(
                "s1".into(),
                ParticipantMessage::Vote(PrepareVote::Abort {
                    reason: AbortReason::from_shard(
                        ErrorCode::NoSuchTransaction,
                        "write conflict",
                        "s1".into(),
                    ),
                }),
            ),
            doc,
        )?;
        let doc = last_update(&actions);
        assert_eq!(
            doc.decision().map(|r| r.decision),
            Some(Decision::Abort)
        );
        assert!(actions.contains(&CoordinatorAction::Send(
            "s2".into(),
            ParticipantCommand::Abort
        )));

        // The remaining vote arrives late and changes nothing.
        let actions = alg.event(vote_commit("s2", 3), doc.clone())?;
        assert!(matches!(
            actions.as_slice(),
            [CoordinatorAction::Notify(CoordinatorNotification::MessageDropped(_))]
        ));

        Ok(())
    }

    /// Test that the prepare deadline aborts an operation still collecting votes.
    #[test]
    fn test_alarm_after_deadline_aborts() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0", "s1"]);

        assert!(alg.event(CoordinatorEvent::Alarm, doc.clone())?.is_empty());

        clock.advance(Duration::from_secs(31));
        let doc = last_update(&alg.event(CoordinatorEvent::Alarm, doc)?);
        let record = doc.decision().expect("decided");
        assert_eq!(record.decision, Decision::Abort);
        assert_eq!(
            record.abort_reason.as_ref().map(|r| r.code),
            Some(ErrorCode::ExceededTimeLimit)
        );
        assert_eq!(doc.deadline(), None);

        Ok(())
    }

    /// Test that an acknowledgement of the wrong decision is a protocol violation.
    #[test]
    fn test_ack_contradicting_decision() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0"]);
        let doc = last_update(&alg.event(vote_commit("s0", 1), doc)?);

        match alg.event(
            CoordinatorEvent::Deliver("s0".into(), ParticipantMessage::Ack(CommandKind::Abort)),
            doc.clone(),
        ) {
            Err(AlgorithmError::ProtocolViolation(_)) => (),
            res => panic!("expected protocol violation, got {:?}", res),
        }

        let actions = alg.event(
            CoordinatorEvent::Deliver("s0".into(), ParticipantMessage::Ack(CommandKind::Commit)),
            doc,
        )?;
        assert_eq!(last_update(&actions).phase(), Phase::TwoPhase(CommitPhase::Done));
        assert!(actions.contains(&CoordinatorAction::Notify(
            CoordinatorNotification::Completed(Decision::Commit)
        )));

        Ok(())
    }

    /// Test that cancellation aborts before the decision and is rejected afterwards.
    #[test]
    fn test_cancel() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let reason = AbortReason::new(ErrorCode::Interrupted, "cancelled by client");

        let doc = collecting(&alg, &["s0", "s1"]);
        let aborted = last_update(&alg.event(CoordinatorEvent::Cancel(reason.clone()), doc)?);
        assert_eq!(
            aborted.decision().map(|r| r.decision),
            Some(Decision::Abort)
        );

        let doc = collecting(&alg, &["s0"]);
        let committed = last_update(&alg.event(vote_commit("s0", 1), doc)?);
        let actions = alg.event(CoordinatorEvent::Cancel(reason), committed.clone())?;
        assert_eq!(
            actions,
            vec![CoordinatorAction::Notify(
                CoordinatorNotification::CancelRejected(committed.phase())
            )]
        );

        Ok(())
    }

    /// Test that resuming a decided operation redelivers the recorded decision only to
    /// participants which have not acknowledged it.
    #[test]
    fn test_resume_redelivers_decision() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualTimeSource::default();
        let alg = algorithm(&clock);
        let doc = collecting(&alg, &["s0", "s1"]);
        let doc = last_update(&alg.event(vote_commit("s0", 2), doc)?);
        let doc = last_update(&alg.event(vote_commit("s1", 4), doc)?);
        let doc = last_update(&alg.event(
            CoordinatorEvent::Deliver("s0".into(), ParticipantMessage::Ack(CommandKind::Commit)),
            doc,
        )?);

        let actions = alg.event(CoordinatorEvent::Resume, doc)?;
        let sends: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, CoordinatorAction::Send(..)))
            .collect();
        assert_eq!(
            sends,
            vec![&CoordinatorAction::Send(
                "s1".into(),
                ParticipantCommand::Commit {
                    commit_timestamp: Some(Timestamp::new(4))
                }
            )]
        );

        Ok(())
    }
}
