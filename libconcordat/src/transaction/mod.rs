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

//! Two-phase commit coordination for cross-shard transactions and tenant migrations.

mod algorithm;

use crate::coordinator::{Coordinator, CoordinatorServices};
use crate::document::{OperationDocument, OperationId, OperationKind, ShardId};
use crate::error::CoordinatorError;
use crate::proxy::ParticipantTransport;
use crate::time::TimeSource;

pub use algorithm::TransactionAlgorithm;

pub type TransactionCoordinator<T, TS> = Coordinator<TransactionAlgorithm<TS>, T, TS>;

impl<TS> TransactionAlgorithm<TS>
where
    TS: TimeSource + Clone,
{
    pub fn from_services<T: ParticipantTransport>(services: &CoordinatorServices<T, TS>) -> Self {
        TransactionAlgorithm::new(
            services.time_source().clone(),
            services.config().prepare_timeout(),
        )
    }
}

/// Persists a new two-phase operation over `participants` and returns its driver, ready to run.
pub fn begin<T, TS>(
    services: CoordinatorServices<T, TS>,
    kind: OperationKind,
    participants: Vec<ShardId>,
) -> Result<TransactionCoordinator<T, TS>, CoordinatorError>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    let document =
        OperationDocument::new_two_phase(kind, participants, services.time_source().now())
            .map_err(CoordinatorError::Rejected)?;
    let algorithm = TransactionAlgorithm::from_services(&services);
    Coordinator::create(algorithm, services, document)
}

/// Attaches a driver to a stored two-phase operation and queues its resumption.
pub fn resume<T, TS>(
    services: CoordinatorServices<T, TS>,
    operation_id: &OperationId,
) -> Result<TransactionCoordinator<T, TS>, CoordinatorError>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    let algorithm = TransactionAlgorithm::from_services(&services);
    Coordinator::resume(algorithm, services, operation_id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::CoordinatorConfigBuilder;
    use crate::document::{CommitPhase, Decision, Phase, Timestamp};
    use crate::error::StoreError;
    use crate::proxy::{CommandKind, ErrorCode};
    use crate::routing::RoutingCatalog;
    use crate::store::{MemoryOperationStore, OperationStore};
    use crate::testing::{self, CrashingStore, FakeTransport};
    use crate::time::ManualTimeSource;

    use super::*;

    fn shards(ids: &[&str]) -> Vec<ShardId> {
        ids.iter().map(|id| ShardId::from(*id)).collect()
    }

    struct Cluster {
        store: Arc<MemoryOperationStore>,
        transport: Arc<FakeTransport>,
        clock: ManualTimeSource,
    }

    impl Cluster {
        fn new() -> Self {
            Cluster {
                store: Arc::new(MemoryOperationStore::new()),
                transport: Arc::new(FakeTransport::new()),
                clock: ManualTimeSource::default(),
            }
        }

        fn services(
            &self,
            term: u64,
        ) -> CoordinatorServices<Arc<FakeTransport>, ManualTimeSource> {
            testing::services(
                self.store.clone(),
                self.transport.clone(),
                self.clock.clone(),
                Arc::new(RoutingCatalog::new()),
                term,
            )
        }

        fn assert_atomic(&self, participants: &[ShardId], decision: Decision) {
            for shard in participants {
                let view = self.transport.view(shard);
                assert_eq!(view.violations, 0, "{} saw a contradicting command", shard);
                match decision {
                    Decision::Commit => assert!(view.committed && !view.aborted, "{}", shard),
                    Decision::Abort => assert!(!view.committed, "{}", shard),
                }
            }
        }
    }

    /// Test that a transaction whose participants all prepare commits everywhere and is removed.
    #[test]
    fn test_commit_all_participants() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1", "s2"]);
        cluster
            .transport
            .set_prepare_timestamp(&"s1".into(), Timestamp::new(40));

        let mut coordinator = begin(
            cluster.services(1),
            OperationKind::Transaction,
            participants.clone(),
        )?;
        let status = coordinator.run_to_completion(5)?;

        assert_eq!(status.decision, Some(Decision::Commit));
        assert!(status.removed);
        cluster.assert_atomic(&participants, Decision::Commit);
        for shard in &participants {
            assert_eq!(
                cluster.transport.view(shard).commit_timestamp,
                Some(Timestamp::new(40))
            );
        }
        assert!(cluster.store.list()?.is_empty());

        Ok(())
    }

    /// Test that one abort vote aborts every participant.
    #[test]
    fn test_abort_vote_aborts_everywhere() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1", "s2"]);
        cluster
            .transport
            .vote_abort(&"s2".into(), ErrorCode::NoSuchTransaction);

        let mut coordinator = begin(
            cluster.services(1),
            OperationKind::Transaction,
            participants.clone(),
        )?;
        let status = coordinator.run_to_completion(5)?;

        assert_eq!(status.decision, Some(Decision::Abort));
        cluster.assert_atomic(&participants, Decision::Abort);
        for shard in &participants {
            assert!(cluster.transport.view(shard).aborted);
        }

        Ok(())
    }

    /// Test that tenant migrations follow the same protocol.
    #[test]
    fn test_tenant_migration() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["donor", "recipient"]);
        let mut coordinator = begin(
            cluster.services(1),
            OperationKind::TenantMigration,
            participants.clone(),
        )?;

        assert_eq!(
            coordinator.run_to_completion(5)?.decision,
            Some(Decision::Commit)
        );
        cluster.assert_atomic(&participants, Decision::Commit);

        Ok(())
    }

    /// Test that a participant which stays unreachable past the prepare deadline aborts the
    /// transaction, while one that recovers in time does not.
    #[test]
    fn test_unreachable_participant_until_deadline() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1"]);
        cluster.transport.set_unreachable(&"s1".into(), true);

        let mut coordinator = begin(
            cluster.services(1),
            OperationKind::Transaction,
            participants.clone(),
        )?;
        coordinator.run_until_idle()?;
        assert_eq!(coordinator.status().decision, None);

        // Retried on tick, still unreachable, still before the deadline.
        coordinator.tick()?;
        assert_eq!(coordinator.status().decision, None);
        assert!(cluster.transport.sent_count(&"s1".into(), CommandKind::Prepare) > 3);

        cluster.clock.advance(Duration::from_secs(31));
        coordinator.tick()?;
        assert_eq!(coordinator.status().decision, Some(Decision::Abort));

        cluster.transport.set_unreachable(&"s1".into(), false);
        let status = coordinator.run_to_completion(5)?;
        assert!(status.removed);
        cluster.assert_atomic(&participants, Decision::Abort);

        Ok(())
    }

    /// Test that a participant which cannot be reached for the decision keeps receiving it until
    /// it acknowledges; the commit is never abandoned.
    #[test]
    fn test_decision_retried_until_acknowledged() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1"]);
        cluster.transport.fail_command(
            &"s0".into(),
            CommandKind::Commit,
            ErrorCode::NetworkTimeout,
            5,
        );
        let mut coordinator = begin(
            cluster.services(1),
            OperationKind::Transaction,
            participants.clone(),
        )?;
        coordinator.run_until_idle()?;

        let status = coordinator.status();
        assert_eq!(status.decision, Some(Decision::Commit));
        assert_eq!(status.phase, Phase::TwoPhase(CommitPhase::AwaitingAcks));
        assert!(!cluster.transport.view(&"s0".into()).committed);
        assert!(cluster.transport.view(&"s1".into()).committed);

        // No deadline applies once the decision is made.
        cluster.clock.advance(Duration::from_secs(3600));
        let status = coordinator.run_to_completion(5)?;
        assert!(status.removed);
        assert_eq!(status.decision, Some(Decision::Commit));
        cluster.assert_atomic(&participants, Decision::Commit);

        Ok(())
    }

    /// Test that redelivering commit leaves participants as a single delivery would.
    #[test]
    fn test_idempotent_commit_redelivery() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1"]);
        let config = CoordinatorConfigBuilder::new()
            .with_backoff(Duration::ZERO, Duration::ZERO)
            .with_decision_retry_ceiling(3)
            .with_forget_on_completion(false)
            .build()?;
        let services = testing::services_with_config(
            cluster.store.clone(),
            cluster.transport.clone(),
            cluster.clock.clone(),
            Arc::new(RoutingCatalog::new()),
            1,
            config,
        );
        let mut coordinator = begin(services, OperationKind::Transaction, participants.clone())?;
        coordinator.run_to_completion(5)?;
        let once: Vec<_> = participants
            .iter()
            .map(|s| cluster.transport.view(s))
            .collect();

        // A recovered coordinator redelivers the decision to a participant that already has it.
        let proxy = coordinator.services().proxy().clone();
        let op = *coordinator.operation_id();
        for shard in &participants {
            proxy.send_commit(
                shard,
                &op,
                once[0].commit_timestamp,
                coordinator.services().interrupt(),
            );
        }

        for (shard, before) in participants.iter().zip(once) {
            let after = cluster.transport.view(shard);
            assert_eq!(after.committed, before.committed);
            assert_eq!(after.aborted, before.aborted);
            assert_eq!(after.commit_timestamp, before.commit_timestamp);
            assert_eq!(after.violations, 0);
        }

        // Without forgetOnCompletion the document waits for an explicit forget.
        assert_eq!(
            cluster.store.read(&op)?.phase(),
            Phase::TwoPhase(CommitPhase::Done)
        );
        coordinator.forget()?;
        assert!(matches!(cluster.store.read(&op), Err(StoreError::NotFound(_))));

        Ok(())
    }

    // Runs a transaction with a store that crashes right after the first write in `phase`, then
    // recovers it in a new term and returns the decisions before and after the crash.
    fn crash_and_recover(
        phase: CommitPhase,
    ) -> Result<(Option<Decision>, Decision), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1", "s2"]);
        let crashing = Arc::new(CrashingStore::new(cluster.store.clone(), move |doc| {
            doc.phase() == Phase::TwoPhase(phase)
        }));
        let services = testing::services(
            crashing.clone(),
            cluster.transport.clone(),
            cluster.clock.clone(),
            Arc::new(RoutingCatalog::new()),
            1,
        );

        let mut coordinator = begin(services, OperationKind::Transaction, participants.clone())?;
        let op = *coordinator.operation_id();
        assert!(coordinator.run_until_idle().is_err());
        assert!(crashing.has_crashed());
        let before = cluster.store.read(&op)?;
        assert_eq!(before.phase(), Phase::TwoPhase(phase));
        let decided_before = before.decision().map(|r| r.decision);

        let mut recovered = resume(cluster.services(2), &op)?;
        let status = recovered.run_to_completion(5)?;
        let decision = status.decision.ok_or("no decision after recovery")?;
        assert!(status.removed);
        cluster.assert_atomic(&participants, decision);

        Ok((decided_before, decision))
    }

    /// Test recovery after a crash at SentPrepare: votes are collected again and the
    /// transaction commits.
    #[test]
    fn test_recover_from_sent_prepare() -> Result<(), Box<dyn std::error::Error>> {
        let (before, after) = crash_and_recover(CommitPhase::SentPrepare)?;
        assert_eq!(before, None);
        assert_eq!(after, Decision::Commit);
        Ok(())
    }

    /// Test recovery after a crash right after the decision became durable and before any
    /// participant heard of it: the same decision is delivered.
    #[test]
    fn test_recover_from_decision_made() -> Result<(), Box<dyn std::error::Error>> {
        let (before, after) = crash_and_recover(CommitPhase::DecisionMade)?;
        assert_eq!(before, Some(after));
        Ok(())
    }

    /// Test recovery after a crash while the decision was being sent.
    #[test]
    fn test_recover_from_sending_decision() -> Result<(), Box<dyn std::error::Error>> {
        let (before, after) = crash_and_recover(CommitPhase::SendingDecision)?;
        assert_eq!(before, Some(after));
        Ok(())
    }

    /// Test that a durable abort decision is redelivered after a crash and commit is never sent.
    #[test]
    fn test_recovery_never_changes_decision() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1"]);
        cluster
            .transport
            .vote_abort(&"s1".into(), ErrorCode::NoSuchTransaction);
        let crashing = Arc::new(CrashingStore::new(cluster.store.clone(), |doc| {
            doc.phase() == Phase::TwoPhase(CommitPhase::DecisionMade)
        }));
        let services = testing::services(
            crashing,
            cluster.transport.clone(),
            cluster.clock.clone(),
            Arc::new(RoutingCatalog::new()),
            1,
        );
        let mut coordinator = begin(services, OperationKind::Transaction, participants.clone())?;
        let op = *coordinator.operation_id();
        assert!(coordinator.run_until_idle().is_err());

        let mut recovered = resume(cluster.services(2), &op)?;
        assert_eq!(
            recovered.run_to_completion(5)?.decision,
            Some(Decision::Abort)
        );
        cluster.assert_atomic(&participants, Decision::Abort);
        assert_eq!(cluster.transport.sent_count(&"s0".into(), CommandKind::Commit), 0);

        Ok(())
    }

    /// Test that a driver from an older term steps down once a newer term has written the
    /// document, and can not be attached to it at all afterwards.
    #[test]
    fn test_term_fencing() -> Result<(), Box<dyn std::error::Error>> {
        let cluster = Cluster::new();
        let participants = shards(&["s0", "s1"]);
        cluster.transport.set_unreachable(&"s1".into(), true);

        let mut old = begin(cluster.services(1), OperationKind::Transaction, participants)?;
        old.run_until_idle()?;
        let op = *old.operation_id();

        let mut new = resume(cluster.services(2), &op)?;
        new.run_until_idle()?;
        assert_eq!(cluster.store.read(&op)?.term(), 2);

        cluster.transport.set_unreachable(&"s1".into(), false);
        let err = old.tick().expect_err("old term must step down");
        assert!(err.is_step_down());
        assert!(matches!(
            resume(cluster.services(1), &op),
            Err(CoordinatorError::SteppedDown(_))
        ));

        let status = new.run_to_completion(5)?;
        assert_eq!(status.decision, Some(Decision::Commit));

        Ok(())
    }
}
