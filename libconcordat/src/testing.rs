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

//! Test doubles: scripted participants, a store that simulates a coordinator crash, and helpers
//! for assembling coordinator services.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{CoordinatorConfig, CoordinatorConfigBuilder};
use crate::coordinator::{CoordinatorServices, CoordinatorServicesBuilder, LeaderTerm};
use crate::document::{Decision, OperationDocument, OperationId, ShardId, Timestamp};
use crate::error::{InternalError, StoreError};
use crate::proxy::{
    CommandKind, ErrorCode, ParticipantCommand, ParticipantReply, ParticipantReport,
    ParticipantTransport, RemoteError,
};
use crate::routing::RoutingCatalog;
use crate::store::{MemoryOperationStore, OperationStore};
use crate::time::ManualTimeSource;

/// What a fake participant has done so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardView {
    pub prepared: bool,
    pub committed: bool,
    pub aborted: bool,
    pub commit_timestamp: Option<Timestamp>,
    pub commit_count: u32,
    pub collection_created: bool,
    pub writes_blocked: bool,
    pub resharding_outcome: Option<Decision>,
    pub forgotten: bool,
    /// Commands which contradicted an earlier decision, such as a commit after an abort.
    pub violations: u32,
}

#[derive(Default)]
struct FakeShard {
    view: ShardView,
    failures: VecDeque<ErrorCode>,
    command_failures: HashMap<CommandKind, (ErrorCode, usize)>,
    unreachable: bool,
    abort_vote: Option<ErrorCode>,
    prepare_timestamp: Option<Timestamp>,
    donor_stats: Option<(Timestamp, u64, u64)>,
    hold_reports: bool,
}

/// A transport whose participants live in memory and follow the participant protocol.
#[derive(Default)]
pub struct FakeTransport {
    shards: Mutex<HashMap<ShardId, FakeShard>>,
    sent: Mutex<Vec<(ShardId, CommandKind)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    /// The next `times` commands to the shard fail with `code`.
    pub fn fail_next(&self, shard: &ShardId, code: ErrorCode, times: usize) {
        let mut shards = self.shards.lock();
        let state = shards.entry(shard.clone()).or_default();
        state.failures.extend(std::iter::repeat(code).take(times));
    }

    /// The next `times` commands of `kind` to the shard fail with `code`.
    pub fn fail_command(&self, shard: &ShardId, kind: CommandKind, code: ErrorCode, times: usize) {
        self.shards
            .lock()
            .entry(shard.clone())
            .or_default()
            .command_failures
            .insert(kind, (code, times));
    }

    pub fn set_unreachable(&self, shard: &ShardId, unreachable: bool) {
        self.shards.lock().entry(shard.clone()).or_default().unreachable = unreachable;
    }

    /// The shard answers every prepare with `code`.
    pub fn vote_abort(&self, shard: &ShardId, code: ErrorCode) {
        self.shards.lock().entry(shard.clone()).or_default().abort_vote = Some(code);
    }

    pub fn set_prepare_timestamp(&self, shard: &ShardId, timestamp: Timestamp) {
        self.shards
            .lock()
            .entry(shard.clone())
            .or_default()
            .prepare_timestamp = Some(timestamp);
    }

    pub fn set_donor_stats(
        &self,
        shard: &ShardId,
        min_fetch_timestamp: Timestamp,
        bytes_to_clone: u64,
        documents_to_clone: u64,
    ) {
        self.shards.lock().entry(shard.clone()).or_default().donor_stats =
            Some((min_fetch_timestamp, bytes_to_clone, documents_to_clone));
    }

    /// While set, resharding progress commands are acknowledged without a report; the report is
    /// expected to arrive later through the coordinator's inbox.
    pub fn hold_reports(&self, shard: &ShardId, hold: bool) {
        self.shards.lock().entry(shard.clone()).or_default().hold_reports = hold;
    }

    pub fn view(&self, shard: &ShardId) -> ShardView {
        self.shards
            .lock()
            .get(shard)
            .map(|s| s.view.clone())
            .unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<(ShardId, CommandKind)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self, shard: &ShardId, kind: CommandKind) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(s, k)| s == shard && *k == kind)
            .count()
    }
}

impl ParticipantTransport for FakeTransport {
    fn send(
        &self,
        shard: &ShardId,
        _operation_id: &OperationId,
        command: &ParticipantCommand,
    ) -> Result<ParticipantReply, RemoteError> {
        self.sent.lock().push((shard.clone(), command.kind()));

        let mut shards = self.shards.lock();
        let state = shards.entry(shard.clone()).or_default();
        if state.unreachable {
            return Err(RemoteError::new(ErrorCode::HostUnreachable, "unreachable"));
        }
        if let Some(code) = state.failures.pop_front() {
            return Err(RemoteError::new(code, "scripted failure"));
        }
        if let Some((code, remaining)) = state.command_failures.get_mut(&command.kind()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::new(*code, "scripted command failure"));
            }
        }

        let view = &mut state.view;
        match command {
            ParticipantCommand::Prepare => {
                if let Some(code) = state.abort_vote {
                    view.aborted = true;
                    return Err(RemoteError::new(code, "vote abort"));
                }
                if view.aborted {
                    return Err(RemoteError::new(ErrorCode::NoSuchTransaction, "aborted"));
                }
                view.prepared = true;
                Ok(ParticipantReply::Prepared {
                    prepare_timestamp: state.prepare_timestamp.unwrap_or(Timestamp::new(1)),
                })
            }
            ParticipantCommand::Commit { commit_timestamp } => {
                if view.aborted || !view.prepared {
                    view.violations += 1;
                    return Err(RemoteError::new(ErrorCode::ProtocolError, "not prepared"));
                }
                view.committed = true;
                view.commit_count += 1;
                view.commit_timestamp = *commit_timestamp;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::Abort => {
                if view.committed {
                    view.violations += 1;
                    return Err(RemoteError::new(ErrorCode::ProtocolError, "committed"));
                }
                view.aborted = true;
                view.prepared = false;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::CreateCollection { .. } => {
                view.collection_created = true;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::PrepareToDonate => {
                if state.hold_reports {
                    return Ok(ParticipantReply::Ok);
                }
                let (min_fetch_timestamp, bytes_to_clone, documents_to_clone) =
                    state.donor_stats.unwrap_or((Timestamp::new(1), 0, 0));
                Ok(ParticipantReply::Report(ParticipantReport::DonorReady {
                    min_fetch_timestamp,
                    bytes_to_clone,
                    documents_to_clone,
                }))
            }
            ParticipantCommand::CloneStart {
                approx_copy_size, ..
            } => {
                if state.hold_reports {
                    return Ok(ParticipantReply::Ok);
                }
                Ok(ParticipantReply::Report(ParticipantReport::RecipientCloned {
                    bytes_copied: approx_copy_size.approx_bytes_to_copy,
                    documents_copied: approx_copy_size.approx_documents_to_copy,
                }))
            }
            ParticipantCommand::OplogApplyStart => {
                if state.hold_reports {
                    return Ok(ParticipantReply::Ok);
                }
                Ok(ParticipantReply::Report(
                    ParticipantReport::RecipientCaughtUp {
                        oplog_entries_applied: 0,
                    },
                ))
            }
            ParticipantCommand::BlockWrites => {
                view.writes_blocked = true;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::FinalizeApply => {
                if state.hold_reports {
                    return Ok(ParticipantReply::Ok);
                }
                Ok(ParticipantReply::Report(
                    ParticipantReport::RecipientConsistent {
                        oplog_entries_applied: 0,
                    },
                ))
            }
            ParticipantCommand::CommitResharding => {
                if view.resharding_outcome == Some(Decision::Abort) {
                    view.violations += 1;
                }
                view.resharding_outcome = Some(Decision::Commit);
                view.writes_blocked = false;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::AbortResharding => {
                if view.resharding_outcome == Some(Decision::Commit) {
                    view.violations += 1;
                }
                view.resharding_outcome = Some(Decision::Abort);
                view.writes_blocked = false;
                Ok(ParticipantReply::Ok)
            }
            ParticipantCommand::Forget => {
                view.forgotten = true;
                Ok(ParticipantReply::Ok)
            }
        }
    }
}

type CrashPredicate = Box<dyn Fn(&OperationDocument) -> bool + Send + Sync>;

/// Wraps a store and fails every write after the first successful write matching a predicate,
/// as if the coordinator process died right after that write became durable.
pub struct CrashingStore {
    inner: Arc<MemoryOperationStore>,
    crash_after: CrashPredicate,
    crashed: AtomicBool,
}

impl CrashingStore {
    pub fn new<F>(inner: Arc<MemoryOperationStore>, crash_after: F) -> Self
    where
        F: Fn(&OperationDocument) -> bool + Send + Sync + 'static,
    {
        CrashingStore {
            inner,
            crash_after: Box::new(crash_after),
            crashed: AtomicBool::new(false),
        }
    }

    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.has_crashed() {
            return Err(StoreError::Internal(InternalError::with_message("simulated crash")));
        }
        Ok(())
    }

    fn observe(&self, document: &OperationDocument) {
        if (self.crash_after)(document) {
            self.crashed.store(true, Ordering::SeqCst);
        }
    }
}

impl OperationStore for CrashingStore {
    fn persist(&self, document: &OperationDocument) -> Result<OperationDocument, StoreError> {
        self.check()?;
        let stored = self.inner.persist(document)?;
        self.observe(&stored);
        Ok(stored)
    }

    fn read(&self, operation_id: &OperationId) -> Result<OperationDocument, StoreError> {
        self.inner.read(operation_id)
    }

    fn compare_and_set(
        &self,
        document: &OperationDocument,
        expected_version: u64,
    ) -> Result<OperationDocument, StoreError> {
        self.check()?;
        let stored = self.inner.compare_and_set(document, expected_version)?;
        self.observe(&stored);
        Ok(stored)
    }

    fn delete(&self, operation_id: &OperationId, expected_version: u64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(operation_id, expected_version)
    }

    fn list(&self) -> Result<Vec<OperationDocument>, StoreError> {
        self.inner.list()
    }
}

/// A configuration which never sleeps and gives up quickly on unreachable participants.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfigBuilder::new()
        .with_prepare_timeout(Duration::from_secs(30))
        .with_backoff(Duration::ZERO, Duration::ZERO)
        .with_decision_retry_ceiling(3)
        .build()
        .expect("valid test configuration")
}

pub fn services(
    store: Arc<dyn OperationStore>,
    transport: Arc<FakeTransport>,
    clock: ManualTimeSource,
    routing: Arc<RoutingCatalog>,
    term: u64,
) -> CoordinatorServices<Arc<FakeTransport>, ManualTimeSource> {
    services_with_config(store, transport, clock, routing, term, test_config())
}

pub fn services_with_config(
    store: Arc<dyn OperationStore>,
    transport: Arc<FakeTransport>,
    clock: ManualTimeSource,
    routing: Arc<RoutingCatalog>,
    term: u64,
    config: CoordinatorConfig,
) -> CoordinatorServices<Arc<FakeTransport>, ManualTimeSource> {
    CoordinatorServicesBuilder::new()
        .with_store(store)
        .with_transport(transport)
        .with_time_source(clock)
        .with_routing(routing)
        .with_config(config)
        .with_term(LeaderTerm::new(term, format!("config-{}", term)))
        .build()
        .expect("valid services")
}
