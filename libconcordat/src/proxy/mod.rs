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

//! The coordinator's client for participant shards.
//!
//! Every outcome of a command, including transport failures, is reduced to a
//! [`ParticipantSignal`]. The proxy never turns a missing answer into a vote; only a participant's
//! own non-retryable error before the decision is an abort vote.

mod command;
mod error_code;
mod retry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use crate::document::{AbortReason, OperationId, ShardId, Timestamp};
use crate::time::TimeSource;

pub use command::{
    CommandKind, ParticipantCommand, ParticipantReply, ParticipantReport, ParticipantSignal,
    PrepareVote,
};
pub use error_code::{ErrorCode, RemoteError};
pub use retry::{Interrupt, RetryPolicy};

/// Delivers one command to one participant and returns its answer.
///
/// Requests are correlated by the operation id and the shard. Participants must treat a repeated
/// command as they treated the first one.
pub trait ParticipantTransport: Send + Sync {
    fn send(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        command: &ParticipantCommand,
    ) -> Result<ParticipantReply, RemoteError>;
}

impl<T: ParticipantTransport + ?Sized> ParticipantTransport for Arc<T> {
    fn send(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        command: &ParticipantCommand,
    ) -> Result<ParticipantReply, RemoteError> {
        (**self).send(shard, operation_id, command)
    }
}

pub struct ParticipantProxy<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource,
{
    transport: T,
    time_source: TS,
    retry_policy: RetryPolicy,
}

impl<T, TS> ParticipantProxy<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource,
{
    pub fn new(transport: T, time_source: TS, retry_policy: RetryPolicy) -> Self {
        ParticipantProxy {
            transport,
            time_source,
            retry_policy,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Asks a participant to prepare, retrying transient errors until `deadline`.
    pub fn send_prepare(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        deadline: Option<SystemTime>,
        interrupt: &Interrupt,
    ) -> ParticipantSignal {
        self.dispatch(
            shard,
            operation_id,
            ParticipantCommand::Prepare,
            deadline,
            interrupt,
        )
    }

    pub fn send_commit(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        commit_timestamp: Option<Timestamp>,
        interrupt: &Interrupt,
    ) -> ParticipantSignal {
        self.dispatch(
            shard,
            operation_id,
            ParticipantCommand::Commit { commit_timestamp },
            None,
            interrupt,
        )
    }

    pub fn send_abort(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        interrupt: &Interrupt,
    ) -> ParticipantSignal {
        self.dispatch(
            shard,
            operation_id,
            ParticipantCommand::Abort,
            None,
            interrupt,
        )
    }

    /// Sends a command to a participant until it yields a signal.
    ///
    /// Commands sent before the decision stop retrying at `deadline`; decision and cleanup
    /// commands retry up to the policy's ceiling.
    pub fn dispatch(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        command: ParticipantCommand,
        deadline: Option<SystemTime>,
        interrupt: &Interrupt,
    ) -> ParticipantSignal {
        self.dispatch_with(shard, operation_id, command, deadline, &|| {
            interrupt.is_triggered()
        })
    }

    /// Sends a batch of commands concurrently and returns the signals in batch order.
    ///
    /// Once any participant votes to abort, outstanding retries of the other commands in the batch
    /// are abandoned and reported as unreachable.
    pub fn dispatch_all(
        &self,
        operation_id: &OperationId,
        commands: Vec<(ShardId, ParticipantCommand)>,
        deadline: Option<SystemTime>,
        interrupt: &Interrupt,
    ) -> Vec<(ShardId, ParticipantSignal)> {
        if commands.len() == 1 {
            return commands
                .into_iter()
                .map(|(shard, command)| {
                    let signal = self.dispatch(&shard, operation_id, command, deadline, interrupt);
                    (shard, signal)
                })
                .collect();
        }

        let abandon = AtomicBool::new(false);
        thread::scope(|scope| {
            let handles: Vec<_> = commands
                .into_iter()
                .map(|(shard, command)| {
                    let kind = command.kind();
                    let abandon = &abandon;
                    let target = shard.clone();
                    let handle = scope.spawn(move || {
                        let signal =
                            self.dispatch_with(&target, operation_id, command, deadline, &|| {
                                interrupt.is_triggered() || abandon.load(Ordering::SeqCst)
                            });
                        if let ParticipantSignal::Vote(PrepareVote::Abort { .. }) = signal {
                            abandon.store(true, Ordering::SeqCst);
                        }
                        signal
                    });
                    (shard, kind, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(shard, kind, handle)| {
                    let signal = handle.join().unwrap_or_else(|_| {
                        error!("Dispatch of {:?} to {} panicked", kind, shard);
                        ParticipantSignal::Unreachable(kind)
                    });
                    (shard, signal)
                })
                .collect()
        })
    }

    fn dispatch_with(
        &self,
        shard: &ShardId,
        operation_id: &OperationId,
        command: ParticipantCommand,
        deadline: Option<SystemTime>,
        should_stop: &dyn Fn() -> bool,
    ) -> ParticipantSignal {
        let kind = command.kind();
        let mut attempt = 0;
        loop {
            if should_stop() {
                debug!("Abandoning {:?} to {} for {}", kind, shard, operation_id);
                return ParticipantSignal::Unreachable(kind);
            }

            let err = match self.transport.send(shard, operation_id, &command) {
                Ok(reply) => return classify_reply(shard, kind, reply),
                Err(err) => err,
            };

            if kind.is_pre_decision() && !err.code.is_retryable() {
                info!(
                    "{} answered {:?} for {} with {}; treating as an abort vote",
                    shard, kind, operation_id, err
                );
                return ParticipantSignal::Vote(PrepareVote::Abort {
                    reason: AbortReason::from_shard(err.code, err.message, shard.clone()),
                });
            }
            if !kind.is_pre_decision() && err.code.acknowledges_decision() {
                debug!(
                    "{} already finished {}, accepting {:?} as acknowledged",
                    shard, operation_id, err.code
                );
                return ParticipantSignal::Ack(kind, ParticipantReply::Ok);
            }

            attempt += 1;
            if attempt >= self.retry_policy.ceiling {
                warn!(
                    "Giving up {:?} to {} for {} after {} attempts: {}",
                    kind, shard, operation_id, attempt, err
                );
                return ParticipantSignal::Unreachable(kind);
            }
            if let Some(deadline) = deadline.filter(|_| kind.is_pre_decision()) {
                if self.time_source.now() >= deadline {
                    warn!(
                        "Deadline passed for {:?} to {} for {}: {}",
                        kind, shard, operation_id, err
                    );
                    return ParticipantSignal::Unreachable(kind);
                }
            }

            let backoff = self.retry_policy.backoff(attempt - 1);
            debug!(
                "Retrying {:?} to {} for {} in {:?}: {}",
                kind, shard, operation_id, backoff, err
            );
            if !backoff.is_zero() {
                thread::sleep(backoff);
            }
        }
    }
}

fn classify_reply(shard: &ShardId, kind: CommandKind, reply: ParticipantReply) -> ParticipantSignal {
    match (kind, reply) {
        (CommandKind::Prepare, ParticipantReply::Prepared { prepare_timestamp }) => {
            ParticipantSignal::Vote(PrepareVote::Commit { prepare_timestamp })
        }
        (CommandKind::Prepare, reply) => ParticipantSignal::Vote(PrepareVote::Abort {
            reason: AbortReason::from_shard(
                ErrorCode::ProtocolError,
                format!("unexpected answer to prepare: {:?}", reply),
                shard.clone(),
            ),
        }),
        (kind, reply) => ParticipantSignal::Ack(kind, reply),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::testing::FakeTransport;
    use crate::time::ManualTimeSource;

    use super::*;

    fn proxy(
        transport: Arc<FakeTransport>,
        ceiling: u64,
    ) -> ParticipantProxy<Arc<FakeTransport>, ManualTimeSource> {
        ParticipantProxy::new(
            transport,
            ManualTimeSource::default(),
            RetryPolicy {
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
                ceiling,
            },
        )
    }

    /// Test that transient errors are retried and the eventual answer returned.
    #[test]
    fn test_prepare_retries_transient_errors() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next(&"s0".into(), ErrorCode::NetworkTimeout, 2);
        let proxy = proxy(transport.clone(), 10);

        let signal = proxy.send_prepare(&"s0".into(), &OperationId::new(), None, &Interrupt::new());
        assert!(matches!(
            signal,
            ParticipantSignal::Vote(PrepareVote::Commit { .. })
        ));
        assert_eq!(transport.sent_count(&"s0".into(), CommandKind::Prepare), 3);
    }

    /// Test that a non-retryable prepare error is an abort vote naming the shard.
    #[test]
    fn test_prepare_non_retryable_is_abort_vote() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next(&"s1".into(), ErrorCode::NoSuchTransaction, 1);
        let proxy = proxy(transport, 10);

        match proxy.send_prepare(&"s1".into(), &OperationId::new(), None, &Interrupt::new()) {
            ParticipantSignal::Vote(PrepareVote::Abort { reason }) => {
                assert_eq!(reason.code, ErrorCode::NoSuchTransaction);
                assert_eq!(reason.shard, Some("s1".into()));
            }
            signal => panic!("expected abort vote, got {:?}", signal),
        }
    }

    /// Test that an exhausted retry budget is reported as unreachable, never as a vote.
    #[test]
    fn test_unreachable_is_not_a_vote() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_unreachable(&"s0".into(), true);
        let proxy = proxy(transport, 4);

        assert_eq!(
            proxy.send_prepare(&"s0".into(), &OperationId::new(), None, &Interrupt::new()),
            ParticipantSignal::Unreachable(CommandKind::Prepare)
        );
    }

    /// Test that NoSuchTransaction during decision delivery counts as an acknowledgement while
    /// other errors are retried.
    #[test]
    fn test_decision_error_classification() {
        let transport = Arc::new(FakeTransport::new());
        let op = OperationId::new();
        transport.fail_next(&"s0".into(), ErrorCode::NoSuchTransaction, 1);
        transport.fail_next(&"s1".into(), ErrorCode::ConflictingOperationInProgress, 2);
        let proxy = proxy(transport.clone(), 10);

        assert_eq!(
            proxy.send_commit(&"s0".into(), &op, None, &Interrupt::new()),
            ParticipantSignal::Ack(CommandKind::Commit, ParticipantReply::Ok)
        );
        assert_eq!(
            proxy.send_abort(&"s1".into(), &op, &Interrupt::new()),
            ParticipantSignal::Ack(CommandKind::Abort, ParticipantReply::Ok)
        );
        assert_eq!(transport.sent_count(&"s1".into(), CommandKind::Abort), 3);
    }

    /// Test that a fan-out returns one signal per participant in batch order.
    #[test]
    fn test_dispatch_all_order() {
        let transport = Arc::new(FakeTransport::new());
        let proxy = proxy(transport, 10);
        let shards: Vec<ShardId> = vec!["s0".into(), "s1".into(), "s2".into()];
        let signals = proxy.dispatch_all(
            &OperationId::new(),
            shards
                .iter()
                .map(|s| (s.clone(), ParticipantCommand::Prepare))
                .collect(),
            None,
            &Interrupt::new(),
        );

        assert_eq!(
            signals.iter().map(|(s, _)| s.clone()).collect::<Vec<_>>(),
            shards
        );
        assert!(signals
            .iter()
            .all(|(_, s)| matches!(s, ParticipantSignal::Vote(PrepareVote::Commit { .. }))));
    }

    /// Test that a triggered interrupt stops retrying.
    #[test]
    fn test_interrupt_stops_retries() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_unreachable(&"s0".into(), true);
        let proxy = proxy(transport, u64::MAX);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        assert_eq!(
            proxy.send_commit(&"s0".into(), &OperationId::new(), None, &interrupt),
            ParticipantSignal::Unreachable(CommandKind::Commit)
        );
    }
}
