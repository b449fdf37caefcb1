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

//! Reattaches drivers to every unfinished operation when a coordinator instance takes over.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::coordinator::{CoordinatorServices, OperationStatus};
use crate::document::{Decision, OperationDocument, OperationId, OperationKind};
use crate::error::{CoordinatorError, InternalError, StoreError};
use crate::proxy::{Interrupt, ParticipantTransport};
use crate::resharding::{self, ReshardingCoordinator};
use crate::time::TimeSource;
use crate::transaction::{self, TransactionCoordinator};

const DEFAULT_MAX_TICKS: usize = 3;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A driver resumed by recovery, matching the operation's state machine.
pub enum ResumedOperation<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    TwoPhase(TransactionCoordinator<T, TS>),
    Resharding(ReshardingCoordinator<T, TS>),
}

impl<T, TS> ResumedOperation<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    pub fn operation_id(&self) -> OperationId {
        match self {
            ResumedOperation::TwoPhase(coordinator) => *coordinator.operation_id(),
            ResumedOperation::Resharding(coordinator) => *coordinator.operation_id(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            ResumedOperation::TwoPhase(coordinator) => coordinator.document().kind(),
            ResumedOperation::Resharding(coordinator) => coordinator.document().kind(),
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self {
            ResumedOperation::TwoPhase(coordinator) => coordinator.status(),
            ResumedOperation::Resharding(coordinator) => coordinator.status(),
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            ResumedOperation::TwoPhase(coordinator) => coordinator.is_finished(),
            ResumedOperation::Resharding(coordinator) => coordinator.is_finished(),
        }
    }

    pub fn tick(&mut self) -> Result<(), CoordinatorError> {
        match self {
            ResumedOperation::TwoPhase(coordinator) => coordinator.tick(),
            ResumedOperation::Resharding(coordinator) => coordinator.tick(),
        }
    }

    pub fn run_to_completion(
        &mut self,
        max_ticks: usize,
    ) -> Result<OperationStatus, CoordinatorError> {
        match self {
            ResumedOperation::TwoPhase(coordinator) => coordinator.run_to_completion(max_ticks),
            ResumedOperation::Resharding(coordinator) => coordinator.run_to_completion(max_ticks),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The operation reached its decision and finished.
    Completed(Decision),
    /// The operation was resumed but still waits on participants.
    Pending,
    /// A finished document was removed from the store.
    Removed,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredOperation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub outcome: RecoveryOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub term: u64,
    pub operations: Vec<RecoveredOperation>,
    /// Recovery stopped early because this instance stepped down.
    pub interrupted: bool,
}

impl RecoveryReport {
    pub fn outcome(&self, operation_id: &OperationId) -> Option<&RecoveryOutcome> {
        self.operations
            .iter()
            .find(|op| &op.operation_id == operation_id)
            .map(|op| &op.outcome)
    }

    fn record(&mut self, operation_id: OperationId, kind: OperationKind, outcome: RecoveryOutcome) {
        match self
            .operations
            .iter_mut()
            .find(|op| op.operation_id == operation_id)
        {
            Some(op) => op.outcome = outcome,
            None => self.operations.push(RecoveredOperation {
                operation_id,
                kind,
                outcome,
            }),
        }
    }
}

/// The result of a recovery pass: what happened to each stored operation, and the drivers of
/// operations still waiting on participants.
pub struct Recovery<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    pub report: RecoveryReport,
    pub pending: Vec<ResumedOperation<T, TS>>,
}

/// Resumes every unfinished operation in the store for a newly elected term.
///
/// Documents are resumed from their durable phase and decision only. Finished documents are
/// removed once they are forgotten. Triggering the services' interrupt stops recovery between
/// durable writes.
pub struct RecoveryManager<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    services: CoordinatorServices<T, TS>,
    max_ticks: usize,
    poll_interval: Duration,
}

impl<T, TS> RecoveryManager<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    pub fn new(services: CoordinatorServices<T, TS>) -> Self {
        RecoveryManager {
            services,
            max_ticks: DEFAULT_MAX_TICKS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// The number of ticks each resumed operation gets before it is reported as pending.
    pub fn with_max_ticks(mut self, max_ticks: usize) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// How long a spawned recovery waits between ticks of pending operations.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        self.services.interrupt()
    }

    /// Resumes every unfinished operation, then drives each on its own thread for at most
    /// `max_ticks` ticks.
    ///
    /// An operation waiting on a participant that never answers only delays itself.
    pub fn recover(&self) -> Result<Recovery<T, TS>, CoordinatorError> {
        let term = self.services.term().clone();
        let documents = self.services.store().list()?;
        info!(
            "Recovering {} stored operations for {}",
            documents.len(),
            term
        );

        let mut report = RecoveryReport {
            term: term.term,
            ..Default::default()
        };
        let mut resumed = Vec::new();
        for document in documents {
            if self.interrupt().is_triggered() {
                info!("Recovery for {} interrupted", term);
                report.interrupted = true;
                break;
            }

            let operation_id = *document.operation_id();
            let kind = document.kind();
            if let Err(err) = document.validate() {
                error!("Skipping invalid operation {}: {}", operation_id, err);
                report.record(operation_id, kind, RecoveryOutcome::Failed(err.to_string()));
                continue;
            }
            if document.is_done() {
                let outcome = self.finish(&document);
                report.record(operation_id, kind, outcome);
                continue;
            }

            match self.resume(&document) {
                Ok(operation) => resumed.push(operation),
                Err(err) if err.is_step_down() => {
                    warn!("Recovery for {} stepping down: {}", term, err);
                    report.record(operation_id, kind, RecoveryOutcome::Failed(err.to_string()));
                    report.interrupted = true;
                    break;
                }
                Err(err) => {
                    error!("Failed to recover operation {}: {}", operation_id, err);
                    report.record(operation_id, kind, RecoveryOutcome::Failed(err.to_string()));
                }
            }
        }

        let max_ticks = self.max_ticks;
        let pending = drive_each(&mut report, resumed, move |operation| {
            operation.run_to_completion(max_ticks).map(|_| ())
        });

        info!(
            "Recovery for {} finished with {} operations still pending",
            term,
            pending.len()
        );
        Ok(Recovery { report, pending })
    }

    // Attaches a driver to an unfinished operation, claiming it for this term.
    fn resume(
        &self,
        document: &OperationDocument,
    ) -> Result<ResumedOperation<T, TS>, CoordinatorError> {
        let operation_id = document.operation_id();
        Ok(if document.kind().is_two_phase() {
            ResumedOperation::TwoPhase(transaction::resume(self.services.clone(), operation_id)?)
        } else {
            ResumedOperation::Resharding(resharding::resume(
                self.services.clone(),
                operation_id,
            )?)
        })
    }

    // A finished document only remains while its outcome may still be asked for.
    fn finish(&self, document: &OperationDocument) -> RecoveryOutcome {
        let decision = document.decision().map(|record| record.decision);
        if !document.forget_requested() && !self.services.config().forget_on_completion {
            return match decision {
                Some(decision) => RecoveryOutcome::Completed(decision),
                None => RecoveryOutcome::Failed("finished without a decision".into()),
            };
        }
        match self
            .services
            .store()
            .delete(document.operation_id(), document.version())
        {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                debug!("Removed finished operation {}", document.operation_id());
                RecoveryOutcome::Removed
            }
            Err(err) => RecoveryOutcome::Failed(err.to_string()),
        }
    }
}

impl<T, TS> RecoveryManager<T, TS>
where
    T: ParticipantTransport + 'static,
    TS: TimeSource + Clone + 'static,
{
    /// Runs recovery on a background thread, then keeps ticking pending operations until they
    /// finish or the instance steps down.
    pub fn spawn(self) -> Result<RecoveryHandle, InternalError> {
        let interrupt = self.interrupt().clone();
        let name = format!("recovery-term-{}", self.services.term().term);
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|err| InternalError::from_source(Box::new(err)))?;
        Ok(RecoveryHandle { join, interrupt })
    }

    fn run(self) -> Result<RecoveryReport, String> {
        let Recovery {
            mut report,
            pending,
        } = self.recover().map_err(|err| err.to_string())?;
        if report.interrupted {
            return Ok(report);
        }

        let interrupt = self.interrupt().clone();
        let poll_interval = self.poll_interval;
        let abandoned = drive_each(&mut report, pending, move |operation| {
            while !operation.is_finished() && !interrupt.is_triggered() {
                thread::sleep(poll_interval);
                operation.tick()?;
            }
            Ok(())
        });
        if !abandoned.is_empty() {
            report.interrupted = true;
        }
        Ok(report)
    }
}

// Runs `drive` for every operation on its own thread and records the outcomes. Returns the
// operations which are still unfinished.
fn drive_each<T, TS, F>(
    report: &mut RecoveryReport,
    operations: Vec<ResumedOperation<T, TS>>,
    drive: F,
) -> Vec<ResumedOperation<T, TS>>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
    F: Fn(&mut ResumedOperation<T, TS>) -> Result<(), CoordinatorError> + Sync,
{
    let drive = &drive;
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = operations
            .into_iter()
            .map(|mut operation| {
                let operation_id = operation.operation_id();
                let kind = operation.kind();
                let handle = scope.spawn(move || {
                    let result = drive(&mut operation)
                        .map_err(|err| (err.is_step_down(), err.to_string()));
                    (operation, result)
                });
                (operation_id, kind, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(operation_id, kind, handle)| (operation_id, kind, handle.join()))
            .collect()
    });

    let mut pending = Vec::new();
    for (operation_id, kind, joined) in results {
        match joined {
            Ok((operation, Ok(()))) if operation.is_finished() => {
                let outcome = match operation.status().decision {
                    Some(decision) => RecoveryOutcome::Completed(decision),
                    None => RecoveryOutcome::Failed("finished without a decision".into()),
                };
                report.record(operation_id, kind, outcome);
            }
            Ok((operation, Ok(()))) => {
                report.record(operation_id, kind, RecoveryOutcome::Pending);
                pending.push(operation);
            }
            Ok((_, Err((step_down, message)))) => {
                if step_down {
                    warn!(
                        "Operation {} stepped down during recovery: {}",
                        operation_id, message
                    );
                    report.interrupted = true;
                } else {
                    error!("Failed to recover operation {}: {}", operation_id, message);
                }
                report.record(operation_id, kind, RecoveryOutcome::Failed(message));
            }
            Err(_) => {
                error!("Driver of operation {} panicked", operation_id);
                report.record(
                    operation_id,
                    kind,
                    RecoveryOutcome::Failed("driver panicked".into()),
                );
            }
        }
    }
    pending
}

/// A recovery running on a background thread.
pub struct RecoveryHandle {
    join: JoinHandle<Result<RecoveryReport, String>>,
    interrupt: Interrupt,
}

impl RecoveryHandle {
    /// Stops the recovery after its current durable write.
    pub fn step_down(&self) {
        self.interrupt.trigger();
    }

    pub fn join(self) -> Result<RecoveryReport, InternalError> {
        match self.join.join() {
            Ok(result) => result.map_err(InternalError::with_message),
            Err(_) => Err(InternalError::with_message("recovery thread panicked")),
        }
    }
}
