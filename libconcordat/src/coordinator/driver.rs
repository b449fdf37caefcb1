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

//! Contains the generic coordinator driver.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::algorithm::Algorithm;
use crate::document::{AbortReason, Decision, OperationDocument, OperationId, Phase, ShardId};
use crate::error::{AlgorithmError, CoordinatorError, StoreError};
use crate::proxy::{ParticipantCommand, ParticipantTransport};
use crate::time::TimeSource;

use super::{
    CoordinatorAction, CoordinatorEvent, CoordinatorNotification, CoordinatorServices,
    ParticipantMessage,
};

/// A summary of an operation as seen by its driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationStatus {
    pub operation_id: OperationId,
    pub phase: Phase,
    pub decision: Option<Decision>,
    /// The document has been removed from the store.
    pub removed: bool,
}

/// A handle for delivering participant messages to a driver from elsewhere, such as a thread
/// receiving asynchronous progress reports.
#[derive(Clone, Default)]
pub struct Inbox(Arc<Mutex<VecDeque<(ShardId, ParticipantMessage)>>>);

impl Inbox {
    pub fn deliver(&self, shard: ShardId, message: ParticipantMessage) {
        self.0.lock().push_back((shard, message));
    }

    fn drain(&self) -> Vec<(ShardId, ParticipantMessage)> {
        self.0.lock().drain(..).collect()
    }
}

/// Drives one operation's state machine against the store, participants and routing catalog.
///
/// Actions are carried out in the order the algorithm returns them. Sends are batched and fanned
/// out concurrently, but a batch is always flushed before the next durable write or routing
/// change, and every send follows the durable write that preceded it.
pub struct Coordinator<A, T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    algorithm: A,
    services: CoordinatorServices<T, TS>,
    document: OperationDocument,
    alarm: Option<SystemTime>,
    events: VecDeque<CoordinatorEvent>,
    inbox: Inbox,
    notifications: Vec<CoordinatorNotification>,
    unreachable: BTreeSet<ShardId>,
    removed: bool,
    defunct: bool,
}

impl<A, T, TS> Coordinator<A, T, TS>
where
    A: Algorithm<
        Event = CoordinatorEvent,
        Action = CoordinatorAction,
        Context = OperationDocument,
    >,
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    /// Attaches a driver to a stored document.
    ///
    /// Fails with `SteppedDown` if the document was last written by a later term.
    pub fn new(
        algorithm: A,
        services: CoordinatorServices<T, TS>,
        document: OperationDocument,
    ) -> Result<Self, CoordinatorError> {
        if document.term() > services.term().term {
            return Err(CoordinatorError::SteppedDown(format!(
                "operation {} is owned by term {}, this is {}",
                document.operation_id(),
                document.term(),
                services.term()
            )));
        }
        Ok(Coordinator {
            algorithm,
            alarm: document.deadline(),
            services,
            document,
            events: VecDeque::new(),
            inbox: Inbox::default(),
            notifications: Vec::new(),
            unreachable: BTreeSet::new(),
            removed: false,
            defunct: false,
        })
    }

    /// Persists a new operation document and queues its start.
    pub fn create(
        algorithm: A,
        services: CoordinatorServices<T, TS>,
        document: OperationDocument,
    ) -> Result<Self, CoordinatorError> {
        let stored = services.store().persist(&document)?;
        info!(
            "Created {:?} operation {} ({})",
            stored.kind(),
            stored.operation_id(),
            services.term()
        );
        let mut coordinator = Coordinator::new(algorithm, services, stored)?;
        coordinator.events.push_back(CoordinatorEvent::Start);
        Ok(coordinator)
    }

    /// Loads a stored operation and queues its resumption.
    pub fn resume(
        algorithm: A,
        services: CoordinatorServices<T, TS>,
        operation_id: &OperationId,
    ) -> Result<Self, CoordinatorError> {
        let document = services.store().read(operation_id)?;
        document.validate().map_err(StoreError::InvalidState)?;
        info!(
            "Resuming operation {} in phase {} ({})",
            operation_id,
            document.phase(),
            services.term()
        );
        let mut coordinator = Coordinator::new(algorithm, services, document)?;
        coordinator.claim()?;
        coordinator.events.push_back(CoordinatorEvent::Resume);
        Ok(coordinator)
    }

    // Records this term as the document's owner, so drivers from earlier terms fail their next
    // write.
    fn claim(&mut self) -> Result<(), CoordinatorError> {
        if self.document.term() >= self.services.term().term {
            return Ok(());
        }
        let mut document = self.document.clone();
        document.set_term(self.services.term().term);
        document.touch(self.services.time_source().now());
        match self
            .services
            .store()
            .compare_and_set(&document, self.document.version())
        {
            Ok(stored) => {
                debug!(
                    "Operation {} claimed by {}",
                    stored.operation_id(),
                    self.services.term()
                );
                self.document = stored;
                Ok(())
            }
            Err(err @ StoreError::VersionConflict { .. }) => Err(self.step_down_on_conflict(err)),
            Err(err) => Err(err.into()),
        }
    }

    pub fn operation_id(&self) -> &OperationId {
        self.document.operation_id()
    }

    /// The last durable version of the operation document.
    pub fn document(&self) -> &OperationDocument {
        &self.document
    }

    pub fn alarm(&self) -> Option<SystemTime> {
        self.alarm
    }

    pub fn services(&self) -> &CoordinatorServices<T, TS> {
        &self.services
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus {
            operation_id: *self.document.operation_id(),
            phase: self.document.phase(),
            decision: self.document.decision().map(|record| record.decision),
            removed: self.removed,
        }
    }

    /// Returns the notifications produced since the last call.
    pub fn take_notifications(&mut self) -> Vec<CoordinatorNotification> {
        std::mem::take(&mut self.notifications)
    }

    /// Returns true once the operation is done, or its document removed.
    pub fn is_finished(&self) -> bool {
        self.removed || self.document.is_done()
    }

    pub fn deliver(&mut self, shard: ShardId, message: ParticipantMessage) {
        self.events
            .push_back(CoordinatorEvent::Deliver(shard, message));
    }

    pub fn cancel(&mut self, reason: AbortReason) -> Result<(), CoordinatorError> {
        self.events.push_back(CoordinatorEvent::Cancel(reason));
        self.run_until_idle()
    }

    pub fn forget(&mut self) -> Result<(), CoordinatorError> {
        self.events.push_back(CoordinatorEvent::Forget);
        self.run_until_idle()
    }

    /// Processes queued events, and the events they produce, until none remain.
    pub fn run_until_idle(&mut self) -> Result<(), CoordinatorError> {
        loop {
            for (shard, message) in self.inbox.drain() {
                self.events
                    .push_back(CoordinatorEvent::Deliver(shard, message));
            }
            match self.events.pop_front() {
                Some(event) => self.process(event)?,
                None => return Ok(()),
            }
        }
    }

    /// Fires a due alarm, re-issues commands to participants which were unreachable, and runs
    /// until idle.
    pub fn tick(&mut self) -> Result<(), CoordinatorError> {
        if self.removed {
            return Ok(());
        }
        let now = self.services.time_source().now();
        if matches!(self.alarm, Some(alarm) if alarm <= now) {
            self.events.push_back(CoordinatorEvent::Alarm);
        }
        if !self.unreachable.is_empty() {
            debug!(
                "Operation {} re-issuing commands to {:?}",
                self.operation_id(),
                self.unreachable
            );
            self.unreachable.clear();
            self.events.push_back(CoordinatorEvent::Resume);
        }
        self.run_until_idle()
    }

    /// Runs until the operation is finished or `max_ticks` ticks have passed.
    pub fn run_to_completion(
        &mut self,
        max_ticks: usize,
    ) -> Result<OperationStatus, CoordinatorError> {
        self.run_until_idle()?;
        let mut ticks = 0;
        while !self.is_finished() && ticks < max_ticks {
            self.tick()?;
            ticks += 1;
        }
        Ok(self.status())
    }

    fn process(&mut self, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        if self.defunct {
            return Err(CoordinatorError::SteppedDown(format!(
                "driver for operation {} has stepped down",
                self.operation_id()
            )));
        }
        if self.services.interrupt().is_triggered() {
            self.defunct = true;
            return Err(CoordinatorError::SteppedDown(format!(
                "driver for operation {} was interrupted",
                self.operation_id()
            )));
        }
        if self.removed {
            debug!(
                "Operation {} already removed, ignoring {:?}",
                self.operation_id(),
                event
            );
            return Ok(());
        }

        debug!("Operation {} handling {:?}", self.operation_id(), event);
        let actions = match self.algorithm.event(event, self.document.clone()) {
            Ok(actions) => actions,
            Err(AlgorithmError::ProtocolViolation(msg)) => {
                error!(
                    "Protocol violation in operation {}, stepping down: {}",
                    self.operation_id(),
                    msg
                );
                self.defunct = true;
                return Err(AlgorithmError::ProtocolViolation(msg).into());
            }
            Err(err) => return Err(err.into()),
        };
        self.execute(actions)
    }

    fn execute(&mut self, actions: Vec<CoordinatorAction>) -> Result<(), CoordinatorError> {
        let mut sends = Vec::new();
        for action in actions {
            match action {
                CoordinatorAction::Send(shard, command) => sends.push((shard, command)),
                action => {
                    self.flush(&mut sends);
                    self.apply(action)?;
                }
            }
        }
        self.flush(&mut sends);
        Ok(())
    }

    fn flush(&mut self, sends: &mut Vec<(ShardId, ParticipantCommand)>) {
        if sends.is_empty() {
            return;
        }
        let batch = std::mem::take(sends);
        let signals = self.services.proxy().dispatch_all(
            self.document.operation_id(),
            batch,
            self.document.deadline(),
            self.services.interrupt(),
        );
        for (shard, signal) in signals {
            let message = ParticipantMessage::from_signal(signal);
            if let ParticipantMessage::Unreachable(_) = message {
                self.unreachable.insert(shard.clone());
            }
            self.events
                .push_back(CoordinatorEvent::Deliver(shard, message));
        }
    }

    fn apply(&mut self, action: CoordinatorAction) -> Result<(), CoordinatorError> {
        match action {
            CoordinatorAction::Update {
                mut document,
                alarm,
            } => {
                document.set_term(self.services.term().term);
                document.touch(self.services.time_source().now());
                let previous = self.document.phase();
                let stored = match self
                    .services
                    .store()
                    .compare_and_set(&document, self.document.version())
                {
                    Ok(stored) => stored,
                    Err(err @ StoreError::VersionConflict { .. }) => {
                        return Err(self.step_down_on_conflict(err));
                    }
                    Err(err) => return Err(err.into()),
                };
                if stored.phase() != previous {
                    info!(
                        "Operation {} moved from {} to {}",
                        stored.operation_id(),
                        previous,
                        stored.phase()
                    );
                }
                self.document = stored;
                self.alarm = alarm;
                Ok(())
            }
            CoordinatorAction::Routing(change) => {
                self.services.routing().apply(&change)?;
                Ok(())
            }
            CoordinatorAction::RemoveDocument => {
                match self
                    .services
                    .store()
                    .delete(self.document.operation_id(), self.document.version())
                {
                    Ok(()) | Err(StoreError::NotFound(_)) => {
                        info!("Removed operation {}", self.operation_id());
                        self.removed = true;
                        self.alarm = None;
                        Ok(())
                    }
                    Err(err @ StoreError::VersionConflict { .. }) => {
                        Err(self.step_down_on_conflict(err))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            CoordinatorAction::Notify(notification) => {
                match &notification {
                    CoordinatorNotification::Decided(record) => info!(
                        "Operation {} decided {}",
                        self.operation_id(),
                        record.decision
                    ),
                    CoordinatorNotification::Completed(decision) => {
                        info!("Operation {} completed ({})", self.operation_id(), decision);
                        if self.services.config().forget_on_completion {
                            self.events.push_back(CoordinatorEvent::Forget);
                        }
                    }
                    CoordinatorNotification::ParticipantUnreachable(shard, kind) => warn!(
                        "Operation {}: {} unreachable for {:?}",
                        self.operation_id(),
                        shard,
                        kind
                    ),
                    CoordinatorNotification::MessageDropped(msg) => {
                        warn!("Operation {}: {}", self.operation_id(), msg)
                    }
                    CoordinatorNotification::CancelRejected(phase) => info!(
                        "Operation {} can not be cancelled in phase {}",
                        self.operation_id(),
                        phase
                    ),
                }
                self.notifications.push(notification);
                Ok(())
            }
            CoordinatorAction::Send(shard, command) => {
                let mut sends = vec![(shard, command)];
                self.flush(&mut sends);
                Ok(())
            }
        }
    }

    // A conflicting write means another instance owns the document now.
    fn step_down_on_conflict(&mut self, err: StoreError) -> CoordinatorError {
        self.defunct = true;
        match self.services.store().read(self.document.operation_id()) {
            Ok(current) if current.term() > self.services.term().term => {
                error!(
                    "Operation {} taken over by term {}, stepping down",
                    self.operation_id(),
                    current.term()
                );
                CoordinatorError::SteppedDown(format!(
                    "operation {} is owned by term {}",
                    self.operation_id(),
                    current.term()
                ))
            }
            _ => {
                error!(
                    "Conflicting write to operation {}, stepping down: {}",
                    self.operation_id(),
                    err
                );
                err.into()
            }
        }
    }
}
