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

//! Resharding: moving a sharded collection to a new shard key and chunk distribution.

mod algorithm;
mod estimate;
mod plan;
mod recipient;

use crate::coordinator::{Coordinator, CoordinatorServices};
use crate::document::{
    OperationDocument, OperationId, OperationKind, ReshardingMetadata, ShardId,
};
use crate::error::{CoordinatorError, InvalidStateError, StoreError};
use crate::proxy::ParticipantTransport;
use crate::routing::{ShardKeyPattern, Zone};
use crate::time::TimeSource;

pub use algorithm::ReshardingAlgorithm;
pub use estimate::approx_copy_size;
pub use plan::distribute;
pub use recipient::{
    ApplyOutcome, CloneOutcome, OplogEntry, OplogOp, RecipientCollection, RecordId,
    StoredDocument,
};

pub type ReshardingCoordinator<T, TS> = Coordinator<ReshardingAlgorithm<TS>, T, TS>;

/// A request to reshard `namespace` onto `recipients` by `new_shard_key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReshardingRequest {
    pub namespace: String,
    pub new_shard_key: ShardKeyPattern,
    pub recipients: Vec<ShardId>,
    pub zones: Vec<Zone>,
}

impl ReshardingRequest {
    pub fn new<S: Into<String>>(
        namespace: S,
        new_shard_key: ShardKeyPattern,
        recipients: Vec<ShardId>,
    ) -> Self {
        ReshardingRequest {
            namespace: namespace.into(),
            new_shard_key,
            recipients,
            zones: Vec::new(),
        }
    }

    pub fn with_zones(mut self, zones: Vec<Zone>) -> Self {
        self.zones = zones;
        self
    }
}

impl<TS> ReshardingAlgorithm<TS>
where
    TS: TimeSource + Clone,
{
    pub fn from_services<T: ParticipantTransport>(services: &CoordinatorServices<T, TS>) -> Self {
        ReshardingAlgorithm::new(
            services.time_source().clone(),
            services.config().critical_section_timeout(),
        )
    }
}

/// Persists a new resharding operation and returns its driver, ready to run.
///
/// The current owners of the collection's chunks become the donors. The request is rejected if
/// another resharding of the same namespace has not finished.
pub fn begin<T, TS>(
    services: CoordinatorServices<T, TS>,
    request: ReshardingRequest,
) -> Result<ReshardingCoordinator<T, TS>, CoordinatorError>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    let donors = services.routing().owners(&request.namespace)?;
    if donors.is_empty() {
        return Err(rejected(format!(
            "{} has no chunks to donate",
            request.namespace
        )));
    }

    if let Some(existing) = services.store().list()?.into_iter().find(|document| {
        document.kind() == OperationKind::Resharding
            && !document.is_done()
            && document
                .resharding()
                .map(|metadata| metadata.namespace == request.namespace)
                .unwrap_or(false)
    }) {
        return Err(rejected(format!(
            "ConflictingOperationInProgress: resharding {} of {} is in phase {}",
            existing.operation_id(),
            request.namespace,
            existing.phase()
        )));
    }

    let operation_id = OperationId::new();
    let mut metadata = ReshardingMetadata::new(
        &operation_id,
        &request.namespace,
        request.new_shard_key,
        request.zones,
    );
    metadata.chunk_plan =
        distribute(&metadata.zones, &request.recipients).map_err(CoordinatorError::Rejected)?;

    let mut document =
        OperationDocument::new_resharding(operation_id, metadata, services.time_source().now());
    for donor in donors {
        document
            .add_donor(donor)
            .map_err(CoordinatorError::Rejected)?;
    }
    for recipient in request.recipients {
        document
            .add_recipient(recipient)
            .map_err(CoordinatorError::Rejected)?;
    }
    document.validate().map_err(CoordinatorError::Rejected)?;

    let algorithm = ReshardingAlgorithm::from_services(&services);
    Coordinator::create(algorithm, services, document).map_err(|err| match err {
        CoordinatorError::Store(StoreError::ConflictingOperation {
            namespace,
            operation_id,
        }) => rejected(format!(
            "ConflictingOperationInProgress: resharding {} of {} has not finished",
            operation_id, namespace
        )),
        err => err,
    })
}

/// Attaches a driver to a stored resharding operation and queues its resumption.
pub fn resume<T, TS>(
    services: CoordinatorServices<T, TS>,
    operation_id: &OperationId,
) -> Result<ReshardingCoordinator<T, TS>, CoordinatorError>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    let algorithm = ReshardingAlgorithm::from_services(&services);
    Coordinator::resume(algorithm, services, operation_id)
}

fn rejected(message: String) -> CoordinatorError {
    CoordinatorError::Rejected(InvalidStateError::with_message(message))
}
