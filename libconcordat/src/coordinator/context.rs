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

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CoordinatorConfig;
use crate::error::InvalidStateError;
use crate::proxy::{Interrupt, ParticipantProxy, ParticipantTransport};
use crate::routing::RoutingCatalog;
use crate::store::OperationStore;
use crate::time::TimeSource;

/// The outcome of the leader election this coordinator instance was built for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderTerm {
    pub term: u64,
    pub node: String,
}

impl LeaderTerm {
    pub fn new<S: Into<String>>(term: u64, node: S) -> Self {
        LeaderTerm {
            term,
            node: node.into(),
        }
    }
}

impl Display for LeaderTerm {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "term {} on {}", self.term, self.node)
    }
}

/// Everything a coordinator driver needs besides its state machine.
///
/// A set of services belongs to one elected term; step-down triggers `interrupt`, after which
/// the services must not be used to write again.
pub struct CoordinatorServices<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    store: Arc<dyn OperationStore>,
    proxy: Arc<ParticipantProxy<T, TS>>,
    routing: Arc<RoutingCatalog>,
    time_source: TS,
    config: CoordinatorConfig,
    term: LeaderTerm,
    interrupt: Interrupt,
}

impl<T, TS> CoordinatorServices<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    pub fn proxy(&self) -> &Arc<ParticipantProxy<T, TS>> {
        &self.proxy
    }

    pub fn routing(&self) -> &Arc<RoutingCatalog> {
        &self.routing
    }

    pub fn time_source(&self) -> &TS {
        &self.time_source
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn term(&self) -> &LeaderTerm {
        &self.term
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

impl<T, TS> Clone for CoordinatorServices<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    fn clone(&self) -> Self {
        CoordinatorServices {
            store: self.store.clone(),
            proxy: self.proxy.clone(),
            routing: self.routing.clone(),
            time_source: self.time_source.clone(),
            config: self.config.clone(),
            term: self.term.clone(),
            interrupt: self.interrupt.clone(),
        }
    }
}

pub struct CoordinatorServicesBuilder<T, TS> {
    store: Option<Arc<dyn OperationStore>>,
    transport: Option<T>,
    routing: Option<Arc<RoutingCatalog>>,
    time_source: Option<TS>,
    config: Option<CoordinatorConfig>,
    term: Option<LeaderTerm>,
    interrupt: Option<Interrupt>,
}

impl<T, TS> Default for CoordinatorServicesBuilder<T, TS> {
    fn default() -> Self {
        CoordinatorServicesBuilder {
            store: None,
            transport: None,
            routing: None,
            time_source: None,
            config: None,
            term: None,
            interrupt: None,
        }
    }
}

impl<T, TS> CoordinatorServicesBuilder<T, TS>
where
    T: ParticipantTransport,
    TS: TimeSource + Clone,
{
    pub fn new() -> Self {
        CoordinatorServicesBuilder::default()
    }

    pub fn with_store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_routing(mut self, routing: Arc<RoutingCatalog>) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn with_time_source(mut self, time_source: TS) -> Self {
        self.time_source = Some(time_source);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_term(mut self, term: LeaderTerm) -> Self {
        self.term = Some(term);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn build(self) -> Result<CoordinatorServices<T, TS>, InvalidStateError> {
        let store = self
            .store
            .ok_or_else(|| InvalidStateError::with_message("missing store field".into()))?;

        let transport = self
            .transport
            .ok_or_else(|| InvalidStateError::with_message("missing transport field".into()))?;

        let time_source = self
            .time_source
            .ok_or_else(|| InvalidStateError::with_message("missing time_source field".into()))?;

        let term = self
            .term
            .ok_or_else(|| InvalidStateError::with_message("missing term field".into()))?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let proxy = Arc::new(ParticipantProxy::new(
            transport,
            time_source.clone(),
            config.retry_policy(),
        ));

        Ok(CoordinatorServices {
            store,
            proxy,
            routing: self.routing.unwrap_or_default(),
            time_source,
            config,
            term,
            interrupt: self.interrupt.unwrap_or_default(),
        })
    }
}
