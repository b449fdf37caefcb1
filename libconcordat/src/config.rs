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

//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InternalError, InvalidStateError};
use crate::proxy::RetryPolicy;

const DEFAULT_PREPARE_TIMEOUT_MILLIS: u64 = 30_000;
const DEFAULT_CRITICAL_SECTION_TIMEOUT_MILLIS: u64 = 5_000;
const DEFAULT_INITIAL_BACKOFF_MILLIS: u64 = 10;
const DEFAULT_MAX_BACKOFF_MILLIS: u64 = 1_000;
const DEFAULT_DECISION_RETRY_CEILING: u64 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// How long the coordinator waits for prepare votes before aborting.
    pub prepare_timeout_millis: u64,
    /// How long a resharding operation may block writes before it is aborted.
    pub resharding_critical_section_timeout_millis: u64,
    pub initial_backoff_millis: u64,
    pub max_backoff_millis: u64,
    /// The number of attempts made per dispatch of a decision or cleanup command.
    pub decision_retry_ceiling: u64,
    /// Remove the operation document as soon as the operation is done, rather than waiting for a
    /// forget request.
    pub forget_on_completion: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            prepare_timeout_millis: DEFAULT_PREPARE_TIMEOUT_MILLIS,
            resharding_critical_section_timeout_millis: DEFAULT_CRITICAL_SECTION_TIMEOUT_MILLIS,
            initial_backoff_millis: DEFAULT_INITIAL_BACKOFF_MILLIS,
            max_backoff_millis: DEFAULT_MAX_BACKOFF_MILLIS,
            decision_retry_ceiling: DEFAULT_DECISION_RETRY_CEILING,
            forget_on_completion: true,
        }
    }
}

impl CoordinatorConfig {
    /// Parses a configuration from JSON. Missing keys take their default values.
    pub fn from_json(json: &str) -> Result<Self, InternalError> {
        let config: CoordinatorConfig =
            serde_json::from_str(json).map_err(|err| InternalError::from_source(Box::new(err)))?;
        config
            .validate()
            .map_err(|err| InternalError::from_source(Box::new(err)))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InvalidStateError> {
        if self.prepare_timeout_millis == 0 {
            return Err(InvalidStateError::with_message(
                "prepareTimeoutMillis must be greater than zero".into(),
            ));
        }
        if self.resharding_critical_section_timeout_millis == 0 {
            return Err(InvalidStateError::with_message(
                "reshardingCriticalSectionTimeoutMillis must be greater than zero".into(),
            ));
        }
        if self.decision_retry_ceiling == 0 {
            return Err(InvalidStateError::with_message(
                "decisionRetryCeiling must be greater than zero".into(),
            ));
        }
        if self.initial_backoff_millis > self.max_backoff_millis {
            return Err(InvalidStateError::with_message(format!(
                "initialBackoffMillis ({}) exceeds maxBackoffMillis ({})",
                self.initial_backoff_millis, self.max_backoff_millis
            )));
        }
        Ok(())
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_millis)
    }

    pub fn critical_section_timeout(&self) -> Duration {
        Duration::from_millis(self.resharding_critical_section_timeout_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_millis),
            max_backoff: Duration::from_millis(self.max_backoff_millis),
            ceiling: self.decision_retry_ceiling,
        }
    }
}

#[derive(Default)]
pub struct CoordinatorConfigBuilder {
    prepare_timeout: Option<Duration>,
    critical_section_timeout: Option<Duration>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    decision_retry_ceiling: Option<u64>,
    forget_on_completion: Option<bool>,
}

impl CoordinatorConfigBuilder {
    pub fn new() -> Self {
        CoordinatorConfigBuilder::default()
    }

    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = Some(timeout);
        self
    }

    pub fn with_critical_section_timeout(mut self, timeout: Duration) -> Self {
        self.critical_section_timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = Some(initial);
        self.max_backoff = Some(max);
        self
    }

    pub fn with_decision_retry_ceiling(mut self, ceiling: u64) -> Self {
        self.decision_retry_ceiling = Some(ceiling);
        self
    }

    pub fn with_forget_on_completion(mut self, forget: bool) -> Self {
        self.forget_on_completion = Some(forget);
        self
    }

    pub fn build(self) -> Result<CoordinatorConfig, InvalidStateError> {
        let defaults = CoordinatorConfig::default();
        let millis = |d: Duration| d.as_millis() as u64;

        let config = CoordinatorConfig {
            prepare_timeout_millis: self
                .prepare_timeout
                .map(millis)
                .unwrap_or(defaults.prepare_timeout_millis),
            resharding_critical_section_timeout_millis: self
                .critical_section_timeout
                .map(millis)
                .unwrap_or(defaults.resharding_critical_section_timeout_millis),
            initial_backoff_millis: self
                .initial_backoff
                .map(millis)
                .unwrap_or(defaults.initial_backoff_millis),
            max_backoff_millis: self
                .max_backoff
                .map(millis)
                .unwrap_or(defaults.max_backoff_millis),
            decision_retry_ceiling: self
                .decision_retry_ceiling
                .unwrap_or(defaults.decision_retry_ceiling),
            forget_on_completion: self
                .forget_on_completion
                .unwrap_or(defaults.forget_on_completion),
        };
        config.validate()?;
        Ok(config)
    }
}
