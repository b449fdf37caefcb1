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

//! Contains CoordinatorError

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use super::AlgorithmError;
use super::InternalError;
use super::InvalidStateError;
use super::RoutingError;
use super::StoreError;

/// An error surfaced by a coordinator driver or the recovery manager.
#[derive(Debug)]
pub enum CoordinatorError {
    /// The state machine rejected an event.
    Algorithm(AlgorithmError),

    /// The durable store failed or reported a conflicting write.
    Store(StoreError),

    /// The routing catalog rejected a change.
    Routing(RoutingError),

    /// This coordinator instance is no longer allowed to drive the operation; recovery in the
    /// current term owns it.
    SteppedDown(String),

    /// The request was refused, for example because a conflicting operation is in progress.
    Rejected(InvalidStateError),

    Internal(InternalError),
}

impl CoordinatorError {
    /// Returns true if the error means this instance must stop driving the operation.
    pub fn is_step_down(&self) -> bool {
        matches!(
            self,
            CoordinatorError::SteppedDown(_)
                | CoordinatorError::Store(StoreError::VersionConflict { .. })
                | CoordinatorError::Algorithm(AlgorithmError::ProtocolViolation(_))
        )
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CoordinatorError::Algorithm(e) => Some(e),
            CoordinatorError::Store(e) => Some(e),
            CoordinatorError::Routing(e) => Some(e),
            CoordinatorError::SteppedDown(_) => None,
            CoordinatorError::Rejected(e) => Some(e),
            CoordinatorError::Internal(e) => Some(e),
        }
    }
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            CoordinatorError::Algorithm(e) => write!(f, "{}", e),
            CoordinatorError::Store(e) => write!(f, "{}", e),
            CoordinatorError::Routing(e) => write!(f, "{}", e),
            CoordinatorError::SteppedDown(msg) => write!(f, "coordinator stepped down: {}", msg),
            CoordinatorError::Rejected(e) => write!(f, "request rejected: {}", e),
            CoordinatorError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl From<AlgorithmError> for CoordinatorError {
    fn from(err: AlgorithmError) -> Self {
        CoordinatorError::Algorithm(err)
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        CoordinatorError::Store(err)
    }
}

impl From<RoutingError> for CoordinatorError {
    fn from(err: RoutingError) -> Self {
        CoordinatorError::Routing(err)
    }
}

impl From<InternalError> for CoordinatorError {
    fn from(err: InternalError) -> Self {
        CoordinatorError::Internal(err)
    }
}
