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

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};

/// Error codes a participant may answer a command with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NoSuchTransaction,
    TransactionTooOld,
    ConflictingOperationInProgress,
    NetworkTimeout,
    HostUnreachable,
    ShutdownInProgress,
    PrimarySteppedDown,
    NotWritablePrimary,
    InterruptedDueToReplStateChange,
    LockBusy,
    ExceededTimeLimit,
    ReshardingCriticalSectionTimeout,
    ReshardCollectionAborted,
    DuplicateKey,
    Interrupted,
    ProtocolError,
    UnknownError,
}

impl ErrorCode {
    /// Returns true for transient failures which are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkTimeout
                | ErrorCode::HostUnreachable
                | ErrorCode::ShutdownInProgress
                | ErrorCode::PrimarySteppedDown
                | ErrorCode::NotWritablePrimary
                | ErrorCode::InterruptedDueToReplStateChange
                | ErrorCode::LockBusy
        )
    }

    /// Returns true if the code, received in answer to a commit or abort, means the participant
    /// has already finished with the operation.
    pub fn acknowledges_decision(&self) -> bool {
        matches!(
            self,
            ErrorCode::NoSuchTransaction | ErrorCode::TransactionTooOld
        )
    }
}

/// An error answered by a participant or raised by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        RemoteError {
            code,
            message: message.into(),
        }
    }
}

impl Error for RemoteError {}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test the classification of the codes the coordinator treats specially.
    #[test]
    fn test_error_code_classification() {
        assert!(ErrorCode::NetworkTimeout.is_retryable());
        assert!(ErrorCode::PrimarySteppedDown.is_retryable());
        assert!(!ErrorCode::NoSuchTransaction.is_retryable());
        assert!(!ErrorCode::ConflictingOperationInProgress.is_retryable());

        assert!(ErrorCode::NoSuchTransaction.acknowledges_decision());
        assert!(ErrorCode::TransactionTooOld.acknowledges_decision());
        assert!(!ErrorCode::NetworkTimeout.acknowledges_decision());
    }
}
