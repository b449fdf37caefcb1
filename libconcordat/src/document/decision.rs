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

use serde::{Deserialize, Serialize};

use crate::proxy::ErrorCode;

use super::{ShardId, Timestamp};

/// The single, irrevocable outcome of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Abort,
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            Decision::Commit => f.write_str("commit"),
            Decision::Abort => f.write_str("abort"),
        }
    }
}

/// Why an operation was aborted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortReason {
    pub code: ErrorCode,
    pub message: String,
    /// The participant whose vote or failure caused the abort, if any.
    pub shard: Option<ShardId>,
}

impl AbortReason {
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        AbortReason {
            code,
            message: message.into(),
            shard: None,
        }
    }

    pub fn from_shard<S: Into<String>>(code: ErrorCode, message: S, shard: ShardId) -> Self {
        AbortReason {
            code,
            message: message.into(),
            shard: Some(shard),
        }
    }
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match &self.shard {
            Some(shard) => write!(f, "{:?} from {}: {}", self.code, shard, self.message),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

/// The durable decision of an operation. Written once and never changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub decision: Decision,
    pub commit_timestamp: Option<Timestamp>,
    pub abort_reason: Option<AbortReason>,
}

impl DecisionRecord {
    pub fn commit(commit_timestamp: Option<Timestamp>) -> Self {
        DecisionRecord {
            decision: Decision::Commit,
            commit_timestamp,
            abort_reason: None,
        }
    }

    pub fn abort(reason: AbortReason) -> Self {
        DecisionRecord {
            decision: Decision::Abort,
            commit_timestamp: None,
            abort_reason: Some(reason),
        }
    }

    pub fn is_commit(&self) -> bool {
        self.decision == Decision::Commit
    }
}
