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

//! Contains ApplyError

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

use crate::document::{ShardId, Timestamp};

/// An error raised by a resharding recipient while cloning documents or applying oplog entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyError {
    /// The donor is not one of the donors of the resharding operation.
    UnknownDonor(ShardId),

    /// An oplog batch from a single donor was not in strictly increasing timestamp order.
    OutOfOrder {
        donor: ShardId,
        previous: Timestamp,
        timestamp: Timestamp,
    },

    /// Two donors claim a document with the same primary key.
    DuplicateKey {
        primary_key: String,
        existing_donor: ShardId,
        donor: ShardId,
    },
}

impl Error for ApplyError {}

impl Display for ApplyError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            ApplyError::UnknownDonor(donor) => write!(f, "{} is not a donor", donor),
            ApplyError::OutOfOrder {
                donor,
                previous,
                timestamp,
            } => write!(
                f,
                "oplog entry {} from {} does not follow {}",
                timestamp, donor, previous
            ),
            ApplyError::DuplicateKey {
                primary_key,
                existing_donor,
                donor,
            } => write!(
                f,
                "primary key {:?} from {} was already received from {}",
                primary_key, donor, existing_donor
            ),
        }
    }
}
