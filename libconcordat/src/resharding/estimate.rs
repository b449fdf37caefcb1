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

//! The per-recipient copy estimate handed to recipients with the clone timestamp.

use crate::document::{ApproxCopySize, DonorState};
use crate::error::InvalidStateError;

/// Divides the donors' combined clone statistics evenly across `num_recipients`, rounding down.
///
/// Donors which have not reported statistics count as empty.
pub fn approx_copy_size<'a, I>(
    donors: I,
    num_recipients: usize,
) -> Result<ApproxCopySize, InvalidStateError>
where
    I: IntoIterator<Item = &'a DonorState>,
{
    if num_recipients == 0 {
        return Err(InvalidStateError::with_message(
            "cannot estimate the copy size without recipients".into(),
        ));
    }

    let (bytes, documents) = donors.into_iter().fold((0u64, 0u64), |(bytes, docs), donor| {
        (
            bytes.saturating_add(donor.bytes_to_clone.unwrap_or(0)),
            docs.saturating_add(donor.documents_to_clone.unwrap_or(0)),
        )
    });

    let recipients = num_recipients as u64;
    Ok(ApproxCopySize {
        approx_bytes_to_copy: bytes / recipients,
        approx_documents_to_copy: documents / recipients,
    })
}
