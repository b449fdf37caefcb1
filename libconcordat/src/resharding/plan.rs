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

//! Chooses the chunk distribution of the resharded collection.

use crate::document::ShardId;
use crate::error::InvalidStateError;
use crate::routing::{ChunkAssignment, ChunkRange, KeyBound, Zone};

/// Computes the new chunk distribution.
///
/// Each zone's range is divided among the zone's shards in turn. The key space outside every
/// zone is divided evenly among the recipients. The result covers the whole key space without
/// overlap, ordered by range.
pub fn distribute(
    zones: &[Zone],
    recipients: &[ShardId],
) -> Result<Vec<ChunkAssignment>, InvalidStateError> {
    if recipients.is_empty() {
        return Err(InvalidStateError::with_message(
            "resharding requires at least one recipient".into(),
        ));
    }

    let mut zones: Vec<&Zone> = zones.iter().collect();
    zones.sort_by_key(|zone| zone.range.min);
    for zone in &zones {
        if zone.range.is_empty() {
            return Err(InvalidStateError::with_message(format!(
                "zone {} has an empty range {}",
                zone.name, zone.range
            )));
        }
        if zone.shards.is_empty() {
            return Err(InvalidStateError::with_message(format!(
                "zone {} has no shards",
                zone.name
            )));
        }
        if let Some(shard) = zone.shards.iter().find(|s| !recipients.contains(s)) {
            return Err(InvalidStateError::with_message(format!(
                "zone {} names {}, which is not a recipient",
                zone.name, shard
            )));
        }
    }
    for pair in zones.windows(2) {
        if pair[0].range.overlaps(&pair[1].range) {
            return Err(InvalidStateError::with_message(format!(
                "zones {} and {} overlap",
                pair[0].name, pair[1].name
            )));
        }
    }

    let mut chunks = Vec::new();
    let mut cursor = KeyBound::MinKey;
    for zone in zones {
        if cursor < zone.range.min {
            assign(ChunkRange::new(cursor, zone.range.min), recipients, &mut chunks);
        }
        assign(zone.range, &zone.shards, &mut chunks);
        cursor = zone.range.max;
    }
    if cursor < KeyBound::MaxKey {
        assign(ChunkRange::new(cursor, KeyBound::MaxKey), recipients, &mut chunks);
    }
    Ok(chunks)
}

fn assign(range: ChunkRange, shards: &[ShardId], chunks: &mut Vec<ChunkAssignment>) {
    for (piece, shard) in split_range(range, shards.len()).into_iter().zip(shards.iter().cycle()) {
        chunks.push(ChunkAssignment::new(piece, shard.clone()));
    }
}

// Splits a range into at most `parts` contiguous pieces of nearly equal width.
fn split_range(range: ChunkRange, parts: usize) -> Vec<ChunkRange> {
    let low = numeric(range.min);
    let high = numeric(range.max);
    let width = high - low;
    let parts = (parts.max(1) as i128).min(width.max(1));

    let mut pieces = Vec::with_capacity(parts as usize);
    let mut start = range.min;
    for i in 1..parts {
        let boundary = KeyBound::Value((low + width * i / parts) as i64);
        pieces.push(ChunkRange::new(start, boundary));
        start = boundary;
    }
    pieces.push(ChunkRange::new(start, range.max));
    pieces
}

// Shard key bounds as integers, with MaxKey one past the largest key value.
fn numeric(bound: KeyBound) -> i128 {
    match bound {
        KeyBound::MinKey => i64::MIN as i128,
        KeyBound::Value(v) => v as i128,
        KeyBound::MaxKey => i64::MAX as i128 + 1,
    }
}
