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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded exponential backoff for retryable participant errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// The largest number of attempts made for a single command.
    pub ceiling: u64,
}

impl RetryPolicy {
    /// The delay before retry number `attempt`, counting from zero.
    pub fn backoff(&self, attempt: u64) -> Duration {
        let shift = attempt.min(31) as u32;
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .map(|backoff| backoff.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }
}

/// A flag which stops retry loops and recovery when the coordinator steps down.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Interrupt::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
