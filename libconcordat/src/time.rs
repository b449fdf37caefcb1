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

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// A source of wall-clock time for deadlines and document timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Default, Clone)]
pub struct SystemTimeFactory {}

impl SystemTimeFactory {
    pub fn new() -> Self {
        SystemTimeFactory {}
    }
}

impl TimeSource for SystemTimeFactory {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A time source which only moves when told to.
///
/// Clones share the same clock, so a test can hold one handle and advance the time observed by
/// every coordinator built from the others.
#[derive(Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualTimeSource {
    pub fn new(start: SystemTime) -> Self {
        ManualTimeSource {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock() = to;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        ManualTimeSource::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that clones of a ManualTimeSource observe the same clock.
    #[test]
    fn test_manual_time_source_shared() {
        let clock = ManualTimeSource::default();
        let other = clock.clone();
        let start = other.now();

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now(), start + Duration::from_millis(250));

        clock.set(start);
        assert_eq!(other.now(), start);
    }
}
