// Copyright 2021 Cargill Incorporated
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

//! Durable coordinators for operations spanning several shards: atomic two-phase commit of
//! distributed transactions, and resharding of a collection onto a new shard key. Both survive
//! coordinator failover by resuming from their stored operation documents.

#[macro_use]
extern crate log;

mod algorithm;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod proxy;
pub mod recovery;
pub mod resharding;
pub mod routing;
pub mod store;
#[cfg(test)]
mod testing;
mod time;
pub mod transaction;

pub use algorithm::Algorithm;
pub use time::{ManualTimeSource, SystemTimeFactory, TimeSource};
