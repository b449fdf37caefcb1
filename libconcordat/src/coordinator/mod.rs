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

//! The event/action model shared by the coordinator state machines and the driver which carries
//! out their actions.

mod action;
mod context;
mod driver;
mod event;

pub use action::{CoordinatorAction, CoordinatorNotification};
pub(crate) use action::{push_dropped, push_update};
pub use context::{CoordinatorServices, CoordinatorServicesBuilder, LeaderTerm};
pub use driver::{Coordinator, Inbox, OperationStatus};
pub use event::{CoordinatorEvent, ParticipantMessage};
