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

use crate::error::AlgorithmError;

/// A deterministic state machine.
///
/// An algorithm owns no state of its own: every call receives the current context and returns
/// the actions the caller must carry out, in order. This keeps persistence, messaging and timers
/// outside the algorithm so each transition can be tested on its own.
pub trait Algorithm {
    type Event;
    type Action;
    type Context;

    fn event(
        &self,
        event: Self::Event,
        context: Self::Context,
    ) -> Result<Vec<Self::Action>, AlgorithmError>;
}
