// Copyright 2021, The Android Open Source Project
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

//! Transition descriptors: named chained command sequences between states.
//! The `start` action and in-flight notification handler for each variant
//! live in [`crate::core`], next to the rest of the dispatch loop they run
//! inside of; this module only carries the static shape (destination, name)
//! that both the state-reachability table and the engine agree on.

use crate::state::State;

/// One of the canonical chained-command sequences the engine knows how to
/// run. Only one is active at a time; `Core::set_state` enqueues further
/// transitions after the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionId {
    /// Bootstrap sequence: CORE_RESET -> CORE_INIT -> CORE_GET_CONFIG probe.
    ToIdle,
    IdleToDiscovery,
    DiscoveryToIdle,
    PollToIdle,
    PollToDiscovery,
}

impl TransitionId {
    pub fn destination(self) -> State {
        match self {
            TransitionId::ToIdle => State::RfstIdle,
            TransitionId::IdleToDiscovery => State::RfstDiscovery,
            TransitionId::DiscoveryToIdle => State::RfstIdle,
            TransitionId::PollToIdle => State::RfstIdle,
            TransitionId::PollToDiscovery => State::RfstDiscovery,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransitionId::ToIdle => "bootstrap->IDLE",
            TransitionId::IdleToDiscovery => "IDLE->DISCOVERY",
            TransitionId::DiscoveryToIdle => "DISCOVERY->IDLE",
            TransitionId::PollToIdle => "POLL_ACTIVE->IDLE",
            TransitionId::PollToDiscovery => "POLL_ACTIVE->DISCOVERY",
        }
    }
}
