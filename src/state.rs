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

//! The closed set of NCI core states and the reachability table between
//! them. Represented as a tagged enum rather than runtime descriptor
//! pointers: the state set is exhaustively known, so a `match` gives the
//! same "descriptor per state" shape without indirection.

use crate::transition::TransitionId;

/// `current_state` / `next_state` of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    Error,
    Stop,
    RfstIdle,
    RfstDiscovery,
    RfstW4AllDiscoveries,
    RfstW4HostSelect,
    RfstPollActive,
    RfstListenActive,
    RfstListenSleep,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Init => "INIT",
            State::Error => "ERROR",
            State::Stop => "STOP",
            State::RfstIdle => "RFST_IDLE",
            State::RfstDiscovery => "RFST_DISCOVERY",
            State::RfstW4AllDiscoveries => "RFST_W4_ALL_DISCOVERIES",
            State::RfstW4HostSelect => "RFST_W4_HOST_SELECT",
            State::RfstPollActive => "RFST_POLL_ACTIVE",
            State::RfstListenActive => "RFST_LISTEN_ACTIVE",
            State::RfstListenSleep => "RFST_LISTEN_SLEEP",
        }
    }

    /// The ordered chain of transitions that carries the state machine from
    /// `self` to `target`, or `None` if no path is defined. Mirrors the
    /// per-state `transition_path` descriptors of the original engine;
    /// `RfstListenActive`/`RfstListenSleep`/`RfstW4*` are declared states
    /// with no canonical path out, left in place for future extension.
    pub fn transition_path(self, target: State) -> Option<Vec<TransitionId>> {
        use State::*;
        use TransitionId::*;
        match (self, target) {
            (s, t) if s == t => Some(Vec::new()),
            (Init, RfstIdle) => Some(vec![ToIdle]),
            (RfstIdle, RfstDiscovery) => Some(vec![IdleToDiscovery]),
            (RfstDiscovery, RfstIdle) => Some(vec![DiscoveryToIdle]),
            (RfstPollActive, RfstIdle) => Some(vec![PollToIdle]),
            (RfstPollActive, RfstDiscovery) => Some(vec![PollToDiscovery]),
            _ => None,
        }
    }
}
