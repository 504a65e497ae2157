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

//! Core configuration knobs.
//!
//! The core is a library: it never reads a config file or an environment
//! variable. Callers construct a [`CoreConfig`] in-process and pass it to
//! [`crate::core::Core::new`].

use std::time::Duration;

/// Default per-command timeout, matching the NCI core's historical default.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default bound on the number of queued outbound data packets per CID
/// before `send_data` starts rejecting new sends for that connection.
pub const DEFAULT_MAX_QUEUED_PER_CID: usize = 32;

/// Configuration accepted by [`crate::core::Core::new`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long to wait for a command response before stalling into `ERROR`.
    pub cmd_timeout: Duration,
    /// Maximum number of data packets queued per logical connection while
    /// waiting for credits.
    pub max_queued_per_cid: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            cmd_timeout: DEFAULT_CMD_TIMEOUT,
            max_queued_per_cid: DEFAULT_MAX_QUEUED_PER_CID,
        }
    }
}
