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

//! A host-side implementation of the NFC Controller Interface (NCI): the
//! state machine that drives RF discovery and activation, the
//! segmentation-and-reassembly layer that frames control and data packets
//! onto a byte-oriented transport, and the wire codec for the control
//! messages the core understands.
//!
//! The crate owns no transport of its own. Callers supply a
//! [`hal::HalIo`] implementation and an inbound [`tokio::sync::mpsc`]
//! channel of raw HAL fragments to [`core::Core::new`], and get back a
//! [`core::CoreHandle`] to drive the controller and subscribe to its events.

pub mod capabilities;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod hal;
pub mod sar;
pub mod state;
pub mod transition;

pub use codec::RfIntfActivatedNtf;
pub use config::CoreConfig;
pub use core::{Core, CoreHandle};
pub use error::{CodecError, HalError};
pub use events::SubId;
pub use hal::{ChannelHal, HalIo};
pub use state::State;
pub use transition::TransitionId;
