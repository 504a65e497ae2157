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

//! Byte-exact encode/decode of NCI control packets and the activation-time
//! structures carried inside them.

pub mod core_msgs;
pub mod params;
pub mod wire;

pub use core_msgs::{parse_conn_credits_ntf, CoreInitRsp, CoreResetRsp, CreditEntry, NciVersion};
pub use params::{
    fsci_to_fsc, parse_rf_deactivate_ntf, ActivationParamIsoDepPollA, DeactivateType, Mode,
    ModeParamPollA, Protocol, RfInterface, RfIntfActivatedNtf,
};
pub use wire::{core_oid, gid, rf_oid, status, encode_control, MessageType, PacketBoundaryFlag, PacketHeader};
