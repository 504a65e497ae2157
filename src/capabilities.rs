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

//! NFCC capability snapshot, populated by `CORE_INIT_RSP` and consulted by
//! the bootstrap and `IDLE -> DISCOVERY` transitions.

use crate::codec::{CoreInitRsp, NciVersion};

/// `CORE_INIT_RSP` feature byte 1 (discovery-related capability bits).
pub mod nfcc_discovery {
    pub const NONE: u8 = 0x00;
    pub const FREQUENCY_CONFIG: u8 = 0x01;
    pub const RF_CONFIG_MERGE: u8 = 0x02;
}

/// `CORE_INIT_RSP` feature byte 2 (listen-mode routing capability bits).
pub mod nfcc_routing {
    pub const NONE: u8 = 0x00;
    pub const TECHNOLOGY_BASED: u8 = 0x02;
    pub const PROTOCOL_BASED: u8 = 0x04;
    pub const AID_BASED: u8 = 0x08;
}

/// `CORE_INIT_RSP` feature byte 3 (power-state capability bits).
pub mod nfcc_power {
    pub const NONE: u8 = 0x00;
    pub const BATTERY_OFF: u8 = 0x01;
    pub const SWITCH_OFF: u8 = 0x02;
}

/// Snapshot of what the NFCC told us about itself in `CORE_INIT_RSP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfccCapabilities {
    pub version: NciVersion,
    pub nfcc_discovery: u8,
    pub nfcc_routing: u8,
    pub nfcc_power: u8,
    pub rf_interfaces: Vec<u8>,
    pub max_logical_connections: u8,
    pub max_routing_table_size: u16,
    pub max_control_packet_payload_size: u8,
}

impl NfccCapabilities {
    pub fn from_init_rsp(version: NciVersion, rsp: &CoreInitRsp) -> NfccCapabilities {
        NfccCapabilities {
            version,
            nfcc_discovery: rsp.features[0],
            nfcc_routing: rsp.features[1],
            nfcc_power: rsp.features[2],
            rf_interfaces: rsp.rf_interfaces.clone(),
            max_logical_connections: rsp.max_logical_connections,
            max_routing_table_size: rsp.max_routing_table_size,
            max_control_packet_payload_size: rsp.max_control_packet_payload_size,
        }
    }

    pub fn supports_protocol_routing(&self) -> bool {
        self.nfcc_routing & nfcc_routing::PROTOCOL_BASED != 0
    }

    pub fn supports_technology_routing(&self) -> bool {
        self.nfcc_routing & nfcc_routing::TECHNOLOGY_BASED != 0
    }
}

impl Default for NfccCapabilities {
    fn default() -> NfccCapabilities {
        NfccCapabilities {
            version: NciVersion::V1,
            nfcc_discovery: nfcc_discovery::NONE,
            nfcc_routing: nfcc_routing::NONE,
            nfcc_power: nfcc_power::NONE,
            rf_interfaces: Vec::new(),
            max_logical_connections: 1,
            max_routing_table_size: 0,
            max_control_packet_payload_size: 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CoreInitRsp;

    #[test]
    fn routing_bits_are_read_from_feature_byte_two() {
        let rsp = CoreInitRsp {
            status: 0,
            features: [0x00, nfcc_routing::PROTOCOL_BASED | nfcc_routing::TECHNOLOGY_BASED, 0x00, 0x00],
            rf_interfaces: Vec::new(),
            max_logical_connections: 1,
            max_routing_table_size: 0,
            max_control_packet_payload_size: 255,
        };
        let caps = NfccCapabilities::from_init_rsp(NciVersion::V2, &rsp);
        assert!(caps.supports_protocol_routing());
        assert!(caps.supports_technology_routing());
    }

    #[test]
    fn default_capabilities_support_no_routing() {
        let caps = NfccCapabilities::default();
        assert!(!caps.supports_protocol_routing());
        assert!(!caps.supports_technology_routing());
    }
}
