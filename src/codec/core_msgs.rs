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

//! Parsers for CORE-group response and notification payloads.

use crate::error::CodecError;

/// NCI interface version, determined by the shape of CORE_RESET_RSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NciVersion {
    V1,
    V2,
}

/// `CORE_RESET_RSP`. Length 3 is v1 (status + config byte); length 1 is v2
/// (status only, the rest of init happens via `CORE_RESET_NTF`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreResetRsp {
    V1 { status: u8 },
    V2 { status: u8 },
}

impl CoreResetRsp {
    pub fn parse(payload: &[u8]) -> Result<CoreResetRsp, CodecError> {
        match payload.len() {
            3 => Ok(CoreResetRsp::V1 { status: payload[0] }),
            1 => Ok(CoreResetRsp::V2 { status: payload[0] }),
            n => Err(CodecError::LengthMismatch { declared: 3, actual: n }),
        }
    }

    pub fn status(&self) -> u8 {
        match self {
            CoreResetRsp::V1 { status } | CoreResetRsp::V2 { status } => *status,
        }
    }

    pub fn version(&self) -> NciVersion {
        match self {
            CoreResetRsp::V1 { .. } => NciVersion::V1,
            CoreResetRsp::V2 { .. } => NciVersion::V2,
        }
    }
}

/// Decoded `CORE_INIT_RSP`, either NCI 1.x or 2.x shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreInitRsp {
    pub status: u8,
    pub features: [u8; 4],
    pub rf_interfaces: Vec<u8>,
    pub max_logical_connections: u8,
    pub max_routing_table_size: u16,
    pub max_control_packet_payload_size: u8,
}

impl CoreInitRsp {
    /// Parse the NCI 1.x layout:
    /// `[status, feat(4), n, rf_intf[n], max_conns, max_rt(2 LE), max_ctrl, max_large(2), mfg_id, mfg_info(4)]`,
    /// total length `17 + n`.
    pub fn parse_v1(payload: &[u8]) -> Result<CoreInitRsp, CodecError> {
        if payload.len() < 17 {
            return Err(CodecError::TooShort { need: 17, have: payload.len() });
        }
        let n = payload[5] as usize;
        let expected = n + 17;
        if payload.len() != expected {
            return Err(CodecError::LengthMismatch { declared: expected, actual: payload.len() });
        }
        let rf_interfaces = payload[6..6 + n].to_vec();
        let max_logical_connections = payload[6 + n];
        let max_routing_table_size =
            u16::from(payload[7 + n]) | (u16::from(payload[8 + n]) << 8);
        let max_control_packet_payload_size = payload[9 + n];
        Ok(CoreInitRsp {
            status: payload[0],
            features: [payload[1], payload[2], payload[3], payload[4]],
            rf_interfaces,
            max_logical_connections,
            max_routing_table_size,
            max_control_packet_payload_size,
        })
    }

    /// Parse the NCI 2.x layout:
    /// `[status, feat(4), max_conns, max_rt(2), max_ctrl, max_hci, hci_credits, max_nfcv(2), n, rf_intf_ext[2n]]`,
    /// total length `14 + 2n`.
    pub fn parse_v2(payload: &[u8]) -> Result<CoreInitRsp, CodecError> {
        if payload.len() < 14 {
            return Err(CodecError::TooShort { need: 14, have: payload.len() });
        }
        let n = payload[13] as usize;
        let expected = 2 * n + 14;
        if payload.len() != expected {
            return Err(CodecError::LengthMismatch { declared: expected, actual: payload.len() });
        }
        let rf_interfaces = payload[14..14 + 2 * n].to_vec();
        Ok(CoreInitRsp {
            status: payload[0],
            features: [payload[1], payload[2], payload[3], payload[4]],
            rf_interfaces,
            max_logical_connections: payload[5],
            max_routing_table_size: u16::from(payload[6]) | (u16::from(payload[7]) << 8),
            max_control_packet_payload_size: payload[8],
        })
    }
}

/// A single `(cid, credits)` entry inside `CORE_CONN_CREDITS_NTF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditEntry {
    pub cid: u8,
    pub credits: u8,
}

/// `CORE_CONN_CREDITS_NTF`: `[n, (cid, credits)*n]`, total length `1 + 2n`.
pub fn parse_conn_credits_ntf(payload: &[u8]) -> Result<Vec<CreditEntry>, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::TooShort { need: 1, have: 0 });
    }
    let n = payload[0] as usize;
    let expected = 1 + 2 * n;
    if payload.len() != expected {
        return Err(CodecError::LengthMismatch { declared: expected, actual: payload.len() });
    }
    Ok(payload[1..]
        .chunks_exact(2)
        .map(|c| CreditEntry { cid: c[0], credits: c[1] })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_rsp_v1() {
        let r = CoreResetRsp::parse(&[0x00, 0x10, 0x00]).unwrap();
        assert_eq!(r, CoreResetRsp::V1 { status: 0 });
        assert_eq!(r.version(), NciVersion::V1);
    }

    #[test]
    fn reset_rsp_v2() {
        let r = CoreResetRsp::parse(&[0x00]).unwrap();
        assert_eq!(r.version(), NciVersion::V2);
    }

    #[test]
    fn reset_rsp_bad_length() {
        assert!(CoreResetRsp::parse(&[0x00, 0x00]).is_err());
    }

    #[test]
    fn init_rsp_v1_s1_bytes() {
        // status, feat(4), n=0, max_conns=0x02, max_rt(2), max_ctrl=0x40,
        // max_large(2), mfg_id, mfg_info(4): 17 bytes total.
        let payload = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let rsp = CoreInitRsp::parse_v1(&payload).unwrap();
        assert_eq!(rsp.max_logical_connections, 0x02);
        assert_eq!(rsp.max_control_packet_payload_size, 0x40);
        assert!(rsp.rf_interfaces.is_empty());
    }

    #[test]
    fn init_rsp_v1_length_boundary() {
        let mut payload = vec![0u8; 17];
        payload[5] = 0; // n = 0, so total must be exactly 17
        assert!(CoreInitRsp::parse_v1(&payload).is_ok());
        payload.push(0xaa); // now 18 bytes but n still says 0
        assert!(CoreInitRsp::parse_v1(&payload).is_err());
    }

    #[test]
    fn init_rsp_v2_length_boundary() {
        let mut payload = vec![0u8; 14];
        payload[13] = 1; // n = 1 -> expects 16 bytes total
        assert!(CoreInitRsp::parse_v2(&payload).is_err());
        payload.extend_from_slice(&[0x02, 0x03]);
        assert!(CoreInitRsp::parse_v2(&payload).is_ok());
    }

    #[test]
    fn conn_credits_ntf_multi_entry() {
        let entries = parse_conn_credits_ntf(&[0x02, 0x01, 0x05, 0x02, 0x03]).unwrap();
        assert_eq!(
            entries,
            vec![CreditEntry { cid: 1, credits: 5 }, CreditEntry { cid: 2, credits: 3 }]
        );
    }
}
