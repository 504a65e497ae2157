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

//! Mode/activation parameter parsers and RF notification payloads.

use crate::error::CodecError;

/// RF technology/mode byte (Table 96). Only the variants the codec and
/// engine act on are named; others are carried opaquely as `Other(u8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PassivePollA,
    PassivePollB,
    PassivePollF,
    ActivePollA,
    ActivePollF,
    PassivePoll15693,
    PassiveListenA,
    PassiveListenB,
    PassiveListenF,
    ActiveListenA,
    ActiveListenF,
    PassiveListen15693,
    Other(u8),
}

impl Mode {
    pub fn from_byte(b: u8) -> Mode {
        match b {
            0x00 => Mode::PassivePollA,
            0x01 => Mode::PassivePollB,
            0x02 => Mode::PassivePollF,
            0x03 => Mode::ActivePollA,
            0x05 => Mode::ActivePollF,
            0x06 => Mode::PassivePoll15693,
            0x80 => Mode::PassiveListenA,
            0x81 => Mode::PassiveListenB,
            0x82 => Mode::PassiveListenF,
            0x83 => Mode::ActiveListenA,
            0x85 => Mode::ActiveListenF,
            0x86 => Mode::PassiveListen15693,
            other => Mode::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Mode::PassivePollA => 0x00,
            Mode::PassivePollB => 0x01,
            Mode::PassivePollF => 0x02,
            Mode::ActivePollA => 0x03,
            Mode::ActivePollF => 0x05,
            Mode::PassivePoll15693 => 0x06,
            Mode::PassiveListenA => 0x80,
            Mode::PassiveListenB => 0x81,
            Mode::PassiveListenF => 0x82,
            Mode::ActiveListenA => 0x83,
            Mode::ActiveListenF => 0x85,
            Mode::PassiveListen15693 => 0x86,
            Mode::Other(b) => b,
        }
    }
}

/// RF protocol byte (Table 98).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Undetermined,
    T1t,
    T2t,
    T3t,
    IsoDep,
    NfcDep,
    Other(u8),
}

impl Protocol {
    pub fn from_byte(b: u8) -> Protocol {
        match b {
            0x00 => Protocol::Undetermined,
            0x01 => Protocol::T1t,
            0x02 => Protocol::T2t,
            0x03 => Protocol::T3t,
            0x04 => Protocol::IsoDep,
            0x05 => Protocol::NfcDep,
            other => Protocol::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Protocol::Undetermined => 0x00,
            Protocol::T1t => 0x01,
            Protocol::T2t => 0x02,
            Protocol::T3t => 0x03,
            Protocol::IsoDep => 0x04,
            Protocol::NfcDep => 0x05,
            Protocol::Other(b) => b,
        }
    }
}

/// RF interface byte (Table 99).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfInterface {
    NfceeDirect,
    Frame,
    IsoDep,
    NfcDep,
    Other(u8),
}

impl RfInterface {
    pub fn from_byte(b: u8) -> RfInterface {
        match b {
            0x00 => RfInterface::NfceeDirect,
            0x01 => RfInterface::Frame,
            0x02 => RfInterface::IsoDep,
            0x03 => RfInterface::NfcDep,
            other => RfInterface::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            RfInterface::NfceeDirect => 0x00,
            RfInterface::Frame => 0x01,
            RfInterface::IsoDep => 0x02,
            RfInterface::NfcDep => 0x03,
            RfInterface::Other(b) => b,
        }
    }
}

/// Table 54 specific parameters for NFC-A poll mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeParamPollA {
    pub sens_res: [u8; 2],
    pub nfcid1: Vec<u8>,
    pub sel_res: Option<u8>,
}

/// `nfcid1_len` values the NCI spec allows for NFC-A.
const VALID_NFCID1_LENGTHS: [u8; 4] = [0, 4, 7, 10];

impl ModeParamPollA {
    /// `[sens_res(2), nfcid1_len, nfcid1[nfcid1_len], sel_res_len, sel_res[sel_res_len]]`.
    pub fn parse(bytes: &[u8]) -> Result<ModeParamPollA, CodecError> {
        if bytes.len() < 4 {
            return Err(CodecError::TooShort { need: 4, have: bytes.len() });
        }
        let sens_res = [bytes[0], bytes[1]];
        let nfcid1_len = bytes[2] as usize;
        if !VALID_NFCID1_LENGTHS.contains(&(nfcid1_len as u8)) {
            return Err(CodecError::InvalidField("nfcid1_len"));
        }
        let sel_res_len_offset = 3 + nfcid1_len;
        if bytes.len() <= sel_res_len_offset {
            return Err(CodecError::TooShort { need: sel_res_len_offset + 1, have: bytes.len() });
        }
        let sel_res_len = bytes[sel_res_len_offset] as usize;
        if sel_res_len > 1 {
            return Err(CodecError::InvalidField("sel_res_len"));
        }
        let expected = sel_res_len_offset + 1 + sel_res_len;
        if bytes.len() < expected {
            return Err(CodecError::TooShort { need: expected, have: bytes.len() });
        }
        let nfcid1 = bytes[3..3 + nfcid1_len].to_vec();
        let sel_res = if sel_res_len == 1 { Some(bytes[sel_res_len_offset + 1]) } else { None };
        Ok(ModeParamPollA { sens_res, nfcid1, sel_res })
    }
}

/// Table 66: FSCI to FSC conversion. Out-of-range indices clamp to the
/// largest entry, matching how the original NFCC firmware behaves.
const FSC_TABLE: [u32; 9] = [16, 24, 32, 40, 48, 64, 96, 128, 256];

/// Convert a 4-bit FSCI value to its FSC byte count (Table 66).
pub fn fsci_to_fsc(fsci: u8) -> u32 {
    let idx = fsci as usize;
    if idx < FSC_TABLE.len() {
        FSC_TABLE[idx]
    } else {
        FSC_TABLE[FSC_TABLE.len() - 1]
    }
}

const ATS_T0_TA_PRESENT: u8 = 0x10;
const ATS_T0_TB_PRESENT: u8 = 0x20;
const ATS_T0_TC_PRESENT: u8 = 0x30;
const ATS_T0_FSCI_MASK: u8 = 0x0f;

/// Table 76 activation parameters for NFC-A/ISO-DEP poll mode, decoded from
/// the Answer-To-Select (ATS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationParamIsoDepPollA {
    pub fsc: u32,
    pub historical_bytes: Vec<u8>,
}

impl ActivationParamIsoDepPollA {
    /// `[ats_len, t0, (ta?), (tb?), (tc?), historical[...]]`.
    pub fn parse(bytes: &[u8]) -> Result<ActivationParamIsoDepPollA, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::TooShort { need: 1, have: 0 });
        }
        let ats_len = bytes[0] as usize;
        if ats_len < 1 || bytes.len() < ats_len + 1 {
            return Err(CodecError::TooShort { need: ats_len + 1, have: bytes.len() });
        }
        let ats = &bytes[1..1 + ats_len];
        let t0 = ats[0];
        let mut offset = 1;
        if t0 & ATS_T0_TA_PRESENT != 0 {
            offset += 1;
        }
        if t0 & ATS_T0_TB_PRESENT != 0 {
            offset += 1;
        }
        // TC's presence test uses the combined 0x30 mask rather than a
        // dedicated bit, so it also fires whenever TA or TB alone is
        // present; this mirrors the NFCC-observed behaviour exactly.
        if t0 & ATS_T0_TC_PRESENT != 0 {
            offset += 1;
        }
        if offset > ats_len {
            return Err(CodecError::InvalidField("ats T0 byte count exceeds ats_len"));
        }
        let fsci = t0 & ATS_T0_FSCI_MASK;
        let fsc = fsci_to_fsc(fsci);
        let historical_bytes = ats[offset..].to_vec();
        Ok(ActivationParamIsoDepPollA { fsc, historical_bytes })
    }
}

/// Decoded `RF_INTF_ACTIVATED_NTF`
/// (`[disc_id, rf_intf, protocol, mode, max_pkt, init_credits, n, mode_param[n],
///    dx_mode, tx_rate, rx_rate, m, act_param[m]]`, minimum `11 + n + m` bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfIntfActivatedNtf {
    pub discovery_id: u8,
    pub rf_interface: RfInterface,
    pub protocol: Protocol,
    pub mode: Mode,
    pub max_data_packet_size: u8,
    pub initial_credits: u8,
    pub mode_param_bytes: Vec<u8>,
    pub data_exchange_mode: Mode,
    pub transmit_rate: u8,
    pub receive_rate: u8,
    pub activation_param_bytes: Vec<u8>,
}

impl RfIntfActivatedNtf {
    pub fn parse(payload: &[u8]) -> Result<RfIntfActivatedNtf, CodecError> {
        if payload.len() <= 6 {
            return Err(CodecError::TooShort { need: 7, have: payload.len() });
        }
        let mode_param_len = payload[6] as usize;
        let off = 7 + mode_param_len;
        if payload.len() <= off + 3 {
            return Err(CodecError::TooShort { need: off + 4, have: payload.len() });
        }
        let activation_param_len = payload[off + 3] as usize;
        let expected = off + 4 + activation_param_len;
        if payload.len() != expected {
            return Err(CodecError::LengthMismatch { declared: expected, actual: payload.len() });
        }
        let mode_param_bytes = payload[7..7 + mode_param_len].to_vec();
        let activation_param_bytes = payload[off + 4..off + 4 + activation_param_len].to_vec();
        Ok(RfIntfActivatedNtf {
            discovery_id: payload[0],
            rf_interface: RfInterface::from_byte(payload[1]),
            protocol: Protocol::from_byte(payload[2]),
            mode: Mode::from_byte(payload[3]),
            max_data_packet_size: payload[4],
            initial_credits: payload[5],
            mode_param_bytes,
            data_exchange_mode: Mode::from_byte(payload[off]),
            transmit_rate: payload[off + 1],
            receive_rate: payload[off + 2],
            activation_param_bytes,
        })
    }

    /// Decode the mode-parameter bytes for NFC-A poll modes. Returns `None`
    /// for modes this codec does not yet decode (only the payload bytes are
    /// then available, matching the original's "unhandled mode" behaviour).
    pub fn decode_mode_param_poll_a(&self) -> Option<Result<ModeParamPollA, CodecError>> {
        match self.mode {
            Mode::PassivePollA | Mode::ActivePollA => {
                Some(ModeParamPollA::parse(&self.mode_param_bytes))
            }
            _ => None,
        }
    }

    /// Decode the activation-parameter bytes for ISO-DEP over NFC-A/B poll.
    pub fn decode_activation_param_iso_dep_poll_a(
        &self,
    ) -> Option<Result<ActivationParamIsoDepPollA, CodecError>> {
        match (self.rf_interface, self.mode) {
            (RfInterface::IsoDep, Mode::PassivePollA | Mode::ActivePollA) => {
                Some(ActivationParamIsoDepPollA::parse(&self.activation_param_bytes))
            }
            _ => None,
        }
    }
}

/// `RF_DEACTIVATE_NTF` type byte (Table for deactivation types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateType {
    Idle,
    Sleep,
    SleepAf,
    Discovery,
    Other(u8),
}

impl DeactivateType {
    pub fn from_byte(b: u8) -> DeactivateType {
        match b {
            0x00 => DeactivateType::Idle,
            0x01 => DeactivateType::Sleep,
            0x02 => DeactivateType::SleepAf,
            0x03 => DeactivateType::Discovery,
            other => DeactivateType::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DeactivateType::Idle => 0x00,
            DeactivateType::Sleep => 0x01,
            DeactivateType::SleepAf => 0x02,
            DeactivateType::Discovery => 0x03,
            DeactivateType::Other(b) => b,
        }
    }
}

/// `RF_DEACTIVATE_NTF`: `[type, reason]`.
pub fn parse_rf_deactivate_ntf(payload: &[u8]) -> Result<(DeactivateType, u8), CodecError> {
    if payload.len() != 2 {
        return Err(CodecError::LengthMismatch { declared: 2, actual: payload.len() });
    }
    Ok((DeactivateType::from_byte(payload[0]), payload[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsci_table_boundaries() {
        let expected = [16, 24, 32, 40, 48, 64, 96, 128, 256, 256, 256, 256, 256, 256, 256, 256];
        for (fsci, exp) in expected.iter().enumerate() {
            assert_eq!(fsci_to_fsc(fsci as u8), *exp);
        }
    }

    #[test]
    fn poll_a_valid_nfcid1_lengths() {
        for len in [0u8, 4, 7, 10] {
            let mut bytes = vec![0x04, 0x00, len];
            bytes.extend(std::iter::repeat(0xaa).take(len as usize));
            bytes.push(0); // sel_res_len = 0
            assert!(ModeParamPollA::parse(&bytes).is_ok());
        }
    }

    #[test]
    fn poll_a_rejects_invalid_nfcid1_length() {
        let bytes = [0x04, 0x00, 5, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x00];
        assert!(ModeParamPollA::parse(&bytes).is_err());
    }

    #[test]
    fn s3_ats_t0_0x78_gives_fsc_256_and_two_historical_bytes() {
        // ats_len=6, T0=0x78 (TA+TB+TC present, FSCI=8), then TA, TB, TC, two historical bytes
        let bytes = [0x06, 0x78, 0x11, 0x22, 0x33, 0xaa, 0xbb];
        let parsed = ActivationParamIsoDepPollA::parse(&bytes).unwrap();
        assert_eq!(parsed.fsc, 256);
        assert_eq!(parsed.historical_bytes, vec![0xaa, 0xbb]);
    }

    #[test]
    fn deactivate_ntf_maps_types() {
        assert_eq!(parse_rf_deactivate_ntf(&[0x00, 0x00]).unwrap().0, DeactivateType::Idle);
        assert_eq!(parse_rf_deactivate_ntf(&[0x03, 0x00]).unwrap().0, DeactivateType::Discovery);
    }
}
