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

//! NCI wire constants: GIDs, OIDs, status codes, and the 3-byte packet header.

use crate::error::CodecError;
use bytes::{BufMut, BytesMut};

/// Group identifiers (Table 95 of the NCI spec).
pub mod gid {
    pub const CORE: u8 = 0x00;
    pub const RF: u8 = 0x01;
    pub const NFCEE: u8 = 0x02;
}

/// CORE-group opcodes.
pub mod core_oid {
    pub const RESET: u8 = 0x00;
    pub const INIT: u8 = 0x01;
    pub const SET_CONFIG: u8 = 0x02;
    pub const GET_CONFIG: u8 = 0x03;
    pub const CONN_CREATE: u8 = 0x04;
    pub const CONN_CLOSE: u8 = 0x05;
    pub const CONN_CREDITS: u8 = 0x06;
    pub const GENERIC_ERROR: u8 = 0x07;
    pub const INTERFACE_ERROR: u8 = 0x08;
}

/// RF-group opcodes.
pub mod rf_oid {
    pub const DISCOVER_MAP: u8 = 0x00;
    pub const SET_LISTEN_MODE_ROUTING: u8 = 0x01;
    pub const GET_LISTEN_MODE_ROUTING: u8 = 0x02;
    pub const DISCOVER: u8 = 0x03;
    pub const DISCOVER_SELECT: u8 = 0x04;
    pub const INTF_ACTIVATED: u8 = 0x05;
    pub const DEACTIVATE: u8 = 0x06;
}

/// Table 94 status codes; only the ones the engine inspects directly are named.
pub mod status {
    pub const OK: u8 = 0x00;
}

/// Message type carried in the top 3 bits of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Data,
    Command,
    Response,
    Notification,
}

impl MessageType {
    fn from_bits(bits: u8) -> Option<MessageType> {
        match bits {
            0b000 => Some(MessageType::Data),
            0b001 => Some(MessageType::Command),
            0b010 => Some(MessageType::Response),
            0b011 => Some(MessageType::Notification),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MessageType::Data => 0b000,
            MessageType::Command => 0b001,
            MessageType::Response => 0b010,
            MessageType::Notification => 0b011,
        }
    }
}

/// Packet boundary flag: whether more fragments follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketBoundaryFlag {
    CompleteOrFinal,
    Incomplete,
}

const PBF_MASK: u8 = 0x10;
const MT_SHIFT: u8 = 5;
const GID_MASK: u8 = 0x0f;

/// The common 3-byte NCI packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub mt: MessageType,
    pub pbf: PacketBoundaryFlag,
    /// GID for Command/Response/Notification packets, CID for Data packets.
    pub gid_or_cid: u8,
    /// OID for Command/Response/Notification packets; reserved (0) for Data.
    pub oid: u8,
    pub payload_length: u8,
}

impl PacketHeader {
    /// Parse the 3-byte header. Does not look at payload bytes.
    pub fn parse(bytes: &[u8]) -> Result<PacketHeader, CodecError> {
        if bytes.len() < 3 {
            return Err(CodecError::TooShort { need: 3, have: bytes.len() });
        }
        let mt = MessageType::from_bits(bytes[0] >> MT_SHIFT)
            .ok_or(CodecError::InvalidField("message type"))?;
        let pbf = if bytes[0] & PBF_MASK != 0 {
            PacketBoundaryFlag::Incomplete
        } else {
            PacketBoundaryFlag::CompleteOrFinal
        };
        Ok(PacketHeader {
            mt,
            pbf,
            gid_or_cid: bytes[0] & GID_MASK,
            oid: bytes[1],
            payload_length: bytes[2],
        })
    }

    /// Serialize the header into `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        let mut b0 = self.mt.bits() << MT_SHIFT;
        if self.pbf == PacketBoundaryFlag::Incomplete {
            b0 |= PBF_MASK;
        }
        b0 |= self.gid_or_cid & GID_MASK;
        buf.put_u8(b0);
        buf.put_u8(self.oid);
        buf.put_u8(self.payload_length);
    }
}

/// Encode a complete (unfragmented) control packet: header + payload.
pub fn encode_control(mt: MessageType, gid: u8, oid: u8, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(3 + payload.len());
    PacketHeader {
        mt,
        pbf: PacketBoundaryFlag::CompleteOrFinal,
        gid_or_cid: gid,
        oid,
        payload_length: payload.len() as u8,
    }
    .write(&mut buf);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut buf = BytesMut::new();
        let h = PacketHeader {
            mt: MessageType::Command,
            pbf: PacketBoundaryFlag::CompleteOrFinal,
            gid_or_cid: gid::CORE,
            oid: core_oid::RESET,
            payload_length: 1,
        };
        h.write(&mut buf);
        let parsed = PacketHeader::parse(&buf).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn header_too_short() {
        assert!(matches!(
            PacketHeader::parse(&[0x20, 0x00]),
            Err(CodecError::TooShort { need: 3, have: 2 })
        ));
    }

    #[test]
    fn s1_reset_cmd_bytes() {
        let pkt = encode_control(MessageType::Command, gid::CORE, core_oid::RESET, &[0x00]);
        assert_eq!(&pkt[..], &[0x20, 0x00, 0x01, 0x00]);
    }
}
