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

//! Segmentation & reassembly: frames NCI packets onto/from the HAL byte
//! stream, and keeps per-connection credit/queue state for data packets.

use crate::codec::wire::{MessageType, PacketBoundaryFlag, PacketHeader};
use crate::error::CodecError;
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};

/// Identifies the static RF connection between DH and a remote endpoint.
pub const STATIC_RF_CONN_ID: u8 = 0x00;

/// A fully reassembled inbound packet, demultiplexed by message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SarEvent {
    Response { gid: u8, oid: u8, payload: Bytes },
    Notification { gid: u8, oid: u8, payload: Bytes },
    Data { cid: u8, payload: Bytes },
}

/// Per-logical-connection state: credits, a bounded outbound queue of
/// not-yet-sent fragments, and the fragmentation size for this connection.
#[derive(Debug, Default)]
struct ConnectionState {
    credits: u32,
    max_payload_size: u8,
    queue: VecDeque<QueuedFragment>,
}

#[derive(Debug)]
struct QueuedFragment {
    send_id: u64,
    bytes: Bytes,
    /// True for the last fragment of a logical send (so the caller's
    /// completion callback, tracked by the core, fires at the right time).
    is_final: bool,
}

/// Fragmentation and reassembly state machine.
pub struct Sar {
    max_control_packet_size: u8,
    max_logical_connections: u8,
    connections: HashMap<u8, ConnectionState>,
    control_reassembly: BytesMut,
    control_header: Option<PacketHeader>,
    data_reassembly: HashMap<u8, (PacketHeader, BytesMut)>,
    next_send_id: u64,
}

impl Sar {
    pub fn new() -> Sar {
        let mut connections = HashMap::new();
        connections.insert(STATIC_RF_CONN_ID, ConnectionState::default());
        Sar {
            max_control_packet_size: 255,
            max_logical_connections: 1,
            connections,
            control_reassembly: BytesMut::new(),
            control_header: None,
            data_reassembly: HashMap::new(),
            next_send_id: 1,
        }
    }

    /// Drop all in-flight reassembly state and per-connection queues/credits,
    /// keeping only the static RF connection. Called on `restart`.
    pub fn reset(&mut self) {
        self.connections.clear();
        self.connections.insert(STATIC_RF_CONN_ID, ConnectionState::default());
        self.control_reassembly.clear();
        self.control_header = None;
        self.data_reassembly.clear();
    }

    pub fn set_max_control_packet_size(&mut self, n: u8) {
        self.max_control_packet_size = n.max(1);
    }

    pub fn set_max_logical_connections(&mut self, n: u8) {
        self.max_logical_connections = n;
    }

    /// Seed the baseline credits and per-fragment size for a connection,
    /// called at activation (for `STATIC_RF_CONN_ID`) or `CORE_CONN_CREATE_RSP`.
    pub fn set_initial_credits(&mut self, cid: u8, credits: u8, max_payload_size: u8) {
        let conn = self.connections.entry(cid).or_default();
        conn.credits = credits as u32;
        conn.max_payload_size = max_payload_size.max(1);
    }

    /// Apply a `CORE_CONN_CREDITS_NTF` entry, draining any fragments parked
    /// while credits were exhausted. Returns frames now ready to write.
    pub fn add_credits(&mut self, cid: u8, delta: u8) -> Vec<Bytes> {
        let Some(conn) = self.connections.get_mut(&cid) else {
            warn!("credits for unknown cid {}", cid);
            return Vec::new();
        };
        conn.credits += delta as u32;
        let mut ready = Vec::new();
        while conn.credits > 0 {
            match conn.queue.pop_front() {
                Some(frag) => {
                    conn.credits -= 1;
                    ready.push(frag.bytes);
                }
                None => break,
            }
        }
        ready
    }

    /// Encode a control (Command) packet, fragmenting per
    /// `max_control_packet_size`. Every fragment but the last carries
    /// `PBF = Incomplete`.
    pub fn encode_command(&self, gid: u8, oid: u8, payload: &[u8]) -> Vec<Bytes> {
        encode_fragments(MessageType::Command, gid, oid, payload, self.max_control_packet_size)
    }

    /// Queue a data send on `cid`. Fragments that fit within currently
    /// available credits are returned for immediate writing; the rest are
    /// parked and released later via [`Sar::add_credits`].
    pub fn send_data(&mut self, cid: u8, payload: Bytes) -> Option<(u64, Vec<Bytes>)> {
        let conn = self.connections.get_mut(&cid)?;
        let send_id = self.next_send_id;
        self.next_send_id += 1;
        let chunk_size = conn.max_payload_size.max(1) as usize;
        let chunks: Vec<Bytes> = if payload.is_empty() {
            vec![Bytes::new()]
        } else {
            payload
                .chunks(chunk_size)
                .map(|c| Bytes::copy_from_slice(c))
                .collect()
        };
        let n = chunks.len();
        let mut ready = Vec::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let is_final = i + 1 == n;
            let pbf = if is_final {
                PacketBoundaryFlag::CompleteOrFinal
            } else {
                PacketBoundaryFlag::Incomplete
            };
            let mut buf = BytesMut::with_capacity(3 + chunk.len());
            PacketHeader { mt: MessageType::Data, pbf, gid_or_cid: cid, oid: 0, payload_length: chunk.len() as u8 }
                .write(&mut buf);
            buf.extend_from_slice(&chunk);
            let framed = buf.freeze();
            if conn.credits > 0 {
                conn.credits -= 1;
                ready.push(framed);
            } else {
                conn.queue.push_back(QueuedFragment { send_id, bytes: framed, is_final });
            }
        }
        Some((send_id, ready))
    }

    /// Best-effort cancel: drop any not-yet-sent fragments for `send_id`.
    pub fn cancel(&mut self, send_id: u64) {
        for conn in self.connections.values_mut() {
            conn.queue.retain(|f| f.send_id != send_id);
        }
    }

    /// Feed one HAL-delivered byte chunk (a single NCI fragment) into the
    /// reassembler. Returns a fully reassembled event once the final
    /// fragment of a logical message arrives.
    pub fn on_hal_read(&mut self, fragment: &[u8]) -> Result<Option<SarEvent>, CodecError> {
        let header = PacketHeader::parse(fragment)?;
        let payload = &fragment[3..];
        if payload.len() < header.payload_length as usize {
            return Err(CodecError::TooShort {
                need: 3 + header.payload_length as usize,
                have: fragment.len(),
            });
        }
        let payload = &payload[..header.payload_length as usize];

        match header.mt {
            MessageType::Data => {
                let cid = header.gid_or_cid;
                if let Some((first, _)) = self.data_reassembly.get(&cid) {
                    if !headers_match(first, &header) {
                        self.data_reassembly.remove(&cid);
                        return Err(CodecError::InvalidField("reassembly header mismatch"));
                    }
                }
                let (_, buf) =
                    self.data_reassembly.entry(cid).or_insert_with(|| (header, BytesMut::new()));
                buf.extend_from_slice(payload);
                if header.pbf == PacketBoundaryFlag::Incomplete {
                    debug!("data fragment queued for cid {}", cid);
                    return Ok(None);
                }
                let (_, buf) = self.data_reassembly.remove(&cid).unwrap();
                Ok(Some(SarEvent::Data { cid, payload: buf.freeze() }))
            }
            MessageType::Response | MessageType::Notification => {
                if let Some(first) = self.control_header {
                    if !headers_match(&first, &header) {
                        self.control_reassembly.clear();
                        self.control_header = None;
                        return Err(CodecError::InvalidField("reassembly header mismatch"));
                    }
                } else {
                    self.control_header = Some(header);
                }
                self.control_reassembly.extend_from_slice(payload);
                if header.pbf == PacketBoundaryFlag::Incomplete {
                    return Ok(None);
                }
                let payload = self.control_reassembly.split().freeze();
                let gid = header.gid_or_cid;
                let oid = header.oid;
                self.control_header = None;
                Ok(Some(match header.mt {
                    MessageType::Response => SarEvent::Response { gid, oid, payload },
                    _ => SarEvent::Notification { gid, oid, payload },
                }))
            }
            MessageType::Command => Err(CodecError::InvalidField("unexpected inbound Command")),
        }
    }

    pub fn max_logical_connections(&self) -> u8 {
        self.max_logical_connections
    }

    /// Number of fragments currently parked for `cid` awaiting credits.
    pub fn queued_len(&self, cid: u8) -> usize {
        self.connections.get(&cid).map_or(0, |c| c.queue.len())
    }
}

impl Default for Sar {
    fn default() -> Sar {
        Sar::new()
    }
}

/// True if `next` is a legitimate continuation fragment of the reassembly
/// `first` started: same message type and same GID/CID and OID. `pbf` and
/// `payload_length` are expected to vary fragment-to-fragment and are not
/// compared.
fn headers_match(first: &PacketHeader, next: &PacketHeader) -> bool {
    first.mt == next.mt && first.gid_or_cid == next.gid_or_cid && first.oid == next.oid
}

fn encode_fragments(
    mt: MessageType,
    gid: u8,
    oid: u8,
    payload: &[u8],
    max_size: u8,
) -> Vec<Bytes> {
    let chunk_size = (max_size.max(1)) as usize;
    if payload.is_empty() {
        let mut buf = BytesMut::with_capacity(3);
        PacketHeader {
            mt,
            pbf: PacketBoundaryFlag::CompleteOrFinal,
            gid_or_cid: gid,
            oid,
            payload_length: 0,
        }
        .write(&mut buf);
        return vec![buf.freeze()];
    }
    let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    let n = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let pbf = if i + 1 == n { PacketBoundaryFlag::CompleteOrFinal } else { PacketBoundaryFlag::Incomplete };
            let mut buf = BytesMut::with_capacity(3 + chunk.len());
            PacketHeader { mt, pbf, gid_or_cid: gid, oid, payload_length: chunk.len() as u8 }
                .write(&mut buf);
            buf.extend_from_slice(chunk);
            buf.freeze()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{core_oid, gid};

    #[test]
    fn reassembles_single_fragment_response() {
        let mut sar = Sar::new();
        let frame = encode_fragments(MessageType::Response, gid::CORE, core_oid::RESET, &[0x00], 255);
        let event = sar.on_hal_read(&frame[0]).unwrap().unwrap();
        assert_eq!(event, SarEvent::Response { gid: gid::CORE, oid: core_oid::RESET, payload: Bytes::from_static(&[0x00]) });
    }

    #[test]
    fn reassembles_multi_fragment_data() {
        let mut sar = Sar::new();
        sar.set_initial_credits(STATIC_RF_CONN_ID, 10, 2);
        let payload = Bytes::from_static(&[1, 2, 3, 4, 5]);
        let (_id, frames) = sar.send_data(STATIC_RF_CONN_ID, payload.clone()).unwrap();
        assert_eq!(frames.len(), 3); // chunk_size 2 -> [1,2] [3,4] [5]
        let mut last = None;
        for f in &frames {
            last = sar.on_hal_read(f).unwrap();
        }
        // frames were produced by us (outbound), this just exercises decoding shape
        assert!(last.is_none() || matches!(last, Some(SarEvent::Data { .. })));
    }

    #[test]
    fn credits_gate_sends_and_replenish() {
        let mut sar = Sar::new();
        sar.set_initial_credits(STATIC_RF_CONN_ID, 0, 255);
        let (id, frames) = sar.send_data(STATIC_RF_CONN_ID, Bytes::from_static(&[9])).unwrap();
        assert!(frames.is_empty());
        let ready = sar.add_credits(STATIC_RF_CONN_ID, 1);
        assert_eq!(ready.len(), 1);
        sar.cancel(id); // no-op, already drained
    }

    fn raw_fragment(mt: MessageType, pbf: PacketBoundaryFlag, gid_or_cid: u8, oid: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + payload.len());
        PacketHeader { mt, pbf, gid_or_cid, oid, payload_length: payload.len() as u8 }.write(&mut buf);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    #[test]
    fn control_reassembly_rejects_mismatched_continuation_header() {
        let mut sar = Sar::new();
        let first = raw_fragment(
            MessageType::Notification,
            PacketBoundaryFlag::Incomplete,
            gid::CORE,
            core_oid::CONN_CREDITS,
            &[0xaa],
        );
        assert_eq!(sar.on_hal_read(&first).unwrap(), None);

        // A Response fragment (different MT) arrives mid-reassembly instead
        // of the expected Notification continuation.
        let second = raw_fragment(
            MessageType::Response,
            PacketBoundaryFlag::CompleteOrFinal,
            gid::CORE,
            core_oid::CONN_CREDITS,
            &[0xbb],
        );
        assert!(matches!(sar.on_hal_read(&second), Err(CodecError::InvalidField(_))));

        // The partial buffer must have been discarded, not merged into the
        // next legitimate reassembly.
        let restart = raw_fragment(
            MessageType::Notification,
            PacketBoundaryFlag::CompleteOrFinal,
            gid::CORE,
            core_oid::CONN_CREDITS,
            &[0xcc],
        );
        let event = sar.on_hal_read(&restart).unwrap().unwrap();
        assert_eq!(
            event,
            SarEvent::Notification { gid: gid::CORE, oid: core_oid::CONN_CREDITS, payload: Bytes::from_static(&[0xcc]) }
        );
    }

    #[test]
    fn data_reassembly_rejects_mismatched_continuation_header() {
        let mut sar = Sar::new();
        let cid = STATIC_RF_CONN_ID;
        let first = raw_fragment(MessageType::Data, PacketBoundaryFlag::Incomplete, cid, 0x00, &[0x01]);
        assert_eq!(sar.on_hal_read(&first).unwrap(), None);

        // Continuation claims a different (reserved) oid for the same cid.
        let second = raw_fragment(MessageType::Data, PacketBoundaryFlag::CompleteOrFinal, cid, 0x01, &[0x02]);
        assert!(matches!(sar.on_hal_read(&second), Err(CodecError::InvalidField(_))));
    }
}
