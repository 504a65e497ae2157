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

//! The state machine and transition engine: owns `current_state`/`next_state`,
//! the active transition (if any), the in-flight command, and the [`Sar`].
//! Runs as a single `tokio` task; [`CoreHandle`] is the cheaply-cloneable
//! front door that round-trips requests to it, mirroring the
//! request-channel/dispatch-task split the teacher's `nci.rs` uses between
//! `CommandSender` and its `dispatch` loop.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};

use crate::capabilities::NfccCapabilities;
use crate::codec::gid as group;
use crate::codec::{
    core_oid, parse_conn_credits_ntf, parse_rf_deactivate_ntf, rf_oid, status, CoreInitRsp,
    CoreResetRsp, DeactivateType, NciVersion, RfIntfActivatedNtf,
};
use crate::config::CoreConfig;
use crate::events::{EventBus, SubId};
use crate::hal::HalIo;
use crate::sar::{Sar, SarEvent, STATIC_RF_CONN_ID};
use crate::state::State;
use crate::transition::TransitionId;

/// Bootstrap `CORE_GET_CONFIG_CMD` probe tags. A non-OK response is tolerated
/// rather than fatal; see DESIGN.md for why this departs from stricter
/// treatment of every other bootstrap step.
const GET_CONFIG_PROBE_TAGS: [u8; 4] = [0x21, 0x32, 0x50, 0x00];

mod protocol {
    pub const T1T: u8 = 0x01;
    pub const T2T: u8 = 0x02;
    pub const T3T: u8 = 0x03;
    pub const ISO_DEP: u8 = 0x04;
    pub const NFC_DEP: u8 = 0x05;
}

mod rf_interface {
    pub const FRAME: u8 = 0x01;
    pub const ISO_DEP: u8 = 0x02;
    pub const NFC_DEP: u8 = 0x03;
}

mod mode {
    pub const PASSIVE_POLL_A: u8 = 0x00;
    pub const PASSIVE_POLL_B: u8 = 0x01;
    pub const PASSIVE_POLL_F: u8 = 0x02;
    pub const PASSIVE_POLL_15693: u8 = 0x06;
}

mod routing_entry {
    pub const TYPE_TECHNOLOGY: u8 = 0x00;
    pub const TYPE_PROTOCOL: u8 = 0x01;
    pub const NFCEE_ID_DH: u8 = 0x00;
    pub const POWER_ON: u8 = 0x01;
}

mod technology {
    pub const A: u8 = 0x00;
    pub const B: u8 = 0x01;
    pub const F: u8 = 0x02;
    pub const NFC_15693: u8 = 0x03;
}

mod deactivate_type {
    pub const IDLE: u8 = 0x00;
    pub const DISCOVERY: u8 = 0x03;
}

const DISCOVER_MAP_ENTRIES: [(u8, u8, u8); 5] = [
    (protocol::T1T, 0x01, rf_interface::FRAME),
    (protocol::T2T, 0x01, rf_interface::FRAME),
    (protocol::T3T, 0x01, rf_interface::FRAME),
    (protocol::ISO_DEP, 0x01, rf_interface::ISO_DEP),
    (protocol::NFC_DEP, 0x01, rf_interface::NFC_DEP),
];

const DISCOVER_ENTRIES: [(u8, u8); 4] = [
    (mode::PASSIVE_POLL_A, 1),
    (mode::PASSIVE_POLL_B, 1),
    (mode::PASSIVE_POLL_F, 1),
    (mode::PASSIVE_POLL_15693, 1),
];

fn protocol_routing_cmd() -> Vec<u8> {
    let mut buf = vec![0x00, 0x05];
    for p in [protocol::T1T, protocol::T2T, protocol::T3T, protocol::ISO_DEP, protocol::NFC_DEP] {
        buf.extend_from_slice(&[
            routing_entry::TYPE_PROTOCOL,
            3,
            routing_entry::NFCEE_ID_DH,
            routing_entry::POWER_ON,
            p,
        ]);
    }
    buf
}

fn technology_routing_cmd() -> Vec<u8> {
    let mut buf = vec![0x00, 0x04];
    for t in [technology::A, technology::B, technology::F, technology::NFC_15693] {
        buf.extend_from_slice(&[
            routing_entry::TYPE_TECHNOLOGY,
            3,
            routing_entry::NFCEE_ID_DH,
            routing_entry::POWER_ON,
            t,
        ]);
    }
    buf
}

fn discover_map_cmd() -> Vec<u8> {
    let mut buf = vec![DISCOVER_MAP_ENTRIES.len() as u8];
    for (p, m, intf) in DISCOVER_MAP_ENTRIES {
        buf.extend_from_slice(&[p, m, intf]);
    }
    buf
}

fn discover_cmd() -> Vec<u8> {
    let mut buf = vec![DISCOVER_ENTRIES.len() as u8];
    for (m, freq) in DISCOVER_ENTRIES {
        buf.extend_from_slice(&[m, freq]);
    }
    buf
}

/// Outcome of parsing an `RF_DEACTIVATE_NTF` payload.
enum DeactivateOutcome {
    Known(State),
    Unknown,
    Malformed,
}

fn parse_rf_deactivate(payload: &[u8]) -> DeactivateOutcome {
    match parse_rf_deactivate_ntf(payload) {
        Ok((DeactivateType::Idle, _)) => DeactivateOutcome::Known(State::RfstIdle),
        Ok((DeactivateType::Discovery, _)) => DeactivateOutcome::Known(State::RfstDiscovery),
        Ok(_) => DeactivateOutcome::Unknown,
        Err(_) => DeactivateOutcome::Malformed,
    }
}

// ---------------------------------------------------------------------
// Transition step bookkeeping
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToIdleStep {
    AwaitResetRsp,
    AwaitResetNtfV2,
    AwaitInitRspV1,
    AwaitInitRspV2,
    AwaitGetConfigRsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleToDiscoveryStep {
    AwaitProtocolRoutingRsp,
    AwaitTechnologyRoutingRsp,
    AwaitDiscoverMapRsp,
    AwaitDiscoverRsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollToDiscoveryStep {
    AwaitDeactivateDiscoveryRsp,
    AwaitFallbackIdleRsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ToIdle(ToIdleStep),
    IdleToDiscovery(IdleToDiscoveryStep),
    DiscoveryToIdle,
    PollToIdle,
    PollToDiscovery(PollToDiscoveryStep),
}

struct ActiveTransition {
    id: TransitionId,
    step: Step,
}

struct PendingCommand {
    gid: u8,
    oid: u8,
}

/// What the dispatch loop should do to the single command-timeout timer
/// after the branch that just ran returns. Keeping this as a flag instead of
/// threading the pinned `Sleep` through every handler keeps the transition
/// code free of lifetime noise; only `Engine::run` ever touches the timer
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    None,
    Arm,
    Disarm,
}

// ---------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------

/// Construction entry point: spawns the owning task and returns a handle.
pub struct Core;

impl Core {
    /// Start the engine on a `tokio` task. `hal_rx` carries raw fragments the
    /// platform HAL has read off the wire; `hal` is the corresponding write
    /// side. The returned handle may be cloned freely; the task runs until
    /// every clone (and the original) is dropped.
    pub fn new(
        hal: impl HalIo,
        hal_rx: mpsc::UnboundedReceiver<Bytes>,
        config: CoreConfig,
    ) -> CoreHandle {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(hal, hal_rx, req_rx, config);
        tokio::spawn(engine.run());
        CoreHandle { req_tx }
    }
}

type StateHandlerFn = Box<dyn FnMut(State) + Send + 'static>;
type IntfActivatedHandlerFn = Box<dyn FnMut(&RfIntfActivatedNtf) + Send + 'static>;
type DataPacketHandlerFn = Box<dyn FnMut(u8, &Bytes) + Send + 'static>;

enum Request {
    Restart(oneshot::Sender<()>),
    SetState(State, oneshot::Sender<bool>),
    Stall(bool, oneshot::Sender<()>),
    SendData(u8, Bytes, oneshot::Sender<Option<u64>>),
    Cancel(u64, oneshot::Sender<()>),
    SubscribeCurrentStateChanged(StateHandlerFn, oneshot::Sender<SubId>),
    SubscribeNextStateChanged(StateHandlerFn, oneshot::Sender<SubId>),
    SubscribeIntfActivated(IntfActivatedHandlerFn, oneshot::Sender<SubId>),
    SubscribeDataPacket(DataPacketHandlerFn, oneshot::Sender<SubId>),
    Unsubscribe(SubId, oneshot::Sender<()>),
}

/// Cheaply-`Clone`-able front end to the engine task. There is no explicit
/// `free`: dropping every clone closes the request channel, which ends the
/// task on its next loop iteration.
#[derive(Clone)]
pub struct CoreHandle {
    req_tx: mpsc::UnboundedSender<Request>,
}

impl CoreHandle {
    async fn call<T: Default>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> T {
        let (tx, rx) = oneshot::channel();
        if self.req_tx.send(make(tx)).is_err() {
            return T::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancel everything, reset the SAR, and restart the bootstrap sequence.
    pub async fn restart(&self) {
        self.call(Request::Restart).await
    }

    /// Request a move to `target`. Returns `false` only if no path exists
    /// from the current position (including: engine is stalled in `ERROR`
    /// or `STOP` and has not been `restart()`-ed).
    pub async fn set_state(&self, target: State) -> bool {
        self.call(|tx| Request::SetState(target, tx)).await
    }

    /// Force termination into `ERROR` (if `error`) or `STOP`.
    pub async fn stall(&self, error: bool) {
        self.call(|tx| Request::Stall(error, tx)).await
    }

    /// Queue a data send on `cid`. Returns `None` if `cid` is unknown or its
    /// outbound queue is already at `CoreConfig::max_queued_per_cid`.
    pub async fn send_data(&self, cid: u8, payload: Bytes) -> Option<u64> {
        self.call(|tx| Request::SendData(cid, payload, tx)).await
    }

    /// Best-effort cancel of a previously queued send.
    pub async fn cancel(&self, send_id: u64) {
        self.call(|tx| Request::Cancel(send_id, tx)).await
    }

    pub async fn subscribe_current_state_changed(
        &self,
        f: impl FnMut(State) + Send + 'static,
    ) -> SubId {
        self.call(|tx| Request::SubscribeCurrentStateChanged(Box::new(f), tx)).await
    }

    pub async fn subscribe_next_state_changed(
        &self,
        f: impl FnMut(State) + Send + 'static,
    ) -> SubId {
        self.call(|tx| Request::SubscribeNextStateChanged(Box::new(f), tx)).await
    }

    pub async fn subscribe_intf_activated(
        &self,
        f: impl FnMut(&RfIntfActivatedNtf) + Send + 'static,
    ) -> SubId {
        self.call(|tx| Request::SubscribeIntfActivated(Box::new(f), tx)).await
    }

    pub async fn subscribe_data_packet(
        &self,
        f: impl FnMut(u8, &Bytes) + Send + 'static,
    ) -> SubId {
        self.call(|tx| Request::SubscribeDataPacket(Box::new(f), tx)).await
    }

    pub async fn unsubscribe(&self, id: SubId) {
        self.call(|tx| Request::Unsubscribe(id, tx)).await
    }
}

// ---------------------------------------------------------------------
// Engine (the owning task)
// ---------------------------------------------------------------------

struct Engine<H> {
    hal: H,
    hal_rx: mpsc::UnboundedReceiver<Bytes>,
    req_rx: mpsc::UnboundedReceiver<Request>,
    sar: Sar,
    events: EventBus,
    config: CoreConfig,
    current_state: State,
    next_state: State,
    last_state: Option<State>,
    active: Option<ActiveTransition>,
    pending_transitions: VecDeque<TransitionId>,
    pending_cmd: Option<PendingCommand>,
    capabilities: NfccCapabilities,
    timer_action: TimerAction,
}

impl<H: HalIo> Engine<H> {
    fn new(
        hal: H,
        hal_rx: mpsc::UnboundedReceiver<Bytes>,
        req_rx: mpsc::UnboundedReceiver<Request>,
        config: CoreConfig,
    ) -> Engine<H> {
        Engine {
            hal,
            hal_rx,
            req_rx,
            sar: Sar::new(),
            events: EventBus::new(),
            config,
            current_state: State::Init,
            next_state: State::Init,
            last_state: None,
            active: None,
            pending_transitions: VecDeque::new(),
            pending_cmd: None,
            capabilities: NfccCapabilities::default(),
            timer_action: TimerAction::None,
        }
    }

    async fn run(mut self) {
        self.start_transition(TransitionId::ToIdle).await;

        let timeout = sleep(Duration::MAX);
        let max_deadline = timeout.deadline();
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                req = self.req_rx.recv() => {
                    match req {
                        Some(req) => self.handle_request(req).await,
                        None => break,
                    }
                }
                bytes = self.hal_rx.recv() => {
                    match bytes {
                        Some(bytes) => self.handle_hal_read(&bytes).await,
                        None => {
                            error!("HAL inbound channel closed");
                            self.stall(true).await;
                        }
                    }
                }
                () = &mut timeout => {
                    warn!(
                        "command timed out (expected {:?})",
                        self.pending_cmd.as_ref().map(|c| (c.gid, c.oid))
                    );
                    self.timer_action = TimerAction::Disarm;
                    self.stall(true).await;
                }
            }

            match self.timer_action {
                TimerAction::Arm => {
                    if !self.config.cmd_timeout.is_zero() {
                        timeout.as_mut().reset(Instant::now() + self.config.cmd_timeout);
                    }
                }
                TimerAction::Disarm => timeout.as_mut().reset(max_deadline),
                TimerAction::None => {}
            }
            self.timer_action = TimerAction::None;
        }
        debug!("core dispatch task terminated");
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Restart(reply) => {
                self.restart().await;
                let _ = reply.send(());
            }
            Request::SetState(target, reply) => {
                let ok = self.set_state(target).await;
                let _ = reply.send(ok);
            }
            Request::Stall(error, reply) => {
                self.stall(error).await;
                let _ = reply.send(());
            }
            Request::SendData(cid, payload, reply) => {
                if self.sar.queued_len(cid) >= self.config.max_queued_per_cid {
                    warn!("send queue full for cid {}", cid);
                    let _ = reply.send(None);
                } else if let Some((send_id, ready)) = self.sar.send_data(cid, payload) {
                    for frame in ready {
                        self.write(frame).await;
                    }
                    let _ = reply.send(Some(send_id));
                } else {
                    let _ = reply.send(None);
                }
            }
            Request::Cancel(send_id, reply) => {
                self.sar.cancel(send_id);
                let _ = reply.send(());
            }
            Request::SubscribeCurrentStateChanged(f, reply) => {
                let _ = reply.send(self.events.subscribe_current_state_changed(f));
            }
            Request::SubscribeNextStateChanged(f, reply) => {
                let _ = reply.send(self.events.subscribe_next_state_changed(f));
            }
            Request::SubscribeIntfActivated(f, reply) => {
                let _ = reply.send(self.events.subscribe_intf_activated(f));
            }
            Request::SubscribeDataPacket(f, reply) => {
                let _ = reply.send(self.events.subscribe_data_packet(f));
            }
            Request::Unsubscribe(id, reply) => {
                self.events.unsubscribe(id);
                let _ = reply.send(());
            }
        }
    }

    async fn handle_hal_read(&mut self, fragment: &[u8]) {
        match self.sar.on_hal_read(fragment) {
            Ok(Some(SarEvent::Response { gid, oid, payload })) => {
                self.handle_response(gid, oid, &payload).await;
            }
            Ok(Some(SarEvent::Notification { gid, oid, payload })) => {
                self.handle_notification(gid, oid, &payload).await;
            }
            Ok(Some(SarEvent::Data { cid, payload })) => {
                self.events.emit_data_packet(cid, &payload);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("SAR reassembly failure: {}", e);
                self.stall(true).await;
            }
        }
    }

    fn flush_signals(&mut self) {
        self.events.flush_pending(self.current_state, self.next_state);
    }

    // -- command plumbing -------------------------------------------------

    async fn write(&mut self, bytes: Bytes) -> bool {
        match self.hal.write(bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("HAL write failed: {}", e);
                false
            }
        }
    }

    fn cancel_command(&mut self) {
        self.pending_cmd = None;
    }

    /// Send a command and arm the response timeout. On a HAL write failure
    /// this stalls the engine itself (every command is fatal-on-write-error),
    /// matching how the original treats a failed SAR hand-off.
    async fn send_command(&mut self, gid: u8, oid: u8, payload: &[u8]) -> bool {
        self.cancel_command();
        let frames = self.sar.encode_command(gid, oid, payload);
        for frame in frames {
            if !self.write(frame).await {
                warn!("HAL write failed sending 0x{:02x}/0x{:02x}", gid, oid);
                self.stall(true).await;
                return false;
            }
        }
        self.pending_cmd = Some(PendingCommand { gid, oid });
        self.timer_action = TimerAction::Arm;
        true
    }

    // -- state/transition bookkeeping -------------------------------------

    fn set_current_state(&mut self, state: State) {
        if self.current_state != state {
            debug!("current state {} -> {}", self.current_state.name(), state.name());
            self.current_state = state;
            self.events.queue_current_state_changed();
        }
    }

    fn set_next_state(&mut self, state: State) {
        if self.next_state != state {
            debug!("next state {} -> {}", self.next_state.name(), state.name());
            self.next_state = state;
            self.events.queue_next_state_changed();
        }
    }

    /// Enter `destination` directly, bypassing the transition queue (used
    /// when a notification settles the state while no transition, or a
    /// redirected one, is driving it).
    fn enter_state(&mut self, destination: State) {
        self.last_state = Some(destination);
        self.set_next_state(destination);
        self.set_current_state(destination);
    }

    async fn start_transition(&mut self, id: TransitionId) {
        self.set_next_state(id.destination());
        self.run_transition_start(id).await;
        self.flush_signals();
    }

    /// Finish the active transition: enter `destination`, then either start
    /// the next queued transition or clear the active pointer.
    async fn finish_transition(&mut self, destination: State) {
        debug_assert!(self.pending_cmd.is_none());
        self.enter_state(destination);
        if let Some(next) = self.pending_transitions.pop_front() {
            self.start_transition(next).await;
        } else {
            self.active = None;
            self.flush_signals();
        }
    }

    async fn restart(&mut self) {
        self.sar.reset();
        self.cancel_command();
        self.timer_action = TimerAction::Disarm;
        self.active = None;
        self.pending_transitions.clear();
        self.last_state = None;
        self.set_current_state(State::Init);
        self.start_transition(TransitionId::ToIdle).await;
    }

    async fn stall(&mut self, error: bool) {
        let terminal = if error { State::Error } else { State::Stop };
        self.last_state = None;
        self.active = None;
        self.pending_transitions.clear();
        self.cancel_command();
        self.timer_action = TimerAction::Disarm;
        self.set_current_state(terminal);
        self.set_next_state(terminal);
        self.flush_signals();
    }

    /// Mirrors the original `nci_core_set_state` composition rules: extend
    /// the active transition, or the settled state, toward `target`.
    async fn set_state(&mut self, target: State) -> bool {
        if self.next_state == target {
            return true;
        }
        if let Some(active) = &self.active {
            let dest = active.id.destination();
            if dest == target {
                return true;
            }
            return match dest.transition_path(target) {
                Some(path) => {
                    self.pending_transitions.extend(path);
                    true
                }
                None => false,
            };
        }
        if let Some(last) = self.last_state {
            return match last.transition_path(target) {
                Some(mut path) if !path.is_empty() => {
                    let first = path.remove(0);
                    self.pending_transitions.extend(path);
                    self.start_transition(first).await;
                    true
                }
                Some(_) => true,
                None => false,
            };
        }
        // No active transition and never settled anywhere: either freshly
        // stalled (terminal; only `restart()` recovers from this) or the
        // instant before the bootstrap transition starts, which `run()`
        // always begins before any request can be processed.
        false
    }

    async fn run_transition_start(&mut self, id: TransitionId) {
        match id {
            TransitionId::ToIdle => {
                self.active = Some(ActiveTransition { id, step: Step::ToIdle(ToIdleStep::AwaitResetRsp) });
                self.send_command(group::CORE, core_oid::RESET, &[0x00]).await;
            }
            TransitionId::IdleToDiscovery => self.start_idle_to_discovery().await,
            TransitionId::DiscoveryToIdle => {
                self.active = Some(ActiveTransition { id, step: Step::DiscoveryToIdle });
                self.send_command(group::RF, rf_oid::DEACTIVATE, &[deactivate_type::IDLE]).await;
            }
            TransitionId::PollToIdle => {
                self.active = Some(ActiveTransition { id, step: Step::PollToIdle });
                self.send_command(group::RF, rf_oid::DEACTIVATE, &[deactivate_type::IDLE]).await;
            }
            TransitionId::PollToDiscovery => {
                self.active = Some(ActiveTransition {
                    id,
                    step: Step::PollToDiscovery(PollToDiscoveryStep::AwaitDeactivateDiscoveryRsp),
                });
                self.send_command(group::RF, rf_oid::DEACTIVATE, &[deactivate_type::DISCOVERY]).await;
            }
        }
    }

    async fn start_idle_to_discovery(&mut self) {
        match self.capabilities.version {
            NciVersion::V1 => self.start_discover_map().await,
            NciVersion::V2 => {
                if self.capabilities.supports_protocol_routing() {
                    self.active = Some(ActiveTransition {
                        id: TransitionId::IdleToDiscovery,
                        step: Step::IdleToDiscovery(IdleToDiscoveryStep::AwaitProtocolRoutingRsp),
                    });
                    self.send_command(
                        group::RF,
                        rf_oid::SET_LISTEN_MODE_ROUTING,
                        &protocol_routing_cmd(),
                    )
                    .await;
                } else if self.capabilities.supports_technology_routing() {
                    self.active = Some(ActiveTransition {
                        id: TransitionId::IdleToDiscovery,
                        step: Step::IdleToDiscovery(IdleToDiscoveryStep::AwaitTechnologyRoutingRsp),
                    });
                    self.send_command(
                        group::RF,
                        rf_oid::SET_LISTEN_MODE_ROUTING,
                        &technology_routing_cmd(),
                    )
                    .await;
                } else {
                    self.start_discover_map().await;
                }
            }
        }
    }

    async fn start_discover_map(&mut self) {
        self.active = Some(ActiveTransition {
            id: TransitionId::IdleToDiscovery,
            step: Step::IdleToDiscovery(IdleToDiscoveryStep::AwaitDiscoverMapRsp),
        });
        self.send_command(group::RF, rf_oid::DISCOVER_MAP, &discover_map_cmd()).await;
    }

    // -- notification routing ---------------------------------------------

    async fn handle_notification(&mut self, gid: u8, oid: u8, payload: &[u8]) {
        if let Some((id, step)) = self.active.as_ref().map(|a| (a.id, a.step)) {
            self.handle_transition_notification(id, step, gid, oid, payload).await;
        } else if let Some(state) = self.last_state {
            self.handle_state_notification(state, gid, oid, payload).await;
        } else {
            debug!("unhandled notification 0x{:02x}/0x{:02x} (no state established)", gid, oid);
        }
        self.flush_signals();
    }

    async fn handle_common_ntf(&mut self, gid: u8, oid: u8, payload: &[u8]) -> bool {
        if gid == group::CORE && oid == core_oid::CONN_CREDITS {
            self.conn_credits_ntf(payload).await;
            true
        } else if gid == group::CORE && oid == core_oid::GENERIC_ERROR {
            if payload.len() == 1 {
                warn!("CORE_GENERIC_ERROR_NTF 0x{:02x}", payload[0]);
            } else {
                warn!("failed to parse CORE_GENERIC_ERROR_NTF");
            }
            true
        } else {
            false
        }
    }

    async fn conn_credits_ntf(&mut self, payload: &[u8]) {
        match parse_conn_credits_ntf(payload) {
            Ok(entries) => {
                for entry in entries {
                    let ready = self.sar.add_credits(entry.cid, entry.credits);
                    for frame in ready {
                        self.write(frame).await;
                    }
                }
            }
            Err(_) => warn!("failed to parse CORE_CONN_CREDITS_NTF"),
        }
    }

    /// Per-state notification handler, reached only when no transition is
    /// running: state changes observed here are never chained onward.
    async fn handle_state_notification(&mut self, state: State, gid: u8, oid: u8, payload: &[u8]) {
        match state {
            State::RfstDiscovery => {
                if gid == group::RF && oid == rf_oid::INTF_ACTIVATED {
                    self.state_discovery_intf_activated_ntf(payload).await;
                    return;
                }
                if gid == group::RF && oid == rf_oid::DEACTIVATE {
                    self.state_rf_deactivate_ntf(payload).await;
                    return;
                }
            }
            State::RfstIdle => {
                if gid == group::RF && oid == rf_oid::DEACTIVATE {
                    self.state_rf_deactivate_ntf(payload).await;
                    return;
                }
            }
            _ => {}
        }
        if self.handle_common_ntf(gid, oid, payload).await {
            return;
        }
        debug!("notification 0x{:02x}/0x{:02x} is ignored in {} state", gid, oid, state.name());
    }

    async fn state_rf_deactivate_ntf(&mut self, payload: &[u8]) {
        match parse_rf_deactivate(payload) {
            DeactivateOutcome::Known(dest) => self.enter_state(dest),
            DeactivateOutcome::Unknown => {}
            DeactivateOutcome::Malformed => {
                debug!("failed to parse RF_DEACTIVATE_NTF");
                self.stall(true).await;
            }
        }
    }

    async fn state_discovery_intf_activated_ntf(&mut self, payload: &[u8]) {
        match RfIntfActivatedNtf::parse(payload) {
            Ok(ntf) => {
                self.sar.set_initial_credits(
                    STATIC_RF_CONN_ID,
                    ntf.initial_credits,
                    ntf.max_data_packet_size,
                );
                self.enter_state(State::RfstPollActive);
                self.flush_signals();
                self.events.emit_intf_activated(&ntf);
            }
            Err(e) => {
                debug!("failed to parse RF_INTF_ACTIVATED_NTF: {}", e);
                self.enter_state(State::RfstPollActive);
                self.flush_signals();
                self.set_state(State::RfstDiscovery).await;
            }
        }
    }

    async fn handle_rf_deactivate_ntf_for_transition(&mut self, payload: &[u8]) {
        match parse_rf_deactivate(payload) {
            DeactivateOutcome::Known(dest) => self.finish_transition(dest).await,
            DeactivateOutcome::Unknown => {}
            DeactivateOutcome::Malformed => {
                debug!("failed to parse RF_DEACTIVATE_NTF");
                self.stall(true).await;
            }
        }
    }

    async fn handle_transition_notification(
        &mut self,
        id: TransitionId,
        step: Step,
        gid: u8,
        oid: u8,
        payload: &[u8],
    ) {
        let is_deactivate_ntf = gid == group::RF && oid == rf_oid::DEACTIVATE;
        let is_reset_ntf = gid == group::CORE && oid == core_oid::RESET;

        match (id, step) {
            (TransitionId::ToIdle, Step::ToIdle(ToIdleStep::AwaitResetNtfV2)) if is_reset_ntf => {
                debug!("CORE_RESET_NTF received, sending CORE_INIT_CMD (v2)");
                self.active =
                    Some(ActiveTransition { id, step: Step::ToIdle(ToIdleStep::AwaitInitRspV2) });
                self.send_command(group::CORE, core_oid::INIT, &[0x00, 0x00]).await;
                return;
            }
            (TransitionId::PollToIdle, Step::PollToIdle) if is_deactivate_ntf => {
                self.handle_rf_deactivate_ntf_for_transition(payload).await;
                return;
            }
            (
                TransitionId::PollToDiscovery,
                Step::PollToDiscovery(PollToDiscoveryStep::AwaitDeactivateDiscoveryRsp),
            ) if is_deactivate_ntf => {
                self.handle_rf_deactivate_ntf_for_transition(payload).await;
                return;
            }
            _ => {}
        }
        if self.handle_common_ntf(gid, oid, payload).await {
            return;
        }
        debug!("notification 0x{:02x}/0x{:02x} is ignored in transition ({})", gid, oid, id.name());
    }

    // -- response routing --------------------------------------------------

    async fn handle_response(&mut self, gid: u8, oid: u8, payload: &[u8]) {
        let Some(pending) = self.pending_cmd.take() else {
            warn!("unexpected response 0x{:02x}/0x{:02x}", gid, oid);
            return;
        };
        if pending.gid != gid || pending.oid != oid {
            warn!(
                "response mismatch: got 0x{:02x}/0x{:02x}, expected 0x{:02x}/0x{:02x}",
                gid, oid, pending.gid, pending.oid
            );
            self.pending_cmd = Some(pending);
            return;
        }
        self.timer_action = TimerAction::Disarm;

        let Some(active) = self.active.take() else {
            warn!("response 0x{:02x}/0x{:02x} with no active transition", gid, oid);
            return;
        };
        self.advance_transition(active, payload).await;
    }

    async fn advance_transition(&mut self, active: ActiveTransition, payload: &[u8]) {
        match active.step {
            Step::ToIdle(step) => self.advance_to_idle(step, payload).await,
            Step::IdleToDiscovery(step) => self.advance_idle_to_discovery(step, payload).await,
            Step::DiscoveryToIdle => self.advance_discovery_to_idle(payload).await,
            Step::PollToIdle => {
                if payload.len() == 1 && payload[0] == status::OK {
                    debug!("RF_DEACTIVATE_RSP ok, awaiting RF_DEACTIVATE_NTF");
                    self.active = Some(active);
                } else {
                    warn!("RF_DEACTIVATE_CMD failed");
                    self.stall(true).await;
                }
            }
            Step::PollToDiscovery(step) => self.advance_poll_to_discovery(step, payload).await,
        }
    }

    // -- ToIdle -------------------------------------------------------------

    async fn advance_to_idle(&mut self, step: ToIdleStep, payload: &[u8]) {
        match step {
            ToIdleStep::AwaitResetRsp => match CoreResetRsp::parse(payload) {
                Ok(rsp) if rsp.status() == status::OK => {
                    self.capabilities.version = rsp.version();
                    match rsp.version() {
                        NciVersion::V1 => {
                            debug!("CORE_RESET_RSP (v1) ok");
                            self.active = Some(ActiveTransition {
                                id: TransitionId::ToIdle,
                                step: Step::ToIdle(ToIdleStep::AwaitInitRspV1),
                            });
                            self.send_command(group::CORE, core_oid::INIT, &[]).await;
                        }
                        NciVersion::V2 => {
                            debug!("CORE_RESET_RSP (v2) ok, awaiting CORE_RESET_NTF");
                            self.active = Some(ActiveTransition {
                                id: TransitionId::ToIdle,
                                step: Step::ToIdle(ToIdleStep::AwaitResetNtfV2),
                            });
                        }
                    }
                }
                Ok(_) => {
                    warn!("CORE_RESET_CMD failed");
                    self.stall(true).await;
                }
                Err(e) => {
                    warn!("unexpected CORE_RESET_RSP: {}", e);
                    self.stall(true).await;
                }
            },
            ToIdleStep::AwaitInitRspV1 => self.handle_init_rsp(NciVersion::V1, payload).await,
            ToIdleStep::AwaitInitRspV2 => self.handle_init_rsp(NciVersion::V2, payload).await,
            ToIdleStep::AwaitGetConfigRsp => {
                if payload.len() > 1 && payload[0] == status::OK {
                    debug!("CORE_GET_CONFIG_RSP ok");
                } else {
                    warn!("CORE_GET_CONFIG_CMD returned non-OK status, continuing anyway");
                }
                self.finish_transition(State::RfstIdle).await;
            }
            ToIdleStep::AwaitResetNtfV2 => {
                unreachable!("no command is pending while awaiting CORE_RESET_NTF")
            }
        }
    }

    async fn handle_init_rsp(&mut self, version: NciVersion, payload: &[u8]) {
        let parsed = match version {
            NciVersion::V1 => CoreInitRsp::parse_v1(payload),
            NciVersion::V2 => CoreInitRsp::parse_v2(payload),
        };
        match parsed {
            Ok(rsp) if rsp.status == status::OK => {
                debug!("CORE_INIT_RSP ({:?}) ok", version);
                self.capabilities = NfccCapabilities::from_init_rsp(version, &rsp);
                self.sar.set_max_logical_connections(rsp.max_logical_connections);
                self.sar.set_max_control_packet_size(rsp.max_control_packet_payload_size);
                self.active = Some(ActiveTransition {
                    id: TransitionId::ToIdle,
                    step: Step::ToIdle(ToIdleStep::AwaitGetConfigRsp),
                });
                let mut cmd = vec![GET_CONFIG_PROBE_TAGS.len() as u8];
                cmd.extend_from_slice(&GET_CONFIG_PROBE_TAGS);
                self.send_command(group::CORE, core_oid::GET_CONFIG, &cmd).await;
            }
            Ok(_) => {
                warn!("CORE_INIT_CMD ({:?}) failed", version);
                self.stall(true).await;
            }
            Err(e) => {
                warn!("failed to parse CORE_INIT_RSP ({:?}): {}", version, e);
                self.stall(true).await;
            }
        }
    }

    // -- IdleToDiscovery ------------------------------------------------------

    async fn advance_idle_to_discovery(&mut self, step: IdleToDiscoveryStep, payload: &[u8]) {
        let ok = !payload.is_empty() && payload[0] == status::OK;
        match step {
            IdleToDiscoveryStep::AwaitProtocolRoutingRsp => {
                if ok {
                    debug!("RF_SET_LISTEN_MODE_ROUTING_RSP (Protocol) ok");
                    self.start_discover_map().await;
                } else if self.capabilities.supports_technology_routing() {
                    debug!("RF_SET_LISTEN_MODE_ROUTING_CMD (Protocol) failed, trying technology routing");
                    self.active = Some(ActiveTransition {
                        id: TransitionId::IdleToDiscovery,
                        step: Step::IdleToDiscovery(IdleToDiscoveryStep::AwaitTechnologyRoutingRsp),
                    });
                    self.send_command(group::RF, rf_oid::SET_LISTEN_MODE_ROUTING, &technology_routing_cmd())
                        .await;
                } else {
                    debug!("RF_SET_LISTEN_MODE_ROUTING_CMD (Protocol) failed");
                    self.start_discover_map().await;
                }
            }
            IdleToDiscoveryStep::AwaitTechnologyRoutingRsp => {
                if ok {
                    debug!("RF_SET_LISTEN_MODE_ROUTING_RSP (Technology) ok");
                } else {
                    debug!("RF_SET_LISTEN_MODE_ROUTING_CMD (Technology) failed, continuing anyway");
                }
                self.start_discover_map().await;
            }
            IdleToDiscoveryStep::AwaitDiscoverMapRsp => {
                if ok {
                    debug!("RF_DISCOVER_MAP_RSP ok");
                    self.active = Some(ActiveTransition {
                        id: TransitionId::IdleToDiscovery,
                        step: Step::IdleToDiscovery(IdleToDiscoveryStep::AwaitDiscoverRsp),
                    });
                    self.send_command(group::RF, rf_oid::DISCOVER, &discover_cmd()).await;
                } else {
                    warn!("RF_DISCOVER_MAP_CMD failed");
                    self.stall(true).await;
                }
            }
            IdleToDiscoveryStep::AwaitDiscoverRsp => {
                if ok {
                    debug!("RF_DISCOVER_RSP ok");
                    self.finish_transition(State::RfstDiscovery).await;
                } else {
                    warn!("RF_DISCOVER_CMD failed");
                    self.stall(true).await;
                }
            }
        }
    }

    // -- DiscoveryToIdle ------------------------------------------------------

    async fn advance_discovery_to_idle(&mut self, payload: &[u8]) {
        if payload.len() == 1 && payload[0] == status::OK {
            debug!("RF_DEACTIVATE_RSP ok");
            self.finish_transition(State::RfstIdle).await;
        } else {
            warn!("RF_DEACTIVATE_CMD failed");
            self.stall(true).await;
        }
    }

    // -- PollToDiscovery ------------------------------------------------------

    async fn advance_poll_to_discovery(&mut self, step: PollToDiscoveryStep, payload: &[u8]) {
        let ok = payload.len() == 1 && payload[0] == status::OK;
        match step {
            PollToDiscoveryStep::AwaitDeactivateDiscoveryRsp => {
                if ok {
                    debug!("RF_DEACTIVATE_RSP ok, awaiting RF_DEACTIVATE_NTF");
                    self.active = Some(ActiveTransition {
                        id: TransitionId::PollToDiscovery,
                        step: Step::PollToDiscovery(step),
                    });
                } else {
                    warn!("RF_DEACTIVATE_CMD (Discovery) failed, falling back to Idle");
                    self.active = Some(ActiveTransition {
                        id: TransitionId::PollToDiscovery,
                        step: Step::PollToDiscovery(PollToDiscoveryStep::AwaitFallbackIdleRsp),
                    });
                    self.send_command(group::RF, rf_oid::DEACTIVATE, &[deactivate_type::IDLE]).await;
                }
            }
            PollToDiscoveryStep::AwaitFallbackIdleRsp => {
                if ok {
                    debug!("RF_DEACTIVATE_RSP (Idle) ok");
                    self.finish_transition(State::RfstIdle).await;
                } else {
                    warn!("RF_DEACTIVATE_CMD (Idle) failed too");
                    self.stall(true).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ChannelHal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    fn make_core() -> (CoreHandle, mpsc::UnboundedReceiver<Bytes>, mpsc::UnboundedSender<Bytes>) {
        let (out_tx, out_rx) = unbounded_channel();
        let (in_tx, in_rx) = unbounded_channel();
        let handle = Core::new(ChannelHal::new(out_tx), in_rx, CoreConfig::default());
        (handle, out_rx, in_tx)
    }

    #[tokio::test]
    async fn bootstrap_sends_core_reset_cmd_first() {
        let (_handle, mut out_rx, _in_tx) = make_core();
        let frame = out_rx.recv().await.unwrap();
        assert_eq!(&frame[..], &[0x20, 0x00, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn set_state_to_current_target_is_a_no_op_success() {
        let (handle, _out_rx, _in_tx) = make_core();
        assert!(handle.set_state(State::RfstIdle).await);
    }

    #[tokio::test]
    async fn subscribe_current_state_changed_fires_after_bootstrap_completes() {
        let (handle, mut out_rx, in_tx) = make_core();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle
            .subscribe_current_state_changed(move |_s| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        // CORE_RESET_CMD
        out_rx.recv().await.unwrap();
        in_tx.send(Bytes::from_static(&[0x40, 0x00, 0x03, 0x00, 0x10, 0x00])).unwrap();

        // CORE_INIT_CMD (v1, empty payload)
        out_rx.recv().await.unwrap();
        let init_rsp: &[u8] = &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let mut pkt = vec![0x40, 0x01, init_rsp.len() as u8];
        pkt.extend_from_slice(init_rsp);
        in_tx.send(Bytes::from(pkt)).unwrap();

        // CORE_GET_CONFIG_CMD
        out_rx.recv().await.unwrap();
        in_tx.send(Bytes::from_static(&[0x40, 0x03, 0x02, 0x00, 0x00])).unwrap();

        // give the task a chance to process the last response
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
