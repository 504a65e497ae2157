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

//! End-to-end scenario tests: drive a [`nci_core::Core`] through a scripted
//! [`nci_core::ChannelHal`] and check the resulting state transitions, the
//! same way `src/rust/test/main.rs` drives the core against a live HAL
//! connection, except the peer here is a literal byte script instead of
//! rootcanal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use nci_core::{ChannelHal, Core, CoreConfig, CoreHandle, State};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

fn spawn_core() -> (CoreHandle, UnboundedReceiver<Bytes>, UnboundedSender<Bytes>) {
    let (out_tx, out_rx) = unbounded_channel();
    let (in_tx, in_rx) = unbounded_channel();
    let handle = Core::new(ChannelHal::new(out_tx), in_rx, CoreConfig::default());
    (handle, out_rx, in_tx)
}

/// Drive the v1 bootstrap sequence from `SPEC_FULL.md` scenario S1 and
/// assert the three outbound commands it issues, in order.
async fn drive_bootstrap_v1(out_rx: &mut UnboundedReceiver<Bytes>, in_tx: &UnboundedSender<Bytes>) {
    let reset_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&reset_cmd[..], &[0x20, 0x00, 0x01, 0x00]);
    in_tx.send(Bytes::from_static(&[0x40, 0x00, 0x03, 0x00, 0x10, 0x00])).unwrap();

    let init_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&init_cmd[..], &[0x20, 0x01, 0x00]);
    in_tx
        .send(Bytes::from_static(&[
            0x40, 0x01, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x40,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]))
        .unwrap();

    let get_config_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&get_config_cmd[..], &[0x20, 0x03, 0x05, 0x04, 0x21, 0x32, 0x50, 0x00]);
    in_tx.send(Bytes::from_static(&[0x40, 0x03, 0x02, 0x00, 0x00])).unwrap();
}

/// Drive `IDLE -> DISCOVERY` (scenario S2). Version 1 has no listen-mode
/// routing step, so the first outbound command is `RF_DISCOVER_MAP_CMD`.
async fn drive_idle_to_discovery(
    out_rx: &mut UnboundedReceiver<Bytes>,
    in_tx: &UnboundedSender<Bytes>,
) {
    let discover_map_cmd = out_rx.recv().await.unwrap();
    assert_eq!(discover_map_cmd[0], 0x21); // Command | RF
    assert_eq!(discover_map_cmd[1], 0x00); // DISCOVER_MAP
    in_tx.send(Bytes::from_static(&[0x41, 0x00, 0x01, 0x00])).unwrap();

    let discover_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&discover_cmd[..], &[0x21, 0x03, 0x09, 0x04, 0x00, 0x01, 0x01, 0x01, 0x02, 0x01, 0x06, 0x01]);
    in_tx.send(Bytes::from_static(&[0x41, 0x03, 0x01, 0x00])).unwrap();
}

/// `RF_INTF_ACTIVATED_NTF` for an ISO-DEP Type-4A target (scenario S3):
/// mode = PASSIVE_POLL_A, rf_intf = ISO_DEP, ATS T0 = 0x78 (TA/TB/TC
/// present, FSCI = 8) with two historical bytes.
fn s3_intf_activated_ntf() -> Bytes {
    let mode_param = [
        0x04, 0x00, // SENS_RES
        0x04, // nfcid1_len
        0x01, 0x02, 0x03, 0x04, // NFCID1
        0x01, // sel_res_len
        0x20, // SEL_RES
    ];
    let activation_param = [0x06, 0x78, 0x11, 0x22, 0x33, 0xaa, 0xbb];
    let mut payload = vec![
        0x01, // discovery_id
        0x02, // rf_interface = ISO_DEP
        0x04, // protocol = ISO_DEP
        0x00, // mode = PASSIVE_POLL_A
        0xfe, // max_data_packet_size
        0x01, // initial_credits
        mode_param.len() as u8,
    ];
    payload.extend_from_slice(&mode_param);
    payload.push(0x00); // data_exchange_mode
    payload.push(0x01); // transmit_rate
    payload.push(0x01); // receive_rate
    payload.push(activation_param.len() as u8);
    payload.extend_from_slice(&activation_param);

    let mut frame = vec![0x61, 0x05, payload.len() as u8];
    frame.extend_from_slice(&payload);
    Bytes::from(frame)
}

#[tokio::test]
async fn s1_bootstrap_v1_reaches_rfst_idle() {
    let (handle, mut out_rx, in_tx) = spawn_core();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    handle.subscribe_current_state_changed(move |s| seen_clone.lock().unwrap().push(s)).await;

    drive_bootstrap_v1(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().unwrap().last().unwrap(), State::RfstIdle);
}

#[tokio::test]
async fn s2_idle_to_discovery() {
    let (handle, mut out_rx, in_tx) = spawn_core();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    handle.subscribe_current_state_changed(move |s| seen_clone.lock().unwrap().push(s)).await;

    drive_bootstrap_v1(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.set_state(State::RfstDiscovery).await);
    drive_idle_to_discovery(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().unwrap().last().unwrap(), State::RfstDiscovery);
}

#[tokio::test]
async fn s3_activation_of_iso_dep_poll_a_target() {
    let (handle, mut out_rx, in_tx) = spawn_core();
    drive_bootstrap_v1(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.set_state(State::RfstDiscovery).await);
    drive_idle_to_discovery(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let fsc = Arc::new(Mutex::new(0u32));
    let historical_len = Arc::new(AtomicUsize::new(0));
    let (f, fsc_c, hl_c) = (fired.clone(), fsc.clone(), historical_len.clone());
    handle
        .subscribe_intf_activated(move |ntf| {
            f.fetch_add(1, Ordering::SeqCst);
            if let Some(Ok(act)) = ntf.decode_activation_param_iso_dep_poll_a() {
                *fsc_c.lock().unwrap() = act.fsc;
                hl_c.store(act.historical_bytes.len(), Ordering::SeqCst);
            }
        })
        .await;

    in_tx.send(s3_intf_activated_ntf()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*fsc.lock().unwrap(), 256);
    assert_eq!(historical_len.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn s4_poll_active_to_discovery() {
    let (handle, mut out_rx, in_tx) = spawn_core();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    handle.subscribe_current_state_changed(move |s| seen_clone.lock().unwrap().push(s)).await;

    drive_bootstrap_v1(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.set_state(State::RfstDiscovery).await);
    drive_idle_to_discovery(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    in_tx.send(s3_intf_activated_ntf()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.set_state(State::RfstDiscovery).await);
    let deactivate_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&deactivate_cmd[..], &[0x21, 0x06, 0x01, 0x03]);
    in_tx.send(Bytes::from_static(&[0x41, 0x06, 0x01, 0x00])).unwrap();
    in_tx.send(Bytes::from_static(&[0x61, 0x06, 0x02, 0x03, 0x00])).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().unwrap().last().unwrap(), State::RfstDiscovery);
}

#[tokio::test]
async fn s5_deactivate_discovery_fails_falls_back_to_idle() {
    let (handle, mut out_rx, in_tx) = spawn_core();
    drive_bootstrap_v1(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.set_state(State::RfstDiscovery).await);
    drive_idle_to_discovery(&mut out_rx, &in_tx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    in_tx.send(s3_intf_activated_ntf()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.set_state(State::RfstDiscovery).await);
    let deactivate_discovery_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&deactivate_discovery_cmd[..], &[0x21, 0x06, 0x01, 0x03]);
    in_tx.send(Bytes::from_static(&[0x41, 0x06, 0x01, 0x03])).unwrap(); // FAILED

    let deactivate_idle_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&deactivate_idle_cmd[..], &[0x21, 0x06, 0x01, 0x00]);
    in_tx.send(Bytes::from_static(&[0x41, 0x06, 0x01, 0x00])).unwrap(); // OK
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.set_state(State::RfstIdle).await);
}

#[tokio::test(start_paused = true)]
async fn s6_command_timeout_stalls_into_error() {
    let (handle, mut out_rx, _in_tx) = spawn_core();
    let reset_cmd = out_rx.recv().await.unwrap();
    assert_eq!(&reset_cmd[..], &[0x20, 0x00, 0x01, 0x00]);

    tokio::time::advance(Duration::from_millis(2100)).await;
    tokio::task::yield_now().await;

    assert!(!handle.set_state(State::RfstIdle).await);
}
