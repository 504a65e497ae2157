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

//! HAL I/O adaptor: the bidirectional byte channel between the core and the
//! host platform's NFC HAL. The core owns no transport; implementations are
//! injected by the embedder.

use crate::error::HalError;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedSender;

/// A byte-stream transport the SAR writes fully-framed NCI packets to.
///
/// Inbound bytes are not part of this trait: they are delivered to the core
/// via the `UnboundedReceiver<Bytes>` passed alongside a `HalIo` to
/// [`crate::core::Core::new`], mirroring how a platform HAL calls back into
/// its client with `read(bytes, len)` rather than being polled for input.
pub trait HalIo: Send + 'static {
    /// Write one complete wire-ready chunk (already segmented by the SAR).
    /// Resolves once the transport has accepted the bytes.
    fn write(&mut self, bytes: Bytes) -> BoxFuture<'_, Result<(), HalError>>;
}

/// A `HalIo` backed by a `tokio::sync::mpsc` channel, for tests and for
/// embedding behind any transport that already speaks `Bytes` (the pattern
/// the platform's rootcanal/HIDL HAL modules both reduce to internally).
pub struct ChannelHal {
    out_tx: UnboundedSender<Bytes>,
}

impl ChannelHal {
    pub fn new(out_tx: UnboundedSender<Bytes>) -> ChannelHal {
        ChannelHal { out_tx }
    }
}

impl HalIo for ChannelHal {
    fn write(&mut self, bytes: Bytes) -> BoxFuture<'_, Result<(), HalError>> {
        let result = self.out_tx.send(bytes).map_err(|_| HalError::ChannelClosed);
        Box::pin(async move { result })
    }
}
