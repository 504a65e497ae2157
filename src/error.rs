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

//! Error types for the HAL boundary and the wire codec.

use thiserror::Error;

/// Errors reported by a [`crate::hal::HalIo`] implementation.
#[derive(Error, Debug)]
pub enum HalError {
    /// The transport closed or refused a write.
    #[error("HAL write failed")]
    WriteFailed,
    /// The transport's inbound channel was closed.
    #[error("HAL channel closed")]
    ChannelClosed,
    /// Wraps an I/O error from a concrete transport implementation.
    #[error("HAL I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while decoding a wire structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes were available than the structure requires.
    #[error("packet too short: need at least {need}, have {have}")]
    TooShort { need: usize, have: usize },
    /// The declared inner length field did not match the buffer length.
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// A field carried a value outside its legal range.
    #[error("invalid field value: {0}")]
    InvalidField(&'static str),
}
