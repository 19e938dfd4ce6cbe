// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the bus, time-sync client/server, and configuration loader.
//!
//! `FatalContract` violations are not represented here: they indicate a broken
//! internal invariant (double-init, use-before-init) and abort the process
//! directly via `panic!` at the call site instead of being returned.

use std::io;
use thiserror::Error;

/// Errors raised while loading or validating the JSON network configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in config file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("config profile '{profile}' missing required key '{key}'")]
    MissingKey { profile: String, key: &'static str },

    #[error("unparseable endpoint string '{0}'")]
    BadEndpoint(String),

    #[error("no home directory available to resolve config path")]
    NoHomeDir,
}

/// Errors raised by the datagram transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Recv(#[source] io::Error),

    #[error("transport context shut down")]
    Shutdown,
}

/// Header size mismatch or CBOR frame decode failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("header too short: expected at least {expected} bytes, got {actual}")]
    HeaderSize { expected: usize, actual: usize },

    #[error("CBOR decode failed: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

/// Appender failure while writing the log file. Per the recorder's fatal-on-
/// IO-error contract, callers treat this as unrecoverable rather than retry.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("recorder row encode failed: {0}")]
    Encode(#[from] DecodeError),

    #[error("no directory available to create the recording file in")]
    NoHomeDir,
}

/// Failure opening or reading back a recorded log file during playback.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("playback row decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("bad magic bytes in recording file: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: [u8; 8], actual: [u8; 8] },

    #[error("unsupported recording file format version {0}")]
    UnsupportedVersion(u32),

    #[error("row checksum mismatch: expected crc32 {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
}
