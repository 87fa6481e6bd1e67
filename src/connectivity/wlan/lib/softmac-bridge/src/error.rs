// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{device::DriverError, node::NodeId, sta::StaState},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no handler for transition {from:?} -> {to:?}")]
    Unsupported { from: StaState, to: StaState },
    #[error("not recoverable: {0}")]
    NotRecoverable(&'static str),
    #[error("driver operation {op} failed: {source}")]
    Driver {
        op: &'static str,
        #[source]
        source: DriverError,
    },
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("no such node: {0}")]
    NoSuchNode(NodeId),
    #[error("invalid key slot {0}")]
    InvalidKeySlot(usize),
    #[error("node {0} is not present in the driver")]
    PeerNotInDriver(NodeId),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("invalid configuration: {0:#}")]
    InvalidConfig(anyhow::Error),
}

impl Error {
    pub fn driver(op: &'static str, source: DriverError) -> Self {
        Error::Driver { op, source }
    }
}

/// Why a frame did not enter a queue. By the time this is returned the frame and every
/// reference it held have been released.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Dropped {
    #[error("queue is not accepting frames")]
    NotAccepting,
    #[error("queue is full")]
    QueueFull,
    #[error("receive path is stopped")]
    Stopped,
    #[error("no peer for frame")]
    NoSuchPeer,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("a scan is already running; cancel it first")]
    AlreadyRunning,
    #[error("no scan is running")]
    NotRunning,
    #[error("driver failed to start scan: {0}")]
    Driver(DriverError),
}

/// Successful outcome of a transition handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    /// The caller commits the new state.
    Proceed,
    /// The handler already committed every intermediate state; the caller must not commit.
    AlreadyHandled,
}

pub trait ResultExt<T> {
    /// Logs the error under `context` and discards it. Used on teardown paths, which never
    /// stop on a failed step.
    fn log_err(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn log_err(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                log::error!("{}: {}", context, e);
                None
            }
        }
    }
}
