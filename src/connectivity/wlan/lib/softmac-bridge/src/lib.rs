// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Glue between an 802.11 network stack's station state machine and a SoftMAC driver.
//!
//! The stack keeps its own view of the station ([`StaState`]) and of the BSS it is joining.
//! The driver tracks each remote peer through a strictly ordered sub-state
//! ([`substate::PeerState`]). A [`Bridge`] maps every stack transition onto one-step driver
//! moves, holding the stack's lock and the driver's lock at different times and never both.
//! See [`crossing`] for the protocol and [`sta`] for the transition table.
//!
//! Frames cross the bridge through deferred queues: one per peer for transmit ([`tx`]) and one
//! per device for receive ([`rx`]). Scans are owned by the [`scan`] coordinator.
//!
//! [`Bridge`]: crate::bridge::Bridge
//! [`StaState`]: crate::sta::StaState

pub mod bridge;
pub mod channel;
pub mod config;
pub mod crossing;
pub mod device;
pub mod driver;
pub mod error;
pub mod key;
pub mod logger;
pub mod mac;
pub mod node;
pub mod packet;
pub mod peer;
pub mod rx;
pub mod scan;
pub mod sta;
pub mod stack;
pub mod substate;
pub mod tx;
pub mod vif;
pub mod worker;

pub use {
    bridge::{Bridge, BssInfoUpdate},
    config::BridgeConfig,
    device::{DeviceOps, DriverError, DriverResult},
    error::{Dropped, Error, ScanError, Transition},
    sta::StaState,
    stack::NetStack,
};
