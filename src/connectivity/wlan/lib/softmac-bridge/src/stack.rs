// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        crossing::Association,
        mac::MacAddr,
        node::{NodeId, NodeRef},
        packet::{RxFrame, TxFrame},
        sta::StaState,
        vif::VirtualInterface,
    },
    anyhow::Error,
};

#[cfg(test)]
pub use test_utils::*;

/// Callbacks into the network stack.
pub trait NetStack: Send + Sync + 'static {
    /// The station moved from `from` to `to`. Called with the Stack Lock held.
    fn commit_state(&self, from: StaState, to: StaState, arg: i32);

    /// Delivers a received frame. `node` is the sender, if known.
    fn input(&self, node: Option<&NodeRef>, frame: RxFrame);

    /// Encrypts a protected frame in place before it goes to the driver.
    fn encap(&self, _frame: &mut TxFrame) -> Result<(), Error> {
        Ok(())
    }

    fn scan_done(&self, aborted: bool);
}

/// Everything guarded by the Stack Lock.
pub struct StackState {
    pub state: StaState,
    /// The stack's own record of the BSS it is joining.
    pub bss: Option<NodeRef>,
    /// Bumped every time `bss` is replaced.
    pub bss_generation: u64,
    pub vif: VirtualInterface,
}

impl StackState {
    pub fn new(addr: MacAddr) -> Self {
        Self {
            state: StaState::Init,
            bss: None,
            bss_generation: 0,
            vif: VirtualInterface::new(addr),
        }
    }

    pub fn bss_id(&self) -> Option<NodeId> {
        self.bss.as_ref().map(|node| node.id())
    }
}

impl Association for StackState {
    type Snapshot = (Option<NodeId>, u64);

    fn association(&self) -> Self::Snapshot {
        (self.bss_id(), self.bss_generation)
    }
}
