// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        device::PeerInfo, key::KeySlots, mac::MacAddr, node::NodeId, substate::PeerState,
        tx::TxQueue,
    },
    std::sync::Arc,
};

/// The stack-side half of a peer, guarded by the Stack Lock. Shared by reference with the
/// transmit path; never copied.
pub struct PeerContext {
    pub node_id: NodeId,
    pub addr: MacAddr,
    pub txq: Arc<TxQueue>,
}

impl PeerContext {
    pub fn info(&self) -> PeerInfo {
        PeerInfo { id: self.node_id, addr: self.addr }
    }
}

/// The driver-side half of a peer, guarded by the Driver Lock.
#[derive(Debug)]
pub struct DriverPeer {
    pub addr: MacAddr,
    pub substate: PeerState,
    /// Set once the peer has been added to the driver (sub-state `Present` or above).
    pub added: bool,
    pub rate_initialized: bool,
    pub keys: KeySlots,
}

impl DriverPeer {
    pub fn new(addr: MacAddr) -> Self {
        Self {
            addr,
            substate: PeerState::NotPresent,
            added: false,
            rate_initialized: false,
            keys: KeySlots::default(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.substate != PeerState::NotPresent
    }
}
