// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        mac::{Ac, MacAddr},
        node::NodeId,
        peer::PeerContext,
    },
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
};

/// Per-AC transmit stop flags. Owned by the interface and shared with the transmit path,
/// which checks them without taking the Stack Lock.
#[derive(Debug, Default)]
pub struct TxGate {
    stopped: [AtomicBool; 4],
}

impl TxGate {
    pub fn stop(&self, ac: Ac) {
        self.stopped[ac.index()].store(true, Ordering::SeqCst);
    }

    /// Returns true if the AC was stopped.
    pub fn wake(&self, ac: Ac) -> bool {
        self.stopped[ac.index()].swap(false, Ordering::SeqCst)
    }

    pub fn wake_all(&self) -> bool {
        Ac::ALL.iter().fold(false, |woke, ac| self.wake(*ac) || woke)
    }

    pub fn is_stopped(&self, ac: Ac) -> bool {
        self.stopped[ac.index()].load(Ordering::SeqCst)
    }
}

/// The single client interface of a device.
pub struct VirtualInterface {
    pub addr: MacAddr,
    pub peers: HashMap<NodeId, Arc<PeerContext>>,
    /// The peer the state machine is currently associating through.
    pub cached_assoc: Option<Arc<PeerContext>>,
    /// Whether `cached_assoc` is known to match the stack's BSS node.
    pub synced: bool,
    pub gate: Arc<TxGate>,
}

impl VirtualInterface {
    pub fn new(addr: MacAddr) -> Self {
        Self {
            addr,
            peers: HashMap::new(),
            cached_assoc: None,
            synced: false,
            gate: Arc::new(TxGate::default()),
        }
    }

    pub fn clear_association(&mut self) -> Option<Arc<PeerContext>> {
        self.synced = false;
        self.cached_assoc.take()
    }

    pub fn is_cached(&self, id: NodeId) -> bool {
        self.cached_assoc.as_ref().map_or(false, |peer| peer.node_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_stop_and_wake() {
        let gate = TxGate::default();
        assert!(!gate.wake(Ac::Vo));
        gate.stop(Ac::Vo);
        gate.stop(Ac::Bk);
        assert!(gate.is_stopped(Ac::Vo));
        assert!(!gate.is_stopped(Ac::Be));
        assert!(gate.wake(Ac::Vo));
        assert!(!gate.is_stopped(Ac::Vo));
        assert!(gate.wake_all());
        assert!(!gate.is_stopped(Ac::Bk));
        assert!(!gate.wake_all());
    }
}
