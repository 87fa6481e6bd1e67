// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stack-side node objects.
//!
//! The network stack owns its nodes through the [`NodeTable`]. Everything else, including
//! the bridge while it is unlocked and every queued frame, holds a [`NodeRef`]: an atomic
//! strong reference that keeps the node alive after the stack has dropped it from its table.

use {
    crate::{
        channel::Channel,
        mac::{MacAddr, MacFmt},
    },
    parking_lot::RwLock,
    std::{
        collections::HashMap,
        fmt,
        ops::Deref,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

pub type NodeId = u64;

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    addr: MacAddr,
    channel: Channel,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> &MacAddr {
        &self.addr
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

/// A strong, atomically counted reference to a stack node.
#[derive(Clone)]
pub struct NodeRef(Arc<Node>);

impl NodeRef {
    /// Number of live strong references, including this one.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.0
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &NodeRef) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({} {})", self.id, MacFmt(&self.addr))
    }
}

/// The stack's owning map of nodes.
pub struct NodeTable {
    next_id: AtomicU64,
    nodes: RwLock<HashMap<NodeId, NodeRef>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), nodes: RwLock::new(HashMap::new()) }
    }

    pub fn alloc(&self, addr: MacAddr, channel: Channel) -> NodeRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let node = NodeRef(Arc::new(Node { id, addr, channel }));
        self.nodes.write().insert(id, node.clone());
        node
    }

    /// Drops the table's reference. The node itself lives on until every other
    /// reference is released.
    pub fn remove(&self, id: NodeId) -> Option<NodeRef> {
        self.nodes.write().remove(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<NodeRef> {
        self.nodes.read().get(&id).cloned()
    }

    pub fn find_by_addr(&self, addr: &MacAddr) -> Option<NodeRef> {
        self.nodes.read().values().find(|node| node.addr() == addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}
