// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{mac::MacAddr, node::NodeRef};

/// An outbound frame queued toward a peer. The frame holds a strong reference on the
/// peer's node until it reaches the driver or is dropped.
#[derive(Debug)]
pub struct TxFrame {
    pub data: Vec<u8>,
    pub node: NodeRef,
    pub tid: u8,
    /// The frame must be encapsulated by the stack before transmission.
    pub protected: bool,
    /// Ask the driver to report the retry status of this frame.
    pub request_status: bool,
}

impl TxFrame {
    pub fn new(node: NodeRef, data: Vec<u8>) -> Self {
        Self { data, node, tid: 0, protected: false, request_status: false }
    }

    pub fn with_tid(mut self, tid: u8) -> Self {
        self.tid = tid;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }
}

/// An inbound frame. `node` is attached when the receive path already knows the sender;
/// otherwise the receive worker resolves it from the transmitter address.
#[derive(Debug)]
pub struct RxFrame {
    pub data: Vec<u8>,
    pub ta: MacAddr,
    pub node: Option<NodeRef>,
}

impl RxFrame {
    pub fn new(ta: MacAddr, data: Vec<u8>) -> Self {
        Self { data, ta, node: None }
    }
}
