// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deferred transmit path: one FIFO and one worker per peer.
//!
//! The queue lock guards only the FIFO and the "acceptable" flag. The worker takes the whole
//! FIFO in one go and hands frames to the driver with no lock held. It never takes the Stack
//! Lock or the Driver Lock, so a state machine handler may flush a queue while holding the
//! Driver Lock.

use {
    crate::{
        device::{DeviceOps, TxMeta},
        error::{Dropped, Error},
        mac::Ac,
        node::NodeId,
        packet::TxFrame,
        stack::NetStack,
        vif::TxGate,
        worker::{Worker, WorkerMode},
    },
    log::{debug, warn},
    parking_lot::Mutex,
    std::{
        collections::VecDeque,
        mem,
        sync::{Arc, Weak},
    },
};

/// Where the transmit worker sends frames.
pub trait TxPath: Send + Sync {
    fn is_stopped(&self, ac: Ac) -> bool;

    /// Encapsulates if needed and hands the frame to the driver. Failures are logged and the
    /// frame is released; nothing is retried here.
    fn deliver(&self, frame: TxFrame);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Send what is left to the driver.
    Transmit,
    /// Release what is left.
    Free,
}

struct TxFifo {
    frames: VecDeque<TxFrame>,
    acceptable: bool,
}

pub struct TxQueue {
    node_id: NodeId,
    limit: usize,
    fifo: Mutex<TxFifo>,
    path: Arc<dyn TxPath>,
    worker: Worker,
}

impl TxQueue {
    /// Creates a queue that does not yet accept frames.
    pub fn new(
        node_id: NodeId,
        limit: usize,
        mode: WorkerMode,
        path: Arc<dyn TxPath>,
    ) -> Result<Arc<Self>, Error> {
        let queue = Arc::new_cyclic(|weak: &Weak<TxQueue>| {
            let weak = weak.clone();
            TxQueue {
                node_id,
                limit,
                fifo: Mutex::new(TxFifo { frames: VecDeque::new(), acceptable: false }),
                path,
                worker: Worker::new(format!("wlan-tx-{}", node_id), mode, move || {
                    if let Some(queue) = weak.upgrade() {
                        queue.drain();
                    }
                }),
            }
        });
        queue.worker.start().map_err(Error::Spawn)?;
        Ok(queue)
    }

    pub fn enqueue(&self, frame: TxFrame) -> Result<(), Dropped> {
        let mut fifo = self.fifo.lock();
        if !fifo.acceptable {
            drop(fifo);
            debug!("tx {}: dropping frame, queue not accepting", self.node_id);
            return Err(Dropped::NotAccepting);
        }
        if fifo.frames.len() >= self.limit {
            drop(fifo);
            debug!("tx {}: dropping frame, queue full", self.node_id);
            return Err(Dropped::QueueFull);
        }
        fifo.frames.push_back(frame);
        drop(fifo);
        self.worker.schedule();
        Ok(())
    }

    /// One worker pass.
    fn drain(&self) {
        let mut batch = mem::take(&mut self.fifo.lock().frames);
        while let Some(frame) = batch.pop_front() {
            if self.path.is_stopped(Ac::from_tid(frame.tid)) {
                // Put the rest back ahead of anything enqueued meanwhile; the wake kicks us.
                batch.push_front(frame);
                let mut fifo = self.fifo.lock();
                batch.append(&mut fifo.frames);
                fifo.frames = batch;
                return;
            }
            self.path.deliver(frame);
        }
    }

    /// Stops accepting frames, cancels the worker and waits out any pass in progress, then
    /// sends or releases what is left. Returns the number of frames handled here.
    pub fn flush(&self, mode: FlushMode) -> usize {
        self.fifo.lock().acceptable = false;
        self.worker.cancel_sync();
        let rest = mem::take(&mut self.fifo.lock().frames);
        let count = rest.len();
        match mode {
            FlushMode::Transmit => rest.into_iter().for_each(|frame| self.path.deliver(frame)),
            FlushMode::Free => drop(rest),
        }
        if count > 0 {
            debug!("tx {}: flushed {} frames ({:?})", self.node_id, count, mode);
        }
        count
    }

    pub fn set_acceptable(&self, acceptable: bool) {
        self.fifo.lock().acceptable = acceptable;
    }

    pub fn is_acceptable(&self) -> bool {
        self.fifo.lock().acceptable
    }

    /// Schedules the worker if frames are waiting.
    pub fn kick(&self) {
        if !self.fifo.lock().frames.is_empty() {
            self.worker.schedule();
        }
    }

    pub fn len(&self) -> usize {
        self.fifo.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_pending(&self) -> bool {
        self.worker.run_pending()
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Releases everything and stops the worker for good.
    pub fn shutdown(&self) {
        self.flush(FlushMode::Free);
        self.worker.shutdown();
    }
}

/// The transmit path into a driver.
pub struct TxPipe<D, N> {
    ops: Arc<D>,
    stack: Arc<N>,
    gate: Arc<TxGate>,
    request_status: bool,
}

impl<D: DeviceOps, N: NetStack> TxPipe<D, N> {
    pub fn new(ops: Arc<D>, stack: Arc<N>, gate: Arc<TxGate>, request_status: bool) -> Self {
        Self { ops, stack, gate, request_status }
    }
}

impl<D: DeviceOps, N: NetStack> TxPath for TxPipe<D, N> {
    fn is_stopped(&self, ac: Ac) -> bool {
        self.gate.is_stopped(ac)
    }

    fn deliver(&self, mut frame: TxFrame) {
        if frame.protected {
            if let Err(e) = self.stack.encap(&mut frame) {
                warn!("dropping frame to node {}: encapsulation failed: {}", frame.node.id(), e);
                return;
            }
        }
        let meta = TxMeta {
            ac: Ac::from_tid(frame.tid),
            tid: frame.tid,
            request_status: frame.request_status || self.request_status,
        };
        let id = frame.node.id();
        let result = if self.ops.has_tx_queues() {
            self.ops.enqueue_tx(frame, &meta)
        } else {
            self.ops.transmit(frame, &meta)
        };
        if let Err(e) = result {
            debug!("transmit to node {} failed: {}", id, e);
        }
    }
}
