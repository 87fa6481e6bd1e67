// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deferred receive path: one FIFO and one worker per device.

use {
    crate::{
        error::{Dropped, Error},
        mac::MacAddr,
        node::{NodeRef, NodeTable},
        packet::RxFrame,
        stack::NetStack,
        worker::{Worker, WorkerMode},
    },
    log::debug,
    parking_lot::Mutex,
    std::{
        collections::VecDeque,
        mem,
        sync::{Arc, Weak},
    },
};

/// Where the receive worker sends frames.
pub trait RxSink: Send + Sync {
    fn resolve(&self, ta: &MacAddr) -> Option<NodeRef>;

    fn input(&self, node: Option<&NodeRef>, frame: RxFrame);
}

/// Receive sink that resolves senders from the stack's node table.
pub struct RxPipe<N> {
    stack: Arc<N>,
    nodes: Arc<NodeTable>,
}

impl<N: NetStack> RxPipe<N> {
    pub fn new(stack: Arc<N>, nodes: Arc<NodeTable>) -> Self {
        Self { stack, nodes }
    }
}

impl<N: NetStack> RxSink for RxPipe<N> {
    fn resolve(&self, ta: &MacAddr) -> Option<NodeRef> {
        self.nodes.find_by_addr(ta)
    }

    fn input(&self, node: Option<&NodeRef>, frame: RxFrame) {
        self.stack.input(node, frame);
    }
}

struct RxFifo {
    frames: VecDeque<RxFrame>,
    stopped: bool,
}

pub struct RxQueue {
    fifo: Mutex<RxFifo>,
    sink: Arc<dyn RxSink>,
    worker: Worker,
}

impl RxQueue {
    pub fn new(mode: WorkerMode, sink: Arc<dyn RxSink>) -> Result<Arc<Self>, Error> {
        let queue = Arc::new_cyclic(|weak: &Weak<RxQueue>| {
            let weak = weak.clone();
            RxQueue {
                fifo: Mutex::new(RxFifo { frames: VecDeque::new(), stopped: false }),
                sink,
                worker: Worker::new("wlan-rx", mode, move || {
                    if let Some(queue) = weak.upgrade() {
                        queue.drain();
                    }
                }),
            }
        });
        queue.worker.start().map_err(Error::Spawn)?;
        Ok(queue)
    }

    /// Queues a frame for the stack. Fails closed once the queue is stopped.
    pub fn enqueue(&self, frame: RxFrame) -> Result<(), Dropped> {
        let mut fifo = self.fifo.lock();
        if fifo.stopped {
            drop(fifo);
            drop(frame);
            return Err(Dropped::Stopped);
        }
        fifo.frames.push_back(frame);
        drop(fifo);
        self.worker.schedule();
        Ok(())
    }

    fn drain(&self) {
        let batch = mem::take(&mut self.fifo.lock().frames);
        for mut frame in batch {
            let node = frame.node.take().or_else(|| self.sink.resolve(&frame.ta));
            self.sink.input(node.as_ref(), frame);
        }
    }

    /// Stops accepting frames, waits out the worker and releases anything still queued,
    /// along with the node references those frames held. Returns the number released.
    pub fn stop(&self) -> usize {
        self.fifo.lock().stopped = true;
        self.worker.cancel_sync();
        let rest = mem::take(&mut self.fifo.lock().frames);
        let count = rest.len();
        drop(rest);
        if count > 0 {
            debug!("rx: released {} frames on stop", count);
        }
        count
    }

    pub fn start(&self) {
        self.fifo.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.fifo.lock().stopped
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

    pub fn shutdown(&self) {
        self.stop();
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::{Cbw, Channel},
            stack::FakeStack,
        },
        proptest::prelude::*,
    };

    const CHAN: Channel = Channel::new(11, Cbw::Cbw20);

    struct Harness {
        stack: Arc<FakeStack>,
        nodes: Arc<NodeTable>,
        queue: Arc<RxQueue>,
    }

    fn harness() -> Harness {
        let stack = Arc::new(FakeStack::new());
        let nodes = Arc::new(NodeTable::new());
        let queue = RxQueue::new(
            WorkerMode::Manual,
            Arc::new(RxPipe::new(stack.clone(), nodes.clone())),
        )
        .expect("manual queue");
        Harness { stack, nodes, queue }
    }

    #[test]
    fn resolves_attached_and_looked_up_senders() {
        let h = harness();
        let ap = h.nodes.alloc([1; 6], CHAN);
        let mut attached = RxFrame::new([9; 6], vec![1]);
        attached.node = Some(ap.clone());
        h.queue.enqueue(attached).expect("accepted");
        h.queue.enqueue(RxFrame::new([1; 6], vec![2])).expect("accepted");
        h.queue.enqueue(RxFrame::new([5; 6], vec![3])).expect("accepted");
        assert_eq!(ap.ref_count(), 3);
        assert!(h.queue.run_pending());
        assert_eq!(
            h.stack.inputs(),
            vec![(Some(ap.id()), vec![1]), (Some(ap.id()), vec![2]), (None, vec![3])]
        );
        assert_eq!(ap.ref_count(), 2);
    }

    #[test]
    fn stop_fails_closed_and_releases() {
        let h = harness();
        let ap = h.nodes.alloc([1; 6], CHAN);
        let mut frame = RxFrame::new([1; 6], vec![1]);
        frame.node = Some(ap.clone());
        h.queue.enqueue(frame).expect("accepted");
        assert_eq!(h.queue.stop(), 1);
        assert_eq!(ap.ref_count(), 2);
        assert!(!h.queue.run_pending());

        let mut late = RxFrame::new([1; 6], vec![2]);
        late.node = Some(ap.clone());
        assert_eq!(h.queue.enqueue(late), Err(Dropped::Stopped));
        assert_eq!(ap.ref_count(), 2);
        assert!(h.stack.inputs().is_empty());

        h.queue.start();
        h.queue.enqueue(RxFrame::new([1; 6], vec![3])).expect("accepted");
        h.queue.run_pending();
        assert_eq!(h.stack.inputs(), vec![(Some(ap.id()), vec![3])]);
    }

    #[test]
    fn threaded_queue_delivers() {
        let stack = Arc::new(FakeStack::new());
        let queue = RxQueue::new(
            WorkerMode::Threaded,
            Arc::new(RxPipe::new(stack.clone(), Arc::new(NodeTable::new()))),
        )
        .expect("spawn worker");
        queue.enqueue(RxFrame::new([1; 6], vec![4])).expect("accepted");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while stack.inputs().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        queue.shutdown();
        assert_eq!(stack.inputs(), vec![(None, vec![4])]);
    }

    proptest! {
        #[test]
        fn every_frame_is_delivered_or_released_once(
            ops in proptest::collection::vec(prop_oneof![3 => Just(true), 1 => Just(false)], 0..64),
        ) {
            let h = harness();
            let ap = h.nodes.alloc([1; 6], CHAN);
            let mut accepted = 0;
            for enqueue in ops {
                if enqueue {
                    let mut frame = RxFrame::new([1; 6], vec![0]);
                    frame.node = Some(ap.clone());
                    h.queue.enqueue(frame).expect("accepted");
                    accepted += 1;
                } else {
                    h.queue.run_pending();
                }
            }
            let released = h.queue.stop();
            prop_assert_eq!(h.stack.inputs().len() + released, accepted);
            prop_assert!(h.queue.is_empty());
            prop_assert_eq!(ap.ref_count(), 2);
        }
    }
}
