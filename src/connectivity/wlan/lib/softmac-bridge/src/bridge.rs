// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        channel::Channel,
        config::BridgeConfig,
        device::{BssChanges, DeviceOps, DriverResultExt, PeerInfo, QueueParams, ScanRequest},
        driver::DriverState,
        error::{Dropped, Error, Transition},
        key::{KeyConfig, KeySlots},
        mac::{Ac, MacAddr, MacFmt},
        node::{NodeId, NodeRef, NodeTable},
        packet::{RxFrame, TxFrame},
        peer::{DriverPeer, PeerContext},
        rx::{RxPipe, RxQueue},
        scan::{ScanCoordinator, ScanEnd, ScanMode},
        sta::{Machine, StaGuard, StaLocks, StaState},
        stack::{NetStack, StackState},
        substate::PeerState,
        tx::{TxPipe, TxQueue},
        vif::TxGate,
    },
    log::{debug, info, warn},
    parking_lot::RwLock,
    std::{collections::HashMap, mem, sync::Arc},
};

/// Beacon-tracked BSS fields reported by the stack. `None` leaves a field as it is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BssInfoUpdate {
    pub beacon_int: Option<u16>,
    pub dtim_period: Option<u8>,
    pub basic_rates: Option<Vec<u8>>,
    pub qos: Option<bool>,
    pub aid: Option<u16>,
}

fn update_field<T: PartialEq>(
    field: &mut T,
    value: Option<T>,
    flag: BssChanges,
    changed: &mut BssChanges,
) {
    if let Some(value) = value {
        if *field != value {
            *field = value;
            *changed |= flag;
        }
    }
}

/// One SoftMAC device running a single client interface.
///
/// The bridge owns the Stack Lock and the Driver Lock. Methods that take the Stack Lock must
/// not be called with the Driver Lock held on the same thread, and the reverse; debug builds
/// assert this.
pub struct Bridge<D: DeviceOps, N: NetStack> {
    config: BridgeConfig,
    locks: StaLocks,
    ops: Arc<D>,
    stack: Arc<N>,
    nodes: Arc<NodeTable>,
    rx: Arc<RxQueue>,
    scan: ScanCoordinator,
    tx_path: Arc<TxPipe<D, N>>,
    gate: Arc<TxGate>,
    /// Transmit queues by node. Kept apart from the Stack Lock so frames can be queued from
    /// inside stack callbacks.
    txqs: RwLock<HashMap<NodeId, Arc<TxQueue>>>,
}

impl<D: DeviceOps, N: NetStack> Bridge<D, N> {
    pub fn new(
        config: BridgeConfig,
        addr: MacAddr,
        ops: Arc<D>,
        stack: Arc<N>,
    ) -> Result<Self, Error> {
        config.validate().map_err(Error::InvalidConfig)?;
        let state = StackState::new(addr);
        let gate = state.vif.gate.clone();
        let nodes = Arc::new(NodeTable::new());
        let rx =
            RxQueue::new(config.worker_mode, Arc::new(RxPipe::new(stack.clone(), nodes.clone())))?;
        let tx_path = Arc::new(TxPipe::new(
            ops.clone(),
            stack.clone(),
            gate.clone(),
            config.request_tx_status,
        ));
        let scan = ScanCoordinator::new(config.hw_scan, config.scan_cancel_timeout());
        info!("bridge for {} up ({:?} workers)", MacFmt(&addr), config.worker_mode);
        Ok(Self {
            config,
            locks: StaLocks::new(state, DriverState::new()),
            ops,
            stack,
            nodes,
            rx,
            scan,
            tx_path,
            gate,
            txqs: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn lock_stack(&self) -> StaGuard<'_> {
        self.locks.lock_stack()
    }

    fn machine(&self) -> Machine<'_, D, N> {
        Machine {
            locks: &self.locks,
            ops: &*self.ops,
            stack: &*self.stack,
            nodes: &self.nodes,
            config: &self.config,
        }
    }

    /// Runs the handler for `old -> new` on behalf of a stack that already holds the Stack
    /// Lock. The caller commits on `Proceed`.
    pub fn on_state_transition_request(
        &self,
        guard: &mut StaGuard<'_>,
        old: StaState,
        new: StaState,
        arg: i32,
    ) -> Result<Transition, Error> {
        self.machine().on_state_transition_request(guard, old, new, arg)
    }

    /// Moves from the current state to `new`, committing it unless the handler already did.
    pub fn request_state(&self, new: StaState, arg: i32) -> Result<Transition, Error> {
        let mut guard = self.lock_stack();
        let old = guard.state;
        let machine = self.machine();
        let outcome = machine.on_state_transition_request(&mut guard, old, new, arg)?;
        if outcome == Transition::Proceed {
            machine.commit(&mut guard, old, new, arg);
        }
        Ok(outcome)
    }

    pub fn state(&self) -> StaState {
        self.lock_stack().state
    }

    /// Replaces the stack's BSS node and returns the previous one. The cached association is
    /// marked unsynchronized first.
    pub fn update_association_cache(
        &self,
        guard: &mut StaGuard<'_>,
        node: Option<NodeRef>,
    ) -> Option<NodeRef> {
        guard.vif.synced = false;
        guard.bss_generation += 1;
        debug!("BSS node now {:?}", node);
        mem::replace(&mut guard.bss, node)
    }

    pub fn on_update_association_cache(&self, node: Option<NodeRef>) -> Option<NodeRef> {
        let mut guard = self.lock_stack();
        self.update_association_cache(&mut guard, node)
    }

    /// Creates a node together with both halves of its peer.
    pub fn alloc_node(&self, addr: MacAddr, channel: Channel) -> Result<NodeRef, Error> {
        let node = self.nodes.alloc(addr, channel);
        let txq = match TxQueue::new(
            node.id(),
            self.config.tx_queue_limit,
            self.config.worker_mode,
            self.tx_path.clone(),
        ) {
            Ok(txq) => txq,
            Err(e) => {
                self.nodes.remove(node.id());
                return Err(e);
            }
        };
        self.locks.lock_driver().peers.insert(node.id(), DriverPeer::new(addr));
        self.txqs.write().insert(node.id(), txq.clone());
        self.lock_stack()
            .vif
            .peers
            .insert(node.id(), Arc::new(PeerContext { node_id: node.id(), addr, txq }));
        debug!("allocated node {} for {}", node.id(), MacFmt(&addr));
        Ok(node)
    }

    /// Destroys a node and both halves of its peer.
    ///
    /// # Panics
    ///
    /// If the peer is still added to the driver.
    pub fn free_node(&self, node: NodeRef) -> Result<(), Error> {
        let id = node.id();
        {
            let mut drv = self.locks.lock_driver();
            let peer = drv.peers.get(&id).ok_or(Error::NoSuchNode(id))?;
            assert!(
                !peer.added,
                "freeing node {} while its peer is {:?} in the driver",
                id,
                peer.substate
            );
            drv.peers.remove(&id);
        }
        {
            let mut stack = self.lock_stack();
            if stack.vif.is_cached(id) {
                stack.vif.clear_association();
            }
            stack.vif.peers.remove(&id);
        }
        let txq = self.txqs.write().remove(&id);
        self.nodes.remove(id);
        if let Some(txq) = txq {
            txq.shutdown();
        }
        debug!("freed node {}", id);
        Ok(())
    }

    pub fn driver_peer_state(&self, id: NodeId) -> Option<PeerState> {
        self.locks.lock_driver().peers.get(&id).map(|peer| peer.substate)
    }

    pub fn has_channel_context(&self) -> bool {
        self.locks.lock_driver().chanctx.is_some()
    }

    fn txq(&self, id: NodeId) -> Option<Arc<TxQueue>> {
        self.txqs.read().get(&id).cloned()
    }

    fn all_txqs(&self) -> Vec<Arc<TxQueue>> {
        self.txqs.read().values().cloned().collect()
    }

    /// Queues a frame for the peer it is addressed to. Takes neither the Stack Lock nor the
    /// Driver Lock, so the stack may call it while committing a state.
    pub fn transmit(&self, frame: TxFrame) -> Result<(), Dropped> {
        match self.txq(frame.node.id()) {
            Some(txq) => txq.enqueue(frame),
            None => {
                debug!("no peer for node {}, dropping frame", frame.node.id());
                Err(Dropped::NoSuchPeer)
            }
        }
    }

    /// Driver receive path. `node` is the sender if the driver already resolved it.
    pub fn on_receive_frame(
        &self,
        node: Option<NodeRef>,
        mut frame: RxFrame,
    ) -> Result<(), Dropped> {
        if frame.node.is_none() {
            frame.node = node;
        }
        self.rx.enqueue(frame)
    }

    /// Applies beacon-tracked BSS fields and tells the driver what changed.
    pub fn on_beacon_info_changed(&self, update: BssInfoUpdate) -> Result<BssChanges, Error> {
        let mut drv = self.locks.lock_driver();
        let mut changed = BssChanges::empty();
        let conf = &mut drv.bss_conf;
        update_field(&mut conf.beacon_int, update.beacon_int, BssChanges::BEACON_INT, &mut changed);
        update_field(
            &mut conf.dtim_period,
            update.dtim_period,
            BssChanges::DTIM_PERIOD,
            &mut changed,
        );
        update_field(
            &mut conf.basic_rates,
            update.basic_rates,
            BssChanges::BASIC_RATES,
            &mut changed,
        );
        update_field(&mut conf.qos, update.qos, BssChanges::QOS, &mut changed);
        update_field(&mut conf.aid, update.aid, BssChanges::AID, &mut changed);
        if changed.is_empty() {
            return Ok(changed);
        }
        self.ops
            .bss_info_changed(&drv.bss_conf, changed)
            .or_unsupported_ok()
            .map_err(|e| Error::driver("bss_info_changed", e))?;
        Ok(changed)
    }

    pub fn update_edca(&self, ac: Ac, params: QueueParams) -> Result<(), Error> {
        let mut drv = self.locks.lock_driver();
        self.ops
            .configure_queue(ac, &params)
            .or_unsupported_ok()
            .map_err(|e| Error::driver("configure_queue", e))?;
        drv.edca[ac.index()] = Some(params);
        Ok(())
    }

    /// Installs `key` in `slot` for a peer that is present in the driver.
    pub fn set_key(&self, node: &NodeRef, slot: usize, key: KeyConfig) -> Result<(), Error> {
        KeySlots::check_slot(slot)?;
        let id = node.id();
        let mut drv = self.locks.lock_driver();
        let peer = drv.peers.get_mut(&id).ok_or(Error::NoSuchNode(id))?;
        if !peer.is_present() {
            return Err(Error::PeerNotInDriver(id));
        }
        self.ops
            .set_key(&PeerInfo { id, addr: peer.addr }, slot, Some(&key))
            .or_unsupported_ok()
            .map_err(|e| Error::driver("set_key", e))?;
        peer.keys.install(slot, key)?;
        Ok(())
    }

    /// Removes the key in `slot`, returning it if one was installed.
    pub fn delete_key(&self, node: &NodeRef, slot: usize) -> Result<Option<KeyConfig>, Error> {
        KeySlots::check_slot(slot)?;
        let id = node.id();
        let mut drv = self.locks.lock_driver();
        let peer = drv.peers.get_mut(&id).ok_or(Error::NoSuchNode(id))?;
        if !peer.is_present() {
            return Err(Error::PeerNotInDriver(id));
        }
        if peer.keys.get(slot).is_none() {
            return Ok(None);
        }
        self.ops
            .set_key(&PeerInfo { id, addr: peer.addr }, slot, None)
            .or_unsupported_ok()
            .map_err(|e| Error::driver("set_key", e))?;
        peer.keys.remove(slot)
    }

    pub fn installed_keys(&self, id: NodeId) -> usize {
        self.locks.lock_driver().peers.get(&id).map_or(0, |peer| peer.keys.installed())
    }

    pub fn stop_queue(&self, ac: Ac) {
        debug!("stopping {:?}", ac);
        self.gate.stop(ac);
    }

    pub fn wake_queue(&self, ac: Ac) {
        if self.gate.wake(ac) {
            debug!("woke {:?}", ac);
            self.all_txqs().iter().for_each(|txq| txq.kick());
        }
    }

    pub fn wake_all_queues(&self) {
        if self.gate.wake_all() {
            self.all_txqs().iter().for_each(|txq| txq.kick());
        }
    }

    pub fn start_scan(&self, req: ScanRequest) -> Result<ScanMode, Error> {
        Ok(self.scan.start(&*self.ops, req)?)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_running()
    }

    pub fn set_scan_channel(&self, channel: &Channel) -> Result<(), Error> {
        Ok(self.scan.set_channel(&*self.ops, channel)?)
    }

    /// Aborts the running scan. The stack hears about it exactly once, from the driver's
    /// completion or from here.
    pub fn cancel_scan(&self) -> Result<(), Error> {
        if let ScanEnd::Forced(mode) = self.scan.cancel(&*self.ops)? {
            info!("{:?} scan cancelled", mode);
            self.stack.scan_done(true);
        }
        Ok(())
    }

    /// Ends the running scan, if any.
    pub fn stop_scan(&self) -> Result<(), Error> {
        if let ScanEnd::Forced(mode) = self.scan.stop(&*self.ops)? {
            info!("{:?} scan stopped", mode);
            self.stack.scan_done(false);
        }
        Ok(())
    }

    /// Driver notification that its scan finished.
    pub fn scan_complete(&self, aborted: bool) {
        if let Some(mode) = self.scan.complete(aborted) {
            if mode == ScanMode::SoftwareEmulated {
                if let Err(e) = self.ops.sw_scan_complete().or_unsupported_ok() {
                    warn!("sw_scan_complete failed: {}", e);
                }
            }
            self.stack.scan_done(aborted);
        }
    }

    /// Runs one pass of every worker with work pending. Returns the number of passes run.
    pub fn run_pending_work(&self) -> usize {
        let rx = usize::from(self.rx.run_pending());
        rx + self.all_txqs().iter().filter(|txq| txq.run_pending()).count()
    }

    /// Stops the device: receive first, then any scan, then every transmit queue.
    pub fn stop(&self) {
        info!("stopping bridge");
        let released = self.rx.stop();
        if released > 0 {
            debug!("released {} received frames", released);
        }
        if let Err(e) = self.stop_scan() {
            warn!("stopping scan: {}", e);
        }
        for txq in self.all_txqs() {
            txq.shutdown();
        }
        self.rx.shutdown();
    }
}
