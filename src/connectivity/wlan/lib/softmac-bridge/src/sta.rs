// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Station association state machine.
//!
//! The stack asks for a move between two of its states; the handler for that pair drives the
//! associated peer through its driver sub-states. Handlers run with the Stack Lock held and
//! reach the driver only through [`LockPair::cross`].
//!
//! Upward handlers abort on the first driver error and return it, after unwinding the peer to
//! the sub-state it entered with. Downward handlers log driver errors and always finish.

use {
    crate::{
        config::BridgeConfig,
        crossing::{Crossed, LockPair, StackGuard},
        device::{BssChanges, DeviceOps, DriverResultExt},
        driver::DriverState,
        error::{Error, ResultExt, Transition},
        node::{NodeRef, NodeTable},
        peer::PeerContext,
        stack::{NetStack, StackState},
        substate::{Associated, Authenticated, Authorized, NotPresent, Present, Step, SubState},
        tx::FlushMode,
    },
    log::{info, warn},
    std::sync::Arc,
};

/// States of the station as seen by the network stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StaState {
    Init,
    Scanning,
    Authenticating,
    Associating,
    Running,
}

impl StaState {
    pub const ALL: [StaState; 5] = [
        StaState::Init,
        StaState::Scanning,
        StaState::Authenticating,
        StaState::Associating,
        StaState::Running,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// No driver work; the stack commits.
    Commit,
    ToAuth,
    AuthToAssoc,
    AuthToInit,
    AssocToRun,
    AssocToAuth,
    AssocToInit,
    RunToAssoc,
    /// `RunToAssoc` then `AssocToAuth`.
    RunToAuth,
    /// `RunToAssoc` then `AssocToInit`.
    RunToInit,
    /// `RunToInit` then `Init -> Scanning`.
    RunToScan,
}

pub const TRANSITIONS: [(StaState, StaState, Handler); 15] = {
    use {Handler::*, StaState::*};
    [
        (Init, Scanning, Commit),
        (Scanning, Init, Commit),
        (Scanning, Scanning, Commit),
        (Init, Authenticating, ToAuth),
        (Scanning, Authenticating, ToAuth),
        (Authenticating, Associating, AuthToAssoc),
        (Authenticating, Scanning, AuthToInit),
        (Authenticating, Init, AuthToInit),
        (Associating, Running, AssocToRun),
        (Associating, Authenticating, AssocToAuth),
        (Associating, Init, AssocToInit),
        (Running, Associating, RunToAssoc),
        (Running, Authenticating, RunToAuth),
        (Running, Init, RunToInit),
        (Running, Scanning, RunToScan),
    ]
};

pub fn handler_for(from: StaState, to: StaState) -> Option<Handler> {
    use {Handler::*, StaState::*};
    match (from, to) {
        (Init, Scanning) | (Scanning, Init) | (Scanning, Scanning) => Some(Commit),
        (Init, Authenticating) | (Scanning, Authenticating) => Some(ToAuth),
        (Authenticating, Associating) => Some(AuthToAssoc),
        (Authenticating, Scanning) | (Authenticating, Init) => Some(AuthToInit),
        (Associating, Running) => Some(AssocToRun),
        (Associating, Authenticating) => Some(AssocToAuth),
        (Associating, Init) => Some(AssocToInit),
        (Running, Associating) => Some(RunToAssoc),
        (Running, Authenticating) => Some(RunToAuth),
        (Running, Init) => Some(RunToInit),
        (Running, Scanning) => Some(RunToScan),
        _ => None,
    }
}

pub type StaGuard<'a> = StackGuard<'a, StackState>;
pub type StaLocks = LockPair<StackState, DriverState>;

/// Sub-states a departing peer can be torn down from.
pub trait Teardown: SubState + Sized {
    fn unwind<D: DeviceOps + ?Sized>(
        step: Step<Self>,
        drv: &mut DriverState,
        ops: &D,
    ) -> Step<NotPresent>;
}

impl Teardown for Present {
    fn unwind<D: DeviceOps + ?Sized>(
        step: Step<Self>,
        drv: &mut DriverState,
        ops: &D,
    ) -> Step<NotPresent> {
        step.retreat(drv, ops)
    }
}

impl Teardown for Authenticated {
    fn unwind<D: DeviceOps + ?Sized>(
        step: Step<Self>,
        drv: &mut DriverState,
        ops: &D,
    ) -> Step<NotPresent> {
        step.retreat(drv, ops).retreat(drv, ops)
    }
}

/// The state machine's view of a bridge: the locks and the collaborators its handlers call.
pub struct Machine<'a, D, N> {
    pub locks: &'a StaLocks,
    pub ops: &'a D,
    pub stack: &'a N,
    pub nodes: &'a NodeTable,
    pub config: &'a BridgeConfig,
}

impl<'a, D: DeviceOps, N: NetStack> Machine<'a, D, N> {
    /// Runs the handler for `old -> new`. On `Proceed` the caller commits `new`; on
    /// `AlreadyHandled` every state up to `new` has been committed.
    pub fn on_state_transition_request(
        &self,
        guard: &mut StaGuard<'_>,
        old: StaState,
        new: StaState,
        arg: i32,
    ) -> Result<Transition, Error> {
        if guard.state != old {
            return Err(Error::NotRecoverable("transition does not start from the current state"));
        }
        let handler = handler_for(old, new).ok_or(Error::Unsupported { from: old, to: new })?;
        info!("{:?} -> {:?} (arg {}): {:?}", old, new, arg, handler);

        use StaState::*;
        match handler {
            Handler::Commit => return Ok(Transition::Proceed),
            Handler::ToAuth => self.to_auth(guard)?,
            Handler::AuthToAssoc => self.auth_to_assoc(guard)?,
            Handler::AuthToInit => self.leave_bss::<Present>(guard)?,
            Handler::AssocToRun => self.assoc_to_run(guard)?,
            Handler::AssocToAuth => self.assoc_to_auth(guard)?,
            Handler::AssocToInit => self.leave_bss::<Authenticated>(guard)?,
            Handler::RunToAssoc => self.run_to_assoc(guard)?,
            Handler::RunToAuth => {
                self.run_to_assoc(guard)?;
                self.commit(guard, Running, Associating, arg);
                self.assoc_to_auth(guard)?;
                self.commit(guard, Associating, Authenticating, arg);
                return Ok(Transition::AlreadyHandled);
            }
            Handler::RunToInit => {
                self.run_to_init(guard, arg)?;
                return Ok(Transition::AlreadyHandled);
            }
            Handler::RunToScan => {
                self.run_to_init(guard, arg)?;
                self.commit(guard, Init, Scanning, arg);
                return Ok(Transition::AlreadyHandled);
            }
        }
        Ok(Transition::Proceed)
    }

    pub fn commit(&self, guard: &mut StaGuard<'_>, from: StaState, to: StaState, arg: i32) {
        guard.state = to;
        self.stack.commit_state(from, to, arg);
        info!("now {:?}", to);
    }

    fn run_to_init(&self, guard: &mut StaGuard<'_>, arg: i32) -> Result<(), Error> {
        self.run_to_assoc(guard)?;
        self.commit(guard, StaState::Running, StaState::Associating, arg);
        self.leave_bss::<Authenticated>(guard)?;
        self.commit(guard, StaState::Associating, StaState::Init, arg);
        Ok(())
    }

    /// The association upward handlers build on: cached, synchronized and still the stack's
    /// BSS.
    fn synced_association(
        &self,
        guard: &StaGuard<'_>,
    ) -> Result<(Arc<PeerContext>, NodeRef), Error> {
        let peer = guard
            .vif
            .cached_assoc
            .clone()
            .ok_or(Error::NotRecoverable("no cached association"))?;
        if !guard.vif.synced {
            return Err(Error::NotRecoverable("cached association is not synchronized"));
        }
        match &guard.bss {
            Some(bss) if bss.id() == peer.node_id => Ok((peer, bss.clone())),
            _ => Err(Error::NotRecoverable("cached association is not the stack's BSS")),
        }
    }

    /// The association downward handlers tear down. It need not be synchronized.
    fn cached_association(
        &self,
        guard: &StaGuard<'_>,
    ) -> Result<(Arc<PeerContext>, NodeRef), Error> {
        let peer = guard
            .vif
            .cached_assoc
            .clone()
            .ok_or(Error::NotRecoverable("no cached association"))?;
        let node = match &guard.bss {
            Some(bss) if bss.id() == peer.node_id => bss.clone(),
            _ => self.nodes.get(peer.node_id).ok_or(Error::NoSuchNode(peer.node_id))?,
        };
        Ok((peer, node))
    }

    fn revalidate<T>(&self, guard: &mut StaGuard<'_>, crossed: Crossed<T>) -> T {
        if !crossed.synced && guard.vif.synced {
            warn!("association changed while unlocked; cached association is now unsynchronized");
            guard.vif.synced = false;
        }
        crossed.value
    }

    fn drain_driver_queues(&self) {
        self.ops.flush(true).or_unsupported_ok().log_err("flush(drop)");
        self.ops.flush(false).or_unsupported_ok().log_err("flush");
    }

    fn to_auth(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let bss = guard.bss.clone().ok_or(Error::NotRecoverable("no BSS selected"))?;
        if guard.vif.cached_assoc.is_some() {
            return Err(Error::NotRecoverable("an association is already cached"));
        }
        let peer = guard.vif.peers.get(&bss.id()).cloned().ok_or(Error::NoSuchNode(bss.id()))?;
        let rx_chains = self.config.rx_chains;
        let duration = self.config.prepare_tx_duration_tu;

        let crossed = self.locks.cross(guard, bss, |drv, node| -> Result<(), Error> {
            let created = drv.acquire_chanctx(self.ops, node.channel(), rx_chains)?;
            let added = Step::<NotPresent>::enter(drv, node.id()).and_then(|step| {
                step.advance(drv, self.ops).map_err(|(_, e)| Error::driver("set_peer_state", e))
            });
            if let Err(e) = added {
                if created {
                    drv.release_chanctx_if_unused(self.ops);
                }
                return Err(e);
            }
            if let Err(e) = self.ops.prepare_tx(&peer.info(), duration).or_unsupported_ok() {
                warn!("prepare_tx for node {} failed: {}", node.id(), e);
            }
            peer.txq.set_acceptable(true);
            Ok(())
        });

        let synced = crossed.synced;
        crossed.value?;
        guard.vif.synced = synced && guard.bss_id() == Some(peer.node_id);
        if !guard.vif.synced {
            warn!("BSS changed while node {} was being added; not synchronized", peer.node_id);
        }
        guard.vif.cached_assoc = Some(peer);
        Ok(())
    }

    fn auth_to_assoc(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let (peer, node) = self.synced_association(guard)?;
        let crossed = self.locks.cross(guard, node, |drv, node| -> Result<(), Error> {
            let _authenticated = Step::<Present>::enter(drv, node.id())?
                .advance(drv, self.ops)
                .map_err(|(_, e)| Error::driver("set_peer_state", e))?;
            if let Err(e) = self.ops.complete_tx(&peer.info()).or_unsupported_ok() {
                warn!("complete_tx for node {} failed: {}", node.id(), e);
            }
            Ok(())
        });
        self.revalidate(guard, crossed)
    }

    fn assoc_to_run(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let (peer, node) = self.synced_association(guard)?;
        let gate = guard.vif.gate.clone();
        let crossed = self.locks.cross(guard, node, |drv, node| -> Result<(), Error> {
            let associated = Step::<Authenticated>::enter(drv, node.id())?
                .advance(drv, self.ops)
                .map_err(|(_, e)| Error::driver("set_peer_state", e))?;

            drv.bss_conf.assoc = true;
            drv.bss_conf.bssid = *node.addr();
            let changes = BssChanges::ASSOC
                | BssChanges::BSSID
                | BssChanges::BASIC_RATES
                | BssChanges::QOS
                | BssChanges::BEACON_INT;
            if let Err(e) = self.ops.bss_info_changed(&drv.bss_conf, changes).or_unsupported_ok() {
                drv.bss_conf.assoc = false;
                let _authenticated = associated.retreat(drv, self.ops);
                return Err(Error::driver("bss_info_changed", e));
            }

            let _authorized = match associated.advance(drv, self.ops) {
                Ok(authorized) => authorized,
                Err((associated, e)) => {
                    drv.bss_conf.assoc = false;
                    self.ops
                        .bss_info_changed(&drv.bss_conf, BssChanges::ASSOC)
                        .or_unsupported_ok()
                        .log_err("bss_info_changed");
                    let _authenticated = associated.retreat(drv, self.ops);
                    return Err(Error::driver("set_peer_state", e));
                }
            };

            if let Some(driver_peer) = drv.peers.get_mut(&node.id()) {
                if !driver_peer.rate_initialized {
                    driver_peer.rate_initialized = true;
                    if let Err(e) = self.ops.rate_init(&peer.info()).or_unsupported_ok() {
                        warn!("rate_init for node {} failed: {}", node.id(), e);
                    }
                }
            }

            gate.wake_all();
            peer.txq.set_acceptable(true);
            peer.txq.kick();
            Ok(())
        });
        self.revalidate(guard, crossed)
    }

    fn run_to_assoc(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let (_, node) = self.cached_association(guard)?;
        let crossed = self.locks.cross(guard, node, |drv, node| -> Result<(), Error> {
            let authorized = Step::<Authorized>::enter(drv, node.id())?;
            self.drain_driver_queues();
            let associated: Step<Associated> = authorized.retreat(drv, self.ops);
            drv.bss_conf.assoc = false;
            drv.bss_conf.aid = 0;
            self.ops
                .bss_info_changed(&drv.bss_conf, BssChanges::ASSOC | BssChanges::AID)
                .or_unsupported_ok()
                .log_err("bss_info_changed");
            let _authenticated = associated.retreat(drv, self.ops);
            Ok(())
        });
        self.revalidate(guard, crossed)
    }

    fn assoc_to_auth(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let (_, node) = self.cached_association(guard)?;
        let crossed = self.locks.cross(guard, node, |drv, node| -> Result<(), Error> {
            let authenticated = Step::<Authenticated>::enter(drv, node.id())?;
            self.drain_driver_queues();
            let _present = authenticated.retreat(drv, self.ops);
            Ok(())
        });
        self.revalidate(guard, crossed)
    }

    /// Removes the cached peer from the driver, starting from sub-state `S`.
    fn leave_bss<S: Teardown>(&self, guard: &mut StaGuard<'_>) -> Result<(), Error> {
        let (peer, node) = self.cached_association(guard)?;
        let crossed = self.locks.cross(guard, node, |drv, node| -> Result<(), Error> {
            let step = Step::<S>::enter(drv, node.id())?;
            peer.txq.flush(FlushMode::Transmit);
            self.drain_driver_queues();
            self.ops.complete_tx(&peer.info()).or_unsupported_ok().log_err("complete_tx");
            let _gone = S::unwind(step, drv, self.ops);
            drv.release_chanctx_if_unused(self.ops);
            Ok(())
        });
        guard.vif.clear_association();
        crossed.value
    }
}
