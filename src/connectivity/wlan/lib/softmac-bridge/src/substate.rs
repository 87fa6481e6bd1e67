// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Driver-visible peer sub-states.
//!
//! A peer moves `NotPresent -> Present -> Authenticated -> Associated -> Authorized` and back,
//! one step at a time. [`Step<S>`] is a cursor over the peer's current sub-state: it only
//! offers `advance` and `retreat` toward the adjacent states, so a handler cannot skip one.

use {
    crate::{
        device::{DeviceOps, DriverError, DriverResultExt, PeerInfo},
        driver::DriverState,
        error::Error,
        mac::MacFmt,
        node::NodeId,
    },
    log::{debug, error},
    std::{fmt, marker::PhantomData},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerState {
    NotPresent,
    Present,
    Authenticated,
    Associated,
    Authorized,
}

impl PeerState {
    /// True if `to` is adjacent to `self`.
    pub fn is_adjacent(self, to: PeerState) -> bool {
        (self as i8 - to as i8).abs() == 1
    }
}

mod sealed {
    pub trait Sealed {}
}

pub trait SubState: sealed::Sealed {
    const STATE: PeerState;
}

pub trait Advance: SubState {
    type Next: SubState;
}

pub trait Retreat: SubState {
    type Prev: SubState;
}

macro_rules! substates {
    ($($name:ident),+ $(,)?) => {
        $(
            pub struct $name;
            impl sealed::Sealed for $name {}
            impl SubState for $name {
                const STATE: PeerState = PeerState::$name;
            }
        )+
    };
}

substates!(NotPresent, Present, Authenticated, Associated, Authorized);

macro_rules! edge {
    ($lower:ident <-> $upper:ident) => {
        impl Advance for $lower {
            type Next = $upper;
        }
        impl Retreat for $upper {
            type Prev = $lower;
        }
    };
}

edge!(NotPresent <-> Present);
edge!(Present <-> Authenticated);
edge!(Authenticated <-> Associated);
edge!(Associated <-> Authorized);

/// Proof that the driver peer `id` is currently in sub-state `S`. Only valid while the
/// Driver Lock that produced it is held.
#[must_use]
pub struct Step<S: SubState> {
    id: NodeId,
    _state: PhantomData<S>,
}

impl<S: SubState> Step<S> {
    /// Asserts that peer `id` is in sub-state `S`. A mismatch means a handler ran from the
    /// wrong table position and is fatal.
    pub fn enter(drv: &DriverState, id: NodeId) -> Result<Self, Error> {
        let peer = drv.peers.get(&id).ok_or(Error::PeerNotInDriver(id))?;
        assert_eq!(
            peer.substate,
            S::STATE,
            "peer {} ({}) entered handler in the wrong sub-state",
            id,
            MacFmt(&peer.addr)
        );
        Ok(Self { id, _state: PhantomData })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn peer_info(&self, drv: &DriverState) -> Option<PeerInfo> {
        drv.peers.get(&self.id).map(|peer| PeerInfo { id: self.id, addr: peer.addr })
    }

    fn record<T: SubState>(self, drv: &mut DriverState) -> Step<T> {
        if let Some(peer) = drv.peers.get_mut(&self.id) {
            peer.substate = T::STATE;
            match T::STATE {
                PeerState::Present if S::STATE == PeerState::NotPresent => peer.added = true,
                PeerState::NotPresent => {
                    peer.added = false;
                    peer.rate_initialized = false;
                    peer.keys.clear();
                }
                _ => (),
            }
        }
        debug!("peer {}: {:?} -> {:?}", self.id, S::STATE, T::STATE);
        Step { id: self.id, _state: PhantomData }
    }
}

impl<S: SubState> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({}, {:?})", self.id, S::STATE)
    }
}

impl<S: Advance> Step<S> {
    /// Moves the peer one step up. On failure the peer stays where it was and the cursor is
    /// handed back so the caller can unwind.
    pub fn advance<D: DeviceOps + ?Sized>(
        self,
        drv: &mut DriverState,
        ops: &D,
    ) -> Result<Step<S::Next>, (Self, DriverError)> {
        let info = match self.peer_info(drv) {
            Some(info) => info,
            None => return Err((self, DriverError::BadState)),
        };
        match ops.set_peer_state(&info, S::STATE, <S::Next as SubState>::STATE).or_unsupported_ok()
        {
            Ok(()) => Ok(self.record(drv)),
            Err(e) => Err((self, e)),
        }
    }
}

impl<S: Retreat> Step<S> {
    /// Moves the peer one step down. A driver failure is logged and the step is taken
    /// anyway.
    pub fn retreat<D: DeviceOps + ?Sized>(self, drv: &mut DriverState, ops: &D) -> Step<S::Prev> {
        if let Some(info) = self.peer_info(drv) {
            if let Err(e) = ops
                .set_peer_state(&info, S::STATE, <S::Prev as SubState>::STATE)
                .or_unsupported_ok()
            {
                error!(
                    "peer {}: {:?} -> {:?} failed, continuing: {}",
                    self.id,
                    S::STATE,
                    <S::Prev as SubState>::STATE,
                    e
                );
            }
        }
        self.record(drv)
    }
}
