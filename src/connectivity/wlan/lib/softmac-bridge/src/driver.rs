// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        channel::{Channel, ChannelContext},
        device::{BssConf, DeviceOps, DriverResultExt, QueueParams},
        error::Error,
        node::NodeId,
        peer::DriverPeer,
    },
    log::{error, info},
    std::collections::HashMap,
};

/// Everything guarded by the Driver Lock.
pub struct DriverState {
    pub chanctx: Option<ChannelContext>,
    pub peers: HashMap<NodeId, DriverPeer>,
    pub bss_conf: BssConf,
    pub edca: [Option<QueueParams>; 4],
}

impl DriverState {
    pub fn new() -> Self {
        Self { chanctx: None, peers: HashMap::new(), bss_conf: BssConf::default(), edca: [None; 4] }
    }

    /// Makes `channel` the active channel context. Returns true if a context was added,
    /// false if the existing one already matched or was updated in place.
    pub fn acquire_chanctx<D: DeviceOps + ?Sized>(
        &mut self,
        ops: &D,
        channel: Channel,
        rx_chains: u8,
    ) -> Result<bool, Error> {
        let wanted = ChannelContext::new(channel, rx_chains);
        let current = match self.chanctx.take() {
            None => {
                ops.add_channel(&wanted)
                    .or_unsupported_ok()
                    .map_err(|e| Error::driver("add_channel", e))?;
                info!("added channel context {}", wanted.channel);
                self.chanctx = Some(wanted);
                return Ok(true);
            }
            Some(current) => current,
        };

        let changed = current.diff(&wanted);
        if changed.is_empty() {
            self.chanctx = Some(current);
            return Ok(false);
        }
        if ChannelContext::can_update_in_place(changed) {
            if let Err(e) = ops.modify_channel(&wanted, changed).or_unsupported_ok() {
                self.chanctx = Some(current);
                return Err(Error::driver("modify_channel", e));
            }
            info!("updated channel context {} ({:?})", wanted.channel, changed);
            self.chanctx = Some(wanted);
            return Ok(false);
        }

        if let Err(e) = ops.remove_channel(&current).or_unsupported_ok() {
            error!("failed to remove channel context {}: {}", current.channel, e);
        }
        ops.add_channel(&wanted).or_unsupported_ok().map_err(|e| Error::driver("add_channel", e))?;
        info!("switched channel context {} -> {}", current.channel, wanted.channel);
        self.chanctx = Some(wanted);
        Ok(true)
    }

    pub fn any_peer_present(&self) -> bool {
        self.peers.values().any(DriverPeer::is_present)
    }

    /// Removes the channel context once no peer is left in the driver. Returns true if it was
    /// removed.
    pub fn release_chanctx_if_unused<D: DeviceOps + ?Sized>(&mut self, ops: &D) -> bool {
        if self.any_peer_present() {
            return false;
        }
        match self.chanctx.take() {
            Some(ctx) => {
                if let Err(e) = ops.remove_channel(&ctx).or_unsupported_ok() {
                    error!("failed to remove channel context {}: {}", ctx.channel, e);
                }
                info!("released channel context {}", ctx.channel);
                true
            }
            None => false,
        }
    }
}

impl Default for DriverState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::{Cbw, ChannelChange},
            device::{DeviceCall, DriverError, FakeDevice},
            substate::PeerState,
        },
        assert_matches::assert_matches,
    };

    #[test]
    fn first_acquire_adds() {
        let dev = FakeDevice::new();
        let mut drv = DriverState::new();
        let chan = Channel::new(36, Cbw::Cbw40);
        assert!(drv.acquire_chanctx(&dev, chan, 2).expect("add succeeds"));
        assert_eq!(drv.chanctx.as_ref().map(|c| c.rx_chains_static), Some(2));
        assert_eq!(dev.calls(), vec![DeviceCall::AddChannel(chan)]);
        assert!(!drv.acquire_chanctx(&dev, chan, 2).expect("no-op succeeds"));
        assert_eq!(dev.calls().len(), 1);
    }

    #[test]
    fn width_change_is_in_place() {
        let dev = FakeDevice::new();
        let mut drv = DriverState::new();
        drv.acquire_chanctx(&dev, Channel::new(36, Cbw::Cbw20), 1).expect("add succeeds");
        let wider = Channel::new(36, Cbw::Cbw80);
        assert!(!drv.acquire_chanctx(&dev, wider, 1).expect("modify succeeds"));
        assert_eq!(dev.calls()[1], DeviceCall::ModifyChannel(wider, ChannelChange::WIDTH));
        assert_eq!(drv.chanctx.as_ref().map(|c| c.channel), Some(wider));
    }

    #[test]
    fn failed_modify_keeps_old_context() {
        let dev = FakeDevice::new();
        let mut drv = DriverState::new();
        let chan = Channel::new(36, Cbw::Cbw20);
        drv.acquire_chanctx(&dev, chan, 1).expect("add succeeds");
        dev.fail_on("modify_channel", DriverError::Io);
        assert_matches!(
            drv.acquire_chanctx(&dev, chan, 2),
            Err(Error::Driver { op: "modify_channel", source: DriverError::Io })
        );
        assert_eq!(drv.chanctx.as_ref().map(|c| c.rx_chains_static), Some(1));
    }

    #[test]
    fn channel_switch_replaces_context() {
        let dev = FakeDevice::new();
        let mut drv = DriverState::new();
        let old = Channel::new(1, Cbw::Cbw20);
        let new = Channel::new(149, Cbw::Cbw20);
        drv.acquire_chanctx(&dev, old, 1).expect("add succeeds");
        assert!(drv.acquire_chanctx(&dev, new, 1).expect("switch succeeds"));
        assert_eq!(
            dev.calls(),
            vec![
                DeviceCall::AddChannel(old),
                DeviceCall::RemoveChannel(old),
                DeviceCall::AddChannel(new)
            ]
        );
    }

    #[test]
    fn release_waits_for_last_peer() {
        let dev = FakeDevice::new();
        let mut drv = DriverState::new();
        drv.acquire_chanctx(&dev, Channel::new(6, Cbw::Cbw20), 1).expect("add succeeds");
        let mut peer = DriverPeer::new([1; 6]);
        peer.substate = PeerState::Present;
        drv.peers.insert(1, peer);
        assert!(!drv.release_chanctx_if_unused(&dev));
        drv.peers.get_mut(&1).expect("peer exists").substate = PeerState::NotPresent;
        assert!(drv.release_chanctx_if_unused(&dev));
        assert!(drv.chanctx.is_none());
        assert!(!drv.release_chanctx_if_unused(&dev));
    }
}
