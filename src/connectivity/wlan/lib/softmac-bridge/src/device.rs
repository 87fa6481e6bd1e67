// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        channel::{Channel, ChannelChange, ChannelContext},
        key::KeyConfig,
        mac::{Ac, MacAddr},
        node::NodeId,
        packet::TxFrame,
        substate::PeerState,
    },
    bitflags::bitflags,
    thiserror::Error,
};

#[cfg(test)]
pub use test_utils::*;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("not supported")]
    NotSupported,
    #[error("bad state")]
    BadState,
    #[error("I/O error")]
    Io,
    #[error("no resources")]
    NoResources,
    #[error("timed out")]
    TimedOut,
    #[error("driver status {0}")]
    Other(i32),
}

pub type DriverResult<T = ()> = Result<T, DriverError>;

pub trait DriverResultExt {
    /// Optional driver operations report `NotSupported`; callers treat that as a no-op.
    fn or_unsupported_ok(self) -> DriverResult;
}

impl DriverResultExt for DriverResult {
    fn or_unsupported_ok(self) -> DriverResult {
        match self {
            Err(DriverError::NotSupported) => Ok(()),
            other => other,
        }
    }
}

/// What the driver is told about a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub addr: MacAddr,
}

/// EDCA parameters for one access category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueParams {
    pub aifsn: u8,
    pub cw_min: u16,
    pub cw_max: u16,
    /// In units of 32 microseconds.
    pub txop_limit: u16,
    pub acm: bool,
}

/// Per-frame metadata handed to the driver along with the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxMeta {
    pub ac: Ac,
    pub tid: u8,
    pub request_status: bool,
}

bitflags! {
    pub struct BssChanges: u32 {
        const ASSOC = 1 << 0;
        const AID = 1 << 1;
        const BSSID = 1 << 2;
        const BEACON_INT = 1 << 3;
        const DTIM_PERIOD = 1 << 4;
        const BASIC_RATES = 1 << 5;
        const QOS = 1 << 6;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BssConf {
    pub assoc: bool,
    pub aid: u16,
    pub bssid: MacAddr,
    /// In time units (1024 microseconds).
    pub beacon_int: u16,
    pub dtim_period: u8,
    pub basic_rates: Vec<u8>,
    pub qos: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub channels: Vec<Channel>,
    pub ssids: Vec<Vec<u8>>,
    pub active: bool,
}

/// Operations the bridge issues against a SoftMAC driver.
///
/// Every call may block. Optional operations default to `NotSupported`, which callers
/// treat as a successful no-op; any other error is propagated.
pub trait DeviceOps: Send + Sync + 'static {
    fn add_channel(&self, ctx: &ChannelContext) -> DriverResult;
    fn modify_channel(&self, ctx: &ChannelContext, changed: ChannelChange) -> DriverResult;
    fn remove_channel(&self, ctx: &ChannelContext) -> DriverResult;

    /// Moves a peer one step along its driver sub-state.
    fn set_peer_state(&self, peer: &PeerInfo, from: PeerState, to: PeerState) -> DriverResult;

    fn configure_queue(&self, _ac: Ac, _params: &QueueParams) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    /// Drains the hardware queues. With `drop` set, pending frames are discarded.
    fn flush(&self, _drop: bool) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn transmit(&self, frame: TxFrame, meta: &TxMeta) -> DriverResult;

    /// Drivers with per-AC transmit queues take frames through `enqueue_tx` instead of
    /// `transmit`.
    fn has_tx_queues(&self) -> bool {
        false
    }

    fn enqueue_tx(&self, frame: TxFrame, meta: &TxMeta) -> DriverResult {
        self.transmit(frame, meta)
    }

    fn start_scan(&self, _req: &ScanRequest) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn cancel_scan(&self) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn sw_scan_start(&self) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn sw_scan_complete(&self) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    /// Tunes the radio during a software scan.
    fn config_channel(&self, _channel: &Channel) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    /// Gives the driver a chance to stay on channel for the authentication exchange.
    fn prepare_tx(&self, _peer: &PeerInfo, _duration_tu: u16) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn complete_tx(&self, _peer: &PeerInfo) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn bss_info_changed(&self, _conf: &BssConf, _changed: BssChanges) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    fn rate_init(&self, _peer: &PeerInfo) -> DriverResult {
        Err(DriverError::NotSupported)
    }

    /// Installs a key in `slot`, or removes it when `key` is `None`.
    fn set_key(&self, _peer: &PeerInfo, _slot: usize, _key: Option<&KeyConfig>) -> DriverResult {
        Err(DriverError::NotSupported)
    }
}


#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case(Ok(()), Ok(()); "success")]
    #[test_case(Err(DriverError::NotSupported), Ok(()); "not supported is a no-op")]
    #[test_case(Err(DriverError::Io), Err(DriverError::Io); "errors propagate")]
    fn or_unsupported_ok(input: DriverResult, expected: DriverResult) {
        assert_eq!(input.or_unsupported_ok(), expected);
    }

    #[test]
    fn fake_device_records_and_fails() {
        let dev = FakeDevice::new();
        let ctx = ChannelContext::new(Channel::new(1, crate::channel::Cbw::Cbw20), 1);
        dev.fail_on("add_channel", DriverError::NoResources);
        assert_eq!(dev.add_channel(&ctx), Err(DriverError::NoResources));
        assert_eq!(dev.remove_channel(&ctx), Ok(()));
        assert_eq!(
            dev.calls(),
            vec![DeviceCall::AddChannel(ctx.channel), DeviceCall::RemoveChannel(ctx.channel)]
        );
    }

    #[test]
    fn fake_device_hook_runs_once() {
        let dev = FakeDevice::new();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hook_count = count.clone();
        dev.on("flush", move || {
            hook_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        dev.flush(true).expect("flush succeeds");
        dev.flush(false).expect("flush succeeds");
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
