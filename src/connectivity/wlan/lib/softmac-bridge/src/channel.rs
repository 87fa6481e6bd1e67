// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {bitflags::bitflags, std::fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cbw {
    Cbw20,
    Cbw40,
    Cbw40Below,
    Cbw80,
    Cbw160,
    Cbw80P80,
}

impl Cbw {
    pub fn mhz(self) -> u16 {
        match self {
            Cbw::Cbw20 => 20,
            Cbw::Cbw40 | Cbw::Cbw40Below => 40,
            Cbw::Cbw80 => 80,
            Cbw::Cbw160 | Cbw::Cbw80P80 => 160,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Channel {
    pub primary: u8,
    pub cbw: Cbw,
    pub secondary80: u8,
}

impl Channel {
    pub const fn new(primary: u8, cbw: Cbw) -> Self {
        Self { primary, cbw, secondary80: 0 }
    }

    pub fn is_2ghz(&self) -> bool {
        self.primary >= 1 && self.primary <= 14
    }

    pub fn is_5ghz(&self) -> bool {
        self.primary >= 36 && self.primary <= 177
    }

    /// Channels in the 5 GHz UNII-2 and UNII-2e bands require radar detection.
    pub fn is_dfs(&self) -> bool {
        self.primary >= 52 && self.primary <= 144
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cbw {
            Cbw::Cbw80P80 => write!(f, "{}+{}P80", self.primary, self.secondary80),
            Cbw::Cbw40Below => write!(f, "{}-", self.primary),
            Cbw::Cbw40 => write!(f, "{}+", self.primary),
            cbw => write!(f, "{}/{}", self.primary, cbw.mhz()),
        }
    }
}

bitflags! {
    /// Fields of a channel context that changed in an in-place update.
    pub struct ChannelChange: u32 {
        const CHANNEL = 1 << 0;
        const WIDTH = 1 << 1;
        const RX_CHAINS = 1 << 2;
        const RADAR = 1 << 3;
    }
}

/// One active radio configuration. A single context is shared by every peer associated
/// through the interface; it is only mutated under the Driver Lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelContext {
    pub channel: Channel,
    pub rx_chains_static: u8,
    pub rx_chains_dynamic: u8,
    pub radar_enabled: bool,
}

impl ChannelContext {
    pub fn new(channel: Channel, rx_chains: u8) -> Self {
        Self {
            channel,
            rx_chains_static: rx_chains,
            rx_chains_dynamic: rx_chains,
            radar_enabled: channel.is_dfs(),
        }
    }

    pub fn bandwidth(&self) -> Cbw {
        self.channel.cbw
    }

    /// Returns the set of fields that differ between `self` and `other`.
    pub fn diff(&self, other: &ChannelContext) -> ChannelChange {
        let mut changed = ChannelChange::empty();
        if self.channel.primary != other.channel.primary
            || self.channel.secondary80 != other.channel.secondary80
        {
            changed |= ChannelChange::CHANNEL;
        }
        if self.channel.cbw != other.channel.cbw {
            changed |= ChannelChange::WIDTH;
        }
        if self.rx_chains_static != other.rx_chains_static
            || self.rx_chains_dynamic != other.rx_chains_dynamic
        {
            changed |= ChannelChange::RX_CHAINS;
        }
        if self.radar_enabled != other.radar_enabled {
            changed |= ChannelChange::RADAR;
        }
        changed
    }

    /// A context can be updated in place when only its width or chain requirements change.
    pub fn can_update_in_place(changed: ChannelChange) -> bool {
        !changed.contains(ChannelChange::CHANNEL)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case(1, false; "2ghz")]
    #[test_case(36, false; "unii 1")]
    #[test_case(52, true; "unii 2 low edge")]
    #[test_case(100, true; "unii 2e")]
    #[test_case(144, true; "unii 2e high edge")]
    #[test_case(149, false; "unii 3")]
    fn radar_follows_dfs(primary: u8, radar: bool) {
        let ctx = ChannelContext::new(Channel::new(primary, Cbw::Cbw20), 1);
        assert_eq!(ctx.radar_enabled, radar);
    }

    #[test]
    fn diff_width_only() {
        let a = ChannelContext::new(Channel::new(36, Cbw::Cbw20), 1);
        let b = ChannelContext::new(Channel::new(36, Cbw::Cbw80), 1);
        let changed = a.diff(&b);
        assert_eq!(changed, ChannelChange::WIDTH);
        assert!(ChannelContext::can_update_in_place(changed));
    }

    #[test]
    fn diff_channel_and_chains() {
        let a = ChannelContext::new(Channel::new(1, Cbw::Cbw20), 1);
        let b = ChannelContext::new(Channel::new(100, Cbw::Cbw20), 2);
        let changed = a.diff(&b);
        assert!(changed.contains(ChannelChange::CHANNEL));
        assert!(changed.contains(ChannelChange::RX_CHAINS));
        assert!(changed.contains(ChannelChange::RADAR));
        assert!(!ChannelContext::can_update_in_place(changed));
    }

    #[test]
    fn same_context_has_no_diff() {
        let a = ChannelContext::new(Channel::new(6, Cbw::Cbw40Below), 2);
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn display() {
        assert_eq!(Channel::new(6, Cbw::Cbw20).to_string(), "6/20");
        assert_eq!(Channel::new(6, Cbw::Cbw40Below).to_string(), "6-");
        let channel = Channel { primary: 36, cbw: Cbw::Cbw80P80, secondary80: 106 };
        assert_eq!(channel.to_string(), "36+106P80");
    }
}
