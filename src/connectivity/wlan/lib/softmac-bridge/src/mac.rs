// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

pub type MacAddr = [u8; 6];

pub const BCAST_ADDR: MacAddr = [0xff; 6];

/// Formats a MAC address as colon-separated hex for log lines.
pub struct MacFmt<'a>(pub &'a MacAddr);

impl fmt::Display for MacFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a[0], a[1], a[2], a[3], a[4], a[5])
    }
}

/// WMM access category. The discriminant doubles as the index into per-AC tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ac {
    Be = 0,
    Bk = 1,
    Vi = 2,
    Vo = 3,
}

impl Ac {
    pub const ALL: [Ac; 4] = [Ac::Be, Ac::Bk, Ac::Vi, Ac::Vo];

    /// Maps an 802.1D user priority (TID 0-7) to its access category.
    /// TIDs outside 0-7 fall back to best effort.
    ///
    /// See IEEE Std 802.11-2016, Table 10-1.
    pub fn from_tid(tid: u8) -> Self {
        match tid {
            1 | 2 => Ac::Bk,
            0 | 3 => Ac::Be,
            4 | 5 => Ac::Vi,
            6 | 7 => Ac::Vo,
            _ => Ac::Be,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}
