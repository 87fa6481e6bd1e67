// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::error::Error;

pub const MAX_KEY_SLOTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cipher {
    Wep40,
    Wep104,
    Tkip,
    Ccmp128,
    Gcmp256,
    BipCmac128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Pairwise,
    Group,
    Igtk,
}

/// Key material is opaque here; formatting it for hardware offload is the driver's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyConfig {
    pub cipher: Cipher,
    pub key_type: KeyType,
    pub key_idx: u8,
    pub key: Vec<u8>,
    pub rsc: u64,
}

/// A peer's installed keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySlots {
    slots: [Option<KeyConfig>; MAX_KEY_SLOTS],
}

impl KeySlots {
    pub fn check_slot(slot: usize) -> Result<(), Error> {
        if slot < MAX_KEY_SLOTS {
            Ok(())
        } else {
            Err(Error::InvalidKeySlot(slot))
        }
    }

    pub fn install(&mut self, slot: usize, key: KeyConfig) -> Result<Option<KeyConfig>, Error> {
        Self::check_slot(slot)?;
        Ok(self.slots[slot].replace(key))
    }

    pub fn remove(&mut self, slot: usize) -> Result<Option<KeyConfig>, Error> {
        Self::check_slot(slot)?;
        Ok(self.slots[slot].take())
    }

    pub fn get(&self, slot: usize) -> Option<&KeyConfig> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    pub fn installed(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    fn ccmp() -> KeyConfig {
        KeyConfig {
            cipher: Cipher::Ccmp128,
            key_type: KeyType::Pairwise,
            key_idx: 0,
            key: vec![0xaa; 16],
            rsc: 0,
        }
    }

    #[test]
    fn install_and_remove() {
        let mut slots = KeySlots::default();
        assert_eq!(slots.install(1, ccmp()).expect("valid slot"), None);
        assert_eq!(slots.installed(), 1);
        assert_eq!(slots.get(1), Some(&ccmp()));
        assert_eq!(slots.remove(1).expect("valid slot"), Some(ccmp()));
        assert_eq!(slots.installed(), 0);
    }

    #[test]
    fn out_of_range_slot() {
        let mut slots = KeySlots::default();
        assert_matches!(slots.install(MAX_KEY_SLOTS, ccmp()), Err(Error::InvalidKeySlot(4)));
        assert_eq!(slots.get(MAX_KEY_SLOTS), None);
    }

    #[test]
    fn clear_drops_all() {
        let mut slots = KeySlots::default();
        slots.install(0, ccmp()).expect("valid slot");
        slots.install(3, ccmp()).expect("valid slot");
        slots.clear();
        assert_eq!(slots, KeySlots::default());
    }
}
