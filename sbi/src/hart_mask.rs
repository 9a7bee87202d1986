// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;

/// The set of harts targeted by an IPI or remote fence call: a 64-bit mask in a0 and the hart ID
/// of bit 0 in a1. A base of -1 means the mask bits are absolute hart IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HartMask {
    mask: u64,
    base: u64,
}

impl HartMask {
    /// Base value selecting absolute hart IDs.
    pub const ABSOLUTE_BASE: u64 = u64::MAX;

    /// Creates a mask from the raw a0/a1 values.
    pub fn new(mask: u64, base: u64) -> Self {
        Self { mask, base }
    }

    /// Returns the raw mask bits.
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Returns the raw base hart ID.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns an iterator over the targeted hart IDs. IDs that overflow yield `InvalidParam`.
    pub fn hart_ids(&self) -> HartIds {
        HartIds {
            mask: self.mask,
            base: if self.base == Self::ABSOLUTE_BASE {
                0
            } else {
                self.base
            },
        }
    }
}

/// Iterator over the hart IDs selected by a `HartMask`.
pub struct HartIds {
    mask: u64,
    base: u64,
}

impl Iterator for HartIds {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.mask == 0 {
            return None;
        }
        let bit = self.mask.trailing_zeros() as u64;
        self.mask &= self.mask - 1;
        Some(self.base.checked_add(bit).ok_or(Error::InvalidParam))
    }
}
