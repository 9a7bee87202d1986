// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::hart_mask::HartMask;
use crate::EXT_RFENCE;

/// Functions defined for the Remote Fence extension. The hypervisor-level fences (function IDs
/// 3 to 6) are only meaningful to a nested hypervisor and are not supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteFenceFunction {
    /// Executes `fence.i` on the remote harts.
    FenceI(HartMask),
    /// Executes `sfence.vma` on the remote harts for the given virtual address range.
    SfenceVma {
        harts: HartMask,
        start: u64,
        size: u64,
    },
    /// Executes `sfence.vma` on the remote harts for the given range, limited to one ASID.
    SfenceVmaAsid {
        harts: HartMask,
        start: u64,
        size: u64,
        asid: u64,
    },
}

impl RemoteFenceFunction {
    /// Attempts to parse `Self` from the passed in `a0-a7`.
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        use RemoteFenceFunction::*;
        let harts = HartMask::new(args[0], args[1]);
        match args[6] {
            0 => Ok(FenceI(harts)),
            1 => Ok(SfenceVma {
                harts,
                start: args[2],
                size: args[3],
            }),
            2 => Ok(SfenceVmaAsid {
                harts,
                start: args[2],
                size: args[3],
                asid: args[4],
            }),
            _ => Err(Error::NotSupported),
        }
    }

    /// Returns the harts the fence applies to.
    pub fn harts(&self) -> HartMask {
        use RemoteFenceFunction::*;
        match self {
            FenceI(harts) | SfenceVma { harts, .. } | SfenceVmaAsid { harts, .. } => *harts,
        }
    }
}

impl SbiFunction for RemoteFenceFunction {
    const EXTENSION: u64 = EXT_RFENCE;

    fn a6(&self) -> u64 {
        use RemoteFenceFunction::*;
        match self {
            FenceI(_) => 0,
            SfenceVma { .. } => 1,
            SfenceVmaAsid { .. } => 2,
        }
    }

    fn a0(&self) -> u64 {
        self.harts().mask()
    }

    fn a1(&self) -> u64 {
        self.harts().base()
    }

    fn a2(&self) -> u64 {
        use RemoteFenceFunction::*;
        match self {
            SfenceVma { start, .. } | SfenceVmaAsid { start, .. } => *start,
            FenceI(_) => 0,
        }
    }

    fn a3(&self) -> u64 {
        use RemoteFenceFunction::*;
        match self {
            SfenceVma { size, .. } | SfenceVmaAsid { size, .. } => *size,
            FenceI(_) => 0,
        }
    }

    fn a4(&self) -> u64 {
        match self {
            RemoteFenceFunction::SfenceVmaAsid { asid, .. } => *asid,
            _ => 0,
        }
    }
}
