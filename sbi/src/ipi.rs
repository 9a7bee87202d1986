// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::hart_mask::HartMask;
use crate::EXT_IPI;

/// Functions defined for the IPI extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpiFunction {
    /// Sends a supervisor software interrupt to every hart in the mask.
    SendIpi(HartMask),
}

impl IpiFunction {
    /// Attempts to parse `Self` from the passed in `a0-a7`.
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        match args[6] {
            0 => Ok(IpiFunction::SendIpi(HartMask::new(args[0], args[1]))),
            _ => Err(Error::NotSupported),
        }
    }
}

impl SbiFunction for IpiFunction {
    const EXTENSION: u64 = EXT_IPI;

    fn a6(&self) -> u64 {
        0
    }

    fn a0(&self) -> u64 {
        let IpiFunction::SendIpi(harts) = self;
        harts.mask()
    }

    fn a1(&self) -> u64 {
        let IpiFunction::SendIpi(harts) = self;
        harts.base()
    }
}
