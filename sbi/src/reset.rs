// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::EXT_RESET;

/// Type of system reset requested by the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetType {
    Shutdown,
    ColdReboot,
    WarmReboot,
}

impl ResetType {
    fn from_reg(a0: u64) -> Result<Self> {
        use ResetType::*;
        Ok(match a0 {
            0 => Shutdown,
            1 => ColdReboot,
            2 => WarmReboot,
            _ => return Err(Error::InvalidParam),
        })
    }
}

/// Reason given for a system reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    NoReason,
    SystemFailure,
    Vendor(u32),
}

impl ResetReason {
    fn from_reg(a1: u64) -> Result<Self> {
        use ResetReason::*;
        Ok(match a1 {
            0 => NoReason,
            1 => SystemFailure,
            v @ 0xf000_0000..=0xffff_ffff => Vendor(v as u32),
            _ => return Err(Error::InvalidParam),
        })
    }

    fn to_reg(self) -> u64 {
        match self {
            ResetReason::NoReason => 0,
            ResetReason::SystemFailure => 1,
            ResetReason::Vendor(v) => v as u64,
        }
    }
}

/// Functions defined for the System Reset extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetFunction {
    /// Resets or shuts down the whole system.
    Reset {
        reset_type: ResetType,
        reason: ResetReason,
    },
}

impl ResetFunction {
    /// Returns a request to shut the system down.
    pub fn shutdown() -> Self {
        ResetFunction::Reset {
            reset_type: ResetType::Shutdown,
            reason: ResetReason::NoReason,
        }
    }

    /// Attempts to parse `Self` from the passed in `a0-a7`.
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        match args[6] {
            0 => Ok(ResetFunction::Reset {
                reset_type: ResetType::from_reg(args[0])?,
                reason: ResetReason::from_reg(args[1])?,
            }),
            _ => Err(Error::NotSupported),
        }
    }
}

impl SbiFunction for ResetFunction {
    const EXTENSION: u64 = EXT_RESET;

    fn a6(&self) -> u64 {
        0
    }

    fn a0(&self) -> u64 {
        let ResetFunction::Reset { reset_type, .. } = self;
        *reset_type as u64
    }

    fn a1(&self) -> u64 {
        let ResetFunction::Reset { reason, .. } = self;
        reason.to_reg()
    }
}
