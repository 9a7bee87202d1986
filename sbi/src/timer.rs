// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::EXT_TIME;

/// Functions defined for the Timer extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerFunction {
    /// Programs the next timer event for the calling hart at the absolute time `stime_value`,
    /// in timebase ticks. Also clears any pending timer interrupt.
    SetTimer(u64),
}

impl TimerFunction {
    /// Attempts to parse `Self` from the passed in `a0-a7`.
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        match args[6] {
            0 => Ok(TimerFunction::SetTimer(args[0])),
            _ => Err(Error::NotSupported),
        }
    }
}

impl SbiFunction for TimerFunction {
    const EXTENSION: u64 = EXT_TIME;

    fn a6(&self) -> u64 {
        0
    }

    fn a0(&self) -> u64 {
        let TimerFunction::SetTimer(stime_value) = self;
        *stime_value
    }
}
