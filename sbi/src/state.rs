// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::EXT_HART_STATE;

const FID_HART_START: u64 = 0;
const FID_HART_STOP: u64 = 1;
const FID_HART_STATUS: u64 = 2;
const FID_HART_SUSPEND: u64 = 3;

/// Hart State Management (HSM) calls. Hart IDs are the caller VM's vCPU IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateFunction {
    /// Brings `hart_id` up at `start_addr` with a0 = `hart_id` and a1 = `opaque`.
    HartStart {
        hart_id: u64,
        start_addr: u64,
        opaque: u64,
    },
    /// Stops the calling hart. Doesn't return on success.
    HartStop,
    HartStatus {
        hart_id: u64,
    },
    /// Suspends the calling hart. `resume_addr` and `opaque` only matter for non-retentive
    /// suspend types.
    HartSuspend {
        suspend_type: u32,
        resume_addr: u64,
        opaque: u64,
    },
}

/// Value returned by `HartStatus`. Virtual harts start and stop synchronously, so the
/// transitional states are never reported.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HartState {
    Started = 0,
    Stopped = 1,
}

impl StateFunction {
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        let [a0, a1, a2, ..] = *args;
        let function = match args[6] {
            FID_HART_START => StateFunction::HartStart {
                hart_id: a0,
                start_addr: a1,
                opaque: a2,
            },
            FID_HART_STOP => StateFunction::HartStop,
            FID_HART_STATUS => StateFunction::HartStatus { hart_id: a0 },
            FID_HART_SUSPEND => StateFunction::HartSuspend {
                suspend_type: a0 as u32,
                resume_addr: a1,
                opaque: a2,
            },
            _ => return Err(Error::NotSupported),
        };
        Ok(function)
    }

    // The (a0, a1, a2) arguments of the call.
    fn args(&self) -> (u64, u64, u64) {
        match *self {
            StateFunction::HartStart {
                hart_id,
                start_addr,
                opaque,
            } => (hart_id, start_addr, opaque),
            StateFunction::HartStop => (0, 0, 0),
            StateFunction::HartStatus { hart_id } => (hart_id, 0, 0),
            StateFunction::HartSuspend {
                suspend_type,
                resume_addr,
                opaque,
            } => (suspend_type as u64, resume_addr, opaque),
        }
    }
}

impl SbiFunction for StateFunction {
    const EXTENSION: u64 = EXT_HART_STATE;

    fn a6(&self) -> u64 {
        match self {
            StateFunction::HartStart { .. } => FID_HART_START,
            StateFunction::HartStop => FID_HART_STOP,
            StateFunction::HartStatus { .. } => FID_HART_STATUS,
            StateFunction::HartSuspend { .. } => FID_HART_SUSPEND,
        }
    }

    fn a0(&self) -> u64 {
        self.args().0
    }

    fn a1(&self) -> u64 {
        self.args().1
    }

    fn a2(&self) -> u64 {
        self.args().2
    }
}
