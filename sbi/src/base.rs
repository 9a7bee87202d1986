// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;
use crate::EXT_BASE;

const FID_SPEC_VERSION: u64 = 0;
const FID_IMPL_ID: u64 = 1;
const FID_IMPL_VERSION: u64 = 2;
const FID_PROBE_EXTENSION: u64 = 3;
const FID_MVENDORID: u64 = 4;
const FID_MARCHID: u64 = 5;
const FID_MIMPID: u64 = 6;

/// Base extension calls. Every SBI implementation answers these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseFunction {
    GetSpecificationVersion,
    GetImplementationID,
    GetImplementationVersion,
    /// Asks whether the extension in a0 is available; 0 means it isn't.
    ProbeSbiExtension(u64),
    /// `mvendorid` as seen by the caller.
    GetMachineVendorID,
    /// `marchid` as seen by the caller.
    GetMachineArchitectureID,
    /// `mimpid` as seen by the caller.
    GetMachineImplementationID,
}

impl BaseFunction {
    pub(crate) fn from_regs(args: &[u64; 8]) -> Result<Self> {
        let function = match args[6] {
            FID_SPEC_VERSION => BaseFunction::GetSpecificationVersion,
            FID_IMPL_ID => BaseFunction::GetImplementationID,
            FID_IMPL_VERSION => BaseFunction::GetImplementationVersion,
            FID_PROBE_EXTENSION => BaseFunction::ProbeSbiExtension(args[0]),
            FID_MVENDORID => BaseFunction::GetMachineVendorID,
            FID_MARCHID => BaseFunction::GetMachineArchitectureID,
            FID_MIMPID => BaseFunction::GetMachineImplementationID,
            _ => return Err(Error::NotSupported),
        };
        Ok(function)
    }
}

impl SbiFunction for BaseFunction {
    const EXTENSION: u64 = EXT_BASE;

    fn a6(&self) -> u64 {
        match self {
            BaseFunction::GetSpecificationVersion => FID_SPEC_VERSION,
            BaseFunction::GetImplementationID => FID_IMPL_ID,
            BaseFunction::GetImplementationVersion => FID_IMPL_VERSION,
            BaseFunction::ProbeSbiExtension(_) => FID_PROBE_EXTENSION,
            BaseFunction::GetMachineVendorID => FID_MVENDORID,
            BaseFunction::GetMachineArchitectureID => FID_MARCHID,
            BaseFunction::GetMachineImplementationID => FID_MIMPID,
        }
    }

    fn a0(&self) -> u64 {
        match self {
            BaseFunction::ProbeSbiExtension(ext) => *ext,
            _ => 0,
        }
    }
}
