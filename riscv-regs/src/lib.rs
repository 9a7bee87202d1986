// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#![no_std]

//! Crate for handling RV64 registers as seen from an HS-mode hypervisor.
//! regs - RV64 general purpose and floating point register files.
//! csrs - (H)S-mode and VS-mode CSRs, trap causes and the `CsrAccess` abstraction.
//! decode - classification of trapping guest loads and stores.
//! fence - TLB and instruction cache maintenance for guest address spaces.

mod csrs;
mod decode;
pub mod fence;
mod regs;

pub use csrs::*;
pub use decode::*;
pub use regs::*;
