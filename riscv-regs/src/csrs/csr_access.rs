// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `ReadWriteRiscvCsr` type for RISC-V CSRs.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;
use core::marker::PhantomData;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::RegisterLongName;

/// Read/Write register with CSR number `V`.
#[derive(Copy, Clone)]
pub struct ReadWriteRiscvCsr<R: RegisterLongName, const V: u16> {
    associated_register: PhantomData<R>,
}

impl<R: RegisterLongName, const V: u16> ReadWriteRiscvCsr<R, V> {
    pub const fn new() -> Self {
        ReadWriteRiscvCsr {
            associated_register: PhantomData,
        }
    }
}

impl<R: RegisterLongName, const V: u16> Default for ReadWriteRiscvCsr<R, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RegisterLongName, const V: u16> Readable for ReadWriteRiscvCsr<R, V> {
    type T = u64;
    type R = R;

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[inline]
    fn get(&self) -> u64 {
        let r: u64;
        // Safety: CSR accesses have no memory side-effects.
        unsafe {
            asm!("csrr {rd}, {csr}", rd = out(reg) r, csr = const V);
        }
        r
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn get(&self) -> u64 {
        unimplemented!("reading RISC-V CSR {}", V)
    }
}

impl<R: RegisterLongName, const V: u16> Writeable for ReadWriteRiscvCsr<R, V> {
    type T = u64;
    type R = R;

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[inline]
    fn set(&self, val_to_set: u64) {
        // Safety: CSR accesses have no memory side-effects.
        unsafe {
            asm!("csrw {csr}, {rs}", rs = in(reg) val_to_set, csr = const V);
        }
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    fn set(&self, _val_to_set: u64) {
        unimplemented!("writing RISC-V CSR {}", V)
    }
}
