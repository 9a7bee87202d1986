// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Instruction cache and guest TLB maintenance for the current hart.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;

// Safety: none of these instructions access memory; their only side-effect is to invalidate
// cached translations or instructions on the executing hart.

/// Synchronizes the instruction and data streams of the current hart.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn fence_i() {
    unsafe { asm!("fence.i") };
}

/// Flushes every VS-stage translation for the current VMID.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn hfence_vvma_all() {
    unsafe { asm!("hfence.vvma zero, zero") };
}

/// Flushes the VS-stage translations of guest virtual address `vaddr` for all ASIDs.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn hfence_vvma_addr(vaddr: u64) {
    unsafe { asm!("hfence.vvma {}, zero", in(reg) vaddr) };
}

/// Flushes every VS-stage translation tagged with `asid`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn hfence_vvma_asid(asid: u64) {
    unsafe { asm!("hfence.vvma zero, {}", in(reg) asid) };
}

/// Flushes the VS-stage translation of `vaddr` tagged with `asid`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn hfence_vvma_addr_asid(vaddr: u64, asid: u64) {
    unsafe { asm!("hfence.vvma {}, {}", in(reg) vaddr, in(reg) asid) };
}

// Make fence instructions a no-op for testing.
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn fence_i() {}
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn hfence_vvma_all() {}
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn hfence_vvma_addr(_vaddr: u64) {}
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn hfence_vvma_asid(_asid: u64) {}
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn hfence_vvma_addr_asid(_vaddr: u64, _asid: u64) {}
