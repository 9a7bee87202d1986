// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Core of a virtual machine monitor for RISC-V harts with the H-extension.
//!
//! A `Vm` owns a sparse table of virtual harts (`VmCpu`s). Each call to `Vm::run` enters the
//! guest on the calling host thread, services the traps that can be handled without leaving the
//! hypervisor (remote fences, timer and IPI SBI calls, WFI, second-stage faults on backed memory,
//! suspend) and returns a `VmExit` for everything else. `ExitDispatcher` is the userspace side of
//! that boundary: it services BASE, HSM, SRST and the legacy console calls.
//!
//! The host is abstracted by `Platform` (host CPU identity, rendezvous IPIs, wait events,
//! one-shot timers) and `HartArch` (CSR access, guest entry, FPU switching, TLB maintenance).
//! Guest memory and the interrupt controller are reached through `GuestMemory` and
//! `InterruptController`.

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

mod config;
mod cpu_set;
mod dispatch;
mod error;
mod exit;
mod fence;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod hart;
mod hyp_ctx;
mod platform;
mod sbi_emul;
mod stats;
#[cfg(test)]
mod test_stubs;
mod trap;
mod vm;
mod vm_cpu;
mod vtimer;
mod world_switch;

pub use config::*;
pub use cpu_set::*;
pub use dispatch::*;
pub use error::*;
pub use exit::*;
pub use fence::{process_fences, FenceQueue, FenceRequest, FENCE_QUEUE_CAPACITY};
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use hart::RiscvHart;
pub use hyp_ctx::*;
pub use platform::*;
pub use stats::*;
pub use vm::Vm;
pub use vm_cpu::{VcpuState, VmCpu};
pub use vtimer::VirtualTimer;

/// Index of a virtual hart within its VM. Also its SBI hart ID.
pub type VcpuId = usize;

/// Index of a physical host CPU.
pub type HostCpuId = usize;
