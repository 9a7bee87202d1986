// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Services the VMM core consumes from its host and its collaborators.

use alloc::sync::Arc;
use core::time::Duration;

use riscv_regs::{CsrAccess, Exception};

use crate::cpu_set::CpuSet;
use crate::hyp_ctx::VmCpuRegisters;
use crate::{HostCpuId, VcpuId};

/// A wakeup channel a host thread can block on.
///
/// Notifications are latched: a `notify` that happens while nobody is waiting makes the next
/// `wait_timeout` return immediately.
pub trait WaitEvent: Send + Sync {
    /// Blocks until notified or until `timeout` elapses. May return early.
    fn wait_timeout(&self, timeout: Duration);

    /// Wakes the waiter, or latches the notification if there is none.
    fn notify(&self);
}

/// Called from host timer context when a one-shot timer fires.
pub trait TimerCallback: Send + Sync {
    fn expired(&self);
}

/// A cancellable one-shot host timer.
pub trait OneShotTimer: Send + Sync {
    /// Arms the timer to invoke `callback` once `delay` has elapsed. Re-arming cancels and
    /// replaces the previous deadline.
    fn arm(&self, delay: Duration, callback: Arc<dyn TimerCallback>);

    /// Cancels the pending deadline, if any. A callback that hasn't started won't run.
    fn cancel(&self);
}

/// Architecture operations on the current hart.
pub trait HartArch: Send + Sync {
    type Csrs: CsrAccess;

    /// Returns the CSR interface of the current hart.
    fn csrs(&self) -> &Self::Csrs;

    /// Saves host state into `regs`, runs the guest described by `regs` and returns when the
    /// guest traps back to HS-mode, with the guest's state saved into `regs`.
    fn enter_guest(&self, regs: &mut VmCpuRegisters);

    /// Loads the guest's floating point state into the FP registers. Host FP state isn't
    /// preserved, so the host must not use floating point while a guest is loaded.
    fn install_guest_fpu(&self, regs: &VmCpuRegisters);

    /// Saves the FP registers into the guest's floating point state.
    fn save_guest_fpu(&self, regs: &mut VmCpuRegisters);

    /// Synchronizes the instruction stream with prior stores.
    fn fence_i(&self);

    /// Flushes every VS-stage translation of the current guest.
    fn hfence_vvma_all(&self);

    /// Flushes the VS-stage translation of `vaddr`, optionally only for `asid`.
    fn hfence_vvma(&self, vaddr: u64, asid: Option<u64>);

    /// Flushes every VS-stage translation tagged with `asid`.
    fn hfence_vvma_asid(&self, asid: u64);
}

/// The host the VMM runs on.
pub trait Platform: Send + Sync + 'static {
    type Arch: HartArch + 'static;
    type Event: WaitEvent + Default + 'static;
    type Timer: OneShotTimer + 'static;

    /// Returns the architecture operations for the current hart.
    fn arch(&self) -> &Self::Arch;

    /// Returns the host CPU the caller is running on. IDs must be below `CPU_SET_SIZE` so that
    /// `kick_cpus` can reach them.
    fn this_cpu(&self) -> HostCpuId;

    /// Interrupts every CPU in `cpus` so that any guest running there traps back to the host.
    fn kick_cpus(&self, cpus: &CpuSet);

    /// Creates an unarmed one-shot timer.
    fn new_timer(&self) -> Self::Timer;

    /// Returns the hart timebase frequency in Hz, if the platform describes it.
    fn timebase_frequency(&self) -> Option<u64>;
}

/// Guest physical memory, owned by the VM memory service.
pub trait GuestMemory: Send + Sync {
    /// Returns true if `gpa` is backed by guest RAM.
    fn is_mapped(&self, gpa: u64) -> bool;

    /// Installs the second-stage mapping for a fault at `gpa`. Returns false if the fault can't
    /// be resolved.
    fn fault_in(&self, gpa: u64, fault: Exception) -> bool;

    /// Reads the instruction at guest virtual address `pc` through the vCPU's guest translation.
    /// On failure, returns the `scause` of the trap the read took.
    fn fetch_instruction(&self, vcpu: VcpuId, pc: u64) -> core::result::Result<u32, u64>;
}

/// The platform interrupt controller.
pub trait InterruptController: Send + Sync {
    /// Returns true if an external interrupt is pending for `vcpu`.
    fn pending(&self, vcpu: VcpuId) -> bool;

    /// Sets the level of `irq`, routed by the controller's own rules to `vcpu`.
    fn inject(&self, vcpu: VcpuId, irq: u32, level: bool);
}
