// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Per-vCPU hardware context and the trap frame layout shared with the guest entry assembly.

use core::mem::size_of;

use memoffset::offset_of;
use riscv_regs::{
    hstatus, hvip, sstatus, FloatingPointRegisters, GeneralPurposeRegisters, GprIndex,
    LocalRegisterCopy, TrapCsrs, VsCsrs,
};
use static_assertions::const_assert_eq;

use crate::VcpuId;

// The entry assembly indexes the register files as flat arrays.
const_assert_eq!(size_of::<GeneralPurposeRegisters>(), 32 * 8);
const_assert_eq!(size_of::<FloatingPointRegisters>(), 33 * 8);

/// Host state saved across a guest run.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct HostCpuState {
    pub gprs: GeneralPurposeRegisters,
    pub sstatus: u64,
    pub hstatus: u64,
    pub scounteren: u64,
    pub stvec: u64,
    pub sscratch: u64,
}

/// Guest state restored on entry and saved on exit.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct GuestCpuState {
    pub gprs: GeneralPurposeRegisters,
    pub sstatus: u64,
    pub hstatus: u64,
    /// The guest PC to resume at.
    pub sepc: u64,
}

/// The complete trap frame of a vCPU: everything the guest entry/exit path reads or writes.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct VmCpuRegisters {
    pub host_regs: HostCpuState,
    pub guest_regs: GuestCpuState,
    pub vs_csrs: VsCsrs,
    pub trap_csrs: TrapCsrs,
    pub fp: FloatingPointRegisters,
}

/// Byte offset of a host GPR within `VmCpuRegisters`.
pub const fn host_gpr_offset(index: GprIndex) -> usize {
    offset_of!(VmCpuRegisters, host_regs)
        + offset_of!(HostCpuState, gprs)
        + (index as usize) * size_of::<u64>()
}

/// Byte offset of a guest GPR within `VmCpuRegisters`.
pub const fn guest_gpr_offset(index: GprIndex) -> usize {
    offset_of!(VmCpuRegisters, guest_regs)
        + offset_of!(GuestCpuState, gprs)
        + (index as usize) * size_of::<u64>()
}

/// Byte offset of guest FPR `index` within `VmCpuRegisters`.
pub const fn guest_fpr_offset(index: usize) -> usize {
    offset_of!(VmCpuRegisters, fp)
        + offset_of!(FloatingPointRegisters, fprs)
        + index * size_of::<u64>()
}

pub const GUEST_FCSR_OFFSET: usize =
    offset_of!(VmCpuRegisters, fp) + offset_of!(FloatingPointRegisters, fcsr);
pub const GUEST_SSTATUS_OFFSET: usize =
    offset_of!(VmCpuRegisters, guest_regs) + offset_of!(GuestCpuState, sstatus);
pub const GUEST_HSTATUS_OFFSET: usize =
    offset_of!(VmCpuRegisters, guest_regs) + offset_of!(GuestCpuState, hstatus);
pub const GUEST_SEPC_OFFSET: usize =
    offset_of!(VmCpuRegisters, guest_regs) + offset_of!(GuestCpuState, sepc);
pub const HOST_SSTATUS_OFFSET: usize =
    offset_of!(VmCpuRegisters, host_regs) + offset_of!(HostCpuState, sstatus);
pub const HOST_HSTATUS_OFFSET: usize =
    offset_of!(VmCpuRegisters, host_regs) + offset_of!(HostCpuState, hstatus);
pub const HOST_SCOUNTEREN_OFFSET: usize =
    offset_of!(VmCpuRegisters, host_regs) + offset_of!(HostCpuState, scounteren);
pub const HOST_STVEC_OFFSET: usize =
    offset_of!(VmCpuRegisters, host_regs) + offset_of!(HostCpuState, stvec);
pub const HOST_SSCRATCH_OFFSET: usize =
    offset_of!(VmCpuRegisters, host_regs) + offset_of!(HostCpuState, sscratch);

/// An exception queued for delivery to the guest on its next entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingException {
    pub scause: u64,
    pub stval: u64,
}

/// The hardware context of a vCPU. Only the thread running the vCPU, or a thread that has frozen
/// it, touches this.
pub struct HypCtx {
    pub(crate) regs: VmCpuRegisters,
    /// The guest's view of `hvip` while it isn't running.
    pub(crate) hvip: u64,
    pub(crate) pending_exception: Option<PendingException>,
}

impl HypCtx {
    /// Creates the reset state of vCPU `id`: VS-mode, 64-bit, WFI trapping to the hypervisor,
    /// hart ID in a0.
    pub(crate) fn new(id: VcpuId) -> Self {
        let mut regs = VmCpuRegisters::default();

        let mut hstatus = LocalRegisterCopy::<u64, hstatus::Register>::new(0);
        hstatus.modify(
            hstatus::spv.val(1)
                + hstatus::spvp::Supervisor
                + hstatus::vtw.val(1)
                + hstatus::vsxl::Xlen64,
        );
        regs.guest_regs.hstatus = hstatus.get();

        let mut sstatus = LocalRegisterCopy::<u64, sstatus::Register>::new(0);
        sstatus.modify(sstatus::spp::Supervisor + sstatus::spie.val(1) + sstatus::fs::Initial);
        regs.guest_regs.sstatus = sstatus.get();

        regs.guest_regs.gprs.set_reg(GprIndex::A0, id as u64);

        Self {
            regs,
            hvip: 0,
            pending_exception: None,
        }
    }

    /// Returns the trap frame.
    pub fn registers(&self) -> &VmCpuRegisters {
        &self.regs
    }

    /// Returns the trap frame for modification.
    pub fn registers_mut(&mut self) -> &mut VmCpuRegisters {
        &mut self.regs
    }

    /// Queues an exception for the guest.
    pub fn queue_exception(&mut self, exception: PendingException) {
        self.pending_exception = Some(exception);
    }

    /// Returns true if the guest has been shown a software interrupt it hasn't cleared yet.
    pub(crate) fn software_interrupt_asserted(&self) -> bool {
        LocalRegisterCopy::<u64, hvip::Register>::new(self.hvip).is_set(hvip::vssoft)
    }
}
