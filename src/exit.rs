// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use riscv_regs::{Exception, MemoryAccess, TrapCsrs};

/// Why a VM was suspended.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendReason {
    Reset = 1,
    PowerOff = 2,
    Halt = 3,
    Fault = 4,
}

impl SuspendReason {
    /// Returns the reason with the given raw value. Zero means no suspend is in progress.
    pub fn from_raw(raw: u32) -> Option<Self> {
        use SuspendReason::*;
        match raw {
            1 => Some(Reset),
            2 => Some(PowerOff),
            3 => Some(Halt),
            4 => Some(Fault),
            _ => None,
        }
    }
}

/// The reason a vCPU stopped running guest code and returned to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmExitKind {
    /// A load or store to guest physical memory with no backing. The caller emulates `access`
    /// against the device at `gpa` and resumes.
    InstEmul { gpa: u64, access: MemoryAccess },
    /// The guest executed WFI.
    Wfi,
    /// An SBI call the hypervisor doesn't service. `args` holds a0-a7.
    Ecall { args: [u64; 8] },
    /// A second-stage fault on memory the guest is allowed to use.
    Paging { gpa: u64, fault: Exception },
    /// The exit was consumed by the hypervisor; the caller just resumes.
    Bogus,
    /// The VM is suspended.
    Suspended(SuspendReason),
    /// The vCPU was stopped for debugging.
    Debug,
    /// A trap the hypervisor can't classify. Carries the raw trap CSRs.
    Hyp(TrapCsrs),
}

impl VmExitKind {
    /// Returns true if the trapping instruction is complete once the exit is handled, so the
    /// guest resumes after it.
    pub fn consumes_instruction(&self) -> bool {
        matches!(
            self,
            VmExitKind::InstEmul { .. } | VmExitKind::Wfi | VmExitKind::Ecall { .. }
        )
    }
}

/// A vCPU exit as reported to the caller of `Vm::run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmExit {
    /// Guest PC of the trapping instruction.
    pub pc: u64,
    /// Length in bytes of the trapping instruction, when it was decoded.
    pub inst_length: usize,
    pub kind: VmExitKind,
}
