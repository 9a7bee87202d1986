// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Classification of guest traps into exits.

use log::{error, warn};
use riscv_regs::{Exception, GprIndex, MemoryAccess, Trap, TrapCsrs};

use crate::exit::VmExitKind;
use crate::hyp_ctx::VmCpuRegisters;
use crate::platform::GuestMemory;
use crate::stats::VcpuStats;
use crate::VcpuId;

/// Encoding of `wfi`, as reported in `stval` for a virtual instruction trap.
const WFI_INSTRUCTION: u64 = 0x1050_0073;

/// The result of classifying a guest trap.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Classified {
    /// An SBI call; a0-a7 of the guest.
    Ecall([u64; 8]),
    /// Anything else, with the length of the trapping instruction when it's known.
    Exit {
        kind: VmExitKind,
        inst_length: usize,
    },
}

impl Classified {
    fn exit(kind: VmExitKind) -> Self {
        Classified::Exit {
            kind,
            inst_length: 0,
        }
    }
}

fn sbi_args(regs: &VmCpuRegisters) -> [u64; 8] {
    let mut args = [0; 8];
    args.copy_from_slice(regs.guest_regs.gprs.a_regs());
    args
}

// Works out which load or store took a guest page fault on unbacked memory, preferring the
// transformed instruction the hardware latched in htinst.
fn decode_access(
    vcpu: VcpuId,
    trap: &TrapCsrs,
    pc: u64,
    memory: &dyn GuestMemory,
) -> core::result::Result<MemoryAccess, VmExitKind> {
    if let Ok(access) = MemoryAccess::from_transformed(trap.htinst) {
        return Ok(access);
    }
    let raw = memory.fetch_instruction(vcpu, pc).map_err(|scause| {
        error!("vcpu {}: can't fetch instruction at {:#x}", vcpu, pc);
        VmExitKind::Hyp(TrapCsrs {
            scause,
            stval: pc,
            htval: 0,
            htinst: 0,
        })
    })?;
    MemoryAccess::decode(raw).map_err(|e| {
        error!("vcpu {}: can't emulate {:?} at {:#x}", vcpu, e, pc);
        VmExitKind::Hyp(*trap)
    })
}

fn guest_page_fault(
    vcpu: VcpuId,
    fault: Exception,
    trap: &TrapCsrs,
    pc: u64,
    memory: &dyn GuestMemory,
) -> Classified {
    let gpa = trap.guest_fault_address();
    if memory.is_mapped(gpa) {
        return Classified::exit(VmExitKind::Paging { gpa, fault });
    }
    if fault == Exception::GuestInstructionPageFault {
        error!("vcpu {}: instruction fetch from unbacked {:#x}", vcpu, gpa);
        return Classified::exit(VmExitKind::Hyp(*trap));
    }
    match decode_access(vcpu, trap, pc, memory) {
        Ok(access) => Classified::Exit {
            kind: VmExitKind::InstEmul { gpa, access },
            inst_length: access.len(),
        },
        Err(kind) => Classified::exit(kind),
    }
}

/// Classifies the trap captured in `regs.trap_csrs` that the guest of `vcpu` took at
/// `regs.guest_regs.sepc`.
pub(crate) fn classify(
    vcpu: VcpuId,
    regs: &VmCpuRegisters,
    memory: &dyn GuestMemory,
    stats: &VcpuStats,
) -> Classified {
    let trap = &regs.trap_csrs;
    let pc = regs.guest_regs.sepc;
    let cause = match Trap::from_scause(trap.scause) {
        Ok(cause) => cause,
        Err(e) => {
            error!("vcpu {}: unknown trap {:?} at {:#x}", vcpu, e, pc);
            return Classified::exit(VmExitKind::Hyp(*trap));
        }
    };

    use Exception::*;
    match cause {
        // A host interrupt. The host has already serviced it by the time we get here.
        Trap::Interrupt(_) => Classified::exit(VmExitKind::Bogus),
        Trap::Exception(VirtualSupervisorEnvCall) => Classified::Ecall(sbi_args(regs)),
        Trap::Exception(
            fault @ (GuestInstructionPageFault | GuestLoadPageFault | GuestStorePageFault),
        ) => guest_page_fault(vcpu, fault, trap, pc, memory),
        Trap::Exception(VirtualInstruction) if trap.stval == WFI_INSTRUCTION => {
            Classified::Exit {
                kind: VmExitKind::Wfi,
                inst_length: 4,
            }
        }
        Trap::Exception(e) => {
            warn!(
                "vcpu {}: unhandled {:?} at {:#x} stval {:#x} ra {:#x}",
                vcpu,
                e,
                pc,
                trap.stval,
                regs.guest_regs.gprs.reg(GprIndex::RA)
            );
            stats.unhandled_traps.inc();
            Classified::exit(VmExitKind::Bogus)
        }
    }
}
