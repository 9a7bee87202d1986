// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use riscv_regs::{fence, FloatingPointRegisters, HartCsrs, CSR};

use crate::hyp_ctx::VmCpuRegisters;
use crate::platform::HartArch;

// The guest entry and floating point switch routines. They belong to the embedding hypervisor,
// which builds them against the offsets exported from `hyp_ctx`.
extern "C" {
    fn _run_guest(regs: *mut VmCpuRegisters);
    fn _restore_guest_fp(fp: *const FloatingPointRegisters);
    fn _save_guest_fp(fp: *mut FloatingPointRegisters);
}

/// `HartArch` for the physical RISC-V hart the hypervisor runs on.
#[derive(Default)]
pub struct RiscvHart;

impl HartArch for RiscvHart {
    type Csrs = HartCsrs;

    fn csrs(&self) -> &HartCsrs {
        CSR
    }

    fn enter_guest(&self, regs: &mut VmCpuRegisters) {
        // Safety: `regs` is a valid, exclusively borrowed trap frame laid out as `_run_guest`
        // expects. The guest runs with its own second-stage translation and can't reach
        // hypervisor memory.
        unsafe { _run_guest(regs as *mut VmCpuRegisters) };
    }

    fn install_guest_fpu(&self, regs: &VmCpuRegisters) {
        // Safety: only reads the saved register file. The hypervisor itself doesn't use floating
        // point, so there is no host state to preserve.
        unsafe { _restore_guest_fp(&regs.fp as *const FloatingPointRegisters) };
    }

    fn save_guest_fpu(&self, regs: &mut VmCpuRegisters) {
        // Safety: only writes the exclusively borrowed register file.
        unsafe { _save_guest_fp(&mut regs.fp as *mut FloatingPointRegisters) };
    }

    fn fence_i(&self) {
        fence::fence_i();
    }

    fn hfence_vvma_all(&self) {
        fence::hfence_vvma_all();
    }

    fn hfence_vvma(&self, vaddr: u64, asid: Option<u64>) {
        match asid {
            Some(asid) => fence::hfence_vvma_addr_asid(vaddr, asid),
            None => fence::hfence_vvma_addr(vaddr),
        }
    }

    fn hfence_vvma_asid(&self, asid: u64) {
        fence::hfence_vvma_asid(asid);
    }
}
