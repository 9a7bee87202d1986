// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The loop that enters a guest and handles its traps until one needs the caller.

use log::{trace, warn};
use riscv_regs::{hvip, CsrAccess, GprIndex, LocalRegisterCopy};

use crate::exit::{VmExit, VmExitKind};
use crate::hyp_ctx::HypCtx;
use crate::platform::{HartArch, Platform};
use crate::sbi_emul::{handle_ecall, SbiOutcome};
use crate::trap::{classify, Classified};
use crate::vm::Vm;
use crate::vm_cpu::VmCpu;

/// A vCPU that the current thread is running. Everything the trap path needs is reached through
/// this context rather than through per-CPU globals.
pub(crate) struct ActiveVmCpu<'a, P: Platform> {
    vm: &'a Vm<P>,
    vcpu: &'a VmCpu<P>,
}

impl<'a, P: Platform> ActiveVmCpu<'a, P> {
    pub(crate) fn new(vm: &'a Vm<P>, vcpu: &'a VmCpu<P>) -> Self {
        Self { vm, vcpu }
    }

    // Asserts the virtual interrupts whose sources are pending in the guest's hvip.
    fn sync_interrupts_in(&self, ctx: &mut HypCtx) {
        let mut pending = LocalRegisterCopy::<u64, hvip::Register>::new(ctx.hvip);
        if self.vcpu.take_ipi() {
            pending.modify(hvip::vssoft::SET);
        }
        pending.modify(hvip::vstimer.val(self.vcpu.timer().pending() as u64));
        pending.modify(hvip::vsext.val(self.vm.intc().pending(self.vcpu.id()) as u64));
        ctx.hvip = pending.get();
        self.arch().csrs().set_virtual_interrupts_pending(ctx.hvip);
    }

    // The guest acknowledges software interrupts by clearing VSSIP itself. Timer and external
    // interrupts are recomputed from their sources on every entry.
    fn sync_interrupts_out(&self, ctx: &mut HypCtx) {
        let live = LocalRegisterCopy::<u64, hvip::Register>::new(
            self.arch().csrs().virtual_interrupts_pending(),
        );
        if !live.is_set(hvip::vssoft) {
            let mut saved = LocalRegisterCopy::<u64, hvip::Register>::new(ctx.hvip);
            saved.modify(hvip::vssoft::CLEAR);
            ctx.hvip = saved.get();
        }
    }

    fn arch(&self) -> &P::Arch {
        self.vm.platform().arch()
    }

    fn exit(&self, ctx: &mut HypCtx, kind: VmExitKind, inst_length: usize) -> VmExit {
        let pc = ctx.regs.guest_regs.sepc;
        if kind.consumes_instruction() {
            ctx.regs.guest_regs.sepc = pc.wrapping_add(inst_length as u64);
        }
        self.vcpu.stats().record_exit(&kind);
        trace!("vcpu {}: exit at {:#x}: {:?}", self.vcpu.id(), pc, kind);
        VmExit {
            pc,
            inst_length,
            kind,
        }
    }

    /// Runs the guest until it takes a trap the hypervisor doesn't complete itself.
    pub(crate) fn run_to_exit(&mut self) -> VmExit {
        let id = self.vcpu.id();
        let mut ctx = self.vcpu.lock_context();
        loop {
            if let Some(exception) = ctx.pending_exception.take() {
                // TODO: deliver through vsepc/vscause/vstval and vstvec once guest-visible
                // exception injection is supported.
                warn!("vcpu {}: dropping queued exception {:?}", id, exception);
            }

            if let Some(reason) = self.vm.suspend_reason() {
                return self.exit(&mut ctx, VmExitKind::Suspended(reason), 0);
            }
            if self.vm.debug_requested(id) {
                return self.exit(&mut ctx, VmExitKind::Debug, 0);
            }

            self.sync_interrupts_in(&mut ctx);
            self.vcpu.fences().process(self.arch());

            let arch = self.arch();
            arch.csrs().load_vs_csrs(&ctx.regs.vs_csrs);
            arch.install_guest_fpu(&ctx.regs);
            arch.enter_guest(&mut ctx.regs);
            // Captured first: anything below may trap and clobber them.
            ctx.regs.trap_csrs = arch.csrs().trap_csrs();
            arch.save_guest_fpu(&mut ctx.regs);
            arch.csrs().save_vs_csrs(&mut ctx.regs.vs_csrs);
            self.sync_interrupts_out(&mut ctx);

            let classified = classify(id, &ctx.regs, self.vm.memory(), self.vcpu.stats());
            match classified {
                Classified::Ecall(args) => match handle_ecall(self.vm, self.vcpu, &args) {
                    SbiOutcome::Handled(ret) => {
                        let gprs = &mut ctx.regs.guest_regs.gprs;
                        gprs.set_reg(GprIndex::A0, ret.error_code as u64);
                        gprs.set_reg(GprIndex::A1, ret.return_value);
                        ctx.regs.guest_regs.sepc = ctx.regs.guest_regs.sepc.wrapping_add(4);
                    }
                    SbiOutcome::Forward => {
                        return self.exit(&mut ctx, VmExitKind::Ecall { args }, 4);
                    }
                },
                Classified::Exit { kind, inst_length } => {
                    return self.exit(&mut ctx, kind, inst_length);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use riscv_regs::{Exception, TrapCsrs};
    use sbi::{EXT_BASE, EXT_IPI, EXT_TIME};

    use super::*;
    use crate::test_stubs::*;
    use crate::vm_cpu::VcpuState;

    const HVIP_VSSIP: u64 = 1 << 2;
    const HVIP_VSTIP: u64 = 1 << 6;
    const HVIP_VSEIP: u64 = 1 << 10;

    fn run_once(vm: &Vm<TestPlatform>, id: usize) -> VmExit {
        let vcpu = vm.vcpu(id).unwrap();
        vcpu.set_state(VcpuState::Frozen, false).unwrap();
        vcpu.set_state(VcpuState::Running, false).unwrap();
        let exit = ActiveVmCpu::new(vm, vcpu).run_to_exit();
        vcpu.set_state(VcpuState::Frozen, false).unwrap();
        vcpu.set_state(VcpuState::Idle, false).unwrap();
        exit
    }

    #[test]
    fn handled_ecall_loops_and_forwarded_ecall_exits() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 2);
        vm.activate_vcpu(0).unwrap();
        vm.set_pc(0, 0x8000_0000).unwrap();
        // An IPI to ourselves (handled), then a BASE call (forwarded).
        platform.set_guest(guest_ecalls(&[
            [0b1, 0, 0, 0, 0, 0, 0, EXT_IPI],
            [0, 0, 0, 0, 0, 0, 0, EXT_BASE],
        ]));
        let exit = run_once(&vm, 0);
        assert_eq!(exit.pc, 0x8000_0004);
        assert_eq!(exit.inst_length, 4);
        let VmExitKind::Ecall { args } = exit.kind else {
            panic!("unexpected exit {:?}", exit);
        };
        assert_eq!(args[7], EXT_BASE);
        assert_eq!(vm.get_pc(0), Ok(0x8000_0008));
        // The IPI was delivered on the second entry.
        assert_eq!(platform.entry_hvips(), [0, HVIP_VSSIP]);
        let stats = vm.vcpu(0).unwrap().stats().snapshot();
        assert_eq!(stats.sbi_handled, 1);
        assert_eq!(stats.exits, 1);
        assert_eq!(stats.ecall, 1);
    }

    #[test]
    fn handled_ecall_pc_wraps() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 1);
        vm.activate_vcpu(0).unwrap();
        vm.set_pc(0, u64::MAX - 3).unwrap();
        platform.set_guest(guest_ecalls(&[[0b1, 0, 0, 0, 0, 0, 0, EXT_IPI]]));
        let exit = run_once(&vm, 0);
        assert_eq!(exit.kind, VmExitKind::Bogus);
        assert_eq!(exit.pc, 0);
        assert_eq!(vm.get_pc(0), Ok(0));
    }

    #[test]
    fn guest_fp_state_survives_exits() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 1);
        vm.activate_vcpu(0).unwrap();
        vm.vcpu(0).unwrap().lock_context().regs.fp.fcsr = 0x20;
        platform.set_guest(guest_bump_fcsr());
        run_once(&vm, 0);
        run_once(&vm, 0);
        assert_eq!(vm.vcpu(0).unwrap().lock_context().regs.fp.fcsr, 0x22);
    }

    #[test]
    fn interrupt_sources_reach_hvip() {
        let platform = Arc::new(TestPlatform::default());
        let intc = Arc::new(TestIntc::default());
        let vm = test_vm_with(platform.clone(), intc.clone(), 1);
        vm.activate_vcpu(0).unwrap();
        intc.set_pending(0, true);
        vm.vcpu(0).unwrap().post_ipi();
        // The guest clears VSSIP, then sets the timer in the past.
        platform.set_guest(guest_fn(|regs, hvip| {
            *hvip &= !HVIP_VSSIP;
            timer_ecall(regs, 0)
        }));
        let exit = run_once(&vm, 0);
        assert_eq!(exit.kind, VmExitKind::Bogus);
        assert_eq!(
            platform.entry_hvips(),
            [HVIP_VSSIP | HVIP_VSEIP, HVIP_VSTIP | HVIP_VSEIP]
        );
    }

    #[test]
    fn fences_apply_before_entry() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 1);
        vm.activate_vcpu(0).unwrap();
        let targets = [0].into_iter().collect();
        vm.fence_add(
            &targets,
            crate::FenceRequest::Tlb {
                start: 0x4000,
                size: 0x1000,
            },
        );
        run_once(&vm, 0);
        assert_eq!(platform.arch().take_fences(), [FenceOp::Vvma(0x4000, None)]);
    }

    #[test]
    fn queued_exception_is_dropped() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 1);
        vm.activate_vcpu(0).unwrap();
        vm.vcpu(0)
            .unwrap()
            .lock_context()
            .queue_exception(crate::PendingException {
                scause: Exception::IllegalInstruction as u64,
                stval: 0,
            });
        run_once(&vm, 0);
        assert!(vm
            .vcpu(0)
            .unwrap()
            .lock_context()
            .pending_exception
            .is_none());
    }

    fn timer_ecall(regs: &mut crate::VmCpuRegisters, target: u64) -> TrapCsrs {
        if regs.guest_regs.gprs.reg(GprIndex::A7) == EXT_TIME {
            return host_interrupt();
        }
        let args = regs.guest_regs.gprs.a_regs_mut();
        args[0] = target;
        args[6] = 0;
        args[7] = EXT_TIME;
        ecall_trap()
    }
}
