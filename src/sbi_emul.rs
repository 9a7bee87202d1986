// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! SBI calls serviced without leaving the hypervisor: TIME, IPI and RFENCE.

use log::trace;
use riscv_regs::CsrAccess;
use sbi::{
    Error as SbiError, HartMask, IpiFunction, RemoteFenceFunction, Result as SbiResult,
    SbiMessage, SbiReturn, TimerFunction, EXT_IPI, EXT_RFENCE, EXT_TIME,
};

use crate::cpu_set::CpuSet;
use crate::fence::FenceRequest;
use crate::platform::{HartArch, Platform};
use crate::vm::Vm;
use crate::vm_cpu::VmCpu;

/// What to do with an SBI call.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SbiOutcome {
    /// The call is complete; return these values to the guest.
    Handled(SbiReturn),
    /// The call belongs to an extension serviced by the caller of `Vm::run`.
    Forward,
}

// Resolves `harts` to vCPU IDs. Every hart must be an active vCPU of the VM; otherwise the whole
// call fails and nothing is done.
fn target_vcpus<P: Platform>(vm: &Vm<P>, harts: HartMask) -> SbiResult<CpuSet> {
    let mut targets = CpuSet::new();
    for hart_id in harts.hart_ids() {
        let id = usize::try_from(hart_id?).map_err(|_| SbiError::InvalidParam)?;
        if id >= vm.max_vcpus() || !vm.is_active(id) || vm.existing_vcpu(id).is_none() {
            return Err(SbiError::InvalidParam);
        }
        targets.insert(id);
    }
    Ok(targets)
}

fn set_timer<P: Platform>(vm: &Vm<P>, vcpu: &VmCpu<P>, target: u64) -> SbiResult<u64> {
    let now = vm.platform().arch().csrs().time();
    if vcpu.timer().set_timer(now, target) {
        vcpu.stats().timer_armed.inc();
    }
    Ok(0)
}

fn send_ipi<P: Platform>(vm: &Vm<P>, vcpu: &VmCpu<P>, harts: HartMask) -> SbiResult<u64> {
    for id in target_vcpus(vm, harts)?.iter() {
        if let Some(target) = vm.existing_vcpu(id) {
            target.post_ipi();
            vcpu.stats().ipis_sent.inc();
        }
    }
    Ok(0)
}

fn remote_fence<P: Platform>(vm: &Vm<P>, function: RemoteFenceFunction) -> SbiResult<u64> {
    let targets = target_vcpus(vm, function.harts())?;
    let fence = match function {
        RemoteFenceFunction::FenceI(_) => FenceRequest::InstructionCache,
        RemoteFenceFunction::SfenceVma { start, size, .. } => FenceRequest::Tlb { start, size },
        RemoteFenceFunction::SfenceVmaAsid {
            start, size, asid, ..
        } => FenceRequest::TlbAsid { start, size, asid },
    };
    vm.fence_add(&targets, fence);
    Ok(0)
}

/// Services the SBI call in `args` (a0-a7) made by `vcpu`, if it belongs to an extension the
/// hypervisor handles itself.
pub(crate) fn handle_ecall<P: Platform>(
    vm: &Vm<P>,
    vcpu: &VmCpu<P>,
    args: &[u64; 8],
) -> SbiOutcome {
    if !matches!(args[7], EXT_TIME | EXT_IPI | EXT_RFENCE) {
        return SbiOutcome::Forward;
    }
    let result = match SbiMessage::from_regs(args) {
        Ok(SbiMessage::Timer(TimerFunction::SetTimer(target))) => set_timer(vm, vcpu, target),
        Ok(SbiMessage::Ipi(IpiFunction::SendIpi(harts))) => send_ipi(vm, vcpu, harts),
        Ok(SbiMessage::RemoteFence(function)) => remote_fence(vm, function),
        Ok(_) => Err(SbiError::NotSupported),
        Err(e) => Err(e),
    };
    trace!("vcpu {}: sbi {:#x}/{} -> {:?}", vcpu.id(), args[7], args[6], result);
    vcpu.stats().sbi_handled.inc();
    SbiOutcome::Handled(result.into())
}
