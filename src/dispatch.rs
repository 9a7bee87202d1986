// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The userspace side of the exit boundary: SBI extensions the hypervisor forwards, and the
//! decision of what to do with every other exit.

use log::{debug, trace};
use riscv_regs::{GprIndex, MemoryAccess};
use sbi::{
    spec_version, BaseFunction, Error as SbiError, HartState, ResetFunction,
    Result as SbiResult, SbiMessage, SbiReturn, StateFunction, EXT_HART_STATE,
    EXT_IPI, EXT_LEGACY_GET_CHAR, EXT_LEGACY_PUT_CHAR, EXT_RESET, EXT_RFENCE, EXT_TIME,
};

use crate::error::*;
use crate::exit::{SuspendReason, VmExit, VmExitKind};
use crate::platform::Platform;
use crate::vm::Vm;
use crate::VcpuId;

/// Implementation ID reported through the BASE extension.
pub const SBI_IMPLEMENTATION_ID: u64 = 0x7276_6d6d;

/// Implementation version reported through the BASE extension.
pub const SBI_IMPLEMENTATION_VERSION: u64 = 1;

const SUPPORTED_EXTENSIONS: [u64; 7] = [
    EXT_HART_STATE,
    EXT_TIME,
    EXT_IPI,
    EXT_RFENCE,
    EXT_RESET,
    EXT_LEGACY_PUT_CHAR,
    EXT_LEGACY_GET_CHAR,
];

/// What the caller of `Vm::run` should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchAction {
    /// Run the vCPU again.
    Resume,
    /// The vCPU started another vCPU, which should get a thread of its own. Then resume.
    StartVcpu(VcpuId),
    /// The vCPU stopped itself. Don't run it until it's started again.
    StopVcpu,
    /// The VM is suspended.
    Suspended(SuspendReason),
    /// Emulate `access` at `gpa` against a device model, then resume.
    Emulate { gpa: u64, access: MemoryAccess },
    /// The exit can't be handled.
    Stop(VmExit),
}

/// A character device behind the legacy console SBI calls.
pub trait Console: Send + Sync {
    fn put_char(&self, c: u8);

    /// Returns the next input character, if there is one.
    fn get_char(&self) -> Option<u8>;
}

/// Handles the exits `Vm::run` returns.
pub struct ExitDispatcher<'a, P: Platform> {
    vm: &'a Vm<P>,
    console: Option<&'a dyn Console>,
}

// How an ecall result goes back to the guest.
enum EcallResult {
    // a0 = error, a1 = value.
    Sbi(SbiReturn),
    // Legacy calls only return a0.
    Legacy(u64),
}

impl<'a, P: Platform> ExitDispatcher<'a, P> {
    pub fn new(vm: &'a Vm<P>) -> Self {
        Self { vm, console: None }
    }

    pub fn with_console(vm: &'a Vm<P>, console: &'a dyn Console) -> Self {
        Self {
            vm,
            console: Some(console),
        }
    }

    /// Handles `exit`, which vCPU `vcpu` just returned from `Vm::run`.
    pub fn handle(&self, vcpu: VcpuId, exit: &VmExit) -> Result<DispatchAction> {
        trace!("vcpu {}: dispatching {:?}", vcpu, exit.kind);
        match exit.kind {
            VmExitKind::Ecall { args } => self.handle_ecall(vcpu, &args),
            VmExitKind::Bogus | VmExitKind::Paging { .. } | VmExitKind::Wfi => {
                Ok(DispatchAction::Resume)
            }
            VmExitKind::Suspended(reason) => Ok(DispatchAction::Suspended(reason)),
            VmExitKind::InstEmul { gpa, access } => Ok(DispatchAction::Emulate { gpa, access }),
            VmExitKind::Hyp(_) | VmExitKind::Debug => Ok(DispatchAction::Stop(*exit)),
        }
    }

    fn handle_ecall(&self, vcpu: VcpuId, args: &[u64; 8]) -> Result<DispatchAction> {
        let mut action = DispatchAction::Resume;
        let result = match SbiMessage::from_regs(args) {
            Ok(SbiMessage::Base(function)) => EcallResult::Sbi(self.base(function).into()),
            Ok(SbiMessage::HartState(function)) => {
                EcallResult::Sbi(self.hart_state(vcpu, function, &mut action)?.into())
            }
            Ok(SbiMessage::Reset(function)) => EcallResult::Sbi(self.reset(function).into()),
            Ok(SbiMessage::PutChar(c)) => {
                if let Some(console) = self.console {
                    console.put_char(c as u8);
                }
                EcallResult::Legacy(0)
            }
            Ok(SbiMessage::GetChar) => {
                let c = self.console.and_then(|console| console.get_char());
                EcallResult::Legacy(c.map_or(u64::MAX, u64::from))
            }
            // Serviced by the hypervisor; only reaches here if the caller forwards it anyway.
            Ok(SbiMessage::Timer(_) | SbiMessage::Ipi(_) | SbiMessage::RemoteFence(_)) => {
                EcallResult::Sbi(SbiError::NotSupported.into())
            }
            Err(e) => EcallResult::Sbi(e.into()),
        };
        // A stopped vCPU won't run again until restarted with fresh registers.
        if action != DispatchAction::StopVcpu {
            self.vm.with_registers(vcpu, |regs| {
                let gprs = &mut regs.guest_regs.gprs;
                match result {
                    EcallResult::Sbi(ret) => {
                        gprs.set_reg(GprIndex::A0, ret.error_code as u64);
                        gprs.set_reg(GprIndex::A1, ret.return_value);
                    }
                    EcallResult::Legacy(a0) => gprs.set_reg(GprIndex::A0, a0),
                }
            })?;
        }
        Ok(action)
    }

    fn base(&self, function: BaseFunction) -> SbiResult<u64> {
        use BaseFunction::*;
        Ok(match function {
            GetSpecificationVersion => spec_version(2, 0),
            GetImplementationID => SBI_IMPLEMENTATION_ID,
            GetImplementationVersion => SBI_IMPLEMENTATION_VERSION,
            ProbeSbiExtension(ext) => SUPPORTED_EXTENSIONS.contains(&ext) as u64,
            GetMachineVendorID | GetMachineArchitectureID | GetMachineImplementationID => 0,
        })
    }

    fn hart_state(
        &self,
        vcpu: VcpuId,
        function: StateFunction,
        action: &mut DispatchAction,
    ) -> Result<SbiResult<u64>> {
        use StateFunction::*;
        match function {
            HartStart {
                hart_id,
                start_addr,
                opaque,
            } => {
                let Some(id) = usize::try_from(hart_id)
                    .ok()
                    .filter(|id| *id < self.vm.max_vcpus())
                else {
                    return Ok(Err(SbiError::InvalidParam));
                };
                if self.vm.is_active(id) {
                    return Ok(Err(SbiError::AlreadyAvailable));
                }
                self.vm.with_registers(id, |regs| {
                    regs.guest_regs.sepc = start_addr;
                    regs.guest_regs.gprs.set_reg(GprIndex::A0, hart_id);
                    regs.guest_regs.gprs.set_reg(GprIndex::A1, opaque);
                    regs.vs_csrs.vsatp = 0;
                })?;
                match self.vm.activate_vcpu(id) {
                    Ok(()) => (),
                    Err(Error::AlreadyActive(_)) => return Ok(Err(SbiError::AlreadyAvailable)),
                    Err(e) => return Err(e),
                }
                debug!("vcpu {}: started vcpu {} at {:#x}", vcpu, id, start_addr);
                *action = DispatchAction::StartVcpu(id);
                Ok(Ok(0))
            }
            HartStop => {
                self.vm.deactivate_vcpu(vcpu)?;
                *action = DispatchAction::StopVcpu;
                Ok(Ok(0))
            }
            HartStatus { hart_id } => {
                let Some(id) = usize::try_from(hart_id)
                    .ok()
                    .filter(|id| *id < self.vm.max_vcpus())
                else {
                    return Ok(Err(SbiError::InvalidParam));
                };
                let state = match self.vm.is_active(id) {
                    true => HartState::Started,
                    false => HartState::Stopped,
                };
                Ok(Ok(state as u64))
            }
            HartSuspend { .. } => Ok(Err(SbiError::NotSupported)),
        }
    }

    fn reset(&self, function: ResetFunction) -> SbiResult<u64> {
        let ResetFunction::Reset { reset_type, reason } = function;
        debug!("vm {}: system reset {:?}, {:?}", self.vm.name(), reset_type, reason);
        // Every reset type powers the VM off; restarting it is up to the caller.
        match self.vm.suspend(SuspendReason::PowerOff) {
            Ok(()) | Err(Error::AlreadySuspended) => Ok(0),
            Err(_) => Err(SbiError::Failed),
        }
    }
}
