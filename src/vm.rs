// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use riscv_regs::GprIndex;
use spin::{Mutex, Once};

use crate::config::{VmConfig, MAX_VM_NAME_LEN};
use crate::cpu_set::{AtomicCpuSet, CpuSet};
use crate::error::*;
use crate::exit::{SuspendReason, VmExit, VmExitKind};
use crate::fence::FenceRequest;
use crate::hyp_ctx::VmCpuRegisters;
use crate::platform::{GuestMemory, InterruptController, Platform};
use crate::vm_cpu::{VcpuState, VmCpu};
use crate::world_switch::ActiveVmCpu;
use crate::VcpuId;

/// A virtual machine: a set of virtual harts sharing guest memory and an interrupt controller.
pub struct Vm<P: Platform> {
    name: String,
    platform: Arc<P>,
    config: VmConfig,
    timebase_frequency: u64,
    memory: Arc<dyn GuestMemory>,
    intc: Arc<dyn InterruptController>,
    vcpus: Vec<Once<VmCpu<P>>>,
    // Serializes vCPU creation. Set once the VM is being torn down.
    dying: Mutex<bool>,
    active: AtomicCpuSet,
    suspended: AtomicCpuSet,
    debug: AtomicCpuSet,
    // Raw `SuspendReason`, zero if no suspend is in progress.
    suspend_reason: AtomicU32,
}

impl<P: Platform> Vm<P> {
    /// Creates a VM with no vCPUs.
    pub fn new(
        name: &str,
        platform: Arc<P>,
        memory: Arc<dyn GuestMemory>,
        intc: Arc<dyn InterruptController>,
        config: VmConfig,
    ) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_VM_NAME_LEN {
            return Err(Error::InvalidName);
        }
        config.validate()?;
        let timebase_frequency = config.resolve_timebase(platform.timebase_frequency());
        let vcpus = (0..config.max_vcpus).map(|_| Once::new()).collect();
        debug!(
            "vm {}: {} vcpus, timebase {} Hz",
            name, config.max_vcpus, timebase_frequency
        );
        Ok(Self {
            name: String::from(name),
            platform,
            config,
            timebase_frequency,
            memory,
            intc,
            vcpus,
            dying: Mutex::new(false),
            active: AtomicCpuSet::new(),
            suspended: AtomicCpuSet::new(),
            debug: AtomicCpuSet::new(),
            suspend_reason: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_vcpus(&self) -> usize {
        self.vcpus.len()
    }

    pub fn timebase_frequency(&self) -> u64 {
        self.timebase_frequency
    }

    pub(crate) fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn memory(&self) -> &dyn GuestMemory {
        &*self.memory
    }

    pub(crate) fn intc(&self) -> &dyn InterruptController {
        &*self.intc
    }

    /// Returns vCPU `id`, creating it on first use.
    pub fn vcpu(&self, id: VcpuId) -> Result<&VmCpu<P>> {
        let slot = self.vcpus.get(id).ok_or(Error::InvalidVcpuId(id))?;
        if let Some(vcpu) = slot.get() {
            return Ok(vcpu);
        }
        let dying = self.dying.lock();
        if *dying {
            return Err(Error::VcpuNotFound(id));
        }
        Ok(slot.call_once(|| {
            debug!("vm {}: creating vcpu {}", self.name, id);
            VmCpu::new(
                id,
                self.platform.clone(),
                self.timebase_frequency,
                self.config.idle_recheck,
            )
        }))
    }

    /// Returns vCPU `id` if it has been created.
    pub fn existing_vcpu(&self, id: VcpuId) -> Option<&VmCpu<P>> {
        self.vcpus.get(id).and_then(|slot| slot.get())
    }

    /// Stops further vCPU creation.
    pub fn set_dying(&self) {
        *self.dying.lock() = true;
    }

    fn check_id(&self, id: VcpuId) -> Result<()> {
        if id >= self.max_vcpus() {
            return Err(Error::InvalidVcpuId(id));
        }
        Ok(())
    }

    /// Adds vCPU `id` to the set that may run, creating it if needed.
    pub fn activate_vcpu(&self, id: VcpuId) -> Result<()> {
        self.vcpu(id)?;
        if !self.active.insert(id) {
            return Err(Error::AlreadyActive(id));
        }
        debug!("vm {}: vcpu {} active", self.name, id);
        Ok(())
    }

    /// Removes vCPU `id` from the set that may run.
    pub fn deactivate_vcpu(&self, id: VcpuId) -> Result<()> {
        self.check_id(id)?;
        if !self.active.remove(id) {
            return Err(Error::NotActive(id));
        }
        self.suspended.remove(id);
        debug!("vm {}: vcpu {} stopped", self.name, id);
        Ok(())
    }

    pub fn is_active(&self, id: VcpuId) -> bool {
        self.active.contains(id)
    }

    pub fn active_vcpus(&self) -> CpuSet {
        self.active.load()
    }

    pub fn suspended_vcpus(&self) -> CpuSet {
        self.suspended.load()
    }

    pub fn debug_vcpus(&self) -> CpuSet {
        self.debug.load()
    }

    fn notify_all(&self, vcpus: &CpuSet) {
        for id in vcpus.iter() {
            if let Some(vcpu) = self.existing_vcpu(id) {
                vcpu.notify();
            }
        }
    }

    /// Starts suspending the VM. Each active vCPU stops at its next entry and waits for the
    /// others.
    pub fn suspend(&self, reason: SuspendReason) -> Result<()> {
        self.suspend_reason
            .compare_exchange(0, reason as u32, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadySuspended)?;
        debug!("vm {}: suspending, {:?}", self.name, reason);
        self.notify_all(&self.active.load());
        Ok(())
    }

    /// Returns the reason of the suspend in progress, if any.
    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        SuspendReason::from_raw(self.suspend_reason.load(Ordering::Acquire))
    }

    /// Returns a fully suspended VM to its power-on state. Every created vCPU is reset and
    /// deactivated.
    pub fn reinit(&self) -> Result<()> {
        if !self.active.load().is_subset(&self.suspended.load()) {
            return Err(Error::Busy);
        }
        for vcpu in self.vcpus.iter().filter_map(|slot| slot.get()) {
            vcpu.set_state(VcpuState::Frozen, true)?;
            vcpu.reset();
            vcpu.set_state(VcpuState::Idle, false)?;
        }
        self.active.clear();
        self.suspended.clear();
        self.debug.clear();
        self.suspend_reason.store(0, Ordering::Release);
        debug!("vm {}: reinitialized", self.name);
        Ok(())
    }

    /// Stops vCPU `id` at its next entry with a `Debug` exit until `debug_resume`.
    pub fn debug_stop(&self, id: VcpuId) -> Result<()> {
        self.check_id(id)?;
        if !self.is_active(id) {
            return Err(Error::NotActive(id));
        }
        self.debug.insert(id);
        if let Some(vcpu) = self.existing_vcpu(id) {
            vcpu.notify();
        }
        Ok(())
    }

    pub fn debug_resume(&self, id: VcpuId) -> Result<()> {
        self.check_id(id)?;
        if !self.is_active(id) {
            return Err(Error::NotActive(id));
        }
        self.debug.remove(id);
        if let Some(vcpu) = self.existing_vcpu(id) {
            vcpu.notify();
        }
        Ok(())
    }

    pub(crate) fn debug_requested(&self, id: VcpuId) -> bool {
        self.debug.contains(id)
    }

    /// Freezes vCPU `id` and calls `f` on its registers. Waits for any thread running the vCPU
    /// to let it go first.
    pub fn with_registers<R>(
        &self,
        id: VcpuId,
        f: impl FnOnce(&mut VmCpuRegisters) -> R,
    ) -> Result<R> {
        let vcpu = self.vcpu(id)?;
        vcpu.set_state(VcpuState::Frozen, true)?;
        let result = f(vcpu.lock_context().registers_mut());
        vcpu.set_state(VcpuState::Idle, false)?;
        Ok(result)
    }

    pub fn get_register(&self, id: VcpuId, reg: GprIndex) -> Result<u64> {
        self.with_registers(id, |regs| regs.guest_regs.gprs.reg(reg))
    }

    pub fn set_register(&self, id: VcpuId, reg: GprIndex, value: u64) -> Result<()> {
        self.with_registers(id, |regs| regs.guest_regs.gprs.set_reg(reg, value))
    }

    pub fn get_pc(&self, id: VcpuId) -> Result<u64> {
        self.with_registers(id, |regs| regs.guest_regs.sepc)
    }

    pub fn set_pc(&self, id: VcpuId, pc: u64) -> Result<()> {
        self.with_registers(id, |regs| regs.guest_regs.sepc = pc)
    }

    /// Sets the level of `irq` at the interrupt controller and wakes vCPU `id`.
    pub fn inject_interrupt(&self, id: VcpuId, irq: u32, level: bool) -> Result<()> {
        self.check_id(id)?;
        self.intc.inject(id, irq, level);
        if let Some(vcpu) = self.existing_vcpu(id) {
            vcpu.notify();
        }
        Ok(())
    }

    /// Queues `fence` on every vCPU in `targets` and kicks the host CPUs of those currently
    /// running guest code, so that the fence is applied before they next execute guest code.
    pub fn fence_add(&self, targets: &CpuSet, fence: FenceRequest) {
        let mut kick = CpuSet::new();
        for id in targets.iter() {
            let Some(vcpu) = self.existing_vcpu(id) else {
                continue;
            };
            if vcpu.fences().add(fence) {
                warn!("vcpu {}: fence queue full, flushing everything", id);
                vcpu.stats().fences_escalated.inc();
            }
            if let Some(cpu) = vcpu.hostcpu() {
                kick.insert(cpu);
            }
        }
        if !kick.is_empty() {
            self.platform.kick_cpus(&kick);
        }
    }

    /// Runs vCPU `id` on the calling thread until it exits for a reason the hypervisor doesn't
    /// handle itself.
    pub fn run(&self, id: VcpuId) -> Result<VmExit> {
        self.check_id(id)?;
        if !self.is_active(id) {
            return Err(Error::NotActive(id));
        }
        let vcpu = self.vcpu(id)?;
        vcpu.set_state(VcpuState::Frozen, false)?;
        let result = self.run_frozen(vcpu);
        vcpu.set_state(VcpuState::Idle, false)?;
        result
    }

    fn run_frozen(&self, vcpu: &VmCpu<P>) -> Result<VmExit> {
        loop {
            vcpu.set_state(VcpuState::Running, false)?;
            let exit = ActiveVmCpu::new(self, vcpu).run_to_exit();
            vcpu.set_state(VcpuState::Frozen, false)?;
            match exit.kind {
                VmExitKind::Wfi => {
                    if self.wait_for_interrupt(vcpu)? {
                        continue;
                    }
                }
                VmExitKind::Paging { gpa, fault } => {
                    if self.memory.fault_in(gpa, fault) && !vcpu.freeze_requested() {
                        continue;
                    }
                }
                VmExitKind::Suspended(_) => self.drain_suspend(vcpu)?,
                _ => (),
            }
            return Ok(exit);
        }
    }

    // Sleeps until the vCPU has an interrupt to take or a VM-wide request to act on. Returns false
    // if another thread asked for the vCPU instead.
    fn wait_for_interrupt(&self, vcpu: &VmCpu<P>) -> Result<bool> {
        loop {
            if vcpu.wakeup_pending(self.intc())
                || self.suspend_reason().is_some()
                || self.debug_requested(vcpu.id())
            {
                return Ok(true);
            }
            if vcpu.freeze_requested() {
                return Ok(false);
            }
            vcpu.set_state(VcpuState::Sleeping, false)?;
            vcpu.wait_for_wakeup(self.config.wfi_recheck);
            vcpu.set_state(VcpuState::Frozen, false)?;
        }
    }

    // Waits until every active vCPU has reached the suspend, then wakes the stragglers still
    // sleeping here.
    fn drain_suspend(&self, vcpu: &VmCpu<P>) -> Result<()> {
        self.suspended.insert(vcpu.id());
        loop {
            let active = self.active.load();
            if active.is_subset(&self.suspended.load()) {
                self.notify_all(&active);
                debug!("vm {}: suspended", self.name);
                return Ok(());
            }
            vcpu.set_state(VcpuState::Sleeping, false)?;
            vcpu.wait_for_wakeup(self.config.suspend_recheck);
            vcpu.set_state(VcpuState::Frozen, false)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::test_stubs::*;

    #[test]
    fn names_and_ids() {
        let platform = Arc::new(TestPlatform::default());
        let long = "x".repeat(MAX_VM_NAME_LEN + 1);
        assert!(matches!(
            Vm::new(
                &long,
                platform.clone(),
                Arc::new(TestMemory::default()),
                Arc::new(TestIntc::default()),
                VmConfig::default()
            ),
            Err(Error::InvalidName)
        ));
        let vm = test_vm(4);
        assert_eq!(vm.name(), "test-vm");
        assert!(matches!(vm.vcpu(4), Err(Error::InvalidVcpuId(4))));
        assert!(vm.existing_vcpu(1).is_none());
        assert_eq!(vm.vcpu(1).unwrap().id(), 1);
        assert!(vm.existing_vcpu(1).is_some());
    }

    #[test]
    fn dying_vm_creates_no_vcpus() {
        let vm = test_vm(4);
        vm.vcpu(0).unwrap();
        vm.set_dying();
        assert!(vm.vcpu(0).is_ok());
        assert!(matches!(vm.vcpu(1), Err(Error::VcpuNotFound(1))));
    }

    #[test]
    fn activation() {
        let vm = test_vm(4);
        vm.activate_vcpu(2).unwrap();
        assert_eq!(vm.activate_vcpu(2), Err(Error::AlreadyActive(2)));
        assert!(vm.is_active(2));
        assert_eq!(vm.run(1), Err(Error::NotActive(1)));
        vm.deactivate_vcpu(2).unwrap();
        assert_eq!(vm.deactivate_vcpu(2), Err(Error::NotActive(2)));
    }

    #[test]
    fn registers_round_trip() {
        let vm = test_vm(2);
        vm.set_register(1, GprIndex::A3, 0x1234).unwrap();
        vm.set_pc(1, 0x8020_0000).unwrap();
        assert_eq!(vm.get_register(1, GprIndex::A3), Ok(0x1234));
        assert_eq!(vm.get_pc(1), Ok(0x8020_0000));
        assert_eq!(vm.get_register(1, GprIndex::A0), Ok(1));
        assert_eq!(vm.vcpu(1).unwrap().state(), VcpuState::Idle);
    }

    #[test]
    fn double_suspend_keeps_first_reason() {
        let vm = test_vm(2);
        vm.suspend(SuspendReason::Halt).unwrap();
        assert_eq!(
            vm.suspend(SuspendReason::Reset),
            Err(Error::AlreadySuspended)
        );
        assert_eq!(vm.suspend_reason(), Some(SuspendReason::Halt));
    }

    #[test]
    fn suspend_drains_all_vcpus() {
        let vm = Arc::new(test_vm(2));
        vm.activate_vcpu(0).unwrap();
        vm.activate_vcpu(1).unwrap();
        assert_eq!(vm.reinit(), Err(Error::Busy));
        vm.suspend(SuspendReason::PowerOff).unwrap();

        let other = {
            let vm = vm.clone();
            std::thread::spawn(move || vm.run(1))
        };
        let exit = vm.run(0).unwrap();
        assert_eq!(exit.kind, VmExitKind::Suspended(SuspendReason::PowerOff));
        let exit = other.join().unwrap().unwrap();
        assert_eq!(exit.kind, VmExitKind::Suspended(SuspendReason::PowerOff));
        assert_eq!(vm.suspended_vcpus(), vm.active_vcpus());
        // Suspended before the guest ran: no guest instruction was consumed.
        assert_eq!(exit.pc, 0);

        vm.set_pc(0, 0x8000_0000).unwrap();
        vm.reinit().unwrap();
        assert_eq!(vm.suspend_reason(), None);
        assert!(vm.active_vcpus().is_empty());
        assert_eq!(vm.get_pc(0), Ok(0));
    }

    #[test]
    fn wfi_sleeps_until_interrupt() {
        let platform = Arc::new(TestPlatform::default());
        let intc = Arc::new(TestIntc::default());
        let vm = Arc::new(test_vm_with(platform.clone(), intc.clone(), 2));
        vm.activate_vcpu(0).unwrap();
        vm.set_pc(0, 0x8000_0000).unwrap();
        platform.set_guest(guest_wfi_then_host_interrupt());
        {
            let intc = intc.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                intc.set_pending(0, true);
            });
        }
        let exit = vm.run(0).unwrap();
        // The WFI was handled in the hypervisor; the host interrupt on re-entry is returned.
        assert_eq!(exit.kind, VmExitKind::Bogus);
        assert_eq!(exit.pc, 0x8000_0004);
        let stats = vm.vcpu(0).unwrap().stats().snapshot();
        assert_eq!(stats.wfi, 1);
        assert_eq!(stats.bogus, 1);
        assert_eq!(platform.guest_entries(), 2);
    }

    #[test]
    fn unacknowledged_ipi_ends_wfi() {
        let platform = Arc::new(TestPlatform::default());
        let vm = Arc::new(test_vm_with(
            platform.clone(),
            Arc::new(TestIntc::default()),
            1,
        ));
        vm.activate_vcpu(0).unwrap();
        vm.set_pc(0, 0x8000_0000).unwrap();
        vm.vcpu(0).unwrap().post_ipi();
        // The guest sees VSSIP on entry, leaves it set and executes WFI.
        platform.set_guest(guest_wfi_then_host_interrupt());
        let (done, result) = std::sync::mpsc::channel();
        {
            let vm = vm.clone();
            std::thread::spawn(move || done.send(vm.run(0)));
        }
        let exit = result
            .recv_timeout(Duration::from_secs(2))
            .expect("vcpu stayed asleep with VSSIP asserted")
            .unwrap();
        assert_eq!(exit.kind, VmExitKind::Bogus);
        assert_eq!(exit.pc, 0x8000_0004);
        assert_eq!(platform.entry_hvips(), [1 << 2, 1 << 2]);
        assert_eq!(vm.vcpu(0).unwrap().stats().snapshot().wfi, 1);
    }

    #[test]
    fn freeze_interrupts_wfi() {
        let platform = Arc::new(TestPlatform::default());
        let vm = Arc::new(test_vm_with(
            platform.clone(),
            Arc::new(TestIntc::default()),
            1,
        ));
        vm.activate_vcpu(0).unwrap();
        vm.set_pc(0, 0x8000_0000).unwrap();
        platform.set_guest(guest_always_wfi());
        let runner = {
            let vm = vm.clone();
            std::thread::spawn(move || vm.run(0))
        };
        while vm.vcpu(0).unwrap().state() != VcpuState::Sleeping {
            std::thread::sleep(Duration::from_millis(1));
        }
        // Reading the PC has to freeze the vCPU, which ends its sleep.
        assert_eq!(vm.get_pc(0), Ok(0x8000_0004));
        let exit = runner.join().unwrap().unwrap();
        assert_eq!(exit.kind, VmExitKind::Wfi);
    }

    #[test]
    fn paging_faults_are_resolved_in_place() {
        let platform = Arc::new(TestPlatform::default());
        let memory = Arc::new(TestMemory::default());
        memory.add_ram(0x8000_0000, 0x100_0000);
        let vm = Vm::new(
            "paging",
            platform.clone(),
            memory.clone(),
            Arc::new(TestIntc::default()),
            test_config(1),
        )
        .unwrap();
        vm.activate_vcpu(0).unwrap();
        platform.set_guest(guest_store_fault_then_host_interrupt(0x8000_3000));
        let exit = vm.run(0).unwrap();
        assert_eq!(exit.kind, VmExitKind::Bogus);
        assert_eq!(memory.faults(), [0x8000_3000]);

        memory.set_resolvable(false);
        platform.set_guest(guest_store_fault_then_host_interrupt(0x8000_5000));
        let exit = vm.run(0).unwrap();
        assert!(matches!(exit.kind, VmExitKind::Paging { gpa: 0x8000_5000, .. }));
    }

    #[test]
    fn debug_stop_exits_before_entry() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 1);
        assert_eq!(vm.debug_stop(0), Err(Error::NotActive(0)));
        vm.activate_vcpu(0).unwrap();
        vm.debug_stop(0).unwrap();
        assert_eq!(vm.run(0).unwrap().kind, VmExitKind::Debug);
        assert_eq!(platform.guest_entries(), 0);
        vm.debug_resume(0).unwrap();
        assert_eq!(vm.run(0).unwrap().kind, VmExitKind::Bogus);
        assert_eq!(platform.guest_entries(), 1);
    }

    #[test]
    fn fence_kicks_running_vcpus_only() {
        let platform = Arc::new(TestPlatform::default());
        let vm = test_vm_with(platform.clone(), Arc::new(TestIntc::default()), 4);
        let running = vm.vcpu(1).unwrap();
        vm.vcpu(2).unwrap();
        running.set_state(VcpuState::Frozen, false).unwrap();
        running.set_state(VcpuState::Running, false).unwrap();
        let targets: CpuSet = [1, 2, 3].into_iter().collect();
        vm.fence_add(&targets, FenceRequest::InstructionCache);
        let kicked: CpuSet = [running.hostcpu().unwrap()].into_iter().collect();
        assert_eq!(platform.kicks(), [kicked]);
        assert!(!vm.vcpu(2).unwrap().fences().is_empty());
        running.set_state(VcpuState::Frozen, false).unwrap();
        running.set_state(VcpuState::Idle, false).unwrap();
    }
}
