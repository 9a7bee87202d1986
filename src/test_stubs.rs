// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Host, hart and collaborator doubles for unit tests. Each test thread acts as its own host CPU
//! with its own CSR file; guest behaviour is scripted per platform.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread_local;
use std::time::Duration;
use std::vec::Vec;

use riscv_regs::{CsrAccess, Exception, Interrupt, Trap, TrapCsrs, VsCsrs};

use crate::config::VmConfig;
use crate::cpu_set::{CpuSet, CPU_SET_SIZE};
use crate::hyp_ctx::VmCpuRegisters;
use crate::platform::*;
use crate::vm::Vm;
use crate::{HostCpuId, VcpuId};

static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THIS_CPU: HostCpuId = NEXT_CPU.fetch_add(1, Ordering::Relaxed) % CPU_SET_SIZE;
    static HVIP: Cell<u64> = Cell::new(0);
    static TRAP: Cell<TrapCsrs> = Cell::new(TrapCsrs::default());
    static VS_CSRS: Cell<VsCsrs> = Cell::new(VsCsrs::default());
    static FCSR: Cell<u64> = Cell::new(0);
}

/// A latched wakeup flag.
#[derive(Default)]
pub struct TestEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl WaitEvent for TestEvent {
    fn wait_timeout(&self, timeout: Duration) {
        let mut signalled = self.signalled.lock().unwrap();
        if !*signalled {
            signalled = self.cond.wait_timeout(signalled, timeout).unwrap().0;
        }
        *signalled = false;
    }

    fn notify(&self) {
        *self.signalled.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    armed: Option<Duration>,
    last_callback: Option<Arc<dyn TimerCallback>>,
}

/// A one-shot timer backed by a sleeping thread. Re-arming or cancelling bumps the generation so
/// that stale threads don't fire.
#[derive(Default)]
pub struct TestTimer {
    state: Arc<Mutex<TimerState>>,
}

impl TestTimer {
    /// Returns the delay of the outstanding deadline.
    pub fn armed(&self) -> Option<Duration> {
        self.state.lock().unwrap().armed
    }

    /// Returns the callback passed to the most recent `arm`, so tests can deliver an expiry by
    /// hand.
    pub fn last_callback(&self) -> Option<Arc<dyn TimerCallback>> {
        self.state.lock().unwrap().last_callback.clone()
    }
}

impl OneShotTimer for TestTimer {
    fn arm(&self, delay: Duration, callback: Arc<dyn TimerCallback>) {
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.armed = Some(delay);
            state.last_callback = Some(callback.clone());
            state.generation
        };
        let state = self.state.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let fire = {
                let mut state = state.lock().unwrap();
                let current = state.generation == generation;
                if current {
                    state.armed = None;
                }
                current
            };
            if fire {
                callback.expired();
            }
        });
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        state.armed = None;
    }
}

/// The calling thread's CSR file. The timebase is shared by every thread.
#[derive(Default)]
pub struct TestCsrs {
    time: AtomicU64,
}

impl CsrAccess for TestCsrs {
    fn time(&self) -> u64 {
        self.time.load(Ordering::Relaxed)
    }

    fn virtual_interrupts_pending(&self) -> u64 {
        HVIP.with(|hvip| hvip.get())
    }

    fn set_virtual_interrupts_pending(&self, pending: u64) {
        HVIP.with(|hvip| hvip.set(pending));
    }

    fn trap_csrs(&self) -> TrapCsrs {
        TRAP.with(|trap| trap.get())
    }

    fn load_vs_csrs(&self, csrs: &VsCsrs) {
        VS_CSRS.with(|vs| vs.set(*csrs));
    }

    fn save_vs_csrs(&self, csrs: &mut VsCsrs) {
        *csrs = VS_CSRS.with(|vs| vs.get());
    }
}

/// What the guest does on one entry: it may change its registers and `hvip`, and returns the
/// trap it takes.
pub type GuestScript = Arc<dyn Fn(&mut VmCpuRegisters, &mut u64) -> TrapCsrs + Send + Sync>;

pub fn guest_fn(
    f: impl Fn(&mut VmCpuRegisters, &mut u64) -> TrapCsrs + Send + Sync + 'static,
) -> GuestScript {
    Arc::new(f)
}

pub fn host_interrupt() -> TrapCsrs {
    TrapCsrs {
        scause: Trap::Interrupt(Interrupt::SupervisorTimer).to_scause(),
        ..Default::default()
    }
}

pub fn ecall_trap() -> TrapCsrs {
    TrapCsrs {
        scause: Exception::VirtualSupervisorEnvCall as u64,
        ..Default::default()
    }
}

pub fn wfi_trap() -> TrapCsrs {
    TrapCsrs {
        scause: Exception::VirtualInstruction as u64,
        stval: 0x1050_0073,
        ..Default::default()
    }
}

/// Makes each SBI call in `calls` (a0-a7) in turn, then takes host interrupts.
pub fn guest_ecalls(calls: &[[u64; 8]]) -> GuestScript {
    let calls = calls.to_vec();
    let step = AtomicUsize::new(0);
    guest_fn(move |regs, _| match calls.get(step.fetch_add(1, Ordering::Relaxed)) {
        Some(args) => {
            regs.guest_regs.gprs.a_regs_mut().copy_from_slice(args);
            ecall_trap()
        }
        None => host_interrupt(),
    })
}

/// Bumps `fcsr` in the live FP registers on every entry, then takes a host interrupt.
pub fn guest_bump_fcsr() -> GuestScript {
    guest_fn(|_, _| {
        FCSR.with(|fcsr| fcsr.set(fcsr.get() + 1));
        host_interrupt()
    })
}

pub fn guest_always_wfi() -> GuestScript {
    guest_fn(|_, _| wfi_trap())
}

pub fn guest_wfi_then_host_interrupt() -> GuestScript {
    let step = AtomicUsize::new(0);
    guest_fn(move |_, _| match step.fetch_add(1, Ordering::Relaxed) {
        0 => wfi_trap(),
        _ => host_interrupt(),
    })
}

pub fn guest_store_fault_then_host_interrupt(gpa: u64) -> GuestScript {
    let step = AtomicUsize::new(0);
    guest_fn(move |_, _| match step.fetch_add(1, Ordering::Relaxed) {
        0 => TrapCsrs {
            scause: Exception::GuestStorePageFault as u64,
            stval: gpa,
            htval: gpa >> 2,
            htinst: 0,
        },
        _ => host_interrupt(),
    })
}

/// A TLB or instruction cache operation issued through `HartArch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceOp {
    FenceI,
    VvmaAll,
    Vvma(u64, Option<u64>),
    VvmaAsid(u64),
}

pub struct TestArch {
    csrs: TestCsrs,
    guest: Mutex<GuestScript>,
    fences: Mutex<Vec<FenceOp>>,
    entries: AtomicUsize,
    entry_hvips: Mutex<Vec<u64>>,
}

impl Default for TestArch {
    fn default() -> Self {
        Self {
            csrs: TestCsrs::default(),
            guest: Mutex::new(guest_fn(|_, _| host_interrupt())),
            fences: Mutex::new(Vec::new()),
            entries: AtomicUsize::new(0),
            entry_hvips: Mutex::new(Vec::new()),
        }
    }
}

impl TestArch {
    pub fn set_guest(&self, script: GuestScript) {
        *self.guest.lock().unwrap() = script;
    }

    pub fn set_time(&self, now: u64) {
        self.csrs.time.store(now, Ordering::Relaxed);
    }

    /// Returns and forgets the fence operations issued so far.
    pub fn take_fences(&self) -> Vec<FenceOp> {
        core::mem::take(&mut *self.fences.lock().unwrap())
    }

    fn record(&self, op: FenceOp) {
        self.fences.lock().unwrap().push(op);
    }
}

impl HartArch for TestArch {
    type Csrs = TestCsrs;

    fn csrs(&self) -> &TestCsrs {
        &self.csrs
    }

    fn enter_guest(&self, regs: &mut VmCpuRegisters) {
        self.entries.fetch_add(1, Ordering::Relaxed);
        let script = self.guest.lock().unwrap().clone();
        let mut hvip = HVIP.with(|hvip| hvip.get());
        self.entry_hvips.lock().unwrap().push(hvip);
        let trap = script(regs, &mut hvip);
        HVIP.with(|cell| cell.set(hvip));
        TRAP.with(|cell| cell.set(trap));
    }

    fn install_guest_fpu(&self, regs: &VmCpuRegisters) {
        FCSR.with(|fcsr| fcsr.set(regs.fp.fcsr));
    }

    fn save_guest_fpu(&self, regs: &mut VmCpuRegisters) {
        regs.fp.fcsr = FCSR.with(|fcsr| fcsr.get());
    }

    fn fence_i(&self) {
        self.record(FenceOp::FenceI);
    }

    fn hfence_vvma_all(&self) {
        self.record(FenceOp::VvmaAll);
    }

    fn hfence_vvma(&self, vaddr: u64, asid: Option<u64>) {
        self.record(FenceOp::Vvma(vaddr, asid));
    }

    fn hfence_vvma_asid(&self, asid: u64) {
        self.record(FenceOp::VvmaAsid(asid));
    }
}

#[derive(Default)]
pub struct TestPlatform {
    arch: TestArch,
    kicks: Mutex<Vec<CpuSet>>,
    timebase: Option<u64>,
    host_cpu: Option<HostCpuId>,
}

impl TestPlatform {
    pub fn with_timebase(frequency: u64) -> Self {
        Self {
            timebase: Some(frequency),
            ..Default::default()
        }
    }

    /// Reports `cpu` from `this_cpu` on every thread.
    pub fn on_host_cpu(cpu: HostCpuId) -> Self {
        Self {
            host_cpu: Some(cpu),
            ..Default::default()
        }
    }

    pub fn set_guest(&self, script: GuestScript) {
        self.arch.set_guest(script);
    }

    pub fn guest_entries(&self) -> usize {
        self.arch.entries.load(Ordering::Relaxed)
    }

    /// Returns the `hvip` value the guest saw on each entry.
    pub fn entry_hvips(&self) -> Vec<u64> {
        self.arch.entry_hvips.lock().unwrap().clone()
    }

    pub fn kicks(&self) -> Vec<CpuSet> {
        self.kicks.lock().unwrap().clone()
    }
}

impl Platform for TestPlatform {
    type Arch = TestArch;
    type Event = TestEvent;
    type Timer = TestTimer;

    fn arch(&self) -> &TestArch {
        &self.arch
    }

    fn this_cpu(&self) -> HostCpuId {
        self.host_cpu.unwrap_or_else(|| THIS_CPU.with(|cpu| *cpu))
    }

    fn kick_cpus(&self, cpus: &CpuSet) {
        self.kicks.lock().unwrap().push(*cpus);
    }

    fn new_timer(&self) -> TestTimer {
        TestTimer::default()
    }

    fn timebase_frequency(&self) -> Option<u64> {
        self.timebase
    }
}

/// Guest memory with explicitly added RAM ranges and instructions.
#[derive(Default)]
pub struct TestMemory {
    ram: Mutex<Vec<(u64, u64)>>,
    instructions: Mutex<BTreeMap<u64, u32>>,
    faults: Mutex<Vec<u64>>,
    unresolvable: AtomicBool,
}

impl TestMemory {
    pub fn add_ram(&self, start: u64, size: u64) {
        self.ram.lock().unwrap().push((start, size));
    }

    pub fn set_instruction(&self, pc: u64, raw: u32) {
        self.instructions.lock().unwrap().insert(pc, raw);
    }

    pub fn set_resolvable(&self, resolvable: bool) {
        self.unresolvable.store(!resolvable, Ordering::Relaxed);
    }

    /// Returns the addresses passed to `fault_in`.
    pub fn faults(&self) -> Vec<u64> {
        self.faults.lock().unwrap().clone()
    }
}

impl GuestMemory for TestMemory {
    fn is_mapped(&self, gpa: u64) -> bool {
        self.ram
            .lock()
            .unwrap()
            .iter()
            .any(|&(start, size)| gpa >= start && gpa - start < size)
    }

    fn fault_in(&self, gpa: u64, _fault: Exception) -> bool {
        self.faults.lock().unwrap().push(gpa);
        !self.unresolvable.load(Ordering::Relaxed)
    }

    fn fetch_instruction(&self, _vcpu: VcpuId, pc: u64) -> Result<u32, u64> {
        self.instructions
            .lock()
            .unwrap()
            .get(&pc)
            .copied()
            .ok_or(Exception::GuestInstructionPageFault as u64)
    }
}

#[derive(Default)]
pub struct TestIntc {
    pending: Mutex<CpuSet>,
    injected: Mutex<Vec<(VcpuId, u32, bool)>>,
}

impl TestIntc {
    pub fn set_pending(&self, vcpu: VcpuId, pending: bool) {
        let mut set = self.pending.lock().unwrap();
        if pending {
            set.insert(vcpu);
        } else {
            set.remove(vcpu);
        }
    }

    pub fn injected(&self) -> Vec<(VcpuId, u32, bool)> {
        self.injected.lock().unwrap().clone()
    }
}

impl InterruptController for TestIntc {
    fn pending(&self, vcpu: VcpuId) -> bool {
        self.pending.lock().unwrap().contains(vcpu)
    }

    fn inject(&self, vcpu: VcpuId, irq: u32, level: bool) {
        self.injected.lock().unwrap().push((vcpu, irq, level));
        self.set_pending(vcpu, level);
    }
}

/// A configuration with short re-check intervals so that tests don't stall.
pub fn test_config(max_vcpus: usize) -> VmConfig {
    VmConfig {
        max_vcpus,
        timebase_frequency: Some(10_000_000),
        wfi_recheck: Duration::from_millis(10),
        suspend_recheck: Duration::from_millis(10),
        idle_recheck: Duration::from_millis(10),
    }
}

pub fn test_vm_with(
    platform: Arc<TestPlatform>,
    intc: Arc<TestIntc>,
    max_vcpus: usize,
) -> Vm<TestPlatform> {
    Vm::new(
        "test-vm",
        platform,
        Arc::new(TestMemory::default()),
        intc,
        test_config(max_vcpus),
    )
    .unwrap()
}

pub fn test_vm(max_vcpus: usize) -> Vm<TestPlatform> {
    test_vm_with(
        Arc::new(TestPlatform::default()),
        Arc::new(TestIntc::default()),
        max_vcpus,
    )
}
