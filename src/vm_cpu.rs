// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;

use log::debug;
use spin::{Mutex, MutexGuard};

use crate::cpu_set::{CpuSet, CPU_SET_SIZE};
use crate::error::*;
use crate::fence::FenceQueue;
use crate::hyp_ctx::HypCtx;
use crate::platform::{InterruptController, Platform, WaitEvent};
use crate::stats::VcpuStats;
use crate::vtimer::VirtualTimer;
use crate::{HostCpuId, VcpuId};

/// The scheduling state of a vCPU.
///
/// A vCPU is `Idle` when no thread owns it. Exactly one thread at a time moves it out of `Idle`
/// into `Frozen`, and only that thread drives it through `Running` and `Sleeping` and back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcpuState {
    /// Not owned by any thread.
    Idle,
    /// Owned by a thread, not executing guest code.
    Frozen,
    /// Executing guest code on `hostcpu`.
    Running,
    /// Blocked waiting for an interrupt.
    Sleeping,
}

impl VcpuState {
    fn can_transition_to(self, next: VcpuState) -> bool {
        use VcpuState::*;
        matches!(
            (self, next),
            (Idle, Frozen)
                | (Frozen, Idle)
                | (Frozen, Running)
                | (Running, Frozen)
                | (Frozen, Sleeping)
                | (Sleeping, Frozen)
        )
    }
}

struct VcpuStatus {
    state: VcpuState,
    // Some exactly when the state is Running.
    hostcpu: Option<HostCpuId>,
}

/// The part of a vCPU that other threads and timer callbacks use to observe and wake it.
pub(crate) struct VcpuRunState<P: Platform> {
    id: VcpuId,
    platform: Arc<P>,
    status: Mutex<VcpuStatus>,
    // Signalled when there may be new work for a sleeping vCPU.
    wakeup: P::Event,
    // Signalled when the vCPU returns to Idle.
    idle: P::Event,
    freeze_waiters: AtomicUsize,
    idle_recheck: Duration,
}

impl<P: Platform> VcpuRunState<P> {
    fn new(id: VcpuId, platform: Arc<P>, idle_recheck: Duration) -> Self {
        Self {
            id,
            platform,
            status: Mutex::new(VcpuStatus {
                state: VcpuState::Idle,
                hostcpu: None,
            }),
            wakeup: P::Event::default(),
            idle: P::Event::default(),
            freeze_waiters: AtomicUsize::new(0),
            idle_recheck,
        }
    }

    fn state(&self) -> VcpuState {
        self.status.lock().state
    }

    fn hostcpu(&self) -> Option<HostCpuId> {
        self.status.lock().hostcpu
    }

    fn set_state(&self, next: VcpuState, from_idle: bool) -> Result<()> {
        if from_idle {
            return self.freeze_from_idle(next);
        }
        let mut status = self.status.lock();
        let prev = status.state;
        if !prev.can_transition_to(next) {
            return Err(Error::InvalidTransition { from: prev, to: next });
        }
        status.state = next;
        status.hostcpu = match next {
            VcpuState::Running => {
                let cpu = self.platform.this_cpu();
                debug_assert!(cpu < CPU_SET_SIZE, "host cpu {} can't be kicked", cpu);
                Some(cpu)
            }
            _ => None,
        };
        drop(status);
        debug!("vcpu {}: {:?} -> {:?}", self.id, prev, next);
        if next == VcpuState::Idle {
            self.idle.notify();
        }
        Ok(())
    }

    // Waits for the vCPU to become Idle, then takes it. The thread that owns it is asked to let go
    // by `freeze_waiters` plus a wakeup.
    fn freeze_from_idle(&self, next: VcpuState) -> Result<()> {
        if !VcpuState::Idle.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: VcpuState::Idle,
                to: next,
            });
        }
        loop {
            {
                let mut status = self.status.lock();
                if status.state == VcpuState::Idle {
                    status.state = next;
                    debug!("vcpu {}: Idle -> {:?}", self.id, next);
                    return Ok(());
                }
            }
            self.freeze_waiters.fetch_add(1, Ordering::AcqRel);
            self.notify();
            self.idle.wait_timeout(self.idle_recheck);
            self.freeze_waiters.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Wakes the vCPU: kicks its host CPU if it's running guest code elsewhere, and wakes it if
    /// it's sleeping.
    pub(crate) fn notify(&self) {
        if let Some(cpu) = self.hostcpu() {
            if cpu != self.platform.this_cpu() {
                let mut cpus = CpuSet::new();
                cpus.insert(cpu);
                self.platform.kick_cpus(&cpus);
            }
        }
        self.wakeup.notify();
    }

    fn freeze_requested(&self) -> bool {
        self.freeze_waiters.load(Ordering::Acquire) != 0
    }
}

/// A virtual hart.
pub struct VmCpu<P: Platform> {
    id: VcpuId,
    run_state: Arc<VcpuRunState<P>>,
    ctx: Mutex<HypCtx>,
    ipi_pending: AtomicBool,
    fences: FenceQueue,
    vtimer: VirtualTimer<P>,
    stats: VcpuStats,
}

impl<P: Platform> VmCpu<P> {
    pub(crate) fn new(
        id: VcpuId,
        platform: Arc<P>,
        timebase_frequency: u64,
        idle_recheck: Duration,
    ) -> Self {
        let run_state = Arc::new(VcpuRunState::new(id, platform.clone(), idle_recheck));
        let vtimer = VirtualTimer::new(&*platform, run_state.clone(), timebase_frequency);
        Self {
            id,
            run_state,
            ctx: Mutex::new(HypCtx::new(id)),
            ipi_pending: AtomicBool::new(false),
            fences: FenceQueue::new(),
            vtimer,
            stats: VcpuStats::default(),
        }
    }

    pub fn id(&self) -> VcpuId {
        self.id
    }

    pub fn state(&self) -> VcpuState {
        self.run_state.state()
    }

    /// Returns the host CPU running this vCPU, if it's running.
    pub fn hostcpu(&self) -> Option<HostCpuId> {
        self.run_state.hostcpu()
    }

    pub fn stats(&self) -> &VcpuStats {
        &self.stats
    }

    pub fn fences(&self) -> &FenceQueue {
        &self.fences
    }

    pub fn timer(&self) -> &VirtualTimer<P> {
        &self.vtimer
    }

    /// Moves the vCPU to `next`. With `from_idle`, blocks until the vCPU is Idle, asking its
    /// current owner to release it, and then takes ownership.
    pub fn set_state(&self, next: VcpuState, from_idle: bool) -> Result<()> {
        self.run_state.set_state(next, from_idle)
    }

    /// Wakes the vCPU so it notices new work.
    pub fn notify(&self) {
        self.run_state.notify();
    }

    /// Returns true if another thread is waiting for this vCPU to go Idle.
    pub fn freeze_requested(&self) -> bool {
        self.run_state.freeze_requested()
    }

    /// Marks a software interrupt pending and wakes the vCPU.
    pub fn post_ipi(&self) {
        self.ipi_pending.store(true, Ordering::Release);
        self.notify();
    }

    pub fn ipi_pending(&self) -> bool {
        self.ipi_pending.load(Ordering::Acquire)
    }

    pub(crate) fn take_ipi(&self) -> bool {
        self.ipi_pending.swap(false, Ordering::AcqRel)
    }

    /// Returns true if any interrupt source has something pending for the vCPU that hasn't been
    /// delivered to the guest yet.
    pub fn interrupt_pending(&self, intc: &dyn InterruptController) -> bool {
        self.ipi_pending() || self.vtimer.pending() || intc.pending(self.id)
    }

    // Whether a vCPU in WFI has something to take: a new interrupt, or a software interrupt it
    // was already shown and hasn't acknowledged. Only the thread that owns the vCPU calls this.
    pub(crate) fn wakeup_pending(&self, intc: &dyn InterruptController) -> bool {
        self.interrupt_pending(intc) || self.ctx.lock().software_interrupt_asserted()
    }

    pub(crate) fn lock_context(&self) -> MutexGuard<HypCtx> {
        self.ctx.lock()
    }

    pub(crate) fn wait_for_wakeup(&self, timeout: Duration) {
        self.run_state.wakeup.wait_timeout(timeout);
    }

    /// Returns the vCPU to its power-on state. The caller must have frozen it.
    pub(crate) fn reset(&self) {
        *self.ctx.lock() = HypCtx::new(self.id);
        self.ipi_pending.store(false, Ordering::Release);
        self.fences.clear();
        self.vtimer.reset();
    }
}
