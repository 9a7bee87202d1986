// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::sync::atomic::{AtomicU64, Ordering};

use crate::exit::VmExitKind;

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-vCPU event counters.
#[derive(Debug, Default)]
pub struct VcpuStats {
    pub exits: Counter,
    pub inst_emul: Counter,
    pub wfi: Counter,
    pub ecall: Counter,
    pub paging: Counter,
    pub bogus: Counter,
    pub suspended: Counter,
    pub debug: Counter,
    pub hyp: Counter,
    /// Traps the classifier recognized but has no handling for.
    pub unhandled_traps: Counter,
    /// SBI calls serviced without leaving the hypervisor.
    pub sbi_handled: Counter,
    pub ipis_sent: Counter,
    /// Fence requests that overflowed a queue and became a full flush.
    pub fences_escalated: Counter,
    pub timer_armed: Counter,
}

/// A point-in-time copy of `VcpuStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VcpuStatsSnapshot {
    pub exits: u64,
    pub inst_emul: u64,
    pub wfi: u64,
    pub ecall: u64,
    pub paging: u64,
    pub bogus: u64,
    pub suspended: u64,
    pub debug: u64,
    pub hyp: u64,
    pub unhandled_traps: u64,
    pub sbi_handled: u64,
    pub ipis_sent: u64,
    pub fences_escalated: u64,
    pub timer_armed: u64,
}

impl VcpuStats {
    /// Counts an exit returned to the caller of `Vm::run`.
    pub fn record_exit(&self, kind: &VmExitKind) {
        self.exits.inc();
        let counter = match kind {
            VmExitKind::InstEmul { .. } => &self.inst_emul,
            VmExitKind::Wfi => &self.wfi,
            VmExitKind::Ecall { .. } => &self.ecall,
            VmExitKind::Paging { .. } => &self.paging,
            VmExitKind::Bogus => &self.bogus,
            VmExitKind::Suspended(_) => &self.suspended,
            VmExitKind::Debug => &self.debug,
            VmExitKind::Hyp(_) => &self.hyp,
        };
        counter.inc();
    }

    pub fn snapshot(&self) -> VcpuStatsSnapshot {
        VcpuStatsSnapshot {
            exits: self.exits.count(),
            inst_emul: self.inst_emul.count(),
            wfi: self.wfi.count(),
            ecall: self.ecall.count(),
            paging: self.paging.count(),
            bogus: self.bogus.count(),
            suspended: self.suspended.count(),
            debug: self.debug.count(),
            hyp: self.hyp.count(),
            unhandled_traps: self.unhandled_traps.count(),
            sbi_handled: self.sbi_handled.count(),
            ipis_sent: self.ipis_sent.count(),
            fences_escalated: self.fences_escalated.count(),
            timer_armed: self.timer_armed.count(),
        }
    }
}
