// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Tock Register interface for using CSR registers, and the named CSR operations the hypervisor
//! is written against.

pub mod csr_access;
pub mod defs;
pub mod traps;

pub use tock_registers::interfaces::ReadWriteable;
pub use tock_registers::interfaces::Readable;
pub use tock_registers::interfaces::Writeable;
pub use tock_registers::LocalRegisterCopy;

pub use defs::*;
pub use traps::*;

use csr_access::ReadWriteRiscvCsr;

/// The CSRs the hardware latches when a guest traps into HS-mode. They are clobbered by the next
/// trap, so they are captured once, immediately after the guest exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapCsrs {
    pub scause: u64,
    pub stval: u64,
    pub htval: u64,
    pub htinst: u64,
}

impl TrapCsrs {
    /// Returns the guest physical address of a guest page fault. `htval` holds the address
    /// shifted right by 2; the low bits come from `stval`.
    pub fn guest_fault_address(&self) -> u64 {
        (self.htval << 2) | (self.stval & 0x3)
    }
}

/// Shadow of the VS-level CSRs that belong to a virtual hart. Swapped in before entering the
/// guest and swapped out after it exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct VsCsrs {
    pub vsstatus: u64,
    pub vsie: u64,
    pub vstvec: u64,
    pub vsscratch: u64,
    pub vsepc: u64,
    pub vscause: u64,
    pub vstval: u64,
    pub vsatp: u64,
    pub scounteren: u64,
}

/// Named CSR operations used on the guest entry/exit path.
pub trait CsrAccess {
    /// Reads the hart's timebase counter.
    fn time(&self) -> u64;

    /// Reads the virtual interrupts currently asserted to the guest (`hvip`).
    fn virtual_interrupts_pending(&self) -> u64;

    /// Replaces the virtual interrupts asserted to the guest (`hvip`).
    fn set_virtual_interrupts_pending(&self, pending: u64);

    /// Captures the trap CSRs after a guest exit.
    fn trap_csrs(&self) -> TrapCsrs;

    /// Installs a guest's VS-level CSRs.
    fn load_vs_csrs(&self, csrs: &VsCsrs);

    /// Saves the hart's current VS-level CSRs into `csrs`.
    fn save_vs_csrs(&self, csrs: &mut VsCsrs);
}

/// The hart's physical CSRs.
pub struct HartCsrs {
    pub scounteren: ReadWriteRiscvCsr<sstatus::Register, CSR_SCOUNTEREN>,
    pub scause: ReadWriteRiscvCsr<scause::Register, CSR_SCAUSE>,
    pub stval: ReadWriteRiscvCsr<sstatus::Register, CSR_STVAL>,
    pub time: ReadWriteRiscvCsr<sstatus::Register, CSR_TIME>,
    pub hvip: ReadWriteRiscvCsr<hvip::Register, CSR_HVIP>,
    pub htval: ReadWriteRiscvCsr<sstatus::Register, CSR_HTVAL>,
    pub htinst: ReadWriteRiscvCsr<htinst::Register, CSR_HTINST>,
    pub vsstatus: ReadWriteRiscvCsr<sstatus::Register, CSR_VSSTATUS>,
    pub vsie: ReadWriteRiscvCsr<sstatus::Register, CSR_VSIE>,
    pub vstvec: ReadWriteRiscvCsr<sstatus::Register, CSR_VSTVEC>,
    pub vsscratch: ReadWriteRiscvCsr<sstatus::Register, CSR_VSSCRATCH>,
    pub vsepc: ReadWriteRiscvCsr<sstatus::Register, CSR_VSEPC>,
    pub vscause: ReadWriteRiscvCsr<scause::Register, CSR_VSCAUSE>,
    pub vstval: ReadWriteRiscvCsr<sstatus::Register, CSR_VSTVAL>,
    pub vsatp: ReadWriteRiscvCsr<sstatus::Register, CSR_VSATP>,
}

// Define the "addresses" of each CSR register.
pub const CSR: &HartCsrs = &HartCsrs {
    scounteren: ReadWriteRiscvCsr::new(),
    scause: ReadWriteRiscvCsr::new(),
    stval: ReadWriteRiscvCsr::new(),
    time: ReadWriteRiscvCsr::new(),
    hvip: ReadWriteRiscvCsr::new(),
    htval: ReadWriteRiscvCsr::new(),
    htinst: ReadWriteRiscvCsr::new(),
    vsstatus: ReadWriteRiscvCsr::new(),
    vsie: ReadWriteRiscvCsr::new(),
    vstvec: ReadWriteRiscvCsr::new(),
    vsscratch: ReadWriteRiscvCsr::new(),
    vsepc: ReadWriteRiscvCsr::new(),
    vscause: ReadWriteRiscvCsr::new(),
    vstval: ReadWriteRiscvCsr::new(),
    vsatp: ReadWriteRiscvCsr::new(),
};

impl CsrAccess for HartCsrs {
    fn time(&self) -> u64 {
        self.time.get()
    }

    fn virtual_interrupts_pending(&self) -> u64 {
        self.hvip.get()
    }

    fn set_virtual_interrupts_pending(&self, pending: u64) {
        self.hvip.set(pending);
    }

    fn trap_csrs(&self) -> TrapCsrs {
        TrapCsrs {
            scause: self.scause.get(),
            stval: self.stval.get(),
            htval: self.htval.get(),
            htinst: self.htinst.get(),
        }
    }

    fn load_vs_csrs(&self, csrs: &VsCsrs) {
        self.vsstatus.set(csrs.vsstatus);
        self.vsie.set(csrs.vsie);
        self.vstvec.set(csrs.vstvec);
        self.vsscratch.set(csrs.vsscratch);
        self.vsepc.set(csrs.vsepc);
        self.vscause.set(csrs.vscause);
        self.vstval.set(csrs.vstval);
        self.vsatp.set(csrs.vsatp);
        self.scounteren.set(csrs.scounteren);
    }

    fn save_vs_csrs(&self, csrs: &mut VsCsrs) {
        csrs.vsstatus = self.vsstatus.get();
        csrs.vsie = self.vsie.get();
        csrs.vstvec = self.vstvec.get();
        csrs.vsscratch = self.vsscratch.get();
        csrs.vsepc = self.vsepc.get();
        csrs.vscause = self.vscause.get();
        csrs.vstval = self.vstval.get();
        csrs.vsatp = self.vsatp.get();
        csrs.scounteren = self.scounteren.get();
    }
}
