// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::{hvip, reason, scause};
use tock_registers::fields::FieldValue;
use tock_registers::LocalRegisterCopy;

/// Errors as a result of converting to/from CSR values and Trap enums.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Unknown cause value in CSR.
    UnknownCause(u64),

    /// Exception/interrupt cause can't be used with this CSR.
    InvalidCause,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Trap causes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    Interrupt(Interrupt),
    Exception(Exception),
}

impl Trap {
    /// Returns the Trap corresponding to the raw scause value.
    pub fn from_scause(csr: u64) -> Result<Self> {
        Self::try_from(LocalRegisterCopy::<u64, scause::Register>::new(csr))
    }

    /// Returns the raw scause value for this trap.
    pub fn to_scause(&self) -> u64 {
        match self {
            Trap::Interrupt(i) => (1 << 63) | *i as u64,
            Trap::Exception(e) => *e as u64,
        }
    }
}

impl TryFrom<LocalRegisterCopy<u64, scause::Register>> for Trap {
    type Error = Error;

    fn try_from(val: LocalRegisterCopy<u64, scause::Register>) -> Result<Self> {
        if val.is_set(scause::is_interrupt) {
            Ok(Trap::Interrupt(Interrupt::from_scause_reason(
                val.read(scause::reason),
            )?))
        } else {
            Ok(Trap::Exception(Exception::from_scause_reason(
                val.read(scause::reason),
            )?))
        }
    }
}

/// Interrupt causes.
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    UserSoft = 0,
    SupervisorSoft = 1,
    VirtualSupervisorSoft = 2,
    MachineSoft = 3,
    UserTimer = 4,
    SupervisorTimer = 5,
    VirtualSupervisorTimer = 6,
    MachineTimer = 7,
    UserExternal = 8,
    SupervisorExternal = 9,
    VirtualSupervisorExternal = 10,
    MachineExternal = 11,
    SupervisorGuestExternal = 12,
}

/// Exception causes.
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    InstructionMisaligned = 0,
    InstructionFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
    SupervisorEnvCall = 9,
    VirtualSupervisorEnvCall = 10,
    MachineEnvCall = 11,
    InstructionPageFault = 12,
    LoadPageFault = 13,
    StorePageFault = 15,
    GuestInstructionPageFault = 20,
    GuestLoadPageFault = 21,
    VirtualInstruction = 22,
    GuestStorePageFault = 23,
}

impl Interrupt {
    pub fn from_scause_reason(val: u64) -> Result<Self> {
        use Interrupt::*;
        let reason = LocalRegisterCopy::<u64, reason::Register>::new(val);
        if reason.read(reason::reserved) != 0 {
            return Err(Error::UnknownCause(val));
        }
        match reason.read(reason::std) {
            0 => Ok(UserSoft),
            1 => Ok(SupervisorSoft),
            2 => Ok(VirtualSupervisorSoft),
            3 => Ok(MachineSoft),
            4 => Ok(UserTimer),
            5 => Ok(SupervisorTimer),
            6 => Ok(VirtualSupervisorTimer),
            7 => Ok(MachineTimer),
            8 => Ok(UserExternal),
            9 => Ok(SupervisorExternal),
            10 => Ok(VirtualSupervisorExternal),
            11 => Ok(MachineExternal),
            12 => Ok(SupervisorGuestExternal),
            v => Err(Error::UnknownCause(v)),
        }
    }

    /// Returns the hvip bit that asserts this interrupt to a guest.
    pub fn to_hvip_field(&self) -> Result<FieldValue<u64, hvip::Register>> {
        match self {
            Interrupt::VirtualSupervisorSoft => Ok(hvip::vssoft.val(1)),
            Interrupt::VirtualSupervisorTimer => Ok(hvip::vstimer.val(1)),
            Interrupt::VirtualSupervisorExternal => Ok(hvip::vsext.val(1)),
            _ => Err(Error::InvalidCause),
        }
    }
}

impl Exception {
    pub fn from_scause_reason(val: u64) -> Result<Self> {
        use Exception::*;
        let reason = LocalRegisterCopy::<u64, reason::Register>::new(val);
        if reason.read(reason::reserved) != 0 {
            return Err(Error::UnknownCause(val));
        }
        match reason.read(reason::std) {
            0 => Ok(InstructionMisaligned),
            1 => Ok(InstructionFault),
            2 => Ok(IllegalInstruction),
            3 => Ok(Breakpoint),
            4 => Ok(LoadMisaligned),
            5 => Ok(LoadFault),
            6 => Ok(StoreMisaligned),
            7 => Ok(StoreFault),
            8 => Ok(UserEnvCall),
            9 => Ok(SupervisorEnvCall),
            10 => Ok(VirtualSupervisorEnvCall),
            11 => Ok(MachineEnvCall),
            12 => Ok(InstructionPageFault),
            13 => Ok(LoadPageFault),
            15 => Ok(StorePageFault),
            20 => Ok(GuestInstructionPageFault),
            21 => Ok(GuestLoadPageFault),
            22 => Ok(VirtualInstruction),
            23 => Ok(GuestStorePageFault),
            v => Err(Error::UnknownCause(v)),
        }
    }

    /// Returns true for the three second-stage (guest-physical) page faults.
    pub fn is_guest_page_fault(&self) -> bool {
        matches!(
            self,
            Exception::GuestInstructionPageFault
                | Exception::GuestLoadPageFault
                | Exception::GuestStorePageFault
        )
    }
}
