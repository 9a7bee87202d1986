// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! General purpose and floating point registers for RISC-V 64.

/// Array of rv64 general purpose registers with accessors/setters.
/// Holds the state of a guest hart while it isn't running, and the host's callee state while it
/// is. `repr(C)` because it is referenced from the world-switch assembly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GeneralPurposeRegisters([u64; 32]);

/// Index of risc-v general purpose registers in `GeneralPurposeRegisters`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GprIndex {
    Zero = 0,
    RA,
    SP,
    GP,
    TP,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

impl GprIndex {
    const ALL: [GprIndex; 32] = {
        use GprIndex::*;
        [
            Zero, RA, SP, GP, TP, T0, T1, T2, S0, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4,
            S5, S6, S7, S8, S9, S10, S11, T3, T4, T5, T6,
        ]
    };

    /// Returns the register with architectural number `raw`, if there is one.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Returns the register addressed by the 3-bit `rd'`/`rs2'` field of a compressed
    /// instruction, which can only name x8-x15.
    pub fn from_compressed(raw: u32) -> Option<Self> {
        if raw > 7 {
            return None;
        }
        Self::from_raw(raw + 8)
    }
}

impl GeneralPurposeRegisters {
    /// Returns the value of the given register.
    pub fn reg(&self, reg_index: GprIndex) -> u64 {
        self.0[reg_index as usize]
    }

    /// Sets the value of the given register. Writes to `zero` are discarded.
    pub fn set_reg(&mut self, reg_index: GprIndex, val: u64) {
        if reg_index == GprIndex::Zero {
            return;
        }

        self.0[reg_index as usize] = val;
    }

    /// Returns the argument registers a0-a7, which carry an SBI call.
    pub fn a_regs(&self) -> &[u64] {
        &self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }

    /// Returns the argument registers as a mutable slice.
    pub fn a_regs_mut(&mut self) -> &mut [u64] {
        &mut self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }
}

/// The (double-precision) floating point register file and its control register. The guest's
/// floating point state is only ever saved and restored, never interpreted, so the registers are
/// plain 64-bit values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FloatingPointRegisters {
    pub fprs: [u64; 32],
    pub fcsr: u64,
}
