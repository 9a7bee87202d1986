// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Decoding of the guest loads and stores that trap on unbacked guest physical memory.
use riscv_decode::{decode, instruction_length, Instruction};
use tock_registers::LocalRegisterCopy;

use crate::{htinst, GprIndex};

/// Errors from classifying a trapping instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The encoding isn't a valid instruction, or is a length we don't handle.
    Unknown(u32),
    /// The instruction is valid but doesn't access memory in a way we can emulate.
    NotLoadStore(u32),
}

/// Direction of an emulated access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDirection {
    Load,
    Store,
}

/// A load or store a guest attempted against unbacked guest physical memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    direction: AccessDirection,
    width: usize,
    sign_extend: bool,
    register: GprIndex,
    len: usize,
}

impl MemoryAccess {
    /// Classifies the raw instruction bits fetched from guest memory. `raw` may hold a 16-bit
    /// compressed instruction in its low half.
    pub fn decode(raw: u32) -> Result<Self, DecodeError> {
        match instruction_length(raw as u16) {
            2 => Self::decode_compressed(raw & 0xffff),
            4 => Self::decode_standard(raw, 4),
            _ => Err(DecodeError::Unknown(raw)),
        }
    }

    /// Classifies the transformed instruction the hardware reports in `htinst`. Bits 1:0 are
    /// 0b01 if the trapping instruction was compressed, otherwise the value is the standard
    /// encoding. Pseudo-instructions (implicit accesses during a guest page table walk) aren't
    /// loads or stores the guest issued and are rejected.
    pub fn from_transformed(htinst: u64) -> Result<Self, DecodeError> {
        let reg = LocalRegisterCopy::<u64, htinst::Register>::new(htinst);
        let raw = reg.read(htinst::instruction) as u32;
        match reg.read_as_enum(htinst::length) {
            Some(htinst::length::Value::Compressed) => Self::decode_standard(raw | 0x2, 2),
            Some(htinst::length::Value::Standard) => Self::decode_standard(raw, 4),
            None => Err(DecodeError::Unknown(raw)),
        }
    }

    fn decode_standard(raw: u32, len: usize) -> Result<Self, DecodeError> {
        use AccessDirection::*;
        use Instruction::*;
        let instruction = decode(raw).map_err(|_| DecodeError::Unknown(raw))?;
        let (direction, width, sign_extend, reg) = match instruction {
            Lb(i) => (Load, 1, true, i.rd()),
            Lh(i) => (Load, 2, true, i.rd()),
            Lw(i) => (Load, 4, true, i.rd()),
            Ld(i) => (Load, 8, true, i.rd()),
            Lbu(i) => (Load, 1, false, i.rd()),
            Lhu(i) => (Load, 2, false, i.rd()),
            Lwu(i) => (Load, 4, false, i.rd()),
            Sb(s) => (Store, 1, true, s.rs2()),
            Sh(s) => (Store, 2, true, s.rs2()),
            Sw(s) => (Store, 4, true, s.rs2()),
            Sd(s) => (Store, 8, true, s.rs2()),
            _ => return Err(DecodeError::NotLoadStore(raw)),
        };
        Ok(Self {
            direction,
            width,
            sign_extend,
            register: GprIndex::from_raw(reg).ok_or(DecodeError::Unknown(raw))?,
            len,
        })
    }

    fn decode_compressed(raw: u32) -> Result<Self, DecodeError> {
        use AccessDirection::*;
        let funct3 = (raw >> 13) & 0x7;
        // Quadrant 0 uses the 3-bit register fields (x8-x15); quadrant 2 is sp-relative with
        // full register fields.
        let (direction, width, register) = match (raw & 0x3, funct3) {
            (0b00, 0b010) => (Load, 4, GprIndex::from_compressed((raw >> 2) & 0x7)),
            (0b00, 0b011) => (Load, 8, GprIndex::from_compressed((raw >> 2) & 0x7)),
            (0b00, 0b110) => (Store, 4, GprIndex::from_compressed((raw >> 2) & 0x7)),
            (0b00, 0b111) => (Store, 8, GprIndex::from_compressed((raw >> 2) & 0x7)),
            (0b10, 0b010) | (0b10, 0b011) => {
                let rd = (raw >> 7) & 0x1f;
                if rd == 0 {
                    // Reserved encoding.
                    return Err(DecodeError::Unknown(raw));
                }
                let width = if funct3 == 0b010 { 4 } else { 8 };
                (Load, width, GprIndex::from_raw(rd))
            }
            (0b10, 0b110) => (Store, 4, GprIndex::from_raw((raw >> 2) & 0x1f)),
            (0b10, 0b111) => (Store, 8, GprIndex::from_raw((raw >> 2) & 0x1f)),
            _ => return Err(DecodeError::NotLoadStore(raw)),
        };
        Ok(Self {
            direction,
            width,
            sign_extend: true,
            register: register.ok_or(DecodeError::Unknown(raw))?,
            len: 2,
        })
    }

    /// Returns whether the guest was reading or writing.
    pub fn direction(&self) -> AccessDirection {
        self.direction
    }

    /// Returns the access width in bytes: 1, 2, 4 or 8.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns true if a loaded value is sign-extended into the destination register. Always
    /// true for stores.
    pub fn sign_extend(&self) -> bool {
        self.sign_extend
    }

    /// Returns the target register for the operation. Either 'rd' for loads, or 'rs2' for
    /// stores.
    pub fn register(&self) -> GprIndex {
        self.register
    }

    /// Returns the length of the trapping instruction.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }
}
