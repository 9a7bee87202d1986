// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Rust SBI message parsing.
//! `SbiMessage` is an enum of the SBI extensions a virtual hart may call.
//! For each extension, a function enum is defined to contain the SBI function data.
#![no_std]

mod base;
pub use base::*;
mod error;
pub use error::*;
mod function;
pub use function::*;
mod hart_mask;
pub use hart_mask::*;
mod ipi;
pub use ipi::*;
mod reset;
pub use reset::*;
mod rfence;
pub use rfence::*;
mod state;
pub use state::*;
mod timer;
pub use timer::*;

// Extension constants
pub const EXT_LEGACY_PUT_CHAR: u64 = 0x01;
pub const EXT_LEGACY_GET_CHAR: u64 = 0x02;
pub const EXT_BASE: u64 = 0x10;
pub const EXT_TIME: u64 = 0x54494D45;
pub const EXT_IPI: u64 = 0x735049;
pub const EXT_RFENCE: u64 = 0x52464E43;
pub const EXT_HART_STATE: u64 = 0x48534D;
pub const EXT_RESET: u64 = 0x53525354;

pub const SBI_SUCCESS: i64 = 0;

/// SBI spec version reported by BASE: major in bits 30:24, minor in bits 23:0.
pub const fn spec_version(major: u64, minor: u64) -> u64 {
    ((major & 0x7f) << 24) | (minor & 0xff_ffff)
}

/// The values returned in a0 and a1 from an SBI call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbiReturn {
    pub error_code: i64,
    pub return_value: u64,
}

impl SbiReturn {
    pub fn success(return_value: u64) -> Self {
        Self {
            error_code: SBI_SUCCESS,
            return_value,
        }
    }
}

impl From<Result<u64>> for SbiReturn {
    fn from(result: Result<u64>) -> SbiReturn {
        match result {
            Ok(rv) => Self::success(rv),
            Err(e) => Self::from(e),
        }
    }
}

impl From<Error> for SbiReturn {
    fn from(error: Error) -> SbiReturn {
        SbiReturn {
            error_code: error.to_code(),
            return_value: 0,
        }
    }
}

/// An SBI call made by a virtual hart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbiMessage {
    Base(BaseFunction),
    Timer(TimerFunction),
    Ipi(IpiFunction),
    RemoteFence(RemoteFenceFunction),
    HartState(StateFunction),
    Reset(ResetFunction),
    PutChar(u64),
    GetChar,
}

impl SbiMessage {
    /// Creates an SbiMessage from the caller's a0-a7. A7 selects the extension and the other
    /// registers are interpreted based on it. Unknown extensions and functions are
    /// `NotSupported`.
    pub fn from_regs(args: &[u64; 8]) -> Result<Self> {
        match args[7] {
            EXT_LEGACY_PUT_CHAR => Ok(SbiMessage::PutChar(args[0])),
            EXT_LEGACY_GET_CHAR => Ok(SbiMessage::GetChar),
            EXT_BASE => BaseFunction::from_regs(args).map(SbiMessage::Base),
            EXT_TIME => TimerFunction::from_regs(args).map(SbiMessage::Timer),
            EXT_IPI => IpiFunction::from_regs(args).map(SbiMessage::Ipi),
            EXT_RFENCE => RemoteFenceFunction::from_regs(args).map(SbiMessage::RemoteFence),
            EXT_HART_STATE => StateFunction::from_regs(args).map(SbiMessage::HartState),
            EXT_RESET => ResetFunction::from_regs(args).map(SbiMessage::Reset),
            _ => Err(Error::NotSupported),
        }
    }

    /// Returns the extension ID (a7) for this message.
    pub fn a7(&self) -> u64 {
        match self {
            SbiMessage::Base(_) => EXT_BASE,
            SbiMessage::Timer(_) => EXT_TIME,
            SbiMessage::Ipi(_) => EXT_IPI,
            SbiMessage::RemoteFence(_) => EXT_RFENCE,
            SbiMessage::HartState(_) => EXT_HART_STATE,
            SbiMessage::Reset(_) => EXT_RESET,
            SbiMessage::PutChar(_) => EXT_LEGACY_PUT_CHAR,
            SbiMessage::GetChar => EXT_LEGACY_GET_CHAR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(ext: u64, fid: u64, a: [u64; 5]) -> [u64; 8] {
        [a[0], a[1], a[2], a[3], a[4], 0, fid, ext]
    }

    #[test]
    fn parse_rfence() {
        let msg = SbiMessage::from_regs(&regs(EXT_RFENCE, 2, [0b101, 4, 0x1000, 0x2000, 7]));
        let expected = RemoteFenceFunction::SfenceVmaAsid {
            harts: HartMask::new(0b101, 4),
            start: 0x1000,
            size: 0x2000,
            asid: 7,
        };
        assert_eq!(msg, Ok(SbiMessage::RemoteFence(expected)));
        assert_eq!(
            expected.to_regs(),
            regs(EXT_RFENCE, 2, [0b101, 4, 0x1000, 0x2000, 7])
        );
    }

    #[test]
    fn unsupported_calls() {
        // Remote hfence.gvma is for nested hypervisors.
        assert_eq!(
            SbiMessage::from_regs(&regs(EXT_RFENCE, 3, [0; 5])),
            Err(Error::NotSupported)
        );
        assert_eq!(
            SbiMessage::from_regs(&regs(EXT_TIME, 1, [0; 5])),
            Err(Error::NotSupported)
        );
        assert_eq!(
            SbiMessage::from_regs(&regs(0x4442434E, 0, [0; 5])),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn parse_reset() {
        assert_eq!(
            SbiMessage::from_regs(&regs(EXT_RESET, 0, [0, 0, 0, 0, 0])),
            Ok(SbiMessage::Reset(ResetFunction::shutdown()))
        );
        assert_eq!(
            SbiMessage::from_regs(&regs(EXT_RESET, 0, [3, 0, 0, 0, 0])),
            Err(Error::InvalidParam)
        );
        let warm = ResetFunction::Reset {
            reset_type: ResetType::WarmReboot,
            reason: ResetReason::SystemFailure,
        };
        assert_eq!(warm.to_regs()[..2], [2, 1]);
    }

    #[test]
    fn hart_mask_ids() {
        let mut ids = HartMask::new(0b1011, 8).hart_ids();
        assert_eq!(ids.next(), Some(Ok(8)));
        assert_eq!(ids.next(), Some(Ok(9)));
        assert_eq!(ids.next(), Some(Ok(11)));
        assert_eq!(ids.next(), None);

        let mut absolute = HartMask::new(0b110, HartMask::ABSOLUTE_BASE).hart_ids();
        assert_eq!(absolute.next(), Some(Ok(1)));
        assert_eq!(absolute.next(), Some(Ok(2)));
        assert_eq!(absolute.next(), None);

        let mut overflow = HartMask::new(1 << 4, u64::MAX - 2).hart_ids();
        assert_eq!(overflow.next(), Some(Err(Error::InvalidParam)));
    }

    #[test]
    fn return_values() {
        assert_eq!(
            SbiReturn::from(Err(Error::InvalidParam)),
            SbiReturn {
                error_code: -3,
                return_value: 0
            }
        );
        assert_eq!(Error::from_code(-6), Error::AlreadyAvailable);
        assert_eq!(BaseFunction::GetImplementationID.result(0, 9), Ok(9));
        assert_eq!(spec_version(2, 0), 0x0200_0000);
    }
}
