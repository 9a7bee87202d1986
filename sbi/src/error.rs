// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// Errors passed over the SBI protocol.
///
/// Constants from the SBI [spec](https://github.com/riscv-non-isa/riscv-sbi-doc/releases).
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Generic failure in execution of the SBI call.
    Failed = -1,
    /// Extension or function is not supported.
    NotSupported = -2,
    /// Parameter passed isn't valid.
    InvalidParam = -3,
    /// Permission denied.
    Denied = -4,
    /// Address passed is invalid.
    InvalidAddress = -5,
    /// The given hart has already been started.
    AlreadyAvailable = -6,
    /// Some of the given counters have already been started.
    AlreadyStarted = -7,
    /// Some of the given counters have already been stopped.
    AlreadyStopped = -8,
    /// Shared memory isn't available.
    NoShmem = -9,
}

impl Error {
    /// Parse the given error code to an `Error` enum. Unknown codes are reported as `Failed`.
    pub fn from_code(e: i64) -> Self {
        use Error::*;
        match e {
            -2 => NotSupported,
            -3 => InvalidParam,
            -4 => Denied,
            -5 => InvalidAddress,
            -6 => AlreadyAvailable,
            -7 => AlreadyStarted,
            -8 => AlreadyStopped,
            -9 => NoShmem,
            _ => Failed,
        }
    }

    /// Returns the code placed in a0 to report this error to the caller.
    pub fn to_code(self) -> i64 {
        self as i64
    }
}

/// Holds the result of an SBI call.
pub type Result<T> = core::result::Result<T, Error>;
