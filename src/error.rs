// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use crate::vm_cpu::VcpuState;
use crate::VcpuId;

/// Errors returned by VM and vCPU operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The VM name is empty or too long.
    InvalidName,
    /// The VM configuration is out of range.
    InvalidConfig,
    /// The vCPU ID is beyond the VM's maximum vCPU count.
    InvalidVcpuId(VcpuId),
    /// The vCPU doesn't exist and can't be created.
    VcpuNotFound(VcpuId),
    /// The vCPU is already in the active set.
    AlreadyActive(VcpuId),
    /// The vCPU isn't in the active set.
    NotActive(VcpuId),
    /// A suspend is already in progress.
    AlreadySuspended,
    /// Not every active vCPU is suspended.
    Busy,
    /// The vCPU state machine has no such edge.
    InvalidTransition { from: VcpuState, to: VcpuState },
}

/// Holds the result of a VM operation.
pub type Result<T> = core::result::Result<T, Error>;
