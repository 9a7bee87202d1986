// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use log::warn;

use crate::cpu_set::CPU_SET_SIZE;
use crate::error::*;

/// Timebase frequency assumed when neither the configuration nor the platform provides one.
pub const DEFAULT_TIMEBASE_FREQUENCY: u64 = 10_000_000;

/// Upper bound on vCPUs per VM, set by the width of the vCPU bitsets.
pub const MAX_VCPUS: usize = CPU_SET_SIZE;

/// Longest accepted VM name, in bytes.
pub const MAX_VM_NAME_LEN: usize = 31;

/// Tunables for a VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of vCPU slots, between 1 and `MAX_VCPUS`.
    pub max_vcpus: usize,
    /// Timebase frequency in Hz. Overrides the platform's value when set.
    pub timebase_frequency: Option<u64>,
    /// Longest a vCPU sleeps in WFI before re-checking for work.
    pub wfi_recheck: Duration,
    /// Longest a vCPU sleeps waiting for the rest of the VM to suspend before re-checking.
    pub suspend_recheck: Duration,
    /// Longest a freezing thread waits for a vCPU to go idle before notifying it again.
    pub idle_recheck: Duration,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_vcpus: 16,
            timebase_frequency: None,
            wfi_recheck: Duration::from_secs(1),
            suspend_recheck: Duration::from_secs(1),
            idle_recheck: Duration::from_secs(1),
        }
    }
}

impl VmConfig {
    /// Checks that the configuration can be used to build a VM.
    pub fn validate(&self) -> Result<()> {
        if self.max_vcpus == 0 || self.max_vcpus > MAX_VCPUS {
            return Err(Error::InvalidConfig);
        }
        if self.timebase_frequency == Some(0) {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Picks the timebase frequency: the configured value, then the platform's, then the default.
    pub(crate) fn resolve_timebase(&self, platform: Option<u64>) -> u64 {
        if let Some(freq) = self.timebase_frequency {
            return freq;
        }
        match platform {
            Some(freq) if freq != 0 => freq,
            _ => {
                warn!(
                    "timebase frequency unavailable, assuming {} Hz",
                    DEFAULT_TIMEBASE_FREQUENCY
                );
                DEFAULT_TIMEBASE_FREQUENCY
            }
        }
    }
}
