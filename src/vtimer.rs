// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use spin::Mutex;

use crate::platform::{OneShotTimer, Platform, TimerCallback};
use crate::vm_cpu::VcpuRunState;

const NANOS_PER_SEC: u128 = 1_000_000_000;
const NO_DEADLINE: u64 = u64::MAX;

struct VtimerExpiry<P: Platform> {
    pending: AtomicBool,
    // Bumped every time the deadline changes. Only an expiry stamped with the current generation
    // may assert the interrupt.
    generation: Mutex<u64>,
    vcpu: Arc<VcpuRunState<P>>,
}

impl<P: Platform> VtimerExpiry<P> {
    // Invalidates every outstanding expiry and sets the interrupt level. Returns the new
    // generation.
    fn restart(&self, pending: bool) -> u64 {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.pending.store(pending, Ordering::Release);
        *generation
    }

    fn fire(&self, stamp: u64) {
        {
            let generation = self.generation.lock();
            if *generation != stamp {
                return;
            }
            self.pending.store(true, Ordering::Release);
        }
        self.vcpu.notify();
    }
}

// One arming of the host timer.
struct ArmedDeadline<P: Platform> {
    stamp: u64,
    expiry: Arc<VtimerExpiry<P>>,
}

impl<P: Platform> TimerCallback for ArmedDeadline<P> {
    fn expired(&self) {
        self.expiry.fire(self.stamp);
    }
}

/// The supervisor timer of a vCPU, as programmed through the SBI TIME extension.
///
/// Deadlines are in timebase ticks. A deadline in the future is backed by a host one-shot timer
/// whose expiry marks the timer interrupt pending and wakes the vCPU. Programming a new deadline
/// invalidates the previous one, including an expiry that is already being delivered.
pub struct VirtualTimer<P: Platform> {
    frequency: u64,
    expiry: Arc<VtimerExpiry<P>>,
    timer: P::Timer,
    deadline: AtomicU64,
}

impl<P: Platform> VirtualTimer<P> {
    pub(crate) fn new(platform: &P, vcpu: Arc<VcpuRunState<P>>, frequency: u64) -> Self {
        Self {
            frequency,
            expiry: Arc::new(VtimerExpiry {
                pending: AtomicBool::new(false),
                generation: Mutex::new(0),
                vcpu,
            }),
            timer: platform.new_timer(),
            deadline: AtomicU64::new(NO_DEADLINE),
        }
    }

    /// Timebase frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Returns the programmed deadline, if one is outstanding.
    pub fn deadline(&self) -> Option<u64> {
        match self.deadline.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            d => Some(d),
        }
    }

    /// Returns true if the timer interrupt is asserted.
    pub fn pending(&self) -> bool {
        self.expiry.pending.load(Ordering::Acquire)
    }

    /// Programs the next timer interrupt for `target` ticks, given the current time `now`.
    /// A deadline that has already passed asserts the interrupt immediately; a future one
    /// deasserts it and arms the host timer. Returns true if the host timer was armed.
    pub fn set_timer(&self, now: u64, target: u64) -> bool {
        if target <= now {
            self.timer.cancel();
            self.deadline.store(NO_DEADLINE, Ordering::Release);
            self.expiry.restart(true);
            return false;
        }
        let stamp = self.expiry.restart(false);
        self.deadline.store(target, Ordering::Release);
        let delay = self.ticks_to_duration(target - now);
        let armed = ArmedDeadline {
            stamp,
            expiry: self.expiry.clone(),
        };
        self.timer.arm(delay, Arc::new(armed));
        true
    }

    /// Cancels the host timer and deasserts the interrupt.
    pub(crate) fn reset(&self) {
        self.timer.cancel();
        self.deadline.store(NO_DEADLINE, Ordering::Release);
        self.expiry.restart(false);
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let nanos = (ticks as u128 * NANOS_PER_SEC) / self.frequency as u128;
        let secs = nanos / NANOS_PER_SEC;
        if secs > u64::MAX as u128 {
            return Duration::MAX;
        }
        Duration::new(secs as u64, (nanos % NANOS_PER_SEC) as u32)
    }

    #[cfg(test)]
    pub(crate) fn host_timer(&self) -> &P::Timer {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::test_stubs::TestPlatform;
    use crate::vm_cpu::VmCpu;

    fn vcpu(frequency: u64) -> VmCpu<TestPlatform> {
        VmCpu::new(
            0,
            Arc::new(TestPlatform::default()),
            frequency,
            Duration::from_millis(10),
        )
    }

    #[test]
    fn past_deadline_is_pending() {
        let vcpu = vcpu(10_000_000);
        let timer = vcpu.timer();
        assert!(!timer.set_timer(1000, 999));
        assert!(timer.pending());
        assert_eq!(timer.deadline(), None);
        assert_eq!(timer.host_timer().armed(), None);
    }

    #[test]
    fn future_deadline_arms_host_timer() {
        let vcpu = vcpu(10_000_000);
        let timer = vcpu.timer();
        timer.set_timer(0, 0);
        assert!(timer.pending());
        // 25 ms at 10 MHz.
        assert!(timer.set_timer(1_000, 251_000));
        assert!(!timer.pending());
        assert_eq!(timer.deadline(), Some(251_000));
        assert_eq!(timer.host_timer().armed(), Some(Duration::from_millis(25)));
        timer.reset();
        assert_eq!(timer.host_timer().armed(), None);
        assert_eq!(timer.deadline(), None);
    }

    #[test]
    fn expiry_wakes_vcpu() {
        let vcpu = vcpu(1_000_000);
        // 5 ms at 1 MHz.
        assert!(vcpu.timer().set_timer(0, 5_000));
        let mut waited = 0;
        while !vcpu.timer().pending() && waited < 200 {
            vcpu.wait_for_wakeup(Duration::from_millis(10));
            waited += 1;
        }
        assert!(vcpu.timer().pending());
    }

    #[test]
    fn rearm_discards_earlier_deadline() {
        let vcpu = vcpu(1_000_000);
        let timer = vcpu.timer();
        // 2 ms, then 10 s at 1 MHz.
        assert!(timer.set_timer(0, 2_000));
        let earlier = timer.host_timer().last_callback().unwrap();
        assert!(timer.set_timer(0, 10_000_000));

        // The earlier expiry was already on its way when the deadline moved.
        earlier.expired();
        assert!(!timer.pending());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!timer.pending());
        assert_eq!(timer.deadline(), Some(10_000_000));

        // The current deadline still fires.
        timer.host_timer().last_callback().unwrap().expired();
        assert!(timer.pending());
        timer.reset();
    }

    #[test]
    fn reset_discards_armed_deadline() {
        let vcpu = vcpu(1_000_000);
        let timer = vcpu.timer();
        assert!(timer.set_timer(0, 1_000_000));
        let armed = timer.host_timer().last_callback().unwrap();
        timer.reset();
        armed.expired();
        assert!(!timer.pending());
    }

    #[test]
    fn huge_delta_does_not_overflow() {
        let vcpu = vcpu(1);
        assert_eq!(
            vcpu.timer().ticks_to_duration(u64::MAX),
            Duration::from_secs(u64::MAX)
        );
    }
}
