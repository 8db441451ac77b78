// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of exponential wait units before the breaker trips
pub(crate) const MAX_WAIT_UNITS: usize = 16;

/// # BusyBreaker
/// [`BusyBreaker`] is kind of a circuit-breaker and busy keeper for short delays on spin loops on the CPU.
///
/// Each call to [`BusyBreaker::spin`] burns exponentially more cycles than
/// the previous one; once the configured number of units is exhausted the
/// call fails, which the caller treats as a conflict it cannot wait out.
/// A bound of `None` spins forever.
pub struct BusyBreaker {
    unit: AtomicUsize,
    max_units: Option<usize>,
}

impl Default for BusyBreaker {
    fn default() -> Self {
        Self::new(Some(MAX_WAIT_UNITS))
    }
}

impl BusyBreaker {
    pub fn new(max_units: Option<usize>) -> Self {
        Self {
            unit: AtomicUsize::new(0),
            max_units,
        }
    }

    /// Keeps the CPU busy but hints to the CPU to reschedule the CPU time
    ///
    /// [`core::hint::spin_loop()`] may be available on the integrating system,
    /// otherwise this function call is just a busy loop, that wastes some CPU cycles
    pub fn spin(&self) -> Result<(), ()> {
        let unit = self.unit.load(Ordering::Acquire);
        match self.max_units {
            Some(max) if unit > max => Err(()),
            _ => {
                for _ in 0..(1usize << unit.min(MAX_WAIT_UNITS)) {
                    core::hint::spin_loop();
                }
                self.unit.store(unit.saturating_add(1), Ordering::Release);

                Ok(())
            }
        }
    }

    /// Resets the breaker to zero
    pub fn reset(&self) {
        self.unit.store(0, Ordering::Release);
    }
}
