// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timing service: reference-clock delays and core-clock measurement.
//!
//! Device timing requirements are stated in real time, but the only real-time
//! source available this early is the free-running reference counter (CLINT
//! `mtime`), which ticks at a board-dependent rate published in a register.
//! Everything here converts microseconds into those ticks and spins on them.
//!
//! No spin in this module is unbounded. If the reference counter stops
//! advancing we would otherwise hang forever with nothing on the console, so
//! each spin also counts its own polls and gives up once it has polled more
//! often than the core could possibly manage in the requested interval.

use crate::error::FlashError;

/// Free-running reference tick counter.
pub trait Timer {
    fn now(&self) -> u64;
}

/// Free-running core cycle counter.
pub trait CycleCounter {
    fn cycles(&self) -> u64;
}

/// Clock rates for one flash attempt. Measured once at startup, read-only
/// afterwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockContext {
    pub reference_hz: u32,
    pub core_hz: u64,
}

impl ClockContext {
    /// Upper bound on how many timer polls fit in one reference tick. A poll
    /// takes at least one core cycle.
    fn polls_per_tick(&self) -> u64 {
        self.core_hz / u64::from(self.reference_hz.max(1)) + 1
    }
}

/// Headroom on the poll ceiling. Only a stopped reference clock should ever
/// come near it.
const SPIN_SLACK: u64 = 4;

/// Number of reference ticks to wait for `delay_us` microseconds to have
/// certainly passed.
///
/// The conversion rounds up, and then one more tick is added: we don't know
/// where within the current tick the wait starts, so the first tick we observe
/// may be nearly over already.
pub fn settle_ticks(delay_us: u32, reference_hz: u32) -> u64 {
    (u64::from(delay_us) * u64::from(reference_hz)).div_ceil(1_000_000) + 1
}

/// Busy-wait helper bound to one timer and clock context.
pub struct Delay<'a> {
    timer: &'a dyn Timer,
    clock: ClockContext,
}

impl<'a> Delay<'a> {
    pub fn new(timer: &'a dyn Timer, clock: ClockContext) -> Self {
        Self { timer, clock }
    }

    pub fn clock(&self) -> ClockContext {
        self.clock
    }

    /// Spins until `ticks` reference ticks have elapsed.
    pub fn spin_ticks(&self, ticks: u64) -> Result<(), FlashError> {
        let limit = ticks
            .saturating_add(1)
            .saturating_mul(self.clock.polls_per_tick())
            .saturating_mul(SPIN_SLACK);
        let start = self.timer.now();
        let mut polls = 0u64;
        while self.timer.now().wrapping_sub(start) < ticks {
            polls += 1;
            if polls > limit {
                return Err(FlashError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Spins for at least `us` microseconds.
    pub fn spin_us(&self, us: u32) -> Result<(), FlashError> {
        self.spin_ticks(settle_ticks(us, self.clock.reference_hz))
    }

    /// Starts a deadline `us` microseconds from now, for loops that poll a
    /// device until it is ready.
    pub fn deadline_us(&self, us: u32) -> Deadline {
        Deadline {
            start: self.timer.now(),
            ticks: settle_ticks(us, self.clock.reference_hz),
        }
    }

    pub fn expired(&self, deadline: &Deadline) -> bool {
        self.timer.now().wrapping_sub(deadline.start) >= deadline.ticks
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Deadline {
    start: u64,
    ticks: u64,
}

/// Ceiling on polls per reference tick during measurement, where we don't yet
/// know the core clock. No core we run on is 16M times faster than its
/// reference clock.
const MEASURE_POLLS_PER_TICK: u64 = 1 << 24;

/// Estimates the core frequency by counting core cycles over `ticks` reference
/// ticks.
///
/// The measurement window starts on a tick edge so that the partial tick we
/// happened to start in doesn't skew the result.
pub fn measure_core_frequency(
    timer: &dyn Timer,
    counter: &dyn CycleCounter,
    reference_hz: u32,
    ticks: u64,
) -> Result<u64, FlashError> {
    let limit = ticks.saturating_add(2).saturating_mul(MEASURE_POLLS_PER_TICK);
    let mut polls = 0u64;
    let mut poll = || {
        polls += 1;
        if polls > limit {
            Err(FlashError::Timeout)
        } else {
            Ok(())
        }
    };

    let edge = timer.now();
    let mut start = edge;
    while start == edge {
        poll()?;
        start = timer.now();
    }
    let start_cycles = counter.cycles();

    while timer.now().wrapping_sub(start) < ticks {
        poll()?;
    }
    let elapsed_cycles = counter.cycles().wrapping_sub(start_cycles);

    Ok(elapsed_cycles * u64::from(reference_hz) / ticks.max(1))
}
