//! Monotonic time source and delay used by every bounded wait in the crate

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;

/// Millisecond time source and blocking delay.
///
/// Backends never read the system clock directly, so a test can substitute
/// [super::simulation::SimulatedClock] and get deterministic timeouts.
pub trait Clock: Send {
    /// Milliseconds elapsed since an arbitrary, fixed epoch. Must never go backwards
    fn now_ms(&self) -> u64;

    /// Blocks the caller for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// [Clock] backed by [std::time::Instant] and [std::thread::sleep]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: Instant,
}

impl StdClock {
    /// Creates a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64))
    }
}

/// [Clock] for targets without a free running timer, built on an `embedded-hal` delay.
///
/// Time only moves by the delays performed through the clock. Every poll loop in the crate
/// delays between attempts, so its deadlines still expire. A transport and a session each
/// need their own clock, [DelayClock::share] gives the second one the same time.
#[derive(Debug)]
pub struct DelayClock<D> {
    delay: D,
    elapsed_ms: Arc<AtomicU64>,
}

impl<D: DelayNs> DelayClock<D> {
    /// Clock starting at 0ms
    pub fn new(delay: D) -> Self {
        Self {
            delay,
            elapsed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a clock on another delay provider that shares this clock's time
    pub fn share<E: DelayNs>(&self, delay: E) -> DelayClock<E> {
        DelayClock {
            delay,
            elapsed_ms: self.elapsed_ms.clone(),
        }
    }

    /// Gives back the delay provider
    pub fn release(self) -> D {
        self.delay
    }
}

impl<D: DelayNs + Send> Clock for DelayClock<D> {
    fn now_ms(&self) -> u64 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
        self.elapsed_ms.fetch_add(ms as u64, Ordering::SeqCst);
    }
}

/// A point in time after which a bounded wait gives up
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deadline {
    expires_at: u64,
}

impl Deadline {
    /// Deadline `timeout_ms` from the clock's current time
    pub fn after<C: Clock + ?Sized>(clock: &C, timeout_ms: u32) -> Self {
        Self {
            expires_at: clock.now_ms().saturating_add(timeout_ms as u64),
        }
    }

    /// True once the clock reached the deadline
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_ms() >= self.expires_at
    }

    /// Milliseconds left before the deadline, 0 once expired
    pub fn remaining_ms<C: Clock + ?Sized>(&self, clock: &C) -> u32 {
        self.expires_at
            .saturating_sub(clock.now_ms())
            .min(u32::MAX as u64) as u32
    }
}
