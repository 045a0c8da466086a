//! Table driven CAN bit timing
//!
//! Bit timing is looked up, never derived at runtime, so that every supported
//! (clock, bit rate) pair produces exactly the register values listed here.

use strum_macros::{Display, EnumIter};

use crate::channel::{TransportError, TransportResult};

/// Supported CAN bus bit rates
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitRate {
    /// 500 kbit/s (OBD-II default)
    #[strum(to_string = "500kbit/s")]
    Kbps500,
    /// 250 kbit/s
    #[strum(to_string = "250kbit/s")]
    Kbps250,
    /// 125 kbit/s
    #[strum(to_string = "125kbit/s")]
    Kbps125,
    /// 100 kbit/s
    #[strum(to_string = "100kbit/s")]
    Kbps100,
}

impl BitRate {
    /// Bit rate in bits per second
    pub const fn bits_per_second(&self) -> u32 {
        match self {
            BitRate::Kbps500 => 500_000,
            BitRate::Kbps250 => 250_000,
            BitRate::Kbps125 => 125_000,
            BitRate::Kbps100 => 100_000,
        }
    }
}

/// Bit timing in time quanta (Tq)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BitTimingConfig {
    /// Source clock cycles per time quantum
    pub prescaler: u16,
    /// Propagation + phase 1 segment
    pub seg1: u8,
    /// Phase 2 segment
    pub seg2: u8,
    /// Synchronization jump width
    pub sjw: u8,
}

impl BitTimingConfig {
    const fn new(prescaler: u16, seg1: u8, seg2: u8, sjw: u8) -> Self {
        Self {
            prescaler,
            seg1,
            seg2,
            sjw,
        }
    }

    /// Time quanta per bit, including the sync segment
    pub fn quanta_per_bit(&self) -> u32 {
        1 + self.seg1 as u32 + self.seg2 as u32
    }

    /// Sample point position in tenths of a percent
    pub fn sample_point_permille(&self) -> u32 {
        (1 + self.seg1 as u32) * 1000 / self.quanta_per_bit()
    }

    /// Bit rate this timing produces from `clock_hz`
    pub fn bit_rate(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.prescaler as u32 * self.quanta_per_bit())
    }
}

struct TimingEntry {
    clock_hz: u32,
    rate: BitRate,
    timing: BitTimingConfig,
}

/// System clock of the integrated controller
pub const NATIVE_CLOCK_HZ: u32 = 16_000_000;
/// Crystal of the SPI attached controller
pub const BRIDGED_CLOCK_HZ: u32 = 8_000_000;

const TIMING_TABLE: &[TimingEntry] = &[
    // 16MHz system clock
    TimingEntry {
        clock_hz: NATIVE_CLOCK_HZ,
        rate: BitRate::Kbps500,
        timing: BitTimingConfig::new(4, 5, 2, 1),
    },
    TimingEntry {
        clock_hz: NATIVE_CLOCK_HZ,
        rate: BitRate::Kbps250,
        timing: BitTimingConfig::new(8, 5, 2, 1),
    },
    TimingEntry {
        clock_hz: NATIVE_CLOCK_HZ,
        rate: BitRate::Kbps125,
        timing: BitTimingConfig::new(16, 5, 2, 1),
    },
    TimingEntry {
        clock_hz: NATIVE_CLOCK_HZ,
        rate: BitRate::Kbps100,
        timing: BitTimingConfig::new(10, 12, 3, 1),
    },
    // 8MHz crystal. Prescaler must be even (Tq = 2 * (BRP + 1) / Fosc)
    TimingEntry {
        clock_hz: BRIDGED_CLOCK_HZ,
        rate: BitRate::Kbps500,
        timing: BitTimingConfig::new(2, 5, 2, 1),
    },
    TimingEntry {
        clock_hz: BRIDGED_CLOCK_HZ,
        rate: BitRate::Kbps250,
        timing: BitTimingConfig::new(2, 12, 3, 1),
    },
    TimingEntry {
        clock_hz: BRIDGED_CLOCK_HZ,
        rate: BitRate::Kbps125,
        timing: BitTimingConfig::new(4, 12, 3, 1),
    },
    TimingEntry {
        clock_hz: BRIDGED_CLOCK_HZ,
        rate: BitRate::Kbps100,
        timing: BitTimingConfig::new(4, 15, 4, 1),
    },
];

/// Looks up bit timing for a controller clock
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BitTimingCalculator {
    clock_hz: u32,
}

impl BitTimingCalculator {
    /// Calculator for a controller clocked at `clock_hz`
    pub fn new(clock_hz: u32) -> Self {
        Self { clock_hz }
    }

    /// Source clock this calculator was created for
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Returns the tabled timing for `rate`.
    ///
    /// Fails with [TransportError::UnsupportedBitRate] if the clock / rate pair is not tabled,
    /// or the tabled quanta fall outside the generic CAN limits
    /// (seg1 1-16 Tq, seg2 1-8 Tq, sjw 1-4 Tq and not above seg2).
    pub fn timing(&self, rate: BitRate) -> TransportResult<BitTimingConfig> {
        let entry = TIMING_TABLE
            .iter()
            .find(|e| e.clock_hz == self.clock_hz && e.rate == rate)
            .ok_or(TransportError::UnsupportedBitRate(rate))?;
        let t = entry.timing;
        let fields_ok = t.prescaler >= 1
            && (1..=16).contains(&t.seg1)
            && (1..=8).contains(&t.seg2)
            && (1..=4).contains(&t.sjw)
            && t.sjw <= t.seg2;
        let rate_ok = self.clock_hz % (t.prescaler as u32 * t.quanta_per_bit()) == 0
            && t.bit_rate(self.clock_hz) == rate.bits_per_second();
        if fields_ok && rate_ok {
            Ok(t)
        } else {
            Err(TransportError::UnsupportedBitRate(rate))
        }
    }
}
