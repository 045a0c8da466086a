//! The hardware module contains the CAN controller backends
//! that implement [crate::channel::CanTransport]
//!
//! ## Native
//! [native::NativeCanTransport] drives a microcontroller's integrated CAN peripheral
//! through its two message interface register windows (IF1 for transmit, IF2 for receive).
//!
//! ## Bridged
//! [bridged::BridgedCanTransport] drives an external MCP2515 style controller
//! through its SPI instruction set.
//!
//! ## Simulation
//! [simulation] contains a simulated ECU and clock for exercising the OBD layer without hardware

pub mod bit_timing;
pub mod bridged;
pub mod clock;
pub mod native;
pub mod simulation;

pub use bit_timing::{BitRate, BitTimingCalculator, BitTimingConfig};
pub use clock::{Clock, Deadline, DelayClock, StdClock};

/// Contains details about the resources a CAN controller backend offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransportCapabilities {
    /// Name of the backend
    pub name: &'static str,
    /// First usable acceptance filter slot
    pub first_filter_slot: u8,
    /// Last usable acceptance filter slot
    pub last_filter_slot: u8,
    /// Number of acceptance masks (0 = one mask per filter slot)
    pub masks: u8,
    /// Number of hardware transmit buffers
    pub tx_buffers: u8,
    /// Number of hardware receive buffers
    pub rx_buffers: u8,
    /// Supports 29bit identifiers
    pub extended_ids: bool,
    /// Supports internal loopback
    pub loopback: bool,
}

impl TransportCapabilities {
    /// Returns true if `slot` can hold an acceptance filter
    pub fn is_valid_filter_slot(&self, slot: u8) -> bool {
        (self.first_filter_slot..=self.last_filter_slot).contains(&slot)
    }
}
