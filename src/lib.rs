#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which reads live engine data and fault codes from a vehicle over OBD-II (SAE J1979),
//! on top of a small CAN transport layer for microcontroller class CAN controllers
//!
//! ## On-board diagnostics (OBD2)
//! [obd2::ObdSession] sends single frame functional requests (0x7DF) and accepts the first
//! matching response from an ECU in the 0x7E8-0x7EF range. It decodes the common service 01
//! parameters, reads stored, pending and permanent DTCs and clears them.
//!
//! ## Hardware support
//!
//! Every controller implements [channel::CanTransport], so the OBD layer never sees which
//! controller it is talking to.
//!
//! ### Integrated controller
//! [hardware::native::NativeCanTransport] drives a C_CAN style peripheral (32 message objects,
//! two interface register windows) through a [hardware::native::RegisterBlock].
//!
//! ### SPI attached controller
//! [hardware::bridged::BridgedCanTransport] drives an MCP2515 through any `embedded-hal` 1.0
//! [embedded_hal::spi::SpiBus] and chip select [embedded_hal::digital::OutputPin].
//!
//! ### Simulation
//! [hardware::simulation] provides a simulated ECU and clock for testing without hardware.

pub mod channel;
pub mod dtc;
pub mod hardware;
pub mod obd2;

use channel::TransportError;

/// OBD session result
pub type ObdResult<T> = Result<T, ObdError>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
/// OBD session error
pub enum ObdError {
    /// No ECU answered before the response timeout
    #[error("ECU did not respond to the request")]
    NoResponse,
    /// ECU responded, but the response could not be decoded
    /// (wrong length for the PID, or a multi-frame response)
    #[error("ECU response is malformed")]
    InvalidData,
    /// Error with the underlying CAN transport
    #[error("CAN transport error")]
    Transport(
        #[from]
        #[source]
        TransportError,
    ),
    /// ECUs only answered with a different service mode
    #[error("Requested mode 0x{:02X?}, but received mode 0x{:02X?}", expected, received)]
    ModeMismatch {
        /// Expected response mode (request mode | 0x40)
        expected: u8,
        /// Mode of the last mismatched response
        received: u8,
    },
    /// ECU rejected the request with a negative response (0x7F)
    #[error("ECU Negative response to mode 0x{:02X?}. Error 0x{:02X?}", mode, code)]
    NegativeResponse {
        /// Mode that was rejected
        mode: u8,
        /// Raw negative response code from the ECU
        code: u8,
    },
    /// A parameter given to the function is invalid. Check the function's documentation
    /// for more information
    #[error("OBD function parameter invalid")]
    InvalidParameter,
}
