//! Module for the CAN transport layer shared by every controller backend
//!
//! A [CanTransport] owns one CAN controller (either an integrated peripheral or an
//! external SPI attached chip) and exposes the same frame level operations for both.
//! Higher layers such as [crate::obd2::ObdSession] only ever hold a `Box<dyn CanTransport>`

use bitflags::bitflags;

use crate::hardware::{BitRate, TransportCapabilities};

/// Transport layer result
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
/// Error produced by a CAN transport
pub enum TransportError {
    /// No transmit buffer is free. Only the bridged controller can run out of Tx buffers
    #[error("No free transmit buffer")]
    BufferFull,
    /// Frame is malformed (DLC larger than 8, or ID too wide for its kind)
    #[error("Invalid CAN frame")]
    InvalidFrame,
    /// Filter / message object slot is outside the controller's capacity
    #[error("Filter slot {0} is not available on this controller")]
    InvalidSlot(u8),
    /// A bounded wait ran out of time
    #[error("Transport operation timed out")]
    Timeout,
    /// The controller (or the bus used to reach it) reported a fault
    #[error("Controller hardware fault: {0}")]
    HardwareFault(String),
    /// Requested bit rate cannot be produced from the controller's clock
    #[error("Bit rate {0} is not supported for this controller clock")]
    UnsupportedBitRate(BitRate),
    /// Operation requires [CanTransport::init] to be called first
    #[error("Transport is not initialized")]
    NotInitialized,
}

/// CAN identifier width
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdKind {
    /// 11bit identifier
    #[default]
    Standard,
    /// 29bit identifier
    Extended,
}

impl IdKind {
    /// Largest identifier representable with this kind
    pub const fn max_id(&self) -> u32 {
        match self {
            IdKind::Standard => 0x7FF,
            IdKind::Extended => 0x1FFF_FFFF,
        }
    }
}

/// Maximum payload of a classic CAN frame
pub const CAN_MAX_DLC: usize = 8;

/// A classic CAN data frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFrame {
    id: u32,
    kind: IdKind,
    dlc: u8,
    data: [u8; CAN_MAX_DLC],
}

impl CanFrame {
    /// Creates a new CAN frame
    ///
    /// ## Parameters
    /// * id - Frame identifier. Must fit within the width of `kind`
    /// * data - Payload. At most 8 bytes
    /// * kind - Standard or extended identifier
    pub fn new(id: u32, data: &[u8], kind: IdKind) -> TransportResult<Self> {
        if data.len() > CAN_MAX_DLC || id > kind.max_id() {
            return Err(TransportError::InvalidFrame);
        }
        let mut buf = [0u8; CAN_MAX_DLC];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            kind,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// Creates a frame with an 11bit identifier
    pub fn new_standard(id: u32, data: &[u8]) -> TransportResult<Self> {
        Self::new(id, data, IdKind::Standard)
    }

    /// Creates a frame with a 29bit identifier
    pub fn new_extended(id: u32, data: &[u8]) -> TransportResult<Self> {
        Self::new(id, data, IdKind::Extended)
    }

    /// Builds a frame from raw controller fields. DLC values above 8 are clamped,
    /// which the CAN specification defines as an 8 byte payload.
    pub(crate) fn from_raw(id: u32, kind: IdKind, dlc: u8, data: [u8; CAN_MAX_DLC]) -> Self {
        Self {
            id: id & kind.max_id(),
            kind,
            dlc: dlc.min(CAN_MAX_DLC as u8),
            data,
        }
    }

    /// Re-checks the frame invariants
    pub fn validate(&self) -> TransportResult<()> {
        if self.dlc as usize > CAN_MAX_DLC || self.id > self.kind.max_id() {
            Err(TransportError::InvalidFrame)
        } else {
            Ok(())
        }
    }

    /// Returns the frame identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the identifier kind
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Returns true if the frame uses a 29bit identifier
    pub fn is_extended(&self) -> bool {
        self.kind == IdKind::Extended
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Payload bytes (only the first `dlc` bytes)
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// All 8 payload bytes, including the ones beyond the DLC
    pub(crate) fn raw_data(&self) -> &[u8; CAN_MAX_DLC] {
        &self.data
    }
}

/// Acceptance filter programmed into a controller slot.
///
/// For every bit set in `mask`, the incoming identifier must equal the
/// corresponding bit of `id`. Cleared mask bits are don't-care.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcceptanceFilter {
    /// Identifier kind the filter applies to
    pub kind: IdKind,
    /// Identifier to match
    pub id: u32,
    /// Mask. 1 = must match, 0 = don't care
    pub mask: u32,
}

impl AcceptanceFilter {
    /// Filter that only lets through exactly one standard identifier
    pub fn exact_standard(id: u32) -> Self {
        Self {
            kind: IdKind::Standard,
            id,
            mask: IdKind::Standard.max_id(),
        }
    }

    /// Filter that accepts every frame of the given kind
    pub fn accept_all(kind: IdKind) -> Self {
        Self { kind, id: 0, mask: 0 }
    }

    /// Filter for the OBD-II ECU response range (0x7E8-0x7EF)
    pub fn obd_responses() -> Self {
        Self {
            kind: IdKind::Standard,
            id: 0x7E8,
            mask: 0x7F8,
        }
    }

    /// Checks `id` and `mask` fit the filter kind
    pub fn validate(&self) -> TransportResult<()> {
        if self.id > self.kind.max_id() || self.mask > self.kind.max_id() {
            Err(TransportError::InvalidFrame)
        } else {
            Ok(())
        }
    }

    /// Software evaluation of the filter against a frame
    pub fn matches(&self, frame: &CanFrame) -> bool {
        frame.kind() == self.kind && (frame.id() ^ self.id) & self.mask == 0
    }
}

bitflags! {
    /// Snapshot of a controller's error state
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ErrorFlags: u16 {
        /// One of the error counters reached the warning level (96)
        const WARNING = 1 << 0;
        /// Receive error counter reached the warning level
        const RX_WARNING = 1 << 1;
        /// Transmit error counter reached the warning level
        const TX_WARNING = 1 << 2;
        /// Controller is error passive
        const ERROR_PASSIVE = 1 << 3;
        /// Controller is bus-off and no longer participates on the bus
        const BUS_OFF = 1 << 4;
        /// A received frame was lost because the receive buffer was full
        const RX_OVERFLOW = 1 << 5;
        /// Last bus event was a protocol error (stuff, form, ack, bit or CRC)
        const PROTOCOL_ERROR = 1 << 6;
        /// The controller could not be queried
        const HARDWARE_FAULT = 1 << 7;
    }
}

/// Transport configuration, applied by [CanTransport::init]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportConfig {
    /// Bus bit rate
    pub bit_rate: BitRate,
    /// Route transmitted frames straight back to the receiver (self test without a bus)
    pub loopback: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bit_rate: BitRate::Kbps500,
            loopback: false,
        }
    }
}

/// Frame level access to a CAN controller.
///
/// Every blocking call is bounded, either by the caller supplied timeout or by
/// a fixed budget inside the backend.
pub trait CanTransport: Send {
    /// Brings the controller from reset into its operating mode.
    /// Calling this again after [CanTransport::reset] re-initializes the controller
    fn init(&mut self, config: &TransportConfig) -> TransportResult<()>;

    /// Queues a frame and commits it for transmission
    fn transmit(&mut self, frame: &CanFrame) -> TransportResult<()>;

    /// Waits for a frame, polling every millisecond.
    ///
    /// ## Parameters
    /// * timeout_ms - Maximum time to wait. A value of 0 checks exactly once
    fn receive(&mut self, timeout_ms: u32) -> TransportResult<CanFrame>;

    /// Installs an acceptance filter into a hardware slot
    fn configure_filter(&mut self, slot: u8, filter: &AcceptanceFilter) -> TransportResult<()>;

    /// Non blocking snapshot of the controller's error state
    fn error_status(&mut self) -> ErrorFlags;

    /// Returns the controller to its power-on configuration state
    fn reset(&mut self);

    /// Describes the controller's resources
    fn capabilities(&self) -> &TransportCapabilities;
}

impl<T: CanTransport + ?Sized> CanTransport for Box<T> {
    fn init(&mut self, config: &TransportConfig) -> TransportResult<()> {
        (**self).init(config)
    }

    fn transmit(&mut self, frame: &CanFrame) -> TransportResult<()> {
        (**self).transmit(frame)
    }

    fn receive(&mut self, timeout_ms: u32) -> TransportResult<CanFrame> {
        (**self).receive(timeout_ms)
    }

    fn configure_filter(&mut self, slot: u8, filter: &AcceptanceFilter) -> TransportResult<()> {
        (**self).configure_filter(slot, filter)
    }

    fn error_status(&mut self) -> ErrorFlags {
        (**self).error_status()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn capabilities(&self) -> &TransportCapabilities {
        (**self).capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_oversized_payload() {
        assert_eq!(
            CanFrame::new_standard(0x7DF, &[0; 9]),
            Err(TransportError::InvalidFrame)
        );
    }

    #[test]
    fn frame_rejects_id_wider_than_kind() {
        assert_eq!(
            CanFrame::new_standard(0x800, &[]),
            Err(TransportError::InvalidFrame)
        );
        assert!(CanFrame::new_extended(0x800, &[]).is_ok());
        assert_eq!(
            CanFrame::new_extended(0x2000_0000, &[]),
            Err(TransportError::InvalidFrame)
        );
    }

    #[test]
    fn frame_data_is_limited_to_dlc() {
        let f = CanFrame::new_standard(0x7E8, &[0x04, 0x41, 0x0C, 0x1A, 0xF8]).unwrap();
        assert_eq!(f.dlc(), 5);
        assert_eq!(f.data(), &[0x04, 0x41, 0x0C, 0x1A, 0xF8]);
        assert_eq!(f.raw_data()[5..], [0, 0, 0]);
    }

    #[test]
    fn raw_frame_clamps_dlc() {
        let f = CanFrame::from_raw(0x123, IdKind::Standard, 15, [1; 8]);
        assert_eq!(f.dlc(), 8);
    }

    #[test]
    fn obd_response_filter_matches_range() {
        let filter = AcceptanceFilter::obd_responses();
        for id in 0x7E8..=0x7EF {
            assert!(filter.matches(&CanFrame::new_standard(id, &[]).unwrap()));
        }
        assert!(!filter.matches(&CanFrame::new_standard(0x7E0, &[]).unwrap()));
        assert!(!filter.matches(&CanFrame::new_standard(0x7DF, &[]).unwrap()));
        assert!(!filter.matches(&CanFrame::new_extended(0x7E8, &[]).unwrap()));
    }
}
