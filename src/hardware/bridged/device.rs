//! MCP2515 instruction set over an `embedded-hal` SPI bus
//!
//! Every instruction runs with chip select asserted for exactly its own bytes.
//! Chip select is held by a guard, so it is released on every exit path including errors.

use bitflags::bitflags;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::warn;

use crate::channel::{IdKind, TransportError, TransportResult};

/// RESET instruction
pub const CMD_RESET: u8 = 0xC0;
/// READ instruction
pub const CMD_READ: u8 = 0x03;
/// WRITE instruction
pub const CMD_WRITE: u8 = 0x02;
/// READ RX BUFFER instruction (buffer select in bit 2)
pub const CMD_READ_RX: u8 = 0x90;
/// LOAD TX BUFFER instruction (buffer select in bits 2-1)
pub const CMD_LOAD_TX: u8 = 0x40;
/// RTS instruction (buffer bits 2-0)
pub const CMD_RTS: u8 = 0x80;
/// READ STATUS instruction
pub const CMD_READ_STATUS: u8 = 0xA0;
/// RX STATUS instruction
pub const CMD_RX_STATUS: u8 = 0xB0;
/// BIT MODIFY instruction
pub const CMD_BIT_MODIFY: u8 = 0x05;

/// Status (operating mode)
pub const CANSTAT: u8 = 0x0E;
/// Control (requested mode)
pub const CANCTRL: u8 = 0x0F;
/// Transmit error counter
pub const TEC: u8 = 0x1C;
/// Receive error counter
pub const REC: u8 = 0x1D;
/// Bit timing, phase segment 2
pub const CNF3: u8 = 0x28;
/// Bit timing, propagation and phase segment 1
pub const CNF2: u8 = 0x29;
/// Bit timing, prescaler and SJW
pub const CNF1: u8 = 0x2A;
/// Interrupt enable
pub const CANINTE: u8 = 0x2B;
/// Interrupt flags
pub const CANINTF: u8 = 0x2C;
/// Error flags
pub const EFLG: u8 = 0x2D;
/// Receive buffer 0 control
pub const RXB0CTRL: u8 = 0x60;
/// Receive buffer 1 control
pub const RXB1CTRL: u8 = 0x70;
/// Mask 0 (filters 0-1)
pub const RXM0SIDH: u8 = 0x20;
/// Mask 1 (filters 2-5)
pub const RXM1SIDH: u8 = 0x24;

/// TXBnCTRL, one per transmit buffer
pub const TXB_CTRL: [u8; 3] = [0x30, 0x40, 0x50];
/// RXFnSIDH, one per acceptance filter
pub const RXF_SIDH: [u8; 6] = [0x00, 0x04, 0x08, 0x10, 0x14, 0x18];

/// TXBnCTRL transmit request
pub const TXREQ: u8 = 0x08;
/// RXBnCTRL receive mode bits. Both set = filters off, accept anything
pub const RXM_ANY: u8 = 0x60;
/// RXB0CTRL rollover into RXB1
pub const BUKT: u8 = 0x04;

/// CANCTRL / CANSTAT operating mode bits
pub const MODE_MASK: u8 = 0xE0;

/// Operating modes selected through CANCTRL.REQOP
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum_macros::Display)]
#[repr(u8)]
pub enum Mode {
    /// Normal operation
    Normal = 0x00,
    /// Low power sleep
    Sleep = 0x20,
    /// Internal loopback, nothing reaches the bus
    Loopback = 0x40,
    /// Receive only, no acknowledgements
    ListenOnly = 0x60,
    /// Configuration, timing and filters writable
    Configuration = 0x80,
}

bitflags! {
    /// CANINTF / CANINTE bits
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Interrupts: u8 {
        /// RXB0 full
        const RX0IF = 0x01;
        /// RXB1 full
        const RX1IF = 0x02;
        /// TXB0 empty
        const TX0IF = 0x04;
        /// TXB1 empty
        const TX1IF = 0x08;
        /// TXB2 empty
        const TX2IF = 0x10;
        /// Error state changed
        const ERRIF = 0x20;
        /// Bus activity woke the chip
        const WAKIF = 0x40;
        /// Message error during transmit or receive
        const MERRF = 0x80;
    }
}

bitflags! {
    /// EFLG bits
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Eflg: u8 {
        /// An error counter reached 96
        const EWARN = 0x01;
        /// REC reached 96
        const RXWAR = 0x02;
        /// TEC reached 96
        const TXWAR = 0x04;
        /// Receive error passive
        const RXEP = 0x08;
        /// Transmit error passive
        const TXEP = 0x10;
        /// Bus off
        const TXBO = 0x20;
        /// RXB0 overflow
        const RX0OVR = 0x40;
        /// RXB1 overflow
        const RX1OVR = 0x80;
    }
}

/// SIDL extended identifier enable (filters and frames only, not masks)
const SIDL_EXIDE: u8 = 0x08;

/// Encodes an identifier into the `[SIDH, SIDL, EID8, EID0]` layout shared by
/// frames, filters and masks
pub(crate) fn encode_id(id: u32, kind: IdKind, exide: bool) -> [u8; 4] {
    match kind {
        IdKind::Standard => [(id >> 3) as u8, ((id & 0x07) << 5) as u8, 0, 0],
        IdKind::Extended => {
            let mut sidl = ((id >> 13) & 0xE0) as u8 | ((id >> 16) & 0x03) as u8;
            if exide {
                sidl |= SIDL_EXIDE;
            }
            [(id >> 21) as u8, sidl, (id >> 8) as u8, id as u8]
        }
    }
}

/// Decodes a frame's `[SIDH, SIDL, EID8, EID0]`
pub(crate) fn decode_id(raw: &[u8; 4]) -> (u32, IdKind) {
    let [sidh, sidl, eid8, eid0] = (*raw).map(|b| b as u32);
    if sidl & SIDL_EXIDE as u32 != 0 {
        (
            (sidh << 21) | ((sidl & 0xE0) << 13) | ((sidl & 0x03) << 16) | (eid8 << 8) | eid0,
            IdKind::Extended,
        )
    } else {
        ((sidh << 3) | (sidl >> 5), IdKind::Standard)
    }
}

fn spi_fault<E: embedded_hal::spi::Error>(e: E) -> TransportError {
    TransportError::HardwareFault(format!("SPI transfer failed: {:?}", e.kind()))
}

fn pin_fault<E: embedded_hal::digital::Error>(e: E) -> TransportError {
    TransportError::HardwareFault(format!("Chip select failed: {:?}", e.kind()))
}

/// Asserted (low) chip select, released when dropped
struct ChipSelect<'a, CS: OutputPin> {
    pin: &'a mut CS,
}

impl<'a, CS: OutputPin> ChipSelect<'a, CS> {
    fn assert(pin: &'a mut CS) -> TransportResult<Self> {
        pin.set_low().map_err(pin_fault)?;
        Ok(Self { pin })
    }
}

impl<CS: OutputPin> Drop for ChipSelect<'_, CS> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.set_high() {
            warn!("Could not release chip select: {:?}", embedded_hal::digital::Error::kind(&e));
        }
    }
}

fn exchange<SPI: SpiBus<u8>>(spi: &mut SPI, byte: u8) -> TransportResult<u8> {
    let mut buf = [byte];
    spi.transfer_in_place(&mut buf).map_err(spi_fault)?;
    Ok(buf[0])
}

/// An MCP2515 reached through a SPI bus and a dedicated chip select line
#[derive(Debug)]
pub struct Mcp2515<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI: SpiBus<u8>, CS: OutputPin> Mcp2515<SPI, CS> {
    /// Wraps the bus and chip select. Nothing is sent until the first instruction
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Gives back the bus and chip select
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Runs one instruction with chip select held for its duration
    fn instruction<T>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let _cs = ChipSelect::assert(&mut self.cs)?;
        let res = f(&mut self.spi)?;
        self.spi.flush().map_err(spi_fault)?;
        Ok(res)
    }

    /// Software reset. Registers return to their defaults and the chip enters configuration mode
    pub fn reset(&mut self) -> TransportResult<()> {
        self.instruction(|spi| exchange(spi, CMD_RESET).map(|_| ()))
    }

    /// Reads the register at `addr`
    pub fn read(&mut self, addr: u8) -> TransportResult<u8> {
        self.instruction(|spi| {
            exchange(spi, CMD_READ)?;
            exchange(spi, addr)?;
            exchange(spi, 0x00)
        })
    }

    /// Reads consecutive registers starting at `addr`
    pub fn read_burst(&mut self, addr: u8, buf: &mut [u8]) -> TransportResult<()> {
        self.instruction(|spi| {
            exchange(spi, CMD_READ)?;
            exchange(spi, addr)?;
            for b in buf.iter_mut() {
                *b = exchange(spi, 0x00)?;
            }
            Ok(())
        })
    }

    /// Writes the register at `addr`
    pub fn write(&mut self, addr: u8, value: u8) -> TransportResult<()> {
        self.write_burst(addr, &[value])
    }

    /// Writes consecutive registers starting at `addr`
    pub fn write_burst(&mut self, addr: u8, values: &[u8]) -> TransportResult<()> {
        self.instruction(|spi| {
            exchange(spi, CMD_WRITE)?;
            exchange(spi, addr)?;
            for v in values {
                exchange(spi, *v)?;
            }
            Ok(())
        })
    }

    /// Changes only the bits of `addr` selected by `mask`
    pub fn bit_modify(&mut self, addr: u8, mask: u8, value: u8) -> TransportResult<()> {
        self.instruction(|spi| {
            for b in [CMD_BIT_MODIFY, addr, mask, value] {
                exchange(spi, b)?;
            }
            Ok(())
        })
    }

    /// Quick poll of the RX / TX flags
    pub fn read_status(&mut self) -> TransportResult<u8> {
        self.instruction(|spi| {
            exchange(spi, CMD_READ_STATUS)?;
            exchange(spi, 0x00)
        })
    }

    /// Which receive buffer holds a message and which filter matched it
    pub fn rx_status(&mut self) -> TransportResult<u8> {
        self.instruction(|spi| {
            exchange(spi, CMD_RX_STATUS)?;
            exchange(spi, 0x00)
        })
    }

    /// Loads `contents` into transmit buffer `buffer` starting at TXBnSIDH
    pub fn load_tx(&mut self, buffer: u8, contents: &[u8]) -> TransportResult<()> {
        self.instruction(|spi| {
            exchange(spi, CMD_LOAD_TX | (buffer << 1))?;
            for b in contents {
                exchange(spi, *b)?;
            }
            Ok(())
        })
    }

    /// Reads a receive buffer starting at RXBnSIDH (id, DLC and 8 data bytes)
    pub fn read_rx(&mut self, buffer: u8) -> TransportResult<[u8; 13]> {
        self.instruction(|spi| {
            exchange(spi, CMD_READ_RX | (buffer << 2))?;
            let mut out = [0u8; 13];
            for b in out.iter_mut() {
                *b = exchange(spi, 0x00)?;
            }
            Ok(out)
        })
    }

    /// Request to send for every transmit buffer set in `buffers` (bit 0 = TXB0)
    pub fn rts(&mut self, buffers: u8) -> TransportResult<()> {
        self.instruction(|spi| exchange(spi, CMD_RTS | (buffers & 0x07)).map(|_| ()))
    }
}
