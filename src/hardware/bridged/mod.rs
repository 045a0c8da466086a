//! External MCP2515 style controller reached over SPI
//!
//! The chip has 3 transmit buffers, 2 receive buffers, 6 acceptance filters and 2 masks.
//! Filters 0 and 1 (and mask 0) feed RXB0, filters 2 to 5 (and mask 1) feed RXB1.
//! RXB0 rolls over into RXB1 when it is still full.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::{debug, error, info, warn};

use crate::channel::{
    AcceptanceFilter, CanFrame, CanTransport, ErrorFlags, IdKind, TransportConfig, TransportError,
    TransportResult,
};
use crate::hardware::bit_timing::BRIDGED_CLOCK_HZ;
use crate::hardware::{
    BitRate, BitTimingCalculator, BitTimingConfig, Clock, Deadline, TransportCapabilities,
};

pub mod device;

use device::*;

/// Time the oscillator needs after a reset instruction
const RESET_DELAY_MS: u32 = 10;
/// Budget for CANSTAT to report a requested mode
const MODE_CHANGE_TIMEOUT_MS: u32 = 100;
/// Number of acceptance filters
const FILTER_SLOTS: usize = 6;

const BRIDGED_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    name: "MCP2515",
    first_filter_slot: 0,
    last_filter_slot: FILTER_SLOTS as u8 - 1,
    masks: 2,
    tx_buffers: 3,
    rx_buffers: 2,
    extended_ids: true,
    loopback: true,
};

/// Encodes bit timing into `[CNF1, CNF2, CNF3]`.
///
/// The chip divides the oscillator by `2 * (BRP + 1)`, so only even prescalers up to 128 fit.
/// Seg1 is split into a propagation segment and phase segment 1 of at most 8 Tq each.
pub fn encode_bit_timing(t: &BitTimingConfig, rate: BitRate) -> TransportResult<[u8; 3]> {
    let unsupported = || TransportError::UnsupportedBitRate(rate);
    if t.prescaler < 2 || t.prescaler % 2 != 0 || t.prescaler > 128 {
        return Err(unsupported());
    }
    let brp = (t.prescaler / 2 - 1) as u8;
    let ps1 = t.seg1.saturating_sub(1).min(8);
    let prop = t.seg1.saturating_sub(ps1);
    let ps2 = t.seg2;
    if !(1..=8).contains(&ps1)
        || !(1..=8).contains(&prop)
        || !(2..=8).contains(&ps2)
        || !(1..=4).contains(&t.sjw)
    {
        return Err(unsupported());
    }
    Ok([
        ((t.sjw - 1) << 6) | brp,
        0x80 | ((ps1 - 1) << 3) | (prop - 1),
        ps2 - 1,
    ])
}

/// Mask register feeding filter `slot`
fn mask_group(slot: usize) -> usize {
    if slot < 2 { 0 } else { 1 }
}

/// [CanTransport] for an MCP2515 on an `embedded-hal` SPI bus
#[derive(Debug)]
pub struct BridgedCanTransport<SPI, CS, C> {
    device: Mcp2515<SPI, CS>,
    clock: C,
    timing: BitTimingCalculator,
    config: TransportConfig,
    filters: [Option<AcceptanceFilter>; FILTER_SLOTS],
    masks: [Option<AcceptanceFilter>; 2],
    initialized: bool,
}

impl<SPI: SpiBus<u8>, CS: OutputPin, C: Clock> BridgedCanTransport<SPI, CS, C> {
    /// Creates a transport for a chip on an 8MHz crystal.
    /// The chip is not touched until [CanTransport::init]
    pub fn new(spi: SPI, cs: CS, clock: C) -> Self {
        Self::with_clock_hz(spi, cs, clock, BRIDGED_CLOCK_HZ)
    }

    /// Creates a transport for a chip clocked at `clock_hz`
    pub fn with_clock_hz(spi: SPI, cs: CS, clock: C, clock_hz: u32) -> Self {
        Self {
            device: Mcp2515::new(spi, cs),
            clock,
            timing: BitTimingCalculator::new(clock_hz),
            config: TransportConfig::default(),
            filters: [None; FILTER_SLOTS],
            masks: [None; 2],
            initialized: false,
        }
    }

    /// Gives back the bus, chip select and clock
    pub fn release(self) -> (SPI, CS, C) {
        let (spi, cs) = self.device.release();
        (spi, cs, self.clock)
    }

    /// Direct access to the chip's instruction set
    pub fn device(&mut self) -> &mut Mcp2515<SPI, CS> {
        &mut self.device
    }

    /// Requests `mode` and waits for CANSTAT to confirm it
    pub fn set_mode(&mut self, mode: Mode) -> TransportResult<()> {
        self.device.bit_modify(CANCTRL, MODE_MASK, mode as u8)?;
        let deadline = Deadline::after(&self.clock, MODE_CHANGE_TIMEOUT_MS);
        loop {
            if self.device.read(CANSTAT)? & MODE_MASK == mode as u8 {
                debug!("MCP2515 entered {mode} mode");
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                error!("MCP2515 did not enter {mode} mode");
                return Err(TransportError::Timeout);
            }
            self.clock.delay_ms(1);
        }
    }

    fn operating_mode(&self) -> Mode {
        if self.config.loopback {
            Mode::Loopback
        } else {
            Mode::Normal
        }
    }

    fn ensure_initialized(&self) -> TransportResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }

    /// Rewrites every filter and both masks.
    ///
    /// An unused filter copies the filter that owns its group's mask, so it is always
    /// compared with a mask of its own kind. A group with no filters copies `fallback`
    /// for its mask and every slot, and only accepts what `fallback` accepts.
    fn write_filters(&mut self, fallback: &AcceptanceFilter) -> TransportResult<()> {
        for slot in 0..FILTER_SLOTS {
            let f = self.filters[slot]
                .or(self.masks[mask_group(slot)])
                .unwrap_or(*fallback);
            let raw = encode_id(f.id, f.kind, f.kind == IdKind::Extended);
            self.device.write_burst(RXF_SIDH[slot], &raw)?;
        }
        for (group, addr) in [RXM0SIDH, RXM1SIDH].into_iter().enumerate() {
            let m = self.masks[group].unwrap_or(*fallback);
            self.device
                .write_burst(addr, &encode_id(m.mask, m.kind, false))?;
        }
        Ok(())
    }
}

impl<SPI: SpiBus<u8> + Send, CS: OutputPin + Send, C: Clock> CanTransport
    for BridgedCanTransport<SPI, CS, C>
{
    fn init(&mut self, config: &TransportConfig) -> TransportResult<()> {
        let timing = self.timing.timing(config.bit_rate)?;
        let [cnf1, cnf2, cnf3] = encode_bit_timing(&timing, config.bit_rate)?;

        self.initialized = false;
        self.filters = [None; FILTER_SLOTS];
        self.masks = [None; 2];
        self.device.reset()?;
        self.clock.delay_ms(RESET_DELAY_MS);
        self.set_mode(Mode::Configuration)?;

        // CNF3, CNF2 and CNF1 are consecutive
        self.device.write_burst(CNF3, &[cnf3, cnf2, cnf1])?;
        self.device.write_burst(RXM0SIDH, &[0; 4])?;
        self.device.write_burst(RXM1SIDH, &[0; 4])?;
        self.device.write(RXB0CTRL, RXM_ANY | BUKT)?;
        self.device.write(RXB1CTRL, RXM_ANY)?;
        self.device.write(CANINTF, 0)?;
        self.device
            .write(CANINTE, (Interrupts::RX0IF | Interrupts::RX1IF).bits())?;

        self.config = *config;
        self.set_mode(self.operating_mode())?;
        self.initialized = true;
        info!(
            "MCP2515 running at {} (CNF1={cnf1:#04X}, CNF2={cnf2:#04X}, CNF3={cnf3:#04X}, loopback={})",
            config.bit_rate, config.loopback
        );
        Ok(())
    }

    fn transmit(&mut self, frame: &CanFrame) -> TransportResult<()> {
        self.ensure_initialized()?;
        frame.validate()?;
        // READ STATUS bits 2, 4 and 6 mirror TXREQ of TXB0, TXB1 and TXB2
        let status = self.device.read_status()?;
        let buffer = (0..TXB_CTRL.len() as u8)
            .find(|n| status & (0x04 << (n * 2)) == 0)
            .ok_or(TransportError::BufferFull)?;

        let mut contents = [0u8; 13];
        contents[..4].copy_from_slice(&encode_id(frame.id(), frame.kind(), frame.is_extended()));
        contents[4] = frame.dlc();
        contents[5..5 + frame.data().len()].copy_from_slice(frame.data());
        let len = 5 + frame.dlc() as usize;
        self.device.load_tx(buffer, &contents[..len])?;
        self.device.rts(1 << buffer)?;
        debug!("CAN TX {:#X} {:02X?} (TXB{buffer})", frame.id(), frame.data());
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> TransportResult<CanFrame> {
        self.ensure_initialized()?;
        let deadline = Deadline::after(&self.clock, timeout_ms);
        loop {
            let flags = Interrupts::from_bits_truncate(self.device.read(CANINTF)?);
            let ready = if flags.contains(Interrupts::RX0IF) {
                Some((0, Interrupts::RX0IF))
            } else if flags.contains(Interrupts::RX1IF) {
                Some((1, Interrupts::RX1IF))
            } else {
                None
            };
            if let Some((buffer, flag)) = ready {
                let raw = self.device.read_rx(buffer)?;
                self.device.bit_modify(CANINTF, flag.bits(), 0)?;
                let (id, kind) = decode_id(&[raw[0], raw[1], raw[2], raw[3]]);
                let mut data = [0u8; 8];
                data.copy_from_slice(&raw[5..13]);
                let frame = CanFrame::from_raw(id, kind, raw[4] & 0x0F, data);
                debug!("CAN RX {:#X} {:02X?} (RXB{buffer})", frame.id(), frame.data());
                return Ok(frame);
            }
            if deadline.expired(&self.clock) {
                return Err(TransportError::Timeout);
            }
            self.clock.delay_ms(1);
        }
    }

    fn configure_filter(&mut self, slot: u8, filter: &AcceptanceFilter) -> TransportResult<()> {
        if !BRIDGED_CAPABILITIES.is_valid_filter_slot(slot) {
            return Err(TransportError::InvalidSlot(slot));
        }
        filter.validate()?;
        self.ensure_initialized()?;
        let slot = slot as usize;
        if let Some(shared) = self.masks[mask_group(slot)] {
            if shared.mask != filter.mask || shared.kind != filter.kind {
                warn!(
                    "Filter {slot} replaces mask {} ({:#X} -> {:#X})",
                    mask_group(slot),
                    shared.mask,
                    filter.mask
                );
            }
        }
        self.filters[slot] = Some(*filter);
        self.masks[mask_group(slot)] = Some(*filter);

        self.set_mode(Mode::Configuration)?;
        self.write_filters(filter)?;
        // RXM = 00, filters active
        self.device.bit_modify(RXB0CTRL, RXM_ANY, 0)?;
        self.device.bit_modify(RXB1CTRL, RXM_ANY, 0)?;
        self.set_mode(self.operating_mode())?;
        debug!("Filter {slot} set to {filter:X?}");
        Ok(())
    }

    fn error_status(&mut self) -> ErrorFlags {
        let (eflg, intf) = match (self.device.read(EFLG), self.device.read(CANINTF)) {
            (Ok(e), Ok(i)) => (Eflg::from_bits_truncate(e), Interrupts::from_bits_truncate(i)),
            (Err(e), _) | (_, Err(e)) => {
                error!("Could not read MCP2515 error state: {e}");
                return ErrorFlags::HARDWARE_FAULT;
            }
        };
        let mut flags = ErrorFlags::empty();
        flags.set(ErrorFlags::WARNING, eflg.contains(Eflg::EWARN));
        flags.set(ErrorFlags::RX_WARNING, eflg.contains(Eflg::RXWAR));
        flags.set(ErrorFlags::TX_WARNING, eflg.contains(Eflg::TXWAR));
        flags.set(
            ErrorFlags::ERROR_PASSIVE,
            eflg.intersects(Eflg::RXEP | Eflg::TXEP),
        );
        flags.set(ErrorFlags::BUS_OFF, eflg.contains(Eflg::TXBO));
        flags.set(
            ErrorFlags::RX_OVERFLOW,
            eflg.intersects(Eflg::RX0OVR | Eflg::RX1OVR),
        );
        flags.set(ErrorFlags::PROTOCOL_ERROR, intf.contains(Interrupts::MERRF));
        flags
    }

    fn reset(&mut self) {
        if let Err(e) = self.device.reset() {
            error!("MCP2515 reset failed: {e}");
        }
        self.clock.delay_ms(RESET_DELAY_MS);
        self.filters = [None; FILTER_SLOTS];
        self.masks = [None; 2];
        self.initialized = false;
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &BRIDGED_CAPABILITIES
    }
}
