//! Integrated C_CAN style controller
//!
//! The controller holds 32 message objects in its own RAM, reachable only through the two
//! interface register windows. IF1 is used exclusively for transmitting (message object 1),
//! IF2 for programming receive objects and reading them back.
//!
//! A transfer is done by writing the shadow registers of a window, then the command mask,
//! then the message object number into CRQ. The controller sets the CRQ busy bit while it
//! copies between the window and message RAM, which is polled with a fixed iteration ceiling.

use log::{debug, error, info, warn};

use crate::channel::{
    AcceptanceFilter, CanFrame, CanTransport, ErrorFlags, IdKind, TransportConfig, TransportError,
    TransportResult,
};
use crate::hardware::bit_timing::NATIVE_CLOCK_HZ;
use crate::hardware::{
    BitRate, BitTimingCalculator, BitTimingConfig, Clock, Deadline, TransportCapabilities,
};

pub mod registers;

use registers::*;

pub use registers::{MmioRegisterBlock, RegisterBlock};

/// Message object used for every transmission
const TX_OBJECT: u8 = 1;
/// Receive object configured by [NativeCanTransport::init] to accept every frame
const DEFAULT_RX_OBJECT: u8 = 2;
/// Reads of CRQ before a stuck interface is reported
const BUSY_SPIN_LIMIT: u32 = 100_000;

const NATIVE_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    name: "Integrated C_CAN",
    first_filter_slot: 2,
    last_filter_slot: MESSAGE_OBJECTS,
    masks: 0,
    tx_buffers: 1,
    rx_buffers: MESSAGE_OBJECTS - 1,
    extended_ids: true,
    loopback: true,
};

/// Encodes bit timing into the `(BIT, BRPE)` register pair
pub fn encode_bit_timing(t: &BitTimingConfig, rate: BitRate) -> TransportResult<(u32, u32)> {
    if t.prescaler == 0
        || t.prescaler > 1024
        || !(1..=16).contains(&t.seg1)
        || !(1..=8).contains(&t.seg2)
        || !(1..=4).contains(&t.sjw)
    {
        return Err(TransportError::UnsupportedBitRate(rate));
    }
    let brp = t.prescaler as u32 - 1;
    let bit = ((t.seg2 as u32 - 1) << 12)
        | ((t.seg1 as u32 - 1) << 8)
        | ((t.sjw as u32 - 1) << 6)
        | (brp & 0x3F);
    Ok((bit, (brp >> 6) & 0x0F))
}

/// Packs an identifier into `(ARB1, ARB2)`. MSGVAL is always set, DIR only when `transmit`
pub(crate) fn pack_arbitration(id: u32, kind: IdKind, transmit: bool) -> (u32, u32) {
    let dir = if transmit { ARB2_DIR } else { 0 };
    match kind {
        IdKind::Standard => (0, ARB2_MSGVAL | dir | ((id & 0x7FF) << 2)),
        IdKind::Extended => (
            id & 0xFFFF,
            ARB2_MSGVAL | ARB2_XTD | dir | ((id >> 16) & 0x1FFF),
        ),
    }
}

pub(crate) fn unpack_arbitration(arb1: u32, arb2: u32) -> (u32, IdKind) {
    if arb2 & ARB2_XTD != 0 {
        (((arb2 & 0x1FFF) << 16) | (arb1 & 0xFFFF), IdKind::Extended)
    } else {
        ((arb2 >> 2) & 0x7FF, IdKind::Standard)
    }
}

/// Packs an acceptance mask into `(MSK1, MSK2)`. Direction is always compared.
/// An all-zero mask of either kind also ignores the identifier width.
fn pack_mask(filter: &AcceptanceFilter) -> (u32, u32) {
    let mxtd = if filter.mask == 0 { 0 } else { MSK2_MXTD };
    match filter.kind {
        IdKind::Standard => (0, MSK2_MDIR | mxtd | ((filter.mask & 0x7FF) << 2)),
        IdKind::Extended => (
            filter.mask & 0xFFFF,
            MSK2_MDIR | mxtd | ((filter.mask >> 16) & 0x1FFF),
        ),
    }
}

/// [CanTransport] for the integrated controller
#[derive(Debug)]
pub struct NativeCanTransport<R: RegisterBlock, C: Clock> {
    regs: R,
    clock: C,
    timing: BitTimingCalculator,
    config: TransportConfig,
    /// Bit n set = message object n+1 receives
    rx_objects: u32,
    initialized: bool,
}

impl<R: RegisterBlock, C: Clock> NativeCanTransport<R, C> {
    /// Creates a transport for a controller running from the 16MHz system clock.
    /// The controller is not touched until [CanTransport::init]
    pub fn new(regs: R, clock: C) -> Self {
        Self::with_clock_hz(regs, clock, NATIVE_CLOCK_HZ)
    }

    /// Creates a transport for a controller clocked at `clock_hz`
    pub fn with_clock_hz(regs: R, clock: C, clock_hz: u32) -> Self {
        Self {
            regs,
            clock,
            timing: BitTimingCalculator::new(clock_hz),
            config: TransportConfig::default(),
            rx_objects: 0,
            initialized: false,
        }
    }

    /// Gives back the register block and clock
    pub fn release(self) -> (R, C) {
        (self.regs, self.clock)
    }

    fn wait_idle(&mut self, window: usize) -> TransportResult<()> {
        for _ in 0..BUSY_SPIN_LIMIT {
            if self.regs.read(window + IF_CRQ) & CRQ_BUSY == 0 {
                return Ok(());
            }
        }
        error!("CAN interface at {window:#04X} stayed busy");
        Err(TransportError::Timeout)
    }

    /// Starts a transfer between `window` and `object`, then waits for it to finish
    fn commit(&mut self, window: usize, object: u8) -> TransportResult<()> {
        self.regs.write(window + IF_CRQ, object as u32);
        self.wait_idle(window)
    }

    fn write_data(&mut self, window: usize, data: &[u8; 8]) {
        for (i, reg) in [IF_DA1, IF_DA2, IF_DB1, IF_DB2].into_iter().enumerate() {
            let v = u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]);
            self.regs.write(window + reg, v as u32);
        }
    }

    fn read_data(&mut self, window: usize) -> [u8; 8] {
        let mut data = [0u8; 8];
        for (i, reg) in [IF_DA1, IF_DA2, IF_DB1, IF_DB2].into_iter().enumerate() {
            let v = (self.regs.read(window + reg) & 0xFFFF) as u16;
            data[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
        data
    }

    fn invalidate_object(&mut self, object: u8) -> TransportResult<()> {
        self.wait_idle(IF2)?;
        self.regs
            .write(IF2 + IF_CMSK, (Cmsk::WRNRD | Cmsk::ARB | Cmsk::CONTROL).bits());
        self.regs.write(IF2 + IF_ARB1, 0);
        self.regs.write(IF2 + IF_ARB2, 0);
        self.regs.write(IF2 + IF_MCTL, 0);
        self.commit(IF2, object)
    }

    fn program_rx_object(&mut self, object: u8, filter: &AcceptanceFilter) -> TransportResult<()> {
        let (msk1, msk2) = pack_mask(filter);
        let (arb1, arb2) = pack_arbitration(filter.id, filter.kind, false);
        self.wait_idle(IF2)?;
        self.regs.write(
            IF2 + IF_CMSK,
            (Cmsk::WRNRD | Cmsk::MASK | Cmsk::ARB | Cmsk::CONTROL).bits(),
        );
        self.regs.write(IF2 + IF_MSK1, msk1);
        self.regs.write(IF2 + IF_MSK2, msk2);
        self.regs.write(IF2 + IF_ARB1, arb1);
        self.regs.write(IF2 + IF_ARB2, arb2);
        self.regs.write(IF2 + IF_MCTL, MCTL_UMASK | MCTL_EOB | 8);
        self.commit(IF2, object)?;
        self.rx_objects |= 1 << (object - 1);
        Ok(())
    }

    /// Lowest numbered receive object holding new data
    fn pending_object(&mut self) -> Option<u8> {
        let pending = (self.regs.read(NWDA1) & 0xFFFF) | ((self.regs.read(NWDA2) & 0xFFFF) << 16);
        match pending & self.rx_objects {
            0 => None,
            p => Some(p.trailing_zeros() as u8 + 1),
        }
    }

    fn read_object(&mut self, object: u8) -> TransportResult<CanFrame> {
        self.wait_idle(IF2)?;
        self.regs.write(
            IF2 + IF_CMSK,
            (Cmsk::ARB | Cmsk::CONTROL | Cmsk::DATAA | Cmsk::DATAB | Cmsk::CLRINTPND | Cmsk::NEWDAT)
                .bits(),
        );
        self.commit(IF2, object)?;
        let mctl = self.regs.read(IF2 + IF_MCTL);
        let arb1 = self.regs.read(IF2 + IF_ARB1);
        let arb2 = self.regs.read(IF2 + IF_ARB2);
        let data = self.read_data(IF2);
        if mctl & MCTL_MSGLST != 0 {
            warn!("Message object {object} was overwritten before it was read");
            self.regs
                .write(IF2 + IF_CMSK, (Cmsk::WRNRD | Cmsk::CONTROL).bits());
            self.regs.write(
                IF2 + IF_MCTL,
                mctl & !(MCTL_MSGLST | MCTL_NEWDAT | MCTL_INTPND),
            );
            self.commit(IF2, object)?;
        }
        let (id, kind) = unpack_arbitration(arb1, arb2);
        Ok(CanFrame::from_raw(id, kind, (mctl & MCTL_DLC) as u8, data))
    }

    fn ensure_initialized(&self) -> TransportResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }
}

impl<R: RegisterBlock, C: Clock> CanTransport for NativeCanTransport<R, C> {
    fn init(&mut self, config: &TransportConfig) -> TransportResult<()> {
        let timing = self.timing.timing(config.bit_rate)?;
        let (bit, brpe) = encode_bit_timing(&timing, config.bit_rate)?;

        self.initialized = false;
        self.rx_objects = 0;
        self.regs.write(CTL, Ctl::INIT.bits());
        self.regs.set_bits(CTL, Ctl::CCE.bits());
        self.regs.write(BIT, bit);
        self.regs.write(BRPE, brpe);
        if config.loopback {
            self.regs.set_bits(CTL, Ctl::TEST.bits());
            self.regs.write(TST, TST_LBACK);
        } else {
            self.regs.clear_bits(CTL, Ctl::TEST.bits());
        }

        for object in 1..=MESSAGE_OBJECTS {
            self.invalidate_object(object)?;
        }
        self.program_rx_object(DEFAULT_RX_OBJECT, &AcceptanceFilter::accept_all(IdKind::Standard))?;

        self.regs.clear_bits(CTL, (Ctl::INIT | Ctl::CCE).bits());
        self.config = *config;
        self.initialized = true;
        info!(
            "Native CAN controller running at {} (BIT={bit:#06X}, BRPE={brpe:#X}, loopback={})",
            config.bit_rate, config.loopback
        );
        Ok(())
    }

    fn transmit(&mut self, frame: &CanFrame) -> TransportResult<()> {
        self.ensure_initialized()?;
        frame.validate()?;
        let (arb1, arb2) = pack_arbitration(frame.id(), frame.kind(), true);
        self.wait_idle(IF1)?;
        self.regs.write(
            IF1 + IF_CMSK,
            (Cmsk::WRNRD | Cmsk::ARB | Cmsk::CONTROL | Cmsk::DATAA | Cmsk::DATAB).bits(),
        );
        self.regs.write(IF1 + IF_ARB1, arb1);
        self.regs.write(IF1 + IF_ARB2, arb2);
        self.regs
            .write(IF1 + IF_MCTL, MCTL_TXRQST | MCTL_EOB | frame.dlc() as u32);
        self.write_data(IF1, frame.raw_data());
        self.commit(IF1, TX_OBJECT)?;
        debug!("CAN TX {:#X} {:02X?}", frame.id(), frame.data());
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> TransportResult<CanFrame> {
        self.ensure_initialized()?;
        let deadline = Deadline::after(&self.clock, timeout_ms);
        loop {
            if let Some(object) = self.pending_object() {
                let frame = self.read_object(object)?;
                debug!("CAN RX {:#X} {:02X?} (object {object})", frame.id(), frame.data());
                return Ok(frame);
            }
            if deadline.expired(&self.clock) {
                return Err(TransportError::Timeout);
            }
            self.clock.delay_ms(1);
        }
    }

    fn configure_filter(&mut self, slot: u8, filter: &AcceptanceFilter) -> TransportResult<()> {
        if !NATIVE_CAPABILITIES.is_valid_filter_slot(slot) {
            return Err(TransportError::InvalidSlot(slot));
        }
        filter.validate()?;
        self.ensure_initialized()?;
        self.program_rx_object(slot, filter)?;
        debug!("Message object {slot} filters {filter:X?}");
        Ok(())
    }

    fn error_status(&mut self) -> ErrorFlags {
        let sts = Sts::from_bits_truncate(self.regs.read(STS));
        let err = self.regs.read(ERR);
        let tec = err & 0xFF;
        let rec = (err >> 8) & 0x7F;

        let mut flags = ErrorFlags::empty();
        flags.set(ErrorFlags::WARNING, sts.contains(Sts::EWARN));
        flags.set(ErrorFlags::TX_WARNING, tec >= 96);
        flags.set(ErrorFlags::RX_WARNING, rec >= 96);
        flags.set(ErrorFlags::ERROR_PASSIVE, sts.contains(Sts::EPASS));
        flags.set(ErrorFlags::BUS_OFF, sts.contains(Sts::BOFF));
        // LEC 7 means "unchanged since last read"
        let lec = (sts & Sts::LEC).bits();
        flags.set(ErrorFlags::PROTOCOL_ERROR, (1..=6).contains(&lec));
        flags
    }

    fn reset(&mut self) {
        self.regs.write(CTL, Ctl::INIT.bits());
        self.rx_objects = 0;
        self.initialized = false;
        debug!("Native CAN controller held in reset");
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &NATIVE_CAPABILITIES
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::hardware::simulation::SimulatedClock;

    #[derive(Debug, Default, Clone, Copy)]
    struct MsgObject {
        msk1: u32,
        msk2: u32,
        arb1: u32,
        arb2: u32,
        mctl: u32,
        data: [u32; 4],
    }

    impl MsgObject {
        fn accepts(&self, arb1: u32, arb2: u32) -> bool {
            if self.arb2 & ARB2_MSGVAL == 0 || self.arb2 & ARB2_DIR != 0 {
                return false;
            }
            let (m1, m2) = if self.mctl & MCTL_UMASK != 0 {
                (self.msk1, self.msk2)
            } else {
                (0xFFFF, 0x1FFF | MSK2_MXTD)
            };
            let xtd_ok = m2 & MSK2_MXTD == 0 || (arb2 ^ self.arb2) & ARB2_XTD == 0;
            xtd_ok && (arb1 ^ self.arb1) & m1 & 0xFFFF == 0 && (arb2 ^ self.arb2) & m2 & 0x1FFF == 0
        }
    }

    /// Register level model of the controller's message RAM and IF windows
    #[derive(Debug, Default)]
    struct SimState {
        regs: std::collections::HashMap<usize, u32>,
        windows: [[u32; 11]; 2],
        objects: [MsgObject; 32],
        sent: Vec<(u32, u32, u32, [u32; 4])>,
        stuck_busy: bool,
    }

    impl SimState {
        fn loopback(&self) -> bool {
            self.regs.get(&CTL).copied().unwrap_or(0) & Ctl::TEST.bits() != 0
                && self.regs.get(&TST).copied().unwrap_or(0) & TST_LBACK != 0
        }

        fn deliver(&mut self, arb1: u32, arb2: u32, mctl: u32, data: [u32; 4]) {
            let rx_arb2 = arb2 & !ARB2_DIR;
            if let Some(obj) = self.objects.iter_mut().find(|o| o.accepts(arb1, rx_arb2)) {
                if obj.mctl & MCTL_NEWDAT != 0 {
                    obj.mctl |= MCTL_MSGLST;
                }
                obj.arb1 = arb1;
                obj.arb2 = (obj.arb2 & (ARB2_MSGVAL | ARB2_DIR)) | (rx_arb2 & !ARB2_MSGVAL);
                obj.mctl = (obj.mctl & !MCTL_DLC) | (mctl & MCTL_DLC) | MCTL_NEWDAT | MCTL_INTPND;
                obj.data = data;
            }
        }

        fn transfer(&mut self, w: usize, object: u32) {
            let Some(idx) = (object as usize).checked_sub(1).filter(|i| *i < 32) else {
                return;
            };
            let win = self.windows[w];
            let cmsk = Cmsk::from_bits_truncate(win[IF_CMSK / 4]);
            let obj = &mut self.objects[idx];
            if cmsk.contains(Cmsk::WRNRD) {
                if cmsk.contains(Cmsk::MASK) {
                    obj.msk1 = win[IF_MSK1 / 4];
                    obj.msk2 = win[IF_MSK2 / 4];
                }
                if cmsk.contains(Cmsk::ARB) {
                    obj.arb1 = win[IF_ARB1 / 4];
                    obj.arb2 = win[IF_ARB2 / 4];
                }
                if cmsk.contains(Cmsk::CONTROL) {
                    obj.mctl = win[IF_MCTL / 4];
                }
                if cmsk.contains(Cmsk::DATAA) {
                    obj.data[0] = win[IF_DA1 / 4];
                    obj.data[1] = win[IF_DA2 / 4];
                }
                if cmsk.contains(Cmsk::DATAB) {
                    obj.data[2] = win[IF_DB1 / 4];
                    obj.data[3] = win[IF_DB2 / 4];
                }
                if obj.mctl & MCTL_TXRQST != 0 {
                    obj.mctl &= !MCTL_TXRQST;
                    let o = *obj;
                    self.sent.push((o.arb1, o.arb2, o.mctl, o.data));
                    if self.loopback() {
                        self.deliver(o.arb1, o.arb2, o.mctl, o.data);
                    }
                }
            } else {
                let o = *obj;
                let win = &mut self.windows[w];
                if cmsk.contains(Cmsk::MASK) {
                    win[IF_MSK1 / 4] = o.msk1;
                    win[IF_MSK2 / 4] = o.msk2;
                }
                if cmsk.contains(Cmsk::ARB) {
                    win[IF_ARB1 / 4] = o.arb1;
                    win[IF_ARB2 / 4] = o.arb2;
                }
                if cmsk.contains(Cmsk::CONTROL) {
                    win[IF_MCTL / 4] = o.mctl;
                }
                if cmsk.contains(Cmsk::DATAA) {
                    win[IF_DA1 / 4] = o.data[0];
                    win[IF_DA2 / 4] = o.data[1];
                }
                if cmsk.contains(Cmsk::DATAB) {
                    win[IF_DB1 / 4] = o.data[2];
                    win[IF_DB2 / 4] = o.data[3];
                }
                let obj = &mut self.objects[idx];
                if cmsk.contains(Cmsk::CLRINTPND) {
                    obj.mctl &= !MCTL_INTPND;
                }
                if cmsk.contains(Cmsk::NEWDAT) {
                    obj.mctl &= !MCTL_NEWDAT;
                }
            }
        }

        fn new_data(&self, range: std::ops::Range<usize>) -> u32 {
            range.enumerate().fold(0, |acc, (bit, i)| {
                if self.objects[i].mctl & MCTL_NEWDAT != 0 {
                    acc | (1 << bit)
                } else {
                    acc
                }
            })
        }
    }

    #[derive(Debug, Clone, Default)]
    struct SimRegisters(Arc<Mutex<SimState>>);

    impl SimRegisters {
        /// A frame arriving from the bus
        fn inject(&self, frame: &CanFrame) {
            let (arb1, arb2) = pack_arbitration(frame.id(), frame.kind(), false);
            let d = frame.raw_data();
            let data = [0, 2, 4, 6].map(|i| u16::from_le_bytes([d[i], d[i + 1]]) as u32);
            self.0
                .lock()
                .unwrap()
                .deliver(arb1, arb2, frame.dlc() as u32, data);
        }

        fn reg(&self, offset: usize) -> u32 {
            self.0.lock().unwrap().regs.get(&offset).copied().unwrap_or(0)
        }

        fn set_reg(&self, offset: usize, v: u32) {
            self.0.lock().unwrap().regs.insert(offset, v);
        }
    }

    fn window_of(offset: usize) -> Option<(usize, usize)> {
        if (IF1..IF1 + 0x2C).contains(&offset) {
            Some((0, offset - IF1))
        } else if (IF2..IF2 + 0x2C).contains(&offset) {
            Some((1, offset - IF2))
        } else {
            None
        }
    }

    impl RegisterBlock for SimRegisters {
        fn read(&mut self, offset: usize) -> u32 {
            let s = self.0.lock().unwrap();
            match (offset, window_of(offset)) {
                (_, Some((_, IF_CRQ))) if s.stuck_busy => CRQ_BUSY,
                (_, Some((w, IF_CRQ))) => s.windows[w][0] & !CRQ_BUSY,
                (_, Some((w, reg))) => s.windows[w][reg / 4],
                (NWDA1, _) => s.new_data(0..16),
                (NWDA2, _) => s.new_data(16..32),
                _ => s.regs.get(&offset).copied().unwrap_or(0),
            }
        }

        fn write(&mut self, offset: usize, value: u32) {
            let mut s = self.0.lock().unwrap();
            match window_of(offset) {
                Some((w, reg)) => {
                    s.windows[w][reg / 4] = value;
                    if reg == IF_CRQ {
                        s.transfer(w, value & 0x3F);
                    }
                }
                None => {
                    s.regs.insert(offset, value);
                }
            }
        }
    }

    fn transport(loopback: bool) -> (NativeCanTransport<SimRegisters, SimulatedClock>, SimRegisters, SimulatedClock) {
        let _ = env_logger::try_init();
        let regs = SimRegisters::default();
        let clock = SimulatedClock::new();
        let mut t = NativeCanTransport::new(regs.clone(), clock.clone());
        t.init(&TransportConfig {
            bit_rate: BitRate::Kbps500,
            loopback,
        })
        .unwrap();
        (t, regs, clock)
    }

    #[test]
    fn init_programs_500k_timing_and_leaves_init_mode() {
        let (_t, regs, _) = transport(false);
        assert_eq!(regs.reg(BIT), 0x1403);
        assert_eq!(regs.reg(BRPE), 0);
        assert_eq!(regs.reg(CTL) & (Ctl::INIT | Ctl::CCE).bits(), 0);
    }

    #[test]
    fn encode_100k_at_16mhz() {
        let t = BitTimingCalculator::new(NATIVE_CLOCK_HZ)
            .timing(BitRate::Kbps100)
            .unwrap();
        assert_eq!(encode_bit_timing(&t, BitRate::Kbps100), Ok((0x2B09, 0)));
    }

    #[test]
    fn wide_prescaler_spills_into_brpe() {
        let t = BitTimingConfig {
            prescaler: 100,
            seg1: 5,
            seg2: 2,
            sjw: 1,
        };
        let (bit, brpe) = encode_bit_timing(&t, BitRate::Kbps100).unwrap();
        assert_eq!(bit & 0x3F, 99 & 0x3F);
        assert_eq!(brpe, 99 >> 6);
    }

    #[test]
    fn arbitration_packing() {
        assert_eq!(
            pack_arbitration(0x7DF, IdKind::Standard, true),
            (0, ARB2_MSGVAL | ARB2_DIR | 0x1F7C)
        );
        let (a1, a2) = pack_arbitration(0x18DB33F1, IdKind::Extended, false);
        assert_eq!(a1, 0x33F1);
        assert_eq!(a2, ARB2_MSGVAL | ARB2_XTD | 0x18DB);
        assert_eq!(unpack_arbitration(a1, a2), (0x18DB33F1, IdKind::Extended));
        assert_eq!(
            unpack_arbitration(0, ARB2_MSGVAL | 0x1FA0),
            (0x7E8, IdKind::Standard)
        );
    }

    #[test]
    fn every_standard_id_survives_arbitration_packing() {
        for id in 0..0x800 {
            let (a1, a2) = pack_arbitration(id, IdKind::Standard, false);
            assert_eq!(unpack_arbitration(a1, a2), (id, IdKind::Standard), "id {id:#X}");
        }
    }

    #[test]
    fn extended_ids_survive_arbitration_packing() {
        let ids = (0..0x2000_0000u32)
            .step_by(0x1_0001)
            .chain([0x1FFF_FFFF, 0x0000_8000, 0x0001_0000, 0x0001_8000]);
        for id in ids {
            let (a1, a2) = pack_arbitration(id, IdKind::Extended, true);
            assert_eq!(unpack_arbitration(a1, a2), (id, IdKind::Extended), "id {id:#X}");
        }
    }

    #[test]
    fn received_extended_ids_keep_bits_15_and_16() {
        let (mut t, regs, _) = transport(false);
        for id in [0x0000_8000, 0x0001_0000, 0x0001_8000, 0x1FFF_FFFF] {
            regs.inject(&CanFrame::new_extended(id, &[1]).unwrap());
            let f = t.receive(0).unwrap();
            assert_eq!((f.id(), f.kind()), (id, IdKind::Extended));
        }
    }

    #[test]
    fn loopback_round_trip_standard_and_extended() {
        let (mut t, regs, _) = transport(true);
        let std_frame = CanFrame::new_standard(0x7DF, &[0x02, 0x01, 0x0C]).unwrap();
        t.transmit(&std_frame).unwrap();
        assert_eq!(t.receive(10).unwrap(), std_frame);

        let ext_frame =
            CanFrame::new_extended(0x18DB33F1, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        t.transmit(&ext_frame).unwrap();
        assert_eq!(t.receive(10).unwrap(), ext_frame);
        assert_eq!(regs.0.lock().unwrap().sent.len(), 2);
    }

    #[test]
    fn receive_clears_new_data() {
        let (mut t, regs, _) = transport(false);
        regs.inject(&CanFrame::new_standard(0x7E8, &[0x03, 0x41, 0x0D, 0x32]).unwrap());
        assert_eq!(t.receive(0).unwrap().data(), &[0x03, 0x41, 0x0D, 0x32]);
        assert_eq!(t.receive(0), Err(TransportError::Timeout));
    }

    #[test]
    fn receive_times_out_on_clock() {
        let (mut t, _, clock) = transport(false);
        let start = clock.now_ms();
        assert_eq!(t.receive(25), Err(TransportError::Timeout));
        assert!(clock.now_ms() - start >= 25);
    }

    #[test]
    fn filter_replaces_default_object() {
        let (mut t, regs, _) = transport(false);
        t.configure_filter(DEFAULT_RX_OBJECT, &AcceptanceFilter::obd_responses())
            .unwrap();
        regs.inject(&CanFrame::new_standard(0x123, &[1]).unwrap());
        assert_eq!(t.receive(0), Err(TransportError::Timeout));
        regs.inject(&CanFrame::new_extended(0x7E8, &[1]).unwrap());
        assert_eq!(t.receive(0), Err(TransportError::Timeout));
        regs.inject(&CanFrame::new_standard(0x7EA, &[2]).unwrap());
        assert_eq!(t.receive(0).unwrap().id(), 0x7EA);
    }

    #[test]
    fn extended_filter_in_high_object() {
        let (mut t, regs, _) = transport(false);
        t.configure_filter(
            DEFAULT_RX_OBJECT,
            &AcceptanceFilter::exact_standard(0x7E8),
        )
        .unwrap();
        t.configure_filter(
            20,
            &AcceptanceFilter {
                kind: IdKind::Extended,
                id: 0x18DAF100,
                mask: 0x1FFFFF00,
            },
        )
        .unwrap();
        regs.inject(&CanFrame::new_extended(0x18DAF110, &[9]).unwrap());
        let f = t.receive(0).unwrap();
        assert_eq!((f.id(), f.kind()), (0x18DAF110, IdKind::Extended));
    }

    #[test]
    fn invalid_slots_are_rejected() {
        let (mut t, _, _) = transport(false);
        let f = AcceptanceFilter::obd_responses();
        for slot in [0, TX_OBJECT, 33] {
            assert_eq!(
                t.configure_filter(slot, &f),
                Err(TransportError::InvalidSlot(slot))
            );
        }
    }

    #[test]
    fn stuck_interface_times_out() {
        let (mut t, regs, _) = transport(false);
        regs.0.lock().unwrap().stuck_busy = true;
        let f = CanFrame::new_standard(0x7DF, &[0x01, 0x03]).unwrap();
        assert_eq!(t.transmit(&f), Err(TransportError::Timeout));
    }

    #[test]
    fn error_status_maps_status_register() {
        let (mut t, regs, _) = transport(false);
        assert_eq!(t.error_status(), ErrorFlags::empty());
        regs.set_reg(STS, (Sts::BOFF | Sts::EPASS | Sts::EWARN).bits() | 0x03);
        regs.set_reg(ERR, 0x80 << 8 | 0xFF);
        let flags = t.error_status();
        assert!(flags.contains(
            ErrorFlags::BUS_OFF
                | ErrorFlags::ERROR_PASSIVE
                | ErrorFlags::WARNING
                | ErrorFlags::PROTOCOL_ERROR
                | ErrorFlags::TX_WARNING
        ));
        regs.set_reg(STS, 0x07);
        assert!(!t.error_status().contains(ErrorFlags::PROTOCOL_ERROR));
    }

    #[test]
    fn reset_requires_reinit() {
        let (mut t, regs, _) = transport(true);
        t.reset();
        assert_eq!(regs.reg(CTL) & Ctl::INIT.bits(), Ctl::INIT.bits());
        let f = CanFrame::new_standard(0x7DF, &[0x01, 0x03]).unwrap();
        assert_eq!(t.transmit(&f), Err(TransportError::NotInitialized));
        assert_eq!(t.receive(0), Err(TransportError::NotInitialized));
        t.init(&TransportConfig {
            bit_rate: BitRate::Kbps250,
            loopback: true,
        })
        .unwrap();
        assert_eq!(regs.reg(BIT), 0x1407);
        t.transmit(&f).unwrap();
        assert_eq!(t.receive(0).unwrap(), f);
    }

    #[test]
    fn unsupported_clock_fails_init() {
        let mut t = NativeCanTransport::with_clock_hz(
            SimRegisters::default(),
            SimulatedClock::new(),
            12_345_678,
        );
        assert_eq!(
            t.init(&TransportConfig::default()),
            Err(TransportError::UnsupportedBitRate(BitRate::Kbps500))
        );
    }
}
