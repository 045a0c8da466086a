//! Register map of the integrated C_CAN style controller
//!
//! Offsets are byte offsets from the controller's base address. Every register is 32 bits wide,
//! of which the controller only implements the lower 16.

use bitflags::bitflags;

/// Word addressed access to a controller's register window.
///
/// The transport owns its block exclusively, so no two transports can program the same controller.
pub trait RegisterBlock: Send {
    /// Reads the register at `offset`
    fn read(&mut self, offset: usize) -> u32;
    /// Writes `value` to the register at `offset`
    fn write(&mut self, offset: usize, value: u32);

    /// Read-modify-write, setting `bits`
    fn set_bits(&mut self, offset: usize, bits: u32) {
        let v = self.read(offset);
        self.write(offset, v | bits);
    }

    /// Read-modify-write, clearing `bits`
    fn clear_bits(&mut self, offset: usize, bits: u32) {
        let v = self.read(offset);
        self.write(offset, v & !bits);
    }
}

/// Volatile memory mapped register window
#[derive(Debug)]
pub struct MmioRegisterBlock {
    base: *mut u32,
}

// The pointer is only dereferenced through &mut self, and the block is never cloned
unsafe impl Send for MmioRegisterBlock {}

impl MmioRegisterBlock {
    /// Wraps the controller at `base`.
    ///
    /// # Safety
    /// `base` must point to a mapped CAN controller register window that stays valid for the
    /// lifetime of the block, and nothing else may access that window while the block exists.
    pub unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }
}

impl RegisterBlock for MmioRegisterBlock {
    fn read(&mut self, offset: usize) -> u32 {
        unsafe { self.base.byte_add(offset).read_volatile() }
    }

    fn write(&mut self, offset: usize, value: u32) {
        unsafe { self.base.byte_add(offset).write_volatile(value) }
    }
}

/// Control
pub const CTL: usize = 0x00;
/// Status
pub const STS: usize = 0x04;
/// Error counters
pub const ERR: usize = 0x08;
/// Bit timing
pub const BIT: usize = 0x0C;
/// Interrupt
pub const INT: usize = 0x10;
/// Test
pub const TST: usize = 0x14;
/// Baud rate prescaler extension
pub const BRPE: usize = 0x18;

/// Base of the IF1 window (transmit)
pub const IF1: usize = 0x20;
/// Base of the IF2 window (receive and filters)
pub const IF2: usize = 0x80;

// Offsets within an IF window

/// Command request (object number, busy flag)
pub const IF_CRQ: usize = 0x00;
/// Command mask
pub const IF_CMSK: usize = 0x04;
/// Mask, identifier bits 15-0
pub const IF_MSK1: usize = 0x08;
/// Mask, identifier bits 28-16 and MXTD/MDIR
pub const IF_MSK2: usize = 0x0C;
/// Arbitration, identifier bits 15-0
pub const IF_ARB1: usize = 0x10;
/// Arbitration, identifier bits 28-16 and MSGVAL/XTD/DIR
pub const IF_ARB2: usize = 0x14;
/// Message control
pub const IF_MCTL: usize = 0x18;
/// Data bytes 0-1
pub const IF_DA1: usize = 0x1C;
/// Data bytes 2-3
pub const IF_DA2: usize = 0x20;
/// Data bytes 4-5
pub const IF_DB1: usize = 0x24;
/// Data bytes 6-7
pub const IF_DB2: usize = 0x28;

/// Transmission request bitmap, objects 1-16
pub const TXRQ1: usize = 0x100;
/// New data bitmap, objects 1-16
pub const NWDA1: usize = 0x120;
/// New data bitmap, objects 17-32
pub const NWDA2: usize = 0x124;
/// Interrupt pending bitmap, objects 1-16
pub const MSG1INT: usize = 0x140;
/// Message valid bitmap, objects 1-16
pub const MSG1VAL: usize = 0x160;

/// Number of message objects
pub const MESSAGE_OBJECTS: u8 = 32;

bitflags! {
    /// CANCTL bits
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Ctl: u32 {
        /// Initialization mode
        const INIT = 0x01;
        /// Module interrupts enabled
        const IE = 0x02;
        /// Status change interrupts enabled
        const SIE = 0x04;
        /// Error interrupts enabled
        const EIE = 0x08;
        /// Automatic retransmission disabled
        const DAR = 0x20;
        /// Bit timing writable while in INIT
        const CCE = 0x40;
        /// Test mode
        const TEST = 0x80;
    }
}

bitflags! {
    /// CANSTS bits
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Sts: u32 {
        /// Last error code
        const LEC = 0x07;
        /// Frame transmitted
        const TXOK = 0x08;
        /// Frame received
        const RXOK = 0x10;
        /// Error passive
        const EPASS = 0x20;
        /// Error counter reached 96
        const EWARN = 0x40;
        /// Bus off
        const BOFF = 0x80;
    }
}

/// CANTST loopback
pub const TST_LBACK: u32 = 0x10;

/// CRQ busy flag
pub const CRQ_BUSY: u32 = 0x8000;

bitflags! {
    /// IFnCMSK bits. `TXRQST` doubles as `NEWDAT` on reads
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Cmsk: u32 {
        /// Transfer data bytes 4-7
        const DATAB = 0x01;
        /// Transfer data bytes 0-3
        const DATAA = 0x02;
        /// Request transmission on write
        const TXRQST = 0x04;
        /// Clear INTPND on read
        const CLRINTPND = 0x08;
        /// Transfer message control
        const CONTROL = 0x10;
        /// Transfer arbitration
        const ARB = 0x20;
        /// Transfer the mask
        const MASK = 0x40;
        /// Write from the window to the object
        const WRNRD = 0x80;
    }
}

impl Cmsk {
    /// Clears NEWDAT when set on a read transfer
    pub const NEWDAT: Cmsk = Cmsk::TXRQST;
}

/// Compare the identifier width
pub const MSK2_MXTD: u32 = 0x8000;
/// Compare the direction
pub const MSK2_MDIR: u32 = 0x4000;

/// Object is in use
pub const ARB2_MSGVAL: u32 = 0x8000;
/// 29bit identifier
pub const ARB2_XTD: u32 = 0x4000;
/// Transmit object
pub const ARB2_DIR: u32 = 0x2000;

/// Data length code
pub const MCTL_DLC: u32 = 0x000F;
/// End of a FIFO buffer
pub const MCTL_EOB: u32 = 0x0080;
/// Transmission requested
pub const MCTL_TXRQST: u32 = 0x0100;
/// Use the acceptance mask
pub const MCTL_UMASK: u32 = 0x1000;
/// Interrupt pending
pub const MCTL_INTPND: u32 = 0x2000;
/// A frame was overwritten before it was read
pub const MCTL_MSGLST: u32 = 0x4000;
/// Unread data
pub const MCTL_NEWDAT: u32 = 0x8000;
