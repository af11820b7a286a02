// Licensed under the Apache-2.0 license

//! Register access for the I3C peripheral.
//!
//! The driver never dereferences raw addresses itself. Every access goes
//! through [`RegisterAccess`], which the memory-mapped backend [`Mmio`]
//! implements with volatile loads and stores. Reading a data register pops
//! the corresponding FIFO and writing `CEVR` clears event flags, so the
//! trait takes `&mut self` on both paths.

use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// Registers used by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Message control word (controller) / request (target)
    Cr,
    Cfgr,
    /// Receive data, byte access
    Rdr,
    /// Receive data, word access
    Rdwr,
    /// Transmit data, byte access
    Tdr,
    /// Transmit data, word access
    Tdwr,
    /// IBI payload data
    Ibidr,
    /// Target transmit configuration
    Tgttdr,
    Sr,
    Ser,
    /// Received message (IBI / controller-role / hot-join)
    Rmr,
    Evr,
    Ier,
    Cevr,
    /// Own device characteristics
    Devr0,
    /// Device table entry, 1..=4
    Devr(u8),
    Maxrlr,
    Maxwlr,
    Timingr0,
    Timingr1,
    Timingr2,
    Bcr,
    Dcr,
    Getcapr,
    Crcapr,
    Getmxdsr,
    Epidr,
}

impl Reg {
    /// Byte offset from the peripheral base address.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Reg::Cr => 0x00,
            Reg::Cfgr => 0x04,
            Reg::Rdr => 0x10,
            Reg::Rdwr => 0x14,
            Reg::Tdr => 0x18,
            Reg::Tdwr => 0x1C,
            Reg::Ibidr => 0x20,
            Reg::Tgttdr => 0x24,
            Reg::Sr => 0x30,
            Reg::Ser => 0x34,
            Reg::Rmr => 0x40,
            Reg::Evr => 0x50,
            Reg::Ier => 0x54,
            Reg::Cevr => 0x58,
            Reg::Devr0 => 0x60,
            Reg::Devr(n) => 0x60 + 4 * (n as usize),
            Reg::Maxrlr => 0x90,
            Reg::Maxwlr => 0x94,
            Reg::Timingr0 => 0xA0,
            Reg::Timingr1 => 0xA4,
            Reg::Timingr2 => 0xA8,
            Reg::Bcr => 0xC0,
            Reg::Dcr => 0xC4,
            Reg::Getcapr => 0xC8,
            Reg::Crcapr => 0xCC,
            Reg::Getmxdsr => 0xD0,
            Reg::Epidr => 0xD4,
        }
    }
}

/// Number of device table entries (`DEVR1`..`DEVR4`).
pub const DEVICE_TABLE_LEN: u8 = 4;

/// Control word fields.
pub mod cr {
    pub const DCNT_MASK: u32 = 0xFFFF;
    pub const RNW: u32 = 1 << 16;
    pub const CCC_SHIFT: u32 = 16;
    pub const CCC_MASK: u32 = 0xFF << CCC_SHIFT;
    pub const ADD_SHIFT: u32 = 17;
    pub const ADD_MASK: u32 = 0x7F << ADD_SHIFT;
    pub const MTYPE_SHIFT: u32 = 27;
    pub const MTYPE_MASK: u32 = 0xF << MTYPE_SHIFT;
    pub const MEND: u32 = 1 << 31;
}

/// Message types carried in the control word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Release the bus (SCL clock stop)
    Release = 0x0,
    /// Arbitrable header only
    Header = 0x1,
    Private = 0x2,
    LegacyI2c = 0x3,
    /// Direct CCC addressed part
    Direct = 0x4,
    /// CCC code (broadcast, or header of a direct CCC)
    Ccc = 0x6,
    HotJoin = 0x8,
    ControllerRoleRequest = 0x9,
    Ibi = 0xA,
}

impl MessageType {
    #[must_use]
    pub const fn bits(self) -> u32 {
        (self as u32) << cr::MTYPE_SHIFT
    }

    #[must_use]
    pub const fn from_control_word(word: u32) -> Option<Self> {
        match (word & cr::MTYPE_MASK) >> cr::MTYPE_SHIFT {
            0x0 => Some(Self::Release),
            0x1 => Some(Self::Header),
            0x2 => Some(Self::Private),
            0x3 => Some(Self::LegacyI2c),
            0x4 => Some(Self::Direct),
            0x6 => Some(Self::Ccc),
            0x8 => Some(Self::HotJoin),
            0x9 => Some(Self::ControllerRoleRequest),
            0xA => Some(Self::Ibi),
            _ => None,
        }
    }
}

/// Configuration register fields.
pub mod cfgr {
    pub const EN: u32 = 1 << 0;
    pub const CRINIT: u32 = 1 << 1;
    pub const NOARBH: u32 = 1 << 2;
    pub const RSTPTRN: u32 = 1 << 3;
    pub const EXITPTRN: u32 = 1 << 4;
    pub const HKSDAEN: u32 = 1 << 5;
    pub const HJACK: u32 = 1 << 7;
    pub const RXDMAEN: u32 = 1 << 8;
    pub const RXFLUSH: u32 = 1 << 9;
    pub const RXTHRES: u32 = 1 << 10;
    pub const TXDMAEN: u32 = 1 << 12;
    pub const TXFLUSH: u32 = 1 << 13;
    pub const TXTHRES: u32 = 1 << 14;
    pub const SDMAEN: u32 = 1 << 16;
    pub const SFLUSH: u32 = 1 << 17;
    pub const SMODE: u32 = 1 << 18;
    pub const TMODE: u32 = 1 << 19;
    pub const CDMAEN: u32 = 1 << 20;
    pub const CFLUSH: u32 = 1 << 21;

    pub const ALL_DMA: u32 = RXDMAEN | TXDMAEN | SDMAEN | CDMAEN;
    pub const ALL_FLUSH: u32 = RXFLUSH | TXFLUSH | SFLUSH | CFLUSH;
}

/// Event flags. `EVR`, `IER` and `CEVR` share the same bit positions.
pub mod ev {
    pub const CFE: u32 = 1 << 0;
    pub const TXFE: u32 = 1 << 1;
    pub const CFNF: u32 = 1 << 2;
    pub const SFNE: u32 = 1 << 3;
    pub const TXFNF: u32 = 1 << 4;
    pub const RXFNE: u32 = 1 << 5;
    pub const TXLAST: u32 = 1 << 6;
    pub const RXLAST: u32 = 1 << 7;
    pub const FC: u32 = 1 << 9;
    pub const RXTGTEND: u32 = 1 << 10;
    pub const ERR: u32 = 1 << 11;
    pub const IBI: u32 = 1 << 15;
    pub const IBIEND: u32 = 1 << 16;
    pub const CR: u32 = 1 << 17;
    pub const CRUPD: u32 = 1 << 18;
    pub const HJ: u32 = 1 << 19;
    pub const WKP: u32 = 1 << 21;
    pub const GET: u32 = 1 << 22;
    pub const STA: u32 = 1 << 23;
    pub const DAUPD: u32 = 1 << 24;
    pub const MWLUPD: u32 = 1 << 25;
    pub const MRLUPD: u32 = 1 << 26;
    pub const RST: u32 = 1 << 27;
    pub const ASUPD: u32 = 1 << 28;
    pub const INTUPD: u32 = 1 << 29;
    pub const DEF: u32 = 1 << 30;
    pub const GRP: u32 = 1 << 31;

    /// Flags that only reflect FIFO levels and cannot be cleared.
    pub const FIFO_STATUS: u32 = CFE | TXFE | CFNF | SFNE | TXFNF | RXFNE | TXLAST | RXLAST;
    /// Notifications a controller may listen to.
    pub const CONTROLLER_NOTIFICATIONS: u32 = IBI | CR | HJ | WKP | CRUPD;
    /// Notifications a target may listen to.
    pub const TARGET_NOTIFICATIONS: u32 =
        GET | STA | DAUPD | MWLUPD | MRLUPD | RST | ASUPD | INTUPD | DEF | GRP | CRUPD;
}

/// Status register fields.
pub mod sr {
    pub const XDCNT_MASK: u32 = 0xFFFF;
    pub const ABT: u32 = 1 << 17;
    pub const DIR: u32 = 1 << 18;
    pub const MID_SHIFT: u32 = 24;
}

/// Status-error register fields.
pub mod ser {
    pub const CODERR_MASK: u32 = 0xF;
    pub const PERR: u32 = 1 << 4;
    pub const STALL: u32 = 1 << 5;
    pub const DOVR: u32 = 1 << 6;
    pub const COVR: u32 = 1 << 7;
    pub const ANACK: u32 = 1 << 8;
    pub const DNACK: u32 = 1 << 9;
    pub const DERR: u32 = 1 << 10;
}

/// Received message register fields.
pub mod rmr {
    pub const IBIRDCNT_MASK: u32 = 0x7;
    pub const RCODE_SHIFT: u32 = 8;
    pub const RCODE_MASK: u32 = 0xFF << RCODE_SHIFT;
    pub const RADD_SHIFT: u32 = 17;
    pub const RADD_MASK: u32 = 0x7F << RADD_SHIFT;
}

/// Own device characteristics (`DEVR0`).
pub mod devr0 {
    pub const DAVAL: u32 = 1 << 0;
    pub const DA_SHIFT: u32 = 1;
    pub const DA_MASK: u32 = 0x7F << DA_SHIFT;
    pub const IBIEN: u32 = 1 << 16;
    pub const CREN: u32 = 1 << 17;
    pub const HJEN: u32 = 1 << 19;
    pub const AS_SHIFT: u32 = 20;
    pub const AS_MASK: u32 = 0x3 << AS_SHIFT;
    pub const RSTACT_SHIFT: u32 = 22;
    pub const RSTACT_MASK: u32 = 0x3 << RSTACT_SHIFT;
    pub const RSTVAL: u32 = 1 << 24;
}

/// Device table entries (`DEVR1`..`DEVR4`).
pub mod devrx {
    pub const DA_SHIFT: u32 = 1;
    pub const DA_MASK: u32 = 0x7F << DA_SHIFT;
    pub const IBIACK: u32 = 1 << 16;
    pub const CRACK: u32 = 1 << 17;
    pub const IBIDEN: u32 = 1 << 18;
    pub const SUSP: u32 = 1 << 19;
    pub const DIS: u32 = 1 << 31;
}

pub mod maxrlr {
    pub const MRL_MASK: u32 = 0xFFFF;
    pub const IBIP_SHIFT: u32 = 16;
    pub const IBIP_MASK: u32 = 0x7 << IBIP_SHIFT;
}

pub mod tgttdr {
    pub const TGTTDCNT_MASK: u32 = 0xFFFF;
    pub const PRELOAD: u32 = 1 << 16;
}

pub mod timingr0 {
    pub const SCLL_PP_SHIFT: u32 = 0;
    pub const SCLH_I3C_SHIFT: u32 = 8;
    pub const SCLL_OD_SHIFT: u32 = 16;
    pub const SCLH_I2C_SHIFT: u32 = 24;
}

pub mod timingr1 {
    pub const AVAL_SHIFT: u32 = 0;
    pub const ASNCR_SHIFT: u32 = 8;
    pub const FREE_SHIFT: u32 = 16;
    pub const FREE_MASK: u32 = 0x7F << FREE_SHIFT;
    pub const SDA_HD: u32 = 1 << 28;
}

pub mod timingr2 {
    pub const STALLT: u32 = 1 << 0;
    pub const STALLD: u32 = 1 << 1;
    pub const STALLC: u32 = 1 << 2;
    pub const STALLA: u32 = 1 << 3;
    pub const STALL_SHIFT: u32 = 8;
}

pub mod bcr {
    pub const MAX_SPEED_LIMIT: u32 = 1 << 0;
    pub const IBI_PAYLOAD: u32 = 1 << 2;
    pub const CONTROLLER_CAPABLE: u32 = 1 << 6;
}

pub mod getcapr {
    pub const CAPPEND: u32 = 1 << 14;
}

pub mod crcapr {
    pub const CAPDHOFF: u32 = 1 << 3;
    pub const CAPGRP: u32 = 1 << 9;
}

pub mod getmxdsr {
    pub const HOFFAS_MASK: u32 = 0x3;
    pub const FMT_SHIFT: u32 = 8;
    pub const RDTURN_SHIFT: u32 = 16;
    pub const TSCO: u32 = 1 << 24;
}

pub mod epidr {
    pub const MIPIID_SHIFT: u32 = 12;
    pub const MIPIID_MASK: u32 = 0xF << MIPIID_SHIFT;
}

/// Access to the I3C register file.
pub trait RegisterAccess {
    /// Read a register. Reading `Rdr`, `Rdwr` or `Ibidr` consumes FIFO data.
    fn read(&mut self, reg: Reg) -> u32;

    /// Write a register. Writing `Cevr` clears the matching event flags.
    fn write(&mut self, reg: Reg, value: u32);

    fn modify(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    fn set_bits(&mut self, reg: Reg, bits: u32) {
        self.modify(reg, |v| v | bits);
    }

    fn clear_bits(&mut self, reg: Reg, bits: u32) {
        self.modify(reg, |v| v & !bits);
    }
}

/// A memory-mapped I3C peripheral instance.
pub trait Instance {
    const BASE: usize;
    const NAME: &'static str;
}

macro_rules! i3c_instances {
    ($($n:literal => $base:expr),* $(,)?) => {
        paste::paste! {
            $(
                pub struct [<I3c $n>];

                impl Instance for [<I3c $n>] {
                    const BASE: usize = $base;
                    const NAME: &'static str = concat!("I3C", $n);
                }
            )*
        }
    };
}

i3c_instances!(1 => 0x4000_5C00);

/// Volatile register access to a hardware instance.
pub struct Mmio<I: Instance> {
    _instance: PhantomData<I>,
}

impl<I: Instance> Mmio<I> {
    /// # Safety
    ///
    /// The caller must own the peripheral: no other `Mmio<I>` may be alive.
    #[must_use]
    pub unsafe fn steal() -> Self {
        Self {
            _instance: PhantomData,
        }
    }

    fn ptr(reg: Reg) -> *mut u32 {
        (I::BASE + reg.offset()) as *mut u32
    }
}

impl<I: Instance> RegisterAccess for Mmio<I> {
    fn read(&mut self, reg: Reg) -> u32 {
        // SAFETY: the address is inside the register block owned by `self`.
        unsafe { read_volatile(Self::ptr(reg)) }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        // SAFETY: the address is inside the register block owned by `self`.
        unsafe { write_volatile(Self::ptr(reg), value) }
    }
}
