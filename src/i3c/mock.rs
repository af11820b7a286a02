// Licensed under the Apache-2.0 license

//! Host-side register file used by the driver tests.
//!
//! FIFO-level flags are derived from the simulated FIFOs, latched events are
//! raised by the test and cleared through `CEVR` like on silicon.

use super::common::{ControllerConfigBuilder, I3cMode, TargetConfigBuilder};
use super::driver::I3c;
use super::registers::{cfgr, ev, Reg, RegisterAccess};
use crate::common::NoOpLogger;
use embedded_hal::delay::DelayNs;
use std::collections::{HashMap, VecDeque};
use std::vec::Vec;

#[derive(Default)]
pub struct MockRegisters {
    values: HashMap<Reg, u32>,
    /// Latched (clearable) event flags
    events: u32,
    /// Control words written to `CR`, in order
    pub control: Vec<u32>,
    /// Bytes written to `TDR` / `TDWR`
    pub tx: Vec<u8>,
    /// Bytes the peripheral has received, popped by `RDR` / `RDWR`
    pub rx: VecDeque<u8>,
    /// TX FIFO has room
    pub tx_ready: bool,
    /// Control FIFO refuses new words
    pub control_full: bool,
    /// Every `CEVR` write, for clear-sequence checks
    pub cleared: Vec<u32>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self {
            tx_ready: true,
            ..Self::default()
        }
    }

    pub fn raise(&mut self, flags: u32) {
        self.events |= flags;
    }

    pub fn set(&mut self, reg: Reg, value: u32) {
        self.values.insert(reg, value);
    }

    pub fn get(&self, reg: Reg) -> u32 {
        self.values.get(&reg).copied().unwrap_or(0)
    }

    pub fn feed_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    fn fifo_flags(&self) -> u32 {
        let mut flags = ev::CFE;
        if !self.control_full {
            flags |= ev::CFNF;
        }
        if self.tx_ready {
            flags |= ev::TXFNF | ev::TXFE;
        }
        if !self.rx.is_empty() {
            flags |= ev::RXFNE;
        }
        flags
    }
}

impl RegisterAccess for MockRegisters {
    fn read(&mut self, reg: Reg) -> u32 {
        match reg {
            Reg::Evr => self.events | self.fifo_flags(),
            Reg::Rdr => self.rx.pop_front().map_or(0, u32::from),
            Reg::Rdwr => (0..4).fold(0u32, |acc, i| {
                acc | self.rx.pop_front().map_or(0, u32::from) << (8 * i)
            }),
            other => self.get(other),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        match reg {
            Reg::Cr => {
                self.control.push(value);
                self.set(reg, value);
            }
            Reg::Tdr => self.tx.push(value as u8),
            Reg::Tdwr => self.tx.extend_from_slice(&value.to_le_bytes()),
            Reg::Cevr => {
                self.events &= !value;
                self.cleared.push(value);
            }
            Reg::Cfgr => {
                if value & cfgr::RXFLUSH != 0 {
                    self.rx.clear();
                }
                self.set(reg, value & !cfgr::ALL_FLUSH);
            }
            other => self.set(other, value),
        }
    }
}

/// Delay that returns at once; timeouts still count down per call.
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Idle controller on a fresh mock.
pub fn controller<'a>() -> I3c<'a, MockRegisters, NoDelay> {
    let mut i3c = I3c::new(MockRegisters::new(), NoDelay, NoOpLogger);
    i3c.init(I3cMode::Controller).unwrap();
    i3c.configure_controller(&ControllerConfigBuilder::new().build())
        .unwrap();
    i3c
}

/// Idle target on a fresh mock.
pub fn target<'a>() -> I3c<'a, MockRegisters, NoDelay> {
    let mut i3c = I3c::new(MockRegisters::new(), NoDelay, NoOpLogger);
    i3c.init(I3cMode::Target).unwrap();
    i3c.configure_target(&TargetConfigBuilder::new().build())
        .unwrap();
    i3c
}
