// Licensed under the Apache-2.0 license

//! I3C handle and state machine.
//!
//! One [`I3c`] owns one peripheral instance. Transfers are described by an
//! [`XferContext`] whose [`XferRoutine`] decides how events are serviced.
//! Blocking calls drive a local context from a polling loop; interrupt and
//! DMA calls park the context in the handle and [`I3c::handle_interrupt`]
//! drives it from the IRQ. Results of non-blocking work are queued as
//! [`I3cEvent`]s.

use super::ccc::DaaPayload;
use super::common::{
    CccInfo, ControllerConfig, Error, ErrorCode, FifoConfig, FifoThreshold, I3cEvent, I3cMode,
    I3cState, Notification, ResetAction, TargetConfig, XferMode,
};
use super::registers::{
    bcr, cfgr, crcapr, devr0, epidr, ev, getcapr, getmxdsr, maxrlr, rmr, timingr1, timingr2,
    Reg, RegisterAccess,
};
use crate::common::{Logger, NoOpLogger};
use embedded_hal::delay::DelayNs;
use fugit::MillisDurationU32;
use heapless::Deque;

/// Depth of the event queue. The oldest event is dropped on overflow.
pub const EVENT_QUEUE_LEN: usize = 8;

/// Target notifications and the event each one raises.
const TARGET_NOTIFICATIONS: [(u32, Notification); 10] = [
    (ev::GET, Notification::Get),
    (ev::STA, Notification::GetStatus),
    (ev::DAUPD, Notification::DynamicAddressUpdate),
    (ev::MWLUPD, Notification::MaxWriteLengthUpdate),
    (ev::MRLUPD, Notification::MaxReadLengthUpdate),
    (ev::RST, Notification::ResetPattern),
    (ev::ASUPD, Notification::ActivityStateUpdate),
    (ev::INTUPD, Notification::InterruptUpdate),
    (ev::DEF, Notification::DefineTargets),
    (ev::GRP, Notification::GroupAddress),
];

/// Interrupt sub-routine servicing the active transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferRoutine {
    CtrlTx,
    CtrlRx,
    CtrlMultiple,
    CtrlDaa,
    TgtTx,
    TgtRx,
    TgtIbi,
    TgtHotJoin,
    TgtCtrlRole,
}

/// Buffers and progress of the transfer in flight.
pub(crate) struct XferContext<'b> {
    pub(crate) routine: XferRoutine,
    pub(crate) mode: XferMode,
    pub(crate) control: &'b [u32],
    pub(crate) control_idx: usize,
    pub(crate) tx: &'b [u8],
    pub(crate) tx_idx: usize,
    pub(crate) rx: &'b mut [u8],
    pub(crate) rx_idx: usize,
    /// The frame ends with STOP, so completion is signalled by FC
    pub(crate) stop: bool,
}

impl<'b> XferContext<'b> {
    pub(crate) fn new(
        routine: XferRoutine,
        mode: XferMode,
        control: &'b [u32],
        tx: &'b [u8],
        rx: &'b mut [u8],
    ) -> Self {
        let stop = control
            .last()
            .is_none_or(|word| word & super::registers::cr::MEND != 0);
        Self {
            routine,
            mode,
            control,
            control_idx: 0,
            tx,
            tx_idx: 0,
            rx,
            rx_idx: 0,
            stop,
        }
    }

    /// Context with no data phase (IBI, hot-join, controller role).
    pub(crate) fn request(routine: XferRoutine, mode: XferMode) -> Self {
        Self::new(routine, mode, &[], &[], &mut [])
    }

    fn data_done(&self) -> bool {
        self.control_idx >= self.control.len()
            && self.tx_idx >= self.tx.len()
            && self.rx_idx >= self.rx.len()
    }

    fn mark_done(&mut self) {
        self.control_idx = self.control.len();
        self.tx_idx = self.tx.len();
        self.rx_idx = self.rx.len();
    }

    fn transferred(&self) -> usize {
        self.tx_idx + self.rx_idx
    }
}

/// I3C peripheral handle.
pub struct I3c<'a, R: RegisterAccess, D: DelayNs, L: Logger = NoOpLogger> {
    pub(super) regs: R,
    delay: D,
    pub(super) logger: L,
    pub(super) mode: I3cMode,
    pub(super) state: I3cState,
    fifo: FifoConfig,
    /// Interrupts enabled for the transfer in flight
    armed: u32,
    /// Interrupts enabled for notifications
    notifications: u32,
    xfer: Option<XferContext<'a>>,
    pub(super) last_error: ErrorCode,
    events: Deque<I3cEvent, EVENT_QUEUE_LEN>,
    pub(super) pending_daa: Option<DaaPayload>,
    pub(super) xfer_count: usize,
    outcome: Option<Result<(), Error>>,
}

impl<'a, R: RegisterAccess, D: DelayNs, L: Logger> I3c<'a, R, D, L> {
    pub fn new(regs: R, delay: D, logger: L) -> Self {
        Self {
            regs,
            delay,
            logger,
            mode: I3cMode::None,
            state: I3cState::Reset,
            fifo: FifoConfig::default(),
            armed: 0,
            notifications: 0,
            xfer: None,
            last_error: ErrorCode::NONE,
            events: Deque::new(),
            pending_daa: None,
            xfer_count: 0,
            outcome: None,
        }
    }

    /// Select the bus role. Valid only from `Reset`.
    pub fn init(&mut self, mode: I3cMode) -> Result<(), Error> {
        if mode == I3cMode::None {
            return Err(Error::InvalidParam);
        }
        if self.state != I3cState::Reset {
            return Err(Error::Busy);
        }
        self.mode = mode;
        self.state = I3cState::Init;
        self.last_error = ErrorCode::NONE;
        self.logger.debug(format_args!("i3c: init as {:?}", mode));
        Ok(())
    }

    /// Disable the peripheral and drop any transfer or queued event.
    pub fn deinit(&mut self) {
        self.regs.write(Reg::Ier, 0);
        self.regs.clear_bits(Reg::Cfgr, cfgr::EN | cfgr::ALL_DMA);
        self.regs.set_bits(Reg::Cfgr, cfgr::ALL_FLUSH);
        self.armed = 0;
        self.notifications = 0;
        self.xfer = None;
        self.pending_daa = None;
        self.outcome = None;
        self.events.clear();
        self.mode = I3cMode::None;
        self.state = I3cState::Reset;
    }

    pub fn configure_controller(&mut self, config: &ControllerConfig) -> Result<(), Error> {
        self.check_configurable(I3cMode::Controller)?;
        if config.own_dynamic_address != 0
            && !super::ccc::is_valid_dynamic_address(config.own_dynamic_address)
        {
            return Err(Error::InvalidParam);
        }

        self.regs.clear_bits(Reg::Cfgr, cfgr::EN);
        self.regs.write(Reg::Timingr0, config.timing.timingr0);
        self.regs.write(Reg::Timingr1, config.timing.timingr1);

        let stall = &config.stall;
        let mut t2 = u32::from(stall.cycles) << timingr2::STALL_SHIFT;
        for (on, bit) in [
            (stall.on_tbit, timingr2::STALLT),
            (stall.on_data, timingr2::STALLD),
            (stall.on_ccc, timingr2::STALLC),
            (stall.on_ack, timingr2::STALLA),
        ] {
            if on {
                t2 |= bit;
            }
        }
        self.regs.write(Reg::Timingr2, t2);

        self.regs.modify(Reg::Cfgr, |v| {
            let mut v = v | cfgr::CRINIT;
            v = if config.hot_join_ack { v | cfgr::HJACK } else { v & !cfgr::HJACK };
            if config.high_keeper_sda {
                v | cfgr::HKSDAEN
            } else {
                v & !cfgr::HKSDAEN
            }
        });

        if config.own_dynamic_address != 0 {
            self.write_own_address(config.own_dynamic_address);
        }

        self.regs.set_bits(Reg::Cfgr, cfgr::EN);
        self.state = I3cState::Idle;
        self.logger.info(format_args!(
            "i3c: controller ready, timingr0={:#010x}",
            config.timing.timingr0
        ));
        Ok(())
    }

    pub fn configure_target(&mut self, config: &TargetConfig) -> Result<(), Error> {
        self.check_configurable(I3cMode::Target)?;

        self.regs.clear_bits(Reg::Cfgr, cfgr::EN | cfgr::CRINIT);
        self.regs.modify(Reg::Timingr1, |v| {
            (v & !0xFF) | (u32::from(config.bus_available) << timingr1::AVAL_SHIFT)
        });

        let mut bcr_value = 0;
        if config.max_speed_limitation {
            bcr_value |= bcr::MAX_SPEED_LIMIT;
        }
        if config.ibi_payload.bytes() != 0 {
            bcr_value |= bcr::IBI_PAYLOAD;
        }
        if config.controller_capable {
            bcr_value |= bcr::CONTROLLER_CAPABLE;
        }
        self.regs.write(Reg::Bcr, bcr_value);
        self.regs.write(Reg::Dcr, u32::from(config.dcr));
        self.regs.write(
            Reg::Getcapr,
            if config.pending_read_mdb { getcapr::CAPPEND } else { 0 },
        );

        let mut crcap = 0;
        if config.handoff_delay {
            crcap |= crcapr::CAPDHOFF;
        }
        if config.group_address_capable {
            crcap |= crcapr::CAPGRP;
        }
        self.regs.write(Reg::Crcapr, crcap);

        let mut mxds = 0;
        if config.max_read_turnaround != 0 {
            mxds = (2 << getmxdsr::FMT_SHIFT)
                | (u32::from(config.max_read_turnaround) << getmxdsr::RDTURN_SHIFT);
        }
        self.regs.write(Reg::Getmxdsr, mxds);

        self.regs.modify(Reg::Epidr, |v| {
            (v & !epidr::MIPIID_MASK) | (u32::from(config.mipi_identifier) << epidr::MIPIID_SHIFT)
        });
        self.regs.write(
            Reg::Maxrlr,
            u32::from(config.max_read_length)
                | ((config.ibi_payload as u32) << maxrlr::IBIP_SHIFT),
        );
        self.regs.write(Reg::Maxwlr, u32::from(config.max_write_length));

        self.regs.set_bits(Reg::Cfgr, cfgr::EN);
        self.state = I3cState::Idle;
        self.logger.info(format_args!(
            "i3c: target ready, dcr={:#04x} mrl={} mwl={}",
            config.dcr, config.max_read_length, config.max_write_length
        ));
        Ok(())
    }

    /// FIFO thresholds and control/status FIFO usage. Only while idle.
    pub fn configure_fifo(&mut self, config: &FifoConfig) -> Result<(), Error> {
        if self.state != I3cState::Idle {
            return Err(Error::Busy);
        }
        let mut set = 0;
        if config.rx_threshold == FifoThreshold::Word {
            set |= cfgr::RXTHRES;
        }
        if config.tx_threshold == FifoThreshold::Word {
            set |= cfgr::TXTHRES;
        }
        if config.control_fifo {
            set |= cfgr::TMODE;
        }
        if config.status_fifo {
            set |= cfgr::SMODE;
        }
        let all = cfgr::RXTHRES | cfgr::TXTHRES | cfgr::TMODE | cfgr::SMODE;
        self.regs.modify(Reg::Cfgr, |v| (v & !all) | set);
        self.fifo = *config;
        Ok(())
    }

    /// Enable notification interrupts. The mask uses [`ev`] bit positions
    /// and must only name notifications of the current role.
    pub fn activate_notifications(&mut self, mask: u32) -> Result<(), Error> {
        let allowed = match self.mode {
            I3cMode::Controller => ev::CONTROLLER_NOTIFICATIONS,
            I3cMode::Target => ev::TARGET_NOTIFICATIONS,
            I3cMode::None => 0,
        };
        if mask == 0 || mask & !allowed != 0 {
            return Err(Error::InvalidParam);
        }
        if matches!(self.state, I3cState::Reset | I3cState::Init) {
            return Err(Error::NotAllowed);
        }
        self.notifications |= mask;
        self.sync_interrupts();
        Ok(())
    }

    pub fn deactivate_notifications(&mut self, mask: u32) -> Result<(), Error> {
        if mask == 0 {
            return Err(Error::InvalidParam);
        }
        self.notifications &= !mask;
        self.sync_interrupts();
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> I3cState {
        self.state
    }

    #[must_use]
    pub fn mode(&self) -> I3cMode {
        self.mode
    }

    /// Error bits accumulated since `init`.
    #[must_use]
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// Bytes moved by the last completed transfer, or targets addressed by
    /// the last dynamic address assignment.
    #[must_use]
    pub fn xfer_count(&self) -> usize {
        self.xfer_count
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn poll_event(&mut self) -> Option<I3cEvent> {
        self.events.pop_front()
    }

    /// Service the peripheral from the foreground until an event is queued.
    pub fn wait_event(&mut self, timeout: MillisDurationU32) -> Result<I3cEvent, Error> {
        let mut remaining = timeout.to_micros();
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            self.handle_interrupt();
            if remaining == 0 {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(1);
            remaining -= 1;
        }
    }

    /// Drive a non-blocking transfer from the foreground.
    ///
    /// Returns `WouldBlock` while the transfer is in flight, then its result
    /// once.
    pub fn poll_transfer(&mut self) -> nb::Result<(), Error> {
        if self.xfer.is_some() || self.state == I3cState::Abort {
            self.handle_interrupt();
        }
        if self.xfer.is_some() || self.state == I3cState::Abort {
            return Err(nb::Error::WouldBlock);
        }
        match self.outcome.take() {
            Some(Err(e)) => Err(nb::Error::Other(e)),
            Some(Ok(())) | None => Ok(()),
        }
    }

    /// IRQ entry point.
    ///
    /// Errors take priority, then notifications not claimed by the active
    /// routine, then the routine itself.
    pub fn handle_interrupt(&mut self) {
        let evr = self.regs.read(Reg::Evr);

        if evr & ev::ERR != 0 {
            let had_xfer = self.xfer.is_some();
            let code = self.treat_error();
            self.logger.error(format_args!("i3c: error ser={:#x}", code.bits()));
            let event = if self.state == I3cState::Abort {
                I3cEvent::AbortComplete
            } else {
                I3cEvent::Error(code)
            };
            self.state = I3cState::Idle;
            if had_xfer {
                self.outcome = Some(Err(Error::Hardware(code)));
            }
            self.push_event(event);
            return;
        }

        let pending = evr & self.notifications & !self.armed;
        if pending != 0 {
            self.process_notifications(pending);
        }

        if self.state == I3cState::Abort {
            if evr & ev::FC != 0 || self.mode == I3cMode::Target {
                self.regs.write(Reg::Cevr, ev::FC);
                self.finish_abort();
            }
            return;
        }

        let Some(mut ctx) = self.xfer.take() else {
            return;
        };
        if evr & self.armed == 0 {
            self.xfer = Some(ctx);
            return;
        }
        match self.step(&mut ctx, evr) {
            Some(event) => {
                self.complete(&ctx);
                self.outcome = Some(match event {
                    I3cEvent::Error(code) => Err(Error::Hardware(code)),
                    _ => Ok(()),
                });
                self.push_event(event);
            }
            None => self.xfer = Some(ctx),
        }
    }

    /// Report a DMA channel failure for the transfer in flight.
    pub fn dma_error(&mut self) {
        if self.xfer.as_ref().map(|x| x.mode) != Some(XferMode::Dma) {
            return;
        }
        self.stop_transfer();
        self.last_error |= ErrorCode::DMA;
        self.state = I3cState::Idle;
        self.outcome = Some(Err(Error::Dma));
        self.logger.error(format_args!("i3c: dma error"));
        self.push_event(I3cEvent::Error(ErrorCode::DMA));
    }

    /// Cancel the transfer in flight. Completion is reported by
    /// [`I3cEvent::AbortComplete`].
    pub fn abort_it(&mut self) -> Result<(), Error> {
        if !self.state.is_busy() || self.state == I3cState::Abort {
            return Err(Error::InvalidParam);
        }
        self.stop_transfer();
        self.state = I3cState::Abort;
        self.logger.warn(format_args!("i3c: abort requested"));
        if self.mode == I3cMode::Target {
            self.finish_abort();
        } else {
            self.arm(ev::FC);
        }
        Ok(())
    }

    /// Cancel the transfer in flight and wait for the bus to settle.
    pub fn abort(&mut self, timeout: MillisDurationU32) -> Result<(), Error> {
        self.abort_it()?;
        let mut remaining = timeout.to_micros();
        while self.state == I3cState::Abort {
            if remaining == 0 {
                self.disarm(ev::FC);
                self.state = I3cState::Idle;
                return Err(Error::Timeout);
            }
            self.handle_interrupt();
            self.delay.delay_us(1);
            remaining -= 1;
        }
        // The completion belongs to this call, not to the event consumer.
        if self.events.back() == Some(&I3cEvent::AbortComplete) {
            self.events.pop_back();
        }
        Ok(())
    }

    // ---- internals shared with the role-specific operations ----

    pub(crate) fn check_ready(&self, mode: I3cMode) -> Result<(), Error> {
        if self.mode != mode {
            return Err(Error::NotAllowed);
        }
        match self.state {
            I3cState::Idle => Ok(()),
            I3cState::Reset | I3cState::Init => Err(Error::NotAllowed),
            _ => Err(Error::Busy),
        }
    }

    fn check_configurable(&self, mode: I3cMode) -> Result<(), Error> {
        if self.mode != mode {
            return Err(Error::NotAllowed);
        }
        if self.state.is_busy() || self.state == I3cState::Reset {
            return Err(Error::Busy);
        }
        Ok(())
    }

    pub(crate) fn write_own_address(&mut self, address: u8) {
        self.regs.modify(Reg::Devr0, |v| {
            (v & !devr0::DA_MASK) | (u32::from(address) << devr0::DA_SHIFT) | devr0::DAVAL
        });
    }

    pub(crate) fn arm(&mut self, bits: u32) {
        self.armed |= bits;
        self.sync_interrupts();
    }

    pub(crate) fn disarm(&mut self, bits: u32) {
        self.armed &= !bits;
        self.sync_interrupts();
    }

    fn sync_interrupts(&mut self) {
        let mut ier = self.armed | self.notifications;
        if ier != 0 {
            ier |= ev::ERR;
        }
        self.regs.write(Reg::Ier, ier);
    }

    pub(crate) fn push_event(&mut self, event: I3cEvent) {
        if self.events.is_full() {
            if let Some(dropped) = self.events.pop_front() {
                self.logger.warn(format_args!("i3c: event queue full, dropped {:?}", dropped));
            }
        }
        // Cannot fail: a slot was freed above.
        let _ = self.events.push_back(event);
    }

    /// Park a context for interrupt or DMA servicing.
    pub(crate) fn launch(&mut self, ctx: XferContext<'a>, interrupts: u32) {
        self.outcome = None;
        self.xfer = Some(ctx);
        self.arm(interrupts);
    }

    /// Drive a context to completion from the foreground.
    pub(crate) fn run_blocking(
        &mut self,
        ctx: &mut XferContext<'_>,
        timeout: MillisDurationU32,
        mut on_daa: impl FnMut(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut remaining = timeout.to_micros();
        loop {
            let evr = self.regs.read(Reg::Evr);
            if evr & ev::ERR != 0 {
                let code = self.treat_error();
                self.state = I3cState::Idle;
                self.logger.error(format_args!("i3c: transfer failed ser={:#x}", code.bits()));
                return Err(Error::Hardware(code));
            }
            match self.step(ctx, evr) {
                Some(I3cEvent::Error(code)) => {
                    self.complete(ctx);
                    return Err(Error::Hardware(code));
                }
                Some(_) => {
                    self.complete(ctx);
                    return Ok(());
                }
                None => {}
            }
            if self.pending_daa.is_some() {
                if let Err(e) = on_daa(self) {
                    self.stop_transfer();
                    self.state = I3cState::Idle;
                    return Err(e);
                }
                continue;
            }
            if remaining == 0 {
                self.stop_transfer();
                self.state = I3cState::Idle;
                self.logger.warn(format_args!("i3c: {:?} timed out", ctx.routine));
                return Err(Error::Timeout);
            }
            self.delay.delay_us(1);
            remaining -= 1;
        }
    }

    /// Service one batch of events for `ctx`; returns the completion event
    /// once the routine is finished.
    fn step(&mut self, ctx: &mut XferContext<'_>, evr: u32) -> Option<I3cEvent> {
        match ctx.routine {
            XferRoutine::CtrlTx | XferRoutine::CtrlRx | XferRoutine::CtrlMultiple => {
                if ctx.mode != XferMode::Dma {
                    self.feed_control(ctx);
                    self.feed_tx(ctx);
                    self.drain_rx(ctx);
                }
                let done = if ctx.stop {
                    evr & ev::FC != 0
                } else {
                    ctx.data_done() && self.regs.read(Reg::Evr) & ev::CFE != 0
                };
                if !done {
                    return None;
                }
                self.frame_complete(ctx);
                Some(match ctx.routine {
                    XferRoutine::CtrlTx => I3cEvent::CtrlTxComplete,
                    XferRoutine::CtrlRx => I3cEvent::CtrlRxComplete,
                    _ => I3cEvent::CtrlMultipleXferComplete,
                })
            }
            XferRoutine::CtrlDaa => {
                self.feed_control(ctx);
                if self.pending_daa.is_some() {
                    return None;
                }
                let now = self.regs.read(Reg::Evr);
                if now & ev::TXFNF != 0 && now & ev::RXFNE != 0 {
                    let mut bytes = [0u8; 8];
                    let (lo, hi) = bytes.split_at_mut(4);
                    lo.copy_from_slice(&self.regs.read(Reg::Rdwr).to_le_bytes());
                    hi.copy_from_slice(&self.regs.read(Reg::Rdwr).to_le_bytes());
                    let payload = DaaPayload::from_bus_bytes(&bytes);
                    self.logger.debug(format_args!(
                        "i3c: daa request pid={:#014x}",
                        payload.pid()
                    ));
                    self.pending_daa = Some(payload);
                    if ctx.mode == XferMode::Interrupt {
                        self.disarm(ev::TXFNF);
                        self.push_event(I3cEvent::DynamicAddressRequest(payload));
                    }
                    return None;
                }
                if evr & ev::FC == 0 {
                    return None;
                }
                self.regs.write(Reg::Cevr, ev::FC);
                Some(I3cEvent::DaaComplete)
            }
            XferRoutine::TgtTx | XferRoutine::TgtRx => {
                if ctx.mode != XferMode::Dma {
                    self.feed_tx(ctx);
                    self.drain_rx(ctx);
                }
                if evr & ev::FC == 0 {
                    return None;
                }
                self.frame_complete(ctx);
                if ctx.routine == XferRoutine::TgtRx && self.regs.read(Reg::Evr) & ev::RXFNE != 0 {
                    // Controller wrote past the buffer; drop the rest.
                    self.regs.set_bits(Reg::Cfgr, cfgr::RXFLUSH);
                    self.last_error |= ErrorCode::SIZE;
                    self.logger.warn(format_args!(
                        "i3c: private write longer than {} bytes",
                        ctx.rx.len()
                    ));
                    return Some(I3cEvent::Error(ErrorCode::SIZE));
                }
                Some(if ctx.routine == XferRoutine::TgtTx {
                    I3cEvent::TgtTxComplete
                } else {
                    I3cEvent::TgtRxComplete
                })
            }
            XferRoutine::TgtIbi => {
                if evr & ev::IBIEND == 0 {
                    return None;
                }
                self.regs.write(Reg::Cevr, ev::IBIEND);
                Some(I3cEvent::IbiComplete)
            }
            XferRoutine::TgtHotJoin => {
                if evr & ev::DAUPD == 0 {
                    return None;
                }
                self.regs.write(Reg::Cevr, ev::DAUPD);
                let address = own_address(self.regs.read(Reg::Devr0));
                Some(I3cEvent::HotJoinComplete { address })
            }
            XferRoutine::TgtCtrlRole => {
                if evr & ev::CRUPD == 0 {
                    return None;
                }
                self.regs.write(Reg::Cevr, ev::CRUPD);
                self.mode = I3cMode::Controller;
                Some(I3cEvent::ControllerRoleUpdate { mode: self.mode })
            }
        }
    }

    fn feed_control(&mut self, ctx: &mut XferContext<'_>) {
        while let Some(&word) = ctx.control.get(ctx.control_idx) {
            if self.regs.read(Reg::Evr) & ev::CFNF == 0 {
                return;
            }
            self.regs.write(Reg::Cr, word);
            ctx.control_idx += 1;
        }
        if ctx.mode == XferMode::Interrupt && self.armed & ev::CFNF != 0 {
            self.disarm(ev::CFNF);
        }
    }

    fn feed_tx(&mut self, ctx: &mut XferContext<'_>) {
        while ctx.tx_idx < ctx.tx.len() {
            if self.regs.read(Reg::Evr) & ev::TXFNF == 0 {
                return;
            }
            let rest = ctx.tx.get(ctx.tx_idx..).unwrap_or_default();
            match rest {
                [a, b, c, d, ..] if self.fifo.tx_threshold == FifoThreshold::Word => {
                    self.regs
                        .write(Reg::Tdwr, u32::from_le_bytes([*a, *b, *c, *d]));
                    ctx.tx_idx += 4;
                }
                [a, ..] => {
                    self.regs.write(Reg::Tdr, u32::from(*a));
                    ctx.tx_idx += 1;
                }
                [] => return,
            }
        }
        if ctx.mode == XferMode::Interrupt && self.armed & ev::TXFNF != 0 {
            self.disarm(ev::TXFNF);
        }
    }

    fn drain_rx(&mut self, ctx: &mut XferContext<'_>) {
        while ctx.rx_idx < ctx.rx.len() {
            if self.regs.read(Reg::Evr) & ev::RXFNE == 0 {
                return;
            }
            let word_read = self.fifo.rx_threshold == FifoThreshold::Word
                && ctx.rx.len() - ctx.rx_idx >= 4;
            if word_read {
                let bytes = self.regs.read(Reg::Rdwr).to_le_bytes();
                if let Some(dst) = ctx.rx.get_mut(ctx.rx_idx..ctx.rx_idx + 4) {
                    dst.copy_from_slice(&bytes);
                }
                ctx.rx_idx += 4;
            } else {
                let byte = self.regs.read(Reg::Rdr) as u8;
                if let Some(dst) = ctx.rx.get_mut(ctx.rx_idx) {
                    *dst = byte;
                }
                ctx.rx_idx += 1;
            }
        }
    }

    /// Frame complete: acknowledge FC and pick up the last data.
    fn frame_complete(&mut self, ctx: &mut XferContext<'_>) {
        self.regs.write(Reg::Cevr, ev::FC);
        if ctx.mode == XferMode::Dma {
            self.regs.clear_bits(Reg::Cfgr, cfgr::ALL_DMA);
            ctx.mark_done();
        } else {
            self.drain_rx(ctx);
        }
    }

    /// Bookkeeping shared by every successful completion.
    fn complete(&mut self, ctx: &XferContext<'_>) {
        if ctx.routine != XferRoutine::CtrlDaa {
            self.xfer_count = ctx.transferred();
        }
        self.armed = 0;
        self.sync_interrupts();
        self.pending_daa = None;
        self.state = I3cState::Idle;
        self.logger.debug(format_args!(
            "i3c: {:?} complete, {} bytes",
            ctx.routine,
            ctx.transferred()
        ));
    }

    /// Read and acknowledge the error, then stop whatever was running.
    fn treat_error(&mut self) -> ErrorCode {
        let code = ErrorCode::from_status_error(self.regs.read(Reg::Ser));
        self.regs.write(Reg::Cevr, ev::ERR);
        self.stop_transfer();
        self.last_error |= code;
        code
    }

    /// Flush FIFOs, release DMA requests and forget the context.
    fn stop_transfer(&mut self) {
        self.regs.clear_bits(Reg::Cfgr, cfgr::ALL_DMA);
        self.regs.set_bits(Reg::Cfgr, cfgr::ALL_FLUSH);
        self.xfer = None;
        self.pending_daa = None;
        self.armed = 0;
        self.sync_interrupts();
    }

    fn finish_abort(&mut self) {
        self.armed = 0;
        self.sync_interrupts();
        self.state = I3cState::Idle;
        self.outcome = None;
        self.push_event(I3cEvent::AbortComplete);
    }

    fn process_notifications(&mut self, pending: u32) {
        if self.mode == I3cMode::Controller {
            if pending & ev::IBI != 0 {
                let msg = self.regs.read(Reg::Rmr);
                let len = (msg & rmr::IBIRDCNT_MASK) as u8;
                let payload = if len > 0 { self.regs.read(Reg::Ibidr) } else { 0 };
                self.regs.write(Reg::Cevr, ev::IBI);
                self.push_event(I3cEvent::Ibi {
                    address: received_address(msg),
                    payload,
                    len,
                });
            }
            if pending & ev::HJ != 0 {
                self.regs.write(Reg::Cevr, ev::HJ);
                self.push_event(I3cEvent::HotJoinRequest);
            }
            if pending & ev::CR != 0 {
                let msg = self.regs.read(Reg::Rmr);
                self.regs.write(Reg::Cevr, ev::CR);
                self.push_event(I3cEvent::ControllerRoleRequest {
                    address: received_address(msg),
                });
            }
            if pending & ev::WKP != 0 {
                self.regs.write(Reg::Cevr, ev::WKP);
                self.push_event(I3cEvent::WakeUp);
            }
        } else {
            for (flag, notification) in TARGET_NOTIFICATIONS {
                if pending & flag != 0 {
                    self.regs.write(Reg::Cevr, flag);
                    self.push_event(I3cEvent::Notify(notification));
                }
            }
        }

        if pending & ev::CRUPD != 0 {
            self.regs.write(Reg::Cevr, ev::CRUPD);
            self.mode = match self.mode {
                I3cMode::Controller => I3cMode::Target,
                _ => I3cMode::Controller,
            };
            self.logger.info(format_args!("i3c: role is now {:?}", self.mode));
            self.push_event(I3cEvent::ControllerRoleUpdate { mode: self.mode });
        }
    }

    /// What the controller configured through CCCs, as seen by a target.
    pub fn ccc_info(&mut self) -> Result<CccInfo, Error> {
        if self.mode != I3cMode::Target {
            return Err(Error::NotAllowed);
        }
        let devr = self.regs.read(Reg::Devr0);
        let mrl = self.regs.read(Reg::Maxrlr);
        let mwl = self.regs.read(Reg::Maxwlr);
        Ok(CccInfo {
            dynamic_address: (devr & devr0::DAVAL != 0).then(|| own_address(devr)),
            max_write_length: (mwl & 0xFFFF) as u16,
            max_read_length: (mrl & maxrlr::MRL_MASK) as u16,
            ibi_payload_size: ((mrl & maxrlr::IBIP_MASK) >> maxrlr::IBIP_SHIFT) as u8,
            reset_action: ResetAction::from_bits(
                (devr & devr0::RSTACT_MASK) >> devr0::RSTACT_SHIFT,
            ),
            reset_pending: devr & devr0::RSTVAL != 0,
            activity_state: ((devr & devr0::AS_MASK) >> devr0::AS_SHIFT) as u8,
            ibi_allowed: devr & devr0::IBIEN != 0,
            controller_role_allowed: devr & devr0::CREN != 0,
            hot_join_allowed: devr & devr0::HJEN != 0,
        })
    }
}

pub(crate) fn own_address(devr0: u32) -> u8 {
    ((devr0 & devr0::DA_MASK) >> devr0::DA_SHIFT) as u8
}

fn received_address(rmr: u32) -> u8 {
    ((rmr & rmr::RADD_MASK) >> rmr::RADD_SHIFT) as u8
}
