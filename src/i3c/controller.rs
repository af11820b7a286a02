// Licensed under the Apache-2.0 license

//! Controller-role operations: private and CCC transfers, dynamic address
//! assignment and bus management.

use super::ccc::{self, DaaPayload};
use super::common::{DeviceConfig, Error, ErrorCode, I3cMode, I3cState, XferMode};
use super::descriptor::{build_ccc_frame, CccDescriptor, TransferOption, Xfer};
use super::driver::{I3c, XferContext, XferRoutine};
use super::registers::{cfgr, cr, devrx, ev, MessageType, Reg, RegisterAccess, DEVICE_TABLE_LEN};
use super::traits::I3cDma;
use crate::common::Logger;
use embedded_hal::delay::DelayNs;
use fugit::MillisDurationU32;

const RSTDAA_WORD: u32 = MessageType::Ccc.bits() | ((ccc::RSTDAA as u32) << cr::CCC_SHIFT);
const ENTDAA_WORD: u32 =
    MessageType::Ccc.bits() | ((ccc::ENTDAA as u32) << cr::CCC_SHIFT) | cr::MEND;

static ENTDAA_ONLY: [u32; 1] = [ENTDAA_WORD];
static RSTDAA_THEN_ENTDAA: [u32; 2] = [RSTDAA_WORD, ENTDAA_WORD];

/// Dynamic address assignment sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DaaOption {
    /// ENTDAA only; targets that already own an address keep it
    EntdaaOnly,
    /// RSTDAA, then ENTDAA
    RstdaaThenEntdaa,
}

impl DaaOption {
    fn control_words(self) -> &'static [u32] {
        match self {
            DaaOption::EntdaaOnly => &ENTDAA_ONLY,
            DaaOption::RstdaaThenEntdaa => &RSTDAA_THEN_ENTDAA,
        }
    }
}

/// Kind of device checked by [`I3c::is_device_ready`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    I3c,
    I2c,
}

/// Bus pattern emitted by [`I3c::generate_pattern`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pattern {
    TargetReset,
    HdrExit,
}

/// Start the DMA channels a frame needs and return the matching `CFGR`
/// request enables.
pub(crate) fn start_dma_channels(
    dma: &mut impl I3cDma,
    control: &[u32],
    tx: &[u8],
    rx: &mut [u8],
) -> Result<u32, Error> {
    let mut enable = 0;
    if !control.is_empty() {
        dma.start_control(control)?;
        enable |= cfgr::CDMAEN;
    }
    if !tx.is_empty() {
        dma.start_tx(tx)?;
        enable |= cfgr::TXDMAEN;
    }
    if !rx.is_empty() {
        dma.start_rx(rx)?;
        enable |= cfgr::RXDMAEN;
    }
    Ok(enable)
}

impl<'a, R: RegisterAccess, D: DelayNs, L: Logger> I3c<'a, R, D, L> {
    pub fn transmit_blocking(
        &mut self,
        xfer: Xfer<'_>,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.ctrl_blocking(XferRoutine::CtrlTx, xfer, timeout)
    }

    pub fn transmit_it(&mut self, xfer: Xfer<'a>) -> Result<(), Error> {
        self.ctrl_it(XferRoutine::CtrlTx, xfer)
    }

    pub fn transmit_dma(&mut self, xfer: Xfer<'a>, dma: &mut impl I3cDma) -> Result<(), Error> {
        self.ctrl_dma(XferRoutine::CtrlTx, xfer, dma)
    }

    pub fn receive_blocking(
        &mut self,
        xfer: Xfer<'_>,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.ctrl_blocking(XferRoutine::CtrlRx, xfer, timeout)
    }

    pub fn receive_it(&mut self, xfer: Xfer<'a>) -> Result<(), Error> {
        self.ctrl_it(XferRoutine::CtrlRx, xfer)
    }

    pub fn receive_dma(&mut self, xfer: Xfer<'a>, dma: &mut impl I3cDma) -> Result<(), Error> {
        self.ctrl_dma(XferRoutine::CtrlRx, xfer, dma)
    }

    /// Frame mixing writes and reads, e.g. write-then-read with RESTART.
    pub fn multiple_transfer_blocking(
        &mut self,
        xfer: Xfer<'_>,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.ctrl_blocking(XferRoutine::CtrlMultiple, xfer, timeout)
    }

    pub fn multiple_transfer_it(&mut self, xfer: Xfer<'a>) -> Result<(), Error> {
        self.ctrl_it(XferRoutine::CtrlMultiple, xfer)
    }

    pub fn multiple_transfer_dma(
        &mut self,
        xfer: Xfer<'a>,
        dma: &mut impl I3cDma,
    ) -> Result<(), Error> {
        self.ctrl_dma(XferRoutine::CtrlMultiple, xfer, dma)
    }

    /// Build and send a CCC write frame using the scratch buffers.
    pub fn transmit_ccc_blocking(
        &mut self,
        descriptors: &[CccDescriptor<'_>],
        option: TransferOption,
        control: &mut [u32],
        tx: &mut [u8],
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        let frame = build_ccc_frame(descriptors, option, control, tx)?;
        let xfer = Xfer::new(&frame, control, tx, &mut [])?;
        self.transmit_blocking(xfer, timeout)
    }

    pub fn transmit_ccc_it(
        &mut self,
        descriptors: &[CccDescriptor<'_>],
        option: TransferOption,
        control: &'a mut [u32],
        tx: &'a mut [u8],
    ) -> Result<(), Error> {
        let frame = build_ccc_frame(descriptors, option, control, tx)?;
        let xfer = Xfer::new(&frame, control, tx, &mut [])?;
        self.transmit_it(xfer)
    }

    /// Build and run a CCC frame containing GET commands. Read data lands
    /// in `rx`, in descriptor order.
    pub fn receive_ccc_blocking(
        &mut self,
        descriptors: &[CccDescriptor<'_>],
        option: TransferOption,
        control: &mut [u32],
        tx: &mut [u8],
        rx: &mut [u8],
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        let frame = build_ccc_frame(descriptors, option, control, tx)?;
        let xfer = Xfer::new(&frame, control, tx, rx)?;
        self.receive_blocking(xfer, timeout)
    }

    pub fn receive_ccc_it(
        &mut self,
        descriptors: &[CccDescriptor<'_>],
        option: TransferOption,
        control: &'a mut [u32],
        tx: &'a mut [u8],
        rx: &'a mut [u8],
    ) -> Result<(), Error> {
        let frame = build_ccc_frame(descriptors, option, control, tx)?;
        let xfer = Xfer::new(&frame, control, tx, rx)?;
        self.receive_it(xfer)
    }

    /// Run ENTDAA to completion. `allocator` is called once per target that
    /// takes part and returns the address to give it.
    ///
    /// Returns the number of targets addressed.
    pub fn assign_dynamic_addresses(
        &mut self,
        option: DaaOption,
        mut allocator: impl FnMut(&DaaPayload) -> u8,
        timeout: MillisDurationU32,
    ) -> Result<usize, Error> {
        self.begin_daa()?;
        let mut ctx = XferContext::new(
            XferRoutine::CtrlDaa,
            XferMode::Polling,
            option.control_words(),
            &[],
            &mut [],
        );
        self.run_blocking(&mut ctx, timeout, |i3c| {
            let payload = i3c.pending_daa.ok_or(Error::InvalidParam)?;
            let address = allocator(&payload);
            i3c.write_dynamic_address(address)
        })?;
        Ok(self.xfer_count)
    }

    /// Start ENTDAA. Each target raises
    /// [`I3cEvent::DynamicAddressRequest`](super::I3cEvent::DynamicAddressRequest),
    /// answered with [`I3c::set_dynamic_address`].
    pub fn start_daa_it(&mut self, option: DaaOption) -> Result<(), Error> {
        self.begin_daa()?;
        let ctx = XferContext::new(
            XferRoutine::CtrlDaa,
            XferMode::Interrupt,
            option.control_words(),
            &[],
            &mut [],
        );
        self.launch(ctx, ev::CFNF | ev::TXFNF | ev::FC);
        Ok(())
    }

    /// Give the target currently in arbitration its dynamic address.
    pub fn set_dynamic_address(&mut self, address: u8) -> Result<(), Error> {
        if self.state != I3cState::Daa || self.pending_daa.is_none() {
            return Err(Error::NotAllowed);
        }
        self.write_dynamic_address(address)?;
        self.arm(ev::TXFNF);
        Ok(())
    }

    /// Program device table entries, slots 1..=4.
    pub fn configure_bus_devices(&mut self, devices: &[DeviceConfig]) -> Result<(), Error> {
        if self.mode != I3cMode::Controller {
            return Err(Error::NotAllowed);
        }
        for dev in devices {
            if dev.index == 0 || dev.index > DEVICE_TABLE_LEN {
                return Err(Error::InvalidParam);
            }
            if !ccc::is_valid_dynamic_address(dev.dynamic_address) {
                return Err(Error::InvalidParam);
            }
        }
        for dev in devices {
            let mut value = u32::from(dev.dynamic_address) << devrx::DA_SHIFT;
            for (on, bit) in [
                (dev.ibi_ack, devrx::IBIACK),
                (dev.ibi_payload, devrx::IBIDEN),
                (dev.controller_role_ack, devrx::CRACK),
                (dev.stop_after_ibi, devrx::SUSP),
            ] {
                if on {
                    value |= bit;
                }
            }
            self.regs.write(Reg::Devr(dev.index), value);
        }
        Ok(())
    }

    pub fn set_own_dynamic_address(&mut self, address: u8) -> Result<(), Error> {
        if self.mode != I3cMode::Controller {
            return Err(Error::NotAllowed);
        }
        if !ccc::is_valid_dynamic_address(address) {
            return Err(Error::InvalidParam);
        }
        self.write_own_address(address);
        Ok(())
    }

    /// Acknowledge or NACK hot-join requests.
    pub fn set_hot_join_ack(&mut self, enabled: bool) -> Result<(), Error> {
        if self.mode != I3cMode::Controller {
            return Err(Error::NotAllowed);
        }
        if enabled {
            self.regs.set_bits(Reg::Cfgr, cfgr::HJACK);
        } else {
            self.regs.clear_bits(Reg::Cfgr, cfgr::HJACK);
        }
        Ok(())
    }

    /// Address the device with an empty write until it acknowledges.
    pub fn is_device_ready(
        &mut self,
        address: u8,
        kind: DeviceKind,
        trials: u32,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        if trials == 0 || address > 0x7F {
            return Err(Error::InvalidParam);
        }
        let mtype = match kind {
            DeviceKind::I3c => MessageType::Private,
            DeviceKind::I2c => MessageType::LegacyI2c,
        };
        let words = [mtype.bits() | (u32::from(address) << cr::ADD_SHIFT) | cr::MEND];

        for trial in 0..trials {
            self.check_ready(I3cMode::Controller)?;
            self.state = I3cState::Tx;
            let mut ctx =
                XferContext::new(XferRoutine::CtrlTx, XferMode::Polling, &words, &[], &mut []);
            match self.run_blocking(&mut ctx, timeout, |_| Ok(())) {
                Ok(()) => return Ok(()),
                Err(Error::Hardware(code)) if code.contains(ErrorCode::ADDRESS_NACK) => {
                    self.logger.debug(format_args!(
                        "i3c: {:#04x} not ready, trial {}",
                        address, trial
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Hardware(ErrorCode::ADDRESS_NACK))
    }

    /// Emit an arbitration header alone, then STOP.
    pub fn generate_arbitration(&mut self, timeout: MillisDurationU32) -> Result<(), Error> {
        self.check_ready(I3cMode::Controller)?;
        self.regs.clear_bits(Reg::Cfgr, cfgr::NOARBH);
        self.run_header(timeout)
    }

    /// Emit a target reset or HDR exit pattern before the next STOP.
    pub fn generate_pattern(
        &mut self,
        pattern: Pattern,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.check_ready(I3cMode::Controller)?;
        let bit = match pattern {
            Pattern::TargetReset => cfgr::RSTPTRN,
            Pattern::HdrExit => cfgr::EXITPTRN,
        };
        self.regs.set_bits(Reg::Cfgr, bit);
        let result = self.run_header(timeout);
        self.regs.clear_bits(Reg::Cfgr, bit);
        result
    }

    fn run_header(&mut self, timeout: MillisDurationU32) -> Result<(), Error> {
        let words = [MessageType::Header.bits() | cr::MEND];
        self.state = I3cState::Tx;
        let mut ctx =
            XferContext::new(XferRoutine::CtrlTx, XferMode::Polling, &words, &[], &mut []);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))
    }

    fn begin_daa(&mut self) -> Result<(), Error> {
        self.check_ready(I3cMode::Controller)?;
        self.regs.clear_bits(Reg::Cfgr, cfgr::NOARBH);
        self.pending_daa = None;
        self.xfer_count = 0;
        self.state = I3cState::Daa;
        Ok(())
    }

    fn write_dynamic_address(&mut self, address: u8) -> Result<(), Error> {
        if !ccc::is_valid_dynamic_address(address) {
            return Err(Error::InvalidParam);
        }
        if let Some(payload) = self.pending_daa.take() {
            self.logger.info(format_args!(
                "i3c: pid {:#014x} -> {:#04x}",
                payload.pid(),
                address
            ));
        }
        self.regs.write(Reg::Tdr, u32::from(address));
        self.xfer_count += 1;
        Ok(())
    }

    /// Validate a frame for `routine` and prepare the peripheral.
    fn prepare(&mut self, routine: XferRoutine, xfer: &Xfer<'_>) -> Result<I3cState, Error> {
        self.check_ready(I3cMode::Controller)?;
        if xfer.control.is_empty() {
            return Err(Error::InvalidParam);
        }
        let state = match routine {
            XferRoutine::CtrlTx if xfer.rx.is_empty() => I3cState::Tx,
            XferRoutine::CtrlRx if !xfer.rx.is_empty() => I3cState::Rx,
            XferRoutine::CtrlMultiple => I3cState::TxRx,
            _ => return Err(Error::InvalidParam),
        };
        self.regs.modify(Reg::Cfgr, |v| {
            if xfer.no_arbitration_header {
                v | cfgr::NOARBH
            } else {
                v & !cfgr::NOARBH
            }
        });
        Ok(state)
    }

    fn ctrl_blocking(
        &mut self,
        routine: XferRoutine,
        xfer: Xfer<'_>,
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        let state = self.prepare(routine, &xfer)?;
        self.state = state;
        let mut ctx = XferContext::new(routine, XferMode::Polling, xfer.control, xfer.tx, xfer.rx);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))
    }

    fn ctrl_it(&mut self, routine: XferRoutine, xfer: Xfer<'a>) -> Result<(), Error> {
        let state = self.prepare(routine, &xfer)?;
        let ctx = XferContext::new(
            routine,
            XferMode::Interrupt,
            xfer.control,
            xfer.tx,
            xfer.rx,
        );
        let mut irqs = ev::CFNF | ev::FC;
        if !ctx.tx.is_empty() {
            irqs |= ev::TXFNF;
        }
        if !ctx.rx.is_empty() {
            irqs |= ev::RXFNE;
        }
        if !ctx.stop {
            irqs |= ev::CFE;
        }
        self.state = state;
        self.launch(ctx, irqs);
        Ok(())
    }

    fn ctrl_dma(
        &mut self,
        routine: XferRoutine,
        xfer: Xfer<'a>,
        dma: &mut impl I3cDma,
    ) -> Result<(), Error> {
        let state = self.prepare(routine, &xfer)?;
        let Xfer { control, tx, rx, .. } = xfer;
        // Completion is only signalled by FC.
        if control.last().is_some_and(|w| w & cr::MEND == 0) {
            return Err(Error::InvalidParam);
        }
        let enable = match start_dma_channels(dma, control, tx, rx) {
            Ok(enable) => enable,
            Err(e) => {
                dma.stop();
                self.last_error |= ErrorCode::DMA;
                self.logger.error(format_args!("i3c: dma start failed"));
                return Err(e);
            }
        };
        self.regs.set_bits(Reg::Cfgr, enable);
        let ctx = XferContext::new(routine, XferMode::Dma, control, tx, rx);
        self.state = state;
        self.launch(ctx, ev::FC);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i3c::common::{FifoConfig, FifoThreshold, I3cEvent};
    use crate::i3c::descriptor::{Frame, MessageKind, Termination};
    use crate::i3c::mock::controller;
    use crate::i3c::registers::ser;
    use crate::i3c::traits::mock::MockDma;
    use fugit::ExtU32;
    use hex_literal::hex;

    const PRIVATE_WRITE: u32 = (0x2 << 27) | (0x30 << 17) | cr::MEND;

    fn frame(control_len: usize, tx_len: usize, rx_len: usize) -> Frame {
        Frame {
            control_len,
            tx_len,
            rx_len,
            no_arbitration_header: false,
        }
    }

    #[test]
    fn blocking_write_moves_words_and_bytes() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        let control = [PRIVATE_WRITE | 3];
        let xfer = Xfer::new(&frame(1, 3, 0), &control, &[1, 2, 3], &mut []).unwrap();

        i3c.transmit_blocking(xfer, 1.millis()).unwrap();

        let regs = i3c.regs_mut();
        assert_eq!(regs.control, [PRIVATE_WRITE | 3]);
        assert_eq!(regs.tx, [1, 2, 3]);
        assert!(regs.cleared.contains(&ev::FC));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert_eq!(i3c.xfer_count(), 3);
    }

    #[test]
    fn blocking_read_fills_buffer() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&[0xA0, 0xA1]);
        i3c.regs_mut().raise(ev::FC);
        let control = [(0x2 << 27) | (0x30 << 17) | cr::RNW | 2 | cr::MEND];
        let mut rx = [0u8; 2];
        let xfer = Xfer::new(&frame(1, 0, 2), &control, &[], &mut rx).unwrap();

        i3c.receive_blocking(xfer, 1.millis()).unwrap();
        assert_eq!(rx, [0xA0, 0xA1]);
        assert_eq!(i3c.xfer_count(), 2);
    }

    #[test]
    fn word_thresholds_use_word_registers() {
        let mut i3c = controller();
        i3c.configure_fifo(&FifoConfig {
            rx_threshold: FifoThreshold::Word,
            tx_threshold: FifoThreshold::Word,
            ..FifoConfig::default()
        })
        .unwrap();
        i3c.regs_mut().feed_rx(&[1, 2, 3, 4, 5, 6]);
        i3c.regs_mut().raise(ev::FC);
        let control = [0x2 << 27 | 5, 0x2 << 27 | cr::RNW | 6 | cr::MEND];
        let mut rx = [0u8; 6];
        let xfer = Xfer::new(
            &frame(2, 5, 6),
            &control,
            &[0x10, 0x11, 0x12, 0x13, 0x14],
            &mut rx,
        )
        .unwrap();

        i3c.multiple_transfer_blocking(xfer, 1.millis()).unwrap();
        assert_eq!(rx, [1, 2, 3, 4, 5, 6]);
        assert_eq!(i3c.regs_mut().tx, [0x10, 0x11, 0x12, 0x13, 0x14]);
        assert_eq!(i3c.xfer_count(), 11);
    }

    #[test]
    fn restart_frame_completes_without_frame_complete() {
        let mut i3c = controller();
        let control = [PRIVATE_WRITE & !cr::MEND | 1];
        let xfer = Xfer::new(&frame(1, 1, 0), &control, &[0x55], &mut []).unwrap();
        i3c.transmit_blocking(xfer, 1.millis()).unwrap();
        assert_eq!(i3c.regs_mut().tx, [0x55]);
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn address_nack_fails_transfer_and_flushes() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&[0xFF]);
        i3c.regs_mut().set(Reg::Ser, ser::ANACK);
        i3c.regs_mut().raise(ev::ERR);
        let control = [PRIVATE_WRITE | 1];
        let xfer = Xfer::new(&frame(1, 1, 0), &control, &[0x01], &mut []).unwrap();

        let err = i3c.transmit_blocking(xfer, 1.millis()).unwrap_err();
        assert_eq!(err, Error::Hardware(ErrorCode::ADDRESS_NACK));
        assert!(i3c.last_error().contains(ErrorCode::ADDRESS_NACK));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert!(i3c.regs_mut().rx.is_empty());
        assert!(i3c.regs_mut().cleared.contains(&ev::ERR));
    }

    #[test]
    fn missing_frame_complete_times_out() {
        let mut i3c = controller();
        let control = [PRIVATE_WRITE];
        let xfer = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        assert_eq!(i3c.transmit_blocking(xfer, 1.millis()), Err(Error::Timeout));
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn direction_mismatch_is_rejected() {
        let mut i3c = controller();
        let control = [PRIVATE_WRITE];
        let xfer = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        assert_eq!(i3c.receive_blocking(xfer, 1.millis()), Err(Error::InvalidParam));
    }

    #[test]
    fn interrupt_transfer_rearms_until_frame_complete() {
        let control = [PRIVATE_WRITE | 2];
        let tx = [0xCA, 0xFE];
        let mut i3c = controller();
        i3c.regs_mut().control_full = true;

        let xfer = Xfer::new(&frame(1, 2, 0), &control, &tx, &mut []).unwrap();
        i3c.transmit_it(xfer).unwrap();
        assert_eq!(i3c.state(), I3cState::Tx);
        assert_eq!(
            i3c.regs_mut().get(Reg::Ier),
            ev::CFNF | ev::TXFNF | ev::FC | ev::ERR
        );

        // A second request while busy is refused.
        let again = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        assert_eq!(i3c.transmit_blocking(again, 1.millis()), Err(Error::Busy));

        // TX FIFO has room, control FIFO does not.
        i3c.handle_interrupt();
        assert_eq!(i3c.regs_mut().tx, [0xCA, 0xFE]);
        assert!(i3c.regs_mut().control.is_empty());
        assert_eq!(i3c.regs_mut().get(Reg::Ier), ev::CFNF | ev::FC | ev::ERR);

        i3c.regs_mut().control_full = false;
        i3c.handle_interrupt();
        assert_eq!(i3c.regs_mut().control, [PRIVATE_WRITE | 2]);
        assert_eq!(i3c.regs_mut().get(Reg::Ier), ev::FC | ev::ERR);
        assert_eq!(i3c.poll_event(), None);

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlTxComplete));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert_eq!(i3c.regs_mut().get(Reg::Ier), 0);
    }

    #[test]
    fn poll_transfer_reports_completion_once() {
        let control = [(0x2 << 27) | (0x30 << 17) | cr::RNW | 1 | cr::MEND];
        let mut rx = [0u8; 1];
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 0, 1), &control, &[], &mut rx).unwrap();
        i3c.receive_it(xfer).unwrap();

        assert_eq!(i3c.poll_transfer(), Err(nb::Error::WouldBlock));
        i3c.regs_mut().feed_rx(&[0x42]);
        i3c.regs_mut().raise(ev::FC);
        assert_eq!(i3c.poll_transfer(), Ok(()));
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlRxComplete));
        drop(i3c);
        assert_eq!(rx, [0x42]);
    }

    #[test]
    fn interrupt_error_queues_event() {
        let control = [PRIVATE_WRITE];
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        i3c.transmit_it(xfer).unwrap();
        i3c.regs_mut().set(Reg::Ser, ser::DNACK);
        i3c.regs_mut().raise(ev::ERR);
        i3c.handle_interrupt();

        assert_eq!(i3c.poll_event(), Some(I3cEvent::Error(ErrorCode::DATA_NACK)));
        assert_eq!(
            i3c.poll_transfer(),
            Err(nb::Error::Other(Error::Hardware(ErrorCode::DATA_NACK)))
        );
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn dma_transfer_completes_on_frame_complete() {
        let control = [PRIVATE_WRITE | 4];
        let tx = [1, 2, 3, 4];
        let mut dma = MockDma::default();
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 4, 0), &control, &tx, &mut []).unwrap();
        i3c.transmit_dma(xfer, &mut dma).unwrap();

        assert_eq!(dma.control, [PRIVATE_WRITE | 4]);
        assert_eq!(dma.tx, [1, 2, 3, 4]);
        let cfg = i3c.regs_mut().get(Reg::Cfgr);
        assert_eq!(cfg & cfgr::ALL_DMA, cfgr::CDMAEN | cfgr::TXDMAEN);
        assert_eq!(i3c.regs_mut().get(Reg::Ier), ev::FC | ev::ERR);

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlTxComplete));
        assert_eq!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::ALL_DMA, 0);
        assert_eq!(i3c.xfer_count(), 4);
        // Data went through DMA, not the FIFO registers.
        assert!(i3c.regs_mut().tx.is_empty());
    }

    #[test]
    fn dma_start_failure_stops_channels() {
        let control = [(0x2 << 27) | cr::RNW | 2 | cr::MEND];
        let mut rx = [0u8; 2];
        let mut dma = MockDma {
            fail_rx: true,
            ..MockDma::default()
        };
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 0, 2), &control, &[], &mut rx).unwrap();
        assert_eq!(i3c.receive_dma(xfer, &mut dma), Err(Error::Dma));
        assert!(dma.stopped);
        assert!(i3c.last_error().contains(ErrorCode::DMA));
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn dma_channel_error_ends_transfer() {
        let control = [PRIVATE_WRITE | 1];
        let tx = [7];
        let mut dma = MockDma::default();
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 1, 0), &control, &tx, &mut []).unwrap();
        i3c.transmit_dma(xfer, &mut dma).unwrap();
        i3c.dma_error();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::Error(ErrorCode::DMA)));
        assert_eq!(i3c.poll_transfer(), Err(nb::Error::Other(Error::Dma)));
        assert_eq!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::ALL_DMA, 0);
    }

    #[test]
    fn broadcast_ccc_is_built_and_sent() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        let mut control = [0u32; 2];
        let mut tx = [0u8; 2];
        i3c.transmit_ccc_blocking(
            &[CccDescriptor::broadcast(ccc::DISEC_BROADCAST, &[ccc::events::HJ])],
            TransferOption::new(MessageKind::BroadcastCcc, Termination::Stop),
            &mut control,
            &mut tx,
            1.millis(),
        )
        .unwrap();
        assert_eq!(
            i3c.regs_mut().control,
            [(0x6 << 27) | (0x01 << 16) | 1 | cr::MEND]
        );
        assert_eq!(i3c.regs_mut().tx, [ccc::events::HJ]);
    }

    #[test]
    fn getpid_reads_provisioned_id() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 01"));
        i3c.regs_mut().raise(ev::FC);
        let mut control = [0u32; 2];
        let mut tx = [0u8; 1];
        let mut pid = [0u8; 6];
        i3c.receive_ccc_blocking(
            &[CccDescriptor::direct_get(0x30, ccc::GETPID, 6)],
            TransferOption::new(MessageKind::DirectCcc, Termination::Stop),
            &mut control,
            &mut tx,
            &mut pid,
            1.millis(),
        )
        .unwrap();
        assert_eq!(pid, hex!("04 6A 00 00 00 01"));
        assert_eq!(i3c.regs_mut().control.len(), 2);
    }

    #[test]
    fn interrupt_broadcast_ccc_completes() {
        let mut control = [0u32; 2];
        let mut tx = [0u8; 2];
        let mut i3c = controller();
        i3c.transmit_ccc_it(
            &[CccDescriptor::broadcast(ccc::ENEC_BROADCAST, &[ccc::events::INT])],
            TransferOption::new(MessageKind::BroadcastCcc, Termination::Stop),
            &mut control,
            &mut tx,
        )
        .unwrap();
        assert_eq!(i3c.state(), I3cState::Tx);
        assert_eq!(
            i3c.regs_mut().get(Reg::Ier),
            ev::CFNF | ev::TXFNF | ev::FC | ev::ERR
        );

        i3c.handle_interrupt();
        // ENEC is code 0x00, so only the message type and count remain.
        assert_eq!(i3c.regs_mut().control, [(0x6 << 27) | 1 | cr::MEND]);
        assert_eq!(i3c.regs_mut().tx, [ccc::events::INT]);
        assert_eq!(i3c.poll_event(), None);

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlTxComplete));
        assert_eq!(i3c.xfer_count(), 1);
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn interrupt_getpid_fills_buffer() {
        let mut control = [0u32; 2];
        let mut tx = [0u8; 1];
        let mut pid = [0u8; 6];
        let mut i3c = controller();
        i3c.receive_ccc_it(
            &[CccDescriptor::direct_get(0x30, ccc::GETPID, 6)],
            TransferOption::new(MessageKind::DirectCcc, Termination::Stop),
            &mut control,
            &mut tx,
            &mut pid,
        )
        .unwrap();
        assert_eq!(i3c.state(), I3cState::Rx);
        assert_eq!(i3c.poll_transfer(), Err(nb::Error::WouldBlock));

        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 02"));
        i3c.regs_mut().raise(ev::FC);
        assert_eq!(i3c.poll_transfer(), Ok(()));
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlRxComplete));
        assert_eq!(i3c.regs_mut().control.len(), 2);
        drop(i3c);
        assert_eq!(pid, hex!("04 6A 00 00 00 02"));
    }

    #[test]
    fn interrupt_write_then_read() {
        let control = [
            (0x2 << 27) | (0x30 << 17) | 1,
            (0x2 << 27) | (0x30 << 17) | cr::RNW | 2 | cr::MEND,
        ];
        let tx = [0x10];
        let mut rx = [0u8; 2];
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(2, 1, 2), &control, &tx, &mut rx).unwrap();
        i3c.multiple_transfer_it(xfer).unwrap();
        assert_eq!(i3c.state(), I3cState::TxRx);
        assert_eq!(
            i3c.regs_mut().get(Reg::Ier),
            ev::CFNF | ev::TXFNF | ev::RXFNE | ev::FC | ev::ERR
        );

        i3c.regs_mut().feed_rx(&[0x5A, 0xA5]);
        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlMultipleXferComplete));
        assert_eq!(i3c.regs_mut().control, control);
        assert_eq!(i3c.regs_mut().tx, [0x10]);
        assert_eq!(i3c.xfer_count(), 3);
        drop(i3c);
        assert_eq!(rx, [0x5A, 0xA5]);
    }

    #[test]
    fn dma_write_then_read_uses_all_channels() {
        let control = [
            (0x2 << 27) | (0x30 << 17) | 1,
            (0x2 << 27) | (0x30 << 17) | cr::RNW | 2 | cr::MEND,
        ];
        let tx = [0x10];
        let mut rx = [0u8; 2];
        let mut dma = MockDma::default();
        let mut i3c = controller();

        // Without a closing STOP nothing would signal the end.
        let open = [control[0]];
        let restart = Xfer::new(&frame(1, 1, 0), &open, &tx, &mut []).unwrap();
        assert_eq!(
            i3c.multiple_transfer_dma(restart, &mut dma),
            Err(Error::InvalidParam)
        );

        let xfer = Xfer::new(&frame(2, 1, 2), &control, &tx, &mut rx).unwrap();
        i3c.multiple_transfer_dma(xfer, &mut dma).unwrap();
        assert_eq!(dma.control, control);
        assert_eq!(dma.tx, [0x10]);
        assert_eq!(dma.rx_len, 2);
        assert_eq!(
            i3c.regs_mut().get(Reg::Cfgr) & cfgr::ALL_DMA,
            cfgr::CDMAEN | cfgr::TXDMAEN | cfgr::RXDMAEN
        );

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::CtrlMultipleXferComplete));
        assert_eq!(i3c.xfer_count(), 3);
        assert_eq!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::ALL_DMA, 0);
        assert!(i3c.regs_mut().control.is_empty());
    }

    #[test]
    fn blocking_daa_assigns_each_target() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 01 47 C6"));
        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 02 06 C6"));
        i3c.regs_mut().raise(ev::FC);

        let mut seen = Vec::new();
        let mut next = 0x30;
        let count = i3c
            .assign_dynamic_addresses(
                DaaOption::RstdaaThenEntdaa,
                |payload| {
                    seen.push(payload.pid());
                    next += 1;
                    next - 1
                },
                1.millis(),
            )
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(seen, [0x046A_0000_0001, 0x046A_0000_0002]);
        let regs = i3c.regs_mut();
        assert_eq!(regs.tx, [0x30, 0x31]);
        assert_eq!(regs.control, [RSTDAA_WORD, ENTDAA_WORD]);
        assert_eq!(i3c.state(), I3cState::Idle);
    }

    #[test]
    fn blocking_daa_rejects_reserved_address() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 01 47 C6"));
        let result = i3c.assign_dynamic_addresses(DaaOption::EntdaaOnly, |_| 0x7E, 1.millis());
        assert_eq!(result, Err(Error::InvalidParam));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert!(i3c.regs_mut().tx.is_empty());
    }

    #[test]
    fn interrupt_daa_waits_for_address() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&hex!("04 6A 00 00 00 01 47 C6"));
        i3c.start_daa_it(DaaOption::EntdaaOnly).unwrap();
        assert_eq!(i3c.state(), I3cState::Daa);

        i3c.handle_interrupt();
        let payload = match i3c.poll_event() {
            Some(I3cEvent::DynamicAddressRequest(p)) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(payload.dcr(), 0xC6);
        assert_eq!(i3c.regs_mut().control, [ENTDAA_WORD]);

        assert_eq!(i3c.set_dynamic_address(0x7E), Err(Error::InvalidParam));
        i3c.set_dynamic_address(0x32).unwrap();
        assert_eq!(i3c.set_dynamic_address(0x33), Err(Error::NotAllowed));
        assert_eq!(i3c.regs_mut().tx, [0x32]);

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::DaaComplete));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert_eq!(i3c.xfer_count(), 1);
    }

    #[test]
    fn device_table_entries() {
        let mut i3c = controller();
        let dev = DeviceConfig {
            index: 2,
            dynamic_address: 0x31,
            ibi_ack: true,
            ibi_payload: true,
            controller_role_ack: false,
            stop_after_ibi: false,
        };
        i3c.configure_bus_devices(&[dev]).unwrap();
        assert_eq!(
            i3c.regs_mut().get(Reg::Devr(2)),
            (0x31 << 1) | devrx::IBIACK | devrx::IBIDEN
        );

        let bad = DeviceConfig { index: 5, ..dev };
        assert_eq!(i3c.configure_bus_devices(&[bad]), Err(Error::InvalidParam));
        assert_eq!(i3c.set_own_dynamic_address(0x7C), Err(Error::InvalidParam));
        i3c.set_own_dynamic_address(0x08).unwrap();
        assert_eq!(i3c.regs_mut().get(Reg::Devr0), (0x08 << 1) | 1);
    }

    #[test]
    fn device_ready_retries_until_ack() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        i3c.is_device_ready(0x50, DeviceKind::I2c, 3, 1.millis())
            .unwrap();
        assert_eq!(
            i3c.regs_mut().control,
            [(0x3 << 27) | (0x50 << 17) | cr::MEND]
        );

        i3c.regs_mut().set(Reg::Ser, ser::ANACK);
        i3c.regs_mut().raise(ev::ERR);
        assert_eq!(
            i3c.is_device_ready(0x51, DeviceKind::I3c, 1, 1.millis()),
            Err(Error::Hardware(ErrorCode::ADDRESS_NACK))
        );
        assert_eq!(
            i3c.is_device_ready(0x51, DeviceKind::I3c, 0, 1.millis()),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn target_reset_pattern_is_cleared_afterwards() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        i3c.generate_pattern(Pattern::TargetReset, 1.millis()).unwrap();
        assert_eq!(i3c.regs_mut().control, [(0x1 << 27) | cr::MEND]);
        assert_eq!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::RSTPTRN, 0);

        i3c.regs_mut().raise(ev::FC);
        i3c.generate_arbitration(1.millis()).unwrap();
        assert_eq!(i3c.regs_mut().control.len(), 2);
    }

    #[test]
    fn hot_join_ack_toggles() {
        let mut i3c = controller();
        i3c.set_hot_join_ack(true).unwrap();
        assert_ne!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::HJACK, 0);
        i3c.set_hot_join_ack(false).unwrap();
        assert_eq!(i3c.regs_mut().get(Reg::Cfgr) & cfgr::HJACK, 0);
    }

    #[test]
    fn abort_waits_for_frame_complete() {
        let control = [PRIVATE_WRITE];
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        i3c.transmit_it(xfer).unwrap();

        i3c.abort_it().unwrap();
        assert_eq!(i3c.state(), I3cState::Abort);
        assert_eq!(i3c.regs_mut().get(Reg::Ier), ev::FC | ev::ERR);
        i3c.handle_interrupt();
        assert_eq!(i3c.state(), I3cState::Abort);

        i3c.regs_mut().raise(ev::FC);
        i3c.handle_interrupt();
        assert_eq!(i3c.poll_event(), Some(I3cEvent::AbortComplete));
        assert_eq!(i3c.state(), I3cState::Idle);
        assert_eq!(i3c.abort_it(), Err(Error::InvalidParam));
    }

    #[test]
    fn blocking_abort_consumes_its_event() {
        let control = [PRIVATE_WRITE];
        let mut i3c = controller();
        let xfer = Xfer::new(&frame(1, 0, 0), &control, &[], &mut []).unwrap();
        i3c.transmit_it(xfer).unwrap();
        i3c.regs_mut().raise(ev::FC);
        i3c.abort(1.millis()).unwrap();
        assert_eq!(i3c.poll_event(), None);
        assert_eq!(i3c.state(), I3cState::Idle);
    }
}
