// Licensed under the Apache-2.0 license

//! Target-role operations: private data phases and the requests a target
//! may raise on the bus (IBI, hot-join, controller role).

use super::common::{Error, ErrorCode, I3cMode, I3cState, XferMode};
use super::controller::start_dma_channels;
use super::driver::{own_address, I3c, XferContext, XferRoutine};
use super::registers::{devr0, ev, maxrlr, tgttdr, MessageType, Reg, RegisterAccess};
use super::traits::I3cDma;
use crate::common::Logger;
use embedded_hal::delay::DelayNs;
use fugit::MillisDurationU32;

/// Largest IBI payload the peripheral can carry.
pub const MAX_IBI_PAYLOAD: usize = 4;

impl<'a, R: RegisterAccess, D: DelayNs, L: Logger> I3c<'a, R, D, L> {
    /// Answer a private read from the controller with `data`.
    pub fn target_transmit_blocking(
        &mut self,
        data: &[u8],
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.prepare_target_tx(data.len())?;
        let mut ctx = XferContext::new(XferRoutine::TgtTx, XferMode::Polling, &[], data, &mut []);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))
    }

    pub fn target_transmit_it(&mut self, data: &'a [u8]) -> Result<(), Error> {
        self.prepare_target_tx(data.len())?;
        let ctx = XferContext::new(XferRoutine::TgtTx, XferMode::Interrupt, &[], data, &mut []);
        self.launch(ctx, ev::TXFNF | ev::FC);
        Ok(())
    }

    pub fn target_transmit_dma(
        &mut self,
        data: &'a [u8],
        dma: &mut impl I3cDma,
    ) -> Result<(), Error> {
        self.prepare_target_tx(data.len())?;
        self.start_target_dma(dma, data, &mut [])?;
        let ctx = XferContext::new(XferRoutine::TgtTx, XferMode::Dma, &[], data, &mut []);
        self.launch(ctx, ev::FC);
        Ok(())
    }

    /// Accept a private write from the controller into `buffer`.
    pub fn target_receive_blocking(
        &mut self,
        buffer: &mut [u8],
        timeout: MillisDurationU32,
    ) -> Result<(), Error> {
        self.prepare_target_rx(buffer.len())?;
        let mut ctx = XferContext::new(XferRoutine::TgtRx, XferMode::Polling, &[], &[], buffer);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))
    }

    pub fn target_receive_it(&mut self, buffer: &'a mut [u8]) -> Result<(), Error> {
        self.prepare_target_rx(buffer.len())?;
        let ctx = XferContext::new(XferRoutine::TgtRx, XferMode::Interrupt, &[], &[], buffer);
        self.launch(ctx, ev::RXFNE | ev::FC);
        Ok(())
    }

    pub fn target_receive_dma(
        &mut self,
        buffer: &'a mut [u8],
        dma: &mut impl I3cDma,
    ) -> Result<(), Error> {
        self.prepare_target_rx(buffer.len())?;
        self.start_target_dma(dma, &[], buffer)?;
        let ctx = XferContext::new(XferRoutine::TgtRx, XferMode::Dma, &[], &[], buffer);
        self.launch(ctx, ev::FC);
        Ok(())
    }

    /// Raise an in-band interrupt carrying up to four payload bytes.
    ///
    /// Fails with `Error::NotAllowed` while the controller keeps IBIs
    /// disabled (DISEC).
    pub fn ibi_request(&mut self, payload: &[u8], timeout: MillisDurationU32) -> Result<(), Error> {
        self.start_ibi(payload)?;
        let mut ctx = XferContext::request(XferRoutine::TgtIbi, XferMode::Polling);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))
    }

    pub fn ibi_request_it(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.start_ibi(payload)?;
        self.launch(
            XferContext::request(XferRoutine::TgtIbi, XferMode::Interrupt),
            ev::IBIEND,
        );
        Ok(())
    }

    /// Ask to join the bus; returns the dynamic address assigned by the
    /// controller.
    pub fn hot_join_request(&mut self, timeout: MillisDurationU32) -> Result<u8, Error> {
        self.start_request(devr0::HJEN, false, MessageType::HotJoin)?;
        let mut ctx = XferContext::request(XferRoutine::TgtHotJoin, XferMode::Polling);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))?;
        Ok(own_address(self.regs.read(Reg::Devr0)))
    }

    pub fn hot_join_request_it(&mut self) -> Result<(), Error> {
        self.start_request(devr0::HJEN, false, MessageType::HotJoin)?;
        self.launch(
            XferContext::request(XferRoutine::TgtHotJoin, XferMode::Interrupt),
            ev::DAUPD,
        );
        Ok(())
    }

    /// Request the controller role. On success the handle is a controller.
    pub fn controller_role_request(&mut self, timeout: MillisDurationU32) -> Result<(), Error> {
        self.start_request(devr0::CREN, true, MessageType::ControllerRoleRequest)?;
        let mut ctx = XferContext::request(XferRoutine::TgtCtrlRole, XferMode::Polling);
        self.run_blocking(&mut ctx, timeout, |_| Ok(()))?;
        self.logger.info(format_args!("i3c: controller role granted"));
        Ok(())
    }

    pub fn controller_role_request_it(&mut self) -> Result<(), Error> {
        self.start_request(devr0::CREN, true, MessageType::ControllerRoleRequest)?;
        self.launch(
            XferContext::request(XferRoutine::TgtCtrlRole, XferMode::Interrupt),
            ev::CRUPD,
        );
        Ok(())
    }

    fn require_dynamic_address(&mut self) -> Result<(), Error> {
        if self.regs.read(Reg::Devr0) & devr0::DAVAL == 0 {
            self.last_error |= ErrorCode::NOT_ALLOWED;
            return Err(Error::NotAllowed);
        }
        Ok(())
    }

    fn prepare_target_tx(&mut self, len: usize) -> Result<(), Error> {
        self.check_ready(I3cMode::Target)?;
        self.require_dynamic_address()?;
        let count = u32::try_from(len)
            .ok()
            .filter(|n| *n != 0 && *n <= tgttdr::TGTTDCNT_MASK)
            .ok_or(Error::InvalidParam)?;
        let mrl = self.regs.read(Reg::Maxrlr) & maxrlr::MRL_MASK;
        if mrl != 0 && count > mrl {
            self.last_error |= ErrorCode::SIZE;
            self.logger.warn(format_args!(
                "i3c: {} bytes exceed max read length {}",
                count, mrl
            ));
            return Err(Error::InvalidParam);
        }
        self.regs.write(Reg::Tgttdr, count);
        self.state = I3cState::Tx;
        Ok(())
    }

    fn prepare_target_rx(&mut self, len: usize) -> Result<(), Error> {
        self.check_ready(I3cMode::Target)?;
        self.require_dynamic_address()?;
        if len == 0 {
            return Err(Error::InvalidParam);
        }
        self.state = I3cState::Rx;
        Ok(())
    }

    fn start_target_dma(
        &mut self,
        dma: &mut impl I3cDma,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), Error> {
        match start_dma_channels(dma, &[], tx, rx) {
            Ok(enable) => {
                self.regs.set_bits(Reg::Cfgr, enable);
                Ok(())
            }
            Err(e) => {
                dma.stop();
                self.last_error |= ErrorCode::DMA;
                self.state = I3cState::Idle;
                Err(e)
            }
        }
    }

    fn start_ibi(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.check_ready(I3cMode::Target)?;
        if self.regs.read(Reg::Devr0) & devr0::IBIEN == 0 {
            self.last_error |= ErrorCode::NOT_ALLOWED;
            return Err(Error::NotAllowed);
        }
        let allowed = (self.regs.read(Reg::Maxrlr) & maxrlr::IBIP_MASK) >> maxrlr::IBIP_SHIFT;
        if payload.len() > MAX_IBI_PAYLOAD || payload.len() > allowed as usize {
            return Err(Error::InvalidParam);
        }
        let mut data = [0u8; MAX_IBI_PAYLOAD];
        data.get_mut(..payload.len())
            .ok_or(Error::InvalidParam)?
            .copy_from_slice(payload);
        self.regs.write(Reg::Ibidr, u32::from_le_bytes(data));
        self.regs
            .write(Reg::Cr, MessageType::Ibi.bits() | payload.len() as u32);
        self.state = I3cState::TgtReq;
        Ok(())
    }

    /// Common checks for hot-join and controller-role requests.
    fn start_request(
        &mut self,
        enable: u32,
        needs_address: bool,
        mtype: MessageType,
    ) -> Result<(), Error> {
        self.check_ready(I3cMode::Target)?;
        let devr = self.regs.read(Reg::Devr0);
        let has_address = devr & devr0::DAVAL != 0;
        if devr & enable == 0 || has_address != needs_address {
            self.last_error |= ErrorCode::NOT_ALLOWED;
            return Err(Error::NotAllowed);
        }
        self.regs.write(Reg::Cr, mtype.bits());
        self.state = I3cState::TgtReq;
        Ok(())
    }
}
