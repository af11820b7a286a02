// Licensed under the Apache-2.0 license

//! `embedded-hal` I2C on top of the I3C controller.
//!
//! Adjacent operations of the same direction are merged into one
//! legacy-I2C message, so the bus sees no restart between them. Messages
//! are separated by a restart and the frame ends with a STOP. Write data
//! and read data are staged in fixed scratch buffers, so a transaction is
//! limited to [`MAX_OPERATIONS`] messages and [`SCRATCH_LEN`] bytes in each
//! direction.

use super::common::Error;
use super::descriptor::{
    build_private_frame, Frame, MessageKind, PrivateDescriptor, Termination, TransferOption, Xfer,
};
use super::driver::I3c;
use super::registers::RegisterAccess;
use crate::common::{Logger, NoOpLogger};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorType, Operation, SevenBitAddress};
use fugit::MillisDurationU32;

pub const MAX_OPERATIONS: usize = 8;
pub const SCRATCH_LEN: usize = 64;

pub struct LegacyI2c<'h, 'a, R: RegisterAccess, D: DelayNs, L: Logger = NoOpLogger> {
    i3c: &'h mut I3c<'a, R, D, L>,
    timeout: MillisDurationU32,
}

impl<'h, 'a, R: RegisterAccess, D: DelayNs, L: Logger> LegacyI2c<'h, 'a, R, D, L> {
    /// Borrow a configured controller; `timeout` bounds each transaction.
    pub fn new(i3c: &'h mut I3c<'a, R, D, L>, timeout: MillisDurationU32) -> Self {
        Self { i3c, timeout }
    }

    fn run(
        &mut self,
        frame: &Frame,
        control: &[u32],
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), Error> {
        let xfer = Xfer::new(frame, control, tx, rx)?;
        if frame.rx_len == 0 {
            self.i3c.transmit_blocking(xfer, self.timeout)
        } else if frame.tx_len == 0 {
            self.i3c.receive_blocking(xfer, self.timeout)
        } else {
            self.i3c.multiple_transfer_blocking(xfer, self.timeout)
        }
    }
}

impl<R: RegisterAccess, D: DelayNs, L: Logger> ErrorType for LegacyI2c<'_, '_, R, D, L> {
    type Error = Error;
}

/// One legacy-I2C message: a stretch of operations sharing a direction.
#[derive(Clone, Copy)]
struct Run {
    read: bool,
    start: usize,
    len: usize,
}

/// Merge `operations` into runs, copying write data into `staged`.
fn collect_runs(
    operations: &[Operation<'_>],
    staged: &mut [u8],
) -> Result<heapless::Vec<Run, MAX_OPERATIONS>, Error> {
    let mut runs: heapless::Vec<Run, MAX_OPERATIONS> = heapless::Vec::new();
    let mut staged_len = 0usize;
    for op in operations {
        let next = match op {
            Operation::Write(bytes) => {
                let end = staged_len
                    .checked_add(bytes.len())
                    .ok_or(Error::InvalidParam)?;
                staged
                    .get_mut(staged_len..end)
                    .ok_or(Error::InvalidParam)?
                    .copy_from_slice(bytes);
                let run = Run {
                    read: false,
                    start: staged_len,
                    len: bytes.len(),
                };
                staged_len = end;
                run
            }
            Operation::Read(buffer) => Run {
                read: true,
                start: 0,
                len: buffer.len(),
            },
        };
        match runs.last_mut() {
            Some(run) if run.read == next.read => {
                run.len = run.len.checked_add(next.len).ok_or(Error::InvalidParam)?;
            }
            _ => runs.push(next).map_err(|_| Error::InvalidParam)?,
        }
    }
    Ok(runs)
}

impl<R: RegisterAccess, D: DelayNs, L: Logger> embedded_hal::i2c::I2c
    for LegacyI2c<'_, '_, R, D, L>
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut control = [0u32; MAX_OPERATIONS];
        let mut staged = [0u8; SCRATCH_LEN];
        let mut tx = [0u8; SCRATCH_LEN];
        let mut rx = [0u8; SCRATCH_LEN];

        let runs = collect_runs(operations, &mut staged)?;
        let frame = {
            let mut descriptors: heapless::Vec<PrivateDescriptor<'_>, MAX_OPERATIONS> =
                heapless::Vec::new();
            for run in &runs {
                let desc = if run.read {
                    PrivateDescriptor::read(address, run.len)
                } else {
                    let end = run.start + run.len;
                    let bytes = staged.get(run.start..end).ok_or(Error::InvalidParam)?;
                    PrivateDescriptor::write(address, bytes)
                };
                descriptors.push(desc).map_err(|_| Error::InvalidParam)?;
            }
            build_private_frame(
                &descriptors,
                TransferOption::new(MessageKind::LegacyI2c, Termination::Stop),
                &mut control,
                &mut tx,
            )?
        };
        self.run(&frame, &control, &tx, &mut rx)?;

        let mut received = rx.get(..frame.rx_len).ok_or(Error::InvalidParam)?;
        for op in operations.iter_mut() {
            if let Operation::Read(buffer) = op {
                let (head, rest) = received
                    .split_at_checked(buffer.len())
                    .ok_or(Error::InvalidParam)?;
                buffer.copy_from_slice(head);
                received = rest;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i3c::common::ErrorCode;
    use crate::i3c::mock::controller;
    use crate::i3c::registers::{cr, ev, ser, Reg};
    use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};
    use fugit::ExtU32;
    use std::vec::Vec;

    const LEGACY: u32 = 0x3 << 27;
    const EEPROM: u32 = 0x50 << 17;

    #[test]
    fn write_is_one_legacy_message() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        {
            let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
            bus.write(0x50, &[0x00, 0x10, 0xAA]).unwrap();
        }
        let regs = i3c.regs_mut();
        assert_eq!(regs.control, [LEGACY | EEPROM | 3 | cr::MEND]);
        assert_eq!(regs.tx, [0x00, 0x10, 0xAA]);
    }

    #[test]
    fn write_read_restarts_into_read() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&[0xDE, 0xAD]);
        i3c.regs_mut().raise(ev::FC);
        let mut buffer = [0u8; 2];
        {
            let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
            bus.write_read(0x50, &[0x20], &mut buffer).unwrap();
        }
        assert_eq!(buffer, [0xDE, 0xAD]);
        assert_eq!(
            i3c.regs_mut().control,
            [LEGACY | EEPROM | 1, LEGACY | EEPROM | cr::RNW | 2 | cr::MEND]
        );
    }

    #[test]
    fn reads_are_split_back_per_operation() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&[1, 2, 3]);
        i3c.regs_mut().raise(ev::FC);
        let mut first = [0u8; 1];
        let mut second = [0u8; 2];
        {
            let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
            bus.transaction(
                0x50,
                &mut [Operation::Read(&mut first), Operation::Read(&mut second)],
            )
            .unwrap();
        }
        assert_eq!(first, [1]);
        assert_eq!(second, [2, 3]);
        assert_eq!(
            i3c.regs_mut().control,
            [LEGACY | EEPROM | cr::RNW | 3 | cr::MEND]
        );
    }

    #[test]
    fn adjacent_writes_share_one_message() {
        let mut i3c = controller();
        i3c.regs_mut().raise(ev::FC);
        {
            let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
            bus.transaction(
                0x50,
                &mut [Operation::Write(&[0x00, 0x10]), Operation::Write(&[0xAA])],
            )
            .unwrap();
        }
        let regs = i3c.regs_mut();
        assert_eq!(regs.control, [LEGACY | EEPROM | 3 | cr::MEND]);
        assert_eq!(regs.tx, [0x00, 0x10, 0xAA]);
    }

    #[test]
    fn merged_runs_keep_bus_order() {
        let mut i3c = controller();
        i3c.regs_mut().feed_rx(&[7, 8]);
        i3c.regs_mut().raise(ev::FC);
        let mut first = [0u8; 1];
        let mut second = [0u8; 1];
        {
            let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
            bus.transaction(
                0x50,
                &mut [
                    Operation::Write(&[0x01]),
                    Operation::Write(&[0x02]),
                    Operation::Read(&mut first),
                    Operation::Read(&mut second),
                ],
            )
            .unwrap();
        }
        assert_eq!((first, second), ([7], [8]));
        let regs = i3c.regs_mut();
        assert_eq!(
            regs.control,
            [LEGACY | EEPROM | 2, LEGACY | EEPROM | cr::RNW | 2 | cr::MEND]
        );
        assert_eq!(regs.tx, [0x01, 0x02]);
    }

    #[test]
    fn address_nack_maps_to_hal_kind() {
        let mut i3c = controller();
        i3c.regs_mut().set(Reg::Ser, ser::ANACK);
        i3c.regs_mut().raise(ev::ERR);
        let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
        let err = bus.write(0x51, &[0]).unwrap_err();
        assert_eq!(err, Error::Hardware(ErrorCode::ADDRESS_NACK));
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
    }

    #[test]
    fn oversized_transactions_are_rejected() {
        let mut i3c = controller();
        let mut bus = LegacyI2c::new(&mut i3c, 1.millis());
        let mut buffers = [[0u8; 1]; MAX_OPERATIONS];
        let mut ops: Vec<Operation<'_>> = Vec::new();
        for buffer in buffers.iter_mut() {
            ops.push(Operation::Write(&[1]));
            ops.push(Operation::Read(buffer));
        }
        assert_eq!(bus.transaction(0x50, &mut ops), Err(Error::InvalidParam));
        assert_eq!(bus.write(0x50, &[0; SCRATCH_LEN + 1]), Err(Error::InvalidParam));
        drop(bus);
        assert!(i3c.regs_mut().control.is_empty());
    }
}
