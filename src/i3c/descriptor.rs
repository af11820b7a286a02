// Licensed under the Apache-2.0 license

//! Transfer-descriptor builder.
//!
//! Turns a list of CCC or private descriptors into the control words the
//! peripheral consumes from its C-FIFO and the matching TX byte stream.
//! Everything is written into caller buffers; nothing here touches the
//! hardware.

use super::ccc;
use super::common::Error;
use super::registers::{cr, MessageType};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

/// One CCC message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CccDescriptor<'d> {
    /// Target dynamic address, ignored for broadcast CCCs
    pub target: u8,
    pub code: u8,
    pub defining_byte: Option<u8>,
    pub direction: Direction,
    /// Payload for a write
    pub data: &'d [u8],
    /// Bytes expected back for a read
    pub read_len: usize,
}

impl<'d> CccDescriptor<'d> {
    #[must_use]
    pub fn broadcast(code: u8, data: &'d [u8]) -> Self {
        Self {
            target: 0,
            code,
            defining_byte: None,
            direction: Direction::Write,
            data,
            read_len: 0,
        }
    }

    #[must_use]
    pub fn direct_set(target: u8, code: u8, data: &'d [u8]) -> Self {
        Self {
            target,
            code,
            defining_byte: None,
            direction: Direction::Write,
            data,
            read_len: 0,
        }
    }

    #[must_use]
    pub fn direct_get(target: u8, code: u8, read_len: usize) -> Self {
        Self {
            target,
            code,
            defining_byte: None,
            direction: Direction::Read,
            data: &[],
            read_len,
        }
    }

    #[must_use]
    pub fn with_defining_byte(mut self, byte: u8) -> Self {
        self.defining_byte = Some(byte);
        self
    }
}

/// One private read or write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PrivateDescriptor<'d> {
    pub target: u8,
    pub direction: Direction,
    pub data: &'d [u8],
    pub read_len: usize,
}

impl<'d> PrivateDescriptor<'d> {
    #[must_use]
    pub fn write(target: u8, data: &'d [u8]) -> Self {
        Self {
            target,
            direction: Direction::Write,
            data,
            read_len: 0,
        }
    }

    #[must_use]
    pub fn read(target: u8, read_len: usize) -> Self {
        Self {
            target,
            direction: Direction::Read,
            data: &[],
            read_len,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    DirectCcc,
    BroadcastCcc,
    PrivateI3c,
    LegacyI2c,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Termination {
    /// Leave the bus held for a following frame
    Restart,
    Stop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferOption {
    pub kind: MessageKind,
    /// Emit the 0x7E arbitration header before the first message
    pub arbitration_header: bool,
    pub end: Termination,
}

impl TransferOption {
    #[must_use]
    pub const fn new(kind: MessageKind, end: Termination) -> Self {
        Self {
            kind,
            arbitration_header: true,
            end,
        }
    }

    #[must_use]
    pub const fn without_arbitration_header(mut self) -> Self {
        self.arbitration_header = false;
        self
    }
}

/// Lengths of a frame written by the builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub control_len: usize,
    pub tx_len: usize,
    pub rx_len: usize,
    pub no_arbitration_header: bool,
}

/// Buffers of one frame, ready to hand to the driver.
#[derive(Debug)]
pub struct Xfer<'a> {
    pub control: &'a [u32],
    pub tx: &'a [u8],
    pub rx: &'a mut [u8],
    pub no_arbitration_header: bool,
}

impl<'a> Xfer<'a> {
    /// Trim the caller buffers to the lengths recorded in `frame`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidParam` if a buffer is shorter than the frame needs.
    pub fn new(
        frame: &Frame,
        control: &'a [u32],
        tx: &'a [u8],
        rx: &'a mut [u8],
    ) -> Result<Self, Error> {
        let control = control.get(..frame.control_len).ok_or(Error::InvalidParam)?;
        let tx = tx.get(..frame.tx_len).ok_or(Error::InvalidParam)?;
        let rx = rx.get_mut(..frame.rx_len).ok_or(Error::InvalidParam)?;
        Ok(Self {
            control,
            tx,
            rx,
            no_arbitration_header: frame.no_arbitration_header,
        })
    }
}

struct FrameWriter<'b> {
    control: &'b mut [u32],
    tx: &'b mut [u8],
    frame: Frame,
}

impl<'b> FrameWriter<'b> {
    fn new(control: &'b mut [u32], tx: &'b mut [u8], option: TransferOption) -> Self {
        Self {
            control,
            tx,
            frame: Frame {
                no_arbitration_header: !option.arbitration_header,
                ..Frame::default()
            },
        }
    }

    fn word(&mut self, word: u32) -> Result<(), Error> {
        let slot = self
            .control
            .get_mut(self.frame.control_len)
            .ok_or(Error::InvalidParam)?;
        *slot = word;
        self.frame.control_len += 1;
        Ok(())
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        let start = self.frame.tx_len;
        let end = start.checked_add(data.len()).ok_or(Error::InvalidParam)?;
        self.tx
            .get_mut(start..end)
            .ok_or(Error::InvalidParam)?
            .copy_from_slice(data);
        self.frame.tx_len = end;
        Ok(())
    }

    /// Account for a read and return its data count.
    fn read(&mut self, len: usize) -> Result<u32, Error> {
        let count = data_count(len)?;
        self.frame.rx_len = self
            .frame
            .rx_len
            .checked_add(len)
            .ok_or(Error::InvalidParam)?;
        Ok(count)
    }

    fn finish(mut self, end: Termination) -> Result<Frame, Error> {
        let last = self
            .frame
            .control_len
            .checked_sub(1)
            .and_then(|i| self.control.get_mut(i))
            .ok_or(Error::InvalidParam)?;
        if end == Termination::Stop {
            *last |= cr::MEND;
        }
        Ok(self.frame)
    }
}

fn data_count(len: usize) -> Result<u32, Error> {
    u32::try_from(len)
        .ok()
        .filter(|n| *n <= cr::DCNT_MASK)
        .ok_or(Error::InvalidParam)
}

fn address_field(address: u8) -> Result<u32, Error> {
    if address > 0x7F {
        return Err(Error::InvalidParam);
    }
    Ok(u32::from(address) << cr::ADD_SHIFT)
}

fn ccc_field(code: u8) -> u32 {
    u32::from(code) << cr::CCC_SHIFT
}

/// Build the control words and TX stream of a CCC frame.
///
/// A broadcast CCC is one word carrying the code and the payload length
/// (defining byte included). A direct CCC is a broadcast header carrying
/// the code, followed by a direct word addressed to the target.
///
/// # Errors
///
/// `Error::InvalidParam` for an empty list, a buffer overflow, a code that
/// does not match the option's family, a GET used as broadcast, an
/// address above 7 bits or a count above 16 bits.
pub fn build_ccc_frame(
    descriptors: &[CccDescriptor<'_>],
    option: TransferOption,
    control: &mut [u32],
    tx: &mut [u8],
) -> Result<Frame, Error> {
    if descriptors.is_empty() {
        return Err(Error::InvalidParam);
    }
    let mut w = FrameWriter::new(control, tx, option);

    for desc in descriptors {
        let defining: &[u8] = match &desc.defining_byte {
            Some(byte) => core::slice::from_ref(byte),
            None => &[],
        };
        match option.kind {
            MessageKind::BroadcastCcc => {
                if ccc::is_direct(desc.code)
                    || ccc::is_get(desc.code)
                    || desc.direction == Direction::Read
                {
                    return Err(Error::InvalidParam);
                }
                let count = data_count(defining.len() + desc.data.len())?;
                w.word(MessageType::Ccc.bits() | ccc_field(desc.code) | count)?;
                w.bytes(defining)?;
                w.bytes(desc.data)?;
            }
            MessageKind::DirectCcc => {
                if !ccc::is_direct(desc.code) {
                    return Err(Error::InvalidParam);
                }
                let header_count = data_count(defining.len())?;
                w.word(MessageType::Ccc.bits() | ccc_field(desc.code) | header_count)?;
                w.bytes(defining)?;

                let address = address_field(desc.target)?;
                let direct = match desc.direction {
                    Direction::Write => {
                        w.bytes(desc.data)?;
                        data_count(desc.data.len())?
                    }
                    Direction::Read => w.read(desc.read_len)? | cr::RNW,
                };
                w.word(MessageType::Direct.bits() | address | direct)?;
            }
            MessageKind::PrivateI3c | MessageKind::LegacyI2c => {
                return Err(Error::InvalidParam);
            }
        }
    }

    w.finish(option.end)
}

/// Build the control words and TX stream of a private I3C or legacy I2C
/// frame, one message per descriptor.
///
/// # Errors
///
/// `Error::InvalidParam` for an empty list, a buffer overflow, a CCC
/// option, an address above 7 bits or a count above 16 bits.
pub fn build_private_frame(
    descriptors: &[PrivateDescriptor<'_>],
    option: TransferOption,
    control: &mut [u32],
    tx: &mut [u8],
) -> Result<Frame, Error> {
    let mtype = match option.kind {
        MessageKind::PrivateI3c => MessageType::Private,
        MessageKind::LegacyI2c => MessageType::LegacyI2c,
        MessageKind::DirectCcc | MessageKind::BroadcastCcc => return Err(Error::InvalidParam),
    };
    if descriptors.is_empty() {
        return Err(Error::InvalidParam);
    }
    let mut w = FrameWriter::new(control, tx, option);

    for desc in descriptors {
        let address = address_field(desc.target)?;
        let body = match desc.direction {
            Direction::Write => {
                w.bytes(desc.data)?;
                data_count(desc.data.len())?
            }
            Direction::Read => w.read(desc.read_len)? | cr::RNW,
        };
        w.word(mtype.bits() | address | body)?;
    }

    w.finish(option.end)
}
