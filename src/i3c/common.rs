// Licensed under the Apache-2.0 license

//! Common types for the I3C driver: modes, states, configuration builders,
//! error codes and the events queued by the interrupt handler.

use super::ccc::DaaPayload;
use super::registers::ser;
use super::timing::ControllerTiming;

/// Role of the peripheral on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I3cMode {
    None,
    Controller,
    Target,
}

/// Global state of the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I3cState {
    Reset,
    /// Mode selected, not configured yet
    Init,
    Idle,
    Tx,
    Rx,
    TxRx,
    /// Dynamic address assignment in progress
    Daa,
    /// Target request (IBI, hot-join, controller role) in progress
    TgtReq,
    Abort,
}

impl I3cState {
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            I3cState::Tx
                | I3cState::Rx
                | I3cState::TxRx
                | I3cState::Daa
                | I3cState::TgtReq
                | I3cState::Abort
        )
    }
}

/// How the data phase of a transfer is serviced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferMode {
    Polling,
    Interrupt,
    Dma,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FifoThreshold {
    #[default]
    Byte,
    Word,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoConfig {
    pub rx_threshold: FifoThreshold,
    pub tx_threshold: FifoThreshold,
    /// Queue control words in the C-FIFO instead of one at a time
    pub control_fifo: bool,
    /// Keep a per-message status in the S-FIFO
    pub status_fifo: bool,
}

/// SCL stall insertion, controller side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StallConfig {
    /// Stall duration in kernel clock cycles
    pub cycles: u8,
    pub on_tbit: bool,
    pub on_data: bool,
    pub on_ccc: bool,
    pub on_ack: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerConfig {
    pub timing: ControllerTiming,
    pub stall: StallConfig,
    /// Acknowledge hot-join requests
    pub hot_join_ack: bool,
    /// Keep SDA high through a weak keeper during bus turnaround
    pub high_keeper_sda: bool,
    /// Own dynamic address, 0 to leave unassigned
    pub own_dynamic_address: u8,
}

pub struct ControllerConfigBuilder {
    timing: Option<ControllerTiming>,
    stall: StallConfig,
    hot_join_ack: bool,
    high_keeper_sda: bool,
    own_dynamic_address: u8,
}

impl Default for ControllerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timing: None,
            stall: StallConfig::default(),
            hot_join_ack: false,
            high_keeper_sda: false,
            own_dynamic_address: 0,
        }
    }
    #[must_use]
    pub fn timing(mut self, timing: ControllerTiming) -> Self {
        self.timing = Some(timing);
        self
    }
    #[must_use]
    pub fn stall(mut self, stall: StallConfig) -> Self {
        self.stall = stall;
        self
    }
    #[must_use]
    pub fn hot_join_ack(mut self, enabled: bool) -> Self {
        self.hot_join_ack = enabled;
        self
    }
    #[must_use]
    pub fn high_keeper_sda(mut self, enabled: bool) -> Self {
        self.high_keeper_sda = enabled;
        self
    }
    #[must_use]
    pub fn own_dynamic_address(mut self, address: u8) -> Self {
        self.own_dynamic_address = address;
        self
    }
    #[must_use]
    pub fn build(self) -> ControllerConfig {
        ControllerConfig {
            timing: self.timing.unwrap_or_default(),
            stall: self.stall,
            hot_join_ack: self.hot_join_ack,
            high_keeper_sda: self.high_keeper_sda,
            own_dynamic_address: self.own_dynamic_address,
        }
    }
}

/// Number of IBI payload bytes a target sends after its IBI address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IbiPayloadSize {
    #[default]
    None = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl IbiPayloadSize {
    #[must_use]
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetConfig {
    /// Bus-available count, see [`super::timing::compute_target_timing`]
    pub bus_available: u8,
    /// Device characteristic register value
    pub dcr: u8,
    /// MIPI instance identifier (4 bits) in the provisioned ID
    pub mipi_identifier: u8,
    pub max_speed_limitation: bool,
    pub controller_capable: bool,
    pub handoff_delay: bool,
    pub group_address_capable: bool,
    pub ibi_payload: IbiPayloadSize,
    pub pending_read_mdb: bool,
    pub max_read_length: u16,
    pub max_write_length: u16,
    /// Max read turnaround, in microseconds, reported by GETMXDS
    pub max_read_turnaround: u8,
}

pub struct TargetConfigBuilder {
    config: TargetConfig,
}

impl Default for TargetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TargetConfig {
                bus_available: 0,
                dcr: 0,
                mipi_identifier: 0,
                max_speed_limitation: false,
                controller_capable: false,
                handoff_delay: false,
                group_address_capable: false,
                ibi_payload: IbiPayloadSize::None,
                pending_read_mdb: false,
                max_read_length: 0,
                max_write_length: 0,
                max_read_turnaround: 0,
            },
        }
    }
    #[must_use]
    pub fn bus_available(mut self, count: u8) -> Self {
        self.config.bus_available = count;
        self
    }
    #[must_use]
    pub fn dcr(mut self, dcr: u8) -> Self {
        self.config.dcr = dcr;
        self
    }
    #[must_use]
    pub fn mipi_identifier(mut self, id: u8) -> Self {
        self.config.mipi_identifier = id & 0xF;
        self
    }
    #[must_use]
    pub fn max_speed_limitation(mut self, enabled: bool) -> Self {
        self.config.max_speed_limitation = enabled;
        self
    }
    #[must_use]
    pub fn controller_capable(mut self, enabled: bool) -> Self {
        self.config.controller_capable = enabled;
        self
    }
    #[must_use]
    pub fn handoff_delay(mut self, enabled: bool) -> Self {
        self.config.handoff_delay = enabled;
        self
    }
    #[must_use]
    pub fn group_address_capable(mut self, enabled: bool) -> Self {
        self.config.group_address_capable = enabled;
        self
    }
    #[must_use]
    pub fn ibi_payload(mut self, size: IbiPayloadSize) -> Self {
        self.config.ibi_payload = size;
        self
    }
    #[must_use]
    pub fn pending_read_mdb(mut self, enabled: bool) -> Self {
        self.config.pending_read_mdb = enabled;
        self
    }
    #[must_use]
    pub fn max_read_length(mut self, len: u16) -> Self {
        self.config.max_read_length = len;
        self
    }
    #[must_use]
    pub fn max_write_length(mut self, len: u16) -> Self {
        self.config.max_write_length = len;
        self
    }
    #[must_use]
    pub fn max_read_turnaround(mut self, us: u8) -> Self {
        self.config.max_read_turnaround = us;
        self
    }
    #[must_use]
    pub fn build(self) -> TargetConfig {
        self.config
    }
}

/// Controller view of one target in the device table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Table slot, 1..=4
    pub index: u8,
    pub dynamic_address: u8,
    pub ibi_ack: bool,
    /// IBI is followed by payload bytes
    pub ibi_payload: bool,
    pub controller_role_ack: bool,
    /// Stop the transfer after the IBI instead of continuing
    pub stop_after_ibi: bool,
}

/// Reset action set by the RSTACT CCC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetAction {
    None,
    Peripheral,
    WholeTarget,
    DebugNetworkAdapter,
}

impl ResetAction {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => ResetAction::None,
            1 => ResetAction::Peripheral,
            2 => ResetAction::WholeTarget,
            _ => ResetAction::DebugNetworkAdapter,
        }
    }
}

/// Target-side snapshot of what the controller configured through CCCs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CccInfo {
    pub dynamic_address: Option<u8>,
    pub max_write_length: u16,
    pub max_read_length: u16,
    pub ibi_payload_size: u8,
    /// Valid when `reset_pending` is set
    pub reset_action: ResetAction,
    pub reset_pending: bool,
    pub activity_state: u8,
    pub ibi_allowed: bool,
    pub controller_role_allowed: bool,
    pub hot_join_allowed: bool,
}

/// Protocol error codes reported in the status-error register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Controller: illegal transmitted data after broadcast address
    Ce0,
    /// Controller: monitoring error
    Ce1,
    /// Controller: no response to broadcast address
    Ce2,
    /// Controller: failed controller-role hand-off
    Ce3,
    /// Target: TE0..TE6
    Te(u8),
    Unknown(u8),
}

impl ProtocolError {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => ProtocolError::Ce0,
            1 => ProtocolError::Ce1,
            2 => ProtocolError::Ce2,
            3 => ProtocolError::Ce3,
            8..=14 => ProtocolError::Te(code - 8),
            _ => ProtocolError::Unknown(code),
        }
    }
}

/// Accumulated error bits of the last failing operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCode(u32);

impl ErrorCode {
    pub const NONE: Self = Self(0);
    pub const PROTOCOL: Self = Self(ser::PERR);
    pub const STALL: Self = Self(ser::STALL);
    pub const DATA_OVERRUN: Self = Self(ser::DOVR);
    pub const CONTROL_OVERRUN: Self = Self(ser::COVR);
    pub const ADDRESS_NACK: Self = Self(ser::ANACK);
    pub const DATA_NACK: Self = Self(ser::DNACK);
    pub const HANDOFF_DATA: Self = Self(ser::DERR);
    pub const DMA: Self = Self(1 << 16);
    pub const SIZE: Self = Self(1 << 17);
    pub const NOT_ALLOWED: Self = Self(1 << 18);

    const HARDWARE_MASK: u32 = ser::CODERR_MASK
        | ser::PERR
        | ser::STALL
        | ser::DOVR
        | ser::COVR
        | ser::ANACK
        | ser::DNACK
        | ser::DERR;

    #[must_use]
    pub const fn from_status_error(ser: u32) -> Self {
        Self(ser & Self::HARDWARE_MASK)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Protocol error code, present only with [`ErrorCode::PROTOCOL`].
    #[must_use]
    pub fn protocol_error(self) -> Option<ProtocolError> {
        if self.contains(Self::PROTOCOL) {
            Some(ProtocolError::from_code((self.0 & ser::CODERR_MASK) as u8))
        } else {
            None
        }
    }
}

impl core::ops::BitOr for ErrorCode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for ErrorCode {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Handle is in a state that does not accept the request
    Busy,
    Timeout,
    InvalidParam,
    /// Wrong role for the request, or the feature is disabled by the bus
    /// controller
    NotAllowed,
    /// The transfer failed; the code says why
    Hardware(ErrorCode),
    Dma,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match *self {
            Error::Hardware(code) if code.contains(ErrorCode::ADDRESS_NACK) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            Error::Hardware(code) if code.contains(ErrorCode::DATA_NACK) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            }
            Error::Hardware(code)
                if code.contains(ErrorCode::DATA_OVERRUN)
                    || code.contains(ErrorCode::CONTROL_OVERRUN) =>
            {
                ErrorKind::Overrun
            }
            Error::Hardware(_) => ErrorKind::Bus,
            Error::Busy
            | Error::Timeout
            | Error::InvalidParam
            | Error::NotAllowed
            | Error::Dma => ErrorKind::Other,
        }
    }
}

/// Target-side notifications raised by CCCs or bus events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// A GETxxx CCC other than GETSTATUS was answered
    Get,
    GetStatus,
    DynamicAddressUpdate,
    MaxWriteLengthUpdate,
    MaxReadLengthUpdate,
    ResetPattern,
    ActivityStateUpdate,
    InterruptUpdate,
    DefineTargets,
    GroupAddress,
}

/// Events produced by the interrupt handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I3cEvent {
    CtrlTxComplete,
    CtrlRxComplete,
    CtrlMultipleXferComplete,
    /// A target entered ENTDAA; answer with `set_dynamic_address`
    DynamicAddressRequest(DaaPayload),
    DaaComplete,
    TgtTxComplete,
    TgtRxComplete,
    IbiComplete,
    HotJoinComplete { address: u8 },
    /// In-band interrupt received by the controller
    Ibi { address: u8, payload: u32, len: u8 },
    HotJoinRequest,
    ControllerRoleRequest { address: u8 },
    WakeUp,
    ControllerRoleUpdate { mode: I3cMode },
    Notify(Notification),
    Error(ErrorCode),
    AbortComplete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error as _, ErrorKind, NoAcknowledgeSource};

    #[test]
    fn error_code_keeps_hardware_bits_only() {
        let code = ErrorCode::from_status_error(0xFFFF_0000 | ser::ANACK | ser::PERR | 2);
        assert!(code.contains(ErrorCode::ADDRESS_NACK));
        assert!(!code.contains(ErrorCode::DMA));
        assert_eq!(code.protocol_error(), Some(ProtocolError::Ce2));
    }

    #[test]
    fn target_protocol_codes_decode() {
        assert_eq!(ProtocolError::from_code(9), ProtocolError::Te(1));
        assert_eq!(ProtocolError::from_code(5), ProtocolError::Unknown(5));
    }

    #[test]
    fn nack_maps_to_embedded_hal_kind() {
        let err = Error::Hardware(ErrorCode::ADDRESS_NACK);
        assert_eq!(
            err.kind(),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
        assert_eq!(Error::Timeout.kind(), ErrorKind::Other);
    }

    #[test]
    fn target_builder_masks_mipi_identifier() {
        let cfg = TargetConfigBuilder::new()
            .mipi_identifier(0x1A)
            .ibi_payload(IbiPayloadSize::Two)
            .max_read_length(64)
            .build();
        assert_eq!(cfg.mipi_identifier, 0xA);
        assert_eq!(cfg.ibi_payload.bytes(), 2);
        assert_eq!(cfg.max_read_length, 64);
    }
}
