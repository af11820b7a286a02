// Licensed under the Apache-2.0 license

//! Common Command Codes and the ENTDAA payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

// Broadcast CCCs
pub const ENEC_BROADCAST: u8 = 0x00;
pub const DISEC_BROADCAST: u8 = 0x01;
pub const ENTAS0_BROADCAST: u8 = 0x02;
pub const ENTAS1_BROADCAST: u8 = 0x03;
pub const ENTAS2_BROADCAST: u8 = 0x04;
pub const ENTAS3_BROADCAST: u8 = 0x05;
pub const RSTDAA: u8 = 0x06;
pub const ENTDAA: u8 = 0x07;
pub const DEFTGTS: u8 = 0x08;
pub const SETMWL_BROADCAST: u8 = 0x09;
pub const SETMRL_BROADCAST: u8 = 0x0A;
pub const ENTTM: u8 = 0x0B;
pub const SETBUSCON: u8 = 0x0C;
pub const ENTHDR0: u8 = 0x20;
pub const SETXTIME_BROADCAST: u8 = 0x28;
pub const SETAASA: u8 = 0x29;
pub const RSTACT_BROADCAST: u8 = 0x2A;
pub const DEFGRPA: u8 = 0x2B;
pub const RSTGRPA_BROADCAST: u8 = 0x2C;
pub const MLANE_BROADCAST: u8 = 0x2D;

// Direct CCCs
pub const ENEC_DIRECT: u8 = 0x80;
pub const DISEC_DIRECT: u8 = 0x81;
pub const ENTAS0_DIRECT: u8 = 0x82;
pub const ENTAS1_DIRECT: u8 = 0x83;
pub const ENTAS2_DIRECT: u8 = 0x84;
pub const ENTAS3_DIRECT: u8 = 0x85;
pub const RSTDAA_DIRECT: u8 = 0x86;
pub const SETDASA: u8 = 0x87;
pub const SETNEWDA: u8 = 0x88;
pub const SETMWL_DIRECT: u8 = 0x89;
pub const SETMRL_DIRECT: u8 = 0x8A;
pub const GETMWL: u8 = 0x8B;
pub const GETMRL: u8 = 0x8C;
pub const GETPID: u8 = 0x8D;
pub const GETBCR: u8 = 0x8E;
pub const GETDCR: u8 = 0x8F;
pub const GETSTATUS: u8 = 0x90;
pub const GETACCCR: u8 = 0x91;
pub const SETBRGTGT: u8 = 0x93;
pub const GETMXDS: u8 = 0x94;
pub const GETCAPS: u8 = 0x95;
pub const SETXTIME_DIRECT: u8 = 0x98;
pub const GETXTIME: u8 = 0x99;
pub const RSTACT_DIRECT: u8 = 0x9A;
pub const SETGRPA: u8 = 0x9B;
pub const RSTGRPA_DIRECT: u8 = 0x9C;

/// ENEC / DISEC event bits.
pub mod events {
    pub const INT: u8 = 1 << 0;
    pub const CR: u8 = 1 << 1;
    pub const HJ: u8 = 1 << 3;
}

/// Direct CCCs have bit 7 set.
#[must_use]
pub const fn is_direct(code: u8) -> bool {
    code & 0x80 != 0
}

/// Direct CCCs that read data back from the target.
#[must_use]
pub const fn is_get(code: u8) -> bool {
    matches!(
        code,
        GETMWL | GETMRL | GETPID | GETBCR | GETDCR | GETSTATUS | GETACCCR | GETMXDS | GETCAPS
            | GETXTIME
    )
}

/// Addresses a target may never be given: the broadcast address, its
/// single-bit-error neighbours and the reserved low range.
#[must_use]
pub const fn is_valid_dynamic_address(address: u8) -> bool {
    !matches!(
        address,
        0x00..=0x07 | 0x3E | 0x5E | 0x6E | 0x76 | 0x7A | 0x7C | 0x7E | 0x7F
    ) && address < 0x80
}

/// What a target shifts out during ENTDAA: 48-bit provisioned ID, BCR, DCR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DaaPayload {
    pid: [u8; 6],
    bcr: u8,
    dcr: u8,
}

#[cfg(feature = "defmt")]
impl defmt::Format for DaaPayload {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "DaaPayload pid={=u64:#x} bcr={=u8:#x} dcr={=u8:#x}",
            self.pid(),
            self.bcr,
            self.dcr
        );
    }
}

impl DaaPayload {
    /// Parse the payload in bus order.
    #[must_use]
    pub fn from_bus_bytes(bytes: &[u8; 8]) -> Self {
        // Every bit pattern is a valid payload.
        Self::read_from_bytes(bytes.as_slice()).unwrap_or_default()
    }

    #[must_use]
    pub fn to_bus_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Provisioned ID, 48 bits.
    #[must_use]
    pub fn pid(&self) -> u64 {
        self.pid
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// MIPI manufacturer ID, PID[47:33].
    #[must_use]
    pub fn manufacturer_id(&self) -> u16 {
        ((self.pid() >> 33) & 0x7FFF) as u16
    }

    #[must_use]
    pub fn bcr(&self) -> Bcr {
        Bcr(self.bcr)
    }

    #[must_use]
    pub fn dcr(&self) -> u8 {
        self.dcr
    }
}

/// Bus characteristics register as advertised by a target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bcr(pub u8);

impl Bcr {
    #[must_use]
    pub const fn max_speed_limitation(self) -> bool {
        self.0 & (1 << 0) != 0
    }
    #[must_use]
    pub const fn ibi_capable(self) -> bool {
        self.0 & (1 << 1) != 0
    }
    #[must_use]
    pub const fn ibi_payload(self) -> bool {
        self.0 & (1 << 2) != 0
    }
    #[must_use]
    pub const fn offline_capable(self) -> bool {
        self.0 & (1 << 3) != 0
    }
    #[must_use]
    pub const fn virtual_target(self) -> bool {
        self.0 & (1 << 4) != 0
    }
    #[must_use]
    pub const fn advanced_capabilities(self) -> bool {
        self.0 & (1 << 5) != 0
    }
    /// Device role field BCR[7:6] = 0b01.
    #[must_use]
    pub const fn controller_capable(self) -> bool {
        (self.0 >> 6) == 0b01
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn direct_and_get_classification() {
        assert!(!is_direct(ENTDAA));
        assert!(is_direct(SETDASA));
        assert!(is_get(GETPID));
        assert!(!is_get(SETMWL_DIRECT));
    }

    #[test]
    fn reserved_dynamic_addresses_are_rejected() {
        assert!(!is_valid_dynamic_address(0x7E));
        assert!(!is_valid_dynamic_address(0x3E));
        assert!(!is_valid_dynamic_address(0x03));
        assert!(!is_valid_dynamic_address(0x80));
        assert!(is_valid_dynamic_address(0x08));
        assert!(is_valid_dynamic_address(0x32));
    }

    #[test]
    fn daa_payload_fields_in_bus_order() {
        let payload = DaaPayload::from_bus_bytes(&hex!("04 6A 00 00 00 01 47 C6"));
        assert_eq!(payload.pid(), 0x046A_0000_0001);
        assert_eq!(payload.manufacturer_id(), 0x0235);
        assert_eq!(payload.dcr(), 0xC6);
        let bcr = payload.bcr();
        assert!(bcr.controller_capable());
        assert!(bcr.ibi_capable());
        assert!(bcr.ibi_payload());
        assert!(!bcr.offline_capable());
        assert_eq!(payload.to_bus_bytes(), hex!("04 6A 00 00 00 01 47 C6"));
    }
}
