// Licensed under the Apache-2.0 license

//! SCL timing computation.
//!
//! All arithmetic is done in kernel clock cycles. Register fields hold
//! `cycles - 1` for the SCL phases, `cycles - 2` for the bus-available
//! count, and half-cycles minus one for the bus-free time.

use super::common::Error;
use super::registers::{timingr0, timingr1};
use fugit::HertzU32;

/// Upper bound of the I3C SDR push-pull clock.
pub const MAX_PUSH_PULL: HertzU32 = HertzU32::from_raw(12_500_000);
/// Upper bound of the legacy I2C (Fast-mode Plus) clock.
pub const MAX_LEGACY_I2C: HertzU32 = HertzU32::from_raw(1_000_000);

const T_HIGH_MIN_NS: u64 = 24;
const T_LOW_OD_MIN_NS: u64 = 200;
const T_AVAL_NS: u64 = 1_000;
const T_CAS_NS: u64 = 40;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusType {
    /// Only I3C targets on the bus
    PureI3c,
    /// Legacy I2C targets share the bus
    Mixed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingInput {
    pub push_pull: HertzU32,
    /// Open-drain clock on a pure bus, legacy I2C clock on a mixed bus
    pub open_drain: HertzU32,
    /// SCL high share of the push-pull period, percent, at most 50
    pub duty_cycle: u8,
    pub bus: BusType,
}

/// Values for the two controller timing registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerTiming {
    pub timingr0: u32,
    pub timingr1: u32,
}

fn cycles_for_ns(kernel_hz: u64, ns: u64) -> u64 {
    (ns * kernel_hz).div_ceil(1_000_000_000)
}

fn div_round(a: u64, b: u64) -> u64 {
    (a + b / 2) / b
}

fn field(cycles: u64, offset: u64, max: u64) -> Result<u32, Error> {
    cycles
        .checked_sub(offset)
        .filter(|v| *v <= max)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(Error::InvalidParam)
}

/// Legacy I2C minimum SCL low / high times for the requested clock.
fn i2c_phase_minimums(freq: u64) -> (u64, u64) {
    match freq {
        0..=100_000 => (4_700, 4_000),
        100_001..=400_000 => (1_300, 600),
        _ => (500, 260),
    }
}

/// Compute `TIMINGR0` / `TIMINGR1` for a controller.
///
/// # Errors
///
/// Returns `Error::InvalidParam` when a frequency is zero or above its bus
/// limit, the duty cycle is above 50 %, or a phase does not fit its field
/// at this kernel clock.
pub fn compute_controller_timing(
    kernel: HertzU32,
    input: &TimingInput,
) -> Result<ControllerTiming, Error> {
    let clk = u64::from(kernel.raw());
    let pp = u64::from(input.push_pull.raw());
    let od = u64::from(input.open_drain.raw());
    if clk == 0 || pp == 0 || od == 0 || input.duty_cycle > 50 {
        return Err(Error::InvalidParam);
    }
    if input.push_pull > MAX_PUSH_PULL {
        return Err(Error::InvalidParam);
    }
    if input.bus == BusType::Mixed && input.open_drain > MAX_LEGACY_I2C {
        return Err(Error::InvalidParam);
    }

    let pp_cycles = div_round(clk, pp);
    let sclh_i3c = div_round(pp_cycles * u64::from(input.duty_cycle), 100)
        .max(cycles_for_ns(clk, T_HIGH_MIN_NS));
    if sclh_i3c >= pp_cycles {
        return Err(Error::InvalidParam);
    }
    let scll_pp = pp_cycles - sclh_i3c;

    let od_cycles = div_round(clk, od);
    let (scll_od, sclh_i2c, free_ns) = match input.bus {
        BusType::PureI3c => {
            let low = od_cycles
                .saturating_sub(sclh_i3c)
                .max(cycles_for_ns(clk, T_LOW_OD_MIN_NS));
            (low, None, T_CAS_NS)
        }
        BusType::Mixed => {
            let (low_min, high_min) = i2c_phase_minimums(od);
            let high = div_round(od_cycles * u64::from(input.duty_cycle), 100);
            let low = od_cycles
                .saturating_sub(high)
                .max(cycles_for_ns(clk, low_min));
            let high = od_cycles.saturating_sub(low);
            if high < cycles_for_ns(clk, high_min) {
                return Err(Error::InvalidParam);
            }
            (low, Some(high), low_min)
        }
    };

    let timingr0 = (field(scll_pp, 1, 0xFF)? << timingr0::SCLL_PP_SHIFT)
        | (field(sclh_i3c, 1, 0xFF)? << timingr0::SCLH_I3C_SHIFT)
        | (field(scll_od, 1, 0xFF)? << timingr0::SCLL_OD_SHIFT)
        | match sclh_i2c {
            Some(high) => field(high, 1, 0xFF)? << timingr0::SCLH_I2C_SHIFT,
            None => 0,
        };

    let aval = field(cycles_for_ns(clk, T_AVAL_NS), 2, 0xFF)?;
    let free = field((free_ns * clk).div_ceil(2_000_000_000), 1, 0x7F)?;
    let timingr1 = (aval << timingr1::AVAL_SHIFT) | (free << timingr1::FREE_SHIFT);

    Ok(ControllerTiming { timingr0, timingr1 })
}

/// Bus-available count for a target: the 1 us idle time it must observe
/// before issuing an IBI or hot-join.
///
/// # Errors
///
/// Returns `Error::InvalidParam` if the count does not fit in eight bits.
pub fn compute_target_timing(kernel: HertzU32) -> Result<u8, Error> {
    let clk = u64::from(kernel.raw());
    if clk == 0 {
        return Err(Error::InvalidParam);
    }
    let aval = field(cycles_for_ns(clk, T_AVAL_NS), 2, 0xFF)?;
    u8::try_from(aval).map_err(|_| Error::InvalidParam)
}
