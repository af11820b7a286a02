// Licensed under the Apache-2.0 license

//! Clock and reset control seam.
//!
//! The RCC block is not driven by this crate; board code implements
//! [`SystemControl`] on top of whatever clock tree driver it uses.

use fugit::HertzU32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockId {
    /// Kernel clock of I3C1, also the timing reference
    I3c1Kernel,
    /// APB1 bus clock gating I3C1 register access
    Apb1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetId {
    I3c1,
}

pub trait ErrorType {
    type Error: core::fmt::Debug;
}

/// Clock gating, frequency and peripheral reset lines.
pub trait SystemControl: ErrorType {
    fn enable(&mut self, clock: &ClockId) -> Result<(), Self::Error>;

    fn disable(&mut self, clock: &ClockId) -> Result<(), Self::Error>;

    fn set_frequency(&mut self, clock: &ClockId, frequency: HertzU32) -> Result<(), Self::Error>;

    fn get_frequency(&self, clock: &ClockId) -> Result<HertzU32, Self::Error>;

    fn reset_assert(&mut self, reset: &ResetId) -> Result<(), Self::Error>;

    fn reset_deassert(&mut self, reset: &ResetId) -> Result<(), Self::Error>;

    /// Assert then release `reset`.
    fn reset_pulse(&mut self, reset: &ResetId) -> Result<(), Self::Error> {
        self.reset_assert(reset)?;
        self.reset_deassert(reset)
    }
}
