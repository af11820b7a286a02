// Licensed under the Apache-2.0 license

//! I3C system setup helper
//!
//! Keeps clock and reset handling out of the peripheral driver: the board
//! brings the block up through [`SystemControl`] and hands the resulting
//! kernel frequency to the timing computation.

use super::common::Error;
use crate::syscon::{ClockId, ErrorType, ResetId, SystemControl};
use fugit::HertzU32;

pub struct I3cSystemSetup;

impl I3cSystemSetup {
    /// Bring the I3C block out of reset with its clocks running.
    ///
    /// Pulses the reset line by hand (assert, then deassert) and enables
    /// the APB bus clock and the I3C kernel clock, in that order.
    ///
    /// # Arguments
    ///
    /// * `system_controller` - Mutable reference to the `SystemControl` implementation
    ///
    /// # Returns
    ///
    /// * `Result<(), Error>` - Ok once the block is clocked and out of reset
    pub fn initialize_i3c_system<S>(system_controller: &mut S) -> Result<(), Error>
    where
        S: SystemControl,
        Error: From<<S as ErrorType>::Error>,
    {
        system_controller.reset_assert(&ResetId::I3c1)?;
        system_controller.reset_deassert(&ResetId::I3c1)?;
        system_controller.enable(&ClockId::Apb1)?;
        system_controller.enable(&ClockId::I3c1Kernel)?;
        Ok(())
    }

    /// Select the I3C kernel clock frequency.
    ///
    /// The timing registers are derived from this clock, so call it before
    /// computing controller or target timing.
    ///
    /// # Arguments
    ///
    /// * `system_controller` - Mutable reference to the `SystemControl` implementation
    /// * `kernel_frequency` - Requested kernel clock
    ///
    /// # Returns
    ///
    /// * `Result<(), Error>` - Ok if the clock tree accepted the frequency
    pub fn configure_i3c_clock<S>(
        system_controller: &mut S,
        kernel_frequency: HertzU32,
    ) -> Result<(), Error>
    where
        S: SystemControl,
        Error: From<<S as ErrorType>::Error>,
    {
        system_controller.set_frequency(&ClockId::I3c1Kernel, kernel_frequency)?;
        Ok(())
    }

    /// Kernel clock feeding the timing registers.
    ///
    /// # Arguments
    ///
    /// * `system_controller` - Reference to the `SystemControl` implementation
    ///
    /// # Returns
    ///
    /// * `Result<HertzU32, Error>` - The running kernel frequency, or an error
    ///   if the clock has not been configured
    pub fn get_i3c_kernel_frequency<S>(system_controller: &S) -> Result<HertzU32, Error>
    where
        S: SystemControl,
        Error: From<<S as ErrorType>::Error>,
    {
        Ok(system_controller.get_frequency(&ClockId::I3c1Kernel)?)
    }

    /// One-call bring-up: set the kernel clock, then reset and enable the
    /// block.
    ///
    /// # Arguments
    ///
    /// * `system_controller` - Mutable reference to the `SystemControl` implementation
    /// * `kernel_frequency` - Requested kernel clock
    ///
    /// # Returns
    ///
    /// * `Result<HertzU32, Error>` - The frequency actually running, which may
    ///   differ from the request when the clock tree rounds it
    pub fn initialize_with_clock_config<S>(
        system_controller: &mut S,
        kernel_frequency: HertzU32,
    ) -> Result<HertzU32, Error>
    where
        S: SystemControl,
        Error: From<<S as ErrorType>::Error>,
    {
        Self::configure_i3c_clock(system_controller, kernel_frequency)?;
        Self::initialize_i3c_system(system_controller)?;
        Self::get_i3c_kernel_frequency(system_controller)
    }

    /// Pulse the reset line only, for error recovery.
    ///
    /// Clocks are left untouched, so the peripheral must be configured
    /// again with `I3c::init` afterwards.
    ///
    /// # Arguments
    ///
    /// * `system_controller` - Mutable reference to the `SystemControl` implementation
    ///
    /// # Returns
    ///
    /// * `Result<(), Error>` - Ok once the reset line has been pulsed
    pub fn reset_i3c_peripheral<S>(system_controller: &mut S) -> Result<(), Error>
    where
        S: SystemControl,
        Error: From<<S as ErrorType>::Error>,
    {
        system_controller.reset_pulse(&ResetId::I3c1)?;
        Ok(())
    }
}
