// Licensed under the Apache-2.0 license

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use fugit::{ExtU32, RateExtU32};
use panic_halt as _;

use stm32c5_ddk::common::{NoOpLogger, SpinDelay};
use stm32c5_ddk::i3c::descriptor::{build_private_frame, MessageKind, Termination};
use stm32c5_ddk::i3c::timing::{compute_controller_timing, BusType, TimingInput};
use stm32c5_ddk::i3c::{
    ControllerConfigBuilder, DaaOption, Error, I3c, I3c1, I3cMode, LegacyI2c, Mmio,
    PrivateDescriptor, TransferOption, Xfer,
};

const CPU_HZ: u32 = 144_000_000;
const KERNEL_HZ: u32 = 48_000_000;
const FIRST_DYNAMIC_ADDRESS: u8 = 0x30;
const EEPROM_ADDRESS: u8 = 0x50;

/// Bring the bus up, enumerate I3C targets, then talk to one of each kind.
fn bring_up<D: DelayNs>(i3c: &mut I3c<'_, Mmio<I3c1>, D>) -> Result<usize, Error> {
    let timing = compute_controller_timing(
        KERNEL_HZ.Hz(),
        &TimingInput {
            push_pull: 12_500.kHz(),
            open_drain: 400.kHz(),
            duty_cycle: 50,
            bus: BusType::Mixed,
        },
    )?;
    i3c.init(I3cMode::Controller)?;
    i3c.configure_controller(
        &ControllerConfigBuilder::new()
            .timing(timing)
            .hot_join_ack(true)
            .build(),
    )?;

    let mut next = FIRST_DYNAMIC_ADDRESS;
    let found = i3c.assign_dynamic_addresses(
        DaaOption::RstdaaThenEntdaa,
        |_| {
            let address = next;
            next = next.wrapping_add(1);
            address
        },
        50.millis(),
    )?;

    if found > 0 {
        let mut control = [0u32; 1];
        let mut tx = [0u8; 2];
        let frame = build_private_frame(
            &[PrivateDescriptor::write(FIRST_DYNAMIC_ADDRESS, &[0x01, 0x80])],
            TransferOption::new(MessageKind::PrivateI3c, Termination::Stop),
            &mut control,
            &mut tx,
        )?;
        i3c.transmit_blocking(Xfer::new(&frame, &control, &tx, &mut [])?, 10.millis())?;
    }

    let mut bus = LegacyI2c::new(i3c, 10.millis());
    let mut id = [0u8; 2];
    bus.write_read(EEPROM_ADDRESS, &[0x00], &mut id)?;
    Ok(found)
}

#[entry]
fn main() -> ! {
    // SAFETY: nothing else in this image touches I3C1.
    let regs = unsafe { Mmio::<I3c1>::steal() };
    let mut i3c = I3c::new(regs, SpinDelay::new(CPU_HZ.Hz()), NoOpLogger);

    if bring_up(&mut i3c).is_err() {
        i3c.deinit();
    }

    loop {
        cortex_m::asm::wfi();
    }
}
