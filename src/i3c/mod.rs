// Licensed under the Apache-2.0 license

//! STM32C5 I3C driver module.
//!
//! Controller and target roles share one handle, [`I3c`]. Frames are built
//! by the [`descriptor`] helpers, driven in polling, interrupt or DMA mode,
//! and completions are reported through a bounded event queue.

pub mod ccc;
pub mod common;
pub mod controller;
pub mod descriptor;
pub mod driver;
pub mod i2c_controller;
#[cfg(test)]
pub(crate) mod mock;
pub mod registers;
pub mod system_setup;
pub mod target;
pub mod timing;
pub mod traits;

pub use common::{
    ControllerConfig, ControllerConfigBuilder, DeviceConfig, Error, ErrorCode, I3cEvent, I3cMode,
    I3cState, TargetConfig, TargetConfigBuilder,
};
pub use controller::{DaaOption, DeviceKind, Pattern};
pub use descriptor::{CccDescriptor, PrivateDescriptor, TransferOption, Xfer};
pub use driver::I3c;
pub use i2c_controller::LegacyI2c;
pub use registers::{I3c1, Mmio};
pub use traits::I3cDma;
