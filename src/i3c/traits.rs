// Licensed under the Apache-2.0 license

//! Seam to the DMA engine that feeds the I3C FIFOs.

use super::common::Error;

/// DMA channels serving one I3C instance.
///
/// The driver calls the `start_*` methods after programming the frame and
/// before enabling the DMA requests in the peripheral. Completion is
/// detected on the I3C side (frame complete), so the channels only need to
/// move data; a channel failure is reported back with
/// [`I3c::dma_error`](super::I3c::dma_error).
///
/// Implementations keep the buffer addresses past the call. The driver
/// holds the borrow of every buffer until the transfer completes or is
/// aborted, and calls [`I3cDma::stop`] on every early exit.
pub trait I3cDma {
    /// Control words to the C-FIFO (`CR` register).
    fn start_control(&mut self, words: &[u32]) -> Result<(), Error>;

    /// Bytes to the TX FIFO (`TDR` register).
    fn start_tx(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Bytes from the RX FIFO (`RDR` register).
    fn start_rx(&mut self, buffer: &mut [u8]) -> Result<(), Error>;

    /// Stop every channel.
    fn stop(&mut self);
}
