//! MCP3008 10-bit SPI ADC, single-ended read.

use rppal::spi::Spi;

use crate::error::{HwError, Result};

pub struct Mcp3008 {
    spi: Spi,
}

impl Mcp3008 {
    pub fn new(spi: Spi) -> Self {
        Self { spi }
    }

    /// Read one single-ended channel (0..=7).
    pub fn read_channel(&mut self, channel: u8) -> Result<u16> {
        if channel > 7 {
            return Err(HwError::Spi(format!("invalid MCP3008 channel {channel}")));
        }
        // Start bit, single-ended mode + channel, one clock byte for the
        // 10-bit result.
        let tx = [0x01, (0x08 | channel) << 4, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok((u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]))
    }
}
