//! Two-wire master controller abstraction
//!
//! Provides the register-level operations of a master-mode I2C (TWI)
//! peripheral. The bus engine calls exactly one of these per phase, so
//! implementations should be thin wrappers over the controller registers.

use core::task::{Context, Poll};

/// Snapshot of the controller status flags relevant to the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStatus {
    /// The last address or data byte was not acknowledged
    pub rx_nack: bool,
    /// Arbitration was lost to another master
    pub arbitration_lost: bool,
    /// The controller detected an illegal bus condition
    pub bus_error: bool,
}

/// Master-mode two-wire controller
///
/// Addresses passed to [`start`](TwiMaster::start) and
/// [`restart`](TwiMaster::restart) are full address bytes: the 7-bit slave
/// address shifted left once, with the read bit in bit 0.
///
/// After `start`, `restart`, `write` and `receive_next` the controller
/// raises its master interrupt once the byte has been clocked (and, for
/// reads, once the next data byte has arrived). `stop` and `nack_stop`
/// release the bus and raise nothing.
pub trait TwiMaster {
    /// Apply bus timing and enable the controller in master mode
    fn configure(&mut self, config: &I2cConfig);

    /// Issue a START and send the address byte
    fn start(&mut self, address: u8);

    /// NACK the current byte, issue a repeated START and send the address byte
    fn restart(&mut self, address: u8);

    /// Send one data byte
    fn write(&mut self, byte: u8);

    /// Fetch the data byte the controller has received
    fn read(&mut self) -> u8;

    /// ACK the current byte and clock in the next one
    fn receive_next(&mut self);

    /// Issue a STOP
    fn stop(&mut self);

    /// NACK the current byte, then issue a STOP
    fn nack_stop(&mut self);

    /// Read the status flags
    fn status(&self) -> BusStatus;

    /// Clear the read/write interrupt flags
    fn acknowledge_interrupt(&mut self);

    /// Clear the arbitration-lost flag
    fn clear_arbitration_lost(&mut self);

    /// Clear a bus error, force the bus state to idle and flush the controller
    fn recover(&mut self);

    /// Flush the controller, force the bus state to idle and drop pending flags
    fn reset(&mut self);

    /// Enable the master read/write interrupts
    fn enable_interrupts(&mut self);

    /// Disable the master read/write interrupts
    fn disable_interrupts(&mut self);

    /// Poll for a pending master interrupt
    ///
    /// Returns `Ready` while the controller has an unserviced event.
    /// Otherwise registers the waker, which the chip's interrupt handler
    /// must wake when the next event is raised.
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<()>;
}

impl<T: TwiMaster + ?Sized> TwiMaster for &mut T {
    fn configure(&mut self, config: &I2cConfig) {
        T::configure(self, config)
    }

    fn start(&mut self, address: u8) {
        T::start(self, address)
    }

    fn restart(&mut self, address: u8) {
        T::restart(self, address)
    }

    fn write(&mut self, byte: u8) {
        T::write(self, byte)
    }

    fn read(&mut self) -> u8 {
        T::read(self)
    }

    fn receive_next(&mut self) {
        T::receive_next(self)
    }

    fn stop(&mut self) {
        T::stop(self)
    }

    fn nack_stop(&mut self) {
        T::nack_stop(self)
    }

    fn status(&self) -> BusStatus {
        T::status(self)
    }

    fn acknowledge_interrupt(&mut self) {
        T::acknowledge_interrupt(self)
    }

    fn clear_arbitration_lost(&mut self) {
        T::clear_arbitration_lost(self)
    }

    fn recover(&mut self) {
        T::recover(self)
    }

    fn reset(&mut self) {
        T::reset(self)
    }

    fn enable_interrupts(&mut self) {
        T::enable_interrupts(self)
    }

    fn disable_interrupts(&mut self) {
        T::disable_interrupts(self)
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        T::poll_event(self, cx)
    }
}

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            frequency: 100_000, // 100kHz standard mode
        }
    }
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self { frequency: 100_000 };

    /// Fast mode (400 kHz)
    pub const FAST: Self = Self { frequency: 400_000 };

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: Self = Self {
        frequency: 1_000_000,
    };

    /// Master baud register value for a peripheral clock of `clock_hz`
    ///
    /// `f_scl = clock / (10 + 2 * baud)`, rise time neglected. Saturates at
    /// both ends of the 8-bit register.
    pub fn baud(&self, clock_hz: u32) -> u8 {
        if self.frequency == 0 {
            return u8::MAX;
        }
        let half_period = clock_hz / (2 * self.frequency);
        half_period.saturating_sub(5).min(u8::MAX as u32) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_standard_mode() {
        // 5 MHz peripheral clock at 100 kHz
        assert_eq!(I2cConfig::STANDARD.baud(5_000_000), 20);
    }

    #[test]
    fn test_baud_saturates() {
        // Too slow a clock for fast mode plus: register bottoms out
        assert_eq!(I2cConfig::FAST_PLUS.baud(5_000_000), 0);
        // Very fast clock at standard mode: register tops out
        assert_eq!(I2cConfig::STANDARD.baud(200_000_000), u8::MAX);
    }

    #[test]
    fn test_default_is_standard() {
        assert_eq!(I2cConfig::default(), I2cConfig::STANDARD);
    }
}
