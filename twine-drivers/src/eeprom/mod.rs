//! Serial EEPROM driver
//!
//! Drives 24xx-series I2C EEPROMs through an [`I2cBus`]. Reads are plain
//! random or sequential reads. Writes come in three flavours:
//!
//! - [`Eeprom::write_block`]: one unclipped write transaction. A range
//!   that crosses a page boundary wraps to the start of the page on the
//!   device.
//! - [`Eeprom::write_page`]: clipped to the end of the page containing the
//!   start address; returns how many bytes were written.
//! - [`Eeprom::write_any`]: any length at any address, cut into
//!   page-bounded writes by [`PagePlan`].
//!
//! Every write is followed by the part's write-cycle delay. The device
//! does not acknowledge its address until the cycle has elapsed.

pub mod config;
pub mod planner;
pub mod signature;

pub use config::{Addressing, EepromConfig};
pub use planner::{PagePlan, Segment};
pub use signature::{ensure_signature, BootState, SIGNATURE, SIGNATURE_ADDRESS};

use core::mem;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use twine_core::{Error, I2cBus};
use twine_hal::TwiMaster;

/// EEPROM driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// The bus transaction failed
    Bus(Error),
    /// The range runs past the end of the device
    OutOfRange,
    /// The geometry in [`EepromConfig`] is unusable
    InvalidConfig,
}

impl From<Error> for EepromError {
    fn from(error: Error) -> Self {
        EepromError::Bus(error)
    }
}

/// A serial EEPROM on a shared bus
pub struct Eeprom<'a, M: RawMutex, T: TwiMaster, D: DelayNs> {
    bus: &'a I2cBus<M, T>,
    delay: D,
    config: EepromConfig,
}

impl<'a, M: RawMutex, T: TwiMaster, D: DelayNs> Eeprom<'a, M, T, D> {
    /// Create a driver for the part described by `config`
    pub fn new(
        bus: &'a I2cBus<M, T>,
        delay: D,
        config: EepromConfig,
    ) -> Result<Self, EepromError> {
        config.validate()?;
        Ok(Self { bus, delay, config })
    }

    /// Geometry this driver was created with
    pub fn config(&self) -> &EepromConfig {
        &self.config
    }

    /// Read one byte
    pub async fn read_u8(&mut self, address: u32) -> Result<u8, EepromError> {
        let mut buf = [0u8; 1];
        self.read_block(address, &mut buf).await?;
        Ok(buf[0])
    }

    /// Read a big-endian word
    pub async fn read_u16(&mut self, address: u32) -> Result<u16, EepromError> {
        let mut buf = [0u8; 2];
        self.read_block(address, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Sequential read of `buf.len()` bytes starting at `address`
    pub async fn read_block(&mut self, address: u32, buf: &mut [u8]) -> Result<(), EepromError> {
        self.check(address, buf.len())?;

        // Block-select parts only auto-increment within a 256-byte block
        let mut address = address;
        let mut rest = buf;
        while !rest.is_empty() {
            let len = rest.len().min(self.span(address));
            let (head, tail) = mem::take(&mut rest).split_at_mut(len);
            let (slave, word, word_len) = self.target(address);
            self.bus.read_prefixed(slave, &word[..word_len], head).await?;
            address += len as u32;
            rest = tail;
        }
        Ok(())
    }

    /// Write one byte, then wait out the write cycle
    pub async fn write_u8(&mut self, address: u32, value: u8) -> Result<(), EepromError> {
        self.write_block(address, &[value]).await
    }

    /// Write a big-endian word
    ///
    /// Like [`write_block`](Self::write_block), the two bytes are not
    /// clipped: a word at the last byte of a page wraps on the device.
    pub async fn write_u16(&mut self, address: u32, value: u16) -> Result<(), EepromError> {
        self.write_block(address, &value.to_be_bytes()).await
    }

    /// Write `data` in a single transaction, then wait out the write cycle
    pub async fn write_block(&mut self, address: u32, data: &[u8]) -> Result<(), EepromError> {
        self.check(address, data.len())?;
        let (slave, word, word_len) = self.target(address);
        self.bus.write_prefixed(slave, &word[..word_len], data).await?;
        self.delay.delay_ms(self.config.write_cycle_ms).await;
        Ok(())
    }

    /// Write as much of `data` as fits in the page containing `address`
    ///
    /// Returns the number of bytes written; the caller writes the rest.
    pub async fn write_page(&mut self, address: u32, data: &[u8]) -> Result<usize, EepromError> {
        self.check(address, 0)?;
        let page_end = self.config.page_start(address) + self.config.page_size as u32;
        let len = data.len().min((page_end - address) as usize);
        self.write_block(address, &data[..len]).await?;
        Ok(len)
    }

    /// Write `data` at `address` regardless of page boundaries
    pub async fn write_any(&mut self, address: u32, data: &[u8]) -> Result<(), EepromError> {
        self.check(address, data.len())?;
        for segment in PagePlan::new(address, data.len(), self.config.page_size) {
            trace!(
                "eeprom: page write {=u32:#x} len {}",
                segment.address,
                segment.len
            );
            let chunk = &data[segment.offset..segment.offset + segment.len];
            self.write_page(segment.address, chunk).await?;
        }
        Ok(())
    }

    fn check(&self, address: u32, len: usize) -> Result<(), EepromError> {
        let end = address as u64 + len as u64;
        if end > self.config.capacity as u64 {
            return Err(EepromError::OutOfRange);
        }
        Ok(())
    }

    // Bytes a single sequential read can cover from `address`
    fn span(&self, address: u32) -> usize {
        match self.config.addressing {
            Addressing::TwoByte => (self.config.capacity - address) as usize,
            Addressing::BlockSelect => (0x100 - (address & 0xFF)) as usize,
        }
    }

    // Slave address and word-address bytes for `address`
    fn target(&self, address: u32) -> (u8, [u8; 2], usize) {
        let base = self.config.base_address;
        match self.config.addressing {
            Addressing::TwoByte => (base, (address as u16).to_be_bytes(), 2),
            Addressing::BlockSelect => {
                let block = ((address >> 8) & 0x07) as u8;
                (base | block, [address as u8, 0], 1)
            }
        }
    }
}
