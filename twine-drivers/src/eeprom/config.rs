//! EEPROM geometry

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::EepromError;

/// Largest page any supported part buffers
pub const MAX_PAGE_SIZE: u16 = 256;

/// How a memory address is split between slave address and word address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Addressing {
    /// Fixed slave address, two word-address bytes (big-endian)
    TwoByte,
    /// Address bits 8..=10 in the slave address, one word-address byte
    BlockSelect,
}

impl Addressing {
    /// Largest capacity the addressing mode can reach, in bytes
    pub const fn max_capacity(&self) -> u32 {
        match self {
            Addressing::TwoByte => 0x1_0000,
            Addressing::BlockSelect => 0x800,
        }
    }
}

/// EEPROM part description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EepromConfig {
    /// 7-bit slave address with all chip-select and block bits clear
    pub base_address: u8,
    /// Write page size in bytes
    pub page_size: u16,
    /// Total size in bytes
    pub capacity: u32,
    /// Internal write cycle the part needs after every write (ms)
    pub write_cycle_ms: u32,
    /// Address layout on the wire
    pub addressing: Addressing,
}

impl EepromConfig {
    /// Microchip 24FC512: 64 KiB, 128-byte pages
    pub const D24FC512: Self = Self {
        base_address: 0x50,
        page_size: 128,
        capacity: 0x1_0000,
        write_cycle_ms: 5,
        addressing: Addressing::TwoByte,
    };

    /// 24C16: 2 KiB in eight 256-byte blocks, 16-byte pages
    pub const D24C16: Self = Self {
        base_address: 0x50,
        page_size: 16,
        capacity: 0x800,
        write_cycle_ms: 5,
        addressing: Addressing::BlockSelect,
    };

    /// Check that the geometry is usable
    pub fn validate(&self) -> Result<(), EepromError> {
        if !self.page_size.is_power_of_two() || self.page_size > MAX_PAGE_SIZE {
            return Err(EepromError::InvalidConfig);
        }
        if self.capacity < self.page_size as u32
            || self.capacity > self.addressing.max_capacity()
        {
            return Err(EepromError::InvalidConfig);
        }
        if self.base_address > 0x7F {
            return Err(EepromError::InvalidConfig);
        }
        if self.addressing == Addressing::BlockSelect {
            // Block bits the part uses must be free in the base address
            let blocks = self.capacity.div_ceil(0x100);
            let mask = (blocks.next_power_of_two() - 1) as u8;
            if self.base_address & mask != 0 {
                return Err(EepromError::InvalidConfig);
            }
        }
        Ok(())
    }

    /// First address of the page containing `address`
    pub fn page_start(&self, address: u32) -> u32 {
        address & !(self.page_size as u32 - 1)
    }
}

impl Default for EepromConfig {
    fn default() -> Self {
        Self::D24FC512
    }
}
