//! Device drivers built on the twine bus engine
//!
//! - Serial EEPROMs (24FC512, 24C16 and other 24xx parts): byte, word and
//!   block access, page-clipped and page-aware writes, boot signature

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

// Must stay first so the other modules see its macros
mod fmt;

pub mod eeprom;
