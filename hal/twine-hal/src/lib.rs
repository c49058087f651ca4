//! Twine Hardware Abstraction Layer
//!
//! This crate defines the controller-level trait that chip-specific HALs
//! implement so the bus engine in `twine-core` can drive them. The engine
//! never touches registers itself; every bus primitive it needs goes
//! through [`i2c::TwiMaster`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  twine-drivers (EEPROM, paged writes)   │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  twine-core (engine, sessions)          │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  twine-hal (this crate - traits)        │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip HAL     │       │  sim (host)   │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`i2c::TwiMaster`] - Master-mode two-wire controller

#![no_std]
#![deny(unsafe_code)]

pub mod i2c;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-export key items at crate root for convenience
pub use i2c::{BusStatus, I2cConfig, TwiMaster};
