//! Board-agnostic two-wire master engine
//!
//! This crate drives one I2C master transaction at a time on a controller
//! implementing [`twine_hal::TwiMaster`]:
//!
//! - Bus transaction engine: one state transition per controller event
//! - Session manager: exclusive open / start / close access to the bus
//! - Continuation protocol: completion callbacks that pick the next phase
//! - Command- and address-style convenience transfers
//! - An `embedded-hal-async` I2C implementation on top of the engine
//!
//! # Flow
//!
//! ```text
//! caller ──open──▶ Session ──start──▶ engine (address phase)
//!                    │                    │ one transition per event
//!                    │                    ▼
//!                    │          data complete ──▶ callback ──▶ Directive
//!                    └──close (drives events until not busy) ──▶ result
//! ```

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

// Must stay first so the other modules see its macros
mod fmt;

pub mod device;
pub mod engine;
pub mod error;
pub mod ops;
pub mod session;
pub mod transfer;

pub use device::I2cDevice;
pub use engine::{Direction, State};
pub use error::Error;
pub use session::{I2cBus, Session};
pub use transfer::{Block, Callback, Completion, Directive, Staging};
