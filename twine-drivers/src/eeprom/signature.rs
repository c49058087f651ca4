//! First-boot detection
//!
//! A fixed 16-bit marker at the bottom of the EEPROM tells a device that
//! has already been initialised apart from a blank (all `0xFF`) or foreign
//! part.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use twine_hal::TwiMaster;

use super::{Eeprom, EepromError};

/// Marker value stored at [`SIGNATURE_ADDRESS`]
pub const SIGNATURE: u16 = 0xAA55;

/// Where the marker lives (two bytes, big-endian)
pub const SIGNATURE_ADDRESS: u32 = 0x0000;

/// Outcome of [`ensure_signature`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootState {
    /// The marker was already present; stored settings are valid
    Existing,
    /// The marker was missing and has just been written; the caller
    /// should write its defaults
    Initialized,
}

/// Check for the boot marker and write it if it is missing
pub async fn ensure_signature<M, T, D>(
    eeprom: &mut Eeprom<'_, M, T, D>,
) -> Result<BootState, EepromError>
where
    M: RawMutex,
    T: TwiMaster,
    D: DelayNs,
{
    let stored = eeprom.read_u16(SIGNATURE_ADDRESS).await?;
    if stored == SIGNATURE {
        debug!("eeprom: signature present");
        return Ok(BootState::Existing);
    }

    debug!("eeprom: signature missing (found {=u16:#x}), writing", stored);
    eeprom.write_u16(SIGNATURE_ADDRESS, SIGNATURE).await?;
    Ok(BootState::Initialized)
}
