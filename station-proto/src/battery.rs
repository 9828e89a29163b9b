//! Battery Level Status (0x2BED) as sent by the stations
//!
//! Layout follows the Bluetooth SIG characteristic: a flags byte, a 16 bit
//! power state, an optional 16 bit identifier, then the optional battery
//! level.

use crate::CodecError;
use crate::field::{ScalarSpec, decode_bools};

const IDENTIFIER_PRESENT: usize = 0;
const BATTERY_LEVEL_PRESENT: usize = 1;

/// Power state bits 1-2 (wired) and 3-4 (wireless) read `0b01` when connected
const WIRED_POWER_SHIFT: u16 = 1;
const WIRELESS_POWER_SHIFT: u16 = 3;
const POWER_CONNECTED: u16 = 0b01;

/// Battery charge in percent.
///
/// Returns `None` when the station neither reports a level nor runs on
/// external power. Stations on external power without a level count as full.
pub fn battery_level(raw: &[u8]) -> Result<Option<u8>, CodecError> {
    let flags = decode_bools(raw.get(..1).unwrap_or_default(), 1)?;
    if flags.is_empty() {
        return Err(CodecError::Decode("empty battery status".to_string()));
    }
    let power_state = match raw.get(1..3) {
        Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
        None => {
            return Err(CodecError::Decode(format!(
                "battery status too short ({} bytes)",
                raw.len()
            )));
        }
    };

    if flags[BATTERY_LEVEL_PRESENT] {
        let offset = 3 + if flags[IDENTIFIER_PRESENT] { 2 } else { 0 };
        let level = raw.get(offset..offset + 1).ok_or_else(|| {
            CodecError::Decode(format!("battery level missing at offset {offset}"))
        })?;
        let spec = ScalarSpec::bounded(1, 0, 0, 1, Some(0.0), Some(100.0))?;
        return Ok(Some(spec.decode(level)? as u8));
    }

    let wired = (power_state >> WIRED_POWER_SHIFT) & 0b11;
    let wireless = (power_state >> WIRELESS_POWER_SHIFT) & 0b11;
    if wired == POWER_CONNECTED || wireless == POWER_CONNECTED {
        return Ok(Some(100));
    }
    Ok(None)
}
