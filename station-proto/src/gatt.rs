//! GATT service and characteristic identifiers exposed by a sensor station
//!
//! All station services share the 128-bit base `dea07cc4-d084-11ed-a760-325096b39fXX`
//! and differ only in the last byte. Characteristics use 16-bit Bluetooth SIG
//! assigned numbers; they are matched by their "short id", the four hex digits
//! that distinguish them from the Bluetooth base UUID.

use uuid::Uuid;

/// Station information: DIP switch id, unlocked flag, battery status
pub const INFO_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f47);

/// Holds the "sensor data has been read" flag
pub const DATA_READ_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f48);

pub const EARTH_HUMIDITY_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f49);
pub const AIR_HUMIDITY_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f4a);
pub const AIR_PRESSURE_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f4b);
pub const TEMPERATURE_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f4c);
pub const AIR_QUALITY_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f4d);
pub const LIGHT_INTENSITY_SERVICE: Uuid = Uuid::from_u128(0xdea07cc4_d084_11ed_a760_325096b39f4e);

/// DIP switch identifier on the info service, alarm code on a sensor service.
/// The service it is accessed under decides which one is meant.
pub const IDENTIFIER: &str = "2a9a";
pub const ALARM: &str = IDENTIFIER;

/// Boolean flag: "unlocked" on the info service, "data read" on the data read service
pub const FLAG: &str = "2ae2";

/// Battery Level Status block on the info service
pub const BATTERY_STATUS: &str = "2bed";

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`
const BLUETOOTH_BASE: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Extracts the four hex digits identifying a characteristic type.
///
/// Full 32-digit identifiers yield characters 4..8 of the given string;
/// anything else (already short, or not ASCII at those positions) is
/// returned unchanged.
pub fn short_id(id: &str) -> &str {
    if id.replace('-', "").len() == 32 {
        id.get(4..8).unwrap_or(id)
    } else {
        id
    }
}

/// Short id of a parsed UUID, always lowercase
pub fn short_id_of(uuid: &Uuid) -> String {
    short_id(&uuid.hyphenated().to_string()).to_string()
}

/// Expands a 16-bit assigned number onto the Bluetooth base UUID
pub const fn sig_uuid(assigned: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE | ((assigned as u128) << 96))
}
