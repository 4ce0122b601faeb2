//! Canonical cluster and DP command identifiers.
//!
//! The transport layer normalizes vendor spellings to these numeric ids before
//! frames reach the engine.

/// Vendor DataPoint tunnel cluster.
pub const TUYA_DP: u16 = 0xEF00;

/// ZCL Basic cluster.
pub const BASIC: u16 = 0x0000;
/// ZCL Power Configuration cluster.
pub const POWER_CONFIG: u16 = 0x0001;
/// ZCL On/Off cluster.
pub const ON_OFF: u16 = 0x0006;
/// ZCL Time cluster.
pub const TIME: u16 = 0x000A;
/// ZCL Illuminance Measurement cluster.
pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
/// ZCL Temperature Measurement cluster.
pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
/// ZCL Relative Humidity Measurement cluster.
pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
/// ZCL Occupancy Sensing cluster.
pub const OCCUPANCY_SENSING: u16 = 0x0406;
/// ZCL IAS Zone cluster.
pub const IAS_ZONE: u16 = 0x0500;
/// ZCL Thermostat cluster.
pub const THERMOSTAT: u16 = 0x0201;
/// ZCL Electrical Measurement cluster.
pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;

/// DP command ids carried on [`TUYA_DP`].
pub mod command {
    pub const DATA_REQUEST: u8 = 0x00;
    pub const DATA_RESPONSE: u8 = 0x01;
    pub const DATA_REPORT: u8 = 0x02;
    pub const DATA_QUERY: u8 = 0x03;
    pub const MCU_VERSION_REQUEST: u8 = 0x10;
    pub const MCU_SYNC_TIME: u8 = 0x24;
}

/// Returns a human-readable name for a cluster id.
pub fn cluster_name(id: u16) -> &'static str {
    match id {
        TUYA_DP => "TUYA_DP",
        BASIC => "BASIC",
        POWER_CONFIG => "POWER_CONFIG",
        ON_OFF => "ON_OFF",
        TIME => "TIME",
        ILLUMINANCE_MEASUREMENT => "ILLUMINANCE",
        TEMPERATURE_MEASUREMENT => "TEMPERATURE",
        HUMIDITY_MEASUREMENT => "HUMIDITY",
        OCCUPANCY_SENSING => "OCCUPANCY",
        IAS_ZONE => "IAS_ZONE",
        THERMOSTAT => "THERMOSTAT",
        ELECTRICAL_MEASUREMENT => "ELECTRICAL",
        0xFC00..=0xFFFF => "MANUFACTURER",
        _ => "ZCL",
    }
}

/// Returns true if frames on this cluster carry DataPoint records.
pub fn is_datapoint_cluster(id: u16) -> bool {
    id == TUYA_DP
}
