//! Mi Band Protocol
//!
//! Identifiers and payload decoders for the band's proprietary GATT service.
//! Every decoder is a pure function of one byte buffer.

use crate::domain::error::{BandError, BandResult};
use crate::domain::models::{
    BatteryInfo, BatteryStatus, ConnectionParameters, DeviceInfo, StepCount, Version,
};
use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use tracing::trace;

/// Primary service advertised by the band
pub const SERVICE_UUID16: u16 = 0xFEE0;

/// Fixed payload sizes
pub const BATTERY_INFO_LEN: usize = 10;
pub const DEVICE_INFO_LEN: usize = 16;
pub const CONNECTION_PARAMETERS_LEN: usize = 12;
pub const STEPS_LEN: usize = 4;

/// Scale factors applied to raw link-layer fields
pub mod scale {
    /// Connection interval unit
    pub const CONNECTION_INTERVAL_MS: f64 = 1.25;
    /// Supervision timeout unit
    pub const SUPERVISION_TIMEOUT_MS: u32 = 10;
    /// Advertising interval unit
    pub const ADVERTISING_INTERVAL_MS: f64 = 0.625;
}

/// Years between the Unix epoch and the band's year 0
const BASE_YEAR_OFFSET: u32 = 30;

/// Expand a 16-bit assigned number into the full Bluetooth base UUID string
pub fn expand_uuid16(short: u16) -> String {
    format!("0000{:04x}-0000-1000-8000-00805f9b34fb", short)
}

fn ensure_len(reading: &'static str, bytes: &[u8], expected: usize) -> BandResult<()> {
    if bytes.len() < expected {
        return Err(BandError::MalformedPayload {
            reading,
            expected,
            actual: bytes.len(),
        });
    }
    trace!("{} payload: {:02X?}", reading, bytes);
    Ok(())
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Decode the 10-byte battery payload
///
/// ```text
/// [0]    : Level (percent)
/// [1-6]  : Last charge: year - 2000, month (0-based), day, hour, minute, second
/// [7-8]  : Charge cycles (u16 little-endian)
/// [9]    : Status code
/// ```
pub fn decode_battery_info(bytes: &[u8]) -> BandResult<BatteryInfo> {
    ensure_len("battery info", bytes, BATTERY_INFO_LEN)?;

    Ok(BatteryInfo {
        level: bytes[0],
        status: BatteryStatus::from_code(bytes[9]),
        charge_cycles: read_u16_le(bytes, 7),
        last_charge: last_charge_at(&bytes[1..7]),
    })
}

/// Fields outside their calendar range carry into the next larger unit, so
/// day 0 is the last day of the previous month and month 12 is January of
/// the following year. A band that was never charged reports all zeros.
fn last_charge_at(fields: &[u8]) -> NaiveDateTime {
    let months = (BASE_YEAR_OFFSET + u32::from(fields[0])) * 12 + u32::from(fields[1]);
    let seconds =
        i64::from(fields[3]) * 3600 + i64::from(fields[4]) * 60 + i64::from(fields[5]);

    DateTime::<Utc>::UNIX_EPOCH.naive_utc() + Months::new(months)
        + Duration::days(i64::from(fields[2]) - 1)
        + Duration::seconds(seconds)
}

/// Decode the 16-byte device info payload
///
/// ```text
/// [8-11]  : Profile version, build..major
/// [12-15] : Firmware version, build..major
/// ```
pub fn decode_device_info(bytes: &[u8]) -> BandResult<DeviceInfo> {
    ensure_len("device info", bytes, DEVICE_INFO_LEN)?;

    Ok(DeviceInfo {
        firmware_version: version_at(bytes, 12),
        profile_version: version_at(bytes, 8),
    })
}

fn version_at(bytes: &[u8], offset: usize) -> Version {
    Version {
        major: bytes[offset + 3],
        minor: bytes[offset + 2],
        patch: bytes[offset + 1],
        build: bytes[offset],
    }
}

/// Decode the 12-byte connection parameter payload: six u16 little-endian
/// fields (min interval, max interval, latency, timeout, interval,
/// advertising interval).
pub fn decode_connection_parameters(bytes: &[u8]) -> BandResult<ConnectionParameters> {
    ensure_len("connection parameters", bytes, CONNECTION_PARAMETERS_LEN)?;

    let min_interval = read_u16_le(bytes, 0);
    let max_interval = read_u16_le(bytes, 2);
    let latency = read_u16_le(bytes, 4);
    let timeout = read_u16_le(bytes, 6);
    let interval = read_u16_le(bytes, 8);
    let advertising = read_u16_le(bytes, 10);

    Ok(ConnectionParameters {
        min_interval_ms: f64::from(min_interval) * scale::CONNECTION_INTERVAL_MS,
        max_interval_ms: f64::from(max_interval) * scale::CONNECTION_INTERVAL_MS,
        latency,
        supervision_timeout_ms: u32::from(timeout) * scale::SUPERVISION_TIMEOUT_MS,
        connection_interval_ms: f64::from(interval) * scale::CONNECTION_INTERVAL_MS,
        advertising_interval_ms: f64::from(advertising) * scale::ADVERTISING_INTERVAL_MS,
    })
}

/// Decode the 4-byte step counter (u32 little-endian)
pub fn decode_steps(bytes: &[u8]) -> BandResult<StepCount> {
    ensure_len("step count", bytes, STEPS_LEN)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CharacteristicId;

    fn at(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn battery_payload(status: u8) -> [u8; 10] {
        // 87%, 2016-03-14 09:26:53, 300 cycles
        [87, 16, 2, 14, 9, 26, 53, 0x2C, 0x01, status]
    }

    #[test]
    fn test_expand_uuid16() {
        assert_eq!(
            expand_uuid16(SERVICE_UUID16),
            "0000fee0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            expand_uuid16(CharacteristicId::Steps.uuid16()),
            "0000ff06-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_decode_battery_info() {
        let info = decode_battery_info(&battery_payload(2)).unwrap();
        assert_eq!(info.level, 87);
        assert_eq!(info.charge_cycles, 300);
        assert_eq!(info.status, BatteryStatus::Charging);
        assert_eq!(info.status_code(), 2);
        assert_eq!(info.status_text(), "Battery charging");

        assert_eq!(info.last_charge, at("2016-03-14 09:26:53"));
    }

    #[test]
    fn test_decode_battery_status_range() {
        let labels: Vec<&str> = (0..=4)
            .map(|code| decode_battery_info(&battery_payload(code)).unwrap().status_text())
            .collect();
        assert_eq!(
            labels,
            vec![
                "Unknown",
                "Battery Low",
                "Battery charging",
                "Battery full (charging)",
                "Not charging"
            ]
        );

        let info = decode_battery_info(&battery_payload(5)).unwrap();
        assert_eq!(info.status, BatteryStatus::Unrecognized(5));
        assert_eq!(info.status_text(), "Unrecognized");
        assert_eq!(info.status_code(), 5);
    }

    #[test]
    fn test_decode_battery_charge_cycles_high_byte() {
        let mut payload = battery_payload(4);
        payload[7] = 0x34;
        payload[8] = 0x12;
        assert_eq!(decode_battery_info(&payload).unwrap().charge_cycles, 0x1234);
    }

    #[test]
    fn test_decode_battery_never_charged() {
        let info = decode_battery_info(&[80, 0, 0, 0, 0, 0, 0, 3, 0, 4]).unwrap();
        assert_eq!(info.level, 80);
        assert_eq!(info.charge_cycles, 3);
        assert_eq!(info.status, BatteryStatus::NotCharging);
        assert_eq!(info.last_charge, at("1999-12-31 00:00:00"));
    }

    #[test]
    fn test_decode_battery_timestamp_rolls_over() {
        let info = decode_battery_info(&[80, 17, 12, 1, 0, 0, 0, 3, 0, 4]).unwrap();
        assert_eq!(info.last_charge, at("2018-01-01 00:00:00"));

        // February 30th of a leap year
        let mut payload = battery_payload(0);
        payload[2] = 1;
        payload[3] = 30;
        assert_eq!(
            decode_battery_info(&payload).unwrap().last_charge,
            at("2016-03-01 09:26:53")
        );

        // 24:60:60 carries into the next day
        let payload = [50, 17, 11, 31, 24, 60, 60, 0, 0, 1];
        assert_eq!(
            decode_battery_info(&payload).unwrap().last_charge,
            at("2018-01-01 01:01:00")
        );
    }

    #[test]
    fn test_decode_battery_short_payload() {
        assert_eq!(
            decode_battery_info(&[1, 2, 3]),
            Err(BandError::MalformedPayload {
                reading: "battery info",
                expected: 10,
                actual: 3,
            })
        );
    }

    #[test]
    fn test_decode_device_info() {
        let mut payload = [0u8; 16];
        payload[8..12].copy_from_slice(&[8, 7, 6, 5]);
        payload[12..16].copy_from_slice(&[1, 2, 3, 4]);

        let info = decode_device_info(&payload).unwrap();
        assert_eq!(info.firmware_version.to_string(), "4.3.2.1");
        assert_eq!(info.profile_version.to_string(), "5.6.7.8");
    }

    #[test]
    fn test_decode_device_info_short_payload() {
        assert!(matches!(
            decode_device_info(&[0u8; 15]),
            Err(BandError::MalformedPayload { expected: 16, actual: 15, .. })
        ));
    }

    #[test]
    fn test_decode_connection_parameters() {
        let payload = [
            0x27, 0x00, // min 39
            0x31, 0x00, // max 49
            0x00, 0x00, // latency 0
            0xF4, 0x01, // timeout 500
            0x27, 0x00, // interval 39
            0xA0, 0x00, // advertising 160
        ];
        let params = decode_connection_parameters(&payload).unwrap();
        assert_eq!(params.min_interval_ms, 48.75);
        assert_eq!(params.max_interval_ms, 61.25);
        assert_eq!(params.latency, 0);
        assert_eq!(params.supervision_timeout_ms, 5000);
        assert_eq!(params.connection_interval_ms, 48.75);
        assert_eq!(params.advertising_interval_ms, 100.0);
    }

    #[test]
    fn test_connection_parameter_scaling_is_exact() {
        for raw in [0u16, 1, 7, 0x0100, 0x1234, 0x7FFF, u16::MAX] {
            let [lo, hi] = raw.to_le_bytes();
            let payload = [lo, hi, 0, 0, 3, 0, 0, 0, 0, 0, lo, hi];
            let params = decode_connection_parameters(&payload).unwrap();
            assert_eq!(params.min_interval_ms, f64::from(raw) * 1.25);
            assert_eq!(params.advertising_interval_ms, f64::from(raw) * 0.625);
            assert_eq!(params.latency, 3);
        }
    }

    #[test]
    fn test_decode_steps() {
        assert_eq!(decode_steps(&[1, 0, 0, 0]).unwrap(), 1);
        assert_eq!(decode_steps(&[0, 1, 0, 0]).unwrap(), 256);
        assert_eq!(decode_steps(&[255, 255, 255, 255]).unwrap(), 4_294_967_295);
        assert_eq!(decode_steps(&[0x10, 0x27, 0, 0, 0xAA]).unwrap(), 10_000);
    }

    #[test]
    fn test_decode_steps_short_payload() {
        assert_eq!(
            decode_steps(&[1, 2]),
            Err(BandError::MalformedPayload {
                reading: "step count",
                expected: 4,
                actual: 2,
            })
        );
    }
}
