use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{DurationSecondsWithFrac, serde_as, skip_serializing_none};

/// * [gps_fix_t.mode](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/include/gps.h?ref_type=tags#L181)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum FixMode {
    NotSeen = 0,
    NoFix = 1,
    Fix2D = 2,
    Fix3D = 3,
}

/// * [gps_fix_t.status](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/include/gps.h?ref_type=tags#L192)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum FixStatus {
    /// Unknown status
    Unknown = 0,
    Gps = 1,
    /// with DGPS
    DGps = 2,
    /// with RTK Fixed
    RTKFixed = 3,
    /// with RTK Float
    RTKFloat = 4,
    /// with dead reckoning
    DR = 5,
    /// with GNSS + dead reckoning
    GnssDR = 6,
    /// time only (surveyed in, manual)
    Time = 7,
    /// simulated
    Simulated = 8,
    /// Precise Positioning Service (PPS)
    PpsFix = 9,
}

/// Decodes a wire integer into one of the `repr` enums above
///
/// Unknown codes yield `None` rather than an error; newer daemons add codes.
pub(crate) fn from_code<T: serde::de::DeserializeOwned>(code: Option<i64>) -> Option<T> {
    code.and_then(|code| serde_json::from_value(serde_json::Value::from(code)).ok())
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u32 {
        /// GPS data has been seen on this device
        const SEEN_GPS = 0x01;
        /// RTCM2 data has been seen on this device
        const SEEN_RTCM2 = 0x02;
        /// RTCM3 data has been seen on this device
        const SEEN_RTCM3 = 0x04;
        /// AIS data has been seen on this device
        const SEEN_AIS = 0x08;
    }
}

impl Serialize for PropertyFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for PropertyFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(PropertyFlags::from_bits_truncate(bits))
    }
}

/// # Watch Policy
/// - [json_watch_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/shared_json.c#L95)
///
/// Body of the `?WATCH=...;` command. Unset fields are left out of the
/// command and keep the daemon's current value.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub device: Option<String>,
    pub enable: Option<bool>,
    pub json: Option<bool>,
    pub nmea: Option<bool>,
    pub pps: Option<bool>,
    pub raw: Option<i32>,
    pub scaled: Option<bool>,
    pub split24: Option<bool>,
    pub timing: Option<bool>,
    pub remote: Option<String>,
}

impl Watch {
    /// Watch policy enabling the JSON sentence stream
    pub fn json() -> Self {
        Watch {
            enable: Some(true),
            json: Some(true),
            ..Default::default()
        }
    }

    /// Watch policy stopping all streaming
    pub fn disable() -> Self {
        Watch {
            enable: Some(false),
            ..Default::default()
        }
    }
}

/// # Device Configuration
/// - [json_device_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/shared_json.c#L28)
///
/// Body of the `?DEVICE=...;` command.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub path: Option<String>,
    pub bps: Option<i32>,
    pub parity: Option<String>,
    pub stopbits: Option<u32>,
    pub native: Option<i32>,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub cycle: Option<std::time::Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_v3_types_flags() {
        let flags = PropertyFlags::SEEN_GPS | PropertyFlags::SEEN_AIS;
        let serialized = serde_json::to_string(&flags).unwrap();
        assert_eq!(serialized, "9");

        let deserialized: PropertyFlags = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, flags);
    }

    #[test]
    fn fix_codes_decode_through_repr() {
        assert_eq!(from_code::<FixMode>(Some(3)), Some(FixMode::Fix3D));
        assert_eq!(from_code::<FixStatus>(Some(2)), Some(FixStatus::DGps));
        assert_eq!(from_code::<FixMode>(Some(42)), None);
        assert_eq!(from_code::<FixMode>(None), None);
    }

    #[test]
    fn watch_omits_unset_fields() {
        let cmd = serde_json::to_string(&Watch::json()).unwrap();
        assert_eq!(cmd, r#"{"enable":true,"json":true}"#);
    }

    #[test]
    fn device_config_encodes_cycle_in_seconds() {
        let cfg = DeviceConfig {
            path: Some("/dev/ttyUSB0".into()),
            cycle: Some(std::time::Duration::from_millis(500)),
            ..Default::default()
        };
        let cmd = serde_json::to_string(&cfg).unwrap();
        assert_eq!(cmd, r#"{"path":"/dev/ttyUSB0","cycle":0.5}"#);
    }
}
