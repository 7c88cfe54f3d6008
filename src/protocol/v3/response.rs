//! GPSD Protocol v3 sentence records
//!
//! One immutable record per sentence class the daemon emits. Every record is
//! declared through the `sentence!` macro, which generates the field mapping
//! in both directions together with equality and hashing that treat absent
//! numeric fields (NaN) as equal to each other.
//!
//! Absent sentinels:
//! - floating point fields are NaN
//! - [`Timestamp`] fields are [`Timestamp::ABSENT`]
//! - integer, boolean and string fields are `None`
//!
//! Use `is_present("wire_key")` instead of comparing against NaN.

use chrono::{DateTime, Utc};

use super::field::{FieldReader, FieldValue, FieldWriter, RawMessage, Timestamp};
use super::types::{FixMode, FixStatus, PropertyFlags, from_code};
use crate::error::DecodeError;

macro_rules! sentence {
    (
        $(#[$meta:meta])*
        pub struct $name:ident => $class:literal {
            $(
                $(#[$fmeta:meta])*
                $field:ident: $ty:ty = $key:literal,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl $name {
            /// Class tag of this sentence on the wire
            pub const CLASS: &'static str = $class;

            /// Wire keys of every declared field
            pub const FIELDS: &'static [&'static str] = &[$($key),*];

            /// Whether the field with wire key `key` carried a value
            ///
            /// Returns `false` for keys this sentence does not declare.
            pub fn is_present(&self, key: &str) -> bool {
                match key {
                    $($key => FieldValue::is_present(&self.$field),)*
                    _ => false,
                }
            }

            /// Maps a raw message onto this sentence
            pub fn from_raw(raw: &RawMessage) -> Result<Self, DecodeError> {
                let fields = FieldReader::new(raw, $class);
                Ok($name {
                    $($field: fields.get($key)?,)*
                })
            }

            /// Maps this sentence back onto a raw message
            ///
            /// Absent fields are left out.
            pub fn to_raw(&self) -> RawMessage {
                let mut out = FieldWriter::new($class);
                $(out.put($key, &self.$field);)*
                out.finish()
            }
        }

        /// Every field absent
        impl Default for $name {
            fn default() -> Self {
                $name {
                    $($field: FieldValue::absent(),)*
                }
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                true $(&& FieldValue::same(&self.$field, &other.$field))*
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                $(FieldValue::hash_value(&self.$field, state);)*
            }
        }
    };
}

sentence! {
    /// Time-Position-Velocity (TPV) report
    ///
    /// The TPV message is the core GPS fix report, containing time, position, and velocity data.
    ///
    /// Reference: [json_tpv_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c?ref_type=heads#L34)
    pub struct Tpv => "TPV" {
        /// Type tag of the originating sentence
        tag: Option<String> = "tag",
        /// Device path that provided this data
        device: Option<String> = "device",
        /// GPS fix mode, see [`Tpv::fix_mode`]
        mode: Option<i64> = "mode",
        /// GPS fix status, see [`Tpv::fix_status`]
        status: Option<i64> = "status",
        /// GPS time of fix
        time: Timestamp = "time",
        /// Estimated time error in seconds
        ept: f64 = "ept",
        /// Latitude in degrees (positive = North)
        lat: f64 = "lat",
        /// Longitude in degrees (positive = East)
        lon: f64 = "lon",
        /// Altitude in meters (deprecated, use altMSL or altHAE)
        alt: f64 = "alt",
        /// Altitude, height above ellipsoid, in meters
        alt_hae: f64 = "altHAE",
        /// Altitude, MSL (mean sea level) in meters
        alt_msl: f64 = "altMSL",
        /// Geodetic datum (usually WGS84)
        datum: Option<String> = "datum",
        /// Longitude error estimate in meters
        epx: f64 = "epx",
        /// Latitude error estimate in meters
        epy: f64 = "epy",
        /// Estimated vertical error in meters
        epv: f64 = "epv",
        /// True track (course over ground) in degrees
        track: f64 = "track",
        /// Magnetic track in degrees
        magtrack: f64 = "magtrack",
        /// Magnetic variation in degrees
        magvar: f64 = "magvar",
        /// Speed over ground in meters/second
        speed: f64 = "speed",
        /// Climb/sink rate in meters per second
        climb: f64 = "climb",
        /// Estimated track error in degrees
        epd: f64 = "epd",
        /// Estimated speed error in meters/second
        eps: f64 = "eps",
        /// Estimated climb error in meters/second
        epc: f64 = "epc",
        /// Estimated horizontal position error in meters
        eph: f64 = "eph",
        /// Spherical error probability in meters
        sep: f64 = "sep",
        /// Geoid separation in meters
        geoid_sep: f64 = "geoidSep",
        /// Depth below mean sea level in meters
        depth: f64 = "depth",
        /// Age of DGPS corrections in seconds
        dgps_age: f64 = "dgpsAge",
        /// DGPS station ID
        dgps_sta: Option<i64> = "dgpsSta",
        /// Current leap seconds (GPS-UTC offset)
        leapseconds: Option<i64> = "leapseconds",
    }
}

impl Tpv {
    /// Fix mode, `None` when absent or an unknown code
    pub fn fix_mode(&self) -> Option<FixMode> {
        from_code(self.mode)
    }

    /// Fix status, `None` when absent or an unknown code
    pub fn fix_status(&self) -> Option<FixStatus> {
        from_code(self.status)
    }
}

sentence! {
    /// GPS Pseudorange Error Statistics (GST)
    ///
    /// A pseudorange noise report: standard deviations of the position
    /// solution, in meters unless stated otherwise.
    ///
    /// Reference: [json_noise_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c?ref_type=heads#L175)
    pub struct Gst => "GST" {
        /// Type tag; from an NMEA device this is the NMEA sentence type
        tag: Option<String> = "tag",
        /// Name of the originating device
        device: Option<String> = "device",
        /// Seconds since the Unix epoch, UTC
        time: Timestamp = "time",
        /// Standard deviation of the range inputs to the navigation process
        /// (pseudoranges and DGPS corrections)
        rms: f64 = "rms",
        /// Standard deviation of semi-major axis of error ellipse
        major: f64 = "major",
        /// Standard deviation of semi-minor axis of error ellipse
        minor: f64 = "minor",
        /// Orientation of semi-major axis of error ellipse, degrees from true north
        orient: f64 = "orient",
        /// Standard deviation of latitude error
        lat: f64 = "lat",
        /// Standard deviation of longitude error
        lon: f64 = "lon",
        /// Standard deviation of altitude error
        alt: f64 = "alt",
        /// East velocity error in meters/second (1-sigma)
        ve: f64 = "ve",
        /// North velocity error in meters/second (1-sigma)
        vn: f64 = "vn",
        /// Up velocity error in meters/second (1-sigma)
        vu: f64 = "vu",
    }
}

sentence! {
    /// Satellite Sky View (SKY) report
    ///
    /// Dilution of precision and satellite counts. The per-satellite list is
    /// not decoded.
    pub struct Sky => "SKY" {
        tag: Option<String> = "tag",
        device: Option<String> = "device",
        time: Timestamp = "time",
        xdop: f64 = "xdop",
        ydop: f64 = "ydop",
        vdop: f64 = "vdop",
        tdop: f64 = "tdop",
        hdop: f64 = "hdop",
        pdop: f64 = "pdop",
        gdop: f64 = "gdop",
        /// Number of satellites visible
        n_sat: Option<i64> = "nSat",
        /// Number of satellites used in navigation solution
        u_sat: Option<i64> = "uSat",
    }
}

sentence! {
    /// Attitude (ATT) report from a gyro or compass
    ///
    /// Angles are in degrees; the `*_st` fields carry the device's
    /// single-letter status codes.
    pub struct Attitude => "ATT" {
        tag: Option<String> = "tag",
        device: Option<String> = "device",
        time: Timestamp = "time",
        heading: f64 = "heading",
        mag_st: Option<String> = "mag_st",
        pitch: f64 = "pitch",
        pitch_st: Option<String> = "pitch_st",
        yaw: f64 = "yaw",
        yaw_st: Option<String> = "yaw_st",
        roll: f64 = "roll",
        roll_st: Option<String> = "roll_st",
        dip: f64 = "dip",
        mag_len: f64 = "mag_len",
        mag_x: f64 = "mag_x",
        mag_y: f64 = "mag_y",
        mag_z: f64 = "mag_z",
        acc_len: f64 = "acc_len",
        acc_x: f64 = "acc_x",
        acc_y: f64 = "acc_y",
        acc_z: f64 = "acc_z",
        gyro_x: f64 = "gyro_x",
        gyro_y: f64 = "gyro_y",
        depth: f64 = "depth",
        temp: f64 = "temp",
    }
}

sentence! {
    /// Time Offset report
    ///
    /// Reference: [json_toff_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c?ref_type=heads#L667)
    pub struct TimeOffset => "TOFF" {
        device: Option<String> = "device",
        real_sec: Option<i64> = "real_sec",
        real_nsec: Option<i64> = "real_nsec",
        clock_sec: Option<i64> = "clock_sec",
        clock_nsec: Option<i64> = "clock_nsec",
        precision: Option<i64> = "precision",
        shm: Option<String> = "shm",
    }
}

sentence! {
    /// Pulse-Per-Second (PPS) timing report
    pub struct Pps => "PPS" {
        device: Option<String> = "device",
        real_sec: Option<i64> = "real_sec",
        real_nsec: Option<i64> = "real_nsec",
        clock_sec: Option<i64> = "clock_sec",
        clock_nsec: Option<i64> = "clock_nsec",
        /// Clock precision, log2 seconds
        precision: Option<i64> = "precision",
        shm: Option<String> = "shm",
        /// Quantization error of the PPS edge, picoseconds
        q_err: Option<i64> = "qErr",
    }
}

/// Helper function to convert separate seconds and nanoseconds to DateTime
fn sec_nsec_to_datetime(sec: Option<i64>, nsec: Option<i64>) -> Option<DateTime<Utc>> {
    match (sec, nsec) {
        (Some(sec), Some(nsec)) => DateTime::<Utc>::from_timestamp(sec, u32::try_from(nsec).ok()?),
        _ => None,
    }
}

impl TimeOffset {
    /// GPS time
    pub fn real(&self) -> Option<DateTime<Utc>> {
        sec_nsec_to_datetime(self.real_sec, self.real_nsec)
    }

    /// System clock time
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        sec_nsec_to_datetime(self.clock_sec, self.clock_nsec)
    }
}

impl Pps {
    /// GPS time of the PPS edge
    pub fn real(&self) -> Option<DateTime<Utc>> {
        sec_nsec_to_datetime(self.real_sec, self.real_nsec)
    }

    /// System clock time of the PPS edge
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        sec_nsec_to_datetime(self.clock_sec, self.clock_nsec)
    }
}

sentence! {
    /// Oscillator/clock discipline status
    pub struct Oscillator => "OSC" {
        device: Option<String> = "device",
        running: Option<bool> = "running",
        reference: Option<bool> = "reference",
        disciplined: Option<bool> = "disciplined",
        /// Offset of the oscillator from the PPS edge, nanoseconds
        delta: Option<i64> = "delta",
    }
}

sentence! {
    /// GPSD daemon version information
    ///
    /// Sent by the daemon as the first line of every connection.
    pub struct Version => "VERSION" {
        release: Option<String> = "release",
        rev: Option<String> = "rev",
        proto_major: Option<i64> = "proto_major",
        proto_minor: Option<i64> = "proto_minor",
        remote: Option<String> = "remote",
    }
}

sentence! {
    /// # Device Information
    /// - [json_device_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/shared_json.c#L28)
    pub struct Device => "DEVICE" {
        path: Option<String> = "path",
        activated: Timestamp = "activated",
        flags: Option<i64> = "flags",
        driver: Option<String> = "driver",
        subtype: Option<String> = "subtype",
        subtype1: Option<String> = "subtype1",
        hexdata: Option<String> = "hexdata",
        sernum: Option<String> = "sernum",
        native: Option<i64> = "native",
        bps: Option<i64> = "bps",
        parity: Option<String> = "parity",
        stopbits: Option<i64> = "stopbits",
        cycle: f64 = "cycle",
        mincycle: f64 = "mincycle",
    }
}

impl Device {
    /// Data types seen on this device, unknown bits dropped
    pub fn property_flags(&self) -> Option<PropertyFlags> {
        self.flags
            .and_then(|bits| u32::try_from(bits).ok())
            .map(PropertyFlags::from_bits_truncate)
    }
}

sentence! {
    /// Watch policy currently in effect, echoed after `?WATCH`
    pub struct WatchStatus => "WATCH" {
        enable: Option<bool> = "enable",
        json: Option<bool> = "json",
        nmea: Option<bool> = "nmea",
        raw: Option<i64> = "raw",
        scaled: Option<bool> = "scaled",
        split24: Option<bool> = "split24",
        timing: Option<bool> = "timing",
        pps: Option<bool> = "pps",
        device: Option<String> = "device",
        remote: Option<String> = "remote",
    }
}

sentence! {
    /// Error notification from GPSD
    pub struct Error => "ERROR" {
        message: Option<String> = "message",
    }
}

/// List of GPS devices known to GPSD
///
/// Each entry is mapped with the same rules as a standalone [`Device`].
/// `devices` is `None` when the key is missing, and `Some(vec![])` when the
/// daemon reports no devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceList {
    pub devices: Option<Vec<Device>>,
    pub remote: Option<String>,
}

impl DeviceList {
    /// Class tag of this sentence on the wire
    pub const CLASS: &'static str = "DEVICES";

    /// Wire keys of every declared field
    pub const FIELDS: &'static [&'static str] = &["devices", "remote"];

    /// Whether the field with wire key `key` carried a value
    pub fn is_present(&self, key: &str) -> bool {
        match key {
            "devices" => self.devices.is_some(),
            "remote" => self.remote.is_some(),
            _ => false,
        }
    }

    /// Maps a raw message onto this sentence
    pub fn from_raw(raw: &RawMessage) -> Result<Self, DecodeError> {
        let fields = FieldReader::new(raw, Self::CLASS);
        Ok(DeviceList {
            devices: fields.list("devices", Device::from_raw)?,
            remote: fields.get("remote")?,
        })
    }

    /// Maps this sentence back onto a raw message
    pub fn to_raw(&self) -> RawMessage {
        let mut out = FieldWriter::new(Self::CLASS);
        out.put_list(
            "devices",
            self.devices.as_ref().map(|devices| {
                devices
                    .iter()
                    .map(|device| {
                        let mut raw = device.to_raw();
                        raw.remove("class");
                        raw
                    })
                    .collect()
            }),
        );
        out.put("remote", &self.remote);
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::{Value, json};

    use super::*;

    fn raw(value: Value) -> RawMessage {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test fixture must be an object"),
        }
    }

    #[test]
    fn gst_fully_populated() {
        let msg = raw(json!({
            "class": "GST", "tag": "GST", "device": "/dev/ttyUSB0",
            "time": 1374696834.0, "rms": 0.1, "major": 0.4, "minor": 0.2,
            "orient": 90.0, "lat": 0.3, "lon": 0.2, "alt": 0.5
        }));
        let gst = Gst::from_raw(&msg).unwrap();

        assert_eq!(gst.tag.as_deref(), Some("GST"));
        assert_eq!(gst.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(gst.time.secs(), 1374696834.0);
        assert_eq!(gst.rms, 0.1);
        assert_eq!(gst.major, 0.4);
        assert_eq!(gst.minor, 0.2);
        assert_eq!(gst.orient, 90.0);
        assert_eq!(gst.lat, 0.3);
        assert_eq!(gst.lon, 0.2);
        assert_eq!(gst.alt, 0.5);
        assert!(!gst.is_present("ve"));
    }

    #[test]
    fn gst_sparse_uses_absent_sentinels() {
        let gst = Gst::from_raw(&raw(json!({"class": "GST", "tag": "GST"}))).unwrap();

        assert_eq!(gst.tag.as_deref(), Some("GST"));
        assert_eq!(gst.device, None);
        assert!(!gst.time.is_present());
        for value in [gst.rms, gst.major, gst.minor, gst.orient, gst.lat, gst.lon, gst.alt] {
            assert!(value.is_nan());
        }
        for key in Gst::FIELDS {
            assert_eq!(gst.is_present(key), *key == "tag", "field {key}");
        }
    }

    #[test]
    fn sparse_records_are_equal_and_hash_alike() {
        let a = Gst::from_raw(&raw(json!({"tag": "GST"}))).unwrap();
        let b = Gst::from_raw(&raw(json!({"tag": "GST"}))).unwrap();
        assert_eq!(a, b);

        let set: HashSet<Gst> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn one_differing_field_breaks_equality() {
        let a = Gst { rms: 0.1, ..Gst::default() };
        let b = Gst { rms: 0.2, ..Gst::default() };
        let c = Gst::default();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn mismatch_names_variant_and_field() {
        let err = Gst::from_raw(&raw(json!({"device": 7}))).unwrap_err();
        assert_eq!(
            err,
            DecodeError::FieldTypeMismatch {
                variant: "GST",
                field: "device",
                expected: "string",
            }
        );
    }

    #[test]
    fn tpv_round_trips_through_raw() {
        let tpv = Tpv {
            device: Some("/dev/ttyACM0".into()),
            mode: Some(3),
            status: Some(2),
            time: Timestamp::from_secs(1700000000.25),
            lat: 46.498,
            lon: 7.567,
            alt_hae: 1343.1,
            speed: 0.01,
            leapseconds: Some(18),
            ..Tpv::default()
        };

        let back = Tpv::from_raw(&tpv.to_raw()).unwrap();
        assert_eq!(back, tpv);
        assert_eq!(back.fix_mode(), Some(FixMode::Fix3D));
        assert_eq!(back.fix_status(), Some(FixStatus::DGps));
    }

    #[test]
    fn tpv_accepts_iso_time() {
        let tpv = Tpv::from_raw(&raw(json!({"mode": 2, "time": "2023-11-14T22:13:20.000Z"})))
            .unwrap();
        assert_eq!(tpv.time.secs(), 1700000000.0);
        assert_eq!(tpv.fix_mode(), Some(FixMode::Fix2D));
    }

    #[test]
    fn toff_combines_seconds_and_nanos() {
        let toff = TimeOffset::from_raw(&raw(json!({
            "device": "/dev/ttyS0", "real_sec": 1700000000, "real_nsec": 500,
            "clock_sec": 1700000000, "clock_nsec": 1500
        })))
        .unwrap();
        let real = toff.real().unwrap();
        assert_eq!(real.timestamp(), 1700000000);
        assert_eq!(real.timestamp_subsec_nanos(), 500);
        assert!(toff.clock().unwrap() > real);
    }

    #[test]
    fn pps_without_nanos_has_no_time() {
        let pps = Pps::from_raw(&raw(json!({"real_sec": 1, "qErr": -20}))).unwrap();
        assert_eq!(pps.real(), None);
        assert_eq!(pps.q_err, Some(-20));
    }

    #[test]
    fn device_flags_view() {
        let device = Device::from_raw(&raw(json!({"path": "/dev/ttyUSB0", "flags": 9})))
            .unwrap();
        assert_eq!(
            device.property_flags(),
            Some(PropertyFlags::SEEN_GPS | PropertyFlags::SEEN_AIS)
        );
    }

    #[test]
    fn device_list_maps_nested_devices() {
        let list = DeviceList::from_raw(&raw(json!({
            "class": "DEVICES",
            "devices": [
                {"class": "DEVICE", "path": "/dev/ttyUSB0", "driver": "u-blox", "bps": 9600},
                {"class": "DEVICE", "path": "/dev/pps0", "driver": "PPS"}
            ]
        })))
        .unwrap();

        let devices = list.devices.as_deref().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].bps, Some(9600));
        assert!(devices[1].cycle.is_nan());
        assert_eq!(DeviceList::from_raw(&list.to_raw()).unwrap(), list);
    }

    #[test]
    fn device_list_keeps_empty_list_apart_from_missing_key() {
        let empty = DeviceList::from_raw(&raw(json!({"class": "DEVICES", "devices": []})))
            .unwrap();
        assert!(empty.is_present("devices"));
        assert_eq!(empty.devices, Some(Vec::new()));
        assert_eq!(
            Value::Object(empty.to_raw()),
            json!({"class": "DEVICES", "devices": []})
        );

        let missing = DeviceList::from_raw(&raw(json!({"class": "DEVICES"}))).unwrap();
        assert!(!missing.is_present("devices"));
        assert!(!missing.to_raw().contains_key("devices"));
        assert_ne!(empty, missing);
    }

    #[test]
    fn device_list_reports_nested_mismatch() {
        let err = DeviceList::from_raw(&raw(json!({"devices": [{"bps": "fast"}]}))).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::FieldTypeMismatch { variant: "DEVICE", field: "bps", .. }
        ));
    }
}
