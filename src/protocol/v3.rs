//! GPSD JSON Protocol Version 3 implementation
//!
//! This module implements version 3 of the GPSD JSON protocol, which is
//! the current stable protocol used by GPSD 3.x releases.
//!
//! # Protocol Overview
//!
//! - Commands start with '?' and end with ';'
//! - Responses are JSON objects with a "class" field indicating message type
//! - Data can be streamed continuously or polled on demand
//!
//! # References
//!
//! Based on the GPSD project protocol specification:
//! - [GPSD Protocol Documentation](https://gpsd.io/gpsd_json.html)
//! - [Protocol Version History](https://gitlab.com/gpsd/gpsd)

use serde_json::Value;

use crate::error::{DecodeError, GpsdError};

/// Mapping between raw JSON objects and typed fields
pub mod field;
/// Request message types and builders
pub mod request;
/// Sentence records decoded from the daemon's output
pub mod response;
/// Common data types used in protocol messages
pub mod types;

pub use field::{RawMessage, Timestamp};

/// Protocol version 3 major version number
///
/// Reference: [release-3.25](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/SConscript?ref_type=tags#L226)
pub const API_VERSION_MAJOR: i32 = 3;

/// Protocol version 3 minor version number
///
/// Oldest minor version whose sentence layout these records follow.
pub const API_VERSION_MINOR: i32 = 15;

/// Type alias for version 3 request messages
pub type RequestMessage = request::Message;

/// Whether a daemon reporting `proto_major.proto_minor` speaks this protocol
pub fn is_compatible(version: &response::Version) -> bool {
    version.proto_major == Some(i64::from(API_VERSION_MAJOR))
}

/// Like [`is_compatible`], reporting the daemon's version on mismatch
pub fn ensure_compatible(version: &response::Version) -> crate::Result<()> {
    if is_compatible(version) {
        Ok(())
    } else {
        Err(GpsdError::UnsupportedProtocolVersion {
            major: version.proto_major.unwrap_or_default(),
            minor: version.proto_minor.unwrap_or_default(),
        })
    }
}

/// Sentence class discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceKind {
    Tpv,
    Gst,
    Sky,
    Att,
    Toff,
    Pps,
    Osc,
    Version,
    Devices,
    Device,
    Watch,
    Error,
}

impl SentenceKind {
    /// Every supported kind
    pub const ALL: [SentenceKind; 12] = [
        SentenceKind::Tpv,
        SentenceKind::Gst,
        SentenceKind::Sky,
        SentenceKind::Att,
        SentenceKind::Toff,
        SentenceKind::Pps,
        SentenceKind::Osc,
        SentenceKind::Version,
        SentenceKind::Devices,
        SentenceKind::Device,
        SentenceKind::Watch,
        SentenceKind::Error,
    ];

    /// The `class` tag on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SentenceKind::Tpv => response::Tpv::CLASS,
            SentenceKind::Gst => response::Gst::CLASS,
            SentenceKind::Sky => response::Sky::CLASS,
            SentenceKind::Att => response::Attitude::CLASS,
            SentenceKind::Toff => response::TimeOffset::CLASS,
            SentenceKind::Pps => response::Pps::CLASS,
            SentenceKind::Osc => response::Oscillator::CLASS,
            SentenceKind::Version => response::Version::CLASS,
            SentenceKind::Devices => response::DeviceList::CLASS,
            SentenceKind::Device => response::Device::CLASS,
            SentenceKind::Watch => response::WatchStatus::CLASS,
            SentenceKind::Error => response::Error::CLASS,
        }
    }

    /// Looks up the kind for a `class` tag; tags are case sensitive
    pub fn from_class(class: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == class)
    }

    /// The single-kind filter for this kind
    pub fn flag(&self) -> SentenceKinds {
        match self {
            SentenceKind::Tpv => SentenceKinds::TPV,
            SentenceKind::Gst => SentenceKinds::GST,
            SentenceKind::Sky => SentenceKinds::SKY,
            SentenceKind::Att => SentenceKinds::ATT,
            SentenceKind::Toff => SentenceKinds::TOFF,
            SentenceKind::Pps => SentenceKinds::PPS,
            SentenceKind::Osc => SentenceKinds::OSC,
            SentenceKind::Version => SentenceKinds::VERSION,
            SentenceKind::Devices => SentenceKinds::DEVICES,
            SentenceKind::Device => SentenceKinds::DEVICE,
            SentenceKind::Watch => SentenceKinds::WATCH,
            SentenceKind::Error => SentenceKinds::ERROR,
        }
    }
}

impl std::fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Set of sentence kinds a subscription wants
    ///
    /// `SentenceKinds::all()` matches every record; an empty set matches none.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SentenceKinds: u32 {
        const TPV = 1 << 0;
        const GST = 1 << 1;
        const SKY = 1 << 2;
        const ATT = 1 << 3;
        const TOFF = 1 << 4;
        const PPS = 1 << 5;
        const OSC = 1 << 6;
        const VERSION = 1 << 7;
        const DEVICES = 1 << 8;
        const DEVICE = 1 << 9;
        const WATCH = 1 << 10;
        const ERROR = 1 << 11;
    }
}

impl SentenceKinds {
    /// Whether `kind` is in this set
    pub fn matches(&self, kind: SentenceKind) -> bool {
        self.contains(kind.flag())
    }
}

impl From<SentenceKind> for SentenceKinds {
    fn from(kind: SentenceKind) -> Self {
        kind.flag()
    }
}

impl FromIterator<SentenceKind> for SentenceKinds {
    fn from_iter<I: IntoIterator<Item = SentenceKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SentenceKinds::empty(), |acc, kind| acc | kind.flag())
    }
}

/// Extracts the sentence kind from the `class` discriminator
///
/// Missing, non-string and unsupported tags all yield
/// [`DecodeError::UnknownVariant`], which callers treat as informational.
pub fn classify(raw: &RawMessage) -> Result<SentenceKind, DecodeError> {
    match raw.get("class") {
        Some(Value::String(class)) => {
            SentenceKind::from_class(class).ok_or_else(|| DecodeError::UnknownVariant {
                raw_class: Some(class.clone()),
            })
        }
        _ => Err(DecodeError::UnknownVariant { raw_class: None }),
    }
}

/// GPSD sentence record
///
/// One variant per supported `class` value. Records are built once by the
/// field mapper and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SentenceRecord {
    /// Time-Position-Velocity report
    Tpv(response::Tpv),
    /// GPS pseudorange error statistics
    Gst(response::Gst),
    /// Satellite sky view report
    Sky(response::Sky),
    /// Attitude/orientation data
    Att(response::Attitude),
    /// Time offset report
    Toff(response::TimeOffset),
    /// Pulse-per-second timing report
    Pps(response::Pps),
    /// Oscillator/clock discipline status
    Osc(response::Oscillator),
    /// GPSD version information
    Version(response::Version),
    /// List of available GPS devices
    Devices(response::DeviceList),
    /// Single GPS device information
    Device(response::Device),
    /// Current watch settings
    Watch(response::WatchStatus),
    /// Error message from GPSD
    Error(response::Error),
}

impl SentenceRecord {
    /// Maps a raw message onto the record type for `kind`
    pub fn from_raw(kind: SentenceKind, raw: &RawMessage) -> Result<Self, DecodeError> {
        Ok(match kind {
            SentenceKind::Tpv => SentenceRecord::Tpv(response::Tpv::from_raw(raw)?),
            SentenceKind::Gst => SentenceRecord::Gst(response::Gst::from_raw(raw)?),
            SentenceKind::Sky => SentenceRecord::Sky(response::Sky::from_raw(raw)?),
            SentenceKind::Att => SentenceRecord::Att(response::Attitude::from_raw(raw)?),
            SentenceKind::Toff => SentenceRecord::Toff(response::TimeOffset::from_raw(raw)?),
            SentenceKind::Pps => SentenceRecord::Pps(response::Pps::from_raw(raw)?),
            SentenceKind::Osc => SentenceRecord::Osc(response::Oscillator::from_raw(raw)?),
            SentenceKind::Version => SentenceRecord::Version(response::Version::from_raw(raw)?),
            SentenceKind::Devices => {
                SentenceRecord::Devices(response::DeviceList::from_raw(raw)?)
            }
            SentenceKind::Device => SentenceRecord::Device(response::Device::from_raw(raw)?),
            SentenceKind::Watch => SentenceRecord::Watch(response::WatchStatus::from_raw(raw)?),
            SentenceKind::Error => SentenceRecord::Error(response::Error::from_raw(raw)?),
        })
    }

    /// Classifies and maps a raw message
    pub fn decode(raw: &RawMessage) -> Result<Self, DecodeError> {
        let kind = classify(raw)?;
        Self::from_raw(kind, raw)
    }

    /// The sentence kind of this record
    pub fn kind(&self) -> SentenceKind {
        match self {
            SentenceRecord::Tpv(_) => SentenceKind::Tpv,
            SentenceRecord::Gst(_) => SentenceKind::Gst,
            SentenceRecord::Sky(_) => SentenceKind::Sky,
            SentenceRecord::Att(_) => SentenceKind::Att,
            SentenceRecord::Toff(_) => SentenceKind::Toff,
            SentenceRecord::Pps(_) => SentenceKind::Pps,
            SentenceRecord::Osc(_) => SentenceKind::Osc,
            SentenceRecord::Version(_) => SentenceKind::Version,
            SentenceRecord::Devices(_) => SentenceKind::Devices,
            SentenceRecord::Device(_) => SentenceKind::Device,
            SentenceRecord::Watch(_) => SentenceKind::Watch,
            SentenceRecord::Error(_) => SentenceKind::Error,
        }
    }

    /// Whether the field with wire key `key` carried a value
    pub fn is_present(&self, key: &str) -> bool {
        match self {
            SentenceRecord::Tpv(r) => r.is_present(key),
            SentenceRecord::Gst(r) => r.is_present(key),
            SentenceRecord::Sky(r) => r.is_present(key),
            SentenceRecord::Att(r) => r.is_present(key),
            SentenceRecord::Toff(r) => r.is_present(key),
            SentenceRecord::Pps(r) => r.is_present(key),
            SentenceRecord::Osc(r) => r.is_present(key),
            SentenceRecord::Version(r) => r.is_present(key),
            SentenceRecord::Devices(r) => r.is_present(key),
            SentenceRecord::Device(r) => r.is_present(key),
            SentenceRecord::Watch(r) => r.is_present(key),
            SentenceRecord::Error(r) => r.is_present(key),
        }
    }

    /// Maps the record back onto a raw message, `class` included
    pub fn to_raw(&self) -> RawMessage {
        match self {
            SentenceRecord::Tpv(r) => r.to_raw(),
            SentenceRecord::Gst(r) => r.to_raw(),
            SentenceRecord::Sky(r) => r.to_raw(),
            SentenceRecord::Att(r) => r.to_raw(),
            SentenceRecord::Toff(r) => r.to_raw(),
            SentenceRecord::Pps(r) => r.to_raw(),
            SentenceRecord::Osc(r) => r.to_raw(),
            SentenceRecord::Version(r) => r.to_raw(),
            SentenceRecord::Devices(r) => r.to_raw(),
            SentenceRecord::Device(r) => r.to_raw(),
            SentenceRecord::Watch(r) => r.to_raw(),
            SentenceRecord::Error(r) => r.to_raw(),
        }
    }
}

impl serde::Serialize for SentenceRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_raw().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawMessage {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test fixture must be an object"),
        }
    }

    #[test]
    fn every_kind_round_trips_its_class_tag() {
        for kind in SentenceKind::ALL {
            assert_eq!(SentenceKind::from_class(kind.as_str()), Some(kind));
        }
        assert_eq!(SentenceKind::from_class("gst"), None);
    }

    #[test]
    fn classify_known_and_unknown() {
        assert_eq!(classify(&raw(json!({"class": "GST"}))), Ok(SentenceKind::Gst));
        assert_eq!(
            classify(&raw(json!({"class": "ZZZ"}))),
            Err(DecodeError::UnknownVariant {
                raw_class: Some("ZZZ".into())
            })
        );
        assert_eq!(
            classify(&raw(json!({"tag": "GST"}))),
            Err(DecodeError::UnknownVariant { raw_class: None })
        );
        assert_eq!(
            classify(&raw(json!({"class": 5}))),
            Err(DecodeError::UnknownVariant { raw_class: None })
        );
    }

    #[test]
    fn kinds_filter() {
        let kinds: SentenceKinds = [SentenceKind::Tpv, SentenceKind::Gst].into_iter().collect();
        assert!(kinds.matches(SentenceKind::Gst));
        assert!(!kinds.matches(SentenceKind::Sky));
        assert!(SentenceKinds::all().matches(SentenceKind::Error));
        assert!(!SentenceKinds::empty().matches(SentenceKind::Tpv));
    }

    #[test]
    fn record_serializes_with_class() {
        let record = SentenceRecord::decode(&raw(json!({
            "class": "GST", "device": "/dev/ttyUSB0", "rms": 1.5
        })))
        .unwrap();
        assert_eq!(record.kind(), SentenceKind::Gst);
        assert!(record.is_present("rms"));
        assert!(!record.is_present("major"));

        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"class":"GST","device":"/dev/ttyUSB0","rms":1.5}"#);
    }

    #[test]
    fn version_compatibility() {
        let v = response::Version {
            proto_major: Some(3),
            proto_minor: Some(14),
            ..Default::default()
        };
        assert!(is_compatible(&v));
        let old = response::Version {
            proto_major: Some(2),
            ..Default::default()
        };
        assert!(!is_compatible(&old));
        assert!(matches!(
            ensure_compatible(&old),
            Err(GpsdError::UnsupportedProtocolVersion { major: 2, minor: 0 })
        ));
        assert!(!is_compatible(&response::Version::default()));
        assert!(ensure_compatible(&v).is_ok());
    }
}
