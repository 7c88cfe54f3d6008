//! Line-level decoding and command encoding
//!
//! [`decode_line`] is the pure core shared by the async client and the
//! blocking [`SentenceDecode`] reader: one line of text in, one
//! [`SentenceRecord`](v3::SentenceRecord) or one per-line
//! [`DecodeError`] out.

use crate::{Result, error::DecodeError};

pub mod v3;

use v3::{RawMessage, SentenceRecord};

/// Parses one line into a raw key/value object
///
/// Surrounding whitespace, including the line terminator, is ignored.
pub fn parse_raw(line: &str) -> core::result::Result<RawMessage, DecodeError> {
    match serde_json::from_str::<serde_json::Value>(line.trim())? {
        serde_json::Value::Object(raw) => Ok(raw),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decodes one line of daemon output into a sentence record
pub fn decode_line(line: &str) -> core::result::Result<SentenceRecord, DecodeError> {
    let raw = parse_raw(line)?;
    SentenceRecord::decode(&raw)
}

/// Reads sentence records from recorded daemon output
///
/// Blank lines are skipped. Each call returns `Ok(None)` at EOF; a line that
/// fails to decode, including one that is not valid UTF-8, is returned as
/// `Err(GpsdError::Decode(_))` and the next call continues with the following
/// line. `buf` holds the text of the last line read.
pub trait SentenceDecode: std::io::BufRead {
    fn read_record(&mut self, buf: &mut String) -> Result<Option<SentenceRecord>> {
        let mut bytes = Vec::new();
        loop {
            buf.clear();
            bytes.clear();
            if self.read_until(b'\n', &mut bytes)? == 0 {
                return Ok(None); // EOF reached
            }
            match std::str::from_utf8(&bytes) {
                Ok(line) => buf.push_str(line),
                Err(_) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    return Err(DecodeError::InvalidUtf8.into());
                }
            }
            if buf.trim().is_empty() {
                continue;
            }
            return Ok(Some(decode_line(buf)?));
        }
    }
}

impl<R: std::io::BufRead + ?Sized> SentenceDecode for R {}

/// A command that can be sent to the daemon
pub trait GpsdJsonRequest {
    fn to_command(&self) -> serde_json::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpsdError;
    use super::v3::SentenceKind;

    const GST_FULL: &str = r#"{"class":"GST","tag":"GST","device":"/dev/ttyUSB0","time":1374696834.0,"rms":0.1,"major":0.4,"minor":0.2,"orient":90.0,"lat":0.3,"lon":0.2,"alt":0.5}"#;

    #[test]
    fn decodes_full_gst_line() {
        let record = decode_line(GST_FULL).unwrap();
        let SentenceRecord::Gst(gst) = record else {
            panic!("expected GST");
        };
        for key in ["tag", "device", "time", "rms", "major", "minor", "orient", "lat", "lon", "alt"] {
            assert!(gst.is_present(key), "{key} should be present");
        }
        assert_eq!(gst.orient, 90.0);
    }

    #[test]
    fn decodes_sparse_gst_line() {
        let SentenceRecord::Gst(gst) = decode_line(r#"{"class":"GST","tag":"GST"}"#).unwrap()
        else {
            panic!("expected GST");
        };
        assert_eq!(gst.device, None);
        assert!(gst.rms.is_nan() && gst.alt.is_nan() && gst.time.secs().is_nan());
    }

    #[test]
    fn rejects_non_object_and_garbage() {
        assert_eq!(decode_line("[1,2,3]"), Err(DecodeError::NotAnObject));
        assert!(matches!(
            decode_line(r#"{"class":"GST""#),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_class_is_reported() {
        assert_eq!(
            decode_line(r#"{"class":"ZZZ","x":1}"#),
            Err(DecodeError::UnknownVariant {
                raw_class: Some("ZZZ".into())
            })
        );
    }

    #[test]
    fn read_record_skips_bad_lines_and_continues() {
        let log = format!(
            "{GST_FULL}\n\n{{\"class\":\"ZZZ\"}}\n{{\"class\":\"TPV\",\"mode\":\"3\"}}\n{{\"class\":\"VERSION\",\"release\":\"3.25\",\"proto_major\":3,\"proto_minor\":15}}\n"
        );
        let mut reader = std::io::Cursor::new(log);
        let mut buf = String::new();

        let first = reader.read_record(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind(), SentenceKind::Gst);

        assert!(matches!(
            reader.read_record(&mut buf),
            Err(GpsdError::Decode(DecodeError::UnknownVariant { .. }))
        ));
        assert!(matches!(
            reader.read_record(&mut buf),
            Err(GpsdError::Decode(DecodeError::FieldTypeMismatch {
                variant: "TPV",
                field: "mode",
                ..
            }))
        ));

        let version = reader.read_record(&mut buf).unwrap().unwrap();
        assert_eq!(version.kind(), SentenceKind::Version);
        assert!(reader.read_record(&mut buf).unwrap().is_none());
    }

    #[test]
    fn read_record_reports_invalid_utf8_per_line() {
        let mut log = b"\xff\xfe{\"class\":\"TPV\"}\n".to_vec();
        log.extend_from_slice(GST_FULL.as_bytes());
        log.push(b'\n');
        let mut reader = std::io::Cursor::new(log);
        let mut buf = String::new();

        assert!(matches!(
            reader.read_record(&mut buf),
            Err(GpsdError::Decode(DecodeError::InvalidUtf8))
        ));
        assert!(buf.ends_with("{\"class\":\"TPV\"}\n"));

        let next = reader.read_record(&mut buf).unwrap().unwrap();
        assert_eq!(next.kind(), SentenceKind::Gst);
        assert!(reader.read_record(&mut buf).unwrap().is_none());
    }
}
