//! # gpsd-dispatch
//!
//! Decodes the JSON sentence stream of GPSD (GPS Service Daemon) into typed
//! records and dispatches them to subscribers.
//!
//! ## Overview
//!
//! gpsd serves newline-delimited JSON objects on TCP port 2947, each tagged
//! with a `"class"` such as `TPV`, `SKY` or `GST`. This crate covers the
//! whole path from bytes to application code:
//!
//! - [`client::LineReader`] frames the byte stream into lines, tolerating
//!   arbitrary read splits.
//! - [`protocol::decode_line`] classifies a line and maps its fields onto a
//!   [`protocol::v3::SentenceRecord`]. Fields the daemon left out are
//!   *absent*: `NaN` for numbers, `None` for everything else.
//! - [`client::Dispatcher`] delivers records to subscribers in order,
//!   isolating slow or failing listeners from each other.
//! - [`client::GpsdClient`] owns the connection, reconnects with backoff and
//!   reports its lifecycle through events.
//!
//! Recorded daemon output can be decoded without a connection through
//! [`protocol::SentenceDecode`].
//!
//! ## Example
//!
//! ```no_run
//! use gpsd_dispatch::client::{ClientOptions, GpsdClient};
//! use gpsd_dispatch::protocol::v3::SentenceKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GpsdClient::new(ClientOptions::default());
//! let mut fixes = client.subscribe(SentenceKind::Tpv.flag() | SentenceKind::Gst.flag())?;
//! client.connect("127.0.0.1:2947")?;
//!
//! while let Some(record) = fixes.recv().await {
//!     println!("{}: {}", record.kind(), serde_json::to_string(&record)?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::GpsdError;

/// Connection management, line framing and subscriber dispatch
pub mod client;

/// Error types used throughout the library
pub mod error;

/// Sentence decoding and command encoding for the GPSD JSON protocol
pub mod protocol;

/// Convenience type alias for Results with GpsdError
pub type Result<T> = core::result::Result<T, GpsdError>;
