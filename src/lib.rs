//! Marshalling of EPICS Channel Access "DBR" records.
//!
//! Every value that crosses a [CA] connection travels as a DBR record: a fixed C
//! structure of metadata, selected by a numeric tag, followed by an array of one of
//! seven primitive types. This crate converts raw DBR buffers into structured
//! [`ValueRecord`]s, and host values back into raw buffers ready to write.
//!
//! It is split into:
//!
//! - The DBR tag space, element sizes and the byte layout of every kind, in module
//!   [dbr].
//! - Alarm status and severity, in module [alarm].
//! - The decoded record, value and metadata types, in module [record].
//! - A [Codec] that decodes records ([`Codec::decode`]) and encodes write payloads
//!   ([`Codec::encode`]), configured by [CodecOptions]. A [DbrBuffer] holds a copy of
//!   a record for decoding later.
//!
//! ## Example
//!
//! ```
//! use epics_dbr::{ByteOrder, Codec, dbr::DBR_LONG, record::{Scalar, Value}};
//!
//! let codec = Codec::default().with_byte_order(ByteOrder::Big);
//! let record = codec.decode(DBR_LONG, 1, &[0, 0, 1, 0]).unwrap();
//! assert_eq!(record.value, Value::Scalar(Scalar::Long(256)));
//!
//! let put = codec.encode(DBR_LONG, None, &256.into(), None).unwrap();
//! assert_eq!(put.data, [0, 0, 1, 0]);
//! ```
//!
//! Decoding is pure and the codec holds no state of its own, so a single [Codec] can
//! be shared freely between threads.
//!
//! [CA]: https://docs.epics-controls.org/en/latest/internal/ca_protocol.html

pub mod alarm;
pub mod codec;
pub mod dbr;
mod decode;
pub mod encode;
pub mod record;
pub mod utils;

pub use crate::codec::{ArrayPolicy, ByteOrder, Codec, CodecError, CodecOptions, DbrBuffer};
pub use crate::encode::{EncodedPut, HostValue};
pub use crate::record::ValueRecord;
