//! Configuration, errors and shared plumbing for the DBR codec.
//!
//! The codec is stateless: a [`Codec`] only carries its [`CodecOptions`], is `Copy`,
//! and can be used from any number of threads at once. Decoding lives in
//! [`crate::decode`], encoding in [`crate::encode`].
use std::str::FromStr;

use nom::{IResult, number::Endianness};
use thiserror::Error;

use crate::{
    dbr::DbrType,
    record::ValueRecord,
    utils::{
        DEFAULT_MAX_ARRAY_BYTES, get_default_array_policy, get_default_byte_order,
        get_default_max_array_bytes,
    },
};

/// Everything that can go wrong while encoding or decoding a record
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Unsupported DBR type: {0}")]
    UnsupportedType(u16),
    #[error("{dbr_type} with {count} elements needs {required} bytes, but only {actual} given")]
    TruncatedRecord {
        dbr_type: DbrType,
        count: usize,
        required: usize,
        actual: usize,
    },
    #[error("Cannot encode a value of this shape: {0}")]
    InvalidValueType(String),
    #[error("Could not interpret {0:?} as a number")]
    TypeMismatch(String),
}

/// Error returned when parsing an option value from text
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unrecognised option value: {0}")]
pub struct ParseOptionError(pub String);

/// How decoded numeric arrays are represented
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ArrayPolicy {
    /// A [`Value::Sequence`](crate::record::Value::Sequence) of boxed scalars
    #[default]
    Boxed,
    /// A contiguous [`PackedArray`](crate::record::PackedArray) of the native type
    Packed,
}

impl FromStr for ArrayPolicy {
    type Err = ParseOptionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boxed" => Ok(ArrayPolicy::Boxed),
            "packed" => Ok(ArrayPolicy::Packed),
            _ => Err(ParseOptionError(s.to_string())),
        }
    }
}

/// Byte order of multi-byte fields in raw records
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Host order, as buffers are handed over by the C client library
    #[default]
    Native,
    /// Network order, as records travel inside CA messages
    Big,
    Little,
}

impl FromStr for ByteOrder {
    type Err = ParseOptionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(ByteOrder::Native),
            "big" | "be" | "network" => Ok(ByteOrder::Big),
            "little" | "le" => Ok(ByteOrder::Little),
            _ => Err(ParseOptionError(s.to_string())),
        }
    }
}

impl From<ByteOrder> for Endianness {
    fn from(value: ByteOrder) -> Self {
        match value {
            ByteOrder::Native if cfg!(target_endian = "big") => Endianness::Big,
            ByteOrder::Native => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
            ByteOrder::Little => Endianness::Little,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    pub array_policy: ArrayPolicy,
    pub byte_order: ByteOrder,
    /// Largest payload the encoder produces when no element limit is given
    pub max_array_bytes: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            array_policy: ArrayPolicy::default(),
            byte_order: ByteOrder::default(),
            max_array_bytes: DEFAULT_MAX_ARRAY_BYTES,
        }
    }
}

impl CodecOptions {
    /// Read the options from `EPICS_DBR_ARRAY_POLICY`, `EPICS_DBR_BYTE_ORDER` and
    /// `EPICS_CA_MAX_ARRAY_BYTES`
    pub fn from_env() -> Self {
        Self {
            array_policy: get_default_array_policy(),
            byte_order: get_default_byte_order(),
            max_array_bytes: get_default_max_array_bytes(),
        }
    }
}

/// Converts between raw DBR records and [`ValueRecord`]s
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Codec {
    pub(crate) options: CodecOptions,
}

impl Codec {
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }
    pub fn from_env() -> Self {
        Self::new(CodecOptions::from_env())
    }
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }
    pub fn with_array_policy(mut self, array_policy: ArrayPolicy) -> Self {
        self.options.array_policy = array_policy;
        self
    }
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.options.byte_order = byte_order;
        self
    }

    /// Check a buffer can hold a record, returning the exact size of the record
    pub(crate) fn check_length(
        &self,
        dbr_type: DbrType,
        count: usize,
        actual: usize,
    ) -> Result<usize, CodecError> {
        match dbr_type.size_n(count) {
            Some(required) if required <= actual => Ok(required),
            required => Err(CodecError::TruncatedRecord {
                dbr_type,
                count,
                required: required.unwrap_or(usize::MAX),
                actual,
            }),
        }
    }
}

/// A fixed-width field that can be read and written in any byte order
pub(crate) trait Wire: Copy + Default {
    fn parser<'a>(order: Endianness) -> fn(&'a [u8]) -> IResult<&'a [u8], Self>;
    fn put(self, order: ByteOrder, out: &mut Vec<u8>);
}

fn is_big_endian(order: Endianness) -> bool {
    match order {
        Endianness::Big => true,
        Endianness::Little => false,
        Endianness::Native => cfg!(target_endian = "big"),
    }
}

macro_rules! impl_wire {
    ($typ:ty, $be:ident, $le:ident) => {
        impl Wire for $typ {
            fn parser<'a>(order: Endianness) -> fn(&'a [u8]) -> IResult<&'a [u8], Self> {
                if is_big_endian(order) {
                    nom::number::complete::$be
                } else {
                    nom::number::complete::$le
                }
            }
            fn put(self, order: ByteOrder, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Native => out.extend_from_slice(&self.to_ne_bytes()),
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                }
            }
        }
    };
}
impl_wire!(i16, be_i16, le_i16);
impl_wire!(u16, be_u16, le_u16);
impl_wire!(i32, be_i32, le_i32);
impl_wire!(u32, be_u32, le_u32);
impl_wire!(f32, be_f32, le_f32);
impl_wire!(f64, be_f64, le_f64);

impl Wire for u8 {
    fn parser<'a>(_order: Endianness) -> fn(&'a [u8]) -> IResult<&'a [u8], Self> {
        nom::number::complete::u8
    }
    fn put(self, _order: ByteOrder, out: &mut Vec<u8>) {
        out.push(self);
    }
}

/// An owned copy of a raw record, decoded on request
///
/// The source buffer of a read only lives for the duration of the callback that
/// delivers it. This takes a validated copy of exactly the bytes the record occupies,
/// so that decoding can happen later, from any thread, with whatever array policy is
/// wanted by then.
#[derive(Clone, Debug, PartialEq)]
pub struct DbrBuffer {
    dbr_type: DbrType,
    count: usize,
    data: Vec<u8>,
    codec: Codec,
}

impl DbrBuffer {
    pub fn copy_from(
        codec: &Codec,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Result<Self, CodecError> {
        if !dbr_type.is_valid() {
            return Err(CodecError::UnsupportedType(dbr_type.into()));
        }
        let required = codec.check_length(dbr_type, count, data.len())?;
        Ok(Self {
            dbr_type,
            count,
            data: data[..required].to_vec(),
            codec: *codec,
        })
    }

    pub fn dbr_type(&self) -> DbrType {
        self.dbr_type
    }
    pub fn count(&self) -> usize {
        self.count
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
    pub fn array_policy(&self) -> ArrayPolicy {
        self.codec.options.array_policy
    }
    pub fn set_array_policy(&mut self, array_policy: ArrayPolicy) {
        self.codec.options.array_policy = array_policy;
    }

    /// Decode the held record
    pub fn get(&self) -> Result<ValueRecord, CodecError> {
        self.codec.decode(self.dbr_type, self.count, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dbr::DBR_LONG,
        record::{PackedArray, Value},
    };

    #[test]
    fn option_parsing() {
        assert_eq!("Packed".parse(), Ok(ArrayPolicy::Packed));
        assert_eq!("boxed".parse(), Ok(ArrayPolicy::Boxed));
        assert!("numpy".parse::<ArrayPolicy>().is_err());
        assert_eq!("network".parse(), Ok(ByteOrder::Big));
        assert_eq!("LE".parse(), Ok(ByteOrder::Little));
        assert_eq!(CodecOptions::default().max_array_bytes, 16384);
    }

    #[test]
    fn wire_fields_in_each_order() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let (rest, value) = i16::parser(ByteOrder::Big.into())(&data).unwrap();
        assert_eq!((rest.len(), value), (6, 0x0102));
        let (_, value) = i16::parser(ByteOrder::Little.into())(&data).unwrap();
        assert_eq!(value, 0x0201);
        let (_, value) = u32::parser(ByteOrder::Native.into())(&data).unwrap();
        assert_eq!(value, u32::from_ne_bytes([1, 2, 3, 4]));
        let (_, value) = u32::parser(Endianness::Native)(&data).unwrap();
        assert_eq!(value, u32::from_ne_bytes([1, 2, 3, 4]));
        let (rest, value) = u8::parser(Endianness::Big)(&data).unwrap();
        assert_eq!((rest.len(), value), (7, 1));
        assert!(f64::parser(Endianness::Little)(&data[1..]).is_err());

        for order in [ByteOrder::Native, ByteOrder::Big, ByteOrder::Little] {
            let mut out = Vec::new();
            (-2.5f64).put(order, &mut out);
            1234i16.put(order, &mut out);
            7u8.put(order, &mut out);
            assert_eq!(out.len(), 11);
            let (rest, value) = f64::parser(order.into())(&out).unwrap();
            assert_eq!(value, -2.5);
            let (rest, value) = i16::parser(order.into())(rest).unwrap();
            assert_eq!(value, 1234);
            assert_eq!(u8::parser(order.into())(rest).unwrap(), (&[][..], 7));
        }
        let mut out = Vec::new();
        0x0102u16.put(ByteOrder::Big, &mut out);
        0x0102u16.put(ByteOrder::Little, &mut out);
        assert_eq!(out, [1, 2, 2, 1]);
    }

    #[test]
    fn buffer_copies_exact_record() {
        let codec = Codec::default().with_byte_order(ByteOrder::Big);
        let mut data = vec![0, 0, 0, 1, 0, 0, 0, 2];
        // Trailing padding is dropped from the copy
        data.extend_from_slice(&[0xFF; 8]);
        let mut buffer = DbrBuffer::copy_from(&codec, DBR_LONG, 2, &data).unwrap();
        data.clear();
        assert_eq!(buffer.as_bytes().len(), 8);
        assert_eq!(buffer.get().unwrap().value.to_f64s(), Some(vec![1.0, 2.0]));

        buffer.set_array_policy(ArrayPolicy::Packed);
        assert!(matches!(
            buffer.get().unwrap().value,
            Value::Packed(PackedArray::Long(_))
        ));

        assert!(matches!(
            DbrBuffer::copy_from(&codec, DBR_LONG, 3, &[0; 8]),
            Err(CodecError::TruncatedRecord {
                required: 12,
                actual: 8,
                ..
            })
        ));
    }
}
