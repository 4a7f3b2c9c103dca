//! Reading raw DBR records into [`ValueRecord`]s.
//!
//! Every record is a fixed header whose shape depends on the category, an optional
//! alignment pad, then `count` packed elements of the basic type. The buffer length is
//! checked against the layout before a single field is read, so a short buffer is
//! always reported as [`CodecError::TruncatedRecord`] and never read past.
use nom::{IResult, Parser, bytes::complete::take, number::Endianness};
use tracing::{trace, warn};

use crate::{
    alarm::Status,
    codec::{ArrayPolicy, Codec, CodecError, Wire},
    dbr::{
        DbrBasicType, DbrCategory, DbrType, MAX_ENUM_STATES, MAX_ENUM_STRING_SIZE,
        MAX_STRING_SIZE, MAX_UNITS_SIZE,
    },
    record::{Acknowledgement, Graphics, Limits, PackedArray, Scalar, Timestamp, Value, ValueRecord},
    utils::fixed_length_bytes_to_string,
};

type ParseError<'a> = nom::error::Error<&'a [u8]>;

impl Codec {
    /// Decode a record of `count` elements from a raw buffer
    ///
    /// The buffer may be longer than the record; anything past the end of the record
    /// is ignored.
    pub fn decode(
        &self,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Result<ValueRecord, CodecError> {
        if !dbr_type.is_valid() {
            return Err(CodecError::UnsupportedType(dbr_type.into()));
        }
        let required = self.check_length(dbr_type, count, data.len())?;
        trace!(
            "Decoding {dbr_type} with {count} elements from {} bytes",
            data.len()
        );
        let reader = RecordReader {
            order: self.options.byte_order.into(),
            policy: self.options.array_policy,
        };
        reader
            .record(&data[..required], dbr_type, count)
            .map(|(_, record)| record)
            .map_err(|_| CodecError::TruncatedRecord {
                dbr_type,
                count,
                required,
                actual: data.len(),
            })
    }

    /// Decode a record identified by its numeric tag
    pub fn decode_tag(
        &self,
        tag: u16,
        count: usize,
        data: &[u8],
    ) -> Result<ValueRecord, CodecError> {
        self.decode(DbrType::try_from(tag)?, count, data)
    }
}

struct RecordReader {
    order: Endianness,
    policy: ArrayPolicy,
}

impl RecordReader {
    fn field<'a, T: Wire>(&self, input: &'a [u8]) -> IResult<&'a [u8], T> {
        T::parser(self.order)(input)
    }

    fn skip<'a>(&self, input: &'a [u8], size: usize) -> IResult<&'a [u8], ()> {
        let (input, _) = take::<usize, &[u8], ParseError>(size)(input)?;
        Ok((input, ()))
    }

    fn text<'a>(&self, input: &'a [u8], width: usize) -> IResult<&'a [u8], String> {
        let (input, slot) = take::<usize, &[u8], ParseError>(width)(input)?;
        Ok((input, fixed_length_bytes_to_string(slot)))
    }

    fn status<'a>(&self, input: &'a [u8]) -> IResult<&'a [u8], Status> {
        let (input, (status, severity)) =
            (i16::parser(self.order), i16::parser(self.order)).parse(input)?;
        Ok((input, Status { status, severity }))
    }

    fn timestamp<'a>(&self, input: &'a [u8]) -> IResult<&'a [u8], Timestamp> {
        let (input, (seconds, nanoseconds)) =
            (u32::parser(self.order), u32::parser(self.order)).parse(input)?;
        Ok((input, Timestamp::from_epics(seconds, nanoseconds)))
    }

    fn limits<'a, T: Wire>(&self, input: &'a [u8], control: bool) -> IResult<&'a [u8], Limits<T>> {
        let p = T::parser(self.order);
        let (
            input,
            (
                upper_disp_limit,
                lower_disp_limit,
                upper_alarm_limit,
                upper_warning_limit,
                lower_warning_limit,
                lower_alarm_limit,
            ),
        ) = (p, p, p, p, p, p).parse(input)?;
        let (input, (upper_ctrl_limit, lower_ctrl_limit)) = if control {
            let (input, (upper, lower)) = (p, p).parse(input)?;
            (input, (Some(upper), Some(lower)))
        } else {
            (input, (None, None))
        };
        Ok((
            input,
            Limits {
                upper_disp_limit,
                lower_disp_limit,
                upper_alarm_limit,
                upper_warning_limit,
                lower_warning_limit,
                lower_alarm_limit,
                upper_ctrl_limit,
                lower_ctrl_limit,
            },
        ))
    }

    fn units<'a>(&self, input: &'a [u8]) -> IResult<&'a [u8], String> {
        self.text(input, MAX_UNITS_SIZE)
    }

    /// The `GR`/`CTRL` block following the status, if the basic type has one
    fn graphics<'a>(
        &self,
        input: &'a [u8],
        basic_type: DbrBasicType,
        control: bool,
    ) -> IResult<&'a [u8], Option<Graphics>> {
        let (input, graphics) = match basic_type {
            DbrBasicType::String => return Ok((input, None)),
            DbrBasicType::Enum => {
                let (mut input, no_str) = self.field::<i16>(input)?;
                let mut enum_strings = Vec::with_capacity(MAX_ENUM_STATES);
                for _ in 0..MAX_ENUM_STATES {
                    let (rest, choice) = self.text(input, MAX_ENUM_STRING_SIZE)?;
                    enum_strings.push(choice);
                    input = rest;
                }
                let available = usize::try_from(no_str).unwrap_or(0);
                if no_str < 0 || available > MAX_ENUM_STATES {
                    warn!("Enum record claims {no_str} choices, clamping to 0..={MAX_ENUM_STATES}");
                }
                enum_strings.truncate(available);
                (input, Graphics::Enum { enum_strings })
            }
            DbrBasicType::Char => {
                let (input, units) = self.units(input)?;
                let (input, limits) = self.limits(input, control)?;
                (input, Graphics::Char { units, limits })
            }
            DbrBasicType::Int => {
                let (input, units) = self.units(input)?;
                let (input, limits) = self.limits(input, control)?;
                (input, Graphics::Int { units, limits })
            }
            DbrBasicType::Long => {
                let (input, units) = self.units(input)?;
                let (input, limits) = self.limits(input, control)?;
                (input, Graphics::Long { units, limits })
            }
            DbrBasicType::Float => {
                let (input, precision) = self.field::<i16>(input)?;
                let (input, _) = self.skip(input, 2)?;
                let (input, units) = self.units(input)?;
                let (input, limits) = self.limits(input, control)?;
                (
                    input,
                    Graphics::Float {
                        units,
                        limits,
                        precision,
                    },
                )
            }
            DbrBasicType::Double => {
                let (input, precision) = self.field::<i16>(input)?;
                let (input, _) = self.skip(input, 2)?;
                let (input, units) = self.units(input)?;
                let (input, limits) = self.limits(input, control)?;
                (
                    input,
                    Graphics::Double {
                        units,
                        limits,
                        precision,
                    },
                )
            }
        };
        Ok((input, Some(graphics)))
    }

    /// Shape a run of decoded elements according to count and array policy
    fn shape<T>(
        &self,
        mut items: Vec<T>,
        boxed: fn(T) -> Scalar,
        packed: fn(Vec<T>) -> PackedArray,
    ) -> Value {
        match self.policy {
            _ if items.len() == 1 => Value::Scalar(boxed(items.remove(0))),
            ArrayPolicy::Packed => Value::Packed(packed(items)),
            ArrayPolicy::Boxed => Value::Sequence(items.into_iter().map(boxed).collect()),
        }
    }

    fn elements<'a, T: Wire>(&self, input: &'a [u8], count: usize) -> IResult<&'a [u8], Vec<T>> {
        nom::multi::count(T::parser(self.order), count).parse(input)
    }

    fn value<'a>(
        &self,
        input: &'a [u8],
        basic_type: DbrBasicType,
        count: usize,
    ) -> IResult<&'a [u8], Value> {
        let (input, value) = match basic_type {
            DbrBasicType::String => {
                let mut input = input;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let (rest, item) = self.text(input, MAX_STRING_SIZE)?;
                    items.push(Scalar::String(item));
                    input = rest;
                }
                // Strings are never packed
                let value = match items.len() {
                    1 => Value::Scalar(items.remove(0)),
                    _ => Value::Sequence(items),
                };
                (input, value)
            }
            DbrBasicType::Int => {
                let (input, items) = self.elements::<i16>(input, count)?;
                (input, self.shape(items, Scalar::Int, PackedArray::Int))
            }
            DbrBasicType::Float => {
                let (input, items) = self.elements::<f32>(input, count)?;
                (input, self.shape(items, Scalar::Float, PackedArray::Float))
            }
            DbrBasicType::Enum => {
                let (input, items) = self.elements::<u16>(input, count)?;
                (input, self.shape(items, Scalar::Enum, PackedArray::Enum))
            }
            DbrBasicType::Char => {
                let (input, items) = self.elements::<u8>(input, count)?;
                (input, self.shape(items, Scalar::Char, PackedArray::Char))
            }
            DbrBasicType::Long => {
                let (input, items) = self.elements::<i32>(input, count)?;
                (input, self.shape(items, Scalar::Long, PackedArray::Long))
            }
            DbrBasicType::Double => {
                let (input, items) = self.elements::<f64>(input, count)?;
                (input, self.shape(items, Scalar::Double, PackedArray::Double))
            }
        };
        Ok((input, value))
    }

    fn record<'a>(
        &self,
        input: &'a [u8],
        dbr_type: DbrType,
        count: usize,
    ) -> IResult<&'a [u8], ValueRecord> {
        let mut record = ValueRecord::new(dbr_type, Value::Sequence(Vec::new()));
        let input = match dbr_type.category {
            DbrCategory::Basic
            | DbrCategory::PutAckT
            | DbrCategory::PutAckS
            | DbrCategory::ClassName => input,
            DbrCategory::Status => {
                let (input, status) = self.status(input)?;
                record.status = Some(status);
                input
            }
            DbrCategory::Time => {
                let (input, status) = self.status(input)?;
                let (input, timestamp) = self.timestamp(input)?;
                record.status = Some(status);
                record.timestamp = Some(timestamp);
                input
            }
            DbrCategory::Graphics | DbrCategory::Control => {
                let (input, status) = self.status(input)?;
                let control = dbr_type.category == DbrCategory::Control;
                let (input, graphics) = self.graphics(input, dbr_type.basic_type, control)?;
                record.status = Some(status);
                record.graphics = graphics;
                input
            }
            DbrCategory::StsAckString => {
                let (input, status) = self.status(input)?;
                let (input, (ackt, acks)) =
                    (u16::parser(self.order), u16::parser(self.order)).parse(input)?;
                record.status = Some(status);
                record.acknowledgement = Some(Acknowledgement { ackt, acks });
                input
            }
        };
        let (input, _) = self.skip(input, dbr_type.get_metadata_padding())?;
        let (input, value) = self.value(input, dbr_type.basic_type, count)?;
        record.value = value;
        Ok((input, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::ByteOrder,
        dbr::{DBR_CHAR, DBR_DOUBLE, DBR_SHORT, DBR_STRING, DBR_STSACK_STRING},
    };

    fn be() -> Codec {
        Codec::default().with_byte_order(ByteOrder::Big)
    }

    #[test]
    fn plain_scalars() {
        let record = be().decode(DBR_DOUBLE, 1, &2.5f64.to_be_bytes()).unwrap();
        assert_eq!(record.value, Value::Scalar(Scalar::Double(2.5)));
        assert_eq!(record.status, None);
        assert_eq!(record.timestamp, None);

        let record = be().decode(DBR_SHORT, 1, &[0xFF, 0xFE]).unwrap();
        assert_eq!(record.value, Scalar::Int(-2).into());

        let record = Codec::default()
            .with_byte_order(ByteOrder::Little)
            .decode(DBR_SHORT, 1, &[0xFE, 0xFF])
            .unwrap();
        assert_eq!(record.value, Scalar::Int(-2).into());
    }

    #[test]
    fn strings_stop_at_nul() {
        let mut data = [0u8; 80];
        data[..5].copy_from_slice(b"hello");
        data[40..43].copy_from_slice(b"abc");
        data[44] = b'x';
        let record = be().decode(DBR_STRING, 2, &data).unwrap();
        assert_eq!(
            record.value,
            Value::Sequence(vec!["hello".into(), "abc".into()])
        );
        // Strings stay boxed even when packing is requested
        let record = be()
            .with_array_policy(ArrayPolicy::Packed)
            .decode(DBR_STRING, 2, &data)
            .unwrap();
        assert!(matches!(record.value, Value::Sequence(_)));
    }

    #[test]
    fn time_double_layout() {
        let mut data = vec![0, 7, 0, 2];
        data.extend_from_slice(&1_000u32.to_be_bytes());
        data.extend_from_slice(&250u32.to_be_bytes());
        data.extend_from_slice(&[0xAA; 4]);
        data.extend_from_slice(&(-1.0f64).to_be_bytes());
        let record = be()
            .decode("TIME_DOUBLE".parse().unwrap(), 1, &data)
            .unwrap();
        assert_eq!(record.status, Some(Status { status: 7, severity: 2 }));
        let timestamp = record.timestamp.unwrap();
        assert_eq!(timestamp.seconds, 631_153_000);
        assert_eq!(timestamp.nanoseconds, 250);
        assert_eq!(record.value, Scalar::Double(-1.0).into());
    }

    #[test]
    fn ctrl_double_fields() {
        let mut data = vec![0, 0, 0, 0, 0, 3, 0, 0];
        data.extend_from_slice(b"mm\0\0\0\0\0\0");
        for limit in 1..=8 {
            data.extend_from_slice(&(limit as f64).to_be_bytes());
        }
        data.extend_from_slice(&42.0f64.to_be_bytes());
        let record = be()
            .decode("CTRL_DOUBLE".parse().unwrap(), 1, &data)
            .unwrap();
        assert_eq!(record.units(), Some("mm"));
        assert_eq!(record.precision(), Some(3));
        let Some(Graphics::Double { limits, .. }) = record.graphics else {
            panic!("Expected double graphics, got {:?}", record.graphics);
        };
        assert_eq!(limits.upper_disp_limit, 1.0);
        assert_eq!(limits.lower_alarm_limit, 6.0);
        assert_eq!(limits.upper_ctrl_limit, Some(7.0));
        assert_eq!(limits.lower_ctrl_limit, Some(8.0));
        assert_eq!(record.value, Scalar::Double(42.0).into());
    }

    #[test]
    fn gr_enum_clamps_choice_count() {
        let mut data = vec![0, 0, 0, 0, 0, 99];
        for i in 0..MAX_ENUM_STATES {
            let mut slot = [0u8; MAX_ENUM_STRING_SIZE];
            let name = format!("S{i}");
            slot[..name.len()].copy_from_slice(name.as_bytes());
            data.extend_from_slice(&slot);
        }
        data.extend_from_slice(&[0, 15]);
        let record = be().decode("GR_ENUM".parse().unwrap(), 1, &data).unwrap();
        assert_eq!(record.enum_strings().unwrap().len(), MAX_ENUM_STATES);
        assert_eq!(record.enum_choice(), Some("S15"));

        data[4..6].copy_from_slice(&(-3i16).to_be_bytes());
        let record = be().decode("GR_ENUM".parse().unwrap(), 1, &data).unwrap();
        assert_eq!(record.enum_strings(), Some(&[][..]));
    }

    #[test]
    fn sts_char_padding() {
        let record = be()
            .decode("STS_CHAR".parse().unwrap(), 3, &[0, 1, 0, 1, 0xEE, 1, 2, 3])
            .unwrap();
        assert_eq!(record.value.to_f64s(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn stsack_string() {
        let mut data = vec![0, 3, 0, 2, 0, 1, 0, 2];
        data.extend_from_slice(&[b'o', b'k', 0]);
        data.resize(48, 0);
        let record = be().decode(DBR_STSACK_STRING, 1, &data).unwrap();
        assert_eq!(record.acknowledgement, Some(Acknowledgement { ackt: 1, acks: 2 }));
        assert_eq!(record.value, Scalar::from("ok").into());
    }

    #[test]
    fn truncated_and_unknown() {
        assert_eq!(
            be().decode(DBR_CHAR, 4, &[1, 2, 3]),
            Err(CodecError::TruncatedRecord {
                dbr_type: DBR_CHAR,
                count: 4,
                required: 4,
                actual: 3
            })
        );
        assert_eq!(
            be().decode_tag(39, 1, &[0; 64]),
            Err(CodecError::UnsupportedType(39))
        );
        let empty = be().decode(DBR_DOUBLE, 0, &[]).unwrap();
        assert!(empty.value.is_empty());
    }
}
