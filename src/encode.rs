//! Marshalling host values into raw DBR payloads.
//!
//! Clients only ever write the plain kinds, plus the two alarm acknowledgement kinds.
//! [`Codec::encode`] takes a loosely-typed [`HostValue`], works out how many elements
//! to send, coerces every element to the destination type and packs the result.
//! [`Codec::write_record`] is the reverse of [`Codec::decode`]: it lays out a full
//! [`ValueRecord`], metadata included, as a server would send it.
use std::{borrow::Cow, iter};

use num::traits::AsPrimitive;
use tracing::{debug, trace};

use crate::{
    codec::{ByteOrder, Codec, CodecError, Wire},
    dbr::{
        DBR_STRING, DbrBasicType, DbrCategory, DbrType, MAX_ENUM_STATES, MAX_ENUM_STRING_SIZE,
        MAX_STRING_SIZE, MAX_UNITS_SIZE,
    },
    record::{Graphics, Limits, Scalar, ValueRecord},
    utils::string_to_fixed_length_bytes,
};

/// A dynamically-typed value handed over for writing
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    None,
    Integer(i64),
    Float(f64),
    Text(String),
    Sequence(Vec<HostValue>),
    Mapping(Vec<(String, HostValue)>),
}

impl HostValue {
    fn describe(&self) -> &'static str {
        match self {
            HostValue::None => "none",
            HostValue::Integer(_) => "integer",
            HostValue::Float(_) => "float",
            HostValue::Text(_) => "text",
            HostValue::Sequence(_) => "sequence",
            HostValue::Mapping(_) => "mapping",
        }
    }
}

macro_rules! impl_host_integer {
    ($($typ:ty),*) => {
        $(
            impl From<$typ> for HostValue {
                fn from(value: $typ) -> Self {
                    HostValue::Integer(value.into())
                }
            }
        )*
    };
}
impl_host_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for HostValue {
    fn from(value: f32) -> Self {
        HostValue::Float(value.into())
    }
}
impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}
impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Text(value.to_string())
    }
}
impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Text(value)
    }
}
impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(value: Vec<T>) -> Self {
        HostValue::Sequence(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for HostValue {
    /// Booleans become the integers 0 and 1
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => HostValue::None,
            Json::Bool(b) => HostValue::Integer(b.into()),
            Json::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Integer(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => HostValue::Text(s),
            Json::Array(items) => HostValue::Sequence(items.into_iter().map(Into::into).collect()),
            Json::Object(map) => {
                HostValue::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A payload ready to be handed to a put request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPut {
    /// The kind actually written; may differ from the one requested
    pub dbr_type: DbrType,
    pub count: usize,
    pub data: Vec<u8>,
}

#[derive(Copy, Clone, Debug)]
enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn parse(text: &str) -> Result<Self, CodecError> {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Ok(Number::Integer(value));
        }
        trimmed
            .parse::<f64>()
            .map(Number::Float)
            .map_err(|_| CodecError::TypeMismatch(text.to_string()))
    }

    fn from_host(value: &HostValue) -> Result<Self, CodecError> {
        match value {
            HostValue::Integer(i) => Ok(Number::Integer(*i)),
            HostValue::Float(f) => Ok(Number::Float(*f)),
            HostValue::Text(text) => Number::parse(text),
            other => Err(CodecError::InvalidValueType(format!(
                "{} element in a numeric array",
                other.describe()
            ))),
        }
    }

    /// Narrow to the destination type with the usual numeric cast rules
    fn cast<T>(self) -> T
    where
        T: Copy + 'static,
        i64: AsPrimitive<T>,
        f64: AsPrimitive<T>,
    {
        match self {
            Number::Integer(value) => value.as_(),
            Number::Float(value) => value.as_(),
        }
    }
}

fn put_text(text: &str, width: usize, out: &mut Vec<u8>) {
    let mut slot = string_to_fixed_length_bytes(text, width);
    if slot.len() < text.len() {
        debug!(
            "Truncating {} byte string to {} bytes",
            text.len(),
            slot.len()
        );
    }
    slot.resize(width, 0);
    out.extend_from_slice(&slot);
}

/// Write a text slot that keeps its final byte as a terminator
fn put_terminated_text(text: &str, width: usize, out: &mut Vec<u8>) {
    let mut slot = string_to_fixed_length_bytes(text, width - 1);
    slot.resize(width, 0);
    out.extend_from_slice(&slot);
}

impl Codec {
    /// Default largest element count for a write of the given basic type
    pub fn default_element_limit(&self, basic_type: DbrBasicType) -> usize {
        (self.options.max_array_bytes / basic_type.unit_size()).max(1)
    }

    /// Encode a host value as the payload of a write
    ///
    /// `count` is the number of elements requested by the caller and
    /// `element_limit` the element count of the destination channel; when unknown,
    /// the limit falls back to what fits in `max_array_bytes`. The returned
    /// [`EncodedPut::dbr_type`] differs from the requested one when an `ENUM` is
    /// written by choice name, which is sent as a `DBR_STRING`.
    pub fn encode(
        &self,
        dbr_type: DbrType,
        count: Option<usize>,
        value: &HostValue,
        element_limit: Option<usize>,
    ) -> Result<EncodedPut, CodecError> {
        if !dbr_type.is_valid() || !dbr_type.is_writable() {
            return Err(CodecError::UnsupportedType(dbr_type.into()));
        }
        trace!("Encoding {} value as {dbr_type}", value.describe());
        let acknowledgement = matches!(
            dbr_type.category,
            DbrCategory::PutAckT | DbrCategory::PutAckS
        );

        let (target, items, clip): (DbrType, Cow<'_, [HostValue]>, bool) = match value {
            HostValue::None | HostValue::Mapping(_) => {
                return Err(CodecError::InvalidValueType(format!(
                    "Cannot write a {} to {dbr_type}",
                    value.describe()
                )));
            }
            HostValue::Text(_)
                if !acknowledgement && dbr_type.basic_type == DbrBasicType::String =>
            {
                (dbr_type, Cow::Borrowed(std::slice::from_ref(value)), false)
            }
            HostValue::Text(text)
                if !acknowledgement && dbr_type.basic_type == DbrBasicType::Enum =>
            {
                debug!("Writing enum choice {text:?} by name, as DBR_STRING");
                (DBR_STRING, Cow::Borrowed(std::slice::from_ref(value)), false)
            }
            HostValue::Text(text) if dbr_type.basic_type == DbrBasicType::Char => {
                debug!("Writing {} byte string as a CHAR array", text.len());
                let chars = text
                    .bytes()
                    .chain(iter::once(0))
                    .map(HostValue::from)
                    .collect::<Vec<_>>();
                (dbr_type, Cow::Owned(chars), true)
            }
            HostValue::Text(text) => {
                let number = match Number::parse(text)? {
                    Number::Integer(i) => HostValue::Integer(i),
                    Number::Float(f) => HostValue::Float(f),
                };
                (dbr_type, Cow::Owned(vec![number]), false)
            }
            HostValue::Integer(_) | HostValue::Float(_) => {
                (dbr_type, Cow::Borrowed(std::slice::from_ref(value)), false)
            }
            HostValue::Sequence(items) => (dbr_type, Cow::Borrowed(items.as_slice()), true),
        };

        let count = if clip {
            let limit =
                element_limit.unwrap_or_else(|| self.default_element_limit(target.basic_type));
            let clipped = items.len().min(limit).min(count.unwrap_or(usize::MAX));
            if clipped < items.len() {
                debug!(
                    "Writing {clipped} of {} elements to {target}",
                    items.len()
                );
            }
            clipped
        } else {
            1
        };

        let order = self.options.byte_order;
        let mut data = Vec::with_capacity(count * target.basic_type.unit_size());
        for item in &items[..count] {
            match item {
                HostValue::Sequence(_) | HostValue::Mapping(_) | HostValue::None => {
                    return Err(CodecError::InvalidValueType(format!(
                        "{} element in a write to {target}",
                        item.describe()
                    )));
                }
                _ => write_element(target.basic_type, item, order, &mut data)?,
            }
        }
        Ok(EncodedPut {
            dbr_type: target,
            count,
            data,
        })
    }

    /// Lay out a complete record, as it would be sent in reply to a read
    ///
    /// Metadata missing from the record is written as zeroes. The value must already
    /// hold elements of the record's basic type.
    pub fn write_record(&self, record: &ValueRecord) -> Result<Vec<u8>, CodecError> {
        let dbr_type = record.dbr_type;
        if !dbr_type.is_valid() {
            return Err(CodecError::UnsupportedType(dbr_type.into()));
        }
        let order = self.options.byte_order;
        let mut out = Vec::with_capacity(dbr_type.size_n(record.count()).unwrap_or_default());

        if dbr_type.has_status() {
            let status = record.status.unwrap_or_default();
            status.status.put(order, &mut out);
            status.severity.put(order, &mut out);
        }
        match dbr_type.category {
            DbrCategory::Time => {
                let (seconds, nanoseconds) = record.timestamp.unwrap_or_default().to_epics();
                seconds.put(order, &mut out);
                nanoseconds.put(order, &mut out);
            }
            DbrCategory::Graphics | DbrCategory::Control => {
                let control = dbr_type.category == DbrCategory::Control;
                let graphics = match &record.graphics {
                    Some(graphics) => Some(Cow::Borrowed(graphics)),
                    None => Graphics::default_for(dbr_type.basic_type, control).map(Cow::Owned),
                };
                if let Some(graphics) = graphics {
                    if graphics.basic_type() != dbr_type.basic_type {
                        return Err(CodecError::InvalidValueType(format!(
                            "{} metadata in a {dbr_type} record",
                            graphics.basic_type().name()
                        )));
                    }
                    write_graphics(&graphics, control, order, &mut out);
                }
            }
            DbrCategory::StsAckString => {
                let acknowledgement = record.acknowledgement.unwrap_or_default();
                acknowledgement.ackt.put(order, &mut out);
                acknowledgement.acks.put(order, &mut out);
            }
            _ => (),
        }
        out.resize(out.len() + dbr_type.get_metadata_padding(), 0);

        for scalar in record.value.to_scalars() {
            if scalar.basic_type() != dbr_type.basic_type {
                return Err(CodecError::InvalidValueType(format!(
                    "{} element in a {dbr_type} record",
                    scalar.basic_type().name()
                )));
            }
            write_scalar(&scalar, order, &mut out);
        }
        trace!("Wrote {dbr_type} record of {} bytes", out.len());
        Ok(out)
    }
}

fn write_element(
    basic_type: DbrBasicType,
    item: &HostValue,
    order: ByteOrder,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    match basic_type {
        DbrBasicType::String => {
            let text = match item {
                HostValue::Text(text) => Cow::Borrowed(text.as_str()),
                HostValue::Integer(i) => Cow::Owned(i.to_string()),
                HostValue::Float(f) => Cow::Owned(f.to_string()),
                other => {
                    return Err(CodecError::InvalidValueType(format!(
                        "{} element in a string write",
                        other.describe()
                    )));
                }
            };
            put_text(&text, MAX_STRING_SIZE, out);
        }
        DbrBasicType::Int => Number::from_host(item)?.cast::<i16>().put(order, out),
        DbrBasicType::Float => Number::from_host(item)?.cast::<f32>().put(order, out),
        DbrBasicType::Enum => Number::from_host(item)?.cast::<u16>().put(order, out),
        DbrBasicType::Char => Number::from_host(item)?.cast::<u8>().put(order, out),
        DbrBasicType::Long => Number::from_host(item)?.cast::<i32>().put(order, out),
        DbrBasicType::Double => Number::from_host(item)?.cast::<f64>().put(order, out),
    }
    Ok(())
}

fn write_scalar(scalar: &Scalar, order: ByteOrder, out: &mut Vec<u8>) {
    match scalar {
        Scalar::String(text) => put_text(text, MAX_STRING_SIZE, out),
        Scalar::Int(v) => v.put(order, out),
        Scalar::Float(v) => v.put(order, out),
        Scalar::Enum(v) => v.put(order, out),
        Scalar::Char(v) => v.put(order, out),
        Scalar::Long(v) => v.put(order, out),
        Scalar::Double(v) => v.put(order, out),
    }
}

fn write_limits<T: Wire>(limits: &Limits<T>, control: bool, order: ByteOrder, out: &mut Vec<u8>) {
    for limit in [
        limits.upper_disp_limit,
        limits.lower_disp_limit,
        limits.upper_alarm_limit,
        limits.upper_warning_limit,
        limits.lower_warning_limit,
        limits.lower_alarm_limit,
    ] {
        limit.put(order, out);
    }
    if control {
        limits.upper_ctrl_limit.unwrap_or_default().put(order, out);
        limits.lower_ctrl_limit.unwrap_or_default().put(order, out);
    }
}

fn write_graphics(graphics: &Graphics, control: bool, order: ByteOrder, out: &mut Vec<u8>) {
    match graphics {
        Graphics::Enum { enum_strings } => {
            let no_str = enum_strings.len().min(MAX_ENUM_STATES);
            (no_str as i16).put(order, out);
            for i in 0..MAX_ENUM_STATES {
                let choice = enum_strings.get(i).map(String::as_str).unwrap_or_default();
                put_terminated_text(choice, MAX_ENUM_STRING_SIZE, out);
            }
        }
        Graphics::Char { units, limits } => {
            put_terminated_text(units, MAX_UNITS_SIZE, out);
            write_limits(limits, control, order, out);
        }
        Graphics::Int { units, limits } => {
            put_terminated_text(units, MAX_UNITS_SIZE, out);
            write_limits(limits, control, order, out);
        }
        Graphics::Long { units, limits } => {
            put_terminated_text(units, MAX_UNITS_SIZE, out);
            write_limits(limits, control, order, out);
        }
        Graphics::Float {
            units,
            limits,
            precision,
        } => {
            precision.put(order, out);
            0i16.put(order, out);
            put_terminated_text(units, MAX_UNITS_SIZE, out);
            write_limits(limits, control, order, out);
        }
        Graphics::Double {
            units,
            limits,
            precision,
        } => {
            precision.put(order, out);
            0i16.put(order, out);
            put_terminated_text(units, MAX_UNITS_SIZE, out);
            write_limits(limits, control, order, out);
        }
    }
}
