//! Decoded representations of DBR records.
//!
//! A [`ValueRecord`] is what one read of a channel produces: the [`Value`] plus exactly
//! the metadata that the [`DbrCategory`](crate::dbr::DbrCategory) of its tag carries.
//! A field missing for a lower category is not an error, it is the defined shape of
//! that category.
//!
//! Values with a single element are always a bare [`Scalar`]. Anything else is either
//! a [`Value::Sequence`] of boxed scalars, or, when requested through
//! [`ArrayPolicy::Packed`](crate::codec::ArrayPolicy), a contiguous [`PackedArray`] of
//! the native element type. The two array forms compare equal whenever their elements
//! do.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::{
    alarm::{AlarmSeverity, Status},
    dbr::{DbrBasicType, DbrType},
    utils::text_from_chars,
};

/// Seconds between the POSIX epoch and the EPICS epoch (1990-01-01 00:00:00 UTC)
pub const POSIX_TIME_AT_EPICS_EPOCH: i64 = 631_152_000;

/// A single element of a value
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Int(i16),
    Float(f32),
    Enum(u16),
    Char(u8),
    Long(i32),
    Double(f64),
}

impl Scalar {
    pub fn basic_type(&self) -> DbrBasicType {
        match self {
            Scalar::String(_) => DbrBasicType::String,
            Scalar::Int(_) => DbrBasicType::Int,
            Scalar::Float(_) => DbrBasicType::Float,
            Scalar::Enum(_) => DbrBasicType::Enum,
            Scalar::Char(_) => DbrBasicType::Char,
            Scalar::Long(_) => DbrBasicType::Long,
            Scalar::Double(_) => DbrBasicType::Double,
        }
    }

    /// Widen a numeric scalar to f64. Every numeric CA type is exactly representable.
    pub fn to_f64(&self) -> Option<f64> {
        Some(match self {
            Scalar::String(_) => return None,
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v as f64,
            Scalar::Enum(v) => *v as f64,
            Scalar::Char(v) => *v as f64,
            Scalar::Long(v) => *v as f64,
            Scalar::Double(v) => *v,
        })
    }
}

/// Implement a From<datatype> for a specific scalar kind
macro_rules! impl_scalar_conversions {
    ($variant:ident, $typ:ty) => {
        impl From<$typ> for Scalar {
            fn from(value: $typ) -> Self {
                Scalar::$variant(value)
            }
        }
    };
}
impl_scalar_conversions!(String, String);
impl_scalar_conversions!(Int, i16);
impl_scalar_conversions!(Float, f32);
impl_scalar_conversions!(Enum, u16);
impl_scalar_conversions!(Char, u8);
impl_scalar_conversions!(Long, i32);
impl_scalar_conversions!(Double, f64);

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

/// A numeric array held contiguously in its native element type
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PackedArray {
    Int(Vec<i16>),
    Float(Vec<f32>),
    Enum(Vec<u16>),
    Char(Vec<u8>),
    Long(Vec<i32>),
    Double(Vec<f64>),
}

impl PackedArray {
    pub fn len(&self) -> usize {
        match self {
            PackedArray::Int(v) => v.len(),
            PackedArray::Float(v) => v.len(),
            PackedArray::Enum(v) => v.len(),
            PackedArray::Char(v) => v.len(),
            PackedArray::Long(v) => v.len(),
            PackedArray::Double(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn basic_type(&self) -> DbrBasicType {
        match self {
            PackedArray::Int(_) => DbrBasicType::Int,
            PackedArray::Float(_) => DbrBasicType::Float,
            PackedArray::Enum(_) => DbrBasicType::Enum,
            PackedArray::Char(_) => DbrBasicType::Char,
            PackedArray::Long(_) => DbrBasicType::Long,
            PackedArray::Double(_) => DbrBasicType::Double,
        }
    }
    /// Box a single element
    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            PackedArray::Int(v) => v.get(index).copied().map(Scalar::Int),
            PackedArray::Float(v) => v.get(index).copied().map(Scalar::Float),
            PackedArray::Enum(v) => v.get(index).copied().map(Scalar::Enum),
            PackedArray::Char(v) => v.get(index).copied().map(Scalar::Char),
            PackedArray::Long(v) => v.get(index).copied().map(Scalar::Long),
            PackedArray::Double(v) => v.get(index).copied().map(Scalar::Double),
        }
    }
}

/// The value of a record: one scalar, or an array in either representation
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
    Packed(PackedArray),
}

impl PartialEq for Value {
    /// Arrays are equal across representations; a scalar never equals an array
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Scalar(_), _) | (_, Value::Scalar(_)) => false,
            (a, b) => a.len() == b.len() && (0..a.len()).all(|i| a.get(i) == b.get(i)),
        }
    }
}

impl Value {
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Sequence(items) => items.len(),
            Value::Packed(array) => array.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            Value::Scalar(scalar) => (index == 0).then(|| scalar.clone()),
            Value::Sequence(items) => items.get(index).cloned(),
            Value::Packed(array) => array.get(index),
        }
    }

    /// The elements of this value, boxed, regardless of representation
    pub fn to_scalars(&self) -> Vec<Scalar> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// All elements widened to f64, if this is a numeric value
    pub fn to_f64s(&self) -> Option<Vec<f64>> {
        self.to_scalars().iter().map(Scalar::to_f64).collect()
    }

    /// Render STRING or CHAR data as text
    ///
    /// CHAR arrays are read up to the first zero byte, which is how CA carries strings
    /// longer than the 40 characters a `STRING` can hold.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s.clone()),
            Value::Scalar(Scalar::Char(c)) => Some(text_from_chars(&[*c])),
            Value::Packed(PackedArray::Char(chars)) => Some(text_from_chars(chars)),
            Value::Sequence(items) => items
                .iter()
                .map(|s| match s {
                    Scalar::Char(c) => Some(*c),
                    _ => None,
                })
                .collect::<Option<Vec<u8>>>()
                .map(|chars| text_from_chars(&chars)),
            _ => None,
        }
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Value::Scalar(value)
    }
}

impl From<Vec<Scalar>> for Value {
    fn from(value: Vec<Scalar>) -> Self {
        Value::Sequence(value)
    }
}

impl From<PackedArray> for Value {
    fn from(value: PackedArray) -> Self {
        Value::Packed(value)
    }
}

/// A point in time, as seconds and nanoseconds since the POSIX epoch
///
/// On the wire, CA counts seconds from the EPICS epoch instead; conversion between the
/// two adds or removes [`POSIX_TIME_AT_EPICS_EPOCH`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: i32,
}

impl Default for Timestamp {
    /// The EPICS epoch
    fn default() -> Self {
        Self::from_epics(0, 0)
    }
}

impl Timestamp {
    pub fn from_epics(sec_past_epoch: u32, nsec: u32) -> Self {
        Self {
            seconds: sec_past_epoch as i64 + POSIX_TIME_AT_EPICS_EPOCH,
            nanoseconds: nsec as i32,
        }
    }

    /// Convert back to the `(secPastEpoch, nsec)` pair carried on the wire
    ///
    /// Times outside the range the wire can hold (before 1990, or after early 2126)
    /// saturate at its ends. Nanoseconds are kept within `0..1_000_000_000`.
    pub fn to_epics(&self) -> (u32, u32) {
        let seconds = self.seconds.saturating_sub(POSIX_TIME_AT_EPICS_EPOCH);
        (
            seconds.clamp(0, u32::MAX as i64) as u32,
            self.nanoseconds.clamp(0, 999_999_999) as u32,
        )
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 * 1.0e-9
    }

    pub fn to_system_time(&self) -> Option<SystemTime> {
        let seconds = u64::try_from(self.seconds).ok()?;
        let nanoseconds = u32::try_from(self.nanoseconds).ok()?;
        UNIX_EPOCH.checked_add(Duration::new(seconds, nanoseconds))
    }
}

impl From<SystemTime> for Timestamp {
    /// Times before 1970 clamp to the POSIX epoch
    fn from(value: SystemTime) -> Self {
        let since = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: since.as_secs() as i64,
            nanoseconds: since.subsec_nanos() as i32,
        }
    }
}

/// Display, alarm and warning limits, and control limits for `CTRL` kinds
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Limits<T> {
    pub upper_disp_limit: T,
    pub lower_disp_limit: T,
    pub upper_alarm_limit: T,
    pub upper_warning_limit: T,
    pub lower_warning_limit: T,
    pub lower_alarm_limit: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_ctrl_limit: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_ctrl_limit: Option<T>,
}

impl<T: Default> Limits<T> {
    fn zeroed(control: bool) -> Self {
        Self {
            upper_ctrl_limit: control.then(T::default),
            lower_ctrl_limit: control.then(T::default),
            ..Default::default()
        }
    }
}

/// The metadata carried by the `GR` and `CTRL` categories
///
/// `STRING` kinds carry none of this, even in the `GR` and `CTRL` categories.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Graphics {
    Enum {
        enum_strings: Vec<String>,
    },
    Char {
        units: String,
        limits: Limits<u8>,
    },
    Int {
        units: String,
        limits: Limits<i16>,
    },
    Long {
        units: String,
        limits: Limits<i32>,
    },
    Float {
        units: String,
        limits: Limits<f32>,
        precision: i16,
    },
    Double {
        units: String,
        limits: Limits<f64>,
        precision: i16,
    },
}

impl Graphics {
    /// Empty metadata for a basic type, or None if the type carries none
    pub fn default_for(kind: DbrBasicType, control: bool) -> Option<Self> {
        Some(match kind {
            DbrBasicType::String => return None,
            DbrBasicType::Enum => Graphics::Enum {
                enum_strings: Vec::new(),
            },
            DbrBasicType::Char => Graphics::Char {
                units: String::new(),
                limits: Limits::zeroed(control),
            },
            DbrBasicType::Int => Graphics::Int {
                units: String::new(),
                limits: Limits::zeroed(control),
            },
            DbrBasicType::Long => Graphics::Long {
                units: String::new(),
                limits: Limits::zeroed(control),
            },
            DbrBasicType::Float => Graphics::Float {
                units: String::new(),
                limits: Limits::zeroed(control),
                precision: 0,
            },
            DbrBasicType::Double => Graphics::Double {
                units: String::new(),
                limits: Limits::zeroed(control),
                precision: 0,
            },
        })
    }

    pub fn basic_type(&self) -> DbrBasicType {
        match self {
            Graphics::Enum { .. } => DbrBasicType::Enum,
            Graphics::Char { .. } => DbrBasicType::Char,
            Graphics::Int { .. } => DbrBasicType::Int,
            Graphics::Long { .. } => DbrBasicType::Long,
            Graphics::Float { .. } => DbrBasicType::Float,
            Graphics::Double { .. } => DbrBasicType::Double,
        }
    }

    pub fn units(&self) -> Option<&str> {
        match self {
            Graphics::Enum { .. } => None,
            Graphics::Char { units, .. }
            | Graphics::Int { units, .. }
            | Graphics::Long { units, .. }
            | Graphics::Float { units, .. }
            | Graphics::Double { units, .. } => Some(units),
        }
    }

    pub fn precision(&self) -> Option<i16> {
        match self {
            Graphics::Float { precision, .. } | Graphics::Double { precision, .. } => {
                Some(*precision)
            }
            _ => None,
        }
    }

    pub fn enum_strings(&self) -> Option<&[String]> {
        match self {
            Graphics::Enum { enum_strings } => Some(enum_strings),
            _ => None,
        }
    }
}

/// Acknowledgement state carried by `DBR_STSACK_STRING`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    /// Whether transient alarms must be acknowledged
    pub ackt: u16,
    /// The highest unacknowledged severity
    pub acks: u16,
}

/// Structured result of decoding one DBR record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueRecord {
    #[serde(rename = "type")]
    pub dbr_type: DbrType,
    pub value: Value,
    #[serde(flatten)]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(flatten)]
    pub graphics: Option<Graphics>,
    #[serde(flatten)]
    pub acknowledgement: Option<Acknowledgement>,
}

impl ValueRecord {
    /// A record with no metadata attached
    pub fn new(dbr_type: DbrType, value: impl Into<Value>) -> Self {
        Self {
            dbr_type,
            value: value.into(),
            status: None,
            timestamp: None,
            graphics: None,
            acknowledgement: None,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
    pub fn with_graphics(mut self, graphics: Graphics) -> Self {
        self.graphics = Some(graphics);
        self
    }
    pub fn with_acknowledgement(mut self, acknowledgement: Acknowledgement) -> Self {
        self.acknowledgement = Some(acknowledgement);
        self
    }

    /// Number of elements in the value
    pub fn count(&self) -> usize {
        self.value.len()
    }

    pub fn severity(&self) -> Option<AlarmSeverity> {
        self.status.as_ref().and_then(Status::alarm_severity)
    }
    pub fn units(&self) -> Option<&str> {
        self.graphics.as_ref().and_then(Graphics::units)
    }
    pub fn precision(&self) -> Option<i16> {
        self.graphics.as_ref().and_then(Graphics::precision)
    }
    pub fn enum_strings(&self) -> Option<&[String]> {
        self.graphics.as_ref().and_then(Graphics::enum_strings)
    }

    /// For a scalar enum with a choice table, the name of the selected choice
    pub fn enum_choice(&self) -> Option<&str> {
        let Value::Scalar(Scalar::Enum(index)) = self.value else {
            return None;
        };
        self.enum_strings()?
            .get(index as usize)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbr::DBR_DOUBLE;

    #[test]
    fn array_representations_are_equal() {
        let packed = Value::Packed(PackedArray::Long(vec![1, -2, 3]));
        let boxed = Value::Sequence(vec![1i32.into(), (-2i32).into(), 3i32.into()]);
        assert_eq!(packed, boxed);
        assert_eq!(boxed, packed);
        assert_ne!(packed, Value::Sequence(vec![1i32.into(), (-2i32).into()]));
        // Same numbers, different element type
        assert_ne!(packed, Value::Packed(PackedArray::Double(vec![1.0, -2.0, 3.0])));

        // A single-element array is not the same as a scalar
        let scalar = Value::Scalar(Scalar::Long(1));
        assert_ne!(scalar, Value::Packed(PackedArray::Long(vec![1])));
        assert_ne!(scalar, Value::Sequence(vec![Scalar::Long(1)]));
    }

    #[test]
    fn char_arrays_as_text() {
        let value = Value::Packed(PackedArray::Char(b"hello\0junk".to_vec()));
        assert_eq!(value.to_text().as_deref(), Some("hello"));
        let value = Value::Sequence(b"AB\0".iter().map(|c| Scalar::Char(*c)).collect());
        assert_eq!(value.to_text().as_deref(), Some("AB"));
        assert_eq!(Value::Scalar(Scalar::Char(0)).to_text().as_deref(), Some(""));
        assert_eq!(Value::Scalar(Scalar::Long(7)).to_text(), None);
    }

    #[test]
    fn timestamps() {
        let epoch = Timestamp::from_epics(0, 0);
        assert_eq!(epoch.seconds, POSIX_TIME_AT_EPICS_EPOCH);
        assert_eq!(epoch, Timestamp::default());
        assert_eq!(epoch.to_epics(), (0, 0));

        let ts = Timestamp::from_epics(1110579609, 500_000_000);
        assert_eq!(ts.seconds, 1741731609);
        assert!((ts.as_secs_f64() - 1741731609.5).abs() < 1e-6);
        let system = ts.to_system_time().unwrap();
        assert_eq!(Timestamp::from(system), ts);
    }

    #[test]
    fn timestamps_outside_the_wire_range_saturate() {
        let unix_epoch = Timestamp {
            seconds: 0,
            nanoseconds: 0,
        };
        assert_eq!(unix_epoch.to_epics(), (0, 0));
        let far_future = Timestamp {
            seconds: POSIX_TIME_AT_EPICS_EPOCH + u32::MAX as i64 + 10,
            nanoseconds: 5,
        };
        assert_eq!(far_future.to_epics(), (u32::MAX, 5));
        let extreme = Timestamp {
            seconds: i64::MIN,
            nanoseconds: -1,
        };
        assert_eq!(extreme.to_epics(), (0, 0));
        let overfull = Timestamp {
            seconds: POSIX_TIME_AT_EPICS_EPOCH + 1,
            nanoseconds: 2_000_000_000,
        };
        assert_eq!(overfull.to_epics(), (1, 999_999_999));
        let last = Timestamp::from_epics(u32::MAX, 999_999_999);
        assert_eq!(last.to_epics(), (u32::MAX, 999_999_999));
    }

    #[test]
    fn serializes_flat() {
        let record = ValueRecord::new(DBR_DOUBLE, Scalar::Double(2.5)).with_status(Status {
            status: 0,
            severity: 1,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "DBR_DOUBLE", "value": 2.5, "status": 0, "severity": 1})
        );
    }

    #[test]
    fn enum_choice() {
        let dbr_type = "GR_ENUM".parse().unwrap();
        let record = ValueRecord::new(dbr_type, Scalar::Enum(1)).with_graphics(Graphics::Enum {
            enum_strings: vec!["CLOSED".into(), "OPEN".into()],
        });
        assert_eq!(record.enum_choice(), Some("OPEN"));
        assert_eq!(record.units(), None);
    }
}
