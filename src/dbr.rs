//! Represent the CA DBR type space, for data interchange.
//!
//! CA defines thirty-nine [DBR] kinds as fixed-layout structures used to transfer data
//! back and forth. Thirty-five of these can be broken down into seven basic array
//! types, which define the data, and five categories of attached metadata. This module
//! models the tag space and the byte layout of every tag; the records themselves are
//! represented in [`crate::record`].
//!
//! The basic types are enumerated in [`DbrBasicType`]. The options, and the native
//! type used to represent one element, are:
//! - [`DbrBasicType::String`] - a NUL-padded `[u8; 40]` slot
//! - [`DbrBasicType::Int`] ([`i16`]) - the protocol also calls this `SHORT`, both names
//!   are accepted when parsing.
//! - [`DbrBasicType::Float`] ([`f32`])
//! - [`DbrBasicType::Enum`] ([`u16`]) - an index into a table of up to sixteen
//!   `[u8; 26]` choice strings, which is carried by the `GR` and `CTRL` categories.
//! - [`DbrBasicType::Char`] ([`u8`])
//! - [`DbrBasicType::Long`] ([`i32`])
//! - [`DbrBasicType::Double`] ([`f64`])
//!
//! The five categories of metadata are enumerated by [`DbrCategory`]:
//! - [`DbrCategory::Basic`] - No extra metadata included, just the plain data value.
//! - [`DbrCategory::Status`] - Alarm status and severity in addition to the data.
//! - [`DbrCategory::Time`] - All of the information from `Status`, with a timestamp.
//! - [`DbrCategory::Graphics`] - Status plus units, display/alarm/warning limits, the
//!   precision of floating point types and the choice strings of enums.
//! - [`DbrCategory::Control`] - Everything in `Graphics`, plus control limits.
//!
//! In addition, there are four not-generically typed DBR kinds, which are given their
//! own category so that every tag is still a single [`DbrType`]:
//! - [`DBR_PUT_ACKT`] and [`DBR_PUT_ACKS`] - Alarm acknowledgement writes.
//! - [`DBR_STSACK_STRING`] - Status, acknowledgement state and a string value.
//! - [`DBR_CLASS_NAME`] - Returns the EPICS record type for the PV.
//!
//! [DBR]:
//!     https://docs.epics-controls.org/en/latest/internal/ca_protocol.html#payload-data-types
//!
use std::{convert::TryFrom, fmt, str::FromStr};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::codec::CodecError;

// Constants from EPICS
pub const MAX_STRING_SIZE: usize = 40;
pub const MAX_UNITS_SIZE: usize = 8;
pub const MAX_ENUM_STRING_SIZE: usize = 26;
pub const MAX_ENUM_STATES: usize = 16;
/// The highest valid DBR tag
pub const LAST_BUFFER_TYPE: u16 = 38;

/// Basic DBR Data types, independent of category
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DbrBasicType {
    String = 0,
    Int = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
}

impl DbrBasicType {
    /// Size of a single payload element of this type, in bytes
    pub const fn unit_size(self) -> usize {
        match self {
            DbrBasicType::String => MAX_STRING_SIZE,
            DbrBasicType::Int => 2,
            DbrBasicType::Float => 4,
            DbrBasicType::Enum => 2,
            DbrBasicType::Char => 1,
            DbrBasicType::Long => 4,
            DbrBasicType::Double => 8,
        }
    }

    pub fn is_numeric(self) -> bool {
        self != DbrBasicType::String
    }

    /// The name used by the protocol, e.g. `SHORT`
    pub fn name(self) -> &'static str {
        match self {
            DbrBasicType::String => "STRING",
            DbrBasicType::Int => "SHORT",
            DbrBasicType::Float => "FLOAT",
            DbrBasicType::Enum => "ENUM",
            DbrBasicType::Char => "CHAR",
            DbrBasicType::Long => "LONG",
            DbrBasicType::Double => "DOUBLE",
        }
    }
}

impl TryFrom<u16> for DbrBasicType {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == Self::String as u16 => Ok(Self::String),
            x if x == Self::Int as u16 => Ok(Self::Int),
            x if x == Self::Float as u16 => Ok(Self::Float),
            x if x == Self::Enum as u16 => Ok(Self::Enum),
            x if x == Self::Char as u16 => Ok(Self::Char),
            x if x == Self::Long as u16 => Ok(Self::Long),
            x if x == Self::Double as u16 => Ok(Self::Double),
            _ => Err(()),
        }
    }
}

/// Mapping of DBR categories
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DbrCategory {
    Basic = 0,
    Status = 1,
    Time = 2,
    Graphics = 3,
    Control = 4,
    /// The special `DBR_PUT_ACKT` acknowledge-transient write
    PutAckT,
    /// The special `DBR_PUT_ACKS` acknowledge-severity write
    PutAckS,
    /// The special single-valued `DBR_STSACK_STRING`
    StsAckString,
    /// The special single-valued `DBR_CLASS_NAME`
    ClassName,
}

impl TryFrom<u16> for DbrCategory {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == Self::Basic as u16 => Ok(Self::Basic),
            x if x == Self::Status as u16 => Ok(Self::Status),
            x if x == Self::Time as u16 => Ok(Self::Time),
            x if x == Self::Graphics as u16 => Ok(Self::Graphics),
            x if x == Self::Control as u16 => Ok(Self::Control),
            _ => Err(()),
        }
    }
}

/// Represent and translate from ID every possible combination of `DBR_*_*`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DbrType {
    pub basic_type: DbrBasicType,
    pub category: DbrCategory,
}

macro_rules! dbr_type_constants {
    ($($name:ident => ($basic:ident, $category:ident)),* $(,)?) => {
        $(
            pub const $name: DbrType = DbrType {
                basic_type: DbrBasicType::$basic,
                category: DbrCategory::$category,
            };
        )*
    };
}

dbr_type_constants! {
    DBR_STRING => (String, Basic),
    DBR_SHORT => (Int, Basic),
    DBR_FLOAT => (Float, Basic),
    DBR_ENUM => (Enum, Basic),
    DBR_CHAR => (Char, Basic),
    DBR_LONG => (Long, Basic),
    DBR_DOUBLE => (Double, Basic),
    DBR_PUT_ACKT => (Enum, PutAckT),
    DBR_PUT_ACKS => (Enum, PutAckS),
    DBR_STSACK_STRING => (String, StsAckString),
    DBR_CLASS_NAME => (String, ClassName),
}

impl TryFrom<u16> for DbrType {
    type Error = CodecError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            35 => Ok(DBR_PUT_ACKT),
            36 => Ok(DBR_PUT_ACKS),
            37 => Ok(DBR_STSACK_STRING),
            38 => Ok(DBR_CLASS_NAME),
            value if value < 35 => Ok(Self {
                basic_type: (value % 7)
                    .try_into()
                    .map_err(|_| CodecError::UnsupportedType(value))?,
                category: (value / 7)
                    .try_into()
                    .map_err(|_| CodecError::UnsupportedType(value))?,
            }),
            _ => Err(CodecError::UnsupportedType(value)),
        }
    }
}

/// The code reported for a [DbrType] built from a pair that has no tag
pub const INVALID_TAG: u16 = u16::MAX;

/// The numeric tag of a kind, or [INVALID_TAG] if the pair is not one the protocol
/// defines (e.g. a `Long` [DbrCategory::ClassName])
impl From<DbrType> for u16 {
    fn from(value: DbrType) -> Self {
        if !value.is_valid() {
            return INVALID_TAG;
        }
        match value.category {
            DbrCategory::PutAckT => 35,
            DbrCategory::PutAckS => 36,
            DbrCategory::StsAckString => 37,
            DbrCategory::ClassName => 38,
            category => category as u16 * 7 + value.basic_type as u16,
        }
    }
}

/// Byte layout of a DBR kind: a fixed metadata header followed by `count` elements
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    pub header_size: usize,
    pub unit_size: usize,
}

impl Layout {
    /// Total size of a record holding `count` elements, or None on overflow
    pub fn size_n(&self, count: usize) -> Option<usize> {
        count
            .checked_mul(self.unit_size)?
            .checked_add(self.header_size)
    }
}

impl DbrType {
    pub const fn new(basic_type: DbrBasicType, category: DbrCategory) -> Self {
        Self {
            basic_type,
            category,
        }
    }

    /// Iterate over every valid tag, in tag order
    pub fn all() -> impl Iterator<Item = DbrType> {
        (0..=LAST_BUFFER_TYPE).filter_map(|tag| DbrType::try_from(tag).ok())
    }

    /// Is this combination one of the tags the protocol defines?
    pub fn is_valid(&self) -> bool {
        match self.category {
            DbrCategory::PutAckT | DbrCategory::PutAckS => self.basic_type == DbrBasicType::Enum,
            DbrCategory::StsAckString | DbrCategory::ClassName => {
                self.basic_type == DbrBasicType::String
            }
            _ => true,
        }
    }

    /// The header size and element size of this kind
    ///
    /// The header includes any RISC alignment padding inserted before the value. See
    /// the `dbr_*` structures in `db_access.h`.
    pub fn layout(&self) -> Layout {
        use DbrBasicType as B;
        use DbrCategory as C;
        let header_size = match (self.category, self.basic_type) {
            (C::Basic | C::PutAckT | C::PutAckS | C::ClassName, _) => 0,
            (C::StsAckString, _) => 8,
            (C::Status, B::Char) => 5,
            (C::Status, B::Double) => 8,
            (C::Status, _) => 4,
            (C::Time, B::Int | B::Enum) => 14,
            (C::Time, B::Char) => 15,
            (C::Time, B::Double) => 16,
            (C::Time, _) => 12,
            (C::Graphics | C::Control, B::String) => 4,
            (C::Graphics | C::Control, B::Enum) => 6 + MAX_ENUM_STATES * MAX_ENUM_STRING_SIZE,
            (C::Graphics, B::Int) => 24,
            (C::Graphics, B::Float) => 40,
            (C::Graphics, B::Char) => 19,
            (C::Graphics, B::Long) => 36,
            (C::Graphics, B::Double) => 64,
            (C::Control, B::Int) => 28,
            (C::Control, B::Float) => 48,
            (C::Control, B::Char) => 21,
            (C::Control, B::Long) => 44,
            (C::Control, B::Double) => 80,
        };
        Layout {
            header_size,
            unit_size: self.basic_type.unit_size(),
        }
    }

    /// Shortcut for `self.layout().size_n(count)`
    pub fn size_n(&self, count: usize) -> Option<usize> {
        self.layout().size_n(count)
    }

    /// Give the lookup for the padding between the metadata and the value
    ///
    /// When encoding a record, there is a datatype-specific padding to be
    /// inserted between the metadata about the value and the actual value
    /// itself. This is given as a lookup table rather than a calculation.
    ///
    /// See <https://docs.epics-controls.org/en/latest/internal/ca_protocol.html#payload-data-types>
    pub fn get_metadata_padding(&self) -> usize {
        match (self.category, self.basic_type) {
            (DbrCategory::Status, DbrBasicType::Char) => 1,
            (DbrCategory::Status, DbrBasicType::Double) => 4,
            (DbrCategory::Time, DbrBasicType::Int) => 2,
            (DbrCategory::Time, DbrBasicType::Enum) => 2,
            (DbrCategory::Time, DbrBasicType::Char) => 3,
            (DbrCategory::Time, DbrBasicType::Double) => 4,
            (DbrCategory::Graphics, DbrBasicType::Char) => 1,
            (DbrCategory::Control, DbrBasicType::Char) => 1,
            _ => 0,
        }
    }

    pub fn is_plain(&self) -> bool {
        self.category == DbrCategory::Basic
    }
    pub fn is_sts(&self) -> bool {
        self.category == DbrCategory::Status
    }
    pub fn is_time(&self) -> bool {
        self.category == DbrCategory::Time
    }
    pub fn is_gr(&self) -> bool {
        self.category == DbrCategory::Graphics
    }
    pub fn is_ctrl(&self) -> bool {
        self.category == DbrCategory::Control
    }

    /// Whether a client may send this kind as a write payload
    ///
    /// Only the plain value kinds and the two acknowledgement kinds are accepted;
    /// all metadata categories are read-only result shapes.
    pub fn is_writable(&self) -> bool {
        matches!(
            self.category,
            DbrCategory::Basic | DbrCategory::PutAckT | DbrCategory::PutAckS
        )
    }

    /// Does this kind carry an alarm status/severity header?
    pub fn has_status(&self) -> bool {
        matches!(
            self.category,
            DbrCategory::Status
                | DbrCategory::Time
                | DbrCategory::Graphics
                | DbrCategory::Control
                | DbrCategory::StsAckString
        )
    }

    /// The plain kind with the same basic type
    pub fn plain(&self) -> DbrType {
        match self.category {
            DbrCategory::PutAckT | DbrCategory::PutAckS => *self,
            _ => DbrType::new(self.basic_type, DbrCategory::Basic),
        }
    }
}

impl fmt::Display for DbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.category {
            DbrCategory::Basic => "",
            DbrCategory::Status => "STS_",
            DbrCategory::Time => "TIME_",
            DbrCategory::Graphics => "GR_",
            DbrCategory::Control => "CTRL_",
            DbrCategory::PutAckT => return f.write_str("DBR_PUT_ACKT"),
            DbrCategory::PutAckS => return f.write_str("DBR_PUT_ACKS"),
            DbrCategory::StsAckString => return f.write_str("DBR_STSACK_STRING"),
            DbrCategory::ClassName => return f.write_str("DBR_CLASS_NAME"),
        };
        write!(f, "DBR_{prefix}{}", self.basic_type.name())
    }
}

impl Serialize for DbrType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error returned when a string does not name a DBR kind
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unrecognised DBR type name: {0}")]
pub struct ParseDbrTypeError(pub String);

impl FromStr for DbrType {
    type Err = ParseDbrTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDbrTypeError(s.to_string());
        let upper = s.to_uppercase();
        let mut s: &str = &upper;
        if let Some(rest) = s.strip_prefix("DBR_") {
            s = rest;
        };
        match s {
            "PUT_ACKT" => return Ok(DBR_PUT_ACKT),
            "PUT_ACKS" => return Ok(DBR_PUT_ACKS),
            "STSACK_STRING" => return Ok(DBR_STSACK_STRING),
            "CLASS_NAME" => return Ok(DBR_CLASS_NAME),
            _ => (),
        }
        let category = if let Some((cats, rest)) = s.split_once('_') {
            s = rest;
            match cats {
                "BASIC" => DbrCategory::Basic,
                "STS" => DbrCategory::Status,
                "TIME" => DbrCategory::Time,
                "GR" => DbrCategory::Graphics,
                "CTRL" => DbrCategory::Control,
                _ => return Err(err()),
            }
        } else {
            DbrCategory::Basic
        };
        let kind = match s {
            "STRING" => DbrBasicType::String,
            "INT" => DbrBasicType::Int,
            "SHORT" => DbrBasicType::Int,
            "FLOAT" => DbrBasicType::Float,
            "ENUM" => DbrBasicType::Enum,
            "CHAR" => DbrBasicType::Char,
            "LONG" => DbrBasicType::Long,
            "DOUBLE" => DbrBasicType::Double,
            _ => return Err(err()),
        };
        Ok(DbrType {
            basic_type: kind,
            category,
        })
    }
}

/// Native field types of a record field, as reported for a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DbfType {
    String = 0,
    Short = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
    NoAccess = 7,
}

impl DbfType {
    /// The DBR kind that transfers this field type with the given metadata
    ///
    /// This is `dbf_type_to_DBR`, `dbf_type_to_DBR_STS` and friends. A field with no
    /// access, or a category outside of the five standard ones, has no mapping.
    pub fn to_dbr(self, category: DbrCategory) -> Option<DbrType> {
        let basic_type = match self {
            DbfType::String => DbrBasicType::String,
            DbfType::Short => DbrBasicType::Int,
            DbfType::Float => DbrBasicType::Float,
            DbfType::Enum => DbrBasicType::Enum,
            DbfType::Char => DbrBasicType::Char,
            DbfType::Long => DbrBasicType::Long,
            DbfType::Double => DbrBasicType::Double,
            DbfType::NoAccess => return None,
        };
        match category {
            DbrCategory::Basic
            | DbrCategory::Status
            | DbrCategory::Time
            | DbrCategory::Graphics
            | DbrCategory::Control => Some(DbrType::new(basic_type, category)),
            _ => None,
        }
    }
}

impl TryFrom<u16> for DbfType {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => DbfType::String,
            1 => DbfType::Short,
            2 => DbfType::Float,
            3 => DbfType::Enum,
            4 => DbfType::Char,
            5 => DbfType::Long,
            6 => DbfType::Double,
            7 => DbfType::NoAccess,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for DbfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DbfType::String => "DBF_STRING",
            DbfType::Short => "DBF_SHORT",
            DbfType::Float => "DBF_FLOAT",
            DbfType::Enum => "DBF_ENUM",
            DbfType::Char => "DBF_CHAR",
            DbfType::Long => "DBF_LONG",
            DbfType::Double => "DBF_DOUBLE",
            DbfType::NoAccess => "DBF_NO_ACCESS",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bijection() {
        let all: Vec<DbrType> = DbrType::all().collect();
        assert_eq!(all.len(), 39);
        for (tag, dbr_type) in all.iter().enumerate() {
            assert_eq!(u16::from(*dbr_type), tag as u16);
            assert!(dbr_type.is_valid());
        }
        assert_eq!(DbrType::try_from(20).unwrap(), "DBR_TIME_DOUBLE".parse().unwrap());
        assert!(matches!(
            DbrType::try_from(39),
            Err(CodecError::UnsupportedType(39))
        ));
        assert!(DbrType::try_from(9999).is_err());
    }

    #[test]
    fn test_dbr_string_conversions() {
        assert_eq!(
            DbrType::new(DbrBasicType::Int, DbrCategory::Basic),
            "INT".parse().unwrap()
        );
        assert_eq!(
            DbrType::new(DbrBasicType::Int, DbrCategory::Status),
            "DBR_STS_INT".parse().unwrap()
        );
        assert_eq!(
            DbrType::new(DbrBasicType::Int, DbrCategory::Time),
            "TIME_SHORT".parse().unwrap()
        );
        assert_eq!(
            DbrType::new(DbrBasicType::Int, DbrCategory::Graphics),
            "dbr_gr_int".parse().unwrap()
        );
        assert_eq!(
            DbrType::new(DbrBasicType::Double, DbrCategory::Control),
            "DBR_CTRL_DOUBLE".parse().unwrap()
        );
        assert_eq!(
            DbrType::new(DbrBasicType::String, DbrCategory::Graphics),
            "GR_STRING".parse().unwrap()
        );
        assert_eq!(DBR_FLOAT, "BASIC_FLOAT".parse().unwrap());
        assert_eq!(DBR_CLASS_NAME, "DBR_CLASS_NAME".parse().unwrap());
        assert_eq!(DBR_STSACK_STRING, "stsack_string".parse().unwrap());
        assert_eq!(DBR_PUT_ACKS, "PUT_ACKS".parse().unwrap());
        assert!("DBR_CLASS_INT".parse::<DbrType>().is_err());
        assert!("DBR_WIDE_DOUBLE".parse::<DbrType>().is_err());

        // Names round-trip through Display
        for dbr_type in DbrType::all() {
            assert_eq!(dbr_type, dbr_type.to_string().parse().unwrap());
        }
        assert_eq!(DBR_SHORT.to_string(), "DBR_SHORT");
        assert_eq!(
            DbrType::new(DbrBasicType::Enum, DbrCategory::Control).to_string(),
            "DBR_CTRL_ENUM"
        );
    }

    #[test]
    fn layouts_match_db_access() {
        // Sizes of the full structures holding a single element, from db_access.h
        let struct_sizes: [(u16, &str, usize); 14] = [
            (7, "DBR_STS_STRING", 44),
            (11, "DBR_STS_CHAR", 6),
            (13, "DBR_STS_DOUBLE", 16),
            (15, "DBR_TIME_SHORT", 16),
            (18, "DBR_TIME_CHAR", 16),
            (20, "DBR_TIME_DOUBLE", 24),
            (22, "DBR_GR_SHORT", 26),
            (23, "DBR_GR_FLOAT", 44),
            (24, "DBR_GR_ENUM", 424),
            (25, "DBR_GR_CHAR", 20),
            (28, "DBR_CTRL_STRING", 44),
            (33, "DBR_CTRL_LONG", 48),
            (34, "DBR_CTRL_DOUBLE", 88),
            (37, "DBR_STSACK_STRING", 48),
        ];
        for (tag, name, size) in struct_sizes {
            let dbr_type = DbrType::try_from(tag).unwrap();
            assert_eq!(dbr_type.to_string(), name);
            assert_eq!(dbr_type.size_n(1), Some(size), "{dbr_type}");
        }
        assert_eq!(DBR_DOUBLE.size_n(0), Some(0));
        assert_eq!(DBR_DOUBLE.size_n(usize::MAX), None);
    }

    #[test]
    fn field_type_mapping() {
        assert_eq!(DbfType::Short.to_dbr(DbrCategory::Basic), Some(DBR_SHORT));
        assert_eq!(
            DbfType::Double.to_dbr(DbrCategory::Time),
            Some("DBR_TIME_DOUBLE".parse().unwrap())
        );
        assert_eq!(DbfType::NoAccess.to_dbr(DbrCategory::Basic), None);
        assert_eq!(DbfType::Long.to_dbr(DbrCategory::ClassName), None);
        assert_eq!(DbfType::try_from(3).unwrap().to_string(), "DBF_ENUM");
    }

    #[test]
    fn classification() {
        let time_long: DbrType = "TIME_LONG".parse().unwrap();
        assert!(time_long.is_time() && !time_long.is_plain());
        assert!(time_long.has_status());
        assert!(!time_long.is_writable());
        assert_eq!(time_long.plain(), DBR_LONG);
        assert!(DBR_PUT_ACKT.is_writable());
        assert!(!DBR_CLASS_NAME.is_writable());
        assert!(DBR_STSACK_STRING.has_status());
        assert!(!DbrType::new(DbrBasicType::Long, DbrCategory::ClassName).is_valid());
    }

    #[test]
    fn invalid_pairs_have_no_tag() {
        let class_long = DbrType::new(DbrBasicType::Long, DbrCategory::ClassName);
        assert_eq!(u16::from(class_long), INVALID_TAG);
        assert!(DbrType::try_from(INVALID_TAG).is_err());
        let ackt_double = DbrType::new(DbrBasicType::Double, DbrCategory::PutAckT);
        assert_eq!(u16::from(ackt_double), INVALID_TAG);
        assert_eq!(u16::from(DBR_CLASS_NAME), 38);
        assert_eq!(u16::from(DBR_PUT_ACKT), 35);
        for dbr_type in DbrType::all() {
            assert_ne!(u16::from(dbr_type), INVALID_TAG);
        }
    }
}
