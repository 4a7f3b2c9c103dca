//! Alarm status and severity, as attached to every DBR kind above `Basic`.

use std::fmt;

use serde::Serialize;

/// Represent alarm status of the record, as carried on the wire
///
/// Both fields are kept raw so that values outside of the closed sets known here
/// still survive a decode. Use [`Status::condition`] and [`Status::alarm_severity`]
/// for the typed view.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    pub status: i16,
    pub severity: i16,
}

impl Status {
    pub fn new(condition: AlarmCondition, severity: AlarmSeverity) -> Self {
        Self {
            status: condition as i16,
            severity: severity as i16,
        }
    }
    pub fn condition(&self) -> Option<AlarmCondition> {
        AlarmCondition::try_from(self.status).ok()
    }
    pub fn alarm_severity(&self) -> Option<AlarmSeverity> {
        AlarmSeverity::try_from(self.severity).ok()
    }
}

/// How abnormal a value is
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlarmSeverity {
    #[default]
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl AlarmSeverity {
    const ALL: [AlarmSeverity; 4] = [
        AlarmSeverity::NoAlarm,
        AlarmSeverity::Minor,
        AlarmSeverity::Major,
        AlarmSeverity::Invalid,
    ];

    /// The name EPICS uses for this severity (`alarmSeverityString`)
    pub fn name(self) -> &'static str {
        match self {
            AlarmSeverity::NoAlarm => "NO_ALARM",
            AlarmSeverity::Minor => "MINOR",
            AlarmSeverity::Major => "MAJOR",
            AlarmSeverity::Invalid => "INVALID",
        }
    }
}

impl TryFrom<i16> for AlarmSeverity {
    type Error = ();
    fn try_from(value: i16) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(())
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a value is in alarm
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlarmCondition {
    #[default]
    NoAlarm = 0,
    Read = 1,
    Write = 2,
    HiHi = 3,
    High = 4,
    LoLo = 5,
    Low = 6,
    State = 7,
    Cos = 8,
    Comm = 9,
    Timeout = 10,
    HwLimit = 11,
    Calc = 12,
    Scan = 13,
    Link = 14,
    Soft = 15,
    BadSub = 16,
    Udf = 17,
    Disable = 18,
    Simm = 19,
    ReadAccess = 20,
    WriteAccess = 21,
}

impl AlarmCondition {
    const ALL: [AlarmCondition; 22] = [
        AlarmCondition::NoAlarm,
        AlarmCondition::Read,
        AlarmCondition::Write,
        AlarmCondition::HiHi,
        AlarmCondition::High,
        AlarmCondition::LoLo,
        AlarmCondition::Low,
        AlarmCondition::State,
        AlarmCondition::Cos,
        AlarmCondition::Comm,
        AlarmCondition::Timeout,
        AlarmCondition::HwLimit,
        AlarmCondition::Calc,
        AlarmCondition::Scan,
        AlarmCondition::Link,
        AlarmCondition::Soft,
        AlarmCondition::BadSub,
        AlarmCondition::Udf,
        AlarmCondition::Disable,
        AlarmCondition::Simm,
        AlarmCondition::ReadAccess,
        AlarmCondition::WriteAccess,
    ];

    /// The name EPICS uses for this condition (`alarmStatusString`)
    pub fn name(self) -> &'static str {
        match self {
            AlarmCondition::NoAlarm => "NO_ALARM",
            AlarmCondition::Read => "READ",
            AlarmCondition::Write => "WRITE",
            AlarmCondition::HiHi => "HIHI",
            AlarmCondition::High => "HIGH",
            AlarmCondition::LoLo => "LOLO",
            AlarmCondition::Low => "LOW",
            AlarmCondition::State => "STATE",
            AlarmCondition::Cos => "COS",
            AlarmCondition::Comm => "COMM",
            AlarmCondition::Timeout => "TIMEOUT",
            AlarmCondition::HwLimit => "HWLIMIT",
            AlarmCondition::Calc => "CALC",
            AlarmCondition::Scan => "SCAN",
            AlarmCondition::Link => "LINK",
            AlarmCondition::Soft => "SOFT",
            AlarmCondition::BadSub => "BAD_SUB",
            AlarmCondition::Udf => "UDF",
            AlarmCondition::Disable => "DISABLE",
            AlarmCondition::Simm => "SIMM",
            AlarmCondition::ReadAccess => "READ_ACCESS",
            AlarmCondition::WriteAccess => "WRITE_ACCESS",
        }
    }
}

impl TryFrom<i16> for AlarmCondition {
    type Error = ();
    fn try_from(value: i16) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(())
    }
}

impl fmt::Display for AlarmCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_views() {
        let status = Status::new(AlarmCondition::HiHi, AlarmSeverity::Major);
        assert_eq!(status, Status { status: 3, severity: 2 });
        assert_eq!(status.condition(), Some(AlarmCondition::HiHi));
        assert_eq!(status.alarm_severity(), Some(AlarmSeverity::Major));

        let odd = Status {
            status: 99,
            severity: -1,
        };
        assert_eq!(odd.condition(), None);
        assert_eq!(odd.alarm_severity(), None);
    }

    #[test]
    fn names() {
        assert_eq!(AlarmSeverity::Invalid.to_string(), "INVALID");
        assert_eq!(AlarmCondition::try_from(16).unwrap().name(), "BAD_SUB");
        assert_eq!(AlarmCondition::try_from(21), Ok(AlarmCondition::WriteAccess));
        assert!(AlarmCondition::try_from(22).is_err());
        for (i, condition) in AlarmCondition::ALL.iter().enumerate() {
            assert_eq!(*condition as usize, i);
        }
    }
}
