//! COSEM date-time (12-octet) value

use crate::error::{DlmsError, DlmsResult};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deviation value meaning "not specified"
pub const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

/// Clock status flags for COSEM DateTime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    InvalidValue = 0x01,
    DoubtfulValue = 0x02,
    DifferentClockBase = 0x04,
    InvalidClockStatus = 0x08,
    DaylightSavingActive = 0x80,
}

impl ClockStatus {
    const ALL: [ClockStatus; 5] = [
        ClockStatus::InvalidValue,
        ClockStatus::DoubtfulValue,
        ClockStatus::DifferentClockBase,
        ClockStatus::InvalidClockStatus,
        ClockStatus::DaylightSavingActive,
    ];

    /// Convert clock status flags to a byte
    pub fn to_byte(statuses: &[ClockStatus]) -> u8 {
        statuses.iter().fold(0u8, |byte, status| byte | *status as u8)
    }

    /// Parse clock status from a byte
    pub fn from_byte(byte: u8) -> Vec<ClockStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|status| byte & *status as u8 != 0)
            .collect()
    }
}

/// COSEM date-time as carried by the `date-time` data type
///
/// Wire layout (12 octets): year (2, big-endian), month, day of month,
/// day of week (ISO, Monday = 1 .. Sunday = 7), hour, minute, second,
/// hundredths (0xFF = not specified), deviation (2, big-endian, signed minutes
/// east of UTC), clock status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosemDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub day_of_week: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
    pub deviation: i16,
    pub clock_status: u8,
}

impl CosemDateTime {
    pub const LENGTH: usize = 12;

    /// Build a date-time with unspecified hundredths
    ///
    /// The weekday is derived from a concrete date and left unspecified when
    /// any of year, month or day is a wildcard.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        deviation: i16,
        clock_status: &[ClockStatus],
    ) -> DlmsResult<Self> {
        let day_of_week = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .filter(|_| year != 0xFFFF)
            .map(|date| date.weekday().number_from_monday() as u8)
            .unwrap_or(0xFF);
        let value = Self {
            year,
            month,
            day,
            day_of_week,
            hour,
            minute,
            second,
            hundredths: 0xFF,
            deviation,
            clock_status: ClockStatus::to_byte(clock_status),
        };
        value.validate()?;
        Ok(value)
    }

    fn validate(&self) -> DlmsResult<()> {
        let month_ok = (1..=12).contains(&self.month) || self.month >= 0xFD;
        let day_ok = (1..=31).contains(&self.day) || self.day >= 0xFD;
        let hour_ok = self.hour < 24 || self.hour == 0xFF;
        let minute_ok = self.minute < 60 || self.minute == 0xFF;
        let second_ok = self.second < 60 || self.second == 0xFF;
        if !(month_ok && day_ok && hour_ok && minute_ok && second_ok) {
            return Err(DlmsError::InvalidData(format!(
                "date-time component out of range: {}",
                self
            )));
        }
        if (self.deviation < -720 || self.deviation > 720) && self.deviation != DEVIATION_NOT_SPECIFIED {
            return Err(DlmsError::InvalidData(format!(
                "deviation is out of range [-720, 720], got {}",
                self.deviation
            )));
        }
        Ok(())
    }

    /// Decode from the 12 content octets (no tag, no length)
    pub fn decode(octets: &[u8]) -> DlmsResult<Self> {
        if octets.len() != Self::LENGTH {
            return Err(DlmsError::InvalidData(format!(
                "date-time has an invalid length. Expected {}, got {}",
                Self::LENGTH,
                octets.len()
            )));
        }

        Ok(Self {
            year: u16::from_be_bytes([octets[0], octets[1]]),
            month: octets[2],
            day: octets[3],
            day_of_week: octets[4],
            hour: octets[5],
            minute: octets[6],
            second: octets[7],
            hundredths: octets[8],
            deviation: i16::from_be_bytes([octets[9], octets[10]]),
            clock_status: octets[11],
        })
    }

    /// Encode to the 12 content octets
    pub fn encode(&self) -> [u8; Self::LENGTH] {
        let year = self.year.to_be_bytes();
        let deviation = self.deviation.to_be_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day,
            self.day_of_week,
            self.hour,
            self.minute,
            self.second,
            self.hundredths,
            deviation[0],
            deviation[1],
            self.clock_status,
        ]
    }

    /// Get the clock status flags
    pub fn clock_status(&self) -> Vec<ClockStatus> {
        ClockStatus::from_byte(self.clock_status)
    }

    /// Convert a wall-clock time with offset into a meter date-time
    pub fn from_chrono(value: &DateTime<FixedOffset>) -> Self {
        Self {
            year: value.year().clamp(0, u16::MAX as i32) as u16,
            month: value.month() as u8,
            day: value.day() as u8,
            day_of_week: value.weekday().number_from_monday() as u8,
            hour: value.hour() as u8,
            minute: value.minute() as u8,
            second: value.second() as u8,
            hundredths: 0xFF,
            deviation: (value.offset().local_minus_utc() / 60) as i16,
            clock_status: 0x00,
        }
    }

    /// Convert to a chrono date-time
    ///
    /// Wildcard fields (year 0xFFFF, month/day/hour/minute/second 0xFF) cannot
    /// be represented and yield `InvalidData`. An unspecified deviation is
    /// treated as UTC.
    pub fn to_chrono(&self) -> DlmsResult<DateTime<FixedOffset>> {
        let deviation = if self.deviation == DEVIATION_NOT_SPECIFIED {
            0
        } else {
            self.deviation as i32
        };
        let offset = FixedOffset::east_opt(deviation * 60)
            .ok_or_else(|| DlmsError::InvalidData(format!("invalid deviation {}", deviation)))?;
        let hundredths = if self.hundredths == 0xFF { 0 } else { self.hundredths as u32 };

        let naive = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|date| {
                date.and_hms_milli_opt(
                    self.hour as u32,
                    self.minute as u32,
                    self.second as u32,
                    hundredths * 10,
                )
            })
            .filter(|_| self.year != 0xFFFF)
            .ok_or_else(|| DlmsError::InvalidData(format!("date-time not representable: {}", self)))?;

        offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| DlmsError::InvalidData(format!("ambiguous date-time: {}", self)))
    }
}

impl fmt::Display for CosemDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.deviation != DEVIATION_NOT_SPECIFIED {
            write!(f, " ({:+} min)", self.deviation)?;
        }
        Ok(())
    }
}
