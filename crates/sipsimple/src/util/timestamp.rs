//! RFC 3339 timestamps as used in presence documents
//!
//! ```rust
//! use sipsimple::util::Timestamp;
//!
//! let stamp: Timestamp = "2009-02-20T10:15:30.1234567+02:00".parse().unwrap();
//! assert_eq!(stamp.format_with_offset(0), "2009-02-20T08:15:30Z");
//! assert_eq!(stamp.format_with_offset(-90), "2009-02-20T06:45:30-01:30");
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt},
    sequence::{preceded, tuple},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A point in time with its original UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    datetime: DateTime<FixedOffset>,
}

fn fixed_digits<'a>(count: usize) -> impl FnMut(&'a str) -> IResult<&'a str, u32> {
    map_res(take_while_m_n(count, count, |c: char| c.is_ascii_digit()), str::parse::<u32>)
}

/// Offset in seconds east of UTC
fn zone(input: &str) -> IResult<&str, i32> {
    alt((
        map(char('Z'), |_| 0),
        map(
            tuple((one_of("+-"), fixed_digits(2), char(':'), fixed_digits(2))),
            |(sign, hours, _, minutes)| {
                let seconds = (hours * 3600 + minutes * 60) as i32;
                if sign == '-' { -seconds } else { seconds }
            },
        ),
    ))(input)
}

type Parts<'a> = ((u32, u32, u32), (u32, u32, u32, Option<&'a str>), i32);

fn rfc3339(input: &str) -> IResult<&str, Parts<'_>> {
    let date = map(
        tuple((fixed_digits(4), char('-'), fixed_digits(2), char('-'), fixed_digits(2))),
        |(year, _, month, _, day)| (year, month, day),
    );
    let time = map(
        tuple((
            fixed_digits(2),
            char(':'),
            fixed_digits(2),
            char(':'),
            fixed_digits(2),
            opt(preceded(char('.'), digit1)),
        )),
        |(hour, _, minute, _, second, fraction)| (hour, minute, second, fraction),
    );
    all_consuming(tuple((date, preceded(char('T'), time), zone)))(input)
}

/// Fraction digits truncated (or padded) to microseconds
fn microseconds(fraction: &str) -> u32 {
    fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(6)
        .fold(0, |acc, digit| acc * 10 + digit.to_digit(10).unwrap_or(0))
}

impl Timestamp {
    pub fn new<Tz: TimeZone>(datetime: DateTime<Tz>) -> Self {
        Self {
            datetime: datetime.fixed_offset(),
        }
    }

    /// The current time in the local time zone
    pub fn now() -> Self {
        Self::new(Local::now())
    }

    /// Parse `YYYY-MM-DDTHH:MM:SS[.frac](Z|+HH:MM|-HH:MM)`
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::parse(format!("Timestamp {} is not in RFC3339 format", value));
        let (_, ((year, month, day), (hour, minute, second, fraction), offset)) =
            rfc3339(value).map_err(|_| invalid())?;

        let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(invalid)?;
        let time = NaiveTime::from_hms_micro_opt(hour, minute, second, fraction.map_or(0, microseconds))
            .ok_or_else(invalid)?;
        let offset = FixedOffset::east_opt(offset).ok_or_else(invalid)?;
        let datetime = offset
            .from_local_datetime(&NaiveDateTime::new(date, time))
            .single()
            .ok_or_else(invalid)?;
        Ok(Self { datetime })
    }

    /// Minutes east of UTC of the local time zone
    pub fn utc_offset() -> i32 {
        Local::now().offset().fix().local_minus_utc() / 60
    }

    /// Format in the local time zone, without fractional seconds
    pub fn format(&self) -> String {
        self.format_with_offset(Self::utc_offset())
    }

    /// Format at an explicit offset in minutes east of UTC, without
    /// fractional seconds. `Z` is used for a zero offset.
    pub fn format_with_offset(&self, offset_minutes: i32) -> String {
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        let local = self.datetime.with_timezone(&offset);
        let zone = if offset_minutes == 0 {
            "Z".to_string()
        } else {
            let sign = if offset_minutes < 0 { '-' } else { '+' };
            let minutes = offset_minutes.unsigned_abs();
            format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
        };
        format!("{}{}", local.format("%Y-%m-%dT%H:%M:%S"), zone)
    }

    pub fn datetime(&self) -> &DateTime<FixedOffset> {
        &self.datetime
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        self.datetime.with_timezone(&Utc)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Timestamp {
    fn from(datetime: DateTime<Tz>) -> Self {
        Self::new(datetime)
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Timestamp::parse(&value).map_err(serde::de::Error::custom)
    }
}
