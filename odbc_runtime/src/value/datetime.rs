//! Date/time wrapper types mirroring the ODBC C structures, with ordering,
//! display and parsing so callers never touch the raw structs.

use crate::error::{OdbcError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqlDate {
    pub year: i16,
    pub month: u16,
    pub day: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqlTime {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
}

/// Timestamp with nanosecond fraction, as delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqlTimestamp {
    pub year: i16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
}

impl SqlDate {
    pub fn new(year: i16, month: u16, day: u16) -> Self {
        Self { year, month, day }
    }
}

impl SqlTime {
    pub fn new(hour: u16, minute: u16, second: u16) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }
}

impl SqlTimestamp {
    pub fn new(year: i16, month: u16, day: u16, hour: u16, minute: u16, second: u16, fraction: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            fraction,
        }
    }

    pub fn date(&self) -> SqlDate {
        SqlDate::new(self.year, self.month, self.day)
    }

    pub fn time(&self) -> SqlTime {
        SqlTime::new(self.hour, self.minute, self.second)
    }

    /// ISO-8601 rendering; `utc` appends a `Z` designator.
    pub fn format_iso(&self, utc: bool) -> String {
        let mut s = self.to_string();
        if utc {
            s.push('Z');
        }
        s
    }
}

impl Ord for SqlTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.date(), self.time(), self.fraction).cmp(&(other.date(), other.time(), other.fraction))
    }
}

impl PartialOrd for SqlTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SqlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for SqlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl fmt::Display for SqlTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            SqlDate::new(self.year, self.month, self.day),
            SqlTime::new(self.hour, self.minute, self.second)
        )?;
        if self.fraction != 0 {
            write!(f, ".{:09}", self.fraction)?;
        }
        Ok(())
    }
}

fn invalid(kind: &str, input: &str) -> OdbcError {
    OdbcError::ValidationError(format!("cannot parse {kind} from {input:?}"))
}

/// Strip an ODBC literal wrapper like `{d '...'}`, `{t '...'}` or
/// `{ts '...'}` if present.
fn strip_literal<'a>(s: &'a str, tag: &str) -> &'a str {
    let t = s.trim();
    if let Some(inner) = t
        .strip_prefix('{')
        .and_then(|r| r.trim_start().strip_prefix(tag))
        .and_then(|r| r.trim().strip_prefix('\''))
        .and_then(|r| r.strip_suffix("'}").or_else(|| r.strip_suffix("' }")))
    {
        inner.trim()
    } else {
        t
    }
}

impl FromStr for SqlDate {
    type Err = OdbcError;

    fn from_str(s: &str) -> Result<Self> {
        let t = strip_literal(s, "d");
        let mut parts = t.splitn(3, '-');
        let year = parts.next().and_then(|p| p.parse().ok());
        let month = parts.next().and_then(|p| p.parse().ok());
        let day = parts.next().and_then(|p| p.parse().ok());
        match (year, month, day) {
            (Some(y), Some(m @ 1..=12), Some(d @ 1..=31)) => Ok(Self::new(y, m, d)),
            _ => Err(invalid("date", s)),
        }
    }
}

impl FromStr for SqlTime {
    type Err = OdbcError;

    fn from_str(s: &str) -> Result<Self> {
        let t = strip_literal(s, "t");
        let mut parts = t.splitn(3, ':');
        let hour = parts.next().and_then(|p| p.parse().ok());
        let minute = parts.next().and_then(|p| p.parse().ok());
        let second = parts.next().and_then(|p| p.parse().ok());
        match (hour, minute, second) {
            (Some(h @ 0..=23), Some(m @ 0..=59), Some(sec @ 0..=61)) => {
                Ok(Self::new(h, m, sec))
            }
            _ => Err(invalid("time", s)),
        }
    }
}

impl FromStr for SqlTimestamp {
    type Err = OdbcError;

    fn from_str(s: &str) -> Result<Self> {
        let t = strip_literal(s, "ts").trim_end_matches('Z');
        let (date_part, rest) = match t.split_once(|c| c == ' ' || c == 'T') {
            Some((d, r)) => (d, r),
            None => (t, ""),
        };
        let date: SqlDate = date_part.parse().map_err(|_| invalid("timestamp", s))?;
        let (time, fraction) = if rest.is_empty() {
            (SqlTime::default(), 0)
        } else {
            let (time_part, frac_part) = match rest.split_once('.') {
                Some((tp, fp)) => (tp, Some(fp)),
                None => (rest, None),
            };
            let time: SqlTime = time_part.parse().map_err(|_| invalid("timestamp", s))?;
            let fraction = match frac_part {
                Some(fp) if !fp.is_empty() => {
                    // fraction is nanoseconds; right-pad shorter inputs
                    let digits: String = fp.chars().take_while(|c| c.is_ascii_digit()).collect();
                    if digits.is_empty() {
                        return Err(invalid("timestamp", s));
                    }
                    let padded = format!("{digits:0<9}");
                    padded[..9].parse::<u32>().map_err(|_| invalid("timestamp", s))?
                }
                _ => 0,
            };
            (time, fraction)
        };
        Ok(Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: time.hour,
            minute: time.minute,
            second: time.second,
            fraction,
        })
    }
}

impl From<odbc_sys::Date> for SqlDate {
    fn from(d: odbc_sys::Date) -> Self {
        Self::new(d.year, d.month, d.day)
    }
}

impl From<SqlDate> for odbc_sys::Date {
    fn from(d: SqlDate) -> Self {
        Self {
            year: d.year,
            month: d.month,
            day: d.day,
        }
    }
}

impl From<odbc_sys::Time> for SqlTime {
    fn from(t: odbc_sys::Time) -> Self {
        Self::new(t.hour, t.minute, t.second)
    }
}

impl From<SqlTime> for odbc_sys::Time {
    fn from(t: SqlTime) -> Self {
        Self {
            hour: t.hour,
            minute: t.minute,
            second: t.second,
        }
    }
}

impl From<odbc_sys::Timestamp> for SqlTimestamp {
    fn from(ts: odbc_sys::Timestamp) -> Self {
        Self {
            year: ts.year,
            month: ts.month,
            day: ts.day,
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            fraction: ts.fraction,
        }
    }
}

impl From<SqlTimestamp> for odbc_sys::Timestamp {
    fn from(ts: SqlTimestamp) -> Self {
        Self {
            year: ts.year,
            month: ts.month,
            day: ts.day,
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            fraction: ts.fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_display_and_parse() {
        let d = SqlDate::new(2024, 3, 7);
        assert_eq!(d.to_string(), "2024-03-07");
        assert_eq!("2024-03-07".parse::<SqlDate>().unwrap(), d);
        assert_eq!("{d '2024-03-07'}".parse::<SqlDate>().unwrap(), d);
    }

    #[test]
    fn test_date_parse_rejects_garbage() {
        assert!("2024-13-01".parse::<SqlDate>().is_err());
        assert!("not a date".parse::<SqlDate>().is_err());
        assert!("".parse::<SqlDate>().is_err());
    }

    #[test]
    fn test_time_display_and_parse() {
        let t = SqlTime::new(9, 5, 0);
        assert_eq!(t.to_string(), "09:05:00");
        assert_eq!("09:05:00".parse::<SqlTime>().unwrap(), t);
        assert_eq!("{t '09:05:00'}".parse::<SqlTime>().unwrap(), t);
        assert!("25:00:00".parse::<SqlTime>().is_err());
    }

    #[test]
    fn test_timestamp_display() {
        let ts = SqlTimestamp::new(2024, 3, 7, 9, 5, 0, 0);
        assert_eq!(ts.to_string(), "2024-03-07 09:05:00");
        let with_frac = SqlTimestamp::new(2024, 3, 7, 9, 5, 0, 120_000_000);
        assert_eq!(with_frac.to_string(), "2024-03-07 09:05:00.120000000");
    }

    #[test]
    fn test_timestamp_parse_variants() {
        let ts = SqlTimestamp::new(2024, 3, 7, 9, 5, 30, 500_000_000);
        assert_eq!(
            "2024-03-07 09:05:30.5".parse::<SqlTimestamp>().unwrap(),
            ts
        );
        assert_eq!(
            "{ts '2024-03-07 09:05:30.500000000'}"
                .parse::<SqlTimestamp>()
                .unwrap(),
            ts
        );
        let date_only = "2024-03-07".parse::<SqlTimestamp>().unwrap();
        assert_eq!(date_only.date(), SqlDate::new(2024, 3, 7));
        assert_eq!(date_only.time(), SqlTime::default());
    }

    #[test]
    fn test_timestamp_ordering() {
        let earlier = SqlTimestamp::new(2024, 3, 7, 9, 5, 0, 0);
        let later = SqlTimestamp::new(2024, 3, 7, 9, 5, 0, 1);
        assert!(earlier < later);
        let next_day = SqlTimestamp::new(2024, 3, 8, 0, 0, 0, 0);
        assert!(later < next_day);
    }

    #[test]
    fn test_format_iso_utc_marker() {
        let ts = SqlTimestamp::new(2024, 3, 7, 9, 5, 0, 0);
        assert_eq!(ts.format_iso(true), "2024-03-07 09:05:00Z");
        assert_eq!(ts.format_iso(false), "2024-03-07 09:05:00");
    }

    #[test]
    fn test_sys_struct_roundtrip() {
        let ts = SqlTimestamp::new(1999, 12, 31, 23, 59, 59, 999_999_999);
        let sys: odbc_sys::Timestamp = ts.into();
        assert_eq!(SqlTimestamp::from(sys), ts);

        let d = SqlDate::new(1970, 1, 1);
        let sys_d: odbc_sys::Date = d.into();
        assert_eq!(SqlDate::from(sys_d), d);

        let t = SqlTime::new(12, 0, 1);
        let sys_t: odbc_sys::Time = t.into();
        assert_eq!(SqlTime::from(sys_t), t);
    }
}
