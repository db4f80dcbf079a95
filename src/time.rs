use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Picoseconds per second.
pub const PICODIVIDER: u64 = 1_000_000_000_000;

/// A timestamp with picosecond precision.
///
/// Invariant: `psec < 10^12`.  Comparison and arithmetic operate on the
/// `(sec, psec)` pair; subtraction borrows from the seconds field so `psec`
/// stays within range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Picotime {
    pub sec: u32,
    pub psec: u64,
}

impl Picotime {
    pub fn new(sec: u32, psec: u64) -> Picotime {
        Picotime {
            sec: sec.wrapping_add((psec / PICODIVIDER) as u32),
            psec: psec % PICODIVIDER,
        }
    }

    /// Current time.  The precision is limited to nanoseconds.
    pub fn now() -> Picotime {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .into()
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.psec == 0
    }

    pub fn to_f64(&self) -> f64 {
        self.sec as f64 + self.psec as f64 / PICODIVIDER as f64
    }

    /// Format the seconds part using a strftime-style pattern (UTC).
    /// The picoseconds are dropped.
    pub fn format(&self, fmt: &str) -> String {
        match DateTime::<Utc>::from_timestamp(self.sec as i64, 0) {
            Some(dt) => dt.format(fmt).to_string(),
            None => String::new(),
        }
    }
}

impl From<Duration> for Picotime {
    fn from(d: Duration) -> Picotime {
        Picotime {
            sec: d.as_secs() as u32,
            psec: d.subsec_nanos() as u64 * 1000,
        }
    }
}

impl From<SystemTime> for Picotime {
    fn from(t: SystemTime) -> Picotime {
        t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).into()
    }
}

impl Add for Picotime {
    type Output = Picotime;

    fn add(self, rhs: Picotime) -> Picotime {
        let psec = self.psec + rhs.psec;
        Picotime {
            sec: self
                .sec
                .wrapping_add(rhs.sec)
                .wrapping_add((psec / PICODIVIDER) as u32),
            psec: psec % PICODIVIDER,
        }
    }
}

impl Sub for Picotime {
    type Output = Picotime;

    fn sub(self, rhs: Picotime) -> Picotime {
        let (sec, psec) = if self.psec < rhs.psec {
            (
                self.sec.wrapping_sub(1).wrapping_sub(rhs.sec),
                self.psec + PICODIVIDER - rhs.psec,
            )
        } else {
            (self.sec.wrapping_sub(rhs.sec), self.psec - rhs.psec)
        };
        Picotime { sec, psec }
    }
}

impl fmt::Display for Picotime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:012}", self.sec, self.psec)
    }
}

/// Parse the fraction digits following the decimal point.
/// `"1"` reads as 0.1s, i.e. the digits are scaled up to 12 places.
fn parse_fraction(frac: &str) -> Option<u64> {
    if frac.is_empty() || frac.len() > 12 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = frac.parse().ok()?;
    Some(value * 10u64.pow(12 - frac.len() as u32))
}

fn parse_datetime(s: &str) -> Option<u32> {
    // ISO 8601 and the two compact date forms, then bare unix seconds
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y%m%d %H:%M:%S", "%y%m%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            let ts = dt.and_utc().timestamp();
            if ts >= 0 {
                return Some(ts as u32);
            }
        }
    }
    s.parse::<u32>().ok()
}

impl FromStr for Picotime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Picotime> {
        let (datetime, psec) = match s.rsplit_once('.') {
            Some((datetime, frac)) => {
                let psec = parse_fraction(frac)
                    .ok_or_else(|| Error::invalid_input(format!("invalid fraction: {frac}")))?;
                (datetime, psec)
            }
            None => (s, 0),
        };

        let sec = parse_datetime(datetime.trim())
            .ok_or_else(|| Error::invalid_input(format!("invalid timestamp: {s}")))?;
        Ok(Picotime { sec, psec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(sec: u32, psec: u64) -> Picotime {
        Picotime { sec, psec }
    }

    #[test]
    fn from_string_unix() {
        assert_eq!("1".parse::<Picotime>().unwrap(), t(1, 0));
        assert_eq!("2.1".parse::<Picotime>().unwrap(), t(2, 100_000_000_000));
        assert_eq!("3.12".parse::<Picotime>().unwrap(), t(3, 120_000_000_000));
        assert_eq!("4.000000000009".parse::<Picotime>().unwrap(), t(4, 9));
        assert_eq!(
            "1341272547.795973301000".parse::<Picotime>().unwrap(),
            t(1341272547, 795_973_301_000)
        );
    }

    #[test]
    fn from_string_datetime() {
        let iso = "2012-07-03 00:22:27".parse::<Picotime>().unwrap();
        assert_eq!("20120703 00:22:27".parse::<Picotime>().unwrap(), iso);
        assert_eq!("120703 00:22:27".parse::<Picotime>().unwrap(), iso);
        assert_eq!(iso.format("%Y-%m-%d %H:%M:%S"), "2012-07-03 00:22:27");

        let with_frac = "2012-07-03 00:22:27.5".parse::<Picotime>().unwrap();
        assert_eq!(with_frac, t(iso.sec, 500_000_000_000));
    }

    #[test]
    fn from_string_invalid() {
        assert!("".parse::<Picotime>().is_err());
        assert!("spam".parse::<Picotime>().is_err());
        assert!("1.1234567890123".parse::<Picotime>().is_err()); // 13 digits
        assert!("1.".parse::<Picotime>().is_err());
    }

    #[test]
    fn display_roundtrip() {
        for s in ["1.500000000000", "0.000000000001", "1341272547.795973301000"] {
            assert_eq!(s.parse::<Picotime>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn sub_with_borrow() {
        let a = t(3, 100_000_000_000);
        let b = t(1, 900_000_000_000);
        let diff = a - b;
        assert_eq!(diff, t(1, 200_000_000_000));
        assert_eq!(diff + b, a);
    }

    #[test]
    fn compare() {
        assert!(t(1, 0) < t(2, 0));
        assert!(t(1, 5) < t(1, 6));
        assert_eq!(t(1, 5), t(1, 5));
        assert!(t(2, 0) > t(1, 999_999_999_999));
    }

    #[test]
    fn normalized_new() {
        assert_eq!(Picotime::new(1, PICODIVIDER + 5), t(2, 5));
    }
}
