use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};

/// Calendar period parsed from an ISO-8601 duration literal (`P2D`, `P1Y6M`, `PT12H`).
///
/// The leading `P` is optional, so `2D` and `P2D` describe the same period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Period {
    pub years: u32,
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PeriodError {
    Empty,
    MissingDesignator(String),
    InvalidNumber(ParseIntError),
    UnknownDesignator(char),
    Duplicate(char),
}

impl From<ParseIntError> for PeriodError {
    fn from(e: ParseIntError) -> Self {
        PeriodError::InvalidNumber(e)
    }
}

impl Display for PeriodError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodError::Empty => write!(f, "period has no components"),
            PeriodError::MissingDesignator(digits) => write!(f, "number {} is not followed by a designator", digits),
            PeriodError::InvalidNumber(e) => write!(f, "invalid period number: {}", e),
            PeriodError::UnknownDesignator(c) => write!(f, "unknown period designator '{}'", c),
            PeriodError::Duplicate(c) => write!(f, "period designator '{}' appears more than once", c),
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix('P').unwrap_or(s);

        let mut period = Period::default();
        let mut seen: HashSet<(bool, char)> = HashSet::new();
        let mut in_time = false;
        let mut components = 0;
        let mut digits = String::new();

        for c in body.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if c == 'T' {
                if !digits.is_empty() {
                    return Err(PeriodError::MissingDesignator(digits));
                }
                if in_time {
                    return Err(PeriodError::Duplicate('T'));
                }
                in_time = true;
                continue;
            }

            let value: u32 = digits.parse()?;
            digits.clear();
            if !seen.insert((in_time, c)) {
                return Err(PeriodError::Duplicate(c));
            }
            match (in_time, c) {
                (false, 'Y') => period.years = value,
                (false, 'M') => period.months = value,
                (false, 'W') => period.weeks = value,
                (false, 'D') => period.days = value,
                (true, 'H') => period.hours = value,
                (true, 'M') => period.minutes = value,
                (true, 'S') => period.seconds = value,
                _ => return Err(PeriodError::UnknownDesignator(c)),
            }
            components += 1;
        }

        if !digits.is_empty() {
            return Err(PeriodError::MissingDesignator(digits));
        }
        if components == 0 {
            return Err(PeriodError::Empty);
        }
        Ok(period)
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "P")?;
        for (value, designator) in [(self.years, 'Y'), (self.months, 'M'), (self.weeks, 'W'), (self.days, 'D')] {
            if value > 0 {
                write!(f, "{}{}", value, designator)?;
            }
        }
        if self.hours > 0 || self.minutes > 0 || self.seconds > 0 {
            write!(f, "T")?;
            for (value, designator) in [(self.hours, 'H'), (self.minutes, 'M'), (self.seconds, 'S')] {
                if value > 0 {
                    write!(f, "{}{}", value, designator)?;
                }
            }
        } else if self.years == 0 && self.months == 0 && self.weeks == 0 && self.days == 0 {
            write!(f, "0D")?;
        }
        Ok(())
    }
}

impl Period {
    /// Adds the period to `timestamp`: years and months on the calendar first
    /// (the day is clamped to the end of a shorter month), then the exact part.
    ///
    /// Returns `None` when the result is not representable.
    pub fn add_to(&self, timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let shifted = timestamp.checked_add_months(Months::new(months))?;

        let seconds = i64::from(self.weeks) * 604_800
            + i64::from(self.days) * 86_400
            + i64::from(self.hours) * 3_600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds);
        shifted.checked_add_signed(Duration::seconds(seconds))
    }
}
