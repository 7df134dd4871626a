//! Month tokens: parsing source filenames and ordering month columns
//!
//! A month token is the canonical `"<year>-<MonthName>"` string (for example
//! `"2025-July"`) used both as a table column name and as a schema entry.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// English month names, indexed by calendar month - 1
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const SIMPLE_MONTH_MARKER: &str = "_Simple_Month_";

/// A calendar month extracted from a filename or a column header
///
/// Only [`MonthStamp::new`] builds one, so the month is always 1-12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MonthStamp {
    year: u16,
    month: u8,
}

impl MonthStamp {
    /// Create a stamp, returning None when the month is outside 1-12
    pub fn new(year: u16, month: u8) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Four-digit year
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Calendar month, 1-12
    pub fn month(&self) -> u8 {
        self.month
    }

    /// English name of the month
    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[usize::from(self.month - 1)]
    }

    /// Canonical token, e.g. "2025-July"
    pub fn token(&self) -> String {
        format!("{}-{}", self.year, self.month_name())
    }
}

impl fmt::Display for MonthStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.month_name())
    }
}

/// Extract the month encoded in a source filename
///
/// Recognized shapes:
/// - `US_Top_search_terms_Simple_Month_2025_07_31.csv` -> 2025-July
/// - `2025-July.csv` -> 2025-July
///
/// Anything else returns None; callers skip the file.
pub fn parse_filename(file_name: &str) -> Option<MonthStamp> {
    let stem = file_name.strip_suffix(".csv")?;

    if let Some(pos) = stem.find(SIMPLE_MONTH_MARKER) {
        if pos == 0 {
            return None;
        }
        return parse_date_segments(&stem[pos + SIMPLE_MONTH_MARKER.len()..]);
    }

    parse_token(stem)
}

/// Parse a canonical month token such as "2025-July"
pub fn parse_token(token: &str) -> Option<MonthStamp> {
    let (year, name) = token.split_once('-')?;
    let year = parse_year(year)?;
    let index = MONTH_NAMES.iter().position(|m| *m == name)?;
    MonthStamp::new(year, (index + 1) as u8)
}

/// Check whether a column name is a canonical month token
pub fn is_month_token(name: &str) -> bool {
    parse_token(name).is_some()
}

/// Heuristic for single-month exports: a four-digit year segment and at least
/// seven underscore-delimited segments (`<prefix>_..._Month_YYYY_MM_DD`)
pub fn is_monthly_filename(file_name: &str) -> bool {
    let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
    let segments: Vec<&str> = stem.split('_').collect();
    segments.len() >= 7 && segments.iter().any(|s| parse_year(s).is_some())
}

// "YYYY_MM_DD"
fn parse_date_segments(date_part: &str) -> Option<MonthStamp> {
    let mut parts = date_part.split('_');
    let (year, month, day) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let year = parse_year(year)?;
    if month.is_empty() || !month.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month: u8 = month.parse().ok()?;
    if day.is_empty() || !day.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    MonthStamp::new(year, month)
}

fn parse_year(s: &str) -> Option<u16> {
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// Sort key for month tokens; malformed tokens order after every valid one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthKey<'a> {
    stamp: Option<MonthStamp>,
    raw: &'a str,
}

impl<'a> MonthKey<'a> {
    pub fn new(token: &'a str) -> Self {
        Self {
            stamp: parse_token(token),
            raw: token,
        }
    }
}

impl Ord for MonthKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.stamp, &other.stamp) {
            (Some(a), Some(b)) => a.cmp(b).then_with(|| self.raw.cmp(other.raw)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.raw.cmp(other.raw),
        }
    }
}

impl PartialOrd for MonthKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort month tokens chronologically in place
pub fn sort_tokens<S: AsRef<str>>(tokens: &mut [S]) {
    tokens.sort_by(|a, b| MonthKey::new(a.as_ref()).cmp(&MonthKey::new(b.as_ref())));
}
