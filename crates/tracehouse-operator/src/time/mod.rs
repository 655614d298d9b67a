//! A [`Duration`] type which parses and renders the human-readable duration
//! strings used throughout the operator configuration, like `5s`, `8760h` or
//! `15d2m2s`. A duration string is a sequence of `<value><unit>` fragments in
//! strictly descending unit order, without repetition.
//!
//! The type wraps [`std::time::Duration`] and [`Deref`]s to it, so all the
//! usual arithmetic and accessor functions stay available. It also carries
//! the serde and schema implementations needed to use it directly in CRD
//! structs.
use std::{
    cmp::Ordering,
    fmt::Display,
    num::ParseIntError,
    ops::{Add, AddAssign, Deref, DerefMut, Div, Mul, Sub, SubAssign},
    str::FromStr,
};

use schemars::JsonSchema;
use snafu::{ResultExt, Snafu};
use strum::IntoEnumIterator;

mod serde_impl;
mod time_impl;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(module)]
pub enum DurationParseError {
    #[snafu(display("input is empty or contains non-ascii characters"))]
    InvalidInput,

    #[snafu(display("unexpected character {chr:?}"))]
    UnexpectedCharacter { chr: char },

    #[snafu(display("the fragment with value {value} is missing its unit"))]
    NoUnit { value: u128 },

    #[snafu(display("fragments out of order, {current} must appear before {previous}"))]
    InvalidUnitOrdering {
        previous: DurationUnit,
        current: DurationUnit,
    },

    #[snafu(display("the unit {unit} appears more than once"))]
    DuplicateUnit { unit: DurationUnit },

    #[snafu(display("unsupported fragment unit {unit:?}"))]
    ParseUnitError { unit: String },

    #[snafu(display("failed to parse fragment value as integer"))]
    ParseIntError { source: ParseIntError },
}

/// A duration capable of parsing the human-readable formats used in the
/// operator configuration, like `5s`, `24h` or `15d2m2s`.
///
/// Rendering via [`Display`] produces the same fragment format, normalized
/// to the largest units that fit.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

impl JsonSchema for Duration {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "Duration".into()
    }

    fn json_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
        })
    }
}

/// Splits `input` at the end of its leading run of characters matching
/// `matches`. The first half is empty if the very first character does not
/// match.
fn split_leading(input: &str, matches: fn(char) -> bool) -> (&str, &str) {
    match input.find(|chr: char| !matches(chr)) {
        Some(end) => input.split_at(end),
        None => (input, ""),
    }
}

impl FromStr for Duration {
    type Err = DurationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use duration_parse_error::*;

        let input = s.trim();
        if input.is_empty() || !input.is_ascii() {
            return InvalidInputSnafu.fail();
        }

        let mut total = std::time::Duration::ZERO;
        let mut previous_unit: Option<DurationUnit> = None;
        let mut rest = input;

        while !rest.is_empty() {
            let (digits, tail) = split_leading(rest, |chr| chr.is_ascii_digit());
            if digits.is_empty() {
                let chr = rest.chars().next().unwrap_or_default();
                return UnexpectedCharacterSnafu { chr }.fail();
            }
            let value = digits.parse::<u128>().context(ParseIntSnafu)?;

            let (fragment_unit, remainder) = split_leading(tail, char::is_alphabetic);
            if fragment_unit.is_empty() {
                match tail.chars().next() {
                    Some(chr) => return UnexpectedCharacterSnafu { chr }.fail(),
                    None => return NoUnitSnafu { value }.fail(),
                }
            }
            let Ok(unit) = fragment_unit.parse::<DurationUnit>() else {
                return ParseUnitSnafu {
                    unit: fragment_unit,
                }
                .fail();
            };

            // Fragments must be ordered from the largest unit down, and no
            // unit may repeat.
            if let Some(previous) = previous_unit {
                match unit.cmp(&previous) {
                    Ordering::Less => {
                        return InvalidUnitOrderingSnafu {
                            previous,
                            current: unit,
                        }
                        .fail();
                    }
                    Ordering::Equal => return DuplicateUnitSnafu { unit }.fail(),
                    Ordering::Greater => (),
                }
            }

            // Values which overflow u64 milliseconds saturate. They describe
            // durations of more than 500 million years, where the exact
            // value no longer matters.
            let millis = u64::try_from(value.saturating_mul(unit.millis())).unwrap_or(u64::MAX);
            total = total.saturating_add(std::time::Duration::from_millis(millis));

            previous_unit = Some(unit);
            rest = remainder;
        }

        Ok(Self(total))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seconds are the human-facing base unit, so a zero duration renders
        // as "0s" rather than as an empty string.
        if self.0.is_zero() {
            return write!(f, "0{}", DurationUnit::Seconds);
        }

        let mut remainder = self.0.as_millis();

        for unit in DurationUnit::iter() {
            let count = remainder / unit.millis();

            if count > 0 {
                write!(f, "{count}{unit}")?;
                remainder -= count * unit.millis();
            }
        }

        Ok(())
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Duration {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        self.0.add_assign(rhs.0);
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        self.0.sub_assign(rhs.0);
    }
}

impl Mul<u32> for Duration {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<u32> for Duration {
    type Output = Self;

    fn div(self, rhs: u32) -> Self {
        Self(self.0 / rhs)
    }
}

impl Duration {
    /// Creates a new [`Duration`] from the specified number of whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    /// Creates a new [`Duration`] from the specified number of whole
    /// milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    /// Creates a new [`Duration`] from the specified number of whole minutes.
    /// Panics if the minutes are bigger than `u64::MAX / 60`.
    pub const fn from_minutes_unchecked(minutes: u64) -> Self {
        Self::from_secs(minutes * 60)
    }

    /// Creates a new [`Duration`] from the specified number of whole hours.
    /// Panics if the hours are bigger than `u64::MAX / 3600`.
    pub const fn from_hours_unchecked(hours: u64) -> Self {
        Self::from_minutes_unchecked(hours * 60)
    }

    /// Creates a new [`Duration`] from the specified number of whole days.
    /// Panics if the days are bigger than `u64::MAX / 86400`.
    pub const fn from_days_unchecked(days: u64) -> Self {
        Self::from_hours_unchecked(days * 24)
    }
}

/// The units a duration fragment may carry. The variant order **matters**:
/// it runs from the largest unit to the smallest and drives both the
/// fragment-ordering validation in [`FromStr`] and the rendering order in
/// [`Display`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum DurationUnit {
    #[strum(serialize = "d")]
    Days,

    #[strum(serialize = "h")]
    Hours,

    #[strum(serialize = "m")]
    Minutes,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "ms")]
    Milliseconds,
}

impl DurationUnit {
    /// The number of whole milliseconds one step of this unit covers.
    fn millis(self) -> u128 {
        use DurationUnit::*;

        match self {
            Days => 24 * Hours.millis(),
            Hours => 60 * Minutes.millis(),
            Minutes => 60 * Seconds.millis(),
            Seconds => 1000,
            Milliseconds => 1,
        }
    }
}
