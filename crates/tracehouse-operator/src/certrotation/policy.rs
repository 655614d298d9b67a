//! The four configured durations which drive all rotation decisions.
use std::str::FromStr;

use snafu::{Snafu, ensure};

use crate::time::{Duration, DurationParseError};

/// The default CA validity of one year.
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_hours_unchecked(8760);

/// The default CA refresh window. A CA is proactively replaced once it has
/// less than this much validity left.
pub const DEFAULT_CA_REFRESH: Duration = Duration::from_hours_unchecked(7008);

/// The default leaf certificate validity of 90 days.
pub const DEFAULT_CERT_VALIDITY: Duration = Duration::from_hours_unchecked(2160);

/// The default leaf certificate refresh window.
pub const DEFAULT_CERT_REFRESH: Duration = Duration::from_hours_unchecked(1728);

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum RotationPolicyError {
    #[snafu(display("failed to parse {field} duration {value:?}"))]
    ParseDuration {
        source: DurationParseError,
        field: &'static str,
        value: String,
    },

    #[snafu(display("{refresh_field} ({refresh}) must not exceed {validity_field} ({validity})"))]
    RefreshExceedsValidity {
        refresh_field: &'static str,
        refresh: Duration,
        validity_field: &'static str,
        validity: Duration,
    },
}

/// The validity and refresh windows for the CA and the leaf certificates of
/// one stack.
///
/// A refresh window may equal its validity, which means "rotate only on hard
/// expiry". A refresh window larger than its validity is a configuration
/// error, never silently clamped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    pub ca_validity: Duration,
    pub ca_refresh: Duration,
    pub cert_validity: Duration,
    pub cert_refresh: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            ca_validity: DEFAULT_CA_VALIDITY,
            ca_refresh: DEFAULT_CA_REFRESH,
            cert_validity: DEFAULT_CERT_VALIDITY,
            cert_refresh: DEFAULT_CERT_REFRESH,
        }
    }
}

impl RotationPolicy {
    /// Parses a policy from the four configured duration strings.
    ///
    /// Fails on the first invalid field, naming the field and the offending
    /// value. A single bad field never silently falls back to a default.
    pub fn parse(
        ca_validity: &str,
        ca_refresh: &str,
        cert_validity: &str,
        cert_refresh: &str,
    ) -> Result<Self, RotationPolicyError> {
        let policy = Self {
            ca_validity: parse_field("caValidity", ca_validity)?,
            ca_refresh: parse_field("caRefresh", ca_refresh)?,
            cert_validity: parse_field("certValidity", cert_validity)?,
            cert_refresh: parse_field("certRefresh", cert_refresh)?,
        };

        ensure!(
            policy.ca_refresh <= policy.ca_validity,
            RefreshExceedsValiditySnafu {
                refresh_field: "caRefresh",
                refresh: policy.ca_refresh,
                validity_field: "caValidity",
                validity: policy.ca_validity,
            }
        );
        ensure!(
            policy.cert_refresh <= policy.cert_validity,
            RefreshExceedsValiditySnafu {
                refresh_field: "certRefresh",
                refresh: policy.cert_refresh,
                validity_field: "certValidity",
                validity: policy.cert_validity,
            }
        );

        Ok(policy)
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<Duration, RotationPolicyError> {
    Duration::from_str(value).map_err(|source| RotationPolicyError::ParseDuration {
        source,
        field,
        value: value.to_owned(),
    })
}
