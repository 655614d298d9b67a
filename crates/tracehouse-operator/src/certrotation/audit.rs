//! Detects credentials which expired despite the rotation policy.
//!
//! The orchestrator silently rotates inside the refresh window; the auditor
//! escalates only hard expiry that rotation failed to prevent, for example
//! because the reconciler was down past the whole window. It runs on its own
//! timer, so it re-derives expiry from the persisted objects instead of
//! trusting any in-pass computation.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::instrument;

use super::expiry_from_secret;

/// The entity name under which the CA is reported.
pub const CA_ENTITY_NAME: &str = "ca";

/// Why one entity counts as expired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiryReasonKind {
    /// The stored expiry is at or before the audit time.
    ExpiredAt { not_after: OffsetDateTime },

    /// The stored expiry is missing or unparsable. The next rotation pass
    /// regenerates such a credential, but until then its state is unknown
    /// and it is reported rather than assumed valid.
    UntrackedExpiry,
}

/// One expired entity, either the CA or a single leaf credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiryReason {
    pub entity: String,
    pub kind: ExpiryReasonKind,
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExpiryReasonKind::ExpiredAt { not_after } => match not_after.format(&Rfc3339) {
                Ok(not_after) => write!(f, "{} expired at {not_after}", self.entity),
                Err(_) => write!(f, "{} expired at {not_after}", self.entity),
            },
            ExpiryReasonKind::UntrackedExpiry => {
                write!(f, "{} has no parsable expiry", self.entity)
            }
        }
    }
}

/// The aggregate report of all expired credentials of one stack.
///
/// Never empty: [`audit_expiry`] returns [`None`] instead. Callers can
/// iterate every reason, not just the first, to annotate the owning resource
/// with the full picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiredCertificates {
    reasons: Vec<ExpiryReason>,
}

impl ExpiredCertificates {
    pub fn reasons(&self) -> &[ExpiryReason] {
        &self.reasons
    }
}

impl std::fmt::Display for ExpiredCertificates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut reasons = self.reasons.iter();

        if let Some(reason) = reasons.next() {
            write!(f, "{reason}")?;
        }
        for reason in reasons {
            write!(f, ", {reason}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ExpiredCertificates {}

impl IntoIterator for ExpiredCertificates {
    type IntoIter = std::vec::IntoIter<ExpiryReason>;
    type Item = ExpiryReason;

    fn into_iter(self) -> Self::IntoIter {
        self.reasons.into_iter()
    }
}

impl<'a> IntoIterator for &'a ExpiredCertificates {
    type IntoIter = std::slice::Iter<'a, ExpiryReason>;
    type Item = &'a ExpiryReason;

    fn into_iter(self) -> Self::IntoIter {
        self.reasons.iter()
    }
}

/// Scans the persisted CA and leaf secrets for hard expiry.
///
/// An entity counts as expired when its stored `not-after` annotation is at
/// or before `now`, or cannot be parsed at all. The CA is reported first as
/// [`CA_ENTITY_NAME`], then every leaf under its component name in map
/// order. Returns [`None`] when nothing is expired.
#[instrument(name = "audit_certificate_expiry", skip(ca, leaves))]
pub fn audit_expiry(
    ca: Option<&Secret>,
    leaves: &BTreeMap<String, Secret>,
    now: OffsetDateTime,
) -> Option<ExpiredCertificates> {
    let entities = ca
        .map(|secret| (CA_ENTITY_NAME, secret))
        .into_iter()
        .chain(
            leaves
                .iter()
                .map(|(component, secret)| (component.as_str(), secret)),
        );

    let reasons: Vec<ExpiryReason> = entities
        .filter_map(|(entity, secret)| {
            let kind = match expiry_from_secret(secret) {
                Some(not_after) if not_after <= now => ExpiryReasonKind::ExpiredAt { not_after },
                Some(_) => return None,
                None => ExpiryReasonKind::UntrackedExpiry,
            };

            Some(ExpiryReason {
                entity: entity.to_owned(),
                kind,
            })
        })
        .collect();

    if reasons.is_empty() {
        None
    } else {
        Some(ExpiredCertificates { reasons })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::{super::{NOT_AFTER_ANNOTATION_KEY, TrackedIssuance}, *};

    const ISSUED_AT: i64 = 1_700_000_000;

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ISSUED_AT + offset_secs).unwrap()
    }

    fn secret_expiring_at(not_after: OffsetDateTime) -> Secret {
        let tracked = TrackedIssuance {
            issuer: "CN=Tracehouse Internal CA/0f3a".to_string(),
            not_before: at(0),
            not_after,
            hostnames: BTreeSet::new(),
        };

        Secret {
            metadata: ObjectMeta {
                annotations: Some(tracked.to_annotations().unwrap()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    fn corrupt_secret() -> Secret {
        let mut secret = secret_expiring_at(at(600));
        secret
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(NOT_AFTER_ANNOTATION_KEY.to_string(), "INVALID".to_string());
        secret
    }

    #[test]
    fn nothing_expired_yields_none() {
        let ca = secret_expiring_at(at(600));
        let leaves = BTreeMap::from([
            ("collector".to_string(), secret_expiring_at(at(120))),
            ("query".to_string(), secret_expiring_at(at(120))),
        ]);

        assert_eq!(audit_expiry(Some(&ca), &leaves, at(0)), None);
    }

    #[test]
    fn expiry_is_inclusive_at_now() {
        let ca = secret_expiring_at(at(600));
        let leaves = BTreeMap::from([("query".to_string(), secret_expiring_at(at(120)))]);

        // A leaf whose notAfter equals now counts, one second earlier it
        // does not.
        assert_eq!(audit_expiry(Some(&ca), &leaves, at(119)), None);

        let report = audit_expiry(Some(&ca), &leaves, at(120)).unwrap();
        assert_eq!(report.reasons().len(), 1);
        assert_eq!(report.reasons()[0].entity, "query");
    }

    #[test]
    fn one_reason_per_expired_entity() {
        let ca = corrupt_secret();
        let leaves: BTreeMap<String, Secret> =
            ["collector", "compactor", "distributor", "ingester", "query"]
                .into_iter()
                .map(|component| (component.to_string(), corrupt_secret()))
                .collect();

        let report = audit_expiry(Some(&ca), &leaves, at(0)).unwrap();

        // 5 corrupt leaves plus the corrupt CA.
        assert_eq!(report.reasons().len(), 6);
        assert_eq!(report.reasons()[0].entity, CA_ENTITY_NAME);
        assert!(
            report
                .reasons()
                .iter()
                .all(|reason| reason.kind == ExpiryReasonKind::UntrackedExpiry)
        );
    }

    #[test]
    fn report_enumerates_every_reason() {
        let ca = secret_expiring_at(at(-10));
        let leaves = BTreeMap::from([("query".to_string(), secret_expiring_at(at(-5)))]);

        let report = audit_expiry(Some(&ca), &leaves, at(0)).unwrap();
        let rendered = report.to_string();

        assert!(rendered.contains("ca expired at"));
        assert!(rendered.contains("query expired at"));
        assert_eq!(report.into_iter().count(), 2);
    }

    #[test]
    fn absent_ca_is_not_reported() {
        let leaves = BTreeMap::from([("query".to_string(), secret_expiring_at(at(120)))]);

        assert_eq!(audit_expiry(None, &leaves, at(0)), None);
    }
}
