//! The annotation contract carried by every emitted credential object.
//!
//! These four annotations are the only persisted rotation state. They are
//! stamped at issuance and read back on the next reconciliation to decide
//! whether a credential must be regenerated. External tooling may rely on
//! their exact shape: the issuer is an opaque token, both timestamps are
//! RFC 3339, and the hostnames are a comma-joined sorted set.
use std::collections::{BTreeMap, BTreeSet};

use const_format::concatcp;
use k8s_openapi::api::core::v1::Secret;
use snafu::{ResultExt, Snafu};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use x509_cert::Certificate;

/// The Tracehouse-specific annotation key prefix for certificate tracking.
const CERTS_KEY_PREFIX: &str = "certs.tracehouse.tech/";

/// Identity token of the CA which signed the credential.
pub const ISSUER_ANNOTATION_KEY: &str = concatcp!(CERTS_KEY_PREFIX, "issuer");

/// Start of the credential's validity window, RFC 3339.
pub const NOT_BEFORE_ANNOTATION_KEY: &str = concatcp!(CERTS_KEY_PREFIX, "not-before");

/// End of the credential's validity window, RFC 3339.
pub const NOT_AFTER_ANNOTATION_KEY: &str = concatcp!(CERTS_KEY_PREFIX, "not-after");

/// The hostname set the credential was issued for, comma-joined and sorted.
pub const HOSTNAMES_ANNOTATION_KEY: &str = concatcp!(CERTS_KEY_PREFIX, "hostnames");

#[derive(Debug, Snafu)]
pub enum StampIssuanceError {
    #[snafu(display("failed to format the {field} timestamp as RFC 3339"))]
    FormatTimestamp {
        source: time::error::Format,
        field: &'static str,
    },
}

/// The rotation state tracked on every emitted credential object.
///
/// Timestamps are taken from the issued certificate itself, so the
/// annotations can never drift from the X.509 truth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedIssuance {
    pub issuer: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub hostnames: BTreeSet<String>,
}

impl TrackedIssuance {
    /// Captures the tracking state of a freshly issued certificate.
    pub fn from_certificate(
        issuer: String,
        certificate: &Certificate,
        hostnames: BTreeSet<String>,
    ) -> Self {
        let validity = certificate.tbs_certificate.validity;

        Self {
            issuer,
            not_before: OffsetDateTime::from(validity.not_before.to_system_time()),
            not_after: OffsetDateTime::from(validity.not_after.to_system_time()),
            hostnames,
        }
    }

    /// Reads the tracking state back out of a previously materialized
    /// [`Secret`].
    ///
    /// Returns [`None`] if any of the four annotations is missing or
    /// unparsable. Callers treat that as "must rotate", so corrupt state
    /// heals itself through regeneration instead of failing the pass.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let annotations = secret.metadata.annotations.as_ref()?;

        let issuer = annotations.get(ISSUER_ANNOTATION_KEY)?.clone();
        let not_before =
            OffsetDateTime::parse(annotations.get(NOT_BEFORE_ANNOTATION_KEY)?, &Rfc3339).ok()?;
        let not_after =
            OffsetDateTime::parse(annotations.get(NOT_AFTER_ANNOTATION_KEY)?, &Rfc3339).ok()?;
        let hostnames = annotations
            .get(HOSTNAMES_ANNOTATION_KEY)?
            .split(',')
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_owned)
            .collect();

        Some(Self {
            issuer,
            not_before,
            not_after,
            hostnames,
        })
    }

    /// Renders the tracking state as object annotations.
    pub fn to_annotations(&self) -> Result<BTreeMap<String, String>, StampIssuanceError> {
        let hostnames = self
            .hostnames
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");

        Ok(BTreeMap::from([
            (ISSUER_ANNOTATION_KEY.to_string(), self.issuer.clone()),
            (
                NOT_BEFORE_ANNOTATION_KEY.to_string(),
                self.not_before
                    .format(&Rfc3339)
                    .context(FormatTimestampSnafu {
                        field: "not-before",
                    })?,
            ),
            (
                NOT_AFTER_ANNOTATION_KEY.to_string(),
                self.not_after
                    .format(&Rfc3339)
                    .context(FormatTimestampSnafu { field: "not-after" })?,
            ),
            (HOSTNAMES_ANNOTATION_KEY.to_string(), hostnames),
        ]))
    }
}

/// Re-derives only the expiry of a previously materialized [`Secret`].
///
/// The expiry auditor uses this instead of [`TrackedIssuance::from_secret`],
/// because a secret with, say, a corrupt hostname annotation still has a
/// perfectly good answer to "when does this expire".
pub fn expiry_from_secret(secret: &Secret) -> Option<OffsetDateTime> {
    let not_after = secret
        .metadata
        .annotations
        .as_ref()?
        .get(NOT_AFTER_ANNOTATION_KEY)?;

    OffsetDateTime::parse(not_after, &Rfc3339).ok()
}
