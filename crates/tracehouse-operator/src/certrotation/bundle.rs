//! Derives the publishable CA bundle from the signing authority.
use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use snafu::{ResultExt, Snafu};
use tracehouse_certs::ca::PEM_LINE_ENDING;
use x509_cert::der::EncodePem;

use super::SigningAuthority;
use crate::meta::recommended_labels;

/// The key under which the CA bundle is stored in its [`ConfigMap`].
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

#[derive(Debug, Snafu)]
pub enum BuildTrustBundleError {
    #[snafu(display("failed to PEM-encode a trusted CA certificate"))]
    EncodeCertificate { source: x509_cert::der::Error },
}

/// Builds the [`ConfigMap`] holding all CA certificates verifiers should
/// trust.
///
/// The payload is the PEM-encoded current CA certificate. For the pass which
/// replaces the CA, the still-valid outgoing certificate is appended, so leaf
/// certificates signed by it keep verifying until the cascade reissues them.
/// The output is deterministic and byte-stable across passes which do not
/// rotate the CA.
pub fn build_trust_bundle(
    stack_name: &str,
    namespace: &str,
    authority: &SigningAuthority,
) -> Result<ConfigMap, BuildTrustBundleError> {
    let mut bundle = authority
        .ca()
        .ca_cert()
        .to_pem(PEM_LINE_ENDING)
        .context(EncodeCertificateSnafu)?;

    if let Some(previous) = authority.previous_certificate() {
        bundle.push_str(
            &previous
                .to_pem(PEM_LINE_ENDING)
                .context(EncodeCertificateSnafu)?,
        );
    }

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(trust_bundle_name(stack_name)),
            namespace: Some(namespace.to_owned()),
            labels: Some(recommended_labels(stack_name, "ca-bundle")),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(CA_BUNDLE_KEY.to_string(), bundle)])),
        ..ConfigMap::default()
    })
}

/// Returns the name of the CA bundle config map of a stack.
pub fn trust_bundle_name(stack_name: &str) -> String {
    format!("{stack_name}-ca-bundle")
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::{super::RotationPolicy, *};
    use crate::time::Duration;

    fn policy() -> RotationPolicy {
        RotationPolicy {
            ca_validity: Duration::from_minutes_unchecked(10),
            ca_refresh: Duration::from_minutes_unchecked(5),
            cert_validity: Duration::from_minutes_unchecked(2),
            cert_refresh: Duration::from_minutes_unchecked(1),
        }
    }

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + offset_secs).unwrap()
    }

    #[test]
    fn bundle_holds_current_ca() {
        let policy = policy();
        let authority = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        let bundle = build_trust_bundle("dev", "ns", &authority).unwrap();
        assert_eq!(bundle.metadata.name.as_deref(), Some("dev-ca-bundle"));

        let pem = bundle.data.as_ref().unwrap().get(CA_BUNDLE_KEY).unwrap();
        assert_eq!(pem.matches("BEGIN CERTIFICATE").count(), 1);
    }

    #[test]
    fn bundle_is_byte_stable_across_idempotent_passes() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();
        let second =
            SigningAuthority::resolve("dev", "ns", Some(first.secret()), &policy, at(10))
                .unwrap();

        assert_eq!(
            build_trust_bundle("dev", "ns", &first).unwrap(),
            build_trust_bundle("dev", "ns", &second).unwrap()
        );
    }

    #[test]
    fn bundle_retains_outgoing_ca_during_rotation() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();
        let rotated =
            SigningAuthority::resolve("dev", "ns", Some(first.secret()), &policy, at(300))
                .unwrap();

        let bundle = build_trust_bundle("dev", "ns", &rotated).unwrap();
        let pem = bundle.data.as_ref().unwrap().get(CA_BUNDLE_KEY).unwrap();
        assert_eq!(pem.matches("BEGIN CERTIFICATE").count(), 2);
    }
}
