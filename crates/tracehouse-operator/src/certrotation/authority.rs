//! Owns the self-signed CA of one stack and decides when to replace it.
use std::{
    collections::{BTreeMap, BTreeSet},
    time::SystemTime,
};

use k8s_openapi::{
    ByteString, api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;
use tracehouse_certs::{
    CertificatePairError,
    ca::{CertificateAuthority, CreateCertificateAuthorityError, PEM_LINE_ENDING},
    keys::ecdsa,
    secret::{TLS_SECRET_TYPE, certificate_pair_from_secret},
};
use tracing::{debug, instrument};
use x509_cert::Certificate;

use super::{RotationPolicy, StampIssuanceError, TrackedIssuance};
use crate::meta::recommended_labels;

/// The key under which the CA certificate is stored in its [`Secret`].
pub const CA_CERTIFICATE_KEY: &str = "ca.crt";

/// The key under which the CA private key is stored in its [`Secret`].
pub const CA_PRIVATE_KEY_KEY: &str = "ca.key";

/// Defines all error variants which can occur when resolving the signing
/// authority of a stack.
#[derive(Debug, Snafu)]
pub enum CreateSigningAuthorityError {
    #[snafu(display("failed to create a new certificate authority"))]
    CreateCertificateAuthority {
        source: CreateCertificateAuthorityError<ecdsa::Error>,
    },

    #[snafu(display("failed to PEM-encode the certificate authority"))]
    SerializeCertificateAuthority {
        source: CertificatePairError<ecdsa::Error>,
    },

    #[snafu(display("failed to stamp issuance tracking annotations"))]
    StampIssuance { source: StampIssuanceError },
}

/// The CA used to sign all leaf certificates of one stack during one
/// rotation pass.
///
/// Resolved fresh on every pass from the previously materialized CA secret.
/// The authority is identified by a stable string token rather than by key
/// material, so leaf credentials can detect CA rotation with a plain string
/// comparison against their recorded issuer.
#[derive(Debug)]
pub struct SigningAuthority {
    ca: CertificateAuthority<ecdsa::SigningKey>,
    identity: String,
    secret: Secret,
    previous_certificate: Option<Certificate>,
}

impl SigningAuthority {
    /// Reuses the previously materialized CA or mints a new one.
    ///
    /// A new CA is minted when the existing secret is absent, when its key
    /// material or tracking annotations fail to parse, or when `now` has
    /// entered the refresh window `[notAfter - caRefresh, ∞)`. The refresh
    /// window check also covers hard expiry. In all other cases the existing
    /// secret is returned unchanged, so an unrotated pass never produces a
    /// diff.
    #[instrument(name = "resolve_signing_authority", skip(existing, policy), fields(stack = stack_name))]
    pub fn resolve(
        stack_name: &str,
        namespace: &str,
        existing: Option<&Secret>,
        policy: &RotationPolicy,
        now: OffsetDateTime,
    ) -> Result<Self, CreateSigningAuthorityError> {
        if let Some(secret) = existing {
            if let Some(authority) = Self::try_reuse(secret, policy, now) {
                debug!(
                    authority.identity = %authority.identity,
                    "reusing existing certificate authority"
                );
                return Ok(authority);
            }
        }

        // The outgoing CA certificate stays in the trust bundle while leaf
        // certificates signed by it could still be in use, but a hard-expired
        // or unparsable predecessor is dropped.
        let previous_certificate = existing
            .and_then(|secret| {
                certificate_pair_from_secret::<ecdsa::SigningKey>(
                    secret,
                    CA_CERTIFICATE_KEY,
                    CA_PRIVATE_KEY_KEY,
                )
                .ok()
            })
            .map(|pair| pair.certificate().clone())
            .filter(|certificate| {
                let not_after = certificate.tbs_certificate.validity.not_after;
                OffsetDateTime::from(not_after.to_system_time()) > now
            });

        let ca = CertificateAuthority::builder_with_ecdsa()
            .not_before(SystemTime::from(now))
            .validity(*policy.ca_validity)
            .build()
            .context(CreateCertificateAuthoritySnafu)?;
        let identity = ca.issuer_identity();
        let tracked =
            TrackedIssuance::from_certificate(identity.clone(), ca.ca_cert(), BTreeSet::new());
        let secret = build_ca_secret(stack_name, namespace, &ca, &tracked)?;

        debug!(
            authority.identity = %identity,
            authority.retains_previous = previous_certificate.is_some(),
            "minted new certificate authority"
        );

        Ok(Self {
            ca,
            identity,
            secret,
            previous_certificate,
        })
    }

    fn try_reuse(secret: &Secret, policy: &RotationPolicy, now: OffsetDateTime) -> Option<Self> {
        let tracked = TrackedIssuance::from_secret(secret)?;
        let pair = certificate_pair_from_secret::<ecdsa::SigningKey>(
            secret,
            CA_CERTIFICATE_KEY,
            CA_PRIVATE_KEY_KEY,
        )
        .ok()?;

        if now >= tracked.not_after - policy.ca_refresh {
            return None;
        }

        let ca = CertificateAuthority::new(pair);

        Some(Self {
            identity: ca.issuer_identity(),
            ca,
            secret: secret.clone(),
            previous_certificate: None,
        })
    }

    /// The stable identity token of the current CA.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn ca(&self) -> &CertificateAuthority<ecdsa::SigningKey> {
        &self.ca
    }

    /// The materialized CA secret, byte-identical to the input secret when
    /// the CA was reused.
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// The outgoing CA certificate, present only for the pass which minted a
    /// replacement while the predecessor was still valid.
    pub fn previous_certificate(&self) -> Option<&Certificate> {
        self.previous_certificate.as_ref()
    }
}

/// Returns the name of the CA secret of a stack.
pub fn ca_secret_name(stack_name: &str) -> String {
    format!("{stack_name}-internal-ca")
}

fn build_ca_secret(
    stack_name: &str,
    namespace: &str,
    ca: &CertificateAuthority<ecdsa::SigningKey>,
    tracked: &TrackedIssuance,
) -> Result<Secret, CreateSigningAuthorityError> {
    let certificate_pem = ca
        .certificate_pair()
        .certificate_pem(PEM_LINE_ENDING)
        .context(SerializeCertificateAuthoritySnafu)?;
    let private_key_pem = ca
        .certificate_pair()
        .private_key_pem(PEM_LINE_ENDING)
        .context(SerializeCertificateAuthoritySnafu)?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(ca_secret_name(stack_name)),
            namespace: Some(namespace.to_owned()),
            labels: Some(recommended_labels(stack_name, "internal-ca")),
            annotations: Some(tracked.to_annotations().context(StampIssuanceSnafu)?),
            ..ObjectMeta::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_owned()),
        data: Some(BTreeMap::from([
            (
                CA_CERTIFICATE_KEY.to_string(),
                ByteString(certificate_pem.into_bytes()),
            ),
            (
                CA_PRIVATE_KEY_KEY.to_string(),
                ByteString(private_key_pem.as_bytes().to_vec()),
            ),
        ])),
        ..Secret::default()
    })
}

#[cfg(test)]
mod tests {
    use super::{super::ISSUER_ANNOTATION_KEY, *};
    use crate::time::Duration;

    const ISSUED_AT: i64 = 1_700_000_000;

    fn policy() -> RotationPolicy {
        RotationPolicy {
            ca_validity: Duration::from_minutes_unchecked(10),
            ca_refresh: Duration::from_minutes_unchecked(5),
            cert_validity: Duration::from_minutes_unchecked(2),
            cert_refresh: Duration::from_minutes_unchecked(1),
        }
    }

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ISSUED_AT + offset_secs).unwrap()
    }

    #[test]
    fn fresh_mint_materializes_tracked_secret() {
        let authority = SigningAuthority::resolve("dev", "ns", None, &policy(), at(0)).unwrap();

        let secret = authority.secret();
        assert_eq!(secret.metadata.name.as_deref(), Some("dev-internal-ca"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ns"));
        assert_eq!(secret.type_.as_deref(), Some(TLS_SECRET_TYPE));

        let data = secret.data.as_ref().unwrap();
        assert!(data.contains_key(CA_CERTIFICATE_KEY));
        assert!(data.contains_key(CA_PRIVATE_KEY_KEY));

        let annotations = secret.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(ISSUER_ANNOTATION_KEY).unwrap(),
            authority.identity()
        );
        assert!(authority.previous_certificate().is_none());
    }

    #[test]
    fn reuse_before_refresh_window_is_byte_identical() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        // The refresh window opens at notAfter - caRefresh = issuance + 5m.
        let second =
            SigningAuthority::resolve("dev", "ns", Some(first.secret()), &policy, at(299))
                .unwrap();

        assert_eq!(second.secret(), first.secret());
        assert_eq!(second.identity(), first.identity());
        assert!(second.previous_certificate().is_none());
    }

    #[test]
    fn mint_at_refresh_window_boundary() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        let second =
            SigningAuthority::resolve("dev", "ns", Some(first.secret()), &policy, at(300))
                .unwrap();

        assert_ne!(second.identity(), first.identity());
        assert_ne!(second.secret(), first.secret());

        // The outgoing CA is still valid for another 5 minutes, so it is
        // retained for the trust bundle.
        assert!(second.previous_certificate().is_some());
    }

    #[test]
    fn hard_expired_predecessor_is_not_retained() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        let second =
            SigningAuthority::resolve("dev", "ns", Some(first.secret()), &policy, at(600))
                .unwrap();

        assert_ne!(second.identity(), first.identity());
        assert!(second.previous_certificate().is_none());
    }

    #[test]
    fn corrupt_annotations_trigger_mint() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        let mut corrupted = first.secret().clone();
        corrupted
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(super::super::NOT_AFTER_ANNOTATION_KEY.to_string(), "INVALID".to_string());

        let second =
            SigningAuthority::resolve("dev", "ns", Some(&corrupted), &policy, at(1)).unwrap();

        assert_ne!(second.identity(), first.identity());

        // The key material itself still parses and is not expired, so the
        // outgoing certificate stays trusted.
        assert!(second.previous_certificate().is_some());
    }

    #[test]
    fn corrupt_key_material_triggers_mint() {
        let policy = policy();
        let first = SigningAuthority::resolve("dev", "ns", None, &policy, at(0)).unwrap();

        let mut corrupted = first.secret().clone();
        corrupted
            .data
            .as_mut()
            .unwrap()
            .insert(CA_PRIVATE_KEY_KEY.to_string(), ByteString(b"garbage".to_vec()));

        let second =
            SigningAuthority::resolve("dev", "ns", Some(&corrupted), &policy, at(1)).unwrap();

        assert_ne!(second.identity(), first.identity());
    }
}
