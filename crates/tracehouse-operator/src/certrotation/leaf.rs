//! Decides, per internal service component, whether its serving/client
//! certificate must be (re)issued, and issues it if so.
use std::{collections::BTreeMap, time::SystemTime};

use k8s_openapi::{
    ByteString, api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;
use tracehouse_certs::{
    CertificatePair, CertificatePairError, CreateCertificateError,
    ca::PEM_LINE_ENDING,
    keys::ecdsa,
    secret::{TLS_SECRET_TYPE, certificate_pair_from_secret},
};
use tracing::{debug, instrument};
use x509_cert::der::EncodePem;

use super::{ComponentCertificate, RotationPolicy, SigningAuthority, StampIssuanceError, TrackedIssuance};
use crate::meta::recommended_labels;

/// The key under which the leaf certificate is stored in its [`Secret`].
pub const TLS_CERTIFICATE_KEY: &str = "tls.crt";

/// The key under which the leaf private key is stored in its [`Secret`].
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// The key under which the signing CA certificate is stored in every leaf
/// [`Secret`].
pub const TLS_CA_CERTIFICATE_KEY: &str = "ca.crt";

/// Defines all error variants which can occur when resolving a leaf
/// credential.
#[derive(Debug, Snafu)]
pub enum CreateLeafCredentialError {
    #[snafu(display("failed to create a certificate for component {component:?}"))]
    CreateCertificate {
        source: CreateCertificateError<ecdsa::Error>,
        component: String,
    },

    #[snafu(display("failed to PEM-encode the certificate for component {component:?}"))]
    SerializeCertificate {
        source: CertificatePairError<ecdsa::Error>,
        component: String,
    },

    #[snafu(display("failed to PEM-encode the signing CA certificate"))]
    EncodeCaCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to stamp issuance tracking annotations"))]
    TrackIssuance { source: StampIssuanceError },
}

/// Reuses the previously materialized leaf secret or issues a new CA-signed
/// credential for one component.
///
/// A new credential is issued when any of the following holds:
///
/// - the existing secret is absent, or its key material or tracking
///   annotations fail to parse
/// - the recorded issuer differs from the current authority's identity (CA
///   rotation cascades immediately, independent of remaining leaf validity)
/// - `now` has entered the refresh window `[notAfter - certRefresh, ∞)`,
///   which also covers hard expiry
/// - the recorded hostname set differs from the requested one
///
/// Otherwise the existing secret is returned unchanged, so an unrotated pass
/// never produces a diff that would restart dependent pods.
#[instrument(
    name = "resolve_leaf_credential",
    skip(component, existing, authority, policy),
    fields(stack = stack_name, component = %component.name),
)]
pub fn resolve_leaf_credential(
    stack_name: &str,
    namespace: &str,
    component: &ComponentCertificate,
    existing: Option<&Secret>,
    authority: &SigningAuthority,
    policy: &RotationPolicy,
    now: OffsetDateTime,
) -> Result<Secret, CreateLeafCredentialError> {
    if let Some(secret) = existing {
        if reusable(secret, component, authority, policy, now) {
            debug!("reusing existing leaf credential");
            return Ok(secret.clone());
        }
    }

    issue_leaf_credential(stack_name, namespace, component, authority, policy, now)
}

fn reusable(
    secret: &Secret,
    component: &ComponentCertificate,
    authority: &SigningAuthority,
    policy: &RotationPolicy,
    now: OffsetDateTime,
) -> bool {
    let Some(tracked) = TrackedIssuance::from_secret(secret) else {
        return false;
    };

    if certificate_pair_from_secret::<ecdsa::SigningKey>(
        secret,
        TLS_CERTIFICATE_KEY,
        TLS_PRIVATE_KEY_KEY,
    )
    .is_err()
    {
        return false;
    }

    tracked.issuer == authority.identity()
        && now < tracked.not_after - policy.cert_refresh
        && tracked.hostnames == component.hostnames
}

fn issue_leaf_credential(
    stack_name: &str,
    namespace: &str,
    component: &ComponentCertificate,
    authority: &SigningAuthority,
    policy: &RotationPolicy,
    now: OffsetDateTime,
) -> Result<Secret, CreateLeafCredentialError> {
    let subject = format!("CN={stack_name}-{component}", component = component.name);
    let hostnames: Vec<&str> = component.hostnames.iter().map(String::as_str).collect();

    let certificate = CertificatePair::<ecdsa::SigningKey>::builder()
        .subject(&subject)
        .subject_alternative_dns_names(&hostnames)
        .not_before(SystemTime::from(now))
        .validity(*policy.cert_validity)
        .signed_by(authority.ca())
        .build()
        .with_context(|_| CreateCertificateSnafu {
            component: component.name.clone(),
        })?;

    let tracked = TrackedIssuance::from_certificate(
        authority.identity().to_owned(),
        certificate.certificate(),
        component.hostnames.clone(),
    );

    let certificate_pem = certificate
        .certificate_pem(PEM_LINE_ENDING)
        .with_context(|_| SerializeCertificateSnafu {
            component: component.name.clone(),
        })?;
    let private_key_pem = certificate
        .private_key_pem(PEM_LINE_ENDING)
        .with_context(|_| SerializeCertificateSnafu {
            component: component.name.clone(),
        })?;
    let ca_certificate_pem = authority
        .ca()
        .ca_cert()
        .to_pem(PEM_LINE_ENDING)
        .context(EncodeCaCertificateSnafu)?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(leaf_secret_name(stack_name, &component.name)),
            namespace: Some(namespace.to_owned()),
            labels: Some(recommended_labels(stack_name, &component.name)),
            annotations: Some(tracked.to_annotations().context(TrackIssuanceSnafu)?),
            ..ObjectMeta::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_owned()),
        data: Some(BTreeMap::from([
            (
                TLS_CERTIFICATE_KEY.to_string(),
                ByteString(certificate_pem.into_bytes()),
            ),
            (
                TLS_PRIVATE_KEY_KEY.to_string(),
                ByteString(private_key_pem.as_bytes().to_vec()),
            ),
            (
                TLS_CA_CERTIFICATE_KEY.to_string(),
                ByteString(ca_certificate_pem.into_bytes()),
            ),
        ])),
        ..Secret::default()
    })
}

/// Returns the name of the TLS secret of one component of a stack.
pub fn leaf_secret_name(stack_name: &str, component_name: &str) -> String {
    format!("{stack_name}-{component_name}-tls")
}
