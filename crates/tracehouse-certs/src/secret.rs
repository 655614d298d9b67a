//! Reads certificate pairs back out of Kubernetes [`Secret`]s.
//!
//! The rotation engine persists every credential as a `kubernetes.io/tls`
//! secret and reconstructs its state from those secrets on the next pass.
//! This module is the parsing half of that round trip; materializing the
//! secrets lives with the rotation engine itself.
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::spki::EncodePublicKey;

use crate::{CertificatePair, keys::CertificateKeypair};

/// The `type` of all Kubernetes secrets which hold TLS key material.
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Defines all error variants which can occur when loading a certificate pair
/// from a Kubernetes [`Secret`].
#[derive(Debug, Snafu)]
pub enum SecretError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("unexpected secret type, only {TLS_SECRET_TYPE} secrets hold key material"))]
    InvalidSecretType,

    #[snafu(display("the secret {secret} carries no data at all"))]
    NoSecretData { secret: ObjectRef<Secret> },

    #[snafu(display("the secret {secret} carries no certificate under the expected key"))]
    NoCertificateData { secret: ObjectRef<Secret> },

    #[snafu(display("the secret {secret} carries no private key under the expected key"))]
    NoPrivateKeyData { secret: ObjectRef<Secret> },

    #[snafu(display("failed to read a PEM certificate chain out of secret {secret}"))]
    ReadChain {
        secret: ObjectRef<Secret>,
        source: x509_cert::der::Error,
    },

    #[snafu(display("the certificate chain in secret {secret} is empty"))]
    EmptyChain { secret: ObjectRef<Secret> },

    #[snafu(display("the private key data is not valid UTF-8"))]
    DecodeUtf8String { source: std::str::Utf8Error },

    #[snafu(display("failed to deserialize private key from PEM"))]
    DeserializeKeyFromPem { source: E },
}

/// Creates a [`CertificatePair`] from a Kubernetes [`Secret`].
///
/// `certificate_key` and `private_key_key` name the entries of the secret's
/// data map to read. Leaf secrets use `tls.crt`/`tls.key`, CA secrets use
/// `ca.crt`/`ca.key`.
///
/// If the certificate entry contains a chain, only its first certificate is
/// used.
#[instrument(skip(secret))]
pub fn certificate_pair_from_secret<SK>(
    secret: &Secret,
    certificate_key: &str,
    private_key_key: &str,
) -> Result<CertificatePair<SK>, SecretError<SK::Error>>
where
    SK: CertificateKeypair,
    <SK::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    ensure!(
        secret.type_.as_deref().is_none_or(|t| t == TLS_SECRET_TYPE),
        InvalidSecretTypeSnafu
    );

    let secret_ref = ObjectRef::from_obj(secret);
    let data = secret.data.as_ref().with_context(|| NoSecretDataSnafu {
        secret: secret_ref.clone(),
    })?;

    debug!("retrieving certificate data from secret via key \"{certificate_key}\"");
    let certificate_data = data
        .get(certificate_key)
        .with_context(|| NoCertificateDataSnafu {
            secret: secret_ref.clone(),
        })?;

    let mut chain =
        x509_cert::Certificate::load_pem_chain(&certificate_data.0).with_context(|_| {
            ReadChainSnafu {
                secret: secret_ref.clone(),
            }
        })?;

    ensure!(!chain.is_empty(), EmptyChainSnafu {
        secret: secret_ref.clone(),
    });
    let certificate = chain.remove(0);

    debug!("retrieving private key data from secret via key \"{private_key_key}\"");
    let private_key_data = data
        .get(private_key_key)
        .with_context(|| NoPrivateKeyDataSnafu {
            secret: secret_ref.clone(),
        })?;

    let private_key_pem =
        std::str::from_utf8(&private_key_data.0).context(DecodeUtf8StringSnafu)?;
    let key_pair = SK::from_pkcs8_pem(private_key_pem).context(DeserializeKeyFromPemSnafu)?;

    Ok(CertificatePair::new(certificate, key_pair))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use k8s_openapi::ByteString;
    use x509_cert::der::pem::LineEnding;

    use super::*;
    use crate::{ca::CertificateAuthority, keys::ecdsa};

    fn not_before() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn tls_secret(certificate: &[u8], private_key: &[u8]) -> Secret {
        Secret {
            data: Some(BTreeMap::from([
                ("ca.crt".to_string(), ByteString(certificate.to_vec())),
                ("ca.key".to_string(), ByteString(private_key.to_vec())),
            ])),
            type_: Some(TLS_SECRET_TYPE.to_string()),
            ..Secret::default()
        }
    }

    #[test]
    fn round_trip_via_secret() {
        let ca = CertificateAuthority::builder_with_ecdsa()
            .not_before(not_before())
            .build()
            .expect("failed to build CA");

        let certificate_pem = ca
            .certificate_pair()
            .certificate_pem(LineEnding::LF)
            .unwrap();
        let private_key_pem = ca
            .certificate_pair()
            .private_key_pem(LineEnding::LF)
            .unwrap();

        let secret = tls_secret(certificate_pem.as_bytes(), private_key_pem.as_bytes());
        let parsed: CertificatePair<ecdsa::SigningKey> =
            certificate_pair_from_secret(&secret, "ca.crt", "ca.key")
                .expect("failed to parse certificate pair from secret");

        assert_eq!(parsed.certificate(), ca.ca_cert());
    }

    #[test]
    fn missing_private_key_data() {
        let ca = CertificateAuthority::builder_with_ecdsa()
            .not_before(not_before())
            .build()
            .expect("failed to build CA");

        let certificate_pem = ca
            .certificate_pair()
            .certificate_pem(LineEnding::LF)
            .unwrap();

        let mut secret = tls_secret(certificate_pem.as_bytes(), b"");
        secret.data.as_mut().unwrap().remove("ca.key");

        let err = certificate_pair_from_secret::<ecdsa::SigningKey>(&secret, "ca.crt", "ca.key")
            .expect_err("parsing must fail without private key data");
        assert!(matches!(err, SecretError::NoPrivateKeyData { .. }));
    }

    #[test]
    fn garbage_certificate_data() {
        let secret = tls_secret(b"not a certificate", b"not a key");

        let err = certificate_pair_from_secret::<ecdsa::SigningKey>(&secret, "ca.crt", "ca.key")
            .expect_err("parsing must fail on garbage certificate data");
        assert!(matches!(
            err,
            SecretError::ReadChain { .. } | SecretError::EmptyChain { .. }
        ));
    }
}
