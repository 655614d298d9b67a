//! X.509 primitives for the Tracehouse operator: self-signed certificate
//! authorities, CA-signed leaf certificates, and the (de)serialization glue
//! to carry both through Kubernetes secrets. The internal services of a
//! Tracehouse stack use one leaf certificate each, for serving and client
//! authentication alike.
//!
//! All validity windows are anchored to an explicit `not_before` timestamp
//! provided by the caller. The crate never reads the wall clock itself, which
//! keeps certificate creation a pure function of its inputs.
//!
//! Certificate profiles follow RFC 5280 and the CA/Browser Forum baseline
//! requirements for TLS server certificates.
use snafu::{ResultExt, Snafu};
use x509_cert::{
    Certificate,
    der::{EncodePem, pem::LineEnding},
    spki::EncodePublicKey,
};
use zeroize::Zeroizing;

use crate::keys::CertificateKeypair;

pub mod ca;
pub mod keys;
pub mod secret;

mod cert_builder;
pub use cert_builder::*;

/// Error variants which can be encountered when serializing or deserializing
/// a [`CertificatePair`].
#[derive(Debug, Snafu)]
pub enum CertificatePairError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to write the certificate as {key_encoding}"))]
    SerializeCertificate {
        key_encoding: KeyEncoding,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to read a certificate from {key_encoding}"))]
    DeserializeCertificate {
        key_encoding: KeyEncoding,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to write the private key as PKCS8 {key_encoding}"))]
    SerializePrivateKey {
        key_encoding: KeyEncoding,
        source: p256::pkcs8::Error,
    },

    #[snafu(display("failed to read a PKCS8 {key_encoding} private key"))]
    DeserializePrivateKey {
        key_encoding: KeyEncoding,
        source: E,
    },
}

/// A certificate together with the key pair it is bound to.
///
/// For a [`CertificateAuthority`](crate::ca::CertificateAuthority) the key
/// pair is the signing key which self-signs the CA and signs every child
/// leaf certificate. For a leaf certificate it is the key the owning service
/// presents during TLS handshakes.
#[derive(Debug)]
pub struct CertificatePair<S>
where
    S: CertificateKeypair,
    <S::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    certificate: Certificate,
    key_pair: S,
}

impl<S> CertificatePair<S>
where
    S: CertificateKeypair,
    <S::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    pub fn new(certificate: Certificate, key_pair: S) -> Self {
        Self {
            certificate,
            key_pair,
        }
    }

    /// Starts building a new CA-signed leaf certificate, see
    /// [`CertificateBuilder`].
    pub fn builder<'a>() -> CertificateBuilderBuilder<'a, S> {
        CertificateBuilder::start_builder()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key_pair(&self) -> &S {
        &self.key_pair
    }

    /// Returns the PEM-encoded certificate.
    pub fn certificate_pem(
        &self,
        line_ending: LineEnding,
    ) -> Result<String, CertificatePairError<S::Error>> {
        self.certificate
            .to_pem(line_ending)
            .context(SerializeCertificateSnafu {
                key_encoding: KeyEncoding::Pem,
            })
    }

    /// Returns the PEM-encoded PKCS8 private key.
    ///
    /// The returned string is zeroed out on drop, because it contains
    /// sensitive key material.
    pub fn private_key_pem(
        &self,
        line_ending: LineEnding,
    ) -> Result<Zeroizing<String>, CertificatePairError<S::Error>> {
        use p256::pkcs8::EncodePrivateKey;

        self.key_pair
            .signing_key()
            .to_pkcs8_pem(line_ending)
            .context(SerializePrivateKeySnafu {
                key_encoding: KeyEncoding::Pem,
            })
    }
}

/// The encoding of serialized key material, either DER or PEM.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyEncoding {
    Pem,
    Der,
}

impl std::fmt::Display for KeyEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pem => write!(f, "PEM"),
            Self::Der => write!(f, "DER"),
        }
    }
}
