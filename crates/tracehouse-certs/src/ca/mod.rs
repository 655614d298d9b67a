//! Self-signed certificate authorities and the identity tokens the rotation
//! engine uses to tell them apart.
use std::fmt::Debug;

use x509_cert::{Certificate, name::RdnSequence, spki::EncodePublicKey};

use crate::{
    CertificatePair,
    keys::{CertificateKeypair, ecdsa, rsa},
};

mod ca_builder;
mod consts;
pub use ca_builder::*;
pub use consts::*;

/// A certificate authority (CA) which signs the leaf certificates of one
/// stack.
///
/// New CAs are minted via [`CertificateAuthorityBuilder`]; previously
/// materialized ones are reconstructed from their secret via
/// [`certificate_pair_from_secret`](crate::secret::certificate_pair_from_secret)
/// and [`Self::new`].
#[derive(Debug)]
pub struct CertificateAuthority<SK>
where
    SK: CertificateKeypair,
    <SK::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    certificate_pair: CertificatePair<SK>,
}

impl<SK> CertificateAuthority<SK>
where
    SK: CertificateKeypair,
    <SK::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    pub fn new(certificate_pair: CertificatePair<SK>) -> Self {
        Self { certificate_pair }
    }

    /// Starts building a new CA, see [`CertificateAuthorityBuilder`].
    pub fn builder() -> CertificateAuthorityBuilderBuilder<'static, SK> {
        CertificateAuthorityBuilder::start_builder()
    }

    pub fn signing_key(&self) -> &SK::SigningKey {
        self.certificate_pair.key_pair().signing_key()
    }

    pub fn ca_cert(&self) -> &Certificate {
        self.certificate_pair.certificate()
    }

    pub fn certificate_pair(&self) -> &CertificatePair<SK> {
        &self.certificate_pair
    }

    pub fn issuer_name(&self) -> &RdnSequence {
        &self.ca_cert().tbs_certificate.issuer
    }

    /// Returns a stable token identifying this CA.
    ///
    /// The token combines the subject with the hex-encoded serial number. Both
    /// are read from the certificate itself, so re-parsing the same
    /// certificate always yields the same token, while minting a new CA (which
    /// draws a fresh random serial) always yields a different one. Leaf
    /// credentials record this token at issuance to detect CA rotation by
    /// plain string comparison.
    pub fn issuer_identity(&self) -> String {
        issuer_identity(self.ca_cert())
    }
}

/// Derives the stable issuer identity token of any CA [`Certificate`].
///
/// See [`CertificateAuthority::issuer_identity`].
pub fn issuer_identity(certificate: &Certificate) -> String {
    let tbs = &certificate.tbs_certificate;
    let serial_hex: String = tbs
        .serial_number
        .as_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    format!("{subject}/{serial_hex}", subject = tbs.subject)
}

impl CertificateAuthority<rsa::SigningKey> {
    /// [`Self::builder`] with the key algorithm pinned to RSA.
    pub fn builder_with_rsa() -> CertificateAuthorityBuilderBuilder<'static, rsa::SigningKey> {
        Self::builder()
    }
}

impl CertificateAuthority<ecdsa::SigningKey> {
    /// [`Self::builder`] with the key algorithm pinned to ECDSA.
    pub fn builder_with_ecdsa() -> CertificateAuthorityBuilderBuilder<'static, ecdsa::SigningKey> {
        Self::builder()
    }
}
