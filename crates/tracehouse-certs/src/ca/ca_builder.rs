use std::time::{Duration, SystemTime};

use bon::Builder;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::referenced::OwnedToRef,
    ext::pkix::AuthorityKeyIdentifier,
    name::Name,
    serial_number::SerialNumber,
    spki::EncodePublicKey,
    time::{Time, Validity},
};

use super::CertificateAuthority;
use crate::{
    CertificatePair,
    ca::{DEFAULT_CA_VALIDITY, TRACEHOUSE_ROOT_CA_SUBJECT},
    keys::{CertificateKeypair, PublicKeyInfoError},
};

/// Defines all error variants which can occur when creating a CA
#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to convert the validity window into ASN.1 time"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to parse {subject:?} as a distinguished name"))]
    ParseSubject {
        subject: String,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to generate the CA signing key pair"))]
    CreateSigningKeyPair { source: E },

    #[snafu(display("failed to encode the public key for embedding"))]
    EncodePublicKey { source: PublicKeyInfoError },

    #[snafu(display("failed to parse AuthorityKeyIdentifier"))]
    ParseAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to initialize the certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to attach an extension to the certificate"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to sign and assemble the certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },
}

/// This builder builds certificate authorities of type [`CertificateAuthority`].
///
/// The only required value is `not_before`, which anchors the validity
/// window. Callers pass in their notion of "now"; the builder never reads
/// the wall clock, so building a CA stays a pure function of its inputs.
///
/// Optional values fall back to defaults:
///
/// - The subject defaults to [`TRACEHOUSE_ROOT_CA_SUBJECT`]
/// - The validity defaults to [`DEFAULT_CA_VALIDITY`]
/// - The serial number is drawn at random
/// - Without an explicit `signing_key_pair`, a fresh keypair is generated.
///   The algorithm (`rsa`/`ecdsa`) is selected via the generic
///   [`CertificateKeypair`] type of this struct.
///
/// The CA certificate embeds the public half of the signing key pair and is
/// self-signed by its private half.
///
/// ```no_run
/// use std::time::SystemTime;
/// use tracehouse_certs::{
///     keys::ecdsa, ca::CertificateAuthority,
/// };
///
/// let ca = CertificateAuthority::<ecdsa::SigningKey>::builder()
///     .not_before(SystemTime::now())
///     .build()
///     .expect("failed to build CA");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateAuthorityBuilder<'a, SKP>
where
    SKP: CertificateKeypair,
    <SKP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    /// Subject of the certificate authority, usually starts with `CN=`.
    #[builder(default = TRACEHOUSE_ROOT_CA_SUBJECT)]
    subject: &'a str,

    /// Start of the validity window, usually the caller's "now".
    not_before: SystemTime,

    /// Lifetime of the certificate, [`DEFAULT_CA_VALIDITY`] unless set.
    #[builder(default = DEFAULT_CA_VALIDITY)]
    validity: Duration,

    /// Cryptographic keypair used to sign leaf certificates.
    signing_key_pair: Option<SKP>,
}

impl<SKP, S> CertificateAuthorityBuilderBuilder<'_, SKP, S>
where
    SKP: CertificateKeypair,
    <SKP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
    S: certificate_authority_builder_builder::IsComplete,
{
    /// Shorthand which finalizes the builder and builds the CA in one call.
    pub fn build(
        self,
    ) -> Result<CertificateAuthority<SKP>, CreateCertificateAuthorityError<SKP::Error>> {
        self.finish_builder().build()
    }
}

impl<SKP> CertificateAuthorityBuilder<'_, SKP>
where
    SKP: CertificateKeypair,
    <SKP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    #[instrument(
        name = "build_certificate_authority",
        skip(self),
        fields(subject = self.subject),
    )]
    pub fn build(
        self,
    ) -> Result<CertificateAuthority<SKP>, CreateCertificateAuthorityError<SKP::Error>> {
        let validity = Validity {
            not_before: Time::try_from(self.not_before).context(ParseValiditySnafu)?,
            not_after: Time::try_from(self.not_before + self.validity)
                .context(ParseValiditySnafu)?,
        };
        let subject: Name = self.subject.parse().context(ParseSubjectSnafu {
            subject: self.subject,
        })?;
        let signing_key_pair = match self.signing_key_pair {
            Some(signing_key_pair) => signing_key_pair,
            None => SKP::new().context(CreateSigningKeyPairSnafu)?,
        };

        // A random serial makes the identity token of each minted CA unique,
        // which the rotation engine relies on to detect CA replacement.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        let public_key_info = signing_key_pair
            .public_key_info()
            .context(EncodePublicKeySnafu)?;

        // The Root profile already carries BasicConstraints (critical,
        // CA = true), a SubjectKeyIdentifier derived from the subject public
        // key, and a KeyUsage with the KeyCertSign and CRLSign bits. What it
        // does not add is the AuthorityKeyIdentifier, so that one is appended
        // manually, derived from the subject public key as RFC 5280 section
        // 4.2.1.2 permits.
        let aki = AuthorityKeyIdentifier::try_from(public_key_info.owned_to_ref())
            .context(ParseAuthorityKeyIdentifierSnafu)?;

        debug!(
            ca.subject = %subject,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.serial = ?serial_number,
            ca.public_key.algorithm = SKP::algorithm_name(),
            ca.public_key.size = SKP::key_size(),
            "creating certificate authority"
        );
        let signer = signing_key_pair.signing_key();
        let mut builder = CertificateBuilder::new(
            Profile::Root,
            serial_number,
            validity,
            subject,
            public_key_info,
            signer,
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&aki)
            .context(AddCertificateExtensionSnafu)?;
        let certificate = builder.build().context(BuildCertificateSnafu)?;

        Ok(CertificateAuthority::new(CertificatePair::new(
            certificate,
            signing_key_pair,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::keys::rsa;

    fn not_before() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn validity_of<SK>(ca: &CertificateAuthority<SK>) -> Duration
    where
        SK: CertificateKeypair,
        <SK::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
    {
        let validity = ca.ca_cert().tbs_certificate.validity;
        validity
            .not_after
            .to_system_time()
            .duration_since(validity.not_before.to_system_time())
            .expect("notAfter must come after notBefore")
    }

    #[test]
    fn mints_with_defaults() {
        let ca = CertificateAuthority::builder_with_ecdsa()
            .not_before(not_before())
            .build()
            .expect("failed to build CA");

        assert_eq!(
            ca.ca_cert().tbs_certificate.subject,
            TRACEHOUSE_ROOT_CA_SUBJECT.parse().unwrap()
        );
        assert_eq!(validity_of(&ca), DEFAULT_CA_VALIDITY);
    }

    #[test]
    fn mints_with_custom_values() {
        let validity = Duration::from_secs(13 * 24 * 60 * 60);
        let ca = CertificateAuthority::builder()
            .subject("CN=Test")
            .signing_key_pair(rsa::SigningKey::new().unwrap())
            .not_before(not_before())
            .validity(validity)
            .build()
            .expect("failed to build CA");

        assert_eq!(
            ca.ca_cert().tbs_certificate.subject,
            "CN=Test".parse().unwrap()
        );
        assert_eq!(validity_of(&ca), validity);
    }

    #[test]
    fn issuer_identity_is_stable_per_ca() {
        let ca = CertificateAuthority::builder_with_ecdsa()
            .not_before(not_before())
            .build()
            .expect("failed to build CA");

        assert_eq!(ca.issuer_identity(), ca.issuer_identity());

        let other = CertificateAuthority::builder_with_ecdsa()
            .not_before(not_before())
            .build()
            .expect("failed to build CA");

        // Serial numbers are random, so two CAs never share an identity.
        assert_ne!(ca.issuer_identity(), other.issuer_identity());
    }
}
