use std::time::{Duration, SystemTime};

use bon::Builder;
use const_oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, Profile},
    der::asn1::Ia5String,
    ext::pkix::{ExtendedKeyUsage, SubjectAltName, name::GeneralName},
    name::Name,
    serial_number::SerialNumber,
    spki::EncodePublicKey,
    time::{Time, Validity},
};

use crate::{
    CertificatePair,
    ca::{CertificateAuthority, DEFAULT_CERTIFICATE_VALIDITY},
    keys::{CertificateKeypair, PublicKeyInfoError},
};

/// Defines all error variants which can occur when creating a certificate
#[derive(Debug, Snafu)]
pub enum CreateCertificateError<E>
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

    #[snafu(display("failed to generate a key pair for the certificate"))]
    CreateKeyPair { source: E },

    #[snafu(display("failed to encode the public key for embedding"))]
    EncodePublicKey { source: PublicKeyInfoError },

    #[snafu(display("failed to initialize the certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to attach an extension to the certificate"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to parse the DNS name {dns_name:?} as an Ia5 string"))]
    ParseSubjectAlternativeDnsName {
        dns_name: String,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to sign and assemble the certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },

    #[snafu(display(
        "the certificate would outlive its CA, subject {subject:?}, \
        CA notAfter {ca_not_after:?}, cert notAfter {cert_not_after:?}"
    ))]
    CertOutlivesCa {
        subject: String,
        ca_not_after: SystemTime,
        cert_not_after: SystemTime,
    },
}

/// This builder builds CA-signed leaf certificates of type
/// [`CertificatePair`].
///
/// Two values are always required: the [`CertificateAuthority`] which signs
/// the certificate, and the `not_before` timestamp anchoring the validity
/// window. Callers pass in their notion of "now"; the builder never reads
/// the wall clock.
///
/// Every issued certificate carries [`ID_KP_CLIENT_AUTH`] and
/// [`ID_KP_SERVER_AUTH`] in its extended key usage, so one credential serves
/// a component for both serving and client authentication.
///
/// Optional values fall back to defaults:
///
/// - The validity defaults to [`DEFAULT_CERTIFICATE_VALIDITY`]
/// - The serial number is drawn at random
/// - Without an explicit `key_pair`, a fresh keypair is generated. The
///   algorithm (`rsa`/`ecdsa`) is selected via the generic
///   [`CertificateKeypair`] type, which is normally inferred from the
///   [`CertificateAuthority`].
///
/// ```no_run
/// use std::time::SystemTime;
/// use tracehouse_certs::{
///     keys::ecdsa,
///     ca::CertificateAuthority,
///     CertificatePair,
/// };
///
/// let now = SystemTime::now();
/// let ca = CertificateAuthority::<ecdsa::SigningKey>::builder()
///     .not_before(now)
///     .build()
///     .expect("failed to build CA");
///
/// let certificate = CertificatePair::builder()
///     .subject("CN=tracehouse-query-0")
///     .not_before(now)
///     .signed_by(&ca)
///     .build()
///     .expect("failed to build certificate");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateBuilder<'a, KP>
where
    KP: CertificateKeypair,
    <KP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    /// Subject of the certificate, usually starts with `CN=`, e.g. `CN=mypod`.
    subject: &'a str,

    /// DNS names added to the certificate as subject alternative names.
    #[builder(default)]
    subject_alternative_dns_names: &'a [&'a str],

    /// Start of the validity window, usually the caller's "now".
    not_before: SystemTime,

    /// Lifetime of the certificate, [`DEFAULT_CERTIFICATE_VALIDITY`] unless set.
    #[builder(default = DEFAULT_CERTIFICATE_VALIDITY)]
    validity: Duration,

    /// Cryptographic keypair bound to the certificate.
    key_pair: Option<KP>,

    /// The [`CertificateAuthority`] which signs this certificate.
    signed_by: &'a CertificateAuthority<KP>,
}

impl<KP, S> CertificateBuilderBuilder<'_, KP, S>
where
    KP: CertificateKeypair,
    <KP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
    S: certificate_builder_builder::IsComplete,
{
    /// Shorthand which finalizes the builder and builds the certificate in one
    /// call.
    pub fn build(self) -> Result<CertificatePair<KP>, CreateCertificateError<KP::Error>> {
        self.finish_builder().build()
    }
}

impl<KP> CertificateBuilder<'_, KP>
where
    KP: CertificateKeypair,
    <KP::SigningKey as signature::Keypair>::VerifyingKey: EncodePublicKey,
{
    #[instrument(
        name = "build_certificate",
        skip(self),
        fields(subject = self.subject),
    )]
    pub fn build(self) -> Result<CertificatePair<KP>, CreateCertificateError<KP::Error>> {
        let validity = Validity {
            not_before: Time::try_from(self.not_before).context(ParseValiditySnafu)?,
            not_after: Time::try_from(self.not_before + self.validity)
                .context(ParseValiditySnafu)?,
        };

        // A certificate which outlives its CA would stop verifying the
        // moment the CA expires, long before its own notAfter suggests.
        let ca_not_after = self
            .signed_by
            .ca_cert()
            .tbs_certificate
            .validity
            .not_after
            .to_system_time();
        let cert_not_after = validity.not_after.to_system_time();
        ensure!(ca_not_after > cert_not_after, CertOutlivesCaSnafu {
            subject: self.subject,
            ca_not_after,
            cert_not_after,
        });

        let subject: Name = self.subject.parse().context(ParseSubjectSnafu {
            subject: self.subject,
        })?;
        let key_pair = match self.key_pair {
            Some(key_pair) => key_pair,
            None => KP::new().context(CreateKeyPairSnafu)?,
        };

        // A random serial gives every issued certificate a distinct identity
        // even when subject and validity repeat across rotations.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        let public_key_info = key_pair.public_key_info().context(EncodePublicKeySnafu)?;

        debug!(
            certificate.subject = %subject,
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %serial_number,
            certificate.san.dns_names = ?self.subject_alternative_dns_names,
            certificate.signed_by.issuer = %self.signed_by.issuer_name(),
            certificate.public_key.algorithm = KP::algorithm_name(),
            certificate.public_key.size = KP::key_size(),
            "creating and signing certificate"
        );
        let signing_key = self.signed_by.signing_key();
        let mut builder = x509_cert::builder::CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.signed_by.issuer_name().clone(),
                enable_key_agreement: false,
                enable_key_encipherment: true,
            },
            serial_number,
            validity,
            subject,
            public_key_info,
            signing_key,
        )
        .context(CreateCertificateBuilderSnafu)?;

        // Serving and client authentication with one credential.
        builder
            .add_extension(&ExtendedKeyUsage(vec![
                ID_KP_CLIENT_AUTH,
                ID_KP_SERVER_AUTH,
            ]))
            .context(AddCertificateExtensionSnafu)?;

        let mut san_entries = Vec::with_capacity(self.subject_alternative_dns_names.len());
        for dns_name in self.subject_alternative_dns_names {
            let name = Ia5String::new(dns_name).with_context(|_| {
                ParseSubjectAlternativeDnsNameSnafu {
                    dns_name: dns_name.to_string(),
                }
            })?;
            san_entries.push(GeneralName::DnsName(name));
        }
        builder
            .add_extension(&SubjectAltName(san_entries))
            .context(AddCertificateExtensionSnafu)?;

        let certificate = builder.build().context(BuildCertificateSnafu)?;

        Ok(CertificatePair::new(certificate, key_pair))
    }
}
