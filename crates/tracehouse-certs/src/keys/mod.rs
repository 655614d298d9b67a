//! Key material used to sign CAs and to bind to leaf certificates.
//!
//! Two algorithms are supported. ECDSA keys are provided by [`ecdsa`] and
//! [`p256`] (NIST P-256) and are the default choice of the rotation engine
//! because generating them is cheap. RSA keys are provided by [`rsa`] and
//! exist for deployments whose verifiers cannot handle elliptic curves.
//!
//! ```no_run
//! use tracehouse_certs::keys::{CertificateKeypair, ecdsa::SigningKey};
//! let key = SigningKey::new().unwrap();
//! ```
use std::fmt::Debug;

use p256::pkcs8::EncodePrivateKey;
use rand_core::CryptoRngCore;
use signature::{Keypair, Signer};
use snafu::{ResultExt, Snafu};
use x509_cert::{
    der::{DecodePem, pem::LineEnding},
    spki::{
        EncodePublicKey, SignatureAlgorithmIdentifier, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
};

pub mod ecdsa;
pub mod rsa;

/// Error variants which can occur when re-encoding the public half of a
/// keypair as an SPKI structure.
#[derive(Debug, Snafu)]
pub enum PublicKeyInfoError {
    #[snafu(display("failed to serialize the verifying key as PEM"))]
    SerializeVerifyingKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to read the serialized verifying key back as SPKI"))]
    ReadSpki { source: x509_cert::der::Error },
}

/// A key pair which can sign certificates.
///
/// This trait is the seam between the certificate builders and the concrete
/// signature algorithm. Rotation code is generic over it, so switching the
/// stack from ECDSA to RSA keys is a one-line change at the call site.
pub trait CertificateKeypair
where
    <Self::SigningKey as Keypair>::VerifyingKey: EncodePublicKey,
    Self: Debug + Sized,
{
    type SigningKey: SignatureAlgorithmIdentifier
        + Keypair
        + Signer<Self::Signature>
        + EncodePrivateKey;
    type Signature: SignatureBitStringEncoding;
    type VerifyingKey: EncodePublicKey;

    type Error: std::error::Error + 'static;

    /// Generates a new key with the default random-number generator [`rand_core::OsRng`].
    fn new() -> Result<Self, Self::Error>;

    /// Generates a new key with a custom random-number generator.
    fn new_with_rng<R>(rng: &mut R) -> Result<Self, Self::Error>
    where
        R: CryptoRngCore;

    /// Returns the signing (private) key half of the keypair.
    fn signing_key(&self) -> &Self::SigningKey;

    /// Returns the verifying (public) half of the keypair.
    fn verifying_key(&self) -> Self::VerifyingKey;

    /// Creates a signing key pair from the PEM-encoded private key.
    fn from_pkcs8_pem(input: &str) -> Result<Self, Self::Error>;

    /// The name of the algorithm such as `rsa` or `ecdsa`.
    fn algorithm_name() -> &'static str;

    /// The key length in bits
    fn key_size() -> usize;

    /// Returns the verifying key as the owned SPKI structure which gets
    /// embedded into issued certificates.
    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, PublicKeyInfoError> {
        let pem = self
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .context(SerializeVerifyingKeySnafu)?;

        SubjectPublicKeyInfoOwned::from_pem(pem.as_bytes()).context(ReadSpkiSnafu)
    }
}
