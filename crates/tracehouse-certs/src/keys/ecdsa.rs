//! ECDSA key generation on the NIST P-256 curve, the default signature
//! algorithm of the rotation engine.
use p256::{NistP256, pkcs8::DecodePrivateKey};
use rand_core::{CryptoRngCore, OsRng};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::keys::CertificateKeypair;

const KEY_SIZE: usize = 256;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to deserialize ECDSA key from PEM"))]
    DeserializeKeyFromPem { source: p256::pkcs8::Error },
}

#[derive(Debug)]
pub struct SigningKey(p256::ecdsa::SigningKey);

impl CertificateKeypair for SigningKey {
    type Error = Error;
    type Signature = ecdsa::der::Signature<NistP256>;
    type SigningKey = p256::ecdsa::SigningKey;
    type VerifyingKey = p256::ecdsa::VerifyingKey;

    #[instrument(name = "generate_ecdsa_key")]
    fn new() -> Result<Self> {
        Self::new_with_rng(&mut OsRng)
    }

    #[instrument(name = "generate_ecdsa_key_custom_rng", skip_all)]
    fn new_with_rng<R>(rng: &mut R) -> Result<Self>
    where
        R: CryptoRngCore,
    {
        Ok(Self(p256::ecdsa::SigningKey::random(rng)))
    }

    fn signing_key(&self) -> &Self::SigningKey {
        &self.0
    }

    fn verifying_key(&self) -> Self::VerifyingKey {
        *self.0.verifying_key()
    }

    #[instrument(name = "read_ecdsa_key_from_pkcs8_pem", skip_all)]
    fn from_pkcs8_pem(input: &str) -> Result<Self, Self::Error> {
        p256::ecdsa::SigningKey::from_pkcs8_pem(input)
            .map(Self)
            .context(DeserializeKeyFromPemSnafu)
    }

    fn algorithm_name() -> &'static str {
        "ecdsa"
    }

    fn key_size() -> usize {
        KEY_SIZE
    }
}
