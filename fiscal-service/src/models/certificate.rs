//! In-memory certificate material for one emission or diagnostic call.

use chrono::{DateTime, Utc};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::SecretString;
use serde::Serialize;

/// Which passphrase candidate opened the PKCS12 container.
///
/// Anything other than `Stored` means the encrypted token no longer decrypts
/// under the current master key and the merchant settings need re-encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassphraseSource {
    Stored,
    Empty,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidityStatus {
    Ok,
    Warn,
    Expired,
    NotYetValid,
}

/// Certificate material held only for the duration of a single call.
pub struct CertificateBundle {
    /// Raw PKCS12 container bytes, needed for the mutual-TLS identity.
    pub der: Vec<u8>,
    pub passphrase: SecretString,
    pub passphrase_source: PassphraseSource,
    pub private_key: PKey<Private>,
    /// Certificate whose public key matches `private_key` (modulus-matched
    /// when the container carries more than one certificate).
    pub certificate: X509,
    /// Remaining certificates from the container, in bag order.
    pub chain: Vec<X509>,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("der_len", &self.der.len())
            .field("passphrase_source", &self.passphrase_source)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Parsed certificate facts reported by diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateHealth {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    pub days_remaining: i32,
    pub validity: ValidityStatus,
    pub passphrase_source: PassphraseSource,
    pub checked_at: DateTime<Utc>,
}
