//! Certificate storage and PKCS12 handling.
//!
//! Containers are read from a fixed directory outside any web-servable path
//! and parsed fresh on every call. Passphrase candidates are probed in a
//! bounded order: the decrypted stored token, the empty string, then the
//! operator-supplied fallback. A winner other than the stored token means
//! the master key rotated since the passphrase was saved; the event is
//! logged and surfaced by diagnostics and the rekey operation.

use crate::models::{
    CertificateBundle, CertificateHealth, FiscalConfig, PassphraseSource, ValidityStatus,
};
use crate::services::secrets::SecretCodec;
use async_trait::async_trait;
use chrono::Utc;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509NameRef};
use secrecy::{ExposeSecret, SecretString};
use service_core::error::AppError;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Certificate expiring in fewer days than this yields a warn status.
const EXPIRY_WARN_DAYS: i32 = 30;

#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn exists(&self, filename: &str) -> bool;
    async fn load(&self, filename: &str) -> Result<Vec<u8>, AppError>;
}

/// Filesystem store rooted at the configured secure directory.
pub struct LocalCertificateStore {
    base_path: PathBuf,
}

impl LocalCertificateStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    /// Filenames come from settings documents; refuse anything that would
    /// escape the store directory.
    fn resolve(&self, filename: &str) -> Result<PathBuf, AppError> {
        let candidate = PathBuf::from(filename);
        if candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::certificate(format!(
                "invalid certificate filename: {}",
                filename
            )));
        }
        Ok(self.base_path.join(candidate))
    }
}

#[async_trait]
impl CertificateStore for LocalCertificateStore {
    async fn exists(&self, filename: &str) -> bool {
        match self.resolve(filename) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn load(&self, filename: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(filename)?;
        fs::read(&path).await.map_err(|e| {
            AppError::certificate(format!(
                "certificate file {} could not be read: {}",
                filename, e
            ))
        })
    }
}

/// Outcome of probing the stored passphrase token, before touching the
/// container. Feeds diagnostics step 6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassphraseDecryption {
    Decrypted,
    NoStoredToken,
    Failed(String),
}

pub struct CertificateManager {
    store: Arc<dyn CertificateStore>,
    codec: SecretCodec,
    fallback_passphrase: Option<SecretString>,
}

impl CertificateManager {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        codec: SecretCodec,
        fallback_passphrase: Option<SecretString>,
    ) -> Self {
        Self {
            store,
            codec,
            fallback_passphrase,
        }
    }

    pub fn codec(&self) -> &SecretCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn CertificateStore> {
        &self.store
    }

    /// Attempt to decrypt the stored passphrase token without opening the
    /// container.
    pub fn decrypt_stored(&self, cert_password_enc: Option<&str>) -> PassphraseDecryption {
        match cert_password_enc {
            None => PassphraseDecryption::NoStoredToken,
            Some(token) => match self.codec.decrypt(token) {
                Ok(_) => PassphraseDecryption::Decrypted,
                Err(e) => PassphraseDecryption::Failed(e.to_string()),
            },
        }
    }

    /// Load and open the merchant's certificate, probing passphrase
    /// candidates in order. Returns the parsed bundle with the matched
    /// key/certificate pair.
    pub async fn load(&self, config: &FiscalConfig) -> Result<CertificateBundle, AppError> {
        let filename = config.cert_filename.as_deref().ok_or_else(|| {
            AppError::certificate("no certificate configured for this merchant")
        })?;
        let der = self.store.load(filename).await?;

        let mut candidates: Vec<(PassphraseSource, String)> = Vec::new();
        match config.cert_password_enc.as_deref() {
            Some(token) => match self.codec.decrypt(token) {
                Ok(plain) => candidates.push((PassphraseSource::Stored, plain)),
                Err(e) => {
                    tracing::warn!(
                        company_id = %config.company_id,
                        error = %e,
                        "stored certificate passphrase did not decrypt; probing fallbacks"
                    );
                }
            },
            None => {}
        }
        candidates.push((PassphraseSource::Empty, String::new()));
        if let Some(fallback) = &self.fallback_passphrase {
            candidates.push((PassphraseSource::Fallback, fallback.expose_secret().clone()));
        }

        let mut last_error: Option<String> = None;
        for (source, passphrase) in candidates {
            match parse_container(&der, &passphrase) {
                Ok((private_key, certificate, chain)) => {
                    if source != PassphraseSource::Stored {
                        tracing::warn!(
                            company_id = %config.company_id,
                            candidate = ?source,
                            "certificate opened with a non-stored passphrase; re-encryption needed"
                        );
                    }
                    return Ok(CertificateBundle {
                        der,
                        passphrase: SecretString::new(passphrase),
                        passphrase_source: source,
                        private_key,
                        certificate,
                        chain,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(AppError::certificate(format!(
            "no passphrase candidate opened the certificate container: {}",
            last_error.unwrap_or_else(|| "container is empty or unparseable".to_string())
        )))
    }

    /// Parse and report certificate facts for diagnostics.
    pub async fn inspect(&self, config: &FiscalConfig) -> Result<CertificateHealth, AppError> {
        let bundle = self.load(config).await?;
        health_of(&bundle)
    }
}

/// Parse a PKCS12 container with one passphrase candidate and pick the
/// certificate whose public key matches the private key. Containers from
/// Brazilian CAs legitimately carry the full CA chain in the same bags, so
/// first-certificate-wins is not good enough.
fn parse_container(
    der: &[u8],
    passphrase: &str,
) -> Result<(PKey<Private>, X509, Vec<X509>), String> {
    let pkcs12 = Pkcs12::from_der(der).map_err(|e| format!("not a PKCS12 container: {}", e))?;
    let parsed = pkcs12
        .parse2(passphrase)
        .map_err(|e| format!("container did not open: {}", e))?;

    let private_key = parsed.pkey.ok_or("container holds no private key")?;

    let mut certs: Vec<X509> = Vec::new();
    if let Some(cert) = parsed.cert {
        certs.push(cert);
    }
    if let Some(ca) = parsed.ca {
        for cert in ca {
            certs.push(cert);
        }
    }
    if certs.is_empty() {
        return Err("container holds no certificate".to_string());
    }

    let matched = select_matching_certificate(&private_key, &certs)
        .ok_or("no certificate in the container matches the private key")?;
    let certificate = certs.remove(matched);

    Ok((private_key, certificate, certs))
}

/// Index of the certificate whose RSA public-key modulus equals the private
/// key's. Falls back to the first certificate for non-RSA material.
fn select_matching_certificate(key: &PKey<Private>, certs: &[X509]) -> Option<usize> {
    let key_rsa = match key.rsa() {
        Ok(rsa) => rsa,
        Err(_) => return if certs.is_empty() { None } else { Some(0) },
    };
    for (idx, cert) in certs.iter().enumerate() {
        let Ok(public) = cert.public_key() else {
            continue;
        };
        let Ok(cert_rsa) = public.rsa() else {
            continue;
        };
        if cert_rsa.n() == key_rsa.n() {
            return Some(idx);
        }
    }
    if certs.is_empty() { None } else { Some(0) }
}

fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let field = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{}={}", field, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Days from now until `when`; negative when `when` is in the past.
fn days_until(when: &Asn1TimeRef) -> Result<i32, AppError> {
    let now = Asn1Time::days_from_now(0)
        .map_err(|e| AppError::certificate(format!("clock error: {}", e)))?;
    let diff = now
        .diff(when)
        .map_err(|e| AppError::certificate(format!("certificate date unreadable: {}", e)))?;
    Ok(diff.days)
}

pub fn health_of(bundle: &CertificateBundle) -> Result<CertificateHealth, AppError> {
    let cert = &bundle.certificate;

    let days_to_not_after = days_until(cert.not_after())?;
    let days_to_not_before = days_until(cert.not_before())?;

    let validity = if days_to_not_after < 0 {
        ValidityStatus::Expired
    } else if days_to_not_before > 0 {
        ValidityStatus::NotYetValid
    } else if days_to_not_after < EXPIRY_WARN_DAYS {
        ValidityStatus::Warn
    } else {
        ValidityStatus::Ok
    };

    Ok(CertificateHealth {
        subject: name_to_string(cert.subject_name()),
        issuer: name_to_string(cert.issuer_name()),
        not_before: cert.not_before().to_string(),
        not_after: cert.not_after().to_string(),
        days_remaining: days_to_not_after,
        validity,
        passphrase_source: bundle.passphrase_source,
        checked_at: Utc::now(),
    })
}
