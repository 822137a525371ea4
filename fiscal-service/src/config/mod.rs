use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::config::get_env;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct FiscalServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    #[serde(skip)]
    pub secrets: SecretsConfig,
    pub certificates: CertificateStorageConfig,
    pub authority: AuthorityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// Server-held secrets. Never serialized; populated from the environment only.
#[derive(Debug, Clone, Default)]
pub struct SecretsConfig {
    /// Master key for certificate passphrase encryption (CERT_STORE_KEY).
    /// Base64 or raw, must decode to at least 32 bytes.
    pub master_key: Option<SecretString>,
    /// Operator-supplied last-resort passphrase tried when the stored token
    /// no longer decrypts (CERT_FALLBACK_PASSWORD).
    pub fallback_passphrase: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateStorageConfig {
    /// Directory holding uploaded PKCS12 containers. Must never be served
    /// over HTTP.
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Timeout for document transmission calls, in seconds.
    pub transmit_timeout_secs: u64,
    /// Timeout for the diagnostics status-service probe, in seconds.
    pub status_timeout_secs: u64,
    /// Some authority endpoints present chains that fail strict verification;
    /// mirrors the original integration default.
    pub verify_tls: bool,
}

impl FiscalServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        Ok(FiscalServiceConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("fiscal_db"), is_prod)?,
            },
            secrets: SecretsConfig {
                master_key: env::var("CERT_STORE_KEY").ok().map(SecretString::new),
                fallback_passphrase: env::var("CERT_FALLBACK_PASSWORD")
                    .ok()
                    .map(SecretString::new),
            },
            certificates: CertificateStorageConfig {
                dir: get_env("CERT_STORE_DIR", Some("secure/certs"), is_prod)?,
            },
            authority: AuthorityConfig {
                transmit_timeout_secs: get_env("AUTHORITY_TRANSMIT_TIMEOUT_SECS", Some("60"), false)?
                    .parse()
                    .map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "AUTHORITY_TRANSMIT_TIMEOUT_SECS must be numeric: {}",
                            e
                        ))
                    })?,
                status_timeout_secs: get_env("AUTHORITY_STATUS_TIMEOUT_SECS", Some("15"), false)?
                    .parse()
                    .map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "AUTHORITY_STATUS_TIMEOUT_SECS must be numeric: {}",
                            e
                        ))
                    })?,
                verify_tls: get_env("AUTHORITY_VERIFY_TLS", Some("false"), false)? == "true",
            },
        })
    }
}
