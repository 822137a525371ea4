use crate::models::{ConfigSource, Environment, FiscalConfig, IssuerAddress};
use serde::{Deserialize, Serialize};

/// Redacted view of a resolved configuration. The encrypted passphrase and
/// certificate bytes never leave the privileged path; callers only learn
/// whether a passphrase is stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiscalConfigView {
    pub company_id: String,
    pub store_id: Option<String>,
    pub cnpj: Option<String>,
    pub ie: Option<String>,
    pub serie: Option<String>,
    pub environment: Environment,
    pub csc_configured: bool,
    pub csc_id: Option<String>,
    pub address: IssuerAddress,
    pub cert_exists: bool,
    pub cert_filename: Option<String>,
    pub cert_password_stored: bool,
    pub source: ConfigSource,
}

impl From<FiscalConfig> for FiscalConfigView {
    fn from(config: FiscalConfig) -> Self {
        Self {
            cert_password_stored: config.cert_password_enc.is_some(),
            csc_configured: config.csc.is_some(),
            company_id: config.company_id,
            store_id: config.store_id,
            cnpj: config.cnpj,
            ie: config.ie,
            serie: config.serie,
            environment: config.environment,
            csc_id: config.csc_id,
            address: config.address,
            cert_exists: config.cert_exists,
            cert_filename: config.cert_filename,
            source: config.source,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RekeyRequest {
    pub store_id: Option<String>,
}

/// Outcome of the passphrase re-encryption migration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RekeyOutcome {
    /// False when the stored token already decrypts under the current key.
    pub updated: bool,
    pub detail: String,
}
