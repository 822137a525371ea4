//! Resolved merchant fiscal configuration.
//!
//! Built fresh on every call by the configuration resolver; never cached and
//! never returned to callers with the encrypted passphrase attached.

use serde::{Deserialize, Serialize};

/// Which settings document supplied the certificate reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Store,
    Company,
}

/// Authority environment the merchant emits against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Homologation,
    Production,
}

impl Environment {
    /// Schema value for the tpAmb field: 1 = production, 2 = homologation.
    pub fn tp_amb(&self) -> &'static str {
        match self {
            Environment::Production => "1",
            Environment::Homologation => "2",
        }
    }

    pub fn parse(raw: &str) -> Environment {
        match raw.to_lowercase().as_str() {
            "production" | "producao" | "1" => Environment::Production,
            _ => Environment::Homologation,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerAddress {
    pub street: Option<String>,
    pub number: Option<String>,
    pub neighborhood: Option<String>,
    pub municipality_code: Option<String>,
    pub municipality_name: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

/// Merchant fiscal settings after the store-over-company cascade.
#[derive(Debug, Clone)]
pub struct FiscalConfig {
    pub company_id: String,
    pub store_id: Option<String>,
    pub company_name: Option<String>,
    pub cnpj: Option<String>,
    pub ie: Option<String>,
    pub serie: Option<String>,
    pub environment: Environment,
    pub csc: Option<String>,
    pub csc_id: Option<String>,
    pub address: IssuerAddress,
    pub cert_filename: Option<String>,
    /// Encrypted passphrase token; only the certificate manager reads this.
    pub cert_password_enc: Option<String>,
    pub cert_exists: bool,
    pub source: ConfigSource,
}

impl FiscalConfig {
    /// State registration, defaulting to the exempt marker the schema expects.
    pub fn ie_or_isento(&self) -> &str {
        self.ie.as_deref().filter(|v| !v.is_empty()).unwrap_or("ISENTO")
    }
}
