//! Certificate/connectivity self-diagnostic checklist.
//!
//! Runs the same resolution steps as emission, plus a live status-service
//! probe, without touching the protocol ledger or any persisted state. Each
//! step reports independently so operators can pinpoint the failing
//! precondition: rotated master key, expired certificate, wrong region,
//! network outage.

use crate::models::certificate::{CertificateHealth, ValidityStatus};
use crate::models::fiscal_config::{ConfigSource, FiscalConfig};
use crate::models::payload::DocumentModel;
use crate::services::certificates::{CertificateManager, PassphraseDecryption};
use crate::services::settings::SettingsResolver;
use crate::services::transmission::TransmissionGateway;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Info,
    Skip,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub id: &'static str,
    pub label: &'static str,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub summary: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_info: Option<CertificateHealth>,
    pub steps: Vec<DiagnosticStep>,
}

pub struct DiagnosticsEngine {
    resolver: Arc<SettingsResolver>,
    certificates: Arc<CertificateManager>,
    gateway: TransmissionGateway,
}

impl DiagnosticsEngine {
    pub fn new(
        resolver: Arc<SettingsResolver>,
        certificates: Arc<CertificateManager>,
        gateway: TransmissionGateway,
    ) -> Self {
        Self {
            resolver,
            certificates,
            gateway,
        }
    }

    pub async fn run(
        &self,
        company_id: &str,
        store_id: Option<&str>,
    ) -> Result<DiagnosticsReport, AppError> {
        let mut steps: Vec<DiagnosticStep> = Vec::with_capacity(8);
        let mut cert_info: Option<CertificateHealth> = None;

        // 1. Server decryption key.
        let has_key = self.certificates.codec().has_key();
        steps.push(step(
            "master-key",
            "Server decryption key present",
            if has_key { StepStatus::Ok } else { StepStatus::Fail },
            (!has_key).then(|| {
                "CERT_STORE_KEY is not configured; stored passphrases cannot be decrypted"
                    .to_string()
            }),
        ));

        // 2. Settings document, by search order.
        let company_doc = self.resolver.store().company_settings(company_id).await?;
        let store_doc = match store_id {
            Some(id) => self.resolver.store().store_settings(id).await?,
            None => None,
        };
        let settings_status = if store_doc.is_some() || company_doc.is_some() {
            StepStatus::Ok
        } else {
            StepStatus::Fail
        };
        steps.push(step(
            "settings",
            "Fiscal settings document located",
            settings_status,
            Some(match (&store_doc, &company_doc) {
                (Some(_), Some(_)) => "store settings overriding company settings".to_string(),
                (Some(_), None) => "store settings only".to_string(),
                (None, Some(_)) => "company settings".to_string(),
                (None, None) => "no settings document found for this merchant".to_string(),
            }),
        ));

        let config = self.resolver.resolve(company_id, store_id).await?;

        // 3. Required fiscal fields.
        steps.push(self.fiscal_fields_step(&config));

        // 4. Issuer address completeness.
        steps.push(address_step(&config));

        // 5. Certificate file.
        let cert_file_ok = match config.cert_filename.as_deref() {
            None => {
                steps.push(step(
                    "certificate-file",
                    "Certificate file exists",
                    StepStatus::Fail,
                    Some("no certificate filename configured".to_string()),
                ));
                false
            }
            Some(filename) => {
                let exists = self.certificates.store().exists(filename).await;
                steps.push(step(
                    "certificate-file",
                    "Certificate file exists",
                    if exists { StepStatus::Ok } else { StepStatus::Fail },
                    Some(match config.source {
                        ConfigSource::Store => format!("{} (store settings)", filename),
                        ConfigSource::Company => format!("{} (company settings)", filename),
                    }),
                ));
                exists
            }
        };

        // 6. Stored passphrase decryption.
        steps.push(self.passphrase_step(&config));

        // 7. PKCS12 parse, key/cert pairing, validity window.
        let bundle = if cert_file_ok {
            match self.certificates.load(&config).await {
                Ok(bundle) => {
                    let health = crate::services::certificates::health_of(&bundle)?;
                    let status = match health.validity {
                        ValidityStatus::Ok => StepStatus::Ok,
                        ValidityStatus::Warn => StepStatus::Warn,
                        ValidityStatus::Expired | ValidityStatus::NotYetValid => StepStatus::Fail,
                    };
                    steps.push(step(
                        "container",
                        "Certificate container parses and is valid",
                        status,
                        Some(format!(
                            "{}; expires {} ({} days)",
                            health.subject, health.not_after, health.days_remaining
                        )),
                    ));
                    cert_info = Some(health);
                    Some(bundle)
                }
                Err(e) => {
                    steps.push(step(
                        "container",
                        "Certificate container parses and is valid",
                        StepStatus::Fail,
                        Some(e.to_string()),
                    ));
                    None
                }
            }
        } else {
            steps.push(step(
                "container",
                "Certificate container parses and is valid",
                StepStatus::Skip,
                Some("no certificate file to parse".to_string()),
            ));
            None
        };

        // 8. Live authority status service. Requires a usable certificate
        // for the mutual-TLS handshake; skipped, never attempted, without
        // one.
        match bundle {
            Some(bundle) => {
                let target = self.gateway.target_for(&config, DocumentModel::Nfce);
                match self.gateway.probe_status(&target, &bundle).await {
                    Ok(probe) => {
                        let reachable = probe.status_code.is_some();
                        steps.push(step(
                            "authority-status",
                            "Authority status service reachable",
                            if reachable { StepStatus::Ok } else { StepStatus::Warn },
                            Some(format!(
                                "cStat={} {} ({} ms via {})",
                                probe.status_code.as_deref().unwrap_or("-"),
                                probe.reason.as_deref().unwrap_or(""),
                                probe.response_time_ms,
                                target.status_url,
                            )),
                        ));
                    }
                    Err(e) => {
                        steps.push(step(
                            "authority-status",
                            "Authority status service reachable",
                            StepStatus::Fail,
                            Some(e.to_string()),
                        ));
                    }
                }
            }
            None => {
                steps.push(step(
                    "authority-status",
                    "Authority status service reachable",
                    StepStatus::Skip,
                    Some("no usable certificate for the mutual-TLS probe".to_string()),
                ));
            }
        }

        let summary = steps
            .iter()
            .map(|s| s.status)
            .filter(|s| matches!(s, StepStatus::Ok | StepStatus::Warn | StepStatus::Fail))
            .max()
            .unwrap_or(StepStatus::Ok);

        Ok(DiagnosticsReport {
            summary,
            cert_info,
            steps,
        })
    }

    fn fiscal_fields_step(&self, config: &FiscalConfig) -> DiagnosticStep {
        let mut missing = Vec::new();
        if config.cnpj.as_deref().unwrap_or("").is_empty() {
            missing.push("cnpj");
        }
        if config.serie.is_none() {
            missing.push("nfeSerie");
        }
        if config.csc.is_none() || config.csc_id.is_none() {
            missing.push("csc/cscId");
        }

        if missing.contains(&"cnpj") {
            step(
                "fiscal-fields",
                "Required fiscal fields present",
                StepStatus::Fail,
                Some(format!("missing: {}", missing.join(", "))),
            )
        } else if missing.is_empty() {
            step(
                "fiscal-fields",
                "Required fiscal fields present",
                StepStatus::Ok,
                None,
            )
        } else {
            // Serie defaults to "1" and CSC only matters for consumer
            // invoices; absent values degrade, not block.
            step(
                "fiscal-fields",
                "Required fiscal fields present",
                StepStatus::Warn,
                Some(format!("missing optional: {}", missing.join(", "))),
            )
        }
    }

    fn passphrase_step(&self, config: &FiscalConfig) -> DiagnosticStep {
        match self
            .certificates
            .decrypt_stored(config.cert_password_enc.as_deref())
        {
            PassphraseDecryption::Decrypted => step(
                "passphrase",
                "Stored passphrase decrypts",
                StepStatus::Ok,
                None,
            ),
            PassphraseDecryption::NoStoredToken => step(
                "passphrase",
                "Stored passphrase decrypts",
                StepStatus::Info,
                Some("no passphrase stored; empty and fallback candidates will be probed".to_string()),
            ),
            PassphraseDecryption::Failed(detail) => step(
                "passphrase",
                "Stored passphrase decrypts",
                StepStatus::Warn,
                Some(format!(
                    "{}; if a fallback candidate opens the container, re-encrypt the passphrase",
                    detail
                )),
            ),
        }
    }
}

fn address_step(config: &FiscalConfig) -> DiagnosticStep {
    let a = &config.address;
    let mut missing = Vec::new();
    if a.street.is_none() {
        missing.push("street");
    }
    if a.municipality_code.is_none() {
        missing.push("municipality code");
    }
    if a.municipality_name.is_none() {
        missing.push("municipality name");
    }
    if a.state.is_none() {
        missing.push("state");
    }
    if a.postal_code.is_none() {
        missing.push("postal code");
    }

    if missing.is_empty() {
        step(
            "issuer-address",
            "Issuer address complete",
            StepStatus::Ok,
            None,
        )
    } else {
        step(
            "issuer-address",
            "Issuer address complete",
            StepStatus::Warn,
            Some(format!(
                "missing: {}; sanitized defaults will be emitted",
                missing.join(", ")
            )),
        )
    }
}

fn step(
    id: &'static str,
    label: &'static str,
    status: StepStatus,
    detail: Option<String>,
) -> DiagnosticStep {
    DiagnosticStep {
        id,
        label,
        status,
        detail,
    }
}
