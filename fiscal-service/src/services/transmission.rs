//! Authority endpoint resolution, outcome classification, and the signing/
//! transmission toolkit boundary.
//!
//! The toolkit itself (XML signature, SOAP envelope, mutual TLS) is an
//! opaque collaborator behind `FiscalToolkit`; this module owns what wraps
//! it: which regional endpoint a merchant transmits to, how the raw status
//! code/reason pair is classified, and how transport failures are enriched
//! for operator diagnosis.

use crate::models::certificate::CertificateBundle;
use crate::models::fiscal_config::{Environment, FiscalConfig};
use crate::models::payload::DocumentModel;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::{Arc, OnceLock};

/// Parsed authority response for one transmission.
#[derive(Debug, Clone)]
pub struct AuthorityReply {
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub protocol_number: Option<String>,
    pub raw_response: String,
}

/// Status-service probe result used by diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusProbe {
    pub status_code: Option<String>,
    pub reason: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    Authorized,
    Rejected,
    SchemaError,
    Error,
}

impl TransmissionStatus {
    /// Operator-facing label, kept in the authority's language.
    pub fn label(&self) -> &'static str {
        match self {
            TransmissionStatus::Authorized => "autorizado",
            TransmissionStatus::Rejected => "rejeitado",
            TransmissionStatus::SchemaError => "erro_schema",
            TransmissionStatus::Error => "erro",
        }
    }
}

/// Classify a raw status code + reason pair: 100 is authorized, a reason
/// mentioning schema/XML validation is a schema error, the 2xx band is an
/// authority rejection, anything else a generic error.
pub fn classify(status_code: Option<&str>, status_reason: Option<&str>) -> TransmissionStatus {
    if status_code == Some("100") {
        return TransmissionStatus::Authorized;
    }
    if let Some(reason) = status_reason {
        let lower = reason.to_lowercase();
        if lower.contains("schema") || lower.contains("xml") || lower.contains("valida") {
            return TransmissionStatus::SchemaError;
        }
    }
    match status_code.and_then(|c| c.parse::<u32>().ok()) {
        Some(code) if (200..300).contains(&code) => TransmissionStatus::Rejected,
        _ => TransmissionStatus::Error,
    }
}

/// Resolved destination for one transmission or status probe.
#[derive(Debug, Clone)]
pub struct TransmitTarget {
    pub authorize_url: String,
    pub status_url: String,
    pub model: DocumentModel,
    pub environment: Environment,
    pub uf_code: String,
    /// True when the endpoint serves the NFeAutorizacao4 contract even for
    /// model 65 (shared SVRS deployments do).
    pub uses_nfe_namespace: bool,
}

struct RegionalService {
    uf: &'static str,
    production: EnvironmentUrls,
    homologation: EnvironmentUrls,
}

struct EnvironmentUrls {
    nfe: &'static str,
    nfce: Option<&'static str>,
    status: &'static str,
}

/// States with their own authorization deployment. Everyone else transmits
/// through the shared SVRS deployment below.
static DEDICATED: [RegionalService; 2] = [
    RegionalService {
        uf: "SP",
        production: EnvironmentUrls {
            nfe: "https://nfe.fazenda.sp.gov.br/ws/nfeautorizacao4.asmx",
            nfce: Some("https://nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx"),
            status: "https://nfe.fazenda.sp.gov.br/ws/nfestatusservico4.asmx",
        },
        homologation: EnvironmentUrls {
            nfe: "https://homologacao.nfe.fazenda.sp.gov.br/ws/nfeautorizacao4.asmx",
            nfce: Some("https://homologacao.nfce.fazenda.sp.gov.br/ws/NFeAutorizacao4.asmx"),
            status: "https://homologacao.nfe.fazenda.sp.gov.br/ws/nfestatusservico4.asmx",
        },
    },
    RegionalService {
        uf: "MG",
        production: EnvironmentUrls {
            nfe: "https://nfe.fazenda.mg.gov.br/nfe2/services/NFeAutorizacao4",
            nfce: None,
            status: "https://nfe.fazenda.mg.gov.br/nfe2/services/NFeStatusServico4",
        },
        homologation: EnvironmentUrls {
            nfe: "https://hnfe.fazenda.mg.gov.br/nfe2/services/NFeAutorizacao4",
            nfce: None,
            status: "https://hnfe.fazenda.mg.gov.br/nfe2/services/NFeStatusServico4",
        },
    },
];

static SVRS: RegionalService = RegionalService {
    uf: "SVRS",
    production: EnvironmentUrls {
        nfe: "https://nfe.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx",
        nfce: Some("https://nfce.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx"),
        status: "https://nfe.svrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx",
    },
    homologation: EnvironmentUrls {
        nfe: "https://nfe-homologacao.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx",
        nfce: Some("https://nfce-homologacao.svrs.rs.gov.br/ws/NfeAutorizacao/NFeAutorizacao4.asmx"),
        status: "https://nfe-homologacao.svrs.rs.gov.br/ws/NfeStatusServico/NfeStatusServico4.asmx",
    },
};

/// Resolve the merchant's transmission target, falling back to the shared
/// regional deployment when the state has no dedicated one.
pub fn resolve_target(
    uf: &str,
    environment: Environment,
    model: DocumentModel,
) -> TransmitTarget {
    let upper = uf.trim().to_uppercase();
    let service = DEDICATED
        .iter()
        .find(|s| s.uf == upper)
        .unwrap_or(&SVRS);
    let urls = match environment {
        Environment::Production => &service.production,
        Environment::Homologation => &service.homologation,
    };
    let authorize_url = match model {
        DocumentModel::Nfe => urls.nfe,
        DocumentModel::Nfce => urls.nfce.unwrap_or(urls.nfe),
    };

    TransmitTarget {
        authorize_url: authorize_url.to_string(),
        status_url: urls.status.to_string(),
        model,
        environment,
        uf_code: crate::services::payload::uf_to_code(&upper),
        uses_nfe_namespace: model == DocumentModel::Nfe
            || authorize_url.to_lowercase().contains("nfeautorizacao"),
    }
}

/// NFC-e QR-code consultation base URLs; states without a known entry reuse
/// the first one, matching the original integration's behavior.
static QR_BASE_URLS: [(&str, &str, &str); 2] = [
    (
        "BA",
        "http://nfe.sefaz.ba.gov.br/servicos/nfce/modulos/geral/NFCEC_consulta_chave_acesso.aspx",
        "http://hnfe.sefaz.ba.gov.br/servicos/nfce/modulos/geral/NFCEC_consulta_chave_acesso.aspx",
    ),
    (
        "SP",
        "https://www.nfce.fazenda.sp.gov.br/qrcode",
        "https://www.homologacao.nfce.fazenda.sp.gov.br/qrcode",
    ),
];

pub fn qr_base_url(uf: &str, environment: Environment) -> &'static str {
    let upper = uf.trim().to_uppercase();
    let entry = QR_BASE_URLS
        .iter()
        .find(|(state, _, _)| *state == upper)
        .unwrap_or(&QR_BASE_URLS[0]);
    match environment {
        Environment::Production => entry.1,
        Environment::Homologation => entry.2,
    }
}

/// Opaque signing and transmission collaborator.
#[async_trait]
pub trait FiscalToolkit: Send + Sync {
    /// Produce the signed document XML.
    fn sign(&self, xml: &str, bundle: &CertificateBundle) -> Result<String, AppError>;

    /// Submit the signed document over mutually authenticated TLS.
    async fn transmit(
        &self,
        signed_xml: &str,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<AuthorityReply, AppError>;

    /// Call the authority status service (diagnostics only).
    async fn service_status(
        &self,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<StatusProbe, AppError>;
}

/// Thin orchestration over the toolkit: endpoint choice, error enrichment,
/// outcome classification.
pub struct TransmissionGateway {
    toolkit: Arc<dyn FiscalToolkit>,
}

impl TransmissionGateway {
    pub fn new(toolkit: Arc<dyn FiscalToolkit>) -> Self {
        Self { toolkit }
    }

    pub fn target_for(&self, config: &FiscalConfig, model: DocumentModel) -> TransmitTarget {
        let uf = config.address.state.as_deref().unwrap_or("SP");
        resolve_target(uf, config.environment, model)
    }

    pub fn sign(
        &self,
        xml: &str,
        bundle: &CertificateBundle,
    ) -> Result<String, AppError> {
        self.toolkit.sign(xml, bundle)
    }

    pub async fn transmit(
        &self,
        signed_xml: &str,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<(AuthorityReply, TransmissionStatus), AppError> {
        let reply = self
            .toolkit
            .transmit(signed_xml, target, bundle)
            .await
            .map_err(|e| enrich(e, &target.authorize_url))?;
        let status = classify(reply.status_code.as_deref(), reply.status_reason.as_deref());
        tracing::info!(
            endpoint = %target.authorize_url,
            status_code = reply.status_code.as_deref().unwrap_or("-"),
            status = status.label(),
            "authority transmission classified"
        );
        Ok((reply, status))
    }

    pub async fn probe_status(
        &self,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<StatusProbe, AppError> {
        self.toolkit
            .service_status(target, bundle)
            .await
            .map_err(|e| enrich(e, &target.status_url))
    }
}

/// Attach the endpoint URL to transport failures so operators can tell a
/// wrong-region configuration from an authority outage.
fn enrich(err: AppError, endpoint: &str) -> AppError {
    match err {
        AppError::TransmissionError { endpoint: e, detail } if !e.is_empty() => {
            AppError::TransmissionError { endpoint: e, detail }
        }
        AppError::TransmissionError { detail, .. } => AppError::transmission(endpoint, detail),
        other => AppError::transmission(endpoint, other.to_string()),
    }
}

/// Extract protocol fields from the authority SOAP response. Looks inside
/// the protNFe block first, then falls back to the batch-level receipt
/// fields when the document never reached protocol stage.
pub fn parse_authority_response(raw: &str) -> AuthorityReply {
    static PROT_BLOCK: OnceLock<Regex> = OnceLock::new();
    let prot_block =
        PROT_BLOCK.get_or_init(|| Regex::new(r"(?s)<protNFe.*?</protNFe>").expect("static regex"));

    let scope = prot_block
        .find(raw)
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let protocol_number = capture(scope, "nProt");
    let mut status_code = capture(scope, "cStat");
    let mut status_reason = capture(scope, "xMotivo");

    if status_code.is_none() {
        status_code = capture(raw, "cStat");
        status_reason = capture(raw, "xMotivo");
    }

    AuthorityReply {
        status_code,
        status_reason,
        protocol_number,
        raw_response: raw.to_string(),
    }
}

fn capture(haystack: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"<{0}>([^<]*)</{0}>", tag)).expect("tag regex");
    re.captures(haystack)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}
