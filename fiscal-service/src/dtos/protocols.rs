use crate::models::{DerivedStatus, ProtocolRecord};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Persist an authority response received out-of-band (e.g. from the legacy
/// transmission worker).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProtocolRequest {
    pub order_id: Option<String>,
    pub protocol_number: Option<String>,
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub raw_response_xml: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CancelDocumentRequest {
    #[validate(length(min = 1))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolResponse {
    pub id: String,
    pub company_id: String,
    pub order_id: Option<String>,
    pub protocol_number: Option<String>,
    pub status: DerivedStatus,
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<String>,
    pub created_at: String,
    pub has_raw_xml: bool,
}

impl From<ProtocolRecord> for ProtocolResponse {
    fn from(record: ProtocolRecord) -> Self {
        Self {
            status: record.status(),
            id: record.id,
            company_id: record.company_id,
            order_id: record.order_id,
            protocol_number: record.protocol_number,
            status_code: record.status_code,
            status_reason: record.status_reason,
            cancel_reason: record.cancel_reason,
            cancelled_at: record
                .cancelled_at
                .map(|at| at.to_chrono().to_rfc3339()),
            created_at: record.created_at.to_rfc3339(),
            has_raw_xml: record.raw_response_xml.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolListResponse {
    pub records: Vec<ProtocolResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}
