//! Persisted authority transmission outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status derived from the stored authority response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    Pending,
    Authorized,
    Rejected,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub order_id: Option<String>,
    pub protocol_number: Option<String>,
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub raw_response_xml: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<bson::DateTime>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ProtocolRecord {
    pub fn new(
        company_id: String,
        order_id: Option<String>,
        protocol_number: Option<String>,
        status_code: Option<String>,
        status_reason: Option<String>,
        raw_response_xml: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id,
            order_id,
            protocol_number,
            status_code,
            status_reason,
            raw_response_xml,
            cancel_reason: None,
            cancelled_at: None,
            created_at: Utc::now(),
        }
    }

    /// Status code 100 means authorized; the 2xx band is an authority
    /// rejection. Cancellation overrides everything once applied.
    pub fn status(&self) -> DerivedStatus {
        if self.cancelled_at.is_some() {
            return DerivedStatus::Cancelled;
        }
        match self.status_code.as_deref().and_then(|c| c.parse::<u32>().ok()) {
            Some(100) => DerivedStatus::Authorized,
            Some(code) if (200..300).contains(&code) => DerivedStatus::Rejected,
            Some(_) => DerivedStatus::Error,
            None => DerivedStatus::Pending,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.status() == DerivedStatus::Authorized
    }
}
