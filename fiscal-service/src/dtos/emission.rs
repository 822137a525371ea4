use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Result of one emission attempt, mirrored into the persisted protocol
/// record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitResult {
    pub success: bool,
    pub status: String,
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub protocol_number: Option<String>,
    pub protocol_id: String,
    pub access_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_qr_url: Option<String>,
}

/// Single order id or a batch; exactly one must be provided.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitFromOrderRequest {
    pub order_id: Option<String>,
    pub order_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEmitEntry {
    pub order_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EmitResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmitDocumentItem {
    #[validate(length(min = 1))]
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub unit: Option<String>,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub ean: Option<String>,
    pub p_pis: Option<Decimal>,
    pub p_cofins: Option<Decimal>,
    pub p_ipi: Option<Decimal>,
}

/// Operator-driven emission from explicit fields instead of an order.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmitDocumentRequest {
    pub store_id: Option<String>,
    pub serie: Option<String>,
    pub number: Option<String>,
    pub nat_op: Option<String>,
    pub recipient_document: Option<String>,
    pub recipient_name: Option<String>,
    #[validate(length(min = 1), nested)]
    pub items: Vec<EmitDocumentItem>,
}
