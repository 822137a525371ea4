use crate::dtos::{
    CancelDocumentRequest, ProtocolListResponse, ProtocolResponse, SaveProtocolRequest,
};
use crate::middleware::TenantContext;
use crate::services::ledger::{ProtocolQuery, SaveProtocolInput};
use crate::startup::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use service_core::error::AppError;
use validator::Validate;

pub async fn save_protocol(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<SaveProtocolRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .ledger
        .save_protocol(SaveProtocolInput {
            company_id: tenant.company_id,
            order_id: request.order_id,
            protocol_number: request.protocol_number,
            status_code: request.status_code,
            status_reason: request.status_reason,
            raw_response_xml: request.raw_response_xml,
        })
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "record": ProtocolResponse::from(record),
    })))
}

pub async fn list_protocols(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ProtocolQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);

    let (records, total) = state.ledger.list_issued(&tenant.company_id, &query).await?;
    let total_pages = total.div_ceil(page_size);

    Ok(Json(ProtocolListResponse {
        records: records.into_iter().map(ProtocolResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages,
    }))
}

/// Raw authority response XML for audit download.
pub async fn download_raw_xml(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(protocol_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let xml = state
        .ledger
        .download_raw_xml(&tenant.company_id, &protocol_id)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    ))
}

pub async fn cancel_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(protocol_id): Path<String>,
    Json(request): Json<CancelDocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let record = state
        .ledger
        .cancel_document(&tenant.company_id, &protocol_id, &request.reason)
        .await?;
    Ok(Json(ProtocolResponse::from(record)))
}
