use crate::dtos::{EmitDocumentRequest, EmitFromOrderRequest};
use crate::middleware::TenantContext;
use crate::startup::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use service_core::error::AppError;
use validator::Validate;

/// EmitFromOrder: single order or sequential batch with per-order failure
/// isolation.
pub async fn emit_from_order(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<EmitFromOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    match (request.order_id, request.order_ids) {
        (Some(order_id), None) => {
            let result = state
                .emission
                .emit_from_order(&tenant.company_id, &order_id)
                .await?;
            Ok(Json(serde_json::json!({ "result": result })))
        }
        (None, Some(order_ids)) if !order_ids.is_empty() => {
            let entries = state
                .emission
                .emit_from_orders(&tenant.company_id, &order_ids)
                .await;
            Ok(Json(serde_json::json!({ "results": entries })))
        }
        _ => Err(AppError::BadRequest(anyhow::anyhow!(
            "provide exactly one of orderId or a non-empty orderIds"
        ))),
    }
}

/// EmitDocument: operator-driven emission from explicit fields.
pub async fn emit_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<EmitDocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let result = state
        .emission
        .emit_document(&tenant.company_id, request)
        .await?;
    Ok(Json(result))
}
