use crate::dtos::{FiscalConfigView, RekeyRequest};
use crate::middleware::TenantContext;
use crate::startup::AppState;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use service_core::error::AppError;

/// ResolveFiscalConfig: effective configuration for an order's merchant,
/// secrets stripped.
pub async fn resolve_order_config(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (_, config) = state
        .emission
        .resolve_config_for_order(&tenant.company_id, &order_id)
        .await?;
    Ok(Json(FiscalConfigView::from(config)))
}

/// Re-encrypt the certificate passphrase under the current master key.
pub async fn rekey_passphrase(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<RekeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let store_id = request.store_id.or(tenant.store_id);
    let outcome = state
        .emission
        .rekey_passphrase(&tenant.company_id, store_id.as_deref())
        .await?;
    Ok(Json(outcome))
}
