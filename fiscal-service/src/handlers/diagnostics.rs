use crate::middleware::TenantContext;
use crate::startup::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use service_core::error::AppError;

/// RunDiagnostics: full step-by-step health report for the merchant's
/// fiscal setup, including the live authority probe. Read-only.
pub async fn run_diagnostics(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .diagnostics
        .run(&tenant.company_id, tenant.store_id.as_deref())
        .await?;
    Ok(Json(report))
}
