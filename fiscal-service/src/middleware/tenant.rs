//! Tenant context middleware for multi-tenancy support.
//!
//! Extracts merchant scope (company_id, optional store_id, user_id) from
//! request headers. These headers are set by the API gateway after
//! authenticating the user and validating their company membership; every
//! fiscal operation is scoped by them.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Merchant scope extracted from request headers.
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// Company (tenant) the request operates on.
    pub company_id: String,
    /// Store within the company, when the caller is store-scoped.
    pub store_id: Option<String>,
    /// User performing the request.
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let company_id = parts
            .headers
            .get("X-Company-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing X-Company-ID header (required from gateway)"
                ))
            })?;

        let store_id = parts
            .headers
            .get("X-Store-ID")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());

        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing X-User-ID header (required from gateway)"
                ))
            })?;

        let span = tracing::Span::current();
        span.record("company_id", company_id);
        span.record("user_id", user_id);

        Ok(TenantContext {
            company_id: company_id.to_string(),
            store_id,
            user_id: user_id.to_string(),
        })
    }
}
