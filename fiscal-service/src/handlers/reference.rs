use crate::services::reference;
use axum::{Json, extract::Query, response::IntoResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CestQuery {
    pub ncm: Option<String>,
}

pub async fn list_ncm(Query(query): Query<ReferenceQuery>) -> impl IntoResponse {
    Json(reference::search_ncm(query.q.as_deref()))
}

pub async fn list_cfop(Query(query): Query<ReferenceQuery>) -> impl IntoResponse {
    Json(reference::search_cfop(query.q.as_deref()))
}

pub async fn list_cest(Query(query): Query<CestQuery>) -> impl IntoResponse {
    Json(reference::cest_for_ncm(query.ncm.as_deref().unwrap_or("")))
}
