//! Protocol ledger: the auditable record of every authority response.
//!
//! Records are append-only; cancellation transitions a record in place and
//! nothing is ever deleted. Saving is idempotent on the authority protocol
//! number, backed by a unique sparse index at the persistence layer.

use crate::models::{DerivedStatus, ProtocolRecord};
use crate::services::events::{EventBus, FiscalEvent};
use crate::services::orders::OrderStore;
use async_trait::async_trait;
use bson::doc;
use futures::stream::TryStreamExt;
use mongodb::Collection;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;

/// Minimum length the authority mandates for a cancellation justification.
const MIN_CANCEL_REASON_CHARS: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct SaveProtocolInput {
    pub company_id: String,
    pub order_id: Option<String>,
    pub protocol_number: Option<String>,
    pub status_code: Option<String>,
    pub status_reason: Option<String>,
    pub raw_response_xml: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolQuery {
    pub status: Option<DerivedStatus>,
    pub order_id: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[async_trait]
pub trait ProtocolStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ProtocolRecord>, AppError>;
    async fn find_by_protocol_number(
        &self,
        protocol_number: &str,
    ) -> Result<Option<ProtocolRecord>, AppError>;
    /// Authorized, not-cancelled record for an order, if any.
    async fn find_authorized_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ProtocolRecord>, AppError>;
    async fn insert(&self, record: &ProtocolRecord) -> Result<(), AppError>;
    async fn mark_cancelled(&self, id: &str, reason: &str) -> Result<ProtocolRecord, AppError>;
    async fn list(
        &self,
        company_id: &str,
        query: &ProtocolQuery,
    ) -> Result<(Vec<ProtocolRecord>, u64), AppError>;
}

pub struct MongoProtocolStore {
    collection: Collection<ProtocolRecord>,
}

impl MongoProtocolStore {
    pub fn new(collection: Collection<ProtocolRecord>) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl ProtocolStore for MongoProtocolStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ProtocolRecord>, AppError> {
        self.collection
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(AppError::from)
    }

    async fn find_by_protocol_number(
        &self,
        protocol_number: &str,
    ) -> Result<Option<ProtocolRecord>, AppError> {
        self.collection
            .find_one(doc! { "protocolNumber": protocol_number }, None)
            .await
            .map_err(AppError::from)
    }

    async fn find_authorized_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ProtocolRecord>, AppError> {
        self.collection
            .find_one(
                doc! { "orderId": order_id, "statusCode": "100", "cancelledAt": null },
                None,
            )
            .await
            .map_err(AppError::from)
    }

    async fn insert(&self, record: &ProtocolRecord) -> Result<(), AppError> {
        self.collection
            .insert_one(record, None)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: &str, reason: &str) -> Result<ProtocolRecord, AppError> {
        self.collection
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": {
                    "cancelReason": reason,
                    "cancelledAt": bson::DateTime::now(),
                } },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("protocol record {} not found", id)))
    }

    async fn list(
        &self,
        company_id: &str,
        query: &ProtocolQuery,
    ) -> Result<(Vec<ProtocolRecord>, u64), AppError> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(20).clamp(1, 100);

        let mut filter = doc! { "companyId": company_id };
        if let Some(order_id) = &query.order_id {
            filter.insert("orderId", order_id);
        }
        if let Some(status) = query.status {
            match status {
                DerivedStatus::Authorized => {
                    filter.insert("statusCode", "100");
                    filter.insert("cancelledAt", bson::Bson::Null);
                }
                DerivedStatus::Cancelled => {
                    filter.insert("cancelledAt", doc! { "$ne": null });
                }
                DerivedStatus::Pending => {
                    filter.insert("statusCode", bson::Bson::Null);
                }
                DerivedStatus::Rejected => {
                    filter.insert("statusCode", doc! { "$regex": "^2" });
                    filter.insert("cancelledAt", bson::Bson::Null);
                }
                DerivedStatus::Error => {
                    filter.insert(
                        "statusCode",
                        doc! { "$nin": [bson::Bson::Null, "100"], "$not": { "$regex": "^2" } },
                    );
                }
            }
        }

        let total = self
            .collection
            .count_documents(filter.clone(), None)
            .await
            .map_err(AppError::from)?;

        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .skip((page - 1) * page_size)
            .limit(page_size as i64)
            .build();

        let mut cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(AppError::from)?;
        let mut records = Vec::new();
        while let Some(record) = cursor.try_next().await.map_err(AppError::from)? {
            records.push(record);
        }

        Ok((records, total))
    }
}

pub struct ProtocolLedger {
    protocols: Arc<dyn ProtocolStore>,
    orders: Arc<dyn OrderStore>,
    events: EventBus,
}

impl ProtocolLedger {
    pub fn new(protocols: Arc<dyn ProtocolStore>, orders: Arc<dyn OrderStore>, events: EventBus) -> Self {
        Self {
            protocols,
            orders,
            events,
        }
    }

    /// Persist one transmission outcome. Re-submission with an already
    /// recorded protocol number returns the existing record unchanged.
    pub async fn save_protocol(
        &self,
        input: SaveProtocolInput,
    ) -> Result<ProtocolRecord, AppError> {
        if input.company_id.is_empty() {
            return Err(AppError::validation("companyId is required"));
        }

        if let Some(number) = input.protocol_number.as_deref() {
            if let Some(existing) = self.protocols.find_by_protocol_number(number).await? {
                tracing::debug!(protocol_number = %number, "returning existing protocol record");
                return Ok(existing);
            }
        }

        let record = ProtocolRecord::new(
            input.company_id,
            input.order_id,
            input.protocol_number,
            input.status_code,
            input.status_reason,
            input.raw_response_xml,
        );
        self.protocols.insert(&record).await?;
        metrics::counter!("fiscal_protocols_total", "status" => status_label(&record))
            .increment(1);

        if record.is_authorized() {
            if let Some(order_id) = record.order_id.clone() {
                self.propagate_authorization(&order_id, &record).await;
            }
        }

        Ok(record)
    }

    /// Attach the authorization to the order and notify the storefront.
    /// Failures here are logged, never allowed to mask the saved protocol.
    async fn propagate_authorization(&self, order_id: &str, record: &ProtocolRecord) {
        let info = serde_json::json!({
            "protocolNumber": record.protocol_number,
            "statusCode": record.status_code,
            "statusReason": record.status_reason,
            "authorizedAt": record.created_at.to_rfc3339(),
        });
        if let Err(e) = self.orders.mark_invoice_authorized(order_id, &info).await {
            tracing::warn!(order_id = %order_id, error = %e, "failed to update order after authorization");
            return;
        }

        let display_id = match self.orders.find(order_id).await {
            Ok(Some(order)) => order.display_id,
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "failed to reload order for event");
                None
            }
        };

        self.events.emit(FiscalEvent::InvoiceAuthorized {
            order_id: order_id.to_string(),
            display_id,
            protocol_number: record.protocol_number.clone(),
            status_code: record.status_code.clone(),
            status_reason: record.status_reason.clone(),
        });
    }

    pub async fn authorized_record_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ProtocolRecord>, AppError> {
        self.protocols.find_authorized_for_order(order_id).await
    }

    /// Local cancellation: the record transitions in place and the linked
    /// order is updated. No cancellation event is submitted to the
    /// authority; see DESIGN.md.
    pub async fn cancel_document(
        &self,
        company_id: &str,
        protocol_id: &str,
        reason: &str,
    ) -> Result<ProtocolRecord, AppError> {
        let reason = reason.trim();
        if reason.chars().count() < MIN_CANCEL_REASON_CHARS {
            return Err(AppError::validation(format!(
                "cancellation reason must have at least {} characters",
                MIN_CANCEL_REASON_CHARS
            )));
        }

        let record = self
            .protocols
            .find_by_id(protocol_id)
            .await?
            .filter(|r| r.company_id == company_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("protocol record {} not found", protocol_id))
            })?;

        if record.status() == DerivedStatus::Cancelled {
            return Ok(record);
        }

        let updated = self.protocols.mark_cancelled(protocol_id, reason).await?;
        metrics::counter!("fiscal_cancellations_total").increment(1);

        if let Some(order_id) = updated.order_id.as_deref() {
            if let Err(e) = self.orders.mark_invoice_cancelled(order_id, reason).await {
                tracing::warn!(order_id = %order_id, error = %e, "failed to update order after cancellation");
            }
        }

        Ok(updated)
    }

    pub async fn list_issued(
        &self,
        company_id: &str,
        query: &ProtocolQuery,
    ) -> Result<(Vec<ProtocolRecord>, u64), AppError> {
        self.protocols.list(company_id, query).await
    }

    /// Raw authority response for audit download.
    pub async fn download_raw_xml(
        &self,
        company_id: &str,
        protocol_id: &str,
    ) -> Result<String, AppError> {
        let record = self
            .protocols
            .find_by_id(protocol_id)
            .await?
            .filter(|r| r.company_id == company_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("protocol record {} not found", protocol_id))
            })?;
        record.raw_response_xml.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "protocol record {} has no stored authority response",
                protocol_id
            ))
        })
    }
}

fn status_label(record: &ProtocolRecord) -> &'static str {
    match record.status() {
        DerivedStatus::Pending => "pending",
        DerivedStatus::Authorized => "authorized",
        DerivedStatus::Rejected => "rejected",
        DerivedStatus::Error => "error",
        DerivedStatus::Cancelled => "cancelled",
    }
}
