//! Read access to the ordering and catalog subsystems, plus the single
//! order-status write-back this subsystem performs.

use crate::models::{FiscalClassification, Order};
use crate::services::database::MongoDb;
use async_trait::async_trait;
use bson::doc;
use service_core::error::AppError;

/// Order status values written back by the fiscal flow.
pub const STATUS_INVOICE_AUTHORIZED: &str = "INVOICE_AUTHORIZED";
pub const STATUS_INVOICE_CANCELLED: &str = "INVOICE_CANCELLED";

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find(&self, order_id: &str) -> Result<Option<Order>, AppError>;

    /// Attach the authorization summary to the order payload and flip its
    /// status. Non-destructive on the rest of the payload blob.
    async fn mark_invoice_authorized(
        &self,
        order_id: &str,
        info: &serde_json::Value,
    ) -> Result<(), AppError>;

    async fn mark_invoice_cancelled(&self, order_id: &str, reason: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn product_classification(
        &self,
        company_id: &str,
        product_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError>;

    async fn category_classification(
        &self,
        company_id: &str,
        category_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError>;
}

pub struct MongoOrderStore {
    db: MongoDb,
}

impl MongoOrderStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderStore for MongoOrderStore {
    async fn find(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        self.db
            .orders()
            .find_one(doc! { "_id": order_id }, None)
            .await
            .map_err(AppError::from)
    }

    async fn mark_invoice_authorized(
        &self,
        order_id: &str,
        info: &serde_json::Value,
    ) -> Result<(), AppError> {
        let info_bson = bson::to_bson(info).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("unserializable authorization info: {}", e))
        })?;
        self.db
            .orders()
            .update_one(
                doc! { "_id": order_id },
                doc! { "$set": { "status": STATUS_INVOICE_AUTHORIZED, "payload.nfe": info_bson } },
                None,
            )
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn mark_invoice_cancelled(&self, order_id: &str, reason: &str) -> Result<(), AppError> {
        self.db
            .orders()
            .update_one(
                doc! { "_id": order_id },
                doc! { "$set": {
                    "status": STATUS_INVOICE_CANCELLED,
                    "payload.nfe.cancelReason": reason,
                } },
                None,
            )
            .await
            .map_err(AppError::from)?;
        Ok(())
    }
}

pub struct MongoCatalogStore {
    db: MongoDb,
}

impl MongoCatalogStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    async fn classification_by_link(
        &self,
        company_id: &str,
        linked: Option<bson::Document>,
    ) -> Result<Option<FiscalClassification>, AppError> {
        let Some(link_id) = linked
            .as_ref()
            .and_then(|d| d.get_str("dadosFiscaisId").ok())
        else {
            return Ok(None);
        };
        self.db
            .classifications()
            .find_one(doc! { "_id": link_id, "companyId": company_id }, None)
            .await
            .map_err(AppError::from)
    }
}

#[async_trait]
impl CatalogStore for MongoCatalogStore {
    async fn product_classification(
        &self,
        company_id: &str,
        product_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError> {
        let product = self
            .db
            .products()
            .find_one(doc! { "_id": product_id }, None)
            .await
            .map_err(AppError::from)?;
        self.classification_by_link(company_id, product).await
    }

    async fn category_classification(
        &self,
        company_id: &str,
        category_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError> {
        let category = self
            .db
            .menu_categories()
            .find_one(doc! { "_id": category_id }, None)
            .await
            .map_err(AppError::from)?;
        self.classification_by_link(company_id, category).await
    }
}
