//! Emission orchestration: EmitFromOrder / EmitDocument end to end.
//!
//! Every call re-resolves configuration and re-opens the certificate;
//! nothing fiscal is cached across requests. Batch emission walks orders
//! sequentially and isolates failures per order.

use crate::dtos::{BatchEmitEntry, EmitDocumentRequest, EmitResult, RekeyOutcome};
use crate::models::fiscal_config::FiscalConfig;
use crate::models::payload::DocumentModel;
use crate::models::{FiscalClassification, Order, OrderItem, PassphraseSource, ValidityStatus};
use crate::services::certificates::{self, CertificateManager};
use crate::services::ledger::{ProtocolLedger, SaveProtocolInput};
use crate::services::orders::{CatalogStore, OrderStore};
use crate::services::payload::{self, BuildOptions};
use crate::services::settings::SettingsResolver;
use crate::services::transmission::{self, TransmissionGateway, TransmissionStatus};
use service_core::error::AppError;
use std::sync::Arc;

pub struct EmissionService {
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogStore>,
    resolver: Arc<SettingsResolver>,
    certificates: Arc<CertificateManager>,
    gateway: TransmissionGateway,
    ledger: Arc<ProtocolLedger>,
}

impl EmissionService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogStore>,
        resolver: Arc<SettingsResolver>,
        certificates: Arc<CertificateManager>,
        gateway: TransmissionGateway,
        ledger: Arc<ProtocolLedger>,
    ) -> Self {
        Self {
            orders,
            catalog,
            resolver,
            certificates,
            gateway,
            ledger,
        }
    }

    /// Load the order and resolve its effective fiscal configuration.
    /// The only hard failure here is a non-existent order.
    pub async fn resolve_config_for_order(
        &self,
        company_id: &str,
        order_id: &str,
    ) -> Result<(Order, FiscalConfig), AppError> {
        let order = self
            .orders
            .find(order_id)
            .await?
            .filter(|o| o.company_id == company_id)
            .ok_or_else(|| {
                AppError::configuration(format!("order {} does not exist", order_id))
            })?;
        let config = self
            .resolver
            .resolve(&order.company_id, order.store_id.as_deref())
            .await?;
        Ok((order, config))
    }

    pub async fn emit_from_order(
        &self,
        company_id: &str,
        order_id: &str,
    ) -> Result<EmitResult, AppError> {
        let (order, config) = self.resolve_config_for_order(company_id, order_id).await?;

        if let Some(existing) = self.ledger.authorized_record_for_order(&order.id).await? {
            return Err(AppError::validation(format!(
                "order {} already has an authorized fiscal document (protocol {})",
                order.id,
                existing.protocol_number.as_deref().unwrap_or("-")
            )));
        }

        let classifications = self.classifications_for(&order).await?;
        self.emit_internal(&order, &config, &classifications, &BuildOptions::default())
            .await
    }

    /// Batch emission: sequential, one order's failure never aborts the
    /// remaining items.
    pub async fn emit_from_orders(
        &self,
        company_id: &str,
        order_ids: &[String],
    ) -> Vec<BatchEmitEntry> {
        let mut entries = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            match self.emit_from_order(company_id, order_id).await {
                Ok(result) => entries.push(BatchEmitEntry {
                    order_id: order_id.clone(),
                    success: result.success,
                    result: Some(result),
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "batch emission item failed");
                    entries.push(BatchEmitEntry {
                        order_id: order_id.clone(),
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        entries
    }

    /// Operator-driven emission from explicit fields. The synthetic order is
    /// never persisted; only the protocol record is.
    pub async fn emit_document(
        &self,
        company_id: &str,
        request: EmitDocumentRequest,
    ) -> Result<EmitResult, AppError> {
        let config = self
            .resolver
            .resolve(company_id, request.store_id.as_deref())
            .await?;

        let items: Vec<OrderItem> = request
            .items
            .iter()
            .map(|item| OrderItem {
                product_id: None,
                category_id: None,
                name: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                unit: item.unit.clone(),
            })
            .collect();
        let classifications: Vec<Option<FiscalClassification>> = request
            .items
            .iter()
            .map(|item| {
                Some(FiscalClassification {
                    ncm: item.ncm.clone(),
                    ean: item.ean.clone(),
                    cfops: item.cfop.clone().into_iter().collect(),
                    p_pis: item.p_pis.unwrap_or_default(),
                    p_cofins: item.p_cofins.unwrap_or_default(),
                    p_ipi: item.p_ipi.unwrap_or_default(),
                    ..Default::default()
                })
            })
            .collect();

        let order = Order {
            id: format!("manual-{}", uuid::Uuid::new_v4()),
            company_id: company_id.to_string(),
            store_id: request.store_id.clone(),
            display_id: request.number.clone(),
            status: "MANUAL".to_string(),
            customer_name: request.recipient_name.clone(),
            customer_phone: None,
            items,
            payload: None,
            created_at: chrono::Utc::now(),
        };

        let opts = BuildOptions {
            model: None,
            serie: request.serie,
            number: request.number,
            nat_op: request.nat_op,
            recipient_document: request.recipient_document,
            recipient_name: request.recipient_name,
        };

        self.emit_without_order(&order, &config, &classifications, &opts)
            .await
    }

    /// Per-item classification lookup with product → category fallback.
    async fn classifications_for(
        &self,
        order: &Order,
    ) -> Result<Vec<Option<FiscalClassification>>, AppError> {
        let mut out = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let mut classification = None;
            if let Some(product_id) = item.product_id.as_deref() {
                classification = self
                    .catalog
                    .product_classification(&order.company_id, product_id)
                    .await?;
            }
            if classification.is_none() {
                if let Some(category_id) = item.category_id.as_deref() {
                    classification = self
                        .catalog
                        .category_classification(&order.company_id, category_id)
                        .await?;
                }
            }
            out.push(classification);
        }
        Ok(out)
    }

    async fn emit_internal(
        &self,
        order: &Order,
        config: &FiscalConfig,
        classifications: &[Option<FiscalClassification>],
        opts: &BuildOptions,
    ) -> Result<EmitResult, AppError> {
        self.transmit_and_record(order, config, classifications, opts, Some(order.id.clone()))
            .await
    }

    async fn emit_without_order(
        &self,
        order: &Order,
        config: &FiscalConfig,
        classifications: &[Option<FiscalClassification>],
        opts: &BuildOptions,
    ) -> Result<EmitResult, AppError> {
        self.transmit_and_record(order, config, classifications, opts, None)
            .await
    }

    async fn transmit_and_record(
        &self,
        order: &Order,
        config: &FiscalConfig,
        classifications: &[Option<FiscalClassification>],
        opts: &BuildOptions,
        record_order_id: Option<String>,
    ) -> Result<EmitResult, AppError> {
        if !config.cert_exists {
            return Err(AppError::configuration(
                "no digital certificate configured for this merchant",
            ));
        }

        let payload = payload::build_payload(order, config, classifications, opts)?;
        let bundle = self.certificates.load(config).await?;

        let health = certificates::health_of(&bundle)?;
        if matches!(
            health.validity,
            ValidityStatus::Expired | ValidityStatus::NotYetValid
        ) {
            return Err(AppError::certificate(format!(
                "certificate cannot sign documents: {:?} (valid {} to {})",
                health.validity, health.not_before, health.not_after
            )));
        }

        let xml = payload.to_xml();
        let signed = self.gateway.sign(&xml, &bundle)?;

        let target = self.gateway.target_for(config, payload.header.model);
        let (reply, status) = self.gateway.transmit(&signed, &target, &bundle).await?;

        metrics::counter!("fiscal_emissions_total", "status" => status.label()).increment(1);

        let record = self
            .ledger
            .save_protocol(SaveProtocolInput {
                company_id: config.company_id.clone(),
                order_id: record_order_id,
                protocol_number: reply.protocol_number.clone(),
                status_code: reply.status_code.clone(),
                status_reason: reply.status_reason.clone(),
                raw_response_xml: Some(reply.raw_response.clone()),
            })
            .await?;

        let consumer_qr_url = match (payload.header.model, &config.csc, &config.csc_id) {
            (DocumentModel::Nfce, Some(csc), Some(csc_id)) => {
                let uf = config.address.state.as_deref().unwrap_or("SP");
                Some(payload::nfce_qr_code_url(
                    transmission::qr_base_url(uf, config.environment),
                    &payload.header.access_key,
                    &payload.header.tp_amb,
                    csc_id,
                    csc,
                ))
            }
            _ => None,
        };

        Ok(EmitResult {
            success: status == TransmissionStatus::Authorized,
            status: status.label().to_string(),
            status_code: reply.status_code,
            status_reason: reply.status_reason,
            protocol_number: reply.protocol_number,
            protocol_id: record.id,
            access_key: payload.header.access_key.clone(),
            consumer_qr_url,
        })
    }

    /// Re-encrypt the certificate passphrase under the current master key.
    /// The certificate container itself arbitrates which candidate is the
    /// real passphrase before anything is written back.
    pub async fn rekey_passphrase(
        &self,
        company_id: &str,
        store_id: Option<&str>,
    ) -> Result<RekeyOutcome, AppError> {
        let config = self.resolver.resolve(company_id, store_id).await?;
        if !config.cert_exists {
            return Err(AppError::configuration(
                "no digital certificate configured for this merchant",
            ));
        }

        let bundle = self.certificates.load(&config).await?;
        if bundle.passphrase_source == PassphraseSource::Stored {
            return Ok(RekeyOutcome {
                updated: false,
                detail: "stored passphrase already decrypts under the current key".to_string(),
            });
        }

        let token = self
            .certificates
            .codec()
            .encrypt(secrecy::ExposeSecret::expose_secret(&bundle.passphrase))
            .map_err(|e| AppError::configuration(format!("re-encryption failed: {}", e)))?;
        self.resolver.save_passphrase_token(&config, &token).await?;

        tracing::info!(
            company_id = %company_id,
            store_id = store_id.unwrap_or("-"),
            candidate = ?bundle.passphrase_source,
            "certificate passphrase re-encrypted under current master key"
        );

        Ok(RekeyOutcome {
            updated: true,
            detail: format!(
                "passphrase recovered via {:?} candidate and re-encrypted",
                bundle.passphrase_source
            ),
        })
    }
}
