//! Shared fakes for exercising the fiscal flows without MongoDB, a real
//! certificate authority, or the network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fiscal_service::models::certificate::CertificateBundle;
use fiscal_service::models::{FiscalClassification, Order, OrderItem, ProtocolRecord};
use fiscal_service::services::ledger::ProtocolQuery;
use fiscal_service::services::transmission::{
    AuthorityReply, FiscalToolkit, StatusProbe, TransmitTarget,
};
use fiscal_service::services::{
    CatalogStore, CertificateManager, CertificateStore, DiagnosticsEngine, EmissionService,
    EventBus, OrderStore, ProtocolLedger, ProtocolStore, SecretCodec, SettingsResolver,
    SettingsStore, TransmissionGateway,
};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const COMPANY: &str = "company-1";

// ---------------------------------------------------------------- settings

#[derive(Default)]
pub struct InMemorySettingsStore {
    pub companies: Mutex<HashMap<String, Value>>,
    pub stores: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn company_settings(&self, company_id: &str) -> Result<Option<Value>, AppError> {
        Ok(self.companies.lock().await.get(company_id).cloned())
    }

    async fn store_settings(&self, store_id: &str) -> Result<Option<Value>, AppError> {
        Ok(self.stores.lock().await.get(store_id).cloned())
    }

    async fn merge_company_settings(&self, company_id: &str, patch: Value) -> Result<(), AppError> {
        let mut guard = self.companies.lock().await;
        let entry = guard
            .entry(company_id.to_string())
            .or_insert_with(|| json!({}));
        merge(entry, patch);
        Ok(())
    }

    async fn merge_store_settings(&self, store_id: &str, patch: Value) -> Result<(), AppError> {
        let mut guard = self.stores.lock().await;
        let entry = guard.entry(store_id.to_string()).or_insert_with(|| json!({}));
        merge(entry, patch);
        Ok(())
    }
}

fn merge(target: &mut Value, patch: Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (k, v) in patch {
            target.insert(k, v);
        }
    }
}

// ------------------------------------------------------------------ orders

#[derive(Default)]
pub struct InMemoryOrderStore {
    pub orders: Mutex<HashMap<String, Order>>,
    pub authorized: Mutex<Vec<(String, Value)>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn mark_invoice_authorized(
        &self,
        order_id: &str,
        info: &Value,
    ) -> Result<(), AppError> {
        if let Some(order) = self.orders.lock().await.get_mut(order_id) {
            order.status = "INVOICE_AUTHORIZED".to_string();
        }
        self.authorized
            .lock()
            .await
            .push((order_id.to_string(), info.clone()));
        Ok(())
    }

    async fn mark_invoice_cancelled(&self, order_id: &str, reason: &str) -> Result<(), AppError> {
        if let Some(order) = self.orders.lock().await.get_mut(order_id) {
            order.status = "INVOICE_CANCELLED".to_string();
        }
        self.cancelled
            .lock()
            .await
            .push((order_id.to_string(), reason.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCatalogStore {
    pub by_product: HashMap<String, FiscalClassification>,
    pub by_category: HashMap<String, FiscalClassification>,
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn product_classification(
        &self,
        _company_id: &str,
        product_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError> {
        Ok(self.by_product.get(product_id).cloned())
    }

    async fn category_classification(
        &self,
        _company_id: &str,
        category_id: &str,
    ) -> Result<Option<FiscalClassification>, AppError> {
        Ok(self.by_category.get(category_id).cloned())
    }
}

// ------------------------------------------------------------ certificates

#[derive(Default)]
pub struct InMemoryCertificateStore {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn exists(&self, filename: &str) -> bool {
        self.files.lock().await.contains_key(filename)
    }

    async fn load(&self, filename: &str) -> Result<Vec<u8>, AppError> {
        self.files
            .lock()
            .await
            .get(filename)
            .cloned()
            .ok_or_else(|| AppError::certificate(format!("certificate file {} missing", filename)))
    }
}

/// Self-signed key + certificate bundled into a PKCS12 container.
pub fn test_pkcs12(passphrase: &str) -> Vec<u8> {
    let (pkey, cert) = test_key_and_cert("RESTAURANTE TESTE LTDA", 365);
    let mut builder = Pkcs12::builder();
    builder.name("test");
    builder.pkey(&pkey);
    builder.cert(&cert);
    builder.build2(passphrase).unwrap().to_der().unwrap()
}

/// Container whose certificate validity window lies entirely in the past.
pub fn expired_pkcs12(passphrase: &str) -> Vec<u8> {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "EXPIRADO LTDA").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    let start = Utc::now().timestamp() - 400 * 86_400;
    let end = Utc::now().timestamp() - 30 * 86_400;
    builder
        .set_not_before(&Asn1Time::from_unix(start).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(end).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let mut p12 = Pkcs12::builder();
    p12.name("test");
    p12.pkey(&pkey);
    p12.cert(&cert);
    p12.build2(passphrase).unwrap().to_der().unwrap()
}

pub fn test_key_and_cert(cn: &str, valid_days: u32) -> (PKey<Private>, X509) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(valid_days).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    (pkey, builder.build())
}

// --------------------------------------------------------------- protocols

#[derive(Default)]
pub struct InMemoryProtocolStore {
    pub records: Mutex<Vec<ProtocolRecord>>,
}

#[async_trait]
impl ProtocolStore for InMemoryProtocolStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<ProtocolRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_by_protocol_number(
        &self,
        protocol_number: &str,
    ) -> Result<Option<ProtocolRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| r.protocol_number.as_deref() == Some(protocol_number))
            .cloned())
    }

    async fn find_authorized_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ProtocolRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|r| {
                r.order_id.as_deref() == Some(order_id)
                    && r.status_code.as_deref() == Some("100")
                    && r.cancelled_at.is_none()
            })
            .cloned())
    }

    async fn insert(&self, record: &ProtocolRecord) -> Result<(), AppError> {
        let mut guard = self.records.lock().await;
        // Mirrors the unique sparse index on protocolNumber.
        if let Some(number) = record.protocol_number.as_deref() {
            if guard
                .iter()
                .any(|r| r.protocol_number.as_deref() == Some(number))
            {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "duplicate protocol number {}",
                    number
                )));
            }
        }
        guard.push(record.clone());
        Ok(())
    }

    async fn mark_cancelled(&self, id: &str, reason: &str) -> Result<ProtocolRecord, AppError> {
        let mut guard = self.records.lock().await;
        let record = guard
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("protocol {} not found", id)))?;
        record.cancel_reason = Some(reason.to_string());
        record.cancelled_at = Some(bson::DateTime::now());
        Ok(record.clone())
    }

    async fn list(
        &self,
        company_id: &str,
        query: &ProtocolQuery,
    ) -> Result<(Vec<ProtocolRecord>, u64), AppError> {
        let guard = self.records.lock().await;
        let filtered: Vec<ProtocolRecord> = guard
            .iter()
            .filter(|r| r.company_id == company_id)
            .filter(|r| {
                query
                    .order_id
                    .as_deref()
                    .map(|o| r.order_id.as_deref() == Some(o))
                    .unwrap_or(true)
            })
            .filter(|r| query.status.map(|s| r.status() == s).unwrap_or(true))
            .cloned()
            .collect();
        let total = filtered.len() as u64;
        Ok((filtered, total))
    }
}

// ----------------------------------------------------------------- toolkit

pub struct FakeToolkitState {
    pub reply: AuthorityReply,
    pub probe: Result<StatusProbe, String>,
    pub transmitted: Vec<(String, TransmitTarget)>,
}

pub struct FakeToolkit {
    pub state: Mutex<FakeToolkitState>,
}

impl FakeToolkit {
    pub fn authorizing() -> Arc<Self> {
        Self::with_reply(AuthorityReply {
            status_code: Some("100".to_string()),
            status_reason: Some("Autorizado o uso da NF-e".to_string()),
            protocol_number: Some("135260000000001".to_string()),
            raw_response: "<protNFe><infProt><cStat>100</cStat></infProt></protNFe>".to_string(),
        })
    }

    pub fn rejecting(code: &str, reason: &str) -> Arc<Self> {
        Self::with_reply(AuthorityReply {
            status_code: Some(code.to_string()),
            status_reason: Some(reason.to_string()),
            protocol_number: None,
            raw_response: format!("<retEnviNFe><cStat>{}</cStat></retEnviNFe>", code),
        })
    }

    pub fn with_reply(reply: AuthorityReply) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeToolkitState {
                reply,
                probe: Ok(StatusProbe {
                    status_code: Some("107".to_string()),
                    reason: Some("Servico em Operacao".to_string()),
                    response_time_ms: 42,
                }),
                transmitted: Vec::new(),
            }),
        })
    }
}

#[async_trait]
impl FiscalToolkit for FakeToolkit {
    fn sign(&self, xml: &str, _bundle: &CertificateBundle) -> Result<String, AppError> {
        Ok(xml.replace("</NFe>", "<Signature>fake</Signature></NFe>"))
    }

    async fn transmit(
        &self,
        signed_xml: &str,
        target: &TransmitTarget,
        _bundle: &CertificateBundle,
    ) -> Result<AuthorityReply, AppError> {
        let mut state = self.state.lock().await;
        state
            .transmitted
            .push((signed_xml.to_string(), target.clone()));
        Ok(state.reply.clone())
    }

    async fn service_status(
        &self,
        target: &TransmitTarget,
        _bundle: &CertificateBundle,
    ) -> Result<StatusProbe, AppError> {
        let state = self.state.lock().await;
        state
            .probe
            .clone()
            .map_err(|detail| AppError::transmission(target.status_url.clone(), detail))
    }
}

// ----------------------------------------------------------------- harness

pub struct Harness {
    pub emission: Arc<EmissionService>,
    pub ledger: Arc<ProtocolLedger>,
    pub diagnostics: Arc<DiagnosticsEngine>,
    pub settings: Arc<InMemorySettingsStore>,
    pub orders: Arc<InMemoryOrderStore>,
    pub protocols: Arc<InMemoryProtocolStore>,
    pub certificates: Arc<InMemoryCertificateStore>,
    pub toolkit: Arc<FakeToolkit>,
    pub events: EventBus,
}

pub fn master_key() -> SecretString {
    SecretString::new("integration-test-master-key-0123456789".to_string())
}

pub fn codec() -> SecretCodec {
    SecretCodec::new(Some(&master_key())).unwrap()
}

/// Company settings document with a working certificate reference.
pub fn company_settings(cert_passphrase_token: Option<String>) -> Value {
    let mut doc = json!({
        "companyName": "RESTAURANTE BOM SABOR LTDA",
        "cnpj": "11.222.333/0001-81",
        "ie": "123456789",
        "nfeSerie": "1",
        "nfeEnvironment": "homologation",
        "csc": "CSC-SECRET",
        "cscId": "000001",
        "certFilename": "company-1.pfx",
        "address": {
            "street": "RUA DAS LARANJEIRAS",
            "number": "100",
            "neighborhood": "CENTRO",
            "cityCode": "3550308",
            "city": "SAO PAULO",
            "state": "SP",
            "zip": "01310-100"
        }
    });
    if let Some(token) = cert_passphrase_token {
        doc["certPasswordEnc"] = Value::String(token);
    }
    doc
}

pub fn order(id: &str) -> Order {
    Order {
        id: id.to_string(),
        company_id: COMPANY.to_string(),
        store_id: None,
        display_id: Some("123".to_string()),
        status: "CONCLUIDO".to_string(),
        customer_name: Some("Maria Silva".to_string()),
        customer_phone: None,
        items: vec![
            OrderItem {
                product_id: Some("prod-1".to_string()),
                category_id: None,
                name: "Pizza Margherita".to_string(),
                quantity: Decimal::from(1),
                unit_price: "45.90".parse().unwrap(),
                unit: None,
            },
            OrderItem {
                product_id: Some("prod-2".to_string()),
                category_id: Some("cat-drinks".to_string()),
                name: "Refrigerante Lata".to_string(),
                quantity: Decimal::from(2),
                unit_price: "6.50".parse().unwrap(),
                unit: None,
            },
        ],
        payload: Some(json!({ "payment": { "method": "pix" } })),
        created_at: Utc::now(),
    }
}

pub struct HarnessOptions {
    pub toolkit: Arc<FakeToolkit>,
    pub with_certificate_file: bool,
    pub cert_passphrase: String,
    pub store_passphrase_token: bool,
    pub fallback_passphrase: Option<String>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            toolkit: FakeToolkit::authorizing(),
            with_certificate_file: true,
            cert_passphrase: "pfx-pass".to_string(),
            store_passphrase_token: true,
            fallback_passphrase: None,
        }
    }
}

pub async fn harness(options: HarnessOptions) -> Harness {
    let codec = codec();
    let token = options
        .store_passphrase_token
        .then(|| codec.encrypt(&options.cert_passphrase).unwrap());

    let settings = Arc::new(InMemorySettingsStore::default());
    settings
        .companies
        .lock()
        .await
        .insert(COMPANY.to_string(), company_settings(token));

    let certificates_store = Arc::new(InMemoryCertificateStore::default());
    if options.with_certificate_file {
        certificates_store.files.lock().await.insert(
            "company-1.pfx".to_string(),
            test_pkcs12(&options.cert_passphrase),
        );
    }

    let orders = Arc::new(InMemoryOrderStore::default());
    let protocols = Arc::new(InMemoryProtocolStore::default());

    let mut catalog = InMemoryCatalogStore::default();
    catalog.by_product.insert(
        "prod-1".to_string(),
        FiscalClassification {
            ncm: Some("2106.90.90".to_string()),
            cfops: vec!["5.102".to_string()],
            ..Default::default()
        },
    );
    catalog.by_category.insert(
        "cat-drinks".to_string(),
        FiscalClassification {
            ncm: Some("2202.10.00".to_string()),
            ean: Some("7894900011517".to_string()),
            p_pis: "1.65".parse().unwrap(),
            p_cofins: "7.6".parse().unwrap(),
            ..Default::default()
        },
    );

    let resolver = Arc::new(SettingsResolver::new(settings.clone()));
    let manager = Arc::new(CertificateManager::new(
        certificates_store.clone(),
        codec,
        options.fallback_passphrase.map(SecretString::new),
    ));

    let events = EventBus::default();
    let ledger = Arc::new(ProtocolLedger::new(
        protocols.clone(),
        orders.clone(),
        events.clone(),
    ));

    let emission = Arc::new(EmissionService::new(
        orders.clone(),
        Arc::new(catalog),
        resolver.clone(),
        manager.clone(),
        TransmissionGateway::new(options.toolkit.clone()),
        ledger.clone(),
    ));

    let diagnostics = Arc::new(DiagnosticsEngine::new(
        resolver,
        manager,
        TransmissionGateway::new(options.toolkit.clone()),
    ));

    Harness {
        emission,
        ledger,
        diagnostics,
        settings,
        orders,
        protocols,
        certificates: certificates_store,
        toolkit: options.toolkit,
        events,
    }
}
