//! Settings document store and the store-over-company cascade.
//!
//! Fiscal settings live as one keyed JSON document per company, optionally
//! overridden by one per store. The resolver merges them field by field on
//! every call; nothing is cached between requests.

use crate::models::{ConfigSource, Environment, FiscalConfig, IssuerAddress};
use async_trait::async_trait;
use bson::{Bson, doc};
use mongodb::Collection;
use serde_json::Value;
use service_core::error::AppError;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn company_settings(&self, company_id: &str) -> Result<Option<Value>, AppError>;
    async fn store_settings(&self, store_id: &str) -> Result<Option<Value>, AppError>;
    /// Merge the given top-level fields into the company document (upsert).
    async fn merge_company_settings(&self, company_id: &str, patch: Value) -> Result<(), AppError>;
    /// Merge the given top-level fields into the store document (upsert).
    async fn merge_store_settings(&self, store_id: &str, patch: Value) -> Result<(), AppError>;
}

/// MongoDB-backed settings documents, keyed `company:<id>` / `store:<id>`.
pub struct MongoSettingsStore {
    collection: Collection<bson::Document>,
}

impl MongoSettingsStore {
    pub fn new(collection: Collection<bson::Document>) -> Self {
        Self { collection }
    }

    async fn read(&self, key: String) -> Result<Option<Value>, AppError> {
        let found = self
            .collection
            .find_one(doc! { "_id": &key }, None)
            .await
            .map_err(AppError::from)?;
        Ok(found.map(|mut d| {
            d.remove("_id");
            Bson::Document(d).into_relaxed_extjson()
        }))
    }

    async fn merge(&self, key: String, patch: Value) -> Result<(), AppError> {
        let Value::Object(fields) = patch else {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "settings patch must be a JSON object"
            )));
        };
        let mut set = bson::Document::new();
        for (k, v) in fields {
            let value = bson::to_bson(&v).map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("unserializable settings field: {}", e))
            })?;
            set.insert(k, value);
        }
        self.collection
            .update_one(
                doc! { "_id": &key },
                doc! { "$set": set },
                mongodb::options::UpdateOptions::builder()
                    .upsert(true)
                    .build(),
            )
            .await
            .map_err(AppError::from)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MongoSettingsStore {
    async fn company_settings(&self, company_id: &str) -> Result<Option<Value>, AppError> {
        self.read(format!("company:{}", company_id)).await
    }

    async fn store_settings(&self, store_id: &str) -> Result<Option<Value>, AppError> {
        self.read(format!("store:{}", store_id)).await
    }

    async fn merge_company_settings(&self, company_id: &str, patch: Value) -> Result<(), AppError> {
        self.merge(format!("company:{}", company_id), patch).await
    }

    async fn merge_store_settings(&self, store_id: &str, patch: Value) -> Result<(), AppError> {
        self.merge(format!("store:{}", store_id), patch).await
    }
}

/// Non-empty string field lookup.
fn str_field(doc: Option<&Value>, key: &str) -> Option<String> {
    doc?.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn address_field(doc: Option<&Value>, key: &str) -> Option<String> {
    doc?.get("address")
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub struct SettingsResolver {
    store: std::sync::Arc<dyn SettingsStore>,
}

impl SettingsResolver {
    pub fn new(store: std::sync::Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &std::sync::Arc<dyn SettingsStore> {
        &self.store
    }

    /// Resolve the effective fiscal configuration for a merchant. Store
    /// fields override company fields one by one; unset store fields fall
    /// through. A missing certificate reference is reported via
    /// `cert_exists`, never as an error.
    pub async fn resolve(
        &self,
        company_id: &str,
        store_id: Option<&str>,
    ) -> Result<FiscalConfig, AppError> {
        let company = self.store.company_settings(company_id).await?;
        let store = match store_id {
            Some(id) => self.store.store_settings(id).await?,
            None => None,
        };

        let company_doc = company.as_ref();
        let store_doc = store.as_ref();

        let pick = |key: &str| str_field(store_doc, key).or_else(|| str_field(company_doc, key));

        let cert_filename = pick("certFilename");
        let cert_source = if str_field(store_doc, "certFilename").is_some() {
            ConfigSource::Store
        } else {
            ConfigSource::Company
        };

        let pick_address =
            |key: &str| address_field(store_doc, key).or_else(|| address_field(company_doc, key));

        Ok(FiscalConfig {
            company_id: company_id.to_string(),
            store_id: store_id.map(|s| s.to_string()),
            company_name: str_field(store_doc, "name")
                .or_else(|| str_field(company_doc, "companyName"))
                .or_else(|| str_field(company_doc, "name")),
            cnpj: pick("cnpj"),
            ie: pick("ie"),
            serie: pick("nfeSerie"),
            environment: pick("nfeEnvironment")
                .map(|raw| Environment::parse(&raw))
                .unwrap_or(Environment::Homologation),
            csc: pick("csc"),
            csc_id: pick("cscId"),
            address: IssuerAddress {
                street: pick_address("street"),
                number: pick_address("number"),
                neighborhood: pick_address("neighborhood"),
                municipality_code: pick_address("cityCode"),
                municipality_name: pick_address("city"),
                state: pick_address("state"),
                postal_code: pick_address("zip"),
            },
            cert_exists: cert_filename.is_some(),
            cert_filename,
            cert_password_enc: pick("certPasswordEnc"),
            source: cert_source,
        })
    }

    /// Write a freshly encrypted passphrase token back to the document that
    /// owns the certificate reference.
    pub async fn save_passphrase_token(
        &self,
        config: &FiscalConfig,
        token: &str,
    ) -> Result<(), AppError> {
        let patch = serde_json::json!({ "certPasswordEnc": token });
        match (config.source, config.store_id.as_deref()) {
            (ConfigSource::Store, Some(store_id)) => {
                self.store.merge_store_settings(store_id, patch).await
            }
            _ => {
                self.store
                    .merge_company_settings(&config.company_id, patch)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct MapStore {
        companies: Mutex<HashMap<String, Value>>,
        stores: Mutex<HashMap<String, Value>>,
    }

    impl MapStore {
        fn new(company: Option<Value>, store: Option<Value>) -> Arc<Self> {
            let mut companies = HashMap::new();
            let mut stores = HashMap::new();
            if let Some(c) = company {
                companies.insert("c1".to_string(), c);
            }
            if let Some(s) = store {
                stores.insert("s1".to_string(), s);
            }
            Arc::new(Self {
                companies: Mutex::new(companies),
                stores: Mutex::new(stores),
            })
        }
    }

    #[async_trait]
    impl SettingsStore for MapStore {
        async fn company_settings(&self, company_id: &str) -> Result<Option<Value>, AppError> {
            Ok(self.companies.lock().await.get(company_id).cloned())
        }

        async fn store_settings(&self, store_id: &str) -> Result<Option<Value>, AppError> {
            Ok(self.stores.lock().await.get(store_id).cloned())
        }

        async fn merge_company_settings(
            &self,
            company_id: &str,
            patch: Value,
        ) -> Result<(), AppError> {
            let mut guard = self.companies.lock().await;
            let entry = guard.entry(company_id.to_string()).or_insert(json!({}));
            merge_into(entry, patch);
            Ok(())
        }

        async fn merge_store_settings(&self, store_id: &str, patch: Value) -> Result<(), AppError> {
            let mut guard = self.stores.lock().await;
            let entry = guard.entry(store_id.to_string()).or_insert(json!({}));
            merge_into(entry, patch);
            Ok(())
        }
    }

    fn merge_into(target: &mut Value, patch: Value) {
        if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
            for (k, v) in patch {
                target.insert(k, v);
            }
        }
    }

    #[tokio::test]
    async fn store_overrides_company_field_by_field() {
        let store = MapStore::new(
            Some(json!({ "cnpj": "A", "ie": "123", "nfeSerie": "1" })),
            Some(json!({ "cnpj": "B" })),
        );
        let resolver = SettingsResolver::new(store);

        let config = resolver.resolve("c1", Some("s1")).await.unwrap();
        assert_eq!(config.cnpj.as_deref(), Some("B"));
        // Unset store fields fall through to company values.
        assert_eq!(config.ie.as_deref(), Some("123"));
        assert_eq!(config.serie.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn removing_store_field_falls_back_to_company() {
        let store = MapStore::new(Some(json!({ "cnpj": "A" })), Some(json!({})));
        let resolver = SettingsResolver::new(store);

        let config = resolver.resolve("c1", Some("s1")).await.unwrap();
        assert_eq!(config.cnpj.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn missing_certificate_reported_not_fatal() {
        let store = MapStore::new(Some(json!({ "cnpj": "A" })), None);
        let resolver = SettingsResolver::new(store);

        let config = resolver.resolve("c1", None).await.unwrap();
        assert!(!config.cert_exists);
        assert!(config.cert_filename.is_none());
    }

    #[tokio::test]
    async fn certificate_source_tracks_owning_document() {
        let store = MapStore::new(
            Some(json!({ "certFilename": "c1.pfx" })),
            Some(json!({ "certFilename": "s1.pfx" })),
        );
        let resolver = SettingsResolver::new(store);

        let config = resolver.resolve("c1", Some("s1")).await.unwrap();
        assert_eq!(config.source, ConfigSource::Store);
        assert_eq!(config.cert_filename.as_deref(), Some("s1.pfx"));

        let company_only = resolver.resolve("c1", None).await.unwrap();
        assert_eq!(company_only.source, ConfigSource::Company);
        assert_eq!(company_only.cert_filename.as_deref(), Some("c1.pfx"));
    }

    #[tokio::test]
    async fn environment_defaults_to_homologation() {
        let store = MapStore::new(Some(json!({ "cnpj": "A" })), None);
        let resolver = SettingsResolver::new(store);
        let config = resolver.resolve("c1", None).await.unwrap();
        assert_eq!(config.environment, Environment::Homologation);
    }

    #[tokio::test]
    async fn rekey_writes_to_owning_document() {
        let store = MapStore::new(
            Some(json!({ "certFilename": "c1.pfx", "certPasswordEnc": "old" })),
            None,
        );
        let resolver = SettingsResolver::new(store.clone());
        let config = resolver.resolve("c1", None).await.unwrap();

        resolver
            .save_passphrase_token(&config, "new-token")
            .await
            .unwrap();

        let doc = store.company_settings("c1").await.unwrap().unwrap();
        assert_eq!(doc["certPasswordEnc"], "new-token");
    }
}
