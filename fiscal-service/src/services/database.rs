use crate::models::{FiscalClassification, Order, ProtocolRecord};
use mongodb::{
    Client as MongoClient, Collection, Database, IndexModel, bson::doc, options::IndexOptions,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for fiscal-service");

        let protocols = self.protocols();

        // Uniqueness of the authority protocol number is enforced at the
        // persistence layer; the read-then-insert idempotency check alone
        // cannot guard concurrent duplicate submissions. Sparse: most
        // failed transmissions never receive a number.
        let protocol_number_index = IndexModel::builder()
            .keys(doc! { "protocolNumber": 1 })
            .options(
                IndexOptions::builder()
                    .name("protocol_number_unique".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        protocols
            .create_index(protocol_number_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create protocolNumber index on protocols collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created unique sparse index on protocols.protocolNumber");

        // Tenant-scoped listing.
        let company_index = IndexModel::builder()
            .keys(doc! { "companyId": 1, "createdAt": -1 })
            .options(
                IndexOptions::builder()
                    .name("company_created_lookup".to_string())
                    .build(),
            )
            .build();

        protocols
            .create_index(company_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create company index on protocols collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created index on protocols.(companyId, createdAt)");

        // Re-emission guard lookup.
        let order_index = IndexModel::builder()
            .keys(doc! { "orderId": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_lookup".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        protocols.create_index(order_index, None).await.map_err(|e| {
            tracing::error!("Failed to create order index on protocols collection: {}", e);
            AppError::from(e)
        })?;
        tracing::info!("Created index on protocols.orderId");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn protocols(&self) -> Collection<ProtocolRecord> {
        self.db.collection("nfe_protocols")
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection("orders")
    }

    pub fn settings(&self) -> Collection<bson::Document> {
        self.db.collection("settings")
    }

    pub fn classifications(&self) -> Collection<FiscalClassification> {
        self.db.collection("fiscal_classifications")
    }

    /// Catalog collections are owned by the menu subsystem; this service
    /// only reads the classification link on each document.
    pub fn products(&self) -> Collection<bson::Document> {
        self.db.collection("products")
    }

    pub fn menu_categories(&self) -> Collection<bson::Document> {
        self.db.collection("menu_categories")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
