use crate::config::FiscalServiceConfig;
use crate::handlers;
use crate::services::{
    CertificateManager, DiagnosticsEngine, EmissionService, EventBus, LocalCertificateStore,
    MongoCatalogStore, MongoDb, MongoOrderStore, MongoProtocolStore, MongoSettingsStore,
    ProtocolLedger, SecretCodec, SettingsResolver, SoapToolkit, TransmissionGateway, get_metrics,
};
use axum::{
    Router, http::StatusCode,
    routing::{get, post},
};
use service_core::error::AppError;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: FiscalServiceConfig,
    pub db: MongoDb,
    pub emission: Arc<EmissionService>,
    pub ledger: Arc<ProtocolLedger>,
    pub diagnostics: Arc<DiagnosticsEngine>,
    pub events: EventBus,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: FiscalServiceConfig) -> Result<Self, AppError> {
        let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                e
            })?;
        db.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        let codec = SecretCodec::new(config.secrets.master_key.as_ref()).map_err(|e| {
            tracing::error!("Invalid CERT_STORE_KEY: {}", e);
            AppError::ConfigError(anyhow::anyhow!(e.to_string()))
        })?;

        let cert_store = Arc::new(
            LocalCertificateStore::new(&config.certificates.dir)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize certificate store at {}: {}",
                        config.certificates.dir,
                        e
                    );
                    e
                })?,
        );
        let certificates = Arc::new(CertificateManager::new(
            cert_store,
            codec,
            config.secrets.fallback_passphrase.clone(),
        ));

        let resolver = Arc::new(SettingsResolver::new(Arc::new(MongoSettingsStore::new(
            db.settings(),
        ))));

        let orders = Arc::new(MongoOrderStore::new(db.clone()));
        let catalog = Arc::new(MongoCatalogStore::new(db.clone()));
        let protocols = Arc::new(MongoProtocolStore::new(db.protocols()));

        let events = EventBus::default();
        let ledger = Arc::new(ProtocolLedger::new(
            protocols,
            orders.clone(),
            events.clone(),
        ));

        let toolkit = Arc::new(SoapToolkit::new(
            Duration::from_secs(config.authority.transmit_timeout_secs),
            Duration::from_secs(config.authority.status_timeout_secs),
            config.authority.verify_tls,
        ));

        let emission = Arc::new(EmissionService::new(
            orders,
            catalog,
            resolver.clone(),
            certificates.clone(),
            TransmissionGateway::new(toolkit.clone()),
            ledger.clone(),
        ));

        let diagnostics = Arc::new(DiagnosticsEngine::new(
            resolver,
            certificates,
            TransmissionGateway::new(toolkit),
        ));

        let state = AppState {
            config: config.clone(),
            db: db.clone(),
            emission,
            ledger,
            diagnostics,
            events,
        };

        let app = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_endpoint))
            .route("/fiscal/config/order/:order_id", get(handlers::resolve_order_config))
            .route("/fiscal/config/rekey", post(handlers::rekey_passphrase))
            .route("/fiscal/emit", post(handlers::emit_document))
            .route("/fiscal/emit/from-order", post(handlers::emit_from_order))
            .route(
                "/fiscal/protocols",
                post(handlers::save_protocol).get(handlers::list_protocols),
            )
            .route("/fiscal/protocols/:protocol_id/xml", get(handlers::download_raw_xml))
            .route(
                "/fiscal/protocols/:protocol_id/cancel",
                post(handlers::cancel_document),
            )
            .route("/fiscal/diagnostics", get(handlers::run_diagnostics))
            .route("/fiscal/reference/ncm", get(handlers::list_ncm))
            .route("/fiscal/reference/cfop", get(handlers::list_cfop))
            .route("/fiscal/reference/cest", get(handlers::list_cest))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn db(&self) -> &MongoDb {
        &self.state.db
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_endpoint() -> impl axum::response::IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
