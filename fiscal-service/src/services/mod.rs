pub mod certificates;
pub mod database;
pub mod diagnostics;
pub mod emission;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod orders;
pub mod payload;
pub mod reference;
pub mod secrets;
pub mod settings;
pub mod toolkit;
pub mod transmission;

pub use certificates::{CertificateManager, CertificateStore, LocalCertificateStore};
pub use database::MongoDb;
pub use diagnostics::{DiagnosticsEngine, DiagnosticsReport, StepStatus};
pub use emission::EmissionService;
pub use events::{EventBus, FiscalEvent};
pub use ledger::{MongoProtocolStore, ProtocolLedger, ProtocolQuery, ProtocolStore, SaveProtocolInput};
pub use metrics::{get_metrics, init_metrics};
pub use orders::{CatalogStore, MongoCatalogStore, MongoOrderStore, OrderStore};
pub use secrets::SecretCodec;
pub use settings::{MongoSettingsStore, SettingsResolver, SettingsStore};
pub use toolkit::SoapToolkit;
pub use transmission::{FiscalToolkit, TransmissionGateway};
