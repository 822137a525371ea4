pub mod certificate;
pub mod classification;
pub mod fiscal_config;
pub mod order;
pub mod payload;
pub mod protocol;

pub use certificate::{CertificateBundle, CertificateHealth, PassphraseSource, ValidityStatus};
pub use classification::FiscalClassification;
pub use fiscal_config::{ConfigSource, Environment, FiscalConfig, IssuerAddress};
pub use order::{Order, OrderItem};
pub use payload::{DocumentModel, FiscalDocumentPayload};
pub use protocol::{DerivedStatus, ProtocolRecord};
