pub mod config;
pub mod diagnostics;
pub mod emission;
pub mod health;
pub mod protocols;
pub mod reference;

pub use config::{rekey_passphrase, resolve_order_config};
pub use diagnostics::run_diagnostics;
pub use emission::{emit_document, emit_from_order};
pub use health::health_check;
pub use protocols::{cancel_document, download_raw_xml, list_protocols, save_protocol};
pub use reference::{list_cest, list_cfop, list_ncm};
