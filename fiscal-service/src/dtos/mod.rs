pub mod config;
pub mod emission;
pub mod protocols;

pub use config::{FiscalConfigView, RekeyOutcome, RekeyRequest};
pub use emission::{
    BatchEmitEntry, EmitDocumentItem, EmitDocumentRequest, EmitFromOrderRequest, EmitResult,
};
pub use protocols::{
    CancelDocumentRequest, ProtocolListResponse, ProtocolResponse, SaveProtocolRequest,
};
