//! Per-item fiscal classification, maintained by catalog administration and
//! consumed read-only here. Products without their own record fall back to
//! their category's record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiscalClassification {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub description: String,
    pub ncm: Option<String>,
    pub ean: Option<String>,
    pub cest: Option<String>,
    /// Operation code candidates; the first entry is used for emission.
    #[serde(default)]
    pub cfops: Vec<String>,
    pub orig: Option<String>,
    #[serde(default)]
    pub p_pis: Decimal,
    #[serde(default)]
    pub p_cofins: Decimal,
    #[serde(default)]
    pub p_ipi: Decimal,
}

impl FiscalClassification {
    pub fn cfop(&self) -> Option<&str> {
        self.cfops.first().map(|s| s.as_str())
    }
}
