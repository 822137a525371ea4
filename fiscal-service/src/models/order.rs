//! Order aggregate as consumed from the ordering subsystem.
//!
//! Only the fields the fiscal flow reads are modeled; the free-form `payload`
//! blob carries a payment hint and a previously linked customer document
//! number, both used as fallbacks when building the recipient block.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: Option<String>,
    pub category_id: Option<String>,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub unit: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        (self.quantity * self.unit_price).round_dp(2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub store_id: Option<String>,
    pub display_id: Option<String>,
    pub status: String,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Free-form blob written by checkout; see payment_hint/customer_document.
    pub payload: Option<serde_json::Value>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Recover the payment method hint from the checkout payload, if present.
    /// Supports both the `payment.method` object and the legacy
    /// `payments: [{method, amount}]` array.
    pub fn payment_hint(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        if let Some(method) = payload
            .get("payment")
            .and_then(|p| p.get("method"))
            .and_then(|m| m.as_str())
        {
            return Some(method.to_string());
        }
        payload
            .get("payments")
            .and_then(|p| p.as_array())
            .and_then(|arr| arr.first())
            .and_then(|p| p.get("method"))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
    }

    /// Change due recorded by checkout for cash payments.
    pub fn change_due(&self) -> Option<Decimal> {
        self.payload
            .as_ref()?
            .get("payment")
            .and_then(|p| p.get("changeFor"))
            .and_then(|v| v.as_str().map(|s| s.parse().ok()).unwrap_or_else(|| {
                v.as_f64().and_then(|f| Decimal::try_from(f).ok())
            }))
    }

    /// Customer taxpayer document previously linked to this order, if any.
    pub fn customer_document(&self) -> Option<String> {
        self.payload
            .as_ref()?
            .get("customer")
            .and_then(|c| c.get("document"))
            .and_then(|d| d.as_str())
            .map(|s| s.to_string())
    }

    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .fold(Decimal::ZERO, |acc, it| acc + it.line_total())
    }
}
