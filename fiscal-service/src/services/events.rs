//! Fire-and-forget application events.
//!
//! The socket/notification layer subscribes to forward authorizations to the
//! storefront; emission never waits on or fails with a consumer.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum FiscalEvent {
    InvoiceAuthorized {
        order_id: String,
        display_id: Option<String>,
        protocol_number: Option<String>,
        status_code: Option<String>,
        status_reason: Option<String>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FiscalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FiscalEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: FiscalEvent) {
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::debug!(receivers, "fiscal event delivered");
            }
            Err(_) => {
                // No subscriber attached (e.g. worker-only deployments).
                tracing::debug!("fiscal event emitted with no subscribers");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(FiscalEvent::InvoiceAuthorized {
            order_id: "o1".to_string(),
            display_id: Some("42".to_string()),
            protocol_number: Some("135".to_string()),
            status_code: Some("100".to_string()),
            status_reason: None,
        });
        let event = rx.recv().await.unwrap();
        match event {
            FiscalEvent::InvoiceAuthorized { order_id, .. } => assert_eq!(order_id, "o1"),
        }
    }

    #[test]
    fn emitting_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(FiscalEvent::InvoiceAuthorized {
            order_id: "o1".to_string(),
            display_id: None,
            protocol_number: None,
            status_code: None,
            status_reason: None,
        });
    }
}
