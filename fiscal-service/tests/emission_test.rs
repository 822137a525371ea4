//! End-to-end emission flow against fake collaborators.

mod common;

use common::{COMPANY, FakeToolkit, Harness, HarnessOptions, harness, order};
use fiscal_service::services::FiscalEvent;
use service_core::error::AppError;

async fn harness_with_order(options: HarnessOptions) -> Harness {
    let h = harness(options).await;
    h.orders
        .orders
        .lock()
        .await
        .insert("order-1".to_string(), order("order-1"));
    h
}

#[tokio::test]
async fn emit_from_order_authorizes_and_persists_protocol() {
    let h = harness_with_order(HarnessOptions::default()).await;

    let result = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .expect("emission should succeed");

    assert!(result.success);
    assert_eq!(result.status, "autorizado");
    assert_eq!(result.status_code.as_deref(), Some("100"));
    assert_eq!(result.protocol_number.as_deref(), Some("135260000000001"));
    assert_eq!(result.access_key.len(), 44);
    // NFC-e with CSC configured produces a consumer QR URL.
    assert!(result.consumer_qr_url.is_some());

    // The protocol record is persisted with the same order id.
    let records = h.protocols.records.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].order_id.as_deref(), Some("order-1"));
    assert!(records[0].is_authorized());
}

#[tokio::test]
async fn authorization_updates_order_and_emits_event() {
    let h = harness_with_order(HarnessOptions::default()).await;
    let mut rx = h.events.subscribe();

    h.emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap();

    let order = h.orders.orders.lock().await.get("order-1").cloned().unwrap();
    assert_eq!(order.status, "INVOICE_AUTHORIZED");

    let event = rx.try_recv().expect("invoice-authorized event expected");
    match event {
        FiscalEvent::InvoiceAuthorized {
            order_id,
            display_id,
            protocol_number,
            ..
        } => {
            assert_eq!(order_id, "order-1");
            assert_eq!(display_id.as_deref(), Some("123"));
            assert_eq!(protocol_number.as_deref(), Some("135260000000001"));
        }
    }
}

#[tokio::test]
async fn signed_document_reaches_the_homologation_endpoint() {
    let h = harness_with_order(HarnessOptions::default()).await;

    h.emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap();

    let state = h.toolkit.state.lock().await;
    assert_eq!(state.transmitted.len(), 1);
    let (signed_xml, target) = &state.transmitted[0];
    assert!(signed_xml.contains("<Signature>fake</Signature>"));
    // Homologation environment resolves the SP homologation deployment.
    assert!(target.authorize_url.contains("homologacao"));
}

#[tokio::test]
async fn order_with_authorized_protocol_is_not_reemitted() {
    let h = harness_with_order(HarnessOptions::default()).await;

    h.emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap();
    let err = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(h.protocols.records.lock().await.len(), 1);
    assert_eq!(h.toolkit.state.lock().await.transmitted.len(), 1);
}

#[tokio::test]
async fn unknown_order_is_a_configuration_error() {
    let h = harness(HarnessOptions::default()).await;

    let err = h
        .emission
        .emit_from_order(COMPANY, "missing-order")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConfigurationError(_)));
}

#[tokio::test]
async fn missing_certificate_blocks_emission() {
    let h = harness_with_order(HarnessOptions {
        with_certificate_file: false,
        ..Default::default()
    })
    .await;
    // Remove the certificate reference entirely: cert_exists must be false.
    if let Some(doc) = h.settings.companies.lock().await.get_mut(COMPANY) {
        doc.as_object_mut().unwrap().remove("certFilename");
    }

    let err = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConfigurationError(_)));
    assert!(h.protocols.records.lock().await.is_empty());
}

#[tokio::test]
async fn expired_certificate_blocks_emission() {
    let h = harness_with_order(HarnessOptions::default()).await;
    h.certificates.files.lock().await.insert(
        "company-1.pfx".to_string(),
        common::expired_pkcs12("pfx-pass"),
    );

    let err = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CertificateError(_)));
    assert!(h.toolkit.state.lock().await.transmitted.is_empty());
}

#[tokio::test]
async fn rejected_document_still_records_protocol() {
    let h = harness_with_order(HarnessOptions {
        toolkit: FakeToolkit::rejecting("204", "Rejeicao: Duplicidade de NF-e"),
        ..Default::default()
    })
    .await;

    let result = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, "rejeitado");
    assert!(result.protocol_number.is_none());

    let records = h.protocols.records.lock().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code.as_deref(), Some("204"));

    // Rejection must not flip the order status.
    let order = h.orders.orders.lock().await.get("order-1").cloned().unwrap();
    assert_eq!(order.status, "CONCLUIDO");
}

#[tokio::test]
async fn batch_emission_isolates_failures() {
    let h = harness_with_order(HarnessOptions::default()).await;
    // order-2 does not exist; order-1 is fine.
    let entries = h
        .emission
        .emit_from_orders(
            COMPANY,
            &["order-2".to_string(), "order-1".to_string()],
        )
        .await;

    assert_eq!(entries.len(), 2);
    assert!(!entries[0].success);
    assert!(entries[0].error.as_deref().unwrap_or("").contains("order-2"));
    assert!(entries[1].success);
    assert_eq!(h.protocols.records.lock().await.len(), 1);
}

#[tokio::test]
async fn stale_passphrase_token_recovered_via_fallback() {
    // Token stored under a rotated key cannot decrypt; the operator
    // fallback opens the container and emission still succeeds.
    let h = harness_with_order(HarnessOptions {
        store_passphrase_token: false,
        cert_passphrase: "operator-pass".to_string(),
        fallback_passphrase: Some("operator-pass".to_string()),
        ..Default::default()
    })
    .await;
    if let Some(doc) = h.settings.companies.lock().await.get_mut(COMPANY) {
        doc["certPasswordEnc"] =
            serde_json::Value::String("bm9uc2Vuc2U=:bm9uc2Vuc2U=:bm9uc2Vuc2U=".to_string());
    }

    let result = h
        .emission
        .emit_from_order(COMPANY, "order-1")
        .await
        .expect("fallback passphrase should recover emission");
    assert!(result.success);
}

#[tokio::test]
async fn rekey_reencrypts_fallback_passphrase() {
    let h = harness_with_order(HarnessOptions {
        store_passphrase_token: false,
        cert_passphrase: "operator-pass".to_string(),
        fallback_passphrase: Some("operator-pass".to_string()),
        ..Default::default()
    })
    .await;

    let outcome = h
        .emission
        .rekey_passphrase(COMPANY, None)
        .await
        .expect("rekey should succeed");
    assert!(outcome.updated);

    // The stored token now decrypts under the current key and wins probing.
    let doc = h
        .settings
        .companies
        .lock()
        .await
        .get(COMPANY)
        .cloned()
        .unwrap();
    let token = doc["certPasswordEnc"].as_str().unwrap().to_string();
    assert_eq!(common::codec().decrypt(&token).unwrap(), "operator-pass");

    let second = h.emission.rekey_passphrase(COMPANY, None).await.unwrap();
    assert!(!second.updated);
}
