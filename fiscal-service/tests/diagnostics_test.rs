//! Diagnostics checklist behavior, including short-circuiting.

mod common;

use common::{COMPANY, HarnessOptions, harness};
use fiscal_service::services::StepStatus;

fn step_status(report: &fiscal_service::services::DiagnosticsReport, id: &str) -> StepStatus {
    report
        .steps
        .iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("step {} missing", id))
        .status
}

#[tokio::test]
async fn healthy_setup_reports_all_green() {
    let h = harness(HarnessOptions::default()).await;

    let report = h.diagnostics.run(COMPANY, None).await.unwrap();

    assert_eq!(report.summary, StepStatus::Ok);
    assert_eq!(report.steps.len(), 8);
    assert_eq!(step_status(&report, "master-key"), StepStatus::Ok);
    assert_eq!(step_status(&report, "settings"), StepStatus::Ok);
    assert_eq!(step_status(&report, "certificate-file"), StepStatus::Ok);
    assert_eq!(step_status(&report, "passphrase"), StepStatus::Ok);
    assert_eq!(step_status(&report, "container"), StepStatus::Ok);
    assert_eq!(step_status(&report, "authority-status"), StepStatus::Ok);

    let cert = report.cert_info.expect("certificate facts expected");
    assert!(cert.subject.contains("RESTAURANTE TESTE LTDA"));
    assert!(cert.days_remaining > 300);

    let probe_detail = report
        .steps
        .iter()
        .find(|s| s.id == "authority-status")
        .and_then(|s| s.detail.clone())
        .unwrap();
    assert!(probe_detail.contains("cStat=107"));
    assert!(probe_detail.contains("ms"));
}

#[tokio::test]
async fn missing_certificate_file_short_circuits_live_probe() {
    let h = harness(HarnessOptions {
        with_certificate_file: false,
        ..Default::default()
    })
    .await;

    let report = h.diagnostics.run(COMPANY, None).await.unwrap();

    assert_eq!(report.summary, StepStatus::Fail);
    assert_eq!(step_status(&report, "certificate-file"), StepStatus::Fail);
    assert_eq!(step_status(&report, "container"), StepStatus::Skip);
    // The live connectivity step is marked skip, never attempted.
    assert_eq!(step_status(&report, "authority-status"), StepStatus::Skip);
    assert!(h.toolkit.state.lock().await.transmitted.is_empty());
}

#[tokio::test]
async fn missing_settings_document_fails_lookup_step() {
    let h = harness(HarnessOptions::default()).await;
    h.settings.companies.lock().await.clear();

    let report = h.diagnostics.run(COMPANY, None).await.unwrap();

    assert_eq!(step_status(&report, "settings"), StepStatus::Fail);
    assert_eq!(report.summary, StepStatus::Fail);
}

#[tokio::test]
async fn fallback_passphrase_win_is_flagged_for_remediation() {
    // Stored token does not decrypt under the current key; the fallback
    // candidate opens the container. Steps 6 and 7 must say so explicitly.
    let h = harness(HarnessOptions {
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

    let report = h.diagnostics.run(COMPANY, None).await.unwrap();

    assert_eq!(step_status(&report, "passphrase"), StepStatus::Warn);
    assert_eq!(step_status(&report, "container"), StepStatus::Ok);
    let cert = report.cert_info.unwrap();
    assert_eq!(
        cert.passphrase_source,
        fiscal_service::models::PassphraseSource::Fallback
    );
    assert_eq!(report.summary, StepStatus::Warn);
}

#[tokio::test]
async fn authority_outage_is_reported_with_endpoint() {
    let h = harness(HarnessOptions::default()).await;
    h.toolkit.state.lock().await.probe = Err("connection timed out".to_string());

    let report = h.diagnostics.run(COMPANY, None).await.unwrap();

    assert_eq!(step_status(&report, "authority-status"), StepStatus::Fail);
    let detail = report
        .steps
        .iter()
        .find(|s| s.id == "authority-status")
        .and_then(|s| s.detail.clone())
        .unwrap();
    assert!(detail.contains("timed out"));
    assert!(detail.contains("svrs") || detail.contains("sp.gov.br"));
}

#[tokio::test]
async fn missing_master_key_fails_first_step() {
    use common::{FakeToolkit, InMemoryCertificateStore, InMemorySettingsStore, company_settings};
    use fiscal_service::services::{
        CertificateManager, DiagnosticsEngine, SecretCodec, SettingsResolver, TransmissionGateway,
    };
    use std::sync::Arc;

    let settings = Arc::new(InMemorySettingsStore::default());
    settings
        .companies
        .lock()
        .await
        .insert(COMPANY.to_string(), company_settings(None));

    let engine = DiagnosticsEngine::new(
        Arc::new(SettingsResolver::new(settings)),
        Arc::new(CertificateManager::new(
            Arc::new(InMemoryCertificateStore::default()),
            SecretCodec::new(None).unwrap(),
            None,
        )),
        TransmissionGateway::new(FakeToolkit::authorizing()),
    );

    let report = engine.run(COMPANY, None).await.unwrap();
    assert_eq!(step_status(&report, "master-key"), StepStatus::Fail);
    assert_eq!(report.summary, StepStatus::Fail);
}
