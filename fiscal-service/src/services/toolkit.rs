//! Production signing/transmission toolkit.
//!
//! Signs the infNFe element with an enveloped RSA-SHA1 signature (legacy but
//! still required by several authority deployments) and submits SOAP 1.2
//! envelopes over mutually authenticated TLS. The TLS identity is rebuilt
//! from the PKCS12 bytes on every call; nothing is cached between requests.

use crate::models::certificate::CertificateBundle;
use crate::services::transmission::{
    AuthorityReply, FiscalToolkit, StatusProbe, TransmitTarget, parse_authority_response,
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use openssl::hash::{MessageDigest, hash};
use openssl::sign::Signer;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::time::{Duration, Instant};

const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const NFE_NS: &str = "http://www.portalfiscal.inf.br/nfe";

pub struct SoapToolkit {
    transmit_timeout: Duration,
    status_timeout: Duration,
    verify_tls: bool,
}

impl SoapToolkit {
    pub fn new(transmit_timeout: Duration, status_timeout: Duration, verify_tls: bool) -> Self {
        Self {
            transmit_timeout,
            status_timeout,
            verify_tls,
        }
    }

    fn client(
        &self,
        bundle: &CertificateBundle,
        timeout: Duration,
        endpoint: &str,
    ) -> Result<reqwest::Client, AppError> {
        let identity = reqwest::Identity::from_pkcs12_der(
            &bundle.der,
            bundle.passphrase.expose_secret(),
        )
        .map_err(|e| {
            AppError::certificate(format!("mutual-TLS identity rejected the container: {}", e))
        })?;

        let mut builder = reqwest::Client::builder().identity(identity).timeout(timeout);
        if !self.verify_tls {
            // Several regional deployments serve incomplete chains; the
            // original integration transmitted with verification off.
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder.build().map_err(|e| {
            AppError::transmission(endpoint, format!("TLS client construction failed: {}", e))
        })
    }

    async fn post_soap(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        action: &str,
        envelope: String,
    ) -> Result<String, AppError> {
        let response = client
            .post(endpoint)
            .header(
                "Content-Type",
                format!(r#"application/soap+xml; charset=utf-8; action="{}""#, action),
            )
            .body(envelope)
            .send()
            .await
            .map_err(|e| AppError::transmission(endpoint, format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::transmission(endpoint, format!("unreadable response: {}", e)))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(512).collect();
            return Err(AppError::transmission(
                endpoint,
                format!("HTTP {}: {}", status.as_u16(), excerpt),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl FiscalToolkit for SoapToolkit {
    fn sign(&self, xml: &str, bundle: &CertificateBundle) -> Result<String, AppError> {
        sign_inf_nfe(xml, bundle)
    }

    async fn transmit(
        &self,
        signed_xml: &str,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<AuthorityReply, AppError> {
        let endpoint = &target.authorize_url;
        let client = self.client(bundle, self.transmit_timeout, endpoint)?;

        let (namespace, action) = authorize_contract(target);
        let batch_id = Utc::now().timestamp_millis().to_string();
        // enviNFe must carry no whitespace between tags (authority rejects
        // the batch with cStat 588 otherwise).
        let body = format!(
            r#"<nfeDadosMsg xmlns="{ns}"><enviNFe xmlns="{nfe}" versao="4.00"><idLote>{lote}</idLote><indSinc>1</indSinc>{doc}</enviNFe></nfeDadosMsg>"#,
            ns = namespace,
            nfe = NFE_NS,
            lote = batch_id,
            doc = signed_xml.trim(),
        );
        let envelope = soap_envelope(&body);

        let raw = self.post_soap(&client, endpoint, action, envelope).await?;
        Ok(parse_authority_response(&raw))
    }

    async fn service_status(
        &self,
        target: &TransmitTarget,
        bundle: &CertificateBundle,
    ) -> Result<StatusProbe, AppError> {
        let endpoint = &target.status_url;
        let client = self.client(bundle, self.status_timeout, endpoint)?;

        let body = format!(
            r#"<nfeDadosMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4"><consStatServ xmlns="{nfe}" versao="4.00"><tpAmb>{amb}</tpAmb><cUF>{uf}</cUF><xServ>STATUS</xServ></consStatServ></nfeDadosMsg>"#,
            nfe = NFE_NS,
            amb = target.environment.tp_amb(),
            uf = target.uf_code,
        );
        let envelope = soap_envelope(&body);

        let started = Instant::now();
        let raw = self
            .post_soap(
                &client,
                endpoint,
                "http://www.portalfiscal.inf.br/nfe/wsdl/NFeStatusServico4/nfeStatusServicoNF",
                envelope,
            )
            .await?;
        let elapsed = started.elapsed().as_millis() as u64;

        let reply = parse_authority_response(&raw);
        Ok(StatusProbe {
            status_code: reply.status_code,
            reason: reply.status_reason,
            response_time_ms: elapsed,
        })
    }
}

fn soap_envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<soap12:Envelope xmlns:soap12=\"http://www.w3.org/2003/05/soap-envelope\">\n  <soap12:Header></soap12:Header>\n  <soap12:Body>\n    {}\n  </soap12:Body>\n</soap12:Envelope>",
        body
    )
}

/// Namespace + SOAP action for the authorization call. Shared deployments
/// expose NFC-e through the NFeAutorizacao4 contract; dedicated NFC-e
/// endpoints use their own.
fn authorize_contract(target: &TransmitTarget) -> (&'static str, &'static str) {
    if target.uses_nfe_namespace {
        (
            "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4",
            "http://www.portalfiscal.inf.br/nfe/wsdl/NFeAutorizacao4/nfeAutorizacaoLote",
        )
    } else {
        (
            "http://www.portalfiscal.inf.br/nfe/wsdl/NfceAutorizacao4",
            "http://www.portalfiscal.inf.br/nfe/wsdl/NfceAutorizacao4/nfceAutorizacaoLote",
        )
    }
}

/// Enveloped signature over the infNFe element.
///
/// The payload serializer already emits attribute-ordered, whitespace-free
/// XML, so the element bytes are their own canonical form once the root
/// namespace is made explicit on infNFe.
fn sign_inf_nfe(xml: &str, bundle: &CertificateBundle) -> Result<String, AppError> {
    let start = xml
        .find("<infNFe")
        .ok_or_else(|| AppError::certificate("document has no infNFe element"))?;
    let end = xml
        .find("</infNFe>")
        .map(|p| p + "</infNFe>".len())
        .ok_or_else(|| AppError::certificate("document has no infNFe element"))?;
    let element = &xml[start..end];

    let reference_id = element
        .split("Id=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .ok_or_else(|| AppError::certificate("infNFe element has no Id attribute"))?;

    // Canonical form inherits the document namespace.
    let canonical = element.replacen("<infNFe", &format!(r#"<infNFe xmlns="{}""#, NFE_NS), 1);

    let digest = hash(MessageDigest::sha1(), canonical.as_bytes())
        .map_err(|e| AppError::certificate(format!("digest failed: {}", e)))?;
    let digest_value = BASE64.encode(digest.as_ref());

    let signed_info = format!(
        concat!(
            r#"<SignedInfo xmlns="{ns}">"#,
            r#"<CanonicalizationMethod Algorithm="{c14n}"></CanonicalizationMethod>"#,
            r#"<SignatureMethod Algorithm="{rsa_sha1}"></SignatureMethod>"#,
            r##"<Reference URI="#{id}">"##,
            r#"<Transforms>"#,
            r#"<Transform Algorithm="{enveloped}"></Transform>"#,
            r#"<Transform Algorithm="{c14n}"></Transform>"#,
            r#"</Transforms>"#,
            r#"<DigestMethod Algorithm="{sha1}"></DigestMethod>"#,
            r#"<DigestValue>{digest}</DigestValue>"#,
            r#"</Reference>"#,
            r#"</SignedInfo>"#
        ),
        ns = XMLDSIG_NS,
        c14n = C14N,
        rsa_sha1 = RSA_SHA1,
        enveloped = ENVELOPED,
        sha1 = SHA1,
        id = reference_id,
        digest = digest_value,
    );

    let mut signer = Signer::new(MessageDigest::sha1(), &bundle.private_key)
        .map_err(|e| AppError::certificate(format!("signer init failed: {}", e)))?;
    signer
        .update(signed_info.as_bytes())
        .map_err(|e| AppError::certificate(format!("signing failed: {}", e)))?;
    let signature = signer
        .sign_to_vec()
        .map_err(|e| AppError::certificate(format!("signing failed: {}", e)))?;
    let signature_value = BASE64.encode(&signature);

    let cert_der = bundle
        .certificate
        .to_der()
        .map_err(|e| AppError::certificate(format!("certificate export failed: {}", e)))?;
    let cert_b64 = BASE64.encode(&cert_der);

    let signature_element = format!(
        concat!(
            r#"<Signature xmlns="{ns}">"#,
            "{signed_info}",
            r#"<SignatureValue>{value}</SignatureValue>"#,
            r#"<KeyInfo><X509Data><X509Certificate>{cert}</X509Certificate></X509Data></KeyInfo>"#,
            r#"</Signature>"#
        ),
        ns = XMLDSIG_NS,
        signed_info = signed_info,
        value = signature_value,
        cert = cert_b64,
    );

    Ok(xml.replacen("</NFe>", &format!("{}</NFe>", signature_element), 1))
}
