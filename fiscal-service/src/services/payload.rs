//! Payload construction: order + resolved config + per-item classification
//! into a schema-compliant document.
//!
//! Field sanitizers are deliberate, documented leniencies: cosmetic issues in
//! merchant data (formatted document numbers, dotted NCMs, short postal
//! codes) must never block issuance. Business-critical fields (CNPJ,
//! certificate presence) are NOT defaulted here; the emission flow refuses to
//! start without them.

use crate::models::fiscal_config::{Environment, FiscalConfig, IssuerAddress};
use crate::models::payload::{
    AddressBlock, DocumentModel, FiscalDocumentPayload, IpiTag, IssuerBlock, ItemTaxes,
    PaymentBlock, PayloadHeader, PayloadItem, RecipientBlock, RecipientDocument, TaxTag,
    TotalsBlock,
};
use crate::models::{FiscalClassification, Order};
use chrono::{FixedOffset, SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Fixed issuer/recipient/product text the authority requires on test
/// documents.
pub const HOMOLOGATION_NAME: &str =
    "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";
pub const HOMOLOGATION_PRODUCT: &str =
    "NOTA FISCAL EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";
const HOMOLOGATION_NOTE: &str =
    "Documento emitido em ambiente de homologacao - sem valor fiscal";

/// IBGE numeric codes for Brazilian states.
const UF_CODES: [(&str, &str); 27] = [
    ("AC", "12"), ("AL", "27"), ("AP", "16"), ("AM", "13"), ("BA", "29"),
    ("CE", "23"), ("DF", "53"), ("ES", "32"), ("GO", "52"), ("MA", "21"),
    ("MT", "51"), ("MS", "50"), ("MG", "31"), ("PA", "15"), ("PB", "25"),
    ("PR", "41"), ("PE", "26"), ("PI", "22"), ("RJ", "33"), ("RN", "24"),
    ("RS", "43"), ("RO", "11"), ("RR", "14"), ("SC", "42"), ("SP", "35"),
    ("SE", "28"), ("TO", "17"),
];

pub fn uf_to_code(uf: &str) -> String {
    let upper = uf.trim().to_uppercase();
    if !upper.is_empty() && upper.chars().all(|c| c.is_ascii_digit()) {
        return upper;
    }
    UF_CODES
        .iter()
        .find(|(abbr, _)| *abbr == upper)
        .map(|(_, code)| (*code).to_string())
        .unwrap_or(upper)
}

fn digits_of(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Document number: digits only, last nine kept, leading zeros stripped,
/// `"1"` when nothing remains (schema TNF pattern).
pub(crate) fn sanitize_document_number(raw: &str) -> String {
    let digits = digits_of(raw);
    let clamped = if digits.len() > 9 {
        &digits[digits.len() - 9..]
    } else {
        digits.as_str()
    };
    let stripped = clamped.trim_start_matches('0');
    if stripped.is_empty() {
        "1".to_string()
    } else {
        stripped.to_string()
    }
}

/// Series: digits only, at most three, default `"1"` (schema TSerie).
pub(crate) fn sanitize_serie(raw: &str) -> String {
    let digits = digits_of(raw);
    let clamped: String = digits.chars().take(3).collect();
    if clamped.is_empty() {
        "1".to_string()
    } else {
        clamped
    }
}

/// Municipality code: first embedded 7-digit run, else the sentinel default.
pub(crate) fn sanitize_municipality_code(raw: &str) -> String {
    static SEVEN_DIGITS: OnceLock<Regex> = OnceLock::new();
    let re = SEVEN_DIGITS.get_or_init(|| Regex::new(r"\d{7}").expect("static regex"));
    re.find(raw)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "0000000".to_string())
}

/// Postal code: digits only, left-padded to exactly eight.
pub(crate) fn sanitize_postal_code(raw: &str) -> String {
    let digits = digits_of(raw);
    let padded = format!("{:0>8}", digits);
    padded[padded.len() - 8..].to_string()
}

/// NCM: digits only, left-padded to eight, truncated to eight.
pub(crate) fn sanitize_ncm(raw: &str) -> String {
    let digits = digits_of(raw);
    let padded = format!("{:0>8}", digits);
    padded[..8].to_string()
}

pub(crate) fn fmt_dec2(value: Decimal) -> String {
    format!("{:.2}", value)
}

pub(crate) fn fmt_dec4(value: Decimal) -> String {
    format!("{:.4}", value)
}

pub(crate) fn fmt_dec10(value: Decimal) -> String {
    format!("{:.10}", value)
}

/// Recipient document dispatch by digit count: 11 ⇒ CPF, 14 ⇒ CNPJ, anything
/// else is omitted from the recipient block entirely.
pub(crate) fn classify_recipient_document(raw: &str) -> Option<RecipientDocument> {
    let digits = digits_of(raw);
    match digits.len() {
        11 => Some(RecipientDocument::Cpf(digits)),
        14 => Some(RecipientDocument::Cnpj(digits)),
        _ => None,
    }
}

/// Payment method hint from checkout to the schema tPag code.
pub(crate) fn payment_method_code(hint: Option<&str>) -> &'static str {
    match hint.map(|h| h.to_lowercase()) {
        Some(h) if h.contains("dinheiro") || h.contains("cash") => "01",
        Some(h) if h.contains("debito") => "04",
        Some(h) if h.contains("credito") || h.contains("cartao") || h.contains("card") => "03",
        Some(h) if h.contains("pix") => "17",
        _ => "99",
    }
}

/// Mod-11 check digit over the 43-digit key prefix.
pub(crate) fn access_key_check_digit(key43: &str) -> char {
    let weights = [2u32, 3, 4, 5, 6, 7, 8, 9];
    let sum: u32 = key43
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| c.to_digit(10).unwrap_or(0) * weights[i % weights.len()])
        .sum();
    let rest = sum % 11;
    let dv = if rest < 2 { 0 } else { 11 - rest };
    char::from_digit(dv, 10).unwrap_or('0')
}

fn random_cnf() -> String {
    format!("{:08}", rand::thread_rng().gen_range(10_000_000u32..=99_999_999))
}

fn address_block(address: &IssuerAddress, uf_fallback: &str) -> AddressBlock {
    AddressBlock {
        street: address.street.clone().unwrap_or_else(|| "NAO INFORMADO".to_string()),
        number: address.number.clone().unwrap_or_else(|| "S/N".to_string()),
        neighborhood: address
            .neighborhood
            .clone()
            .unwrap_or_else(|| "CENTRO".to_string()),
        municipality_code: sanitize_municipality_code(
            address.municipality_code.as_deref().unwrap_or(""),
        ),
        municipality_name: address
            .municipality_name
            .clone()
            .unwrap_or_else(|| "NAO INFORMADO".to_string()),
        uf: address
            .state
            .clone()
            .unwrap_or_else(|| uf_fallback.to_string()),
        postal_code: sanitize_postal_code(address.postal_code.as_deref().unwrap_or("")),
        country_code: "1058".to_string(),
        country_name: "BRASIL".to_string(),
    }
}

/// Explicit knobs for one emission; everything else derives from the order
/// and resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub model: Option<DocumentModel>,
    pub serie: Option<String>,
    pub number: Option<String>,
    pub nat_op: Option<String>,
    pub recipient_document: Option<String>,
    pub recipient_name: Option<String>,
}

pub fn build_payload(
    order: &Order,
    config: &FiscalConfig,
    classifications: &[Option<FiscalClassification>],
    opts: &BuildOptions,
) -> Result<FiscalDocumentPayload, AppError> {
    let cnpj = config
        .cnpj
        .as_deref()
        .map(digits_of)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::configuration("merchant CNPJ is not configured"))?;
    if order.items.is_empty() {
        return Err(AppError::validation("order has no items to invoice"));
    }

    let homologation = config.environment == Environment::Homologation;
    let tp_amb = config.environment.tp_amb().to_string();

    // Recipient: explicit request fields win, then the customer document
    // previously linked in the order payload.
    let raw_document = opts
        .recipient_document
        .clone()
        .or_else(|| order.customer_document());
    let recipient_document = raw_document.as_deref().and_then(classify_recipient_document);

    let model = opts.model.unwrap_or(match &recipient_document {
        // A company recipient needs the full invoice model.
        Some(RecipientDocument::Cnpj(_)) => DocumentModel::Nfe,
        _ => DocumentModel::Nfce,
    });

    let uf = config
        .address
        .state
        .clone()
        .unwrap_or_else(|| "SP".to_string());
    let uf_code = uf_to_code(&uf);
    let municipality_code =
        sanitize_municipality_code(config.address.municipality_code.as_deref().unwrap_or(""));

    let serie = sanitize_serie(opts.serie.as_deref().or(config.serie.as_deref()).unwrap_or("1"));
    let number_source = opts
        .number
        .clone()
        .or_else(|| order.display_id.clone())
        .unwrap_or_default();
    let number = sanitize_document_number(&number_source);

    let emitted_at = Utc::now()
        .with_timezone(&FixedOffset::west_opt(3 * 3600).expect("static offset"))
        .to_rfc3339_opts(SecondsFormat::Secs, false);

    let c_nf = random_cnf();
    let aamm: String = format!("{}{}", &emitted_at[2..4], &emitted_at[5..7]);
    let key43 = format!(
        "{:0>2}{}{:0>14}{:0>2}{:0>3}{:0>9}1{:0>8}",
        uf_code, aamm, cnpj, model.code(), serie, number, c_nf
    );
    let check_digit = access_key_check_digit(&key43);
    let access_key = format!("{}{}", key43, check_digit);

    let issuer_name = if homologation {
        HOMOLOGATION_NAME.to_string()
    } else {
        config
            .company_name
            .clone()
            .unwrap_or_else(|| "EMITENTE".to_string())
    };

    let issuer = IssuerBlock {
        cnpj: format!("{:0>14}", cnpj),
        name: issuer_name,
        ie: config.ie_or_isento().to_string(),
        crt: "1".to_string(),
        address: address_block(&config.address, &uf),
    };

    let recipient = build_recipient(
        order,
        config,
        opts,
        recipient_document,
        model,
        homologation,
        &uf,
    );

    let mut items = Vec::with_capacity(order.items.len());
    let mut total_products = Decimal::ZERO;
    let mut total_pis = Decimal::ZERO;
    let mut total_cofins = Decimal::ZERO;
    let mut total_ipi = Decimal::ZERO;

    for (idx, item) in order.items.iter().enumerate() {
        let classification = classifications.get(idx).and_then(|c| c.as_ref());
        let line_total = item.line_total();
        total_products += line_total;

        let description = if homologation {
            HOMOLOGATION_PRODUCT.to_string()
        } else {
            item.name.chars().take(120).collect()
        };

        let gtin = classification
            .and_then(|c| c.ean.as_deref())
            .map(digits_of)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "SEM GTIN".to_string());

        let (pis, pis_amount) = tax_tag(line_total, classification.map(|c| c.p_pis));
        let (cofins, cofins_amount) = tax_tag(line_total, classification.map(|c| c.p_cofins));
        total_pis += pis_amount;
        total_cofins += cofins_amount;

        let ipi = classification
            .map(|c| c.p_ipi)
            .filter(|p| p.is_sign_positive() && !p.is_zero())
            .map(|p| {
                let amount = (line_total * p / Decimal::from(100)).round_dp(2);
                total_ipi += amount;
                IpiTag {
                    rate: fmt_dec2(p),
                    amount: fmt_dec2(amount),
                }
            });

        items.push(PayloadItem {
            number: (idx + 1) as u32,
            product_code: item
                .product_id
                .clone()
                .unwrap_or_else(|| format!("{}", idx + 1))
                .chars()
                .take(60)
                .collect(),
            description,
            ncm: sanitize_ncm(classification.and_then(|c| c.ncm.as_deref()).unwrap_or("")),
            cfop: classification
                .and_then(|c| c.cfop())
                .unwrap_or("5102")
                .to_string(),
            unit: item
                .unit
                .clone()
                .unwrap_or_else(|| "UN".to_string())
                .chars()
                .take(6)
                .collect(),
            quantity: fmt_dec4(item.quantity),
            unit_price: fmt_dec10(item.unit_price),
            line_total: fmt_dec2(line_total),
            gtin,
            taxes: ItemTaxes {
                icms_origin: classification
                    .and_then(|c| c.orig.clone())
                    .unwrap_or_else(|| "0".to_string()),
                pis,
                cofins,
                ipi,
            },
        });
    }

    let invoice_total = total_products;
    let payment = PaymentBlock {
        method_code: payment_method_code(order.payment_hint().as_deref()).to_string(),
        amount: fmt_dec2(invoice_total),
        change_due: order.change_due().map(fmt_dec2),
    };

    Ok(FiscalDocumentPayload {
        header: PayloadHeader {
            nat_op: opts.nat_op.clone().unwrap_or_else(|| "VENDA".to_string()),
            model,
            serie,
            number,
            emitted_at,
            purpose_code: "1".to_string(),
            tp_amb,
            tp_emis: "1".to_string(),
            presence_indicator: match model {
                DocumentModel::Nfce => "1".to_string(),
                DocumentModel::Nfe => "0".to_string(),
            },
            uf_code,
            municipality_code,
            c_nf,
            check_digit: check_digit.to_string(),
            access_key,
        },
        issuer,
        recipient,
        items,
        totals: TotalsBlock {
            products: fmt_dec2(total_products),
            invoice_total: fmt_dec2(invoice_total),
            pis: fmt_dec2(total_pis),
            cofins: fmt_dec2(total_cofins),
            ipi: fmt_dec2(total_ipi),
        },
        payment,
        additional_info: homologation.then(|| HOMOLOGATION_NOTE.to_string()),
    })
}

fn tax_tag(line_total: Decimal, rate: Option<Decimal>) -> (TaxTag, Decimal) {
    match rate.filter(|p| p.is_sign_positive() && !p.is_zero()) {
        Some(p) => {
            let amount = (line_total * p / Decimal::from(100)).round_dp(2);
            (
                TaxTag::Aliquot {
                    base: fmt_dec2(line_total),
                    rate: fmt_dec2(p),
                    amount: fmt_dec2(amount),
                },
                amount,
            )
        }
        None => (TaxTag::NotTaxed, Decimal::ZERO),
    }
}

fn build_recipient(
    order: &Order,
    config: &FiscalConfig,
    opts: &BuildOptions,
    document: Option<RecipientDocument>,
    model: DocumentModel,
    homologation: bool,
    uf: &str,
) -> RecipientBlock {
    let requested_name = opts
        .recipient_name
        .clone()
        .or_else(|| order.customer_name.clone());

    match model {
        DocumentModel::Nfe => {
            // Name and address are mandatory on the full invoice model; the
            // issuer address stands in when the order carries none.
            let name = if homologation {
                HOMOLOGATION_NAME.to_string()
            } else {
                requested_name.unwrap_or_else(|| "CONSUMIDOR FINAL".to_string())
            };
            RecipientBlock {
                document,
                name: Some(name),
                address: Some(address_block(&config.address, uf)),
            }
        }
        DocumentModel::Nfce => {
            let name = match (&document, requested_name) {
                (Some(_), Some(name)) if !homologation => Some(name),
                (Some(_), Some(_)) => Some(HOMOLOGATION_NAME.to_string()),
                _ => None,
            };
            RecipientBlock {
                document,
                name,
                address: None,
            }
        }
    }
}

/// NFC-e QR-code URL (version 2): `BASE?p=chave|2|tpAmb|cscId|hash` where
/// the hash is SHA-256 over `chave|2|tpAmb|cscId` + CSC, uppercase hex.
pub fn nfce_qr_code_url(
    base_url: &str,
    access_key: &str,
    tp_amb: &str,
    csc_id: &str,
    csc: &str,
) -> String {
    let concat = format!("{}|2|{}|{}{}", access_key, tp_amb, csc_id, csc);
    let digest = Sha256::digest(concat.as_bytes());
    let hash = hex::encode_upper(digest);
    format!("{}?p={}|2|{}|{}|{}", base_url, access_key, tp_amb, csc_id, hash)
}
