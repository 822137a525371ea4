//! Government-schema document structure produced by the payload builder.
//!
//! Field values are already sanitized and formatted by the builder; this
//! module owns the structure and its serialization in schema element order.
//! Serialization emits no whitespace between tags: the authority rejects
//! batches whose enviNFe contains formatting text nodes.

use serde::Serialize;

/// Document model: 55 = full invoice (NF-e), 65 = consumer invoice (NFC-e).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentModel {
    Nfe,
    Nfce,
}

impl DocumentModel {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentModel::Nfe => "55",
            DocumentModel::Nfce => "65",
        }
    }

    /// DANFE print format: 1 = portrait, 4 = NFC-e.
    pub fn tp_imp(&self) -> &'static str {
        match self {
            DocumentModel::Nfe => "1",
            DocumentModel::Nfce => "4",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayloadHeader {
    pub nat_op: String,
    pub model: DocumentModel,
    pub serie: String,
    pub number: String,
    /// Emission timestamp already rendered with UTC-3 offset.
    pub emitted_at: String,
    /// 1 = normal emission.
    pub purpose_code: String,
    pub tp_amb: String,
    pub tp_emis: String,
    pub presence_indicator: String,
    /// Numeric IBGE code of the emitting state.
    pub uf_code: String,
    pub municipality_code: String,
    /// Random 8-digit numeric code, part of the access key.
    pub c_nf: String,
    pub check_digit: String,
    pub access_key: String,
}

#[derive(Debug, Clone)]
pub struct AddressBlock {
    pub street: String,
    pub number: String,
    pub neighborhood: String,
    pub municipality_code: String,
    pub municipality_name: String,
    pub uf: String,
    pub postal_code: String,
    pub country_code: String,
    pub country_name: String,
}

#[derive(Debug, Clone)]
pub struct IssuerBlock {
    pub cnpj: String,
    pub name: String,
    pub ie: String,
    /// Tax regime code; 1 = Simples Nacional.
    pub crt: String,
    pub address: AddressBlock,
}

#[derive(Debug, Clone)]
pub enum RecipientDocument {
    Cpf(String),
    Cnpj(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecipientBlock {
    pub document: Option<RecipientDocument>,
    pub name: Option<String>,
    pub address: Option<AddressBlock>,
}

/// PIS/COFINS sub-block: taxed by aliquot or explicitly not taxed (CST 07).
#[derive(Debug, Clone)]
pub enum TaxTag {
    Aliquot {
        base: String,
        rate: String,
        amount: String,
    },
    NotTaxed,
}

#[derive(Debug, Clone)]
pub struct IpiTag {
    pub rate: String,
    pub amount: String,
}

#[derive(Debug, Clone)]
pub struct ItemTaxes {
    pub icms_origin: String,
    pub pis: TaxTag,
    pub cofins: TaxTag,
    pub ipi: Option<IpiTag>,
}

#[derive(Debug, Clone)]
pub struct PayloadItem {
    pub number: u32,
    pub product_code: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,
    /// 4-decimal fixed string.
    pub quantity: String,
    /// 10-decimal fixed string.
    pub unit_price: String,
    /// 2-decimal fixed string.
    pub line_total: String,
    /// GTIN/EAN digits or the literal "SEM GTIN".
    pub gtin: String,
    pub taxes: ItemTaxes,
}

#[derive(Debug, Clone)]
pub struct TotalsBlock {
    pub products: String,
    pub invoice_total: String,
    pub pis: String,
    pub cofins: String,
    pub ipi: String,
}

#[derive(Debug, Clone)]
pub struct PaymentBlock {
    pub method_code: String,
    pub amount: String,
    pub change_due: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FiscalDocumentPayload {
    pub header: PayloadHeader,
    pub issuer: IssuerBlock,
    pub recipient: RecipientBlock,
    pub items: Vec<PayloadItem>,
    pub totals: TotalsBlock,
    pub payment: PaymentBlock,
    pub additional_info: Option<String>,
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn tag(out: &mut String, name: &str, value: &str) {
    out.push('<');
    out.push_str(name);
    out.push('>');
    out.push_str(&xml_escape(value));
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn address_xml(out: &mut String, element: &str, a: &AddressBlock) {
    out.push('<');
    out.push_str(element);
    out.push('>');
    tag(out, "xLgr", &a.street);
    tag(out, "nro", &a.number);
    tag(out, "xBairro", &a.neighborhood);
    tag(out, "cMun", &a.municipality_code);
    tag(out, "xMun", &a.municipality_name);
    tag(out, "UF", &a.uf);
    tag(out, "CEP", &a.postal_code);
    tag(out, "cPais", &a.country_code);
    tag(out, "xPais", &a.country_name);
    out.push_str("</");
    out.push_str(element);
    out.push('>');
}

impl FiscalDocumentPayload {
    /// Serialize the document in leiaute v4.00 element order.
    pub fn to_xml(&self) -> String {
        let h = &self.header;
        let mut out = String::with_capacity(4096);

        out.push_str(r#"<NFe xmlns="http://www.portalfiscal.inf.br/nfe">"#);
        out.push_str(&format!(
            r#"<infNFe versao="4.00" Id="NFe{}">"#,
            h.access_key
        ));

        out.push_str("<ide>");
        tag(&mut out, "cUF", &h.uf_code);
        tag(&mut out, "cNF", &h.c_nf);
        tag(&mut out, "natOp", &h.nat_op);
        tag(&mut out, "mod", h.model.code());
        tag(&mut out, "serie", &h.serie);
        tag(&mut out, "nNF", &h.number);
        tag(&mut out, "dhEmi", &h.emitted_at);
        tag(&mut out, "tpNF", "1");
        tag(&mut out, "idDest", "1");
        tag(&mut out, "cMunFG", &h.municipality_code);
        tag(&mut out, "tpImp", h.model.tp_imp());
        tag(&mut out, "tpEmis", &h.tp_emis);
        tag(&mut out, "cDV", &h.check_digit);
        tag(&mut out, "tpAmb", &h.tp_amb);
        tag(&mut out, "finNFe", &h.purpose_code);
        tag(&mut out, "indFinal", "1");
        tag(&mut out, "indPres", &h.presence_indicator);
        tag(&mut out, "procEmi", "0");
        tag(&mut out, "verProc", env!("CARGO_PKG_VERSION"));
        out.push_str("</ide>");

        out.push_str("<emit>");
        tag(&mut out, "CNPJ", &self.issuer.cnpj);
        tag(&mut out, "xNome", &self.issuer.name);
        address_xml(&mut out, "enderEmit", &self.issuer.address);
        tag(&mut out, "IE", &self.issuer.ie);
        tag(&mut out, "CRT", &self.issuer.crt);
        out.push_str("</emit>");

        self.recipient_xml(&mut out);

        for item in &self.items {
            out.push_str(&format!(r#"<det nItem="{}">"#, item.number));
            out.push_str("<prod>");
            tag(&mut out, "cProd", &item.product_code);
            tag(&mut out, "cEAN", &item.gtin);
            tag(&mut out, "xProd", &item.description);
            tag(&mut out, "NCM", &item.ncm);
            tag(&mut out, "CFOP", &item.cfop);
            tag(&mut out, "uCom", &item.unit);
            tag(&mut out, "qCom", &item.quantity);
            tag(&mut out, "vUnCom", &item.unit_price);
            tag(&mut out, "vProd", &item.line_total);
            tag(&mut out, "cEANTrib", &item.gtin);
            tag(&mut out, "uTrib", &item.unit);
            tag(&mut out, "qTrib", &item.quantity);
            tag(&mut out, "vUnTrib", &item.unit_price);
            tag(&mut out, "indTot", "1");
            out.push_str("</prod>");
            item.taxes.to_xml(&mut out);
            out.push_str("</det>");
        }

        out.push_str("<total><ICMSTot>");
        tag(&mut out, "vBC", "0.00");
        tag(&mut out, "vICMS", "0.00");
        tag(&mut out, "vICMSDeson", "0.00");
        tag(&mut out, "vFCPUFDest", "0.00");
        tag(&mut out, "vICMSUFDest", "0.00");
        tag(&mut out, "vICMSUFRemet", "0.00");
        tag(&mut out, "vFCP", "0.00");
        tag(&mut out, "vBCST", "0.00");
        tag(&mut out, "vST", "0.00");
        tag(&mut out, "vFCPST", "0.00");
        tag(&mut out, "vFCPSTRet", "0.00");
        tag(&mut out, "vProd", &self.totals.products);
        tag(&mut out, "vFrete", "0.00");
        tag(&mut out, "vSeg", "0.00");
        tag(&mut out, "vDesc", "0.00");
        tag(&mut out, "vII", "0.00");
        tag(&mut out, "vIPI", &self.totals.ipi);
        tag(&mut out, "vIPIDevol", "0.00");
        tag(&mut out, "vPIS", &self.totals.pis);
        tag(&mut out, "vCOFINS", &self.totals.cofins);
        tag(&mut out, "vOutro", "0.00");
        tag(&mut out, "vNF", &self.totals.invoice_total);
        tag(&mut out, "vTotTrib", "0.00");
        out.push_str("</ICMSTot></total>");

        out.push_str("<transp><modFrete>9</modFrete></transp>");

        out.push_str("<pag><detPag>");
        tag(&mut out, "tPag", &self.payment.method_code);
        tag(&mut out, "vPag", &self.payment.amount);
        out.push_str("</detPag>");
        if let Some(change) = &self.payment.change_due {
            tag(&mut out, "vTroco", change);
        }
        out.push_str("</pag>");

        if let Some(info) = &self.additional_info {
            out.push_str("<infAdic>");
            tag(&mut out, "infCpl", info);
            out.push_str("</infAdic>");
        }

        out.push_str("</infNFe></NFe>");
        out
    }

    fn recipient_xml(&self, out: &mut String) {
        let r = &self.recipient;
        // NFC-e allows anonymous sales; an empty dest block still carries
        // the non-contributor indicator.
        out.push_str("<dest>");
        match &r.document {
            Some(RecipientDocument::Cpf(cpf)) => tag(out, "CPF", cpf),
            Some(RecipientDocument::Cnpj(cnpj)) => tag(out, "CNPJ", cnpj),
            None => {}
        }
        if let Some(name) = &r.name {
            tag(out, "xNome", name);
        }
        if let Some(address) = &r.address {
            address_xml(out, "enderDest", address);
        }
        tag(out, "indIEDest", "9");
        out.push_str("</dest>");
    }
}

impl ItemTaxes {
    fn to_xml(&self, out: &mut String) {
        out.push_str("<imposto><ICMS><ICMSSN102>");
        tag(out, "orig", &self.icms_origin);
        tag(out, "CSOSN", "102");
        out.push_str("</ICMSSN102></ICMS>");

        out.push_str("<PIS>");
        self.pis.to_xml(out, "PIS");
        out.push_str("</PIS>");

        out.push_str("<COFINS>");
        self.cofins.to_xml(out, "COFINS");
        out.push_str("</COFINS>");

        if let Some(ipi) = &self.ipi {
            out.push_str("<IPI><IPITrib>");
            tag(out, "CST", "99");
            tag(out, "pIPI", &ipi.rate);
            tag(out, "vIPI", &ipi.amount);
            out.push_str("</IPITrib></IPI>");
        }
        out.push_str("</imposto>");
    }
}

impl TaxTag {
    fn to_xml(&self, out: &mut String, kind: &str) {
        match self {
            TaxTag::Aliquot { base, rate, amount } => {
                out.push('<');
                out.push_str(kind);
                out.push_str("Aliq>");
                tag(out, "CST", "01");
                tag(out, "vBC", base);
                tag(out, &format!("p{}", kind), rate);
                tag(out, &format!("v{}", kind), amount);
                out.push_str("</");
                out.push_str(kind);
                out.push_str("Aliq>");
            }
            TaxTag::NotTaxed => {
                out.push('<');
                out.push_str(kind);
                out.push_str("NT>");
                tag(out, "CST", "07");
                out.push_str("</");
                out.push_str(kind);
                out.push_str("NT>");
            }
        }
    }
}
