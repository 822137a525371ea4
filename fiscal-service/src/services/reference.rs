//! Static fiscal reference data for restaurant catalogs: NCM codes, CFOP
//! operation codes, and the CEST mapping for ICMS-ST items. Served read-only
//! to back the classification pickers in merchant administration.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReferenceEntry {
    pub code: &'static str,
    pub desc: &'static str,
}

const NCM_LIST: [ReferenceEntry; 24] = [
    ReferenceEntry { code: "2106.90.90", desc: "Preparações alimentícias não especificadas nem compreendidas em outras posições" },
    ReferenceEntry { code: "2202.10.00", desc: "Águas, incluídas as águas minerais e as águas gaseificadas, adicionadas de açúcar" },
    ReferenceEntry { code: "2202.99.00", desc: "Outras bebidas não alcoólicas" },
    ReferenceEntry { code: "2201.10.00", desc: "Água mineral natural ou artificial" },
    ReferenceEntry { code: "2203.00.00", desc: "Cervejas de malte" },
    ReferenceEntry { code: "2204.21.00", desc: "Vinhos - Em recipientes de capacidade não superior a 2 l" },
    ReferenceEntry { code: "2208.70.00", desc: "Licores" },
    ReferenceEntry { code: "2009.90.00", desc: "Outros sucos de fruta ou de produtos hortícolas" },
    ReferenceEntry { code: "1902.20.00", desc: "Massas alimentícias recheadas (mesmo cozidas ou preparadas de outro modo)" },
    ReferenceEntry { code: "1902.30.00", desc: "Outras massas alimentícias" },
    ReferenceEntry { code: "1905.90.90", desc: "Outros produtos de padaria, pastelaria ou da indústria de bolachas e biscoitos" },
    ReferenceEntry { code: "1905.32.00", desc: "Waffles e wafers" },
    ReferenceEntry { code: "2105.00.10", desc: "Sorvetes em embalagens imediatas de conteúdo inferior ou igual a 2 kg" },
    ReferenceEntry { code: "2105.00.90", desc: "Sorvetes - Outros" },
    ReferenceEntry { code: "2104.10.21", desc: "Caldos e sopas preparados em embalagens imediatas de conteúdo inferior ou igual a 1 kg" },
    ReferenceEntry { code: "0901.21.00", desc: "Café torrado, não descafeinado, em grão" },
    ReferenceEntry { code: "1602.32.00", desc: "Preparações de frangos - Outras" },
    ReferenceEntry { code: "1602.50.00", desc: "Preparações de carne bovina" },
    ReferenceEntry { code: "1601.00.00", desc: "Enchidos (salsichas, salames, mortadelas e semelhantes) e produtos semelhantes" },
    ReferenceEntry { code: "0406.10.00", desc: "Queijo fresco (não curado) ou de soro de leite" },
    ReferenceEntry { code: "2103.20.10", desc: "Ketchup e outros molhos de tomate" },
    ReferenceEntry { code: "2103.90.21", desc: "Maionese" },
    ReferenceEntry { code: "1806.90.00", desc: "Outros chocolates" },
    ReferenceEntry { code: "1704.90.90", desc: "Outros produtos de confeitaria sem cacau" },
];

const CFOP_LIST: [ReferenceEntry; 11] = [
    ReferenceEntry { code: "5.102", desc: "Venda de mercadoria adquirida ou recebida de terceiros." },
    ReferenceEntry { code: "5.101", desc: "Venda de produção do estabelecimento." },
    ReferenceEntry { code: "5.405", desc: "Venda de mercadoria adquirida ou recebida de terceiros em operação com mercadoria sujeita ao regime de substituição tributária, na condição de contribuinte substituído." },
    ReferenceEntry { code: "5.404", desc: "Venda de mercadoria sujeita ao regime de substituição tributária, cujo imposto já tenha sido retido anteriormente." },
    ReferenceEntry { code: "5.403", desc: "Venda de mercadoria adquirida ou recebida de terceiros em operação com mercadoria sujeita ao regime de substituição tributária, na condição de contribuinte substituto." },
    ReferenceEntry { code: "5.949", desc: "Taxa de serviços (saída de outros créditos)." },
    ReferenceEntry { code: "5.910", desc: "Remessa em bonificação, doação ou brinde." },
    ReferenceEntry { code: "5.667", desc: "Venda de combustível ou lubrificante adquiridos ou recebidos de terceiros destinados à industrialização subsequente." },
    ReferenceEntry { code: "6.102", desc: "Venda de mercadoria adquirida ou recebida de terceiros (saída para outro estado)." },
    ReferenceEntry { code: "6.101", desc: "Venda de produção do estabelecimento (saída para outro estado)." },
    ReferenceEntry { code: "6.405", desc: "Venda de mercadoria adquirida em operação com ST, contribuinte substituído (outro estado)." },
];

/// CEST entries keyed by 4-digit NCM prefix. Only item families subject to
/// ICMS-ST are mapped.
const CEST_BY_NCM: [(&str, &[ReferenceEntry]); 7] = [
    ("2202", &[
        ReferenceEntry { code: "03.003.00", desc: "Refrigerante em embalagem com capacidade igual ou inferior a 600 ml" },
        ReferenceEntry { code: "03.004.00", desc: "Refrigerante em embalagem com capacidade superior a 600 ml" },
    ]),
    ("2203", &[
        ReferenceEntry { code: "03.001.00", desc: "Cervejas em garrafa de vidro retornável" },
        ReferenceEntry { code: "03.002.00", desc: "Cervejas em outras embalagens" },
    ]),
    ("2204", &[
        ReferenceEntry { code: "03.006.00", desc: "Vinho em embalagem com capacidade igual ou inferior a 1 l" },
    ]),
    ("1704", &[
        ReferenceEntry { code: "17.001.00", desc: "Chicletes, gomas de mascar" },
    ]),
    ("1806", &[
        ReferenceEntry { code: "17.003.00", desc: "Chocolates e preparações alimentícias contendo cacau" },
    ]),
    ("0402", &[
        ReferenceEntry { code: "23.001.00", desc: "Leite em pó" },
    ]),
    ("2201", &[
        ReferenceEntry { code: "03.010.00", desc: "Água mineral natural, gaseificada ou não" },
    ]),
];

fn filter(list: &'static [ReferenceEntry], query: Option<&str>) -> Vec<ReferenceEntry> {
    match query.map(|q| q.to_lowercase()).filter(|q| !q.is_empty()) {
        None => list.to_vec(),
        Some(q) => list
            .iter()
            .filter(|e| e.code.contains(&q) || e.desc.to_lowercase().contains(&q))
            .copied()
            .collect(),
    }
}

pub fn search_ncm(query: Option<&str>) -> Vec<ReferenceEntry> {
    filter(&NCM_LIST, query)
}

pub fn search_cfop(query: Option<&str>) -> Vec<ReferenceEntry> {
    filter(&CFOP_LIST, query)
}

/// CEST candidates for an NCM, matched on its first four digits.
pub fn cest_for_ncm(ncm: &str) -> Vec<ReferenceEntry> {
    let prefix: String = ncm
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    CEST_BY_NCM
        .iter()
        .find(|(key, _)| *key == prefix)
        .map(|(_, entries)| entries.to_vec())
        .unwrap_or_default()
}
