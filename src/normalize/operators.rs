use crate::error::{EtlError, Result};
use crate::normalize::decode_latin1;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Source-column → canonical-field map for the operator registry. The
/// registry layout drifts across years; only the intersection with this
/// map is imported. Order here fixes the canonical output order.
static OPERATOR_COLUMNS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("Registro_ANS", "registro_ans"),
        ("CNPJ", "cnpj"),
        ("Razao_Social", "razao_social"),
        ("Nome_Fantasia", "nome_fantasia"),
        ("Modalidade", "modalidade"),
        ("Data_Registro_ANS", "data_registro"),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorRecord {
    pub registro_ans: String,
    pub cnpj: Option<String>,
    pub razao_social: Option<String>,
    pub nome_fantasia: Option<String>,
    pub modalidade: Option<String>,
    pub data_registro: Option<NaiveDate>,
}

/// Normalizes the raw operator registry file: selects the recognized
/// columns, renames them to canonical fields, drops rows without a
/// registry id and collapses duplicate ids to their first occurrence.
/// Registration dates that fail to parse become `None` instead of
/// failing the file.
pub fn normalize_operators(raw: &[u8]) -> Result<Vec<OperatorRecord>> {
    let text = decode_latin1(raw);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    // Intersection of the semantic map against the columns actually present
    let selected: Vec<(&str, usize)> = OPERATOR_COLUMNS
        .iter()
        .filter_map(|(source, canonical)| {
            headers
                .iter()
                .position(|h| h == source)
                .map(|idx| (*canonical, idx))
        })
        .collect();

    if selected.is_empty() {
        return Err(EtlError::SchemaMismatch(
            "no recognized columns in operator file".to_string(),
        ));
    }
    let Some(&(_, key_idx)) = selected.iter().find(|(name, _)| *name == "registro_ans") else {
        return Err(EtlError::SchemaMismatch(
            "operator file is missing the Registro_ANS column".to_string(),
        ));
    };

    let field = |record: &csv::StringRecord, canonical: &str| -> Option<String> {
        selected
            .iter()
            .find(|(name, _)| *name == canonical)
            .and_then(|&(_, idx)| record.get(idx))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(registro) = record.get(key_idx).map(str::trim).filter(|v| !v.is_empty())
        else {
            continue;
        };
        // First occurrence wins
        if !seen.insert(registro.to_string()) {
            continue;
        }
        out.push(OperatorRecord {
            registro_ans: registro.to_string(),
            cnpj: field(&record, "cnpj"),
            razao_social: field(&record, "razao_social"),
            nome_fantasia: field(&record, "nome_fantasia"),
            modalidade: field(&record, "modalidade"),
            data_registro: field(&record, "data_registro").and_then(|v| parse_date(&v)),
        });
    }

    debug!("Normalized {} operator records", out.len());
    Ok(out)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_HEADER: &str =
        "Registro_ANS;CNPJ;Razao_Social;Nome_Fantasia;Modalidade;Data_Registro_ANS";

    fn canonical_bytes(records: &[OperatorRecord]) -> Vec<u8> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_writer(Vec::new());
        for record in records {
            writer.serialize(record).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn selects_and_renames_known_columns() {
        let raw = format!(
            "{FULL_HEADER}\n12345;11.222.333/0001-44;ACME SAUDE;ACME;Medicina de Grupo;2005-07-14\n"
        );
        let records = normalize_operators(raw.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.registro_ans, "12345");
        assert_eq!(r.cnpj.as_deref(), Some("11.222.333/0001-44"));
        assert_eq!(r.modalidade.as_deref(), Some("Medicina de Grupo"));
        assert_eq!(
            r.data_registro,
            Some(NaiveDate::from_ymd_opt(2005, 7, 14).unwrap())
        );
    }

    #[test]
    fn partial_header_still_imports_the_intersection() {
        let raw = "Registro_ANS;CNPJ;Razao_Social\n12345;11.222.333/0001-44;ACME SAUDE\n";
        let records = normalize_operators(raw.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].nome_fantasia, None);
        assert_eq!(records[0].data_registro, None);
    }

    #[test]
    fn unknown_header_is_a_schema_mismatch() {
        let raw = "id;name\n1;acme\n";
        let err = normalize_operators(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch(_)));
    }

    #[test]
    fn missing_registry_column_is_a_schema_mismatch() {
        let raw = "CNPJ;Razao_Social\n11.222.333/0001-44;ACME\n";
        let err = normalize_operators(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch(_)));
    }

    #[test]
    fn rows_without_registry_id_are_dropped() {
        let raw = "Registro_ANS;Razao_Social\n12345;ACME\n;ORPHAN\n67890;BETA\n";
        let records = normalize_operators(raw.as_bytes()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.registro_ans.as_str()).collect();
        assert_eq!(ids, vec!["12345", "67890"]);
    }

    #[test]
    fn duplicate_registry_ids_keep_the_first_occurrence() {
        let raw = "Registro_ANS;Razao_Social\n12345;FIRST\n12345;SECOND\n";
        let records = normalize_operators(raw.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].razao_social.as_deref(), Some("FIRST"));
    }

    #[test]
    fn unparseable_dates_become_null() {
        let raw = "Registro_ANS;Data_Registro_ANS\n12345;31/02/borked\n67890;14/07/2005\n";
        let records = normalize_operators(raw.as_bytes()).unwrap();
        assert_eq!(records[0].data_registro, None);
        assert_eq!(
            records[1].data_registro,
            Some(NaiveDate::from_ymd_opt(2005, 7, 14).unwrap())
        );
    }

    #[test]
    fn latin1_payload_decodes() {
        let raw: &[u8] = b"Registro_ANS;Razao_Social\n12345;SA\xDADE TOTAL\n";
        let records = normalize_operators(raw).unwrap();
        assert_eq!(records[0].razao_social.as_deref(), Some("SAÚDE TOTAL"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = format!(
            "{FULL_HEADER}\n12345;11.222.333/0001-44;ACME SAUDE;ACME;Medicina de Grupo;2005-07-14\n67890;;BETA;;Cooperativa;\n"
        );
        let first = normalize_operators(raw.as_bytes()).unwrap();
        let second = normalize_operators(raw.as_bytes()).unwrap();
        assert_eq!(canonical_bytes(&first), canonical_bytes(&second));
    }
}
