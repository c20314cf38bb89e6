use crate::error::{EtlError, Result};
use crate::normalize::decode_latin1;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use walkdir::WalkDir;

/// Columns every quarterly statement file must carry (after header
/// lower-casing). Year and quarter are not in the row data; they come
/// from the directory layout.
const REQUIRED_COLUMNS: [&str; 5] = [
    "data",
    "reg_ans",
    "cd_conta_contabil",
    "descricao",
    "vl_saldo_final",
];

static QUARTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([1-4]T)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRecord {
    pub data: NaiveDate,
    pub registro_ans: String,
    pub codigo_conta: String,
    pub descricao: String,
    pub valor: Decimal,
    pub ano: i32,
    pub trimestre: String,
}

/// A statement CSV on disk, stamped with the fiscal year and quarter its
/// path encodes.
#[derive(Debug, Clone)]
pub struct StatementFile {
    pub path: PathBuf,
    pub ano: i32,
    pub trimestre: String,
}

/// Walks `raw/demonstracoes/<year>/<extracted-quarter-dir>/**` collecting
/// every CSV. The year is the directory name; the quarter is the leading
/// `NT` token of the extracted archive's base name. Output order is
/// deterministic.
pub fn discover_statement_files(statements_root: &Path) -> Vec<StatementFile> {
    let mut files = Vec::new();
    let Ok(year_entries) = fs::read_dir(statements_root) else {
        return files;
    };
    for year_entry in year_entries.flatten() {
        let year_dir = year_entry.path();
        if !year_dir.is_dir() {
            continue;
        }
        let Some(ano) = year_entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<i32>().ok())
        else {
            continue;
        };
        let Ok(quarter_entries) = fs::read_dir(&year_dir) else {
            continue;
        };
        for quarter_entry in quarter_entries.flatten() {
            let quarter_dir = quarter_entry.path();
            if !quarter_dir.is_dir() {
                continue;
            }
            let name = quarter_entry.file_name().to_string_lossy().to_string();
            let Some(trimestre) = QUARTER_RE
                .captures(&name)
                .map(|c| c[1].to_string())
            else {
                continue;
            };
            for entry in WalkDir::new(&quarter_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let is_csv = entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if is_csv {
                    files.push(StatementFile {
                        path: entry.path().to_path_buf(),
                        ano,
                        trimestre: trimestre.clone(),
                    });
                }
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Normalizes one quarterly statement file: lower-cases headers, projects
/// onto the five required columns, parses dates strictly and values as
/// decimals, and discards zero or unparseable values. Every surviving row
/// is stamped with the file's fiscal year and quarter.
pub fn normalize_statement_file(file: &StatementFile) -> Result<Vec<StatementRecord>> {
    let raw = fs::read(&file.path)?;
    let text = decode_latin1(&raw);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut indexes = [0usize; REQUIRED_COLUMNS.len()];
    let mut missing = Vec::new();
    for (slot, column) in REQUIRED_COLUMNS.iter().enumerate() {
        match headers.iter().position(|h| h == column) {
            Some(idx) => indexes[slot] = idx,
            None => missing.push(*column),
        }
    }
    if !missing.is_empty() {
        return Err(EtlError::SchemaMismatch(format!(
            "{}: missing required columns {:?}",
            file.path.display(),
            missing
        )));
    }
    let [data_idx, reg_idx, conta_idx, descricao_idx, valor_idx] = indexes;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

        // Strict date parse; a bad date drops the row
        let Ok(data) = NaiveDate::parse_from_str(cell(data_idx), "%Y-%m-%d") else {
            continue;
        };
        // Value must be non-zero and parseable
        let Some(valor) = parse_value(cell(valor_idx)) else {
            continue;
        };
        if valor.is_zero() {
            continue;
        }

        out.push(StatementRecord {
            data,
            registro_ans: cell(reg_idx).to_string(),
            codigo_conta: cell(conta_idx).to_string(),
            descricao: cell(descricao_idx).to_string(),
            valor,
            ano: file.ano,
            trimestre: file.trimestre.clone(),
        });
    }

    debug!(
        "Normalized {} statement rows from {}",
        out.len(),
        file.path.display()
    );
    Ok(out)
}

/// Monetary values arrive with either a dot or a comma decimal separator.
fn parse_value(raw: &str) -> Option<Decimal> {
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(&raw.replace(',', ".")).ok()
}
