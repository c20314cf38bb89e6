use crate::error::{EtlError, Result};
use crate::extract::TableFragment;
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Coded abbreviations in the procedures annex, expanded to the full
/// category names. Applied to exact cell matches only.
static SUBSTITUTIONS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![("OD", "Odontológico"), ("AMB", "Ambulatorial")]
});

/// The merged procedures table: every fragment's rows, in original order,
/// with abbreviations expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureTable {
    pub rows: Vec<Vec<String>>,
}

/// Concatenates the extracted fragments into one table. `source` names the
/// document for error reporting; zero fragments means the extraction found
/// nothing usable.
pub fn merge_fragments(source: &str, fragments: Vec<TableFragment>) -> Result<ProcedureTable> {
    if fragments.is_empty() {
        return Err(EtlError::EmptyExtraction(source.to_string()));
    }
    let mut rows: Vec<Vec<String>> = fragments
        .into_iter()
        .flat_map(|fragment| fragment.rows)
        .collect();
    for row in &mut rows {
        for cell in row.iter_mut() {
            if let Some(&(_, replacement)) = SUBSTITUTIONS
                .iter()
                .find(|(code, _)| *code == cell.as_str())
            {
                *cell = replacement.to_string();
            }
        }
    }
    info!("Merged procedures table has {} rows", rows.len());
    Ok(ProcedureTable { rows })
}

/// Writes the canonical procedures CSV: semicolon-delimited, UTF-8 with
/// signature, no index column.
pub fn write_canonical_csv(table: &ProcedureTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(b"\xEF\xBB\xBF")?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_writer(file);
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("Wrote canonical CSV to {}", path.display());
    Ok(())
}
