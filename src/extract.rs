use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// One table detected on one page: a grid of text cells, no header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFragment {
    pub rows: Vec<Vec<String>>,
}

/// Boundary to the PDF table-extraction engine. The engine itself is an
/// external collaborator; this crate only consumes the fragments it emits.
pub trait TableExtractor {
    fn extract_tables(&self, pdf_path: &Path) -> Result<Vec<TableFragment>>;
}

/// Adapter over an external extractor CLI (tabula-compatible): the command
/// receives the PDF path and must print a JSON array of tables on stdout,
/// each with a `data` grid of `{"text": ...}` cells.
pub struct CommandExtractor {
    command: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct JsonTable {
    data: Vec<Vec<JsonCell>>,
}

#[derive(Deserialize)]
struct JsonCell {
    #[serde(default)]
    text: String,
}

impl CommandExtractor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl TableExtractor for CommandExtractor {
    fn extract_tables(&self, pdf_path: &Path) -> Result<Vec<TableFragment>> {
        info!(
            "Extracting tables from {} via `{}`",
            pdf_path.display(),
            self.command
        );
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(pdf_path)
            .output()
            .map_err(|e| {
                EtlError::Extraction(format!("failed to spawn `{}`: {}", self.command, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EtlError::Extraction(format!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let fragments = parse_tabula_json(&output.stdout)?;
        info!("Extractor produced {} table fragments", fragments.len());
        Ok(fragments)
    }
}

/// Parses tabula JSON output into fragments, preserving table order.
pub fn parse_tabula_json(raw: &[u8]) -> Result<Vec<TableFragment>> {
    let tables: Vec<JsonTable> = serde_json::from_slice(raw)
        .map_err(|e| EtlError::Extraction(format!("unreadable extractor output: {}", e)))?;
    Ok(tables
        .into_iter()
        .map(|table| TableFragment {
            rows: table
                .data
                .into_iter()
                .map(|row| row.into_iter().map(|cell| cell.text).collect())
                .collect(),
        })
        .collect())
}
