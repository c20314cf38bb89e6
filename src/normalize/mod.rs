// Reconciliation of heterogeneous source files into canonical records:
// operator registry CSV, quarterly statement CSVs, and PDF table fragments.

pub mod operators;
pub mod procedures;
pub mod statements;

pub use operators::{normalize_operators, OperatorRecord};
pub use procedures::{merge_fragments, write_canonical_csv, ProcedureTable};
pub use statements::{
    discover_statement_files, normalize_statement_file, StatementFile, StatementRecord,
};

/// Decodes the regulator's Latin-1 exports. WINDOWS_1252 covers every
/// byte these files use.
pub(crate) fn decode_latin1(raw: &[u8]) -> String {
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(raw);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_latin1_maps_accented_bytes() {
        // "SAÚDE" with Ú encoded as 0xDA
        let raw = b"SA\xDADE";
        assert_eq!(decode_latin1(raw), "SAÚDE");
    }

    #[test]
    fn decode_latin1_passes_ascii_through() {
        assert_eq!(decode_latin1(b"Registro_ANS;CNPJ"), "Registro_ANS;CNPJ");
    }
}
