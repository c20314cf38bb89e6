/// Source URLs and on-disk artifact names shared across the pipeline.
// Default remote sources (overridable via config.toml)
pub const OPERATORS_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/Relatorio_cadop.csv";
pub const STATEMENTS_BASE_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
pub const ANNEXES_PAGE_URL: &str =
    "https://www.gov.br/ans/pt-br/acesso-a-informacao/participacao-da-sociedade/atualizacao-do-rol-de-procedimentos";

// Raw-artifact file names under <data_root>/raw
pub const OPERATORS_FILE: &str = "operadoras_ativas.csv";
pub const ANEXO_I_FILE: &str = "Anexo_I.pdf";
pub const ANEXO_II_FILE: &str = "Anexo_II.pdf";
pub const ANNEX_BUNDLE_FILE: &str = "Anexos.zip";
pub const STATEMENTS_DIR: &str = "demonstracoes";
pub const ANNEX_BACKUP_DIR: &str = "backup_anexos";

// Processed artifacts under <data_root>/processed
pub const PROCEDURES_CSV_FILE: &str = "Rol_de_Procedimentos.csv";
pub const PROCEDURES_BUNDLE_FILE: &str = "Rol_de_Procedimentos.zip";
pub const STORE_FILE: &str = "ans.db";

/// Header written when the operator fetch degrades and a placeholder file
/// has to stand in for the real registry download.
pub const OPERATORS_PLACEHOLDER_HEADER: &str = "Registro_ANS;CNPJ;Razao_Social";

/// Quarter tokens used to recognize statement archives in year listings.
pub const QUARTER_TOKENS: [&str; 4] = ["1T", "2T", "3T", "4T"];
